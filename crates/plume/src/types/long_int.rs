//! Arbitrary-precision integers.
//!
//! The runtime stores integers as `Value::Int(i64)` while they fit and
//! promotes to a heap-allocated `LongInt` on overflow. Results that fit back
//! into i64 are demoted again, so the fast path stays fast and dict keys
//! hash identically either way.

use num_bigint::BigInt;
use num_traits::{ToPrimitive, Zero};

/// A heap-allocated arbitrary-precision integer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LongInt(BigInt);

impl LongInt {
    /// Wraps a big integer. Callers should prefer `demote` when the value
    /// may fit in i64.
    #[must_use]
    pub fn new(value: BigInt) -> Self {
        Self(value)
    }

    /// Returns the inner big integer.
    #[must_use]
    pub fn inner(&self) -> &BigInt {
        &self.0
    }

    /// Consumes self, returning the inner big integer.
    #[must_use]
    pub fn into_inner(self) -> BigInt {
        self.0
    }

    /// Returns the value as i64 when it fits.
    #[must_use]
    pub fn to_i64(&self) -> Option<i64> {
        self.0.to_i64()
    }
}

impl From<BigInt> for LongInt {
    fn from(value: BigInt) -> Self {
        Self(value)
    }
}

/// Splits a big integer into little-endian 16-bit limbs of its magnitude
/// plus a negative flag, the shape the binary serializer writes.
///
/// Zero yields an empty limb vector.
#[must_use]
pub fn to_limbs(value: &BigInt) -> (bool, Vec<u16>) {
    let (sign, bytes) = value.to_bytes_le();
    let negative = sign == num_bigint::Sign::Minus;
    if value.is_zero() {
        return (negative, Vec::new());
    }
    let mut limbs = Vec::with_capacity(bytes.len().div_ceil(2));
    for chunk in bytes.chunks(2) {
        let lo = chunk[0];
        let hi = chunk.get(1).copied().unwrap_or(0);
        limbs.push(u16::from_le_bytes([lo, hi]));
    }
    (negative, limbs)
}

/// Rebuilds a big integer from little-endian 16-bit magnitude limbs and a
/// negative flag. An empty limb slice is zero regardless of the flag.
#[must_use]
pub fn from_limbs(negative: bool, limbs: &[u16]) -> BigInt {
    let mut bytes = Vec::with_capacity(limbs.len() * 2);
    for &limb in limbs {
        bytes.extend_from_slice(&limb.to_le_bytes());
    }
    let magnitude = BigInt::from_bytes_le(num_bigint::Sign::Plus, &bytes);
    if negative { -magnitude } else { magnitude }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limb_round_trip_preserves_value() {
        let huge = num_traits::pow(BigInt::from(10), 40);
        for value in [
            BigInt::from(0),
            BigInt::from(1),
            BigInt::from(-1),
            BigInt::from(65_535),
            BigInt::from(65_536),
            huge.clone(),
            -huge,
        ] {
            let (negative, limbs) = to_limbs(&value);
            assert_eq!(from_limbs(negative, &limbs), value);
        }
    }

    #[test]
    fn zero_has_no_limbs() {
        let (_, limbs) = to_limbs(&BigInt::ZERO);
        assert!(limbs.is_empty());
    }
}
