//! Stable 64-bit hashes for runtime values.
//!
//! These hashes feed dict buckets, the string interner, and the `hash()`
//! builtin. They are deterministic across runs (no per-process seed) so
//! serialized fixtures and tests stay stable.
//!
//! The numeric hashes keep the invariant that values comparing equal hash
//! equal across kinds: `hash(1) == hash(1.0) == hash(True)`.

use num_bigint::BigInt;
use num_traits::ToPrimitive;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// FNV-1a over a byte slice.
#[must_use]
pub fn hash_bytes(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET;
    for &byte in bytes {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Hash of a string's UTF-8 content.
#[must_use]
pub fn hash_str(text: &str) -> u64 {
    hash_bytes(text.as_bytes())
}

/// Hash of a machine integer.
#[must_use]
pub fn hash_int(value: i64) -> u64 {
    // Identity-ish: equal ints must hash equal to the float of the same value.
    value as u64
}

/// Hash of an arbitrary-precision integer.
///
/// Values that fit in i64 hash identically to their `hash_int` form so
/// promotion and demotion never change a dict key's bucket.
#[must_use]
pub fn hash_big_int(value: &BigInt) -> u64 {
    if let Some(small) = value.to_i64() {
        return hash_int(small);
    }
    let (sign, bytes) = value.to_bytes_le();
    hash_bytes(&bytes) ^ ((sign == num_bigint::Sign::Minus) as u64)
}

/// Hash of a float.
///
/// Integral floats hash as the corresponding integer; everything else
/// hashes its bit pattern, with -0.0 folded onto 0.0.
#[must_use]
pub fn hash_float(value: f64) -> u64 {
    if value == 0.0 {
        return 0;
    }
    if value.fract() == 0.0 && value >= i64::MIN as f64 && value <= i64::MAX as f64 {
        return hash_int(value as i64);
    }
    value.to_bits()
}

/// Hash of a bool, equal to the hash of 0 or 1.
#[must_use]
pub fn hash_bool(value: bool) -> u64 {
    hash_int(i64::from(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_kinds_hash_consistently() {
        assert_eq!(hash_int(1), hash_float(1.0));
        assert_eq!(hash_int(1), hash_bool(true));
        assert_eq!(hash_int(0), hash_float(-0.0));
        assert_eq!(hash_big_int(&BigInt::from(42)), hash_int(42));
    }

    #[test]
    fn string_hash_depends_only_on_content() {
        assert_eq!(hash_str("abc"), hash_bytes(b"abc"));
        assert_ne!(hash_str("abc"), hash_str("abd"));
    }
}
