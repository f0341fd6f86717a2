//! Opcode and operand definitions.
//!
//! Discriminants are part of the on-disk format (§ instruction encoding in
//! the serializer): one byte of opcode followed by the operand bytes the
//! opcode's kind dictates. They must never be renumbered.

use strum::{Display, FromRepr, IntoStaticStr};

/// The fixed opcode set.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, FromRepr, IntoStaticStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Opcode {
    LoadConst = 0,
    LoadName = 1,
    LoadGlobal = 2,
    LoadFast = 3,
    LoadAttr = 4,
    StoreName = 5,
    StoreFast = 6,
    StoreGlobal = 7,
    StoreAttr = 8,
    StoreSubscr = 9,
    PopTop = 10,
    Nop = 11,
    UnaryPositive = 12,
    UnaryNegative = 13,
    UnaryNot = 14,
    UnaryInvert = 15,
    BinaryAdd = 16,
    BinarySubtract = 17,
    BinaryMultiply = 18,
    BinaryMatrixMultiply = 19,
    BinaryTrueDivide = 20,
    BinaryFloorDivide = 21,
    BinaryModulo = 22,
    BinaryPower = 23,
    BinaryAnd = 24,
    BinaryOr = 25,
    BinaryXor = 26,
    BinaryLshift = 27,
    BinaryRshift = 28,
    BinarySubscr = 29,
    CompareOp = 30,
    BuildList = 31,
    BuildMap = 32,
    BuildSlice = 33,
    PopJumpIfFalse = 34,
    PopJumpIfTrue = 35,
    JumpAbsolute = 36,
    JumpForward = 37,
    GetIter = 38,
    ForIter = 39,
    MakeFunction = 40,
    CallFunction = 41,
    LoadBuildClass = 42,
    ReturnValue = 43,
    YieldValue = 44,
}

/// What follows the opcode byte in the encoded stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    /// No operand bytes.
    None,
    /// Unsigned index: 8 bytes, little-endian.
    Index,
    /// Signed relative offset: 8 bytes, two's complement, little-endian.
    Offset,
    /// Compare-op tag: 1 byte.
    Compare,
}

impl Opcode {
    /// The operand kind this opcode is encoded with.
    #[must_use]
    pub fn operand_kind(self) -> OperandKind {
        match self {
            Self::LoadConst
            | Self::LoadName
            | Self::LoadGlobal
            | Self::LoadFast
            | Self::LoadAttr
            | Self::StoreName
            | Self::StoreFast
            | Self::StoreGlobal
            | Self::StoreAttr
            | Self::BuildList
            | Self::BuildMap
            | Self::JumpAbsolute
            | Self::JumpForward
            | Self::ForIter
            | Self::CallFunction => OperandKind::Index,
            Self::PopJumpIfFalse | Self::PopJumpIfTrue => OperandKind::Offset,
            Self::CompareOp => OperandKind::Compare,
            _ => OperandKind::None,
        }
    }
}

/// Comparison tags carried by `COMPARE_OP`.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, FromRepr, IntoStaticStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum CompareOp {
    Eq = 0,
    Ne = 1,
    Lt = 2,
    Le = 3,
    Gt = 4,
    Ge = 5,
    Is = 6,
    IsNot = 7,
    In = 8,
    NotIn = 9,
}

/// A decoded operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    None,
    Index(u64),
    Offset(i64),
    Compare(CompareOp),
}

impl Operand {
    /// Reads the operand as an index, panicking on kind mismatch — the
    /// decoder guarantees operands match their opcode's kind.
    #[must_use]
    pub fn index(self) -> u64 {
        match self {
            Self::Index(index) => index,
            other => panic!("expected index operand, found {other:?}"),
        }
    }

    /// Reads the operand as a signed offset.
    #[must_use]
    pub fn offset(self) -> i64 {
        match self {
            Self::Offset(offset) => offset,
            other => panic!("expected offset operand, found {other:?}"),
        }
    }

    /// Reads the operand as a compare tag.
    #[must_use]
    pub fn compare(self) -> CompareOp {
        match self {
            Self::Compare(op) => op,
            other => panic!("expected compare operand, found {other:?}"),
        }
    }
}

/// One decoded instruction: an opcode with its operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Inst {
    pub op: Opcode,
    pub operand: Operand,
}

impl Inst {
    /// Builds an instruction, asserting the operand matches the opcode's
    /// kind in debug builds.
    #[must_use]
    pub fn new(op: Opcode, operand: Operand) -> Self {
        debug_assert!(
            matches!(
                (op.operand_kind(), &operand),
                (OperandKind::None, Operand::None)
                    | (OperandKind::Index, Operand::Index(_))
                    | (OperandKind::Offset, Operand::Offset(_))
                    | (OperandKind::Compare, Operand::Compare(_))
            ),
            "operand {operand:?} does not fit opcode {op:?}"
        );
        Self { op, operand }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcodes_round_trip_through_their_discriminants() {
        for byte in 0..=44u8 {
            let op = Opcode::from_repr(byte).expect("contiguous opcode range");
            assert_eq!(op as u8, byte);
        }
        assert!(Opcode::from_repr(45).is_none());
    }

    #[test]
    fn display_uses_screaming_snake_case() {
        assert_eq!(Opcode::LoadConst.to_string(), "LOAD_CONST");
        assert_eq!(CompareOp::NotIn.to_string(), "NOT_IN");
    }
}
