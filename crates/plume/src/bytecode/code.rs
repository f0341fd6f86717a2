//! Code objects.
//!
//! A code object is immutable: a raw byte-code blob and/or its parsed
//! instruction list, the constant pool, the name and varname pools, the
//! function name, the local-slot count, and the generator flag. Frames parse
//! the blob lazily on first use, so deserialized modules pay decoding cost
//! only for code that actually runs.

use std::cell::OnceCell;

use crate::{
    exception::{ExcType, RunResult},
    heap::{Heap, HeapId},
    intern::StringId,
    value::Value,
};

use super::op::{CompareOp, Inst, Opcode, Operand, OperandKind};

/// Scope tag recorded by the emitter.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scope {
    #[default]
    Err = 0,
    Local = 1,
    Global = 2,
    Closure = 3,
}

/// An immutable unit of executable code.
#[derive(Debug)]
pub struct Code {
    /// Serialized instruction stream (LIST marker, u64 count, encoded
    /// instructions). `None` for builder-made code.
    raw: Option<Vec<u8>>,
    /// Parsed instructions, decoded lazily from `raw` on first access.
    insts: OnceCell<Vec<Inst>>,
    /// Constant pool. Indices referenced by `LOAD_CONST` are in range by
    /// construction.
    pub consts: Vec<Value>,
    /// Names used for global and attribute lookup.
    pub names: Vec<StringId>,
    /// Names of fast-local slots; length is at most `n_locals`.
    pub varnames: Vec<StringId>,
    /// Function name, `<module>` for module code.
    pub name: StringId,
    /// Fast-local slot count.
    pub n_locals: usize,
    /// Set when the body contains `YIELD_VALUE`.
    pub is_generator: bool,
    /// Scope tag from the emitter.
    pub scope: Scope,
}

impl Code {
    /// Creates a code object from already-parsed instructions.
    #[must_use]
    pub fn from_instructions(
        insts: Vec<Inst>,
        consts: Vec<Value>,
        names: Vec<StringId>,
        varnames: Vec<StringId>,
        name: StringId,
        n_locals: usize,
        is_generator: bool,
    ) -> Self {
        let cell = OnceCell::new();
        cell.set(insts).expect("fresh cell");
        Self {
            raw: None,
            insts: cell,
            consts,
            names,
            varnames,
            name,
            n_locals,
            is_generator,
            scope: Scope::default(),
        }
    }

    /// Creates a code object from a serialized instruction stream; decoding
    /// is deferred until the first frame touches it.
    #[must_use]
    pub fn from_raw(
        raw: Vec<u8>,
        consts: Vec<Value>,
        names: Vec<StringId>,
        varnames: Vec<StringId>,
        name: StringId,
        n_locals: usize,
        is_generator: bool,
    ) -> Self {
        Self {
            raw: Some(raw),
            insts: OnceCell::new(),
            consts,
            names,
            varnames,
            name,
            n_locals,
            is_generator,
            scope: Scope::default(),
        }
    }

    /// The parsed instruction list, decoding the raw blob on first call.
    pub fn instructions(&self) -> RunResult<&[Inst]> {
        if let Some(insts) = self.insts.get() {
            return Ok(insts);
        }
        let Some(raw) = &self.raw else {
            return Err(ExcType::internal("code object has neither bytes nor instructions"));
        };
        let parsed = decode_instruction_stream(raw)?;
        let _ = self.insts.set(parsed);
        Ok(self.insts.get().expect("just set"))
    }

    /// The serialized instruction stream: the original blob when present,
    /// otherwise freshly encoded from the parsed instructions.
    pub fn encoded_instructions(&self) -> RunResult<Vec<u8>> {
        if let Some(raw) = &self.raw {
            return Ok(raw.clone());
        }
        Ok(encode_instruction_stream(self.instructions()?))
    }

    /// Appends const-pool heap ids for the teardown sweep.
    pub fn collect_children(&self, out: &mut Vec<HeapId>) {
        for value in &self.consts {
            value.collect_child(out);
        }
    }
}

/// Structural code equality: all pools, the instruction sequence, the name,
/// the local-slot count, and the generator flag must compare equal.
///
/// Decoding failures make the comparison false rather than erroring.
#[must_use]
pub fn code_eq(a: HeapId, b: HeapId, heap: &Heap) -> bool {
    let (crate::heap::HeapData::Code(ca), crate::heap::HeapData::Code(cb)) = (heap.get(a), heap.get(b)) else {
        return false;
    };
    if ca.name != cb.name
        || ca.n_locals != cb.n_locals
        || ca.is_generator != cb.is_generator
        || ca.names != cb.names
        || ca.varnames != cb.varnames
        || ca.consts.len() != cb.consts.len()
    {
        return false;
    }
    for (x, y) in ca.consts.iter().zip(&cb.consts) {
        if !x.native_eq(y, heap).unwrap_or(false) {
            return false;
        }
    }
    match (ca.instructions(), cb.instructions()) {
        (Ok(ia), Ok(ib)) => ia == ib,
        _ => false,
    }
}

/// Marker byte opening an instruction stream; shared with the literal tags
/// of the binary format.
const LIST_MARKER: u8 = 3;

/// Encodes instructions as the serializer's blob shape: LIST marker, u64
/// little-endian count, then each instruction as opcode byte plus operand
/// bytes per its kind.
#[must_use]
pub fn encode_instruction_stream(insts: &[Inst]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + 8 + insts.len() * 9);
    out.push(LIST_MARKER);
    out.extend_from_slice(&(insts.len() as u64).to_le_bytes());
    for inst in insts {
        out.push(inst.op as u8);
        match inst.operand {
            Operand::None => {}
            Operand::Index(index) => out.extend_from_slice(&index.to_le_bytes()),
            Operand::Offset(offset) => out.extend_from_slice(&offset.to_le_bytes()),
            Operand::Compare(op) => out.push(op as u8),
        }
    }
    out
}

/// Decodes an instruction stream produced by `encode_instruction_stream`
/// (or by the binary serializer of another process).
pub fn decode_instruction_stream(bytes: &[u8]) -> RunResult<Vec<Inst>> {
    let mut reader = StreamReader { bytes, pos: 0 };
    if reader.read_u8()? != LIST_MARKER {
        return Err(ExcType::serialization_error("instruction stream missing LIST marker"));
    }
    let count = reader.read_u64()?;
    let count = usize::try_from(count)
        .map_err(|_| ExcType::serialization_error("instruction count exceeds usize"))?;
    let mut insts = Vec::with_capacity(count.min(1 << 20));
    for _ in 0..count {
        let byte = reader.read_u8()?;
        let op = Opcode::from_repr(byte)
            .ok_or_else(|| ExcType::serialization_error(format!("unknown opcode byte {byte}")))?;
        let operand = match op.operand_kind() {
            OperandKind::None => Operand::None,
            OperandKind::Index => Operand::Index(reader.read_u64()?),
            OperandKind::Offset => Operand::Offset(reader.read_u64()? as i64),
            OperandKind::Compare => {
                let tag = reader.read_u8()?;
                let op = CompareOp::from_repr(tag).ok_or_else(|| {
                    ExcType::serialization_error(format!("unknown compare tag {tag}"))
                })?;
                Operand::Compare(op)
            }
        };
        insts.push(Inst::new(op, operand));
    }
    Ok(insts)
}

struct StreamReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl StreamReader<'_> {
    fn read_u8(&mut self) -> RunResult<u8> {
        let byte = self
            .bytes
            .get(self.pos)
            .copied()
            .ok_or_else(|| ExcType::serialization_error("unexpected end of instruction stream"))?;
        self.pos += 1;
        Ok(byte)
    }

    fn read_u64(&mut self) -> RunResult<u64> {
        let end = self.pos + 8;
        let slice = self
            .bytes
            .get(self.pos..end)
            .ok_or_else(|| ExcType::serialization_error("unexpected end of instruction stream"))?;
        self.pos = end;
        Ok(u64::from_le_bytes(slice.try_into().expect("8-byte slice")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intern::StaticStrings;

    #[test]
    fn instruction_stream_round_trips() {
        let insts = vec![
            Inst::new(Opcode::LoadConst, Operand::Index(0)),
            Inst::new(Opcode::PopJumpIfFalse, Operand::Offset(-3)),
            Inst::new(Opcode::CompareOp, Operand::Compare(CompareOp::Le)),
            Inst::new(Opcode::ReturnValue, Operand::None),
        ];
        let bytes = encode_instruction_stream(&insts);
        assert_eq!(decode_instruction_stream(&bytes).unwrap(), insts);
    }

    #[test]
    fn lazy_decode_happens_once() {
        let insts = vec![Inst::new(Opcode::ReturnValue, Operand::None)];
        let raw = encode_instruction_stream(&insts);
        let code = Code::from_raw(
            raw,
            vec![],
            vec![],
            vec![],
            StaticStrings::Module.id(),
            0,
            false,
        );
        let first = code.instructions().unwrap().as_ptr();
        let second = code.instructions().unwrap().as_ptr();
        assert_eq!(first, second);
    }

    #[test]
    fn truncated_stream_is_a_serialization_error() {
        let insts = vec![Inst::new(Opcode::LoadConst, Operand::Index(7))];
        let mut bytes = encode_instruction_stream(&insts);
        bytes.truncate(bytes.len() - 2);
        let err = decode_instruction_stream(&bytes).unwrap_err();
        assert_eq!(err.exc_type(), crate::exception::ExcType::SerializationError);
    }
}
