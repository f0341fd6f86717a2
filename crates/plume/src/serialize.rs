//! The binary code format: a header-less stream of tagged literals.
//!
//! Each literal starts with a one-byte tag. Multi-byte quantities are
//! little-endian regardless of host endianness; floats are exact IEEE-754
//! bits. Integers serialize as sign byte plus 16-bit magnitude limbs; the
//! canonical zero may be written as `ZERO` or as an `INTEGER` with zero
//! limbs, and both forms parse.

use num_traits::Zero;
use strum::FromRepr;

use crate::{
    bytecode::Code,
    exception::{ExcType, RunResult},
    heap::{Heap, HeapData, HeapId},
    intern::{Interns, StringId},
    types::{Bytes, List, long_int},
    value::Value,
};

/// Literal tags. Discriminants are the on-disk bytes and must never be
/// renumbered.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr)]
pub enum Literal {
    String = 0,
    Integer = 1,
    Float = 2,
    List = 3,
    True = 4,
    False = 5,
    None = 6,
    Zero = 7,
    Code = 8,
    Bytes = 9,
}

/// Serializes a value into `out`.
///
/// Serializable kinds: none, bool, int, float, string, bytes, list, code.
/// Anything else is a `TypeError`.
pub fn serialize_value(value: &Value, heap: &Heap, interns: &Interns, out: &mut Vec<u8>) -> RunResult<()> {
    match value {
        Value::None => out.push(Literal::None as u8),
        Value::Bool(true) => out.push(Literal::True as u8),
        Value::Bool(false) => out.push(Literal::False as u8),
        Value::Int(0) => out.push(Literal::Zero as u8),
        Value::Int(i) => write_integer(&num_bigint::BigInt::from(*i), out),
        Value::Float(f) => {
            out.push(Literal::Float as u8);
            out.extend_from_slice(&f.to_le_bytes());
        }
        Value::Str(s) => write_string(interns.get(*s), out),
        Value::Ref(id) => match heap.get(*id) {
            HeapData::LongInt(li) => {
                if li.inner().is_zero() {
                    out.push(Literal::Zero as u8);
                } else {
                    write_integer(li.inner(), out);
                }
            }
            HeapData::Bytes(bytes) => {
                out.push(Literal::Bytes as u8);
                out.extend_from_slice(&(bytes.len() as u64).to_le_bytes());
                out.extend_from_slice(bytes.as_slice());
            }
            HeapData::List(list) => {
                out.push(Literal::List as u8);
                out.extend_from_slice(&(list.len() as u64).to_le_bytes());
                for element in list.as_slice() {
                    serialize_value(element, heap, interns, out)?;
                }
            }
            HeapData::Code(code) => serialize_code(code, heap, interns, out)?,
            other => {
                return Err(ExcType::type_error(format!(
                    "cannot serialize '{}' values",
                    other.kind_name()
                )));
            }
        },
        _ => {
            return Err(ExcType::type_error("cannot serialize this value kind"));
        }
    }
    Ok(())
}

/// Serializes a code object: consts, names, varnames, name, nLocals,
/// generator flag, then the instruction stream wrapped as a BYTES literal.
pub fn serialize_code(code: &Code, heap: &Heap, interns: &Interns, out: &mut Vec<u8>) -> RunResult<()> {
    out.push(Literal::Code as u8);

    out.push(Literal::List as u8);
    out.extend_from_slice(&(code.consts.len() as u64).to_le_bytes());
    for constant in &code.consts {
        serialize_value(constant, heap, interns, out)?;
    }

    write_string_list(&code.names, interns, out);
    write_string_list(&code.varnames, interns, out);
    write_string(interns.get(code.name), out);

    out.extend_from_slice(&(code.n_locals as u64).to_le_bytes());
    let generator_flag = if code.is_generator { Literal::True } else { Literal::False };
    out.push(generator_flag as u8);

    let stream = code.encoded_instructions()?;
    out.push(Literal::Bytes as u8);
    out.extend_from_slice(&(stream.len() as u64).to_le_bytes());
    out.extend_from_slice(&stream);
    Ok(())
}

/// Convenience wrapper serializing a heap-resident code object.
pub fn code_to_bytes(code_id: HeapId, heap: &Heap, interns: &Interns) -> RunResult<Vec<u8>> {
    let HeapData::Code(code) = heap.get(code_id) else {
        return Err(ExcType::internal("code_to_bytes expects a code handle"));
    };
    let mut out = Vec::new();
    serialize_code(code, heap, interns, &mut out)?;
    Ok(out)
}

fn write_string(text: &str, out: &mut Vec<u8>) {
    out.push(Literal::String as u8);
    out.extend_from_slice(&(text.len() as u64).to_le_bytes());
    out.extend_from_slice(text.as_bytes());
}

fn write_string_list(ids: &[StringId], interns: &Interns, out: &mut Vec<u8>) {
    out.push(Literal::List as u8);
    out.extend_from_slice(&(ids.len() as u64).to_le_bytes());
    for &id in ids {
        write_string(interns.get(id), out);
    }
}

fn write_integer(value: &num_bigint::BigInt, out: &mut Vec<u8>) {
    let (negative, limbs) = long_int::to_limbs(value);
    out.push(Literal::Integer as u8);
    out.extend_from_slice(&(limbs.len() as u64).to_le_bytes());
    out.push(if negative { b'-' } else { b'+' });
    for limb in limbs {
        out.extend_from_slice(&limb.to_le_bytes());
    }
}

/// Streaming parser for the tagged-literal format. All reads are
/// bounds-checked; malformed input surfaces `SerializationError`.
pub struct BinaryParser<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> BinaryParser<'a> {
    /// Wraps a byte buffer.
    #[must_use]
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    /// Parses one value, allocating heap data as needed.
    pub fn parse_value(&mut self, heap: &mut Heap, interns: &mut Interns) -> RunResult<Value> {
        let tag = self.read_tag()?;
        match tag {
            Literal::None => Ok(Value::None),
            Literal::True => Ok(Value::Bool(true)),
            Literal::False => Ok(Value::Bool(false)),
            Literal::Zero => Ok(Value::Int(0)),
            Literal::Float => {
                let bytes = self.read_exact(8)?;
                Ok(Value::Float(f64::from_le_bytes(bytes.try_into().expect("8 bytes"))))
            }
            Literal::String => {
                let text = self.read_string_payload()?;
                Ok(Value::Str(interns.intern(&text)))
            }
            Literal::Integer => {
                let value = self.read_integer_payload()?;
                Ok(Value::from_bigint(value, heap))
            }
            Literal::Bytes => {
                let length = self.read_length()?;
                let payload = self.read_exact(length)?.to_vec();
                Ok(Value::Ref(heap.allocate(HeapData::Bytes(Bytes::new(payload)))))
            }
            Literal::List => {
                let count = self.read_length()?;
                let mut values = Vec::with_capacity(count.min(1 << 16));
                for _ in 0..count {
                    match self.parse_value(heap, interns) {
                        Ok(value) => values.push(value),
                        Err(err) => {
                            for value in values {
                                value.drop_with_heap(heap);
                            }
                            return Err(err);
                        }
                    }
                }
                Ok(Value::Ref(heap.allocate(HeapData::List(List::from_values(values)))))
            }
            Literal::Code => {
                let code = self.read_code_payload(heap, interns)?;
                Ok(Value::Ref(heap.allocate(HeapData::Code(code))))
            }
        }
    }

    /// Parses a stream whose first literal must be CODE, returning the heap
    /// handle of the root code object.
    pub fn parse_code(&mut self, heap: &mut Heap, interns: &mut Interns) -> RunResult<HeapId> {
        let value = self.parse_value(heap, interns)?;
        match &value {
            Value::Ref(id) if matches!(heap.get(*id), HeapData::Code(_)) => Ok(*id),
            _ => {
                value.drop_with_heap(heap);
                Err(ExcType::serialization_error("expected a CODE literal at the stream root"))
            }
        }
    }

    fn read_code_payload(&mut self, heap: &mut Heap, interns: &mut Interns) -> RunResult<Code> {
        let consts = self.read_value_list(heap, interns)?;
        let names = self.read_string_list(interns);
        let names = match names {
            Ok(names) => names,
            Err(err) => {
                for value in consts {
                    value.drop_with_heap(heap);
                }
                return Err(err);
            }
        };
        let varnames = match self.read_string_list(interns) {
            Ok(varnames) => varnames,
            Err(err) => {
                for value in consts {
                    value.drop_with_heap(heap);
                }
                return Err(err);
            }
        };

        let result: RunResult<(StringId, usize, bool, Vec<u8>)> = (|| {
            self.expect_tag(Literal::String)?;
            let name_text = self.read_string_payload()?;
            let name = interns.intern(&name_text);

            let n_locals = self.read_length()?;

            let flag = self.read_u8()?;
            let is_generator = match Literal::from_repr(flag) {
                Some(Literal::True) => true,
                Some(Literal::False) => false,
                _ => {
                    return Err(ExcType::serialization_error(format!(
                        "generator flag must be TRUE or FALSE, found byte {flag}"
                    )));
                }
            };

            self.expect_tag(Literal::Bytes)?;
            let stream_len = self.read_length()?;
            let stream = self.read_exact(stream_len)?.to_vec();
            Ok((name, n_locals, is_generator, stream))
        })();

        match result {
            Ok((name, n_locals, is_generator, stream)) => Ok(Code::from_raw(
                stream,
                consts,
                names,
                varnames,
                name,
                n_locals,
                is_generator,
            )),
            Err(err) => {
                for value in consts {
                    value.drop_with_heap(heap);
                }
                Err(err)
            }
        }
    }

    fn read_value_list(&mut self, heap: &mut Heap, interns: &mut Interns) -> RunResult<Vec<Value>> {
        self.expect_tag(Literal::List)?;
        let count = self.read_length()?;
        let mut values = Vec::with_capacity(count.min(1 << 16));
        for _ in 0..count {
            match self.parse_value(heap, interns) {
                Ok(value) => values.push(value),
                Err(err) => {
                    for value in values {
                        value.drop_with_heap(heap);
                    }
                    return Err(err);
                }
            }
        }
        Ok(values)
    }

    fn read_string_list(&mut self, interns: &mut Interns) -> RunResult<Vec<StringId>> {
        self.expect_tag(Literal::List)?;
        let count = self.read_length()?;
        let mut ids = Vec::with_capacity(count.min(1 << 16));
        for _ in 0..count {
            self.expect_tag(Literal::String)?;
            let text = self.read_string_payload()?;
            ids.push(interns.intern(&text));
        }
        Ok(ids)
    }

    fn read_string_payload(&mut self) -> RunResult<String> {
        let length = self.read_length()?;
        let bytes = self.read_exact(length)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| ExcType::serialization_error("string payload is not valid UTF-8"))
    }

    fn read_integer_payload(&mut self) -> RunResult<num_bigint::BigInt> {
        let count = self.read_length()?;
        let sign = self.read_u8()?;
        let negative = match sign {
            b'+' => false,
            b'-' => true,
            other => {
                return Err(ExcType::serialization_error(format!(
                    "integer sign must be '+' or '-', found byte {other}"
                )));
            }
        };
        let payload_len = count
            .checked_mul(2)
            .ok_or_else(|| ExcType::serialization_error("integer limb count overflows"))?;
        let payload = self.read_exact(payload_len)?;
        let limbs: Vec<u16> = payload
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        Ok(long_int::from_limbs(negative, &limbs))
    }

    fn read_tag(&mut self) -> RunResult<Literal> {
        let byte = self.read_u8()?;
        Literal::from_repr(byte)
            .ok_or_else(|| ExcType::serialization_error(format!("unknown literal tag {byte}")))
    }

    fn expect_tag(&mut self, expected: Literal) -> RunResult<()> {
        let tag = self.read_tag()?;
        if tag == expected {
            Ok(())
        } else {
            Err(ExcType::serialization_error(format!(
                "expected {expected:?} literal, found {tag:?}"
            )))
        }
    }

    fn read_u8(&mut self) -> RunResult<u8> {
        let byte = self
            .bytes
            .get(self.pos)
            .copied()
            .ok_or_else(|| ExcType::serialization_error("unexpected end of input"))?;
        self.pos += 1;
        Ok(byte)
    }

    fn read_length(&mut self) -> RunResult<usize> {
        let bytes = self.read_exact(8)?;
        let value = u64::from_le_bytes(bytes.try_into().expect("8 bytes"));
        usize::try_from(value).map_err(|_| ExcType::serialization_error("length exceeds usize"))
    }

    fn read_exact(&mut self, length: usize) -> RunResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(length)
            .ok_or_else(|| ExcType::serialization_error("length overflows the buffer"))?;
        let slice = self
            .bytes
            .get(self.pos..end)
            .ok_or_else(|| ExcType::serialization_error("unexpected end of input"))?;
        self.pos = end;
        Ok(slice)
    }
}

#[cfg(test)]
mod tests {
    use num_bigint::BigInt;

    use super::*;

    fn round_trip(value: &Value, heap: &mut Heap, interns: &mut Interns) -> Value {
        let mut out = Vec::new();
        serialize_value(value, heap, interns, &mut out).unwrap();
        BinaryParser::new(&out).parse_value(heap, interns).unwrap()
    }

    #[test]
    fn integers_round_trip_in_both_zero_forms() {
        let mut heap = Heap::new();
        let mut interns = Interns::new();

        let zero = round_trip(&Value::Int(0), &mut heap, &mut interns);
        assert!(matches!(zero, Value::Int(0)));

        // An INTEGER literal with zero limbs is also canonical zero.
        let explicit = [Literal::Integer as u8, 0, 0, 0, 0, 0, 0, 0, 0, b'+'];
        let parsed = BinaryParser::new(&explicit)
            .parse_value(&mut heap, &mut interns)
            .unwrap();
        assert!(matches!(parsed, Value::Int(0)));
    }

    #[test]
    fn big_integers_round_trip_through_limbs() {
        let mut heap = Heap::new();
        let mut interns = Interns::new();
        let big = num_traits::pow(BigInt::from(10), 30);
        let value = Value::from_bigint(big.clone(), &mut heap);
        let back = round_trip(&value, &mut heap, &mut interns);
        assert_eq!(back.as_bigint(&heap).unwrap(), big);
    }

    #[test]
    fn unknown_tags_are_serialization_errors() {
        let mut heap = Heap::new();
        let mut interns = Interns::new();
        let err = BinaryParser::new(&[200])
            .parse_value(&mut heap, &mut interns)
            .unwrap_err();
        assert_eq!(err.exc_type(), crate::exception::ExcType::SerializationError);
    }

    #[test]
    fn truncated_input_is_a_serialization_error() {
        let mut heap = Heap::new();
        let mut interns = Interns::new();
        let mut out = Vec::new();
        let id = interns.intern("hello");
        serialize_value(&Value::Str(id), &heap, &interns, &mut out).unwrap();
        out.truncate(out.len() - 1);
        let err = BinaryParser::new(&out)
            .parse_value(&mut heap, &mut interns)
            .unwrap_err();
        assert_eq!(err.exc_type(), crate::exception::ExcType::SerializationError);
    }
}
