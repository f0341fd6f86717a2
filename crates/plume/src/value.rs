//! Primary value type representing runtime objects.
//!
//! This enum uses a hybrid design: small immediate values (Int, Bool, None,
//! interned Str) are stored inline, while heap-allocated values (List, Dict,
//! Instance, etc.) live in the arena and are referenced via `Ref(HeapId)`.
//!
//! NOTE: `Clone` is intentionally NOT derived. Use `clone_with_heap()` so the
//! reference count of heap values stays correct; direct cloning would bypass
//! reference counting and cause use-after-free on release.

use num_bigint::BigInt;
use num_traits::{ToPrimitive, Zero};
use strum::IntoStaticStr;

use crate::{
    builtins::Builtin,
    heap::{Heap, HeapData, HeapId},
    intern::{Interns, StaticStrings, StringId},
    py_hash,
    types::LongInt,
};

/// A runtime value: an immediate payload or a handle into the heap.
#[derive(Debug)]
pub enum Value {
    /// The `None` singleton.
    None,
    /// `True` / `False`.
    Bool(bool),
    /// Machine-word integer fast path; values outside i64 live on the heap
    /// as `HeapData::LongInt`.
    Int(i64),
    Float(f64),
    /// An interned string. Two strings with equal content always carry the
    /// same id, so handle identity is content identity.
    Str(StringId),
    /// The iterator-exhaustion sentinel. A value, not an error.
    StopIteration,
    /// A native function or native method.
    Builtin(Builtin),
    /// Handle to an arena-allocated value.
    Ref(HeapId),
}

/// Native kind tags, one per built-in class.
///
/// Instances of user-defined classes report `Object` here; their real class
/// is resolved through the heap (`Vm::class_of`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoStaticStr)]
pub enum Type {
    #[strum(serialize = "object")]
    Object,
    #[strum(serialize = "NoneType")]
    NoneType,
    #[strum(serialize = "bool")]
    Bool,
    #[strum(serialize = "int")]
    Int,
    #[strum(serialize = "float")]
    Float,
    #[strum(serialize = "str")]
    Str,
    #[strum(serialize = "bytes")]
    Bytes,
    #[strum(serialize = "list")]
    List,
    #[strum(serialize = "dict")]
    Dict,
    #[strum(serialize = "slice")]
    Slice,
    #[strum(serialize = "code")]
    Code,
    #[strum(serialize = "function")]
    Function,
    #[strum(serialize = "native function")]
    NativeFunction,
    #[strum(serialize = "method")]
    Method,
    #[strum(serialize = "iife")]
    Iife,
    #[strum(serialize = "generator")]
    Generator,
    #[strum(serialize = "iterator")]
    Iterator,
    #[strum(serialize = "StopIteration")]
    StopIteration,
    #[strum(serialize = "promise")]
    Promise,
    #[strum(serialize = "type")]
    Type,
}

impl Type {
    /// All native kinds, in registration order. `Object` first so the
    /// universal root exists before any MRO that references it.
    pub const ALL: [Self; 20] = [
        Self::Object,
        Self::NoneType,
        Self::Bool,
        Self::Int,
        Self::Float,
        Self::Str,
        Self::Bytes,
        Self::List,
        Self::Dict,
        Self::Slice,
        Self::Code,
        Self::Function,
        Self::NativeFunction,
        Self::Method,
        Self::Iife,
        Self::Generator,
        Self::Iterator,
        Self::StopIteration,
        Self::Promise,
        Self::Type,
    ];

    /// The class name, e.g. `"int"`.
    #[must_use]
    pub fn name(self) -> &'static str {
        self.into()
    }

    /// The interned id of the class name.
    #[must_use]
    pub fn name_id(self) -> StringId {
        match self {
            Self::Object => StaticStrings::Object.id(),
            Self::NoneType => StaticStrings::NoneType.id(),
            // These class names share their interned entry with the builtin
            // function of the same name.
            Self::Bool => StaticStrings::Bool.id(),
            Self::Str => StaticStrings::Str.id(),
            Self::List => StaticStrings::List.id(),
            Self::Type => StaticStrings::Type.id(),
            Self::Int => StaticStrings::IntType.id(),
            Self::Float => StaticStrings::FloatType.id(),
            Self::Bytes => StaticStrings::BytesType.id(),
            Self::Dict => StaticStrings::DictType.id(),
            Self::Slice => StaticStrings::SliceType.id(),
            Self::Code => StaticStrings::CodeType.id(),
            Self::Function => StaticStrings::FunctionType.id(),
            Self::NativeFunction => StaticStrings::NativeFunctionType.id(),
            Self::Method => StaticStrings::MethodType.id(),
            Self::Iife => StaticStrings::IifeType.id(),
            Self::Generator => StaticStrings::GeneratorType.id(),
            Self::Iterator => StaticStrings::IteratorType.id(),
            Self::StopIteration => StaticStrings::StopIterationType.id(),
            Self::Promise => StaticStrings::PromiseType.id(),
        }
    }
}

impl Value {
    /// Native kind of this value. Instances report `Type::Object`; callers
    /// that need the user class go through `Vm::class_of`.
    #[must_use]
    pub fn py_type(&self, heap: &Heap) -> Type {
        match self {
            Self::None => Type::NoneType,
            Self::Bool(_) => Type::Bool,
            Self::Int(_) => Type::Int,
            Self::Float(_) => Type::Float,
            Self::Str(_) => Type::Str,
            Self::StopIteration => Type::StopIteration,
            Self::Builtin(_) => Type::NativeFunction,
            Self::Ref(id) => match heap.get(*id) {
                HeapData::LongInt(_) => Type::Int,
                HeapData::Bytes(_) => Type::Bytes,
                HeapData::List(_) => Type::List,
                HeapData::Dict(_) => Type::Dict,
                HeapData::Slice(_) => Type::Slice,
                HeapData::Code(_) => Type::Code,
                HeapData::Function(_) => Type::Function,
                HeapData::NativeClosure(_) => Type::NativeFunction,
                HeapData::Iife(_) => Type::Iife,
                HeapData::Method(_) => Type::Method,
                HeapData::Class(_) => Type::Type,
                HeapData::Instance(_) => Type::Object,
                HeapData::Generator(_) => Type::Generator,
                HeapData::Iter(_) => Type::Iterator,
                HeapData::Promise(_) => Type::Promise,
            },
        }
    }

    /// True when this value is an instance of a user-defined class.
    #[must_use]
    pub fn is_instance(&self, heap: &Heap) -> bool {
        matches!(self, Self::Ref(id) if matches!(heap.get(*id), HeapData::Instance(_)))
    }

    /// Clones the value, bumping the reference count for heap handles.
    #[must_use]
    pub fn clone_with_heap(&self, heap: &Heap) -> Self {
        if let Self::Ref(id) = self {
            heap.inc_ref(*id);
        }
        self.shallow_copy()
    }

    /// Copies the enum payload without touching reference counts. Only for
    /// use where the count has already been adjusted.
    #[must_use]
    pub(crate) fn shallow_copy(&self) -> Self {
        match self {
            Self::None => Self::None,
            Self::Bool(b) => Self::Bool(*b),
            Self::Int(i) => Self::Int(*i),
            Self::Float(f) => Self::Float(*f),
            Self::Str(s) => Self::Str(*s),
            Self::StopIteration => Self::StopIteration,
            Self::Builtin(b) => Self::Builtin(*b),
            Self::Ref(id) => Self::Ref(*id),
        }
    }

    /// Releases this value's reference. Heap handles decrement their slot;
    /// immediates are no-ops.
    pub fn drop_with_heap(self, heap: &mut Heap) {
        if let Self::Ref(id) = self {
            heap.dec_ref(id);
        }
    }

    /// Appends this value's heap id to `out` if it has one. Used by the
    /// heap's teardown sweep instead of `drop_with_heap` when the heap is
    /// already mid-release.
    pub(crate) fn collect_child(&self, out: &mut Vec<HeapId>) {
        if let Self::Ref(id) = self {
            out.push(*id);
        }
    }

    /// Identity comparison (`is`). Immediates compare by payload, heap
    /// handles by slot id; interned strings make content identity and
    /// handle identity coincide.
    #[must_use]
    pub fn is_identical(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::None, Self::None) | (Self::StopIteration, Self::StopIteration) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Builtin(a), Self::Builtin(b)) => a == b,
            (Self::Ref(a), Self::Ref(b)) => a == b,
            _ => false,
        }
    }

    /// Reads this value as an i64 index if it is integral.
    #[must_use]
    pub fn as_index(&self, heap: &Heap) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::Bool(b) => Some(i64::from(*b)),
            Self::Ref(id) => match heap.get(*id) {
                HeapData::LongInt(li) => li.to_i64(),
                _ => None,
            },
            _ => None,
        }
    }

    /// Reads this value as a big integer if it is integral.
    #[must_use]
    pub fn as_bigint(&self, heap: &Heap) -> Option<BigInt> {
        match self {
            Self::Int(i) => Some(BigInt::from(*i)),
            Self::Bool(b) => Some(BigInt::from(i64::from(*b))),
            Self::Ref(id) => match heap.get(*id) {
                HeapData::LongInt(li) => Some(li.inner().clone()),
                _ => None,
            },
            _ => None,
        }
    }

    /// Reads this value as f64 if it is numeric.
    #[must_use]
    pub fn as_float(&self, heap: &Heap) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Int(i) => Some(*i as f64),
            Self::Bool(b) => Some(f64::from(u8::from(*b))),
            Self::Ref(id) => match heap.get(*id) {
                HeapData::LongInt(li) => li.inner().to_f64(),
                _ => None,
            },
            _ => None,
        }
    }

    /// Builds an integer value, demoting to the i64 fast path when the
    /// magnitude allows it.
    #[must_use]
    pub fn from_bigint(value: BigInt, heap: &mut Heap) -> Self {
        match value.to_i64() {
            Some(small) => Self::Int(small),
            None => Self::Ref(heap.allocate(HeapData::LongInt(LongInt::new(value)))),
        }
    }

    /// Content hash for hashable kinds; `None` for mutable containers and
    /// instances (identity hashing is the caller's fallback).
    #[must_use]
    pub fn content_hash(&self, heap: &Heap, interns: &Interns) -> Option<u64> {
        match self {
            Self::None => Some(py_hash::hash_int(0x6e6f6e65)),
            Self::StopIteration => Some(py_hash::hash_int(0x73746f70)),
            Self::Bool(b) => Some(py_hash::hash_bool(*b)),
            Self::Int(i) => Some(py_hash::hash_int(*i)),
            Self::Float(f) => Some(py_hash::hash_float(*f)),
            Self::Str(s) => Some(interns.hash(*s)),
            Self::Builtin(b) => Some(py_hash::hash_int(*b as i64)),
            Self::Ref(id) => match heap.get(*id) {
                HeapData::LongInt(li) => Some(py_hash::hash_big_int(li.inner())),
                HeapData::Bytes(bytes) => Some(py_hash::hash_bytes(bytes.as_slice())),
                _ => None,
            },
        }
    }

    /// Equality that needs no method dispatch: `Some(result)` for pairs of
    /// native values, `None` when a user-class instance is involved and the
    /// answer belongs to `__eq__`.
    ///
    /// Handles of different native classes compare unequal without raising;
    /// numeric kinds compare across int/float/bool.
    #[must_use]
    pub fn native_eq(&self, other: &Self, heap: &Heap) -> Option<bool> {
        if self.is_instance(heap) || other.is_instance(heap) {
            return None;
        }
        if let (Some(a), Some(b)) = (self.numeric_class(heap), other.numeric_class(heap)) {
            return Some(numeric_eq(&a, &b));
        }
        let result = match (self, other) {
            (Self::None, Self::None) | (Self::StopIteration, Self::StopIteration) => true,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Builtin(a), Self::Builtin(b)) => a == b,
            (Self::Ref(a), Self::Ref(b)) => {
                if a == b {
                    return Some(true);
                }
                match (heap.get(*a), heap.get(*b)) {
                    (HeapData::Bytes(ba), HeapData::Bytes(bb)) => ba == bb,
                    (HeapData::List(la), HeapData::List(lb)) => {
                        la.len() == lb.len()
                            && la
                                .as_slice()
                                .iter()
                                .zip(lb.as_slice())
                                .all(|(x, y)| x.native_eq(y, heap).unwrap_or(false))
                    }
                    (HeapData::Slice(sa), HeapData::Slice(sb)) => {
                        sa.start.native_eq(&sb.start, heap).unwrap_or(false)
                            && sa.stop.native_eq(&sb.stop, heap).unwrap_or(false)
                            && sa.step.native_eq(&sb.step, heap).unwrap_or(false)
                    }
                    (HeapData::Code(_), HeapData::Code(_)) => {
                        crate::bytecode::code_eq(*a, *b, heap)
                    }
                    _ => false,
                }
            }
            _ => false,
        };
        Some(result)
    }

    /// Truthiness that needs no method dispatch; `None` for instances whose
    /// `__bool__`/`__len__` must be consulted.
    #[must_use]
    pub fn native_truthy(&self, heap: &Heap) -> Option<bool> {
        let result = match self {
            Self::None => false,
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::Float(f) => *f != 0.0,
            Self::Str(s) => *s != StaticStrings::EmptyString.id(),
            Self::StopIteration | Self::Builtin(_) => true,
            Self::Ref(id) => match heap.get(*id) {
                HeapData::LongInt(li) => !li.inner().is_zero(),
                HeapData::Bytes(b) => !b.is_empty(),
                HeapData::List(l) => !l.is_empty(),
                HeapData::Dict(d) => !d.is_empty(),
                HeapData::Instance(_) => return None,
                _ => true,
            },
        };
        Some(result)
    }

    /// Length for sized kinds; `None` otherwise.
    #[must_use]
    pub fn native_len(&self, heap: &Heap, interns: &Interns) -> Option<usize> {
        match self {
            // Count characters, not bytes, to match the surface language.
            Self::Str(s) => Some(interns.get(*s).chars().count()),
            Self::Ref(id) => match heap.get(*id) {
                HeapData::Bytes(b) => Some(b.len()),
                HeapData::List(l) => Some(l.len()),
                HeapData::Dict(d) => Some(d.len()),
                _ => None,
            },
            _ => None,
        }
    }

    /// Numeric view of the value, when it is numeric.
    fn numeric_class(&self, heap: &Heap) -> Option<Numeric> {
        match self {
            Self::Int(i) => Some(Numeric::Int(*i)),
            Self::Bool(b) => Some(Numeric::Int(i64::from(*b))),
            Self::Float(f) => Some(Numeric::Float(*f)),
            Self::Ref(id) => match heap.get(*id) {
                HeapData::LongInt(li) => Some(Numeric::Big(li.inner().clone())),
                _ => None,
            },
            _ => None,
        }
    }
}

/// A numeric operand, normalized for cross-kind comparison.
enum Numeric {
    Int(i64),
    Float(f64),
    Big(BigInt),
}

fn numeric_eq(a: &Numeric, b: &Numeric) -> bool {
    match (a, b) {
        (Numeric::Int(x), Numeric::Int(y)) => x == y,
        (Numeric::Float(x), Numeric::Float(y)) => x == y,
        (Numeric::Int(x), Numeric::Float(y)) | (Numeric::Float(y), Numeric::Int(x)) => (*x as f64) == *y,
        (Numeric::Big(x), Numeric::Big(y)) => x == y,
        (Numeric::Int(x), Numeric::Big(y)) | (Numeric::Big(y), Numeric::Int(x)) => &BigInt::from(*x) == y,
        (Numeric::Float(x), Numeric::Big(y)) | (Numeric::Big(y), Numeric::Float(x)) => {
            // A float equals a big integer only when it is integral and the
            // magnitudes match exactly.
            x.fract() == 0.0 && x.abs() < 1e38 && BigInt::from(*x as i128) == *y
        }
    }
}

/// Formats a float the way the surface language prints it: always with a
/// decimal point or exponent, never as a bare integer.
#[must_use]
pub fn format_float(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_owned();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_owned();
    }
    let mut buffer = ryu::Buffer::new();
    buffer.format(value).to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floats_format_with_a_decimal_point() {
        assert_eq!(format_float(1.0), "1.0");
        assert_eq!(format_float(2.5), "2.5");
        assert_eq!(format_float(f64::NAN), "nan");
    }

    #[test]
    fn identity_folds_interned_strings() {
        let a = Value::Str(StaticStrings::Object.id());
        let b = Value::Str(StaticStrings::Object.id());
        assert!(a.is_identical(&b));
    }
}
