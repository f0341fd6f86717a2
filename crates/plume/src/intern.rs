//! String interning for identifiers, literals, and runtime-built strings.
//!
//! Every string value in the runtime is an index (`StringId`) into the
//! process-local `Interns` table. Two strings with equal content always
//! resolve to the same id, so equality and hashing reduce to comparing ids
//! and reading a cached hash.
//!
//! StringIds are laid out as follows:
//! * 0 to count(StaticStrings) - names known at compile time (dunders,
//!   builtin and class names), interned in declaration order
//! * everything above - strings interned at runtime

use ahash::AHashMap;
use smallvec::SmallVec;
use strum::{EnumIter, IntoEnumIterator, IntoStaticStr};

use crate::py_hash::hash_str;

/// Index into the string interner's storage.
///
/// Uses `u32` to save space (4 bytes vs 8 bytes for `usize`). This limits us
/// to ~4 billion unique interns, which is more than sufficient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StringId(u32);

impl StringId {
    /// Returns the raw index value.
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// String values which are known at compile time and are pre-interned when
/// the table is created, so they can be looked up without hashing.
///
/// The interner guarantees `StringId(v as u32)` resolves to the serialized
/// form of variant `v`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
#[repr(u32)]
pub enum StaticStrings {
    #[strum(serialize = "")]
    EmptyString,
    #[strum(serialize = "<module>")]
    Module,
    #[strum(serialize = "__main__")]
    DunderMain,
    #[strum(serialize = "__name__")]
    DunderName,
    #[strum(serialize = "__class__")]
    DunderClass,
    #[strum(serialize = "__bases__")]
    DunderBases,
    #[strum(serialize = "__mro__")]
    DunderMro,
    #[strum(serialize = "__dict__")]
    DunderDict,
    #[strum(serialize = "__init__")]
    DunderInit,
    #[strum(serialize = "__build_class__")]
    DunderBuildClass,

    // ==========================
    // Operator dunders, dispatched when the left operand is a user-defined
    // class instance.
    #[strum(serialize = "__add__")]
    DunderAdd,
    #[strum(serialize = "__sub__")]
    DunderSub,
    #[strum(serialize = "__mul__")]
    DunderMul,
    #[strum(serialize = "__matmul__")]
    DunderMatmul,
    #[strum(serialize = "__truediv__")]
    DunderTruediv,
    #[strum(serialize = "__floordiv__")]
    DunderFloordiv,
    #[strum(serialize = "__mod__")]
    DunderMod,
    #[strum(serialize = "__pow__")]
    DunderPow,
    #[strum(serialize = "__divmod__")]
    DunderDivmod,
    #[strum(serialize = "__and__")]
    DunderAnd,
    #[strum(serialize = "__or__")]
    DunderOr,
    #[strum(serialize = "__xor__")]
    DunderXor,
    #[strum(serialize = "__lshift__")]
    DunderLshift,
    #[strum(serialize = "__rshift__")]
    DunderRshift,
    #[strum(serialize = "__eq__")]
    DunderEq,
    #[strum(serialize = "__ne__")]
    DunderNe,
    #[strum(serialize = "__lt__")]
    DunderLt,
    #[strum(serialize = "__le__")]
    DunderLe,
    #[strum(serialize = "__gt__")]
    DunderGt,
    #[strum(serialize = "__ge__")]
    DunderGe,
    #[strum(serialize = "__contains__")]
    DunderContains,
    #[strum(serialize = "__getitem__")]
    DunderGetitem,
    #[strum(serialize = "__setitem__")]
    DunderSetitem,
    #[strum(serialize = "__delitem__")]
    DunderDelitem,
    #[strum(serialize = "__pos__")]
    DunderPos,
    #[strum(serialize = "__neg__")]
    DunderNeg,
    #[strum(serialize = "__invert__")]
    DunderInvert,
    #[strum(serialize = "__bool__")]
    DunderBool,
    #[strum(serialize = "__hash__")]
    DunderHash,
    #[strum(serialize = "__len__")]
    DunderLen,
    #[strum(serialize = "__iter__")]
    DunderIter,
    #[strum(serialize = "__next__")]
    DunderNext,
    #[strum(serialize = "__reversed__")]
    DunderReversed,
    #[strum(serialize = "__str__")]
    DunderStr,
    #[strum(serialize = "__repr__")]
    DunderRepr,
    #[strum(serialize = "__getattr__")]
    DunderGetattr,
    #[strum(serialize = "__setattr__")]
    DunderSetattr,

    // ==========================
    // Builtin function and singleton names registered in the builtins table.
    Print,
    Len,
    Next,
    Iter,
    Range,
    Type,
    Id,
    Hash,
    Str,
    Repr,
    Bool,
    Input,
    List,
    Reversed,
    #[strum(serialize = "None")]
    NoneName,
    #[strum(serialize = "True")]
    TrueName,
    #[strum(serialize = "False")]
    FalseName,
    #[strum(serialize = "Promise")]
    PromiseName,

    // ==========================
    // Native method names.
    Append,
    Pop,
    Get,
    Keys,
    Values,
    Upper,
    Lower,
    Join,
    Split,
    Send,
    Done,
    Then,
    Catch,
    Resolve,
    Reject,

    // ==========================
    // Native class names. `bool`, `str`, `list`, and `type` reuse the
    // builtin-function entries above; every interned string has exactly
    // one id.
    #[strum(serialize = "object")]
    Object,
    #[strum(serialize = "NoneType")]
    NoneType,
    #[strum(serialize = "int")]
    IntType,
    #[strum(serialize = "float")]
    FloatType,
    #[strum(serialize = "bytes")]
    BytesType,
    #[strum(serialize = "dict")]
    DictType,
    #[strum(serialize = "slice")]
    SliceType,
    #[strum(serialize = "code")]
    CodeType,
    #[strum(serialize = "function")]
    FunctionType,
    #[strum(serialize = "native function")]
    NativeFunctionType,
    #[strum(serialize = "method")]
    MethodType,
    #[strum(serialize = "iife")]
    IifeType,
    #[strum(serialize = "generator")]
    GeneratorType,
    #[strum(serialize = "iterator")]
    IteratorType,
    #[strum(serialize = "StopIteration")]
    StopIterationType,
    #[strum(serialize = "promise")]
    PromiseType,
}

impl StaticStrings {
    /// Returns the id this static string was pre-interned under.
    #[inline]
    #[must_use]
    pub fn id(self) -> StringId {
        StringId(self as u32)
    }
}

/// One interned string with its content hash, computed exactly once at
/// intern time.
#[derive(Debug)]
struct InternEntry {
    text: Box<str>,
    hash: u64,
}

/// Content-keyed string intern table.
///
/// Lookups by content go through a hash→candidates map so string storage is
/// not duplicated. All strings with identical content alias a single id.
#[derive(Debug)]
pub struct Interns {
    entries: Vec<InternEntry>,
    by_hash: AHashMap<u64, SmallVec<[u32; 1]>>,
}

impl Default for Interns {
    fn default() -> Self {
        Self::new()
    }
}

impl Interns {
    /// Creates a table with all `StaticStrings` pre-interned, in declaration
    /// order, so `StaticStrings::id()` holds.
    #[must_use]
    pub fn new() -> Self {
        let mut interns = Self {
            entries: Vec::new(),
            by_hash: AHashMap::new(),
        };
        for stat in StaticStrings::iter() {
            let text: &'static str = stat.into();
            let id = interns.intern(text);
            debug_assert_eq!(id, stat.id());
        }
        interns
    }

    /// Interns `text`, returning the existing id when the content was seen
    /// before.
    pub fn intern(&mut self, text: &str) -> StringId {
        let hash = hash_str(text);
        if let Some(candidates) = self.by_hash.get(&hash) {
            for &idx in candidates {
                if &*self.entries[idx as usize].text == text {
                    return StringId(idx);
                }
            }
        }
        let idx = u32::try_from(self.entries.len()).expect("intern table exceeds u32 range");
        self.entries.push(InternEntry {
            text: text.into(),
            hash,
        });
        self.by_hash.entry(hash).or_default().push(idx);
        StringId(idx)
    }

    /// Returns the content of an interned string.
    #[inline]
    #[must_use]
    pub fn get(&self, id: StringId) -> &str {
        &self.entries[id.index()].text
    }

    /// Returns the cached content hash of an interned string.
    #[inline]
    #[must_use]
    pub fn hash(&self, id: StringId) -> u64 {
        self.entries[id.index()].hash
    }

    /// Number of interned strings, static set included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the table is empty (never the case after `new`).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_content_aliases_one_id() {
        let mut interns = Interns::new();
        let a = interns.intern("hello");
        let b = interns.intern("hello");
        assert_eq!(a, b);
        assert_eq!(interns.hash(a), interns.hash(b));
    }

    #[test]
    fn static_strings_resolve_to_their_ids() {
        let interns = Interns::new();
        assert_eq!(interns.get(StaticStrings::DunderAdd.id()), "__add__");
        assert_eq!(interns.get(StaticStrings::Object.id()), "object");
        assert_eq!(interns.get(StaticStrings::Module.id()), "<module>");
    }

    #[test]
    fn runtime_interns_do_not_collide_with_static_set() {
        let mut interns = Interns::new();
        let id = interns.intern("wholly_dynamic_name");
        assert_eq!(interns.get(id), "wholly_dynamic_name");
        let again = interns.intern(&String::from("wholly_dynamic_name"));
        assert_eq!(id, again);
    }
}
