//! Class descriptors, instances, bound methods, and MRO linearization.

use std::cell::Cell;

use crate::{
    exception::{ExcType, RunResult},
    heap::{Heap, HeapData, HeapId},
    intern::StringId,
    types::Dict,
    value::{Type, Value},
};

/// A class descriptor.
///
/// Native classes implement their operation slots directly in the VM; user
/// classes fall back to named dunder attributes discovered through the MRO.
/// Class descriptors are pinned by their creator (the registry or
/// `__build_class__`) for process life, which is what makes the
/// class↔type↔MRO reference cycles safe under plain reference counting.
#[derive(Debug)]
pub struct ClassObject {
    /// Class name.
    pub name: StringId,
    /// Attribute table: methods, IIFE attributes, plain data. Insertion
    /// order is preserved for `__dict__`.
    pub attrs: Dict,
    /// Direct bases, in declaration order.
    pub bases: Vec<HeapId>,
    /// Full method resolution order. First element is this class, last is
    /// the universal root. Immutable once computed.
    pub mro: Vec<HeapId>,
    /// `Some(kind)` for native classes.
    pub native: Option<Type>,
}

impl ClassObject {
    /// True when operation slots are implemented directly by the VM.
    #[must_use]
    pub fn is_native(&self) -> bool {
        self.native.is_some()
    }

    /// Appends referenced heap ids for the teardown sweep.
    pub fn collect_children(&self, out: &mut Vec<HeapId>) {
        self.attrs.collect_children(out);
        out.extend_from_slice(&self.bases);
        out.extend_from_slice(&self.mro);
    }
}

/// An instance of a user-defined class.
#[derive(Debug)]
pub struct Instance {
    /// The instance's class.
    pub class: HeapId,
    /// Instance attribute table, populated by `setattr` and by cached IIFE
    /// results.
    pub attrs: Dict,
    /// Cache of callables found through the MRO, so repeated method access
    /// skips the walk.
    pub method_cache: Dict,
    /// Identity hash, computed at most once.
    pub hash: Cell<Option<u64>>,
}

impl Instance {
    /// Creates a bare instance. The caller owns one reference to `class`
    /// and hands it over.
    #[must_use]
    pub fn new(class: HeapId) -> Self {
        Self {
            class,
            attrs: Dict::new(),
            method_cache: Dict::new(),
            hash: Cell::new(None),
        }
    }

    /// Appends referenced heap ids for the teardown sweep.
    pub fn collect_children(&self, out: &mut Vec<HeapId>) {
        out.push(self.class);
        self.attrs.collect_children(out);
        self.method_cache.collect_children(out);
    }
}

/// A bound method: `(owner, callable)`. Invocation prepends the owner to
/// the argument list.
#[derive(Debug)]
pub struct Method {
    pub owner: Value,
    pub func: Value,
}

impl Method {
    pub fn collect_children(&self, out: &mut Vec<HeapId>) {
        self.owner.collect_child(out);
        self.func.collect_child(out);
    }
}

/// A class attribute invoked with `(owner)` on first read through an
/// instance; the result is cached on the instance.
#[derive(Debug)]
pub struct Iife {
    pub func: Value,
}

impl Iife {
    pub fn collect_children(&self, out: &mut Vec<HeapId>) {
        self.func.collect_child(out);
    }
}

/// Computes the method resolution order for a class with the given bases.
///
/// `mro(C) = [C] ++ merge(mro(P1), ..., mro(Pn), [P1..Pn])` where merge
/// repeatedly picks a good head: the first head that appears in no other
/// list's tail. When no good head exists the remaining first list is
/// appended as-is — the merge is tolerant rather than strict.
pub fn linearize(
    heap: &Heap,
    self_id: HeapId,
    bases: &[HeapId],
    object_id: HeapId,
) -> RunResult<Vec<HeapId>> {
    if bases.is_empty() {
        return Ok(vec![self_id, object_id]);
    }
    if bases.contains(&self_id) {
        return Err(ExcType::type_error("a class cannot inherit from itself"));
    }

    let mut sequences: Vec<Vec<HeapId>> = Vec::with_capacity(bases.len() + 1);
    for &base in bases {
        match heap.get(base) {
            HeapData::Class(class) => sequences.push(class.mro.clone()),
            _ => return Err(ExcType::type_error("bases must be classes")),
        }
    }
    sequences.push(bases.to_vec());

    let mut result = vec![self_id];
    loop {
        sequences.retain(|seq| !seq.is_empty());
        if sequences.is_empty() {
            break;
        }

        let good_head = sequences
            .iter()
            .map(|seq| seq[0])
            .find(|candidate| !sequences.iter().any(|other| other[1..].contains(candidate)));

        match good_head {
            Some(head) => {
                result.push(head);
                for seq in &mut sequences {
                    if seq[0] == head {
                        seq.remove(0);
                    }
                }
            }
            None => {
                // Tolerant fallback: concatenate the remaining first list.
                result.extend(sequences[0].iter().copied());
                break;
            }
        }
    }
    Ok(result)
}
