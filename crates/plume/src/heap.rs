//! The value arena and its reference counting.
//!
//! Heap-resident values live in slots addressed by `HeapId`. Every holder of
//! a `Value::Ref` owns one count; `inc_ref` works through a `Cell` so clones
//! can happen under a shared borrow, while `dec_ref` releases slots and
//! sweeps their children iteratively (no recursion, so deep structures cannot
//! overflow the native stack).
//!
//! Class descriptors are deliberately immortal: their creators pin them with
//! an extra count for the life of the VM, which neutralizes the
//! class↔type↔MRO cycles a plain counter cannot collect.

use std::cell::Cell;

use crate::types::{
    Bytes, ClassObject, Dict, Function, Generator, Iife, Instance, Iter, List, LongInt, Method,
    NativeClosure, Promise, Slice,
};

/// Unique identifier for values stored inside the heap arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HeapId(u32);

impl HeapId {
    /// Returns the raw index value.
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Every runtime value that must live in the arena.
#[derive(Debug)]
pub enum HeapData {
    LongInt(LongInt),
    Bytes(Bytes),
    List(List),
    Dict(Dict),
    Slice(Slice),
    Code(crate::bytecode::Code),
    Function(Function),
    NativeClosure(NativeClosure),
    Iife(Iife),
    Method(Method),
    Class(ClassObject),
    Instance(Instance),
    Generator(Generator),
    Iter(Iter),
    Promise(Promise),
}

impl HeapData {
    /// Static variant name, for diagnostics and heap statistics.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::LongInt(_) => "LongInt",
            Self::Bytes(_) => "Bytes",
            Self::List(_) => "List",
            Self::Dict(_) => "Dict",
            Self::Slice(_) => "Slice",
            Self::Code(_) => "Code",
            Self::Function(_) => "Function",
            Self::NativeClosure(_) => "NativeClosure",
            Self::Iife(_) => "Iife",
            Self::Method(_) => "Method",
            Self::Class(_) => "Class",
            Self::Instance(_) => "Instance",
            Self::Generator(_) => "Generator",
            Self::Iter(_) => "Iter",
            Self::Promise(_) => "Promise",
        }
    }

    /// Appends the heap ids this value references, used by the release
    /// sweep.
    fn collect_children(&self, out: &mut Vec<HeapId>) {
        match self {
            Self::LongInt(_) | Self::Bytes(_) => {}
            Self::List(list) => {
                for value in list.as_slice() {
                    value.collect_child(out);
                }
            }
            Self::Dict(dict) => dict.collect_children(out),
            Self::Slice(slice) => {
                slice.start.collect_child(out);
                slice.stop.collect_child(out);
                slice.step.collect_child(out);
            }
            Self::Code(code) => code.collect_children(out),
            Self::Function(function) => function.collect_children(out),
            Self::NativeClosure(closure) => closure.collect_children(out),
            Self::Iife(iife) => iife.collect_children(out),
            Self::Method(method) => method.collect_children(out),
            Self::Class(class) => class.collect_children(out),
            Self::Instance(instance) => instance.collect_children(out),
            Self::Generator(generator) => generator.collect_children(out),
            Self::Iter(iter) => iter.collect_children(out),
            Self::Promise(promise) => promise.collect_children(out),
        }
    }
}

#[derive(Debug)]
struct Slot {
    data: Option<HeapData>,
    refs: Cell<u32>,
}

/// The value arena.
#[derive(Debug, Default)]
pub struct Heap {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl Heap {
    /// Creates an empty heap.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a slot for `data` with a reference count of one.
    pub fn allocate(&mut self, data: HeapData) -> HeapId {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            debug_assert!(slot.data.is_none(), "free list points at a live slot");
            slot.data = Some(data);
            slot.refs.set(1);
            return HeapId(index);
        }
        let index = u32::try_from(self.slots.len()).expect("heap exceeds u32 slots");
        self.slots.push(Slot {
            data: Some(data),
            refs: Cell::new(1),
        });
        HeapId(index)
    }

    /// Adds one reference to a live slot. Works through a `Cell` so values
    /// can be cloned while the heap is only borrowed shared.
    pub fn inc_ref(&self, id: HeapId) {
        let slot = &self.slots[id.index()];
        debug_assert!(slot.data.is_some(), "inc_ref on a freed slot");
        slot.refs.set(slot.refs.get() + 1);
    }

    /// Pins a slot for the rest of the VM's life by leaking one reference.
    /// Used for class descriptors (see module docs).
    pub fn pin(&self, id: HeapId) {
        self.inc_ref(id);
    }

    /// Removes one reference; releases the slot when the count reaches
    /// zero, iteratively sweeping children.
    pub fn dec_ref(&mut self, id: HeapId) {
        let mut pending = vec![id];
        while let Some(id) = pending.pop() {
            let slot = &self.slots[id.index()];
            let refs = slot.refs.get();
            debug_assert!(refs > 0, "dec_ref on a freed slot");
            if refs > 1 {
                slot.refs.set(refs - 1);
                continue;
            }
            slot.refs.set(0);
            let data = self.slots[id.index()]
                .data
                .take()
                .expect("released slot had no data");
            self.free.push(id.0);
            data.collect_children(&mut pending);
        }
    }

    /// Returns the data at a live slot.
    ///
    /// # Panics
    /// Panics on a freed slot; that is a reference-counting bug, the heap
    /// equivalent of use-after-free.
    #[must_use]
    pub fn get(&self, id: HeapId) -> &HeapData {
        self.slots[id.index()].data.as_ref().expect("heap get on freed slot")
    }

    /// Mutable access to the data at a live slot.
    #[must_use]
    pub fn get_mut(&mut self, id: HeapId) -> &mut HeapData {
        self.slots[id.index()].data.as_mut().expect("heap get_mut on freed slot")
    }

    /// Shared access to a slot known to hold a dict (globals, locals,
    /// builtin tables).
    #[must_use]
    pub fn get_dict(&self, id: HeapId) -> &Dict {
        match self.get(id) {
            HeapData::Dict(dict) => dict,
            other => panic!("expected Dict slot, found {}", other.kind_name()),
        }
    }

    /// Takes the dict out of a slot so it can be mutated with the heap
    /// available; pair with `put_dict`.
    #[must_use]
    pub fn take_dict(&mut self, id: HeapId) -> Dict {
        match self.get_mut(id) {
            HeapData::Dict(dict) => std::mem::take(dict),
            other => panic!("expected Dict slot, found {}", other.kind_name()),
        }
    }

    /// Restores a dict taken with `take_dict`.
    pub fn put_dict(&mut self, id: HeapId, dict: Dict) {
        match self.get_mut(id) {
            HeapData::Dict(slot) => *slot = dict,
            other => panic!("expected Dict slot, found {}", other.kind_name()),
        }
    }

    /// Current reference count, exposed for tests.
    #[must_use]
    pub fn ref_count(&self, id: HeapId) -> u32 {
        self.slots[id.index()].refs.get()
    }

    /// Number of live objects, exposed for tests and heap statistics.
    #[must_use]
    pub fn live_objects(&self) -> usize {
        self.slots.len() - self.free.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn release_sweeps_children_iteratively() {
        let mut heap = Heap::new();
        let inner = heap.allocate(HeapData::List(List::new()));
        let outer = heap.allocate(HeapData::List(List::from_values(vec![Value::Ref(inner)])));
        assert_eq!(heap.live_objects(), 2);
        heap.dec_ref(outer);
        assert_eq!(heap.live_objects(), 0);
    }

    #[test]
    fn slots_are_reused_after_release() {
        let mut heap = Heap::new();
        let a = heap.allocate(HeapData::List(List::new()));
        heap.dec_ref(a);
        let b = heap.allocate(HeapData::List(List::new()));
        assert_eq!(a.index(), b.index());
        assert_eq!(heap.live_objects(), 1);
    }

    #[test]
    fn shared_values_survive_one_holder_dropping() {
        let mut heap = Heap::new();
        let shared = heap.allocate(HeapData::List(List::new()));
        heap.inc_ref(shared);
        heap.dec_ref(shared);
        assert_eq!(heap.live_objects(), 1);
        assert_eq!(heap.ref_count(shared), 1);
    }
}
