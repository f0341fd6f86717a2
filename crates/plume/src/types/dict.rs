//! The dict container: insertion-ordered entries with a hash-bucket index.
//!
//! Entries live in a vector (preserving insertion order for display and for
//! class attribute tables); lookups go through a hash→entry-indices map with
//! equality resolved per bucket. Keys that have no content hash (mutable
//! containers, instances without identity-relevant state) fall back to heap
//! identity, so any value can key a dict without the table needing the VM.

use ahash::AHashMap;
use smallvec::SmallVec;

use crate::{
    heap::{Heap, HeapId},
    intern::{Interns, StringId},
    value::Value,
};

/// Insertion-ordered mapping from values to values.
///
/// The dict owns one reference to every stored key and value.
#[derive(Debug, Default)]
pub struct Dict {
    entries: Vec<(Value, Value)>,
    index: AHashMap<u64, SmallVec<[u32; 2]>>,
}

impl Dict {
    /// Creates an empty dict.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the entries in insertion order.
    #[must_use]
    pub fn entries(&self) -> &[(Value, Value)] {
        &self.entries
    }

    /// Consumes the dict, returning its entries. The caller takes over the
    /// references.
    #[must_use]
    pub fn into_entries(self) -> Vec<(Value, Value)> {
        self.entries
    }

    /// Looks up a key, returning a shared reference to its value.
    #[must_use]
    pub fn get(&self, key: &Value, heap: &Heap, interns: &Interns) -> Option<&Value> {
        let hash = key_hash(key, heap, interns);
        let bucket = self.index.get(&hash)?;
        for &slot in bucket {
            let (stored, value) = &self.entries[slot as usize];
            if keys_equal(stored, key, heap) {
                return Some(value);
            }
        }
        None
    }

    /// Convenience lookup by interned-string key.
    #[must_use]
    pub fn get_str(&self, key: StringId, heap: &Heap, interns: &Interns) -> Option<&Value> {
        self.get(&Value::Str(key), heap, interns)
    }

    /// True when the key is present.
    #[must_use]
    pub fn contains(&self, key: &Value, heap: &Heap, interns: &Interns) -> bool {
        self.get(key, heap, interns).is_some()
    }

    /// Inserts or replaces an entry, taking ownership of both references.
    ///
    /// On replacement the old value and the incoming key are released; the
    /// originally stored key survives.
    pub fn insert(&mut self, key: Value, value: Value, heap: &mut Heap, interns: &Interns) {
        let hash = key_hash(&key, heap, interns);
        if let Some(bucket) = self.index.get(&hash) {
            for &slot in bucket {
                if keys_equal(&self.entries[slot as usize].0, &key, heap) {
                    let old = std::mem::replace(&mut self.entries[slot as usize].1, value);
                    old.drop_with_heap(heap);
                    key.drop_with_heap(heap);
                    return;
                }
            }
        }
        let slot = u32::try_from(self.entries.len()).expect("dict exceeds u32 entries");
        self.entries.push((key, value));
        self.index.entry(hash).or_default().push(slot);
    }

    /// Appends the heap ids referenced by keys and values to `out`, used by
    /// the heap's teardown sweep.
    pub fn collect_children(&self, out: &mut Vec<HeapId>) {
        for (key, value) in &self.entries {
            key.collect_child(out);
            value.collect_child(out);
        }
    }
}

/// Content hash for a dict key.
///
/// Hashable kinds use their content hash (numeric kinds agree across
/// int/float/bool, strings use the interned content hash); everything else
/// hashes its heap identity.
#[must_use]
pub fn key_hash(key: &Value, heap: &Heap, interns: &Interns) -> u64 {
    key.content_hash(heap, interns)
        .unwrap_or_else(|| match key {
            Value::Ref(id) => crate::py_hash::hash_int(id.index() as i64),
            _ => 0,
        })
}

/// Key equality for bucket resolution: content equality for hashable kinds,
/// heap identity otherwise.
#[must_use]
pub fn keys_equal(a: &Value, b: &Value, heap: &Heap) -> bool {
    if let Some(eq) = a.native_eq(b, heap) {
        return eq;
    }
    match (a, b) {
        (Value::Ref(ida), Value::Ref(idb)) => ida == idb,
        _ => false,
    }
}
