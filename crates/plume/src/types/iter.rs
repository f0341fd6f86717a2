//! The iterator family.
//!
//! Every native iterable gets its cursor state from one enum so the
//! `GET_ITER`/`FOR_ITER` opcodes and the `next()` builtin share a single
//! advance seam. Exhaustion is reported as the `StopIteration` sentinel
//! value, never as an error.

use crate::{
    exception::{ExcType, RunResult},
    heap::{Heap, HeapData, HeapId},
    intern::{Interns, StringId},
    value::Value,
};

/// Cursor state for one live iterator.
#[derive(Debug)]
pub enum Iter {
    /// Iterates list elements by index; mutation during iteration is
    /// observed, matching list semantics in the surface language.
    List { list: HeapId, index: usize },
    /// Iterates the characters of an interned string.
    Str { string: StringId, index: usize },
    /// Iterates bytes, producing small integers.
    Bytes { bytes: HeapId, index: usize },
    /// Iterates a dict's keys in insertion order.
    DictKeys { dict: HeapId, index: usize },
    /// Iterates list elements back to front; backs the `reversed()`
    /// builtin. `remaining` is the count of elements still to produce.
    ListReverse { list: HeapId, remaining: usize },
    /// Iterates an arithmetic progression; backs the `range()` builtin.
    Range { current: i64, stop: i64, step: i64 },
}

impl Iter {
    /// Appends referenced heap ids for the teardown sweep.
    pub fn collect_children(&self, out: &mut Vec<HeapId>) {
        match self {
            Self::List { list, .. } | Self::ListReverse { list, .. } => out.push(*list),
            Self::Bytes { bytes, .. } => out.push(*bytes),
            Self::DictKeys { dict, .. } => out.push(*dict),
            Self::Str { .. } | Self::Range { .. } => {}
        }
    }
}

/// Advances the iterator at `iter_id`, returning the produced value or the
/// `StopIteration` sentinel once the source is exhausted.
pub fn advance(heap: &mut Heap, interns: &mut Interns, iter_id: HeapId) -> RunResult<Value> {
    enum Step {
        Produce(Value, usize),
        ProduceRange(Value, i64),
        Done,
    }

    let step = {
        let HeapData::Iter(iter) = heap.get(iter_id) else {
            return Err(ExcType::internal("advance on a non-iterator"));
        };
        match iter {
            Iter::List { list, index } => {
                let HeapData::List(list) = heap.get(*list) else {
                    return Err(ExcType::internal("list iterator over non-list"));
                };
                if *index < list.len() {
                    Step::Produce(list.get(*index).clone_with_heap(heap), index + 1)
                } else {
                    Step::Done
                }
            }
            Iter::Str { string, index } => match interns.get(*string).chars().nth(*index) {
                Some(ch) => {
                    let mut buffer = [0u8; 4];
                    let id = interns.intern(ch.encode_utf8(&mut buffer));
                    Step::Produce(Value::Str(id), index + 1)
                }
                None => Step::Done,
            },
            Iter::Bytes { bytes, index } => {
                let HeapData::Bytes(bytes) = heap.get(*bytes) else {
                    return Err(ExcType::internal("bytes iterator over non-bytes"));
                };
                match bytes.get(*index) {
                    Some(byte) => Step::Produce(Value::Int(i64::from(byte)), index + 1),
                    None => Step::Done,
                }
            }
            Iter::DictKeys { dict, index } => {
                let HeapData::Dict(dict) = heap.get(*dict) else {
                    return Err(ExcType::internal("dict iterator over non-dict"));
                };
                match dict.entries().get(*index) {
                    Some((key, _)) => Step::Produce(key.clone_with_heap(heap), index + 1),
                    None => Step::Done,
                }
            }
            Iter::ListReverse { list, remaining } => {
                let HeapData::List(list) = heap.get(*list) else {
                    return Err(ExcType::internal("list iterator over non-list"));
                };
                // Clamp against a list that shrank mid-iteration.
                let remaining = (*remaining).min(list.len());
                if remaining > 0 {
                    Step::Produce(list.get(remaining - 1).clone_with_heap(heap), remaining - 1)
                } else {
                    Step::Done
                }
            }
            Iter::Range { current, stop, step } => {
                let more = if *step > 0 { current < stop } else { current > stop };
                if more {
                    Step::ProduceRange(Value::Int(*current), current + step)
                } else {
                    Step::Done
                }
            }
        }
    };

    match step {
        Step::Done => Ok(Value::StopIteration),
        Step::Produce(value, next_index) => {
            let HeapData::Iter(iter) = heap.get_mut(iter_id) else {
                unreachable!("checked above");
            };
            match iter {
                Iter::List { index, .. }
                | Iter::Str { index, .. }
                | Iter::Bytes { index, .. }
                | Iter::DictKeys { index, .. } => *index = next_index,
                Iter::ListReverse { remaining, .. } => *remaining = next_index,
                Iter::Range { .. } => {}
            }
            Ok(value)
        }
        Step::ProduceRange(value, next_current) => {
            let HeapData::Iter(Iter::Range { current, .. }) = heap.get_mut(iter_id) else {
                unreachable!("checked above");
            };
            *current = next_current;
            Ok(value)
        }
    }
}
