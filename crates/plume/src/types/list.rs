//! The list container.

use crate::{
    exception::{ExcType, RunResult},
    value::Value,
};

/// A mutable, growable sequence of values.
///
/// The list owns one reference to each element; callers hand ownership in
/// on push and receive it back on pop.
#[derive(Debug, Default)]
pub struct List(Vec<Value>);

impl List {
    /// Creates an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Creates a list from already-owned elements.
    #[must_use]
    pub fn from_values(values: Vec<Value>) -> Self {
        Self(values)
    }

    /// Returns the elements as a slice.
    #[must_use]
    pub fn as_slice(&self) -> &[Value] {
        &self.0
    }

    /// Consumes the list, returning its elements.
    #[must_use]
    pub fn into_values(self) -> Vec<Value> {
        self.0
    }

    /// Number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Appends an element, taking ownership of its reference.
    pub fn push(&mut self, value: Value) {
        self.0.push(value);
    }

    /// Removes and returns the last element.
    #[must_use]
    pub fn pop(&mut self) -> Option<Value> {
        self.0.pop()
    }

    /// Resolves a possibly-negative index against the current length.
    ///
    /// Negative indices count from the end, as in the surface language.
    pub fn resolve_index(&self, index: i64) -> RunResult<usize> {
        resolve_sequence_index(index, self.0.len(), "list index out of range")
    }

    /// Returns a shared reference to the element at a resolved index.
    #[must_use]
    pub fn get(&self, index: usize) -> &Value {
        &self.0[index]
    }

    /// Replaces the element at a resolved index, returning the old value so
    /// the caller can release its reference.
    #[must_use]
    pub fn replace(&mut self, index: usize, value: Value) -> Value {
        std::mem::replace(&mut self.0[index], value)
    }
}

/// Shared index normalization for lists, strings, and bytes.
pub fn resolve_sequence_index(index: i64, len: usize, message: &str) -> RunResult<usize> {
    let len = i64::try_from(len).map_err(|_| ExcType::internal("sequence length exceeds i64"))?;
    let resolved = if index < 0 { index + len } else { index };
    if resolved < 0 || resolved >= len {
        return Err(ExcType::index_error(message));
    }
    Ok(usize::try_from(resolved).expect("non-negative index"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_indices_count_from_the_end() {
        let list = List::from_values(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        assert_eq!(list.resolve_index(-1).unwrap(), 2);
        assert_eq!(list.resolve_index(0).unwrap(), 0);
        assert!(list.resolve_index(3).is_err());
        assert!(list.resolve_index(-4).is_err());
    }
}
