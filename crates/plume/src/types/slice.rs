//! Slice objects built by the `BUILD_SLICE` opcode.

use crate::{
    exception::{ExcType, RunResult},
    value::Value,
};

/// A start:stop:step triple. Each bound is `None` or an integer value.
#[derive(Debug)]
pub struct Slice {
    pub start: Value,
    pub stop: Value,
    pub step: Value,
}

/// Concrete iteration bounds resolved against a sequence length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliceBounds {
    pub start: i64,
    pub stop: i64,
    pub step: i64,
}

impl Slice {
    /// Creates a slice, taking ownership of the bound values.
    #[must_use]
    pub fn new(start: Value, stop: Value, step: Value) -> Self {
        Self { start, stop, step }
    }

    /// Resolves the slice against a sequence of the given length, clamping
    /// bounds the way the surface language does.
    pub fn bounds(&self, len: usize) -> RunResult<SliceBounds> {
        let len = i64::try_from(len).map_err(|_| ExcType::internal("sequence length exceeds i64"))?;
        let step = match bound(&self.step)? {
            None => 1,
            Some(0) => return Err(ExcType::value_error("slice step cannot be zero")),
            Some(s) => s,
        };
        let (default_start, default_stop) = if step > 0 { (0, len) } else { (len - 1, -1) };
        let start = clamp(bound(&self.start)?, len, step, default_start);
        let stop = clamp(bound(&self.stop)?, len, step, default_stop);
        Ok(SliceBounds { start, stop, step })
    }
}

fn bound(value: &Value) -> RunResult<Option<i64>> {
    match value {
        Value::None => Ok(None),
        Value::Int(i) => Ok(Some(*i)),
        _ => Err(ExcType::type_error("slice indices must be integers or None")),
    }
}

fn clamp(value: Option<i64>, len: i64, step: i64, default: i64) -> i64 {
    let Some(mut value) = value else {
        return default;
    };
    if value < 0 {
        value += len;
    }
    let (lo, hi) = if step > 0 { (0, len) } else { (-1, len - 1) };
    value.clamp(lo, hi)
}

impl SliceBounds {
    /// Yields the resolved indices in iteration order.
    pub fn indices(self) -> impl Iterator<Item = usize> {
        let SliceBounds { start, stop, step } = self;
        let mut current = start;
        std::iter::from_fn(move || {
            let more = if step > 0 { current < stop } else { current > stop };
            if !more {
                return None;
            }
            let index = usize::try_from(current).expect("clamped index is non-negative");
            current += step;
            Some(index)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bounds(start: Value, stop: Value, step: Value, len: usize) -> Vec<usize> {
        Slice::new(start, stop, step).bounds(len).unwrap().indices().collect()
    }

    #[test]
    fn forward_slice_with_step() {
        assert_eq!(
            bounds(Value::Int(0), Value::Int(5), Value::Int(2), 5),
            vec![0, 2, 4]
        );
    }

    #[test]
    fn open_bounds_cover_the_whole_sequence() {
        assert_eq!(bounds(Value::None, Value::None, Value::None, 3), vec![0, 1, 2]);
    }

    #[test]
    fn negative_step_walks_backwards() {
        assert_eq!(
            bounds(Value::None, Value::None, Value::Int(-1), 3),
            vec![2, 1, 0]
        );
    }

    #[test]
    fn zero_step_is_rejected() {
        let err = Slice::new(Value::None, Value::None, Value::Int(0))
            .bounds(3)
            .unwrap_err();
        assert_eq!(err.exc_type(), crate::exception::ExcType::ValueError);
    }
}
