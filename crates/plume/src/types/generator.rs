//! Generators: paused frames resumed by `send`.
//!
//! Calling a function whose code carries the generator flag builds the frame
//! but does not evaluate it; the frame moves into a `Generator` value. Each
//! `send(v)` pushes `v` onto the frame's evaluation stack and evaluates until
//! the next `YIELD_VALUE` (value left on the stack for the driver to pop) or
//! a `RETURN_VALUE` (marks the generator exhausted).

use crate::{heap::HeapId, vm::Frame};

/// A suspended generator.
///
/// The frame is owned exclusively by the generator; it is taken out for the
/// duration of a resumption, which also guards against re-entrant `send`.
#[derive(Debug)]
pub struct Generator {
    /// The paused frame. `None` while the generator is executing.
    pub frame: Option<Frame>,
    /// Set when the frame returned; further resumption yields the
    /// `StopIteration` sentinel.
    pub exhausted: bool,
}

impl Generator {
    /// Wraps a freshly built, unevaluated frame.
    #[must_use]
    pub fn new(frame: Frame) -> Self {
        Self {
            frame: Some(frame),
            exhausted: false,
        }
    }

    /// Appends referenced heap ids for the teardown sweep.
    pub fn collect_children(&self, out: &mut Vec<HeapId>) {
        if let Some(frame) = &self.frame {
            frame.collect_children(out);
        }
    }
}
