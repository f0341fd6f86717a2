//! User functions and the capturing native callables.

use crate::{
    heap::HeapId,
    intern::StringId,
};

/// A user-defined function: a code object plus the globals mapping captured
/// at `MAKE_FUNCTION` time.
#[derive(Debug)]
pub struct Function {
    pub code: HeapId,
    pub globals: HeapId,
    pub name: StringId,
}

impl Function {
    pub fn collect_children(&self, out: &mut Vec<HeapId>) {
        out.push(self.code);
        out.push(self.globals);
    }
}

/// Native callables that capture runtime state.
///
/// The promise machinery hands `resolve` / `reject` callables to executors;
/// each is a defunctionalized closure over the promise it settles. Both are
/// idempotent: only the first call out of the pending state takes effect.
#[derive(Debug)]
pub enum NativeClosure {
    /// The `resolve` callable of a promise executor.
    PromiseResolve { promise: HeapId },
    /// The `reject` callable of a promise executor.
    PromiseReject { promise: HeapId },
}

impl NativeClosure {
    pub fn collect_children(&self, out: &mut Vec<HeapId>) {
        match self {
            Self::PromiseResolve { promise } | Self::PromiseReject { promise } => out.push(*promise),
        }
    }
}
