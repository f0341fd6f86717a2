//! Promise state.
//!
//! A promise is PENDING until its `resolve` or `reject` callable fires;
//! the first transition wins and the state is immutable afterwards.
//! Settlement never runs callbacks inline: each registered handler is
//! enqueued on the event loop's microtask queue (see `event_loop`).

use crate::{heap::HeapId, value::Value};

/// Promise lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromiseState {
    Pending,
    Fulfilled,
    Rejected,
}

/// One `then`/`catch` registration: the user handler and the downstream
/// promise its outcome settles.
#[derive(Debug)]
pub struct Registration {
    pub handler: Value,
    pub downstream: HeapId,
}

/// A promise value.
#[derive(Debug)]
pub struct Promise {
    pub state: PromiseState,
    /// The fulfilled value or the rejection reason; `None` while pending.
    pub value: Value,
    /// Fulfill-side registrations, run in registration order.
    pub on_fulfilled: Vec<Registration>,
    /// Reject-side registrations, run in registration order.
    pub on_rejected: Vec<Registration>,
    /// The original executor, kept for introspection.
    pub executor: Value,
}

impl Promise {
    /// Creates a pending promise for the given executor.
    #[must_use]
    pub fn pending(executor: Value) -> Self {
        Self {
            state: PromiseState::Pending,
            value: Value::None,
            on_fulfilled: Vec::new(),
            on_rejected: Vec::new(),
            executor,
        }
    }

    /// Creates a promise already settled in the given state.
    #[must_use]
    pub fn settled(state: PromiseState, value: Value) -> Self {
        Self {
            state,
            value,
            on_fulfilled: Vec::new(),
            on_rejected: Vec::new(),
            executor: Value::None,
        }
    }

    /// Appends referenced heap ids for the teardown sweep.
    pub fn collect_children(&self, out: &mut Vec<HeapId>) {
        self.value.collect_child(out);
        self.executor.collect_child(out);
        for registration in self.on_fulfilled.iter().chain(&self.on_rejected) {
            registration.handler.collect_child(out);
            out.push(registration.downstream);
        }
    }
}
