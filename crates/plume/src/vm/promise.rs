//! Promise settlement, chaining, and the input-event plumbing.
//!
//! Settling a promise never runs a callback inline: each registered handler
//! becomes a microtask. Registering on an already-settled promise also
//! enqueues rather than calling, so callers always observe the microtask
//! discipline.

use crate::{
    event_bus,
    exception::RunResult,
    heap::{HeapData, HeapId},
    types::{NativeClosure, Promise, PromiseState, Registration},
    value::Value,
};

use super::{Vm, event_loop::Task};

impl Vm {
    /// Builds a promise around `executor` and invokes it immediately with
    /// freshly minted `resolve` / `reject` callables. An executor that
    /// errors rejects the promise with the error message.
    pub(crate) fn promise_construct(&mut self, executor: Value) -> RunResult<Value> {
        let stored = executor.clone_with_heap(&self.heap);
        let promise_id = self.heap.allocate(HeapData::Promise(Promise::pending(stored)));

        self.heap.inc_ref(promise_id);
        let resolve = self
            .heap
            .allocate(HeapData::NativeClosure(NativeClosure::PromiseResolve { promise: promise_id }));
        self.heap.inc_ref(promise_id);
        let reject = self
            .heap
            .allocate(HeapData::NativeClosure(NativeClosure::PromiseReject { promise: promise_id }));

        match self.call_value(executor, vec![Value::Ref(resolve), Value::Ref(reject)]) {
            Ok(result) => result.drop_with_heap(&mut self.heap),
            Err(err) => {
                let reason = self.interns.intern(&err.to_string());
                self.reject_promise(promise_id, Value::Str(reason));
            }
        }
        Ok(Value::Ref(promise_id))
    }

    /// Fulfills a pending promise. Idempotent: later transitions are
    /// dropped. Fulfill registrations become microtasks; reject
    /// registrations pass the value through to their downstream promises
    /// without running their handlers.
    pub(crate) fn resolve_promise(&mut self, promise_id: HeapId, value: Value) {
        self.settle(promise_id, value, PromiseState::Fulfilled);
    }

    /// Rejects a pending promise; the mirror image of `resolve_promise`.
    pub(crate) fn reject_promise(&mut self, promise_id: HeapId, reason: Value) {
        self.settle(promise_id, reason, PromiseState::Rejected);
    }

    fn settle(&mut self, promise_id: HeapId, value: Value, target: PromiseState) {
        {
            let HeapData::Promise(promise) = self.heap.get(promise_id) else {
                value.drop_with_heap(&mut self.heap);
                return;
            };
            if promise.state != PromiseState::Pending {
                // Only the first transition out of PENDING takes effect.
                value.drop_with_heap(&mut self.heap);
                return;
            }
        }

        let (run, pass_through) = {
            let HeapData::Promise(promise) = self.heap.get_mut(promise_id) else {
                unreachable!("checked above");
            };
            promise.state = target;
            promise.value = value;
            let fulfilled = std::mem::take(&mut promise.on_fulfilled);
            let rejected = std::mem::take(&mut promise.on_rejected);
            if target == PromiseState::Fulfilled {
                (fulfilled, rejected)
            } else {
                (rejected, fulfilled)
            }
        };

        for Registration { handler, downstream } in run {
            let arg = self.settled_value(promise_id);
            self.event_loop.enqueue_micro(Task::Settle {
                handler,
                arg,
                downstream,
            });
        }
        for Registration { handler, downstream } in pass_through {
            handler.drop_with_heap(&mut self.heap);
            let value = self.settled_value(promise_id);
            match target {
                PromiseState::Fulfilled => self.resolve_promise(downstream, value),
                _ => self.reject_promise(downstream, value),
            }
            self.heap.dec_ref(downstream);
        }
    }

    /// Chains a fulfill handler, returning the downstream promise.
    ///
    /// Pending: register. Already fulfilled: enqueue the handler as a
    /// microtask. Already rejected: reject the downstream directly.
    pub(crate) fn promise_then(&mut self, promise_id: HeapId, handler: Value) -> Value {
        self.chain(promise_id, handler, PromiseState::Fulfilled)
    }

    /// Chains a reject handler; symmetric to `promise_then`.
    pub(crate) fn promise_catch(&mut self, promise_id: HeapId, handler: Value) -> Value {
        self.chain(promise_id, handler, PromiseState::Rejected)
    }

    fn chain(&mut self, promise_id: HeapId, handler: Value, side: PromiseState) -> Value {
        let downstream = self.heap.allocate(HeapData::Promise(Promise::pending(Value::None)));
        let state = {
            let HeapData::Promise(promise) = self.heap.get(promise_id) else {
                handler.drop_with_heap(&mut self.heap);
                return Value::Ref(downstream);
            };
            promise.state
        };

        if state == PromiseState::Pending {
            self.heap.inc_ref(downstream);
            let HeapData::Promise(promise) = self.heap.get_mut(promise_id) else {
                unreachable!("checked above");
            };
            let registration = Registration { handler, downstream };
            if side == PromiseState::Fulfilled {
                promise.on_fulfilled.push(registration);
            } else {
                promise.on_rejected.push(registration);
            }
        } else if state == side {
            // Settled on our side: the handler still runs as a microtask,
            // never inline.
            let arg = self.settled_value(promise_id);
            self.heap.inc_ref(downstream);
            self.event_loop.enqueue_micro(Task::Settle {
                handler,
                arg,
                downstream,
            });
        } else {
            // Settled on the other side: pass the outcome through.
            handler.drop_with_heap(&mut self.heap);
            let value = self.settled_value(promise_id);
            match state {
                PromiseState::Fulfilled => self.resolve_promise(downstream, value),
                _ => self.reject_promise(downstream, value),
            }
        }
        Value::Ref(downstream)
    }

    /// Clones a settled promise's value.
    fn settled_value(&self, promise_id: HeapId) -> Value {
        let HeapData::Promise(promise) = self.heap.get(promise_id) else {
            return Value::None;
        };
        promise.value.clone_with_heap(&self.heap)
    }

    /// Registers a pending promise as the consumer of the next `INPUT`
    /// event. Waiters are served in registration order and removed after
    /// delivery.
    pub(crate) fn register_input_waiter(&mut self, promise_id: HeapId) {
        self.heap.inc_ref(promise_id);
        self.input_waiters.push_back(promise_id);
    }

    /// Drains the bus's input mailbox into waiting promises. Each payload
    /// fulfills the oldest waiter.
    pub(crate) fn pump_input(&mut self) {
        while !self.input_waiters.is_empty() {
            let Some(payload) = event_bus::take_input() else {
                return;
            };
            let waiter = self.input_waiters.pop_front().expect("checked non-empty");
            let text = self.interns.intern(&payload);
            self.resolve_promise(waiter, Value::Str(text));
            self.heap.dec_ref(waiter);
        }
    }
}
