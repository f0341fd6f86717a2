//! The cooperative event loop: microtask and macrotask queues.
//!
//! One outer iteration drains the microtask queue completely, then consumes
//! at most one macrotask. When both queues are empty the loop stops, unless
//! input waiters exist, in which case it blocks for the next `INPUT` publish
//! from the host. Errors escaping a task are published to `LOG_ERROR` and
//! the loop continues with the next task.

use std::collections::VecDeque;

use crate::{
    event_bus::{self, EventKind},
    heap::HeapId,
    value::Value,
};

use super::Vm;

/// Loop lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoopState {
    /// Not running; enqueueing transitions back to running.
    #[default]
    Stopped,
    /// Processing tasks.
    Running,
}

/// A queued unit of work.
#[derive(Debug)]
pub enum Task {
    /// Invoke a callable. Host-enqueued tasks carry no arguments; the
    /// argument list exists for internal reuse.
    Invoke { callable: Value, args: Vec<Value> },
    /// Run a settled promise's handler with the settlement value, then
    /// settle the downstream promise with the outcome.
    Settle {
        handler: Value,
        arg: Value,
        downstream: HeapId,
    },
}

/// FIFO queues plus the lifecycle flag.
#[derive(Debug, Default)]
pub struct EventLoop {
    micro: VecDeque<Task>,
    macro_queue: VecDeque<Task>,
    state: LoopState,
}

impl EventLoop {
    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> LoopState {
        self.state
    }

    /// True when both queues are empty.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.micro.is_empty() && self.macro_queue.is_empty()
    }

    /// Appends a microtask; marks the loop runnable.
    pub(crate) fn enqueue_micro(&mut self, task: Task) {
        self.micro.push_back(task);
        self.state = LoopState::Running;
    }

    /// Appends a macrotask; marks the loop runnable.
    pub(crate) fn enqueue_macro(&mut self, task: Task) {
        self.macro_queue.push_back(task);
        self.state = LoopState::Running;
    }

    fn pop_micro(&mut self) -> Option<Task> {
        self.micro.pop_front()
    }

    fn pop_macro(&mut self) -> Option<Task> {
        self.macro_queue.pop_front()
    }
}

impl Vm {
    /// Runs the loop to idle: drain microtasks, then one macrotask per
    /// outer iteration. Blocks for host input while waiters exist.
    pub fn run_event_loop(&mut self) {
        self.event_loop.state = LoopState::Running;
        loop {
            self.pump_input();
            while let Some(task) = self.event_loop.pop_micro() {
                self.run_task(task);
            }
            if let Some(task) = self.event_loop.pop_macro() {
                self.run_task(task);
                continue;
            }
            if !self.event_loop.is_idle() {
                continue;
            }
            if self.input_waiters.is_empty() {
                break;
            }
            // Input promises are outstanding: park until the host publishes
            // the next INPUT event or closes the stream.
            if !event_bus::wait_for_input() {
                while let Some(waiter) = self.input_waiters.pop_front() {
                    self.heap.dec_ref(waiter);
                }
                break;
            }
        }
        self.event_loop.state = LoopState::Stopped;
    }

    /// Enqueues a macrotask. A stopped loop transitions back to runnable;
    /// the owning driver resumes it with [`Vm::run_event_loop`].
    pub fn enqueue_task(&mut self, callable: Value, args: Vec<Value>) {
        self.event_loop.enqueue_macro(Task::Invoke { callable, args });
    }

    /// Enqueues a microtask; the counterpart of [`Vm::enqueue_task`].
    pub fn enqueue_microtask(&mut self, callable: Value, args: Vec<Value>) {
        self.event_loop.enqueue_micro(Task::Invoke { callable, args });
    }

    fn run_task(&mut self, task: Task) {
        match task {
            Task::Invoke { callable, args } => match self.call_value(callable, args) {
                Ok(result) => result.drop_with_heap(&mut self.heap),
                Err(err) => self.publish(EventKind::LogError, &err.render()),
            },
            Task::Settle {
                handler,
                arg,
                downstream,
            } => {
                // Handler errors reject the downstream promise with the
                // message instead of reaching the loop.
                match self.call_value(handler, vec![arg]) {
                    Ok(result) => self.resolve_promise(downstream, result),
                    Err(err) => {
                        let reason = self.interns.intern(&err.to_string());
                        self.reject_promise(downstream, Value::Str(reason));
                    }
                }
                self.heap.dec_ref(downstream);
            }
        }
    }
}
