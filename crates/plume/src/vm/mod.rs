//! The virtual machine: heap, interns, class registry, builtins, and the
//! event loop, with the dispatch machinery split across submodules.
//!
//! # Module structure
//!
//! - `frame` - call frames and the instruction dispatch loop
//! - `attr` - attribute lookup, method binding, assignment
//! - `binary` - operators, comparisons, subscripts, iteration
//! - `call` - callable dispatch, class building, generator resumption
//! - `promise` - promise settlement and chaining
//! - `event_loop` - the microtask/macrotask scheduler
//! - `format` - str/repr rendering

mod attr;
mod binary;
mod call;
mod event_loop;
mod format;
mod frame;
mod promise;

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use ahash::AHashMap;

pub use event_loop::{EventLoop, LoopState, Task};
pub use frame::{Frame, FrameExit};

use crate::{
    bytecode::Code,
    event_bus::{self, EventKind},
    exception::{ExcType, RunResult},
    heap::{Heap, HeapData, HeapId},
    intern::{Interns, StaticStrings},
    types::Dict,
    value::{Type, Value},
};

/// Captured log lines when a sink is installed with [`Vm::collect_logs`].
pub type LogSink = Arc<Mutex<Vec<(EventKind, String)>>>;

/// The interpreter. Owns every runtime structure; user code runs on the
/// thread that owns the `Vm`.
pub struct Vm {
    /// The value arena.
    pub heap: Heap,
    /// The string intern table.
    pub interns: Interns,
    /// Native class registry: one pinned class object per native kind.
    pub(crate) classes: AHashMap<Type, HeapId>,
    /// The builtins table, consulted after globals in name lookup.
    pub(crate) builtins: Dict,
    /// The cooperative scheduler.
    pub(crate) event_loop: EventLoop,
    /// Promises waiting on the next `INPUT` event, oldest first.
    pub(crate) input_waiters: VecDeque<HeapId>,
    /// Optional in-process capture of published log events.
    log_sink: Option<LogSink>,
    /// Per-instruction `LOG_DEBUG` traces.
    pub(crate) verbose: bool,
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

impl Vm {
    /// Creates a VM with native classes and the builtins table installed.
    #[must_use]
    pub fn new() -> Self {
        let mut vm = Self {
            heap: Heap::new(),
            interns: Interns::new(),
            classes: AHashMap::new(),
            builtins: Dict::new(),
            event_loop: EventLoop::default(),
            input_waiters: VecDeque::new(),
            log_sink: None,
            verbose: false,
        };
        crate::genesis::bootstrap(&mut vm);
        vm
    }

    /// Enables per-instruction `LOG_DEBUG` traces.
    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    /// Installs and returns an in-process log sink. Every event this VM
    /// publishes is appended to it, in addition to reaching the global bus.
    pub fn collect_logs(&mut self) -> LogSink {
        let sink: LogSink = Arc::default();
        self.log_sink = Some(Arc::clone(&sink));
        sink
    }

    /// Publishes an event on behalf of this VM: the installed sink (if
    /// any) sees it, then the global bus.
    pub fn publish(&self, kind: EventKind, data: &str) {
        if let Some(sink) = &self.log_sink {
            sink.lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .push((kind, data.to_owned()));
        }
        event_bus::publish(kind, data);
    }

    /// The pinned class object for a native kind.
    #[must_use]
    pub fn class_id(&self, kind: Type) -> HeapId {
        *self.classes.get(&kind).expect("genesis registered every native class")
    }

    /// The class a value is an instance of.
    #[must_use]
    pub fn class_of(&self, value: &Value) -> HeapId {
        if let Value::Ref(id) = value {
            match self.heap.get(*id) {
                HeapData::Instance(instance) => return instance.class,
                HeapData::Class(_) => return self.class_id(Type::Type),
                _ => {}
            }
        }
        self.class_id(value.py_type(&self.heap))
    }

    /// The display name of a value's class.
    #[must_use]
    pub fn type_name(&self, value: &Value) -> String {
        if value.is_instance(&self.heap) {
            let class_id = self.class_of(value);
            if let HeapData::Class(class) = self.heap.get(class_id) {
                return self.interns.get(class.name).to_owned();
            }
        }
        value.py_type(&self.heap).name().to_owned()
    }

    /// Inserts into a heap-resident dict, working around the arena borrow
    /// by temporarily taking the dict out of its slot.
    pub(crate) fn dict_insert(&mut self, dict_id: HeapId, key: Value, value: Value) {
        let mut dict = self.heap.take_dict(dict_id);
        dict.insert(key, value, &mut self.heap, &self.interns);
        self.heap.put_dict(dict_id, dict);
    }

    /// Interns a string and returns it as a value.
    pub fn str_value(&mut self, text: &str) -> Value {
        Value::Str(self.interns.intern(text))
    }

    /// Moves a code object into the heap, returning its handle.
    pub fn register_code(&mut self, code: Code) -> HeapId {
        self.heap.allocate(HeapData::Code(code))
    }

    /// Looks up a builtin by name, mostly for tests and embedding glue.
    pub fn builtin_value(&mut self, name: &str) -> Option<Value> {
        let key = Value::Str(self.interns.intern(name));
        self.builtins
            .get(&key, &self.heap, &self.interns)
            .map(|v| v.clone_with_heap(&self.heap))
    }

    /// Runs a root code object as a module: builds the module-entry frame
    /// (locals aliasing globals, `__name__` bound to `__main__`), evaluates
    /// it, then drains the event loop to idle.
    ///
    /// The caller keeps its reference to `code_id`.
    pub fn run_code(&mut self, code_id: HeapId) -> RunResult<()> {
        let n_locals = {
            let HeapData::Code(code) = self.heap.get(code_id) else {
                return Err(ExcType::internal("run_code expects a code handle"));
            };
            code.n_locals
        };

        let globals_id = self.heap.allocate(HeapData::Dict(Dict::new()));
        self.dict_insert(
            globals_id,
            Value::Str(StaticStrings::DunderName.id()),
            Value::Str(StaticStrings::DunderMain.id()),
        );

        // Module frames alias locals and globals.
        self.heap.inc_ref(globals_id);
        self.heap.inc_ref(code_id);
        let fast = (0..n_locals).map(|_| Value::None).collect();
        let mut module_frame = Frame::new(code_id, globals_id, globals_id, fast);

        let result = self.eval_frame(&mut module_frame);
        let outcome = match result {
            Ok(FrameExit::Return(value)) => {
                value.drop_with_heap(&mut self.heap);
                Ok(())
            }
            Ok(FrameExit::Yield) => Err(ExcType::internal("module code yielded")),
            Err(err) => Err(err),
        };
        module_frame.dispose(&mut self.heap);
        outcome?;

        self.run_event_loop();
        Ok(())
    }
}
