//! Callable dispatch: native functions, user functions, bound methods,
//! classes, and generator resumption.
//!
//! A value is callable iff it is a native function, a user function, a
//! bound method, or a type; anything else fails with `TypeError`.

use crate::{
    builtins,
    exception::{ExcType, RunResult},
    heap::{HeapData, HeapId},
    intern::StaticStrings,
    types::{Dict, Generator, Instance, NativeClosure, linearize},
    value::{Type, Value},
};

use super::{
    Vm,
    frame::{Frame, FrameExit},
};

impl Vm {
    /// Invokes `callable` with `args`, consuming both.
    pub fn call_value(&mut self, callable: Value, args: Vec<Value>) -> RunResult<Value> {
        match &callable {
            Value::Builtin(builtin) => {
                let builtin = *builtin;
                builtins::call_builtin(self, builtin, args)
            }
            Value::Ref(id) => {
                let id = *id;
                match self.heap.get(id) {
                    HeapData::Function(_) => self.call_function(callable, id, args),
                    HeapData::Method(method) => {
                        let owner = method.owner.clone_with_heap(&self.heap);
                        let func = method.func.clone_with_heap(&self.heap);
                        callable.drop_with_heap(&mut self.heap);
                        let mut full_args = Vec::with_capacity(args.len() + 1);
                        full_args.push(owner);
                        full_args.extend(args);
                        self.call_value(func, full_args)
                    }
                    HeapData::NativeClosure(closure) => {
                        let closure = match closure {
                            NativeClosure::PromiseResolve { promise } => (true, *promise),
                            NativeClosure::PromiseReject { promise } => (false, *promise),
                        };
                        callable.drop_with_heap(&mut self.heap);
                        let mut args = args.into_iter();
                        let payload = args.next().unwrap_or(Value::None);
                        for extra in args {
                            extra.drop_with_heap(&mut self.heap);
                        }
                        let (is_resolve, promise) = closure;
                        if is_resolve {
                            self.resolve_promise(promise, payload);
                        } else {
                            self.reject_promise(promise, payload);
                        }
                        Ok(Value::None)
                    }
                    HeapData::Class(_) => self.instantiate(callable, id, args),
                    _ => {
                        let message = format!("'{}' object is not callable", self.type_name(&callable));
                        callable.drop_with_heap(&mut self.heap);
                        for arg in args {
                            arg.drop_with_heap(&mut self.heap);
                        }
                        Err(ExcType::type_error(message))
                    }
                }
            }
            _ => {
                let message = format!("'{}' object is not callable", self.type_name(&callable));
                callable.drop_with_heap(&mut self.heap);
                for arg in args {
                    arg.drop_with_heap(&mut self.heap);
                }
                Err(ExcType::type_error(message))
            }
        }
    }

    /// Calls a user function: a fresh frame with the arguments as fast
    /// locals padded with `None` to the local-slot count. Generator-flagged
    /// code returns a generator value without evaluating.
    fn call_function(&mut self, callable: Value, function_id: HeapId, args: Vec<Value>) -> RunResult<Value> {
        let (code_id, globals_id) = {
            let HeapData::Function(function) = self.heap.get(function_id) else {
                unreachable!("caller matched a function");
            };
            (function.code, function.globals)
        };
        let (n_locals, is_generator) = {
            let HeapData::Code(code) = self.heap.get(code_id) else {
                callable.drop_with_heap(&mut self.heap);
                for arg in args {
                    arg.drop_with_heap(&mut self.heap);
                }
                return Err(ExcType::internal("function code slot does not hold code"));
            };
            (code.n_locals, code.is_generator)
        };

        self.heap.inc_ref(code_id);
        self.heap.inc_ref(globals_id);
        callable.drop_with_heap(&mut self.heap);

        let mut fast = args;
        while fast.len() < n_locals {
            fast.push(Value::None);
        }
        let locals_id = self.heap.allocate(HeapData::Dict(Dict::new()));
        let mut frame = Frame::new(code_id, locals_id, globals_id, fast);

        if is_generator {
            let id = self.heap.allocate(HeapData::Generator(Generator::new(frame)));
            return Ok(Value::Ref(id));
        }

        let result = self.eval_frame(&mut frame);
        let exit = match result {
            Ok(exit) => exit,
            Err(err) => {
                frame.dispose(&mut self.heap);
                return Err(err);
            }
        };
        match exit {
            FrameExit::Return(value) => {
                frame.dispose(&mut self.heap);
                Ok(value)
            }
            FrameExit::Yield => {
                frame.dispose(&mut self.heap);
                Err(ExcType::internal("yield outside a generator frame"))
            }
        }
    }

    /// Calls a class: native classes construct directly (only `Promise`
    /// exposes a constructor), user classes allocate a bare instance and
    /// invoke `__init__` when defined.
    fn instantiate(&mut self, callable: Value, class_id: HeapId, mut args: Vec<Value>) -> RunResult<Value> {
        let native = {
            let HeapData::Class(class) = self.heap.get(class_id) else {
                unreachable!("caller matched a class");
            };
            class.native
        };
        callable.drop_with_heap(&mut self.heap);

        if let Some(kind) = native {
            if kind == Type::Promise {
                if args.len() != 1 {
                    for arg in args {
                        arg.drop_with_heap(&mut self.heap);
                    }
                    return Err(ExcType::type_error("Promise constructor requires one argument"));
                }
                let executor = args.pop().expect("length checked");
                return self.promise_construct(executor);
            }
            let message = format!("cannot instantiate native class '{}'", kind.name());
            for arg in args {
                arg.drop_with_heap(&mut self.heap);
            }
            return Err(ExcType::type_error(message));
        }

        self.heap.inc_ref(class_id);
        let instance_id = self.heap.allocate(HeapData::Instance(Instance::new(class_id)));
        let instance = Value::Ref(instance_id);

        match self.get_attr(&instance, StaticStrings::DunderInit.id())? {
            Some(init) => {
                let result = self.call_value(init, args)?;
                result.drop_with_heap(&mut self.heap);
            }
            None => {
                if !args.is_empty() {
                    let name = {
                        let HeapData::Class(class) = self.heap.get(class_id) else {
                            unreachable!("checked above");
                        };
                        self.interns.get(class.name).to_owned()
                    };
                    for arg in args {
                        arg.drop_with_heap(&mut self.heap);
                    }
                    instance.drop_with_heap(&mut self.heap);
                    return Err(ExcType::type_error(format!("{name}() takes no arguments")));
                }
            }
        }
        Ok(instance)
    }

    /// `__build_class__(body, name, bases)`: runs the class body in a
    /// fresh locals dict, turns that dict into the attribute table, and
    /// links the MRO. The class descriptor is pinned for process life.
    pub(crate) fn build_class(&mut self, body: Value, name: Value, bases: Value) -> RunResult<Value> {
        let class_name = match &name {
            Value::Str(id) => *id,
            _ => {
                body.drop_with_heap(&mut self.heap);
                name.drop_with_heap(&mut self.heap);
                bases.drop_with_heap(&mut self.heap);
                return Err(ExcType::type_error("class name must be a string"));
            }
        };

        // Collect base class ids out of the bases list; validation happens
        // under a shared borrow, releasing on error happens after.
        let base_ids: Option<Vec<HeapId>> = match &bases {
            Value::Ref(id) => match self.heap.get(*id) {
                HeapData::List(list) => {
                    let mut ids = Vec::with_capacity(list.len());
                    let mut all_classes = true;
                    for base in list.as_slice() {
                        match base {
                            Value::Ref(bid) if matches!(self.heap.get(*bid), HeapData::Class(_)) => {
                                ids.push(*bid);
                            }
                            _ => {
                                all_classes = false;
                                break;
                            }
                        }
                    }
                    all_classes.then_some(ids)
                }
                _ => None,
            },
            _ => None,
        };
        let Some(base_ids) = base_ids else {
            body.drop_with_heap(&mut self.heap);
            bases.drop_with_heap(&mut self.heap);
            return Err(ExcType::type_error("bases must be a list of classes"));
        };

        // Run the class body with a fresh locals dict; its bindings become
        // the class attribute table.
        let (code_id, globals_id) = match &body {
            Value::Ref(id) => match self.heap.get(*id) {
                HeapData::Function(function) => (function.code, function.globals),
                _ => {
                    body.drop_with_heap(&mut self.heap);
                    bases.drop_with_heap(&mut self.heap);
                    return Err(ExcType::type_error("class body must be a function"));
                }
            },
            _ => {
                body.drop_with_heap(&mut self.heap);
                bases.drop_with_heap(&mut self.heap);
                return Err(ExcType::type_error("class body must be a function"));
            }
        };

        let n_locals = {
            let HeapData::Code(code) = self.heap.get(code_id) else {
                body.drop_with_heap(&mut self.heap);
                bases.drop_with_heap(&mut self.heap);
                return Err(ExcType::internal("class body code slot does not hold code"));
            };
            code.n_locals
        };
        self.heap.inc_ref(code_id);
        self.heap.inc_ref(globals_id);
        let locals_id = self.heap.allocate(HeapData::Dict(Dict::new()));
        self.heap.inc_ref(locals_id);
        let fast = (0..n_locals).map(|_| Value::None).collect();
        let mut frame = Frame::new(code_id, locals_id, globals_id, fast);

        let result = self.eval_frame(&mut frame);
        match result {
            Ok(FrameExit::Return(value)) => value.drop_with_heap(&mut self.heap),
            Ok(FrameExit::Yield) => {
                frame.dispose(&mut self.heap);
                self.heap.dec_ref(locals_id);
                body.drop_with_heap(&mut self.heap);
                bases.drop_with_heap(&mut self.heap);
                return Err(ExcType::internal("class body yielded"));
            }
            Err(err) => {
                frame.dispose(&mut self.heap);
                self.heap.dec_ref(locals_id);
                body.drop_with_heap(&mut self.heap);
                bases.drop_with_heap(&mut self.heap);
                return Err(err);
            }
        }
        frame.dispose(&mut self.heap);

        let attrs = self.heap.take_dict(locals_id);
        self.heap.dec_ref(locals_id);

        // Each base and MRO entry holds a counted reference; classes are
        // pinned so these cycles never unwind.
        for &base in &base_ids {
            self.heap.inc_ref(base);
        }
        let class = crate::types::ClassObject {
            name: class_name,
            attrs,
            bases: base_ids.clone(),
            mro: Vec::new(),
            native: None,
        };
        let class_id = self.heap.allocate(HeapData::Class(class));
        self.heap.pin(class_id);

        let object_id = self.class_id(Type::Object);
        let mro = linearize(&self.heap, class_id, &base_ids, object_id)?;
        for &entry in &mro {
            self.heap.inc_ref(entry);
        }
        {
            let HeapData::Class(class) = self.heap.get_mut(class_id) else {
                unreachable!("just allocated");
            };
            class.mro = mro;
        }

        // __name__ / __class__ round out the descriptor the way native
        // classes are configured at genesis.
        self.class_attr_insert(class_id, StaticStrings::DunderName.id(), Value::Str(class_name));
        self.heap.inc_ref(class_id);
        self.class_attr_insert(class_id, StaticStrings::DunderClass.id(), Value::Ref(class_id));

        body.drop_with_heap(&mut self.heap);
        bases.drop_with_heap(&mut self.heap);
        Ok(Value::Ref(class_id))
    }

    /// Resumes a generator with `sent` pushed onto its frame stack.
    ///
    /// Yields return the produced value; a return (or falling off the end)
    /// marks the generator exhausted and yields the sentinel. Re-entrant
    /// resumption while the frame is checked out is an error.
    pub(crate) fn gen_send(&mut self, generator_id: HeapId, sent: Value) -> RunResult<Value> {
        enum State {
            Exhausted,
            Running,
            Ready(Frame),
        }

        let state = {
            let HeapData::Generator(generator) = self.heap.get_mut(generator_id) else {
                sent.drop_with_heap(&mut self.heap);
                return Err(ExcType::internal("send on a non-generator"));
            };
            if generator.exhausted {
                State::Exhausted
            } else {
                match generator.frame.take() {
                    Some(frame) => State::Ready(frame),
                    None => State::Running,
                }
            }
        };

        match state {
            State::Exhausted => {
                sent.drop_with_heap(&mut self.heap);
                Ok(Value::StopIteration)
            }
            State::Running => {
                sent.drop_with_heap(&mut self.heap);
                Err(ExcType::value_error("generator already executing"))
            }
            State::Ready(mut frame) => {
                frame.stack.push(sent);
                let result = self.eval_frame(&mut frame);
                match result {
                    Ok(FrameExit::Yield) => {
                        let value = frame
                            .stack
                            .pop()
                            .ok_or_else(|| ExcType::internal("yield left no value on the stack"))?;
                        let HeapData::Generator(generator) = self.heap.get_mut(generator_id) else {
                            unreachable!("checked above");
                        };
                        generator.frame = Some(frame);
                        Ok(value)
                    }
                    Ok(FrameExit::Return(value)) => {
                        value.drop_with_heap(&mut self.heap);
                        frame.dispose(&mut self.heap);
                        let HeapData::Generator(generator) = self.heap.get_mut(generator_id) else {
                            unreachable!("checked above");
                        };
                        generator.exhausted = true;
                        Ok(Value::StopIteration)
                    }
                    Err(err) => {
                        frame.dispose(&mut self.heap);
                        let HeapData::Generator(generator) = self.heap.get_mut(generator_id) else {
                            unreachable!("checked above");
                        };
                        generator.exhausted = true;
                        Err(err)
                    }
                }
            }
        }
    }
}
