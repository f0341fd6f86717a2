//! Call frames and the interpreter dispatch loop.
//!
//! A frame is one activation record: code, program counter, evaluation
//! stack, locals and globals dicts, and the fast-locals array. Function
//! frames are evaluated recursively (the native call stack is the caller
//! chain); generator frames live inside their generator value and are
//! re-entered on each `send`.

use crate::{
    bytecode::Opcode,
    event_bus::EventKind,
    exception::{ExcType, RunResult},
    heap::{Heap, HeapData, HeapId},
    intern::StaticStrings,
    value::Value,
};

use super::{Vm, binary::BinOp};

/// A single activation record.
#[derive(Debug)]
pub struct Frame {
    /// Code being executed. The frame owns one reference.
    pub code: HeapId,
    /// 0-based index into the instruction list.
    pub pc: usize,
    /// Evaluation stack.
    pub stack: Vec<Value>,
    /// Fast-local slots, length >= the code's local-slot count.
    pub fast: Vec<Value>,
    /// Locals dict; aliases `globals` for module-entry frames.
    pub locals: HeapId,
    /// Globals dict, shared with the owning function's capture.
    pub globals: HeapId,
}

impl Frame {
    /// Builds a frame. The caller transfers one reference each for `code`,
    /// `locals`, and `globals` (two on the same dict when they alias).
    #[must_use]
    pub fn new(code: HeapId, locals: HeapId, globals: HeapId, fast: Vec<Value>) -> Self {
        Self {
            code,
            pc: 0,
            stack: Vec::new(),
            fast,
            locals,
            globals,
        }
    }

    /// Releases everything the frame owns.
    pub fn dispose(self, heap: &mut Heap) {
        for value in self.stack {
            value.drop_with_heap(heap);
        }
        for value in self.fast {
            value.drop_with_heap(heap);
        }
        heap.dec_ref(self.locals);
        heap.dec_ref(self.globals);
        heap.dec_ref(self.code);
    }

    /// Appends owned heap ids for the teardown sweep (used when a frame is
    /// torn down as part of its generator).
    pub fn collect_children(&self, out: &mut Vec<HeapId>) {
        for value in &self.stack {
            value.collect_child(out);
        }
        for value in &self.fast {
            value.collect_child(out);
        }
        out.push(self.locals);
        out.push(self.globals);
        out.push(self.code);
    }
}

/// How a frame left the dispatch loop.
#[derive(Debug)]
pub enum FrameExit {
    /// `RETURN_VALUE` (or the program counter ran past the last
    /// instruction, which returns `None`).
    Return(Value),
    /// `YIELD_VALUE`; the produced value is left on the frame's stack for
    /// the generator driver to pop.
    Yield,
}

/// Pops the top of a frame stack, failing on underflow. The emitter is
/// responsible for non-negative stack depth; underflow here is a VM bug.
fn pop(stack: &mut Vec<Value>) -> RunResult<Value> {
    stack.pop().ok_or_else(|| ExcType::internal("evaluation stack underflow"))
}

impl Vm {
    /// Evaluates a frame to its next exit, attaching this frame to the
    /// error chain on the way out.
    pub(crate) fn eval_frame(&mut self, frame: &mut Frame) -> RunResult<FrameExit> {
        match self.eval_frame_inner(frame) {
            Ok(exit) => Ok(exit),
            Err(mut err) => {
                let name = match self.heap.get(frame.code) {
                    HeapData::Code(code) => self.interns.get(code.name).to_owned(),
                    _ => "<corrupt frame>".to_owned(),
                };
                err.push_frame(name, frame.pc);
                Err(err)
            }
        }
    }

    fn eval_frame_inner(&mut self, frame: &mut Frame) -> RunResult<FrameExit> {
        loop {
            let inst = {
                let HeapData::Code(code) = self.heap.get(frame.code) else {
                    return Err(ExcType::internal("frame code slot does not hold code"));
                };
                let insts = code.instructions()?;
                match insts.get(frame.pc) {
                    Some(inst) => *inst,
                    None => return Ok(FrameExit::Return(Value::None)),
                }
            };

            if self.verbose {
                self.publish(EventKind::LogDebug, &format!("pc={} {}", frame.pc, inst.op));
            }

            match inst.op {
                Opcode::Nop => frame.pc += 1,
                Opcode::PopTop => {
                    pop(&mut frame.stack)?.drop_with_heap(&mut self.heap);
                    frame.pc += 1;
                }

                Opcode::LoadConst => {
                    let index = inst.operand.index() as usize;
                    let value = {
                        let HeapData::Code(code) = self.heap.get(frame.code) else {
                            unreachable!("checked above");
                        };
                        code.consts
                            .get(index)
                            .ok_or_else(|| ExcType::internal("constant index out of range"))?
                            .clone_with_heap(&self.heap)
                    };
                    frame.stack.push(value);
                    frame.pc += 1;
                }
                Opcode::LoadName => {
                    let name = self.name_at(frame.code, inst.operand.index())?;
                    let key = Value::Str(name);
                    // LEGB: locals, then globals, then builtins.
                    let found = self
                        .heap
                        .get_dict(frame.locals)
                        .get(&key, &self.heap, &self.interns)
                        .or_else(|| {
                            self.heap
                                .get_dict(frame.globals)
                                .get(&key, &self.heap, &self.interns)
                        })
                        .or_else(|| self.builtins.get(&key, &self.heap, &self.interns))
                        .map(|v| v.clone_with_heap(&self.heap));
                    match found {
                        Some(value) => frame.stack.push(value),
                        None => return Err(ExcType::name_error(self.interns.get(name))),
                    }
                    frame.pc += 1;
                }
                Opcode::LoadGlobal => {
                    let name = self.name_at(frame.code, inst.operand.index())?;
                    let key = Value::Str(name);
                    let found = self
                        .heap
                        .get_dict(frame.globals)
                        .get(&key, &self.heap, &self.interns)
                        .or_else(|| self.builtins.get(&key, &self.heap, &self.interns))
                        .map(|v| v.clone_with_heap(&self.heap));
                    match found {
                        Some(value) => frame.stack.push(value),
                        None => return Err(ExcType::name_error(self.interns.get(name))),
                    }
                    frame.pc += 1;
                }
                Opcode::LoadFast => {
                    let index = inst.operand.index() as usize;
                    let value = frame
                        .fast
                        .get(index)
                        .ok_or_else(|| ExcType::internal("fast-local index out of range"))?
                        .clone_with_heap(&self.heap);
                    frame.stack.push(value);
                    frame.pc += 1;
                }
                Opcode::StoreName => {
                    let name = self.name_at(frame.code, inst.operand.index())?;
                    let value = pop(&mut frame.stack)?;
                    self.dict_insert(frame.locals, Value::Str(name), value);
                    frame.pc += 1;
                }
                Opcode::StoreGlobal => {
                    let name = self.name_at(frame.code, inst.operand.index())?;
                    let value = pop(&mut frame.stack)?;
                    self.dict_insert(frame.globals, Value::Str(name), value);
                    frame.pc += 1;
                }
                Opcode::StoreFast => {
                    let index = inst.operand.index() as usize;
                    let value = pop(&mut frame.stack)?;
                    if index >= frame.fast.len() {
                        value.drop_with_heap(&mut self.heap);
                        return Err(ExcType::internal("fast-local index out of range"));
                    }
                    let old = std::mem::replace(&mut frame.fast[index], value);
                    old.drop_with_heap(&mut self.heap);
                    frame.pc += 1;
                }
                Opcode::LoadAttr => {
                    let name = self.name_at(frame.code, inst.operand.index())?;
                    let obj = pop(&mut frame.stack)?;
                    match self.get_attr(&obj, name)? {
                        Some(value) => {
                            obj.drop_with_heap(&mut self.heap);
                            frame.stack.push(value);
                        }
                        None => {
                            let type_name = self.type_name(&obj);
                            let attr = self.interns.get(name).to_owned();
                            obj.drop_with_heap(&mut self.heap);
                            return Err(ExcType::attribute_error(&type_name, &attr));
                        }
                    }
                    frame.pc += 1;
                }
                Opcode::StoreAttr => {
                    let name = self.name_at(frame.code, inst.operand.index())?;
                    let obj = pop(&mut frame.stack)?;
                    let value = pop(&mut frame.stack)?;
                    self.set_attr(obj, name, value)?;
                    frame.pc += 1;
                }
                Opcode::StoreSubscr => {
                    let index = pop(&mut frame.stack)?;
                    let obj = pop(&mut frame.stack)?;
                    let value = pop(&mut frame.stack)?;
                    self.set_item(obj, index, value)?;
                    frame.pc += 1;
                }
                Opcode::BinarySubscr => {
                    let index = pop(&mut frame.stack)?;
                    let obj = pop(&mut frame.stack)?;
                    let value = self.get_item(obj, index)?;
                    frame.stack.push(value);
                    frame.pc += 1;
                }

                Opcode::UnaryPositive | Opcode::UnaryNegative | Opcode::UnaryInvert => {
                    let operand = pop(&mut frame.stack)?;
                    let value = self.unary_op(inst.op, operand)?;
                    frame.stack.push(value);
                    frame.pc += 1;
                }
                Opcode::UnaryNot => {
                    let operand = pop(&mut frame.stack)?;
                    let truthy = self.truthy(&operand)?;
                    operand.drop_with_heap(&mut self.heap);
                    frame.stack.push(Value::Bool(!truthy));
                    frame.pc += 1;
                }

                Opcode::BinaryAdd
                | Opcode::BinarySubtract
                | Opcode::BinaryMultiply
                | Opcode::BinaryMatrixMultiply
                | Opcode::BinaryTrueDivide
                | Opcode::BinaryFloorDivide
                | Opcode::BinaryModulo
                | Opcode::BinaryPower
                | Opcode::BinaryAnd
                | Opcode::BinaryOr
                | Opcode::BinaryXor
                | Opcode::BinaryLshift
                | Opcode::BinaryRshift => {
                    let rhs = pop(&mut frame.stack)?;
                    let lhs = pop(&mut frame.stack)?;
                    let value = self.binary_op(BinOp::from_opcode(inst.op), lhs, rhs)?;
                    frame.stack.push(value);
                    frame.pc += 1;
                }
                Opcode::CompareOp => {
                    let rhs = pop(&mut frame.stack)?;
                    let lhs = pop(&mut frame.stack)?;
                    let value = self.compare(inst.operand.compare(), lhs, rhs)?;
                    frame.stack.push(value);
                    frame.pc += 1;
                }

                Opcode::BuildList => {
                    let count = inst.operand.index() as usize;
                    if frame.stack.len() < count {
                        return Err(ExcType::internal("evaluation stack underflow"));
                    }
                    let values = frame.stack.split_off(frame.stack.len() - count);
                    let list = crate::types::List::from_values(values);
                    let id = self.heap.allocate(HeapData::List(list));
                    frame.stack.push(Value::Ref(id));
                    frame.pc += 1;
                }
                Opcode::BuildMap => {
                    let count = inst.operand.index() as usize;
                    if frame.stack.len() < count * 2 {
                        return Err(ExcType::internal("evaluation stack underflow"));
                    }
                    let mut flat = frame.stack.split_off(frame.stack.len() - count * 2);
                    let mut dict = crate::types::Dict::new();
                    let mut pairs = flat.drain(..);
                    while let (Some(key), Some(value)) = (pairs.next(), pairs.next()) {
                        dict.insert(key, value, &mut self.heap, &self.interns);
                    }
                    drop(pairs);
                    let id = self.heap.allocate(HeapData::Dict(dict));
                    frame.stack.push(Value::Ref(id));
                    frame.pc += 1;
                }
                Opcode::BuildSlice => {
                    let step = pop(&mut frame.stack)?;
                    let stop = pop(&mut frame.stack)?;
                    let start = pop(&mut frame.stack)?;
                    let slice = crate::types::Slice::new(start, stop, step);
                    let id = self.heap.allocate(HeapData::Slice(slice));
                    frame.stack.push(Value::Ref(id));
                    frame.pc += 1;
                }

                Opcode::PopJumpIfFalse | Opcode::PopJumpIfTrue => {
                    let condition = pop(&mut frame.stack)?;
                    let truthy = self.truthy(&condition)?;
                    condition.drop_with_heap(&mut self.heap);
                    let wanted = inst.op == Opcode::PopJumpIfTrue;
                    if truthy == wanted {
                        jump_relative(&mut frame.pc, inst.operand.offset())?;
                    } else {
                        frame.pc += 1;
                    }
                }
                Opcode::JumpAbsolute => {
                    frame.pc = inst.operand.index() as usize;
                }
                Opcode::JumpForward => {
                    frame.pc += inst.operand.index() as usize;
                }

                Opcode::GetIter => {
                    let value = pop(&mut frame.stack)?;
                    let iter = self.get_iter(value)?;
                    frame.stack.push(iter);
                    frame.pc += 1;
                }
                Opcode::ForIter => {
                    let peeked = frame
                        .stack
                        .last()
                        .ok_or_else(|| ExcType::internal("FOR_ITER on empty stack"))?
                        .shallow_copy();
                    let next = self.iter_next_value(&peeked)?;
                    if matches!(next, Value::StopIteration) {
                        let iterator = pop(&mut frame.stack)?;
                        iterator.drop_with_heap(&mut self.heap);
                        frame.pc += inst.operand.index() as usize;
                    } else {
                        frame.stack.push(next);
                        frame.pc += 1;
                    }
                }

                Opcode::MakeFunction => {
                    let name = pop(&mut frame.stack)?;
                    let code = pop(&mut frame.stack)?;
                    let function_name = match &name {
                        Value::Str(id) => *id,
                        _ => {
                            name.drop_with_heap(&mut self.heap);
                            code.drop_with_heap(&mut self.heap);
                            return Err(ExcType::type_error("function name must be a string"));
                        }
                    };
                    let code_id = match &code {
                        Value::Ref(id) if matches!(self.heap.get(*id), HeapData::Code(_)) => *id,
                        _ => {
                            code.drop_with_heap(&mut self.heap);
                            return Err(ExcType::type_error("function code must be a code object"));
                        }
                    };
                    // The popped code reference transfers into the function.
                    self.heap.inc_ref(frame.globals);
                    let function = crate::types::Function {
                        code: code_id,
                        globals: frame.globals,
                        name: function_name,
                    };
                    let id = self.heap.allocate(HeapData::Function(function));
                    frame.stack.push(Value::Ref(id));
                    frame.pc += 1;
                }
                Opcode::CallFunction => {
                    let argc = inst.operand.index() as usize;
                    if frame.stack.len() < argc + 1 {
                        return Err(ExcType::internal("evaluation stack underflow"));
                    }
                    let args = frame.stack.split_off(frame.stack.len() - argc);
                    let callable = pop(&mut frame.stack)?;
                    let result = self.call_value(callable, args)?;
                    frame.stack.push(result);
                    frame.pc += 1;
                }
                Opcode::LoadBuildClass => {
                    let key = Value::Str(StaticStrings::DunderBuildClass.id());
                    let value = self
                        .builtins
                        .get(&key, &self.heap, &self.interns)
                        .map(|v| v.clone_with_heap(&self.heap))
                        .ok_or_else(|| ExcType::internal("__build_class__ missing from builtins"))?;
                    frame.stack.push(value);
                    frame.pc += 1;
                }

                Opcode::ReturnValue => {
                    let value = pop(&mut frame.stack)?;
                    return Ok(FrameExit::Return(value));
                }
                Opcode::YieldValue => {
                    frame.pc += 1;
                    return Ok(FrameExit::Yield);
                }
            }
        }
    }

    /// Reads `names[index]` from a frame's code object.
    pub(crate) fn name_at(&self, code_id: HeapId, index: u64) -> RunResult<crate::intern::StringId> {
        let HeapData::Code(code) = self.heap.get(code_id) else {
            return Err(ExcType::internal("frame code slot does not hold code"));
        };
        code.names
            .get(index as usize)
            .copied()
            .ok_or_else(|| ExcType::internal("name index out of range"))
    }
}

fn jump_relative(pc: &mut usize, offset: i64) -> RunResult<()> {
    let target = i64::try_from(*pc)
        .ok()
        .and_then(|pc| pc.checked_add(offset))
        .ok_or_else(|| ExcType::internal("jump overflows the program counter"))?;
    *pc = usize::try_from(target).map_err(|_| ExcType::internal("jump to a negative program counter"))?;
    Ok(())
}
