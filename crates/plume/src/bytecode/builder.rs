//! Builder for assembling code objects.
//!
//! `CodeBuilder` is the interface the (out-of-core) IR emitter targets:
//! emit helpers per opcode, pool interning for constants and names, and
//! forward-jump patching. Tests use it to hand-assemble modules.

use crate::{intern::StringId, value::Value};

use super::{
    code::Code,
    op::{CompareOp, Inst, Opcode, Operand, OperandKind},
};

/// Handle for a jump emitted before its target is known.
#[derive(Debug, Clone, Copy)]
#[must_use]
pub struct JumpLabel(usize);

/// Builder for emitting instructions and assembling the pools.
#[derive(Debug)]
pub struct CodeBuilder {
    name: StringId,
    insts: Vec<Inst>,
    consts: Vec<Value>,
    names: Vec<StringId>,
    varnames: Vec<StringId>,
    is_generator: bool,
}

impl CodeBuilder {
    /// Creates an empty builder for a code object with the given name.
    #[must_use]
    pub fn new(name: StringId) -> Self {
        Self {
            name,
            insts: Vec::new(),
            consts: Vec::new(),
            names: Vec::new(),
            varnames: Vec::new(),
            is_generator: false,
        }
    }

    /// Current instruction position; the target of a backward jump.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.insts.len() as u64
    }

    /// Adds a constant to the pool, reusing an existing slot for equal
    /// immediates. Heap constants always get a fresh slot because the pool
    /// owns their reference.
    pub fn const_index(&mut self, value: Value) -> u64 {
        if !matches!(value, Value::Ref(_)) {
            if let Some(found) = self.consts.iter().position(|c| c.is_identical(&value)) {
                return found as u64;
            }
        }
        self.consts.push(value);
        (self.consts.len() - 1) as u64
    }

    /// Index of `name` in the name pool, appending it when new.
    pub fn name_index(&mut self, name: StringId) -> u64 {
        pool_index(&mut self.names, name)
    }

    /// Index of `name` in the varname pool, appending it when new.
    pub fn varname_index(&mut self, name: StringId) -> u64 {
        pool_index(&mut self.varnames, name)
    }

    /// Emits a no-operand instruction.
    pub fn emit(&mut self, op: Opcode) {
        debug_assert_eq!(op.operand_kind(), OperandKind::None);
        self.insts.push(Inst::new(op, Operand::None));
        if op == Opcode::YieldValue {
            self.is_generator = true;
        }
    }

    /// Emits an instruction with an index operand.
    pub fn emit_index(&mut self, op: Opcode, index: u64) {
        debug_assert_eq!(op.operand_kind(), OperandKind::Index);
        self.insts.push(Inst::new(op, Operand::Index(index)));
    }

    /// Emits `COMPARE_OP` with the given tag.
    pub fn compare_op(&mut self, op: CompareOp) {
        self.insts.push(Inst::new(Opcode::CompareOp, Operand::Compare(op)));
    }

    /// Emits `LOAD_CONST`, pooling the value.
    pub fn load_const(&mut self, value: Value) {
        let index = self.const_index(value);
        self.emit_index(Opcode::LoadConst, index);
    }

    /// Emits `LOAD_NAME`.
    pub fn load_name(&mut self, name: StringId) {
        let index = self.name_index(name);
        self.emit_index(Opcode::LoadName, index);
    }

    /// Emits `STORE_NAME`.
    pub fn store_name(&mut self, name: StringId) {
        let index = self.name_index(name);
        self.emit_index(Opcode::StoreName, index);
    }

    /// Emits `LOAD_GLOBAL`.
    pub fn load_global(&mut self, name: StringId) {
        let index = self.name_index(name);
        self.emit_index(Opcode::LoadGlobal, index);
    }

    /// Emits `STORE_GLOBAL`.
    pub fn store_global(&mut self, name: StringId) {
        let index = self.name_index(name);
        self.emit_index(Opcode::StoreGlobal, index);
    }

    /// Emits `LOAD_ATTR`.
    pub fn load_attr(&mut self, name: StringId) {
        let index = self.name_index(name);
        self.emit_index(Opcode::LoadAttr, index);
    }

    /// Emits `STORE_ATTR`.
    pub fn store_attr(&mut self, name: StringId) {
        let index = self.name_index(name);
        self.emit_index(Opcode::StoreAttr, index);
    }

    /// Emits `LOAD_FAST`, pooling the varname.
    pub fn load_fast(&mut self, name: StringId) {
        let index = self.varname_index(name);
        self.emit_index(Opcode::LoadFast, index);
    }

    /// Emits `STORE_FAST`, pooling the varname.
    pub fn store_fast(&mut self, name: StringId) {
        let index = self.varname_index(name);
        self.emit_index(Opcode::StoreFast, index);
    }

    /// Emits `CALL_FUNCTION` for `argc` arguments.
    pub fn call_function(&mut self, argc: u64) {
        self.emit_index(Opcode::CallFunction, argc);
    }

    /// Emits `BUILD_LIST` assembling `n` stack values.
    pub fn build_list(&mut self, n: u64) {
        self.emit_index(Opcode::BuildList, n);
    }

    /// Emits `BUILD_MAP` assembling `n` key/value pairs.
    pub fn build_map(&mut self, n: u64) {
        self.emit_index(Opcode::BuildMap, n);
    }

    /// Emits `JUMP_ABSOLUTE` to a known target.
    pub fn jump_absolute(&mut self, target: u64) {
        self.emit_index(Opcode::JumpAbsolute, target);
    }

    /// Emits a forward jump with a placeholder operand; patch it with
    /// [`CodeBuilder::patch_jump`] once the target position is reached.
    ///
    /// Accepts `POP_JUMP_IF_FALSE`, `POP_JUMP_IF_TRUE`, `JUMP_FORWARD`,
    /// and `FOR_ITER`.
    pub fn emit_jump(&mut self, op: Opcode) -> JumpLabel {
        let operand = match op.operand_kind() {
            OperandKind::Offset => Operand::Offset(0),
            OperandKind::Index => Operand::Index(0),
            _ => panic!("{op:?} is not a jump"),
        };
        self.insts.push(Inst::new(op, operand));
        JumpLabel(self.insts.len() - 1)
    }

    /// Patches a forward jump to land on the current position.
    ///
    /// All jumps are relative to the jumping instruction's own position,
    /// matching the interpreter's `pc ← pc + delta` semantics.
    pub fn patch_jump(&mut self, label: JumpLabel) {
        let target = self.insts.len();
        let at = label.0;
        let inst = &mut self.insts[at];
        let delta = target - at;
        inst.operand = match inst.op.operand_kind() {
            OperandKind::Offset => Operand::Offset(delta as i64),
            OperandKind::Index => Operand::Index(delta as u64),
            _ => unreachable!("emit_jump only accepts jumps"),
        };
    }

    /// Marks the code as a generator body regardless of emitted opcodes.
    pub fn mark_generator(&mut self) {
        self.is_generator = true;
    }

    /// Finishes the code object. `n_locals` is raised to the varname pool
    /// size so the invariant `varnames.len() <= n_locals` always holds.
    #[must_use]
    pub fn build(self, n_locals: usize) -> Code {
        let n_locals = n_locals.max(self.varnames.len());
        Code::from_instructions(
            self.insts,
            self.consts,
            self.names,
            self.varnames,
            self.name,
            n_locals,
            self.is_generator,
        )
    }
}

fn pool_index(pool: &mut Vec<StringId>, name: StringId) -> u64 {
    if let Some(found) = pool.iter().position(|&n| n == name) {
        return found as u64;
    }
    pool.push(name);
    (pool.len() - 1) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intern::StaticStrings;

    #[test]
    fn immediate_constants_are_pooled_once() {
        let mut builder = CodeBuilder::new(StaticStrings::Module.id());
        let a = builder.const_index(Value::Int(5));
        let b = builder.const_index(Value::Int(5));
        let c = builder.const_index(Value::Int(6));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn patched_jumps_are_relative_to_the_jump_instruction() {
        let mut builder = CodeBuilder::new(StaticStrings::Module.id());
        builder.load_const(Value::Bool(true));
        let jump = builder.emit_jump(Opcode::PopJumpIfFalse);
        builder.load_const(Value::Int(1));
        builder.emit(Opcode::PopTop);
        builder.patch_jump(jump);
        builder.load_const(Value::None);
        builder.emit(Opcode::ReturnValue);
        let code = builder.build(0);
        let insts = code.instructions().unwrap();
        assert_eq!(insts[1].operand, Operand::Offset(3));
    }

    #[test]
    fn yield_marks_the_code_as_a_generator() {
        let mut builder = CodeBuilder::new(StaticStrings::Module.id());
        builder.load_const(Value::Int(1));
        builder.emit(Opcode::YieldValue);
        let code = builder.build(0);
        assert!(code.is_generator);
    }
}
