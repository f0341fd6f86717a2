//! Bytecode representation: opcodes, code objects, and the builder the
//! emitter targets.

pub use builder::{CodeBuilder, JumpLabel};
pub use code::{Code, Scope, code_eq, decode_instruction_stream, encode_instruction_stream};
pub use op::{CompareOp, Inst, Opcode, Operand, OperandKind};

mod builder;
mod code;
mod op;
