#![doc = include_str!("../../../README.md")]

pub mod api;
mod builtins;
mod bytecode;
pub mod config;
pub mod event_bus;
mod exception;
mod genesis;
mod heap;
mod intern;
mod py_hash;
pub mod run;
pub mod serialize;
mod types;
mod value;
mod vm;

pub use crate::{
    builtins::Builtin,
    bytecode::{Code, CodeBuilder, CompareOp, Inst, JumpLabel, Opcode, Operand, OperandKind, Scope, code_eq},
    event_bus::EventKind,
    exception::{ExcType, RunError, RunResult, TraceFrame},
    heap::{Heap, HeapData, HeapId},
    intern::{Interns, StaticStrings, StringId},
    run::FrontEnd,
    types::{
        Bytes, ClassObject, Dict, Function, Generator, Iife, Instance, Iter, List, LongInt, Method,
        Promise, PromiseState, Registration, Slice,
    },
    value::{Type, Value},
    vm::{EventLoop, Frame, FrameExit, LogSink, LoopState, Task, Vm},
};
