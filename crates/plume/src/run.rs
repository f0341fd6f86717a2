//! Driver entry points for the embedding surface.
//!
//! The grammar, parser, and IR→bytecode emitter are external collaborators:
//! they plug in through the [`FrontEnd`] trait and emit with
//! [`crate::bytecode::CodeBuilder`]. The entry points here mirror the C
//! surface: `compile()` writes a `.code` file next to the source,
//! `interpret()` compiles and executes, `interpret_bytecode()` executes a
//! `.code` file.

use std::{
    path::Path,
    sync::{LazyLock, PoisonError, RwLock},
};

use crate::{
    config,
    event_bus::{self, EventKind},
    exception::{ExcType, RunResult},
    heap::HeapId,
    serialize::{self, BinaryParser},
    vm::Vm,
};

/// The interface a source-language front end implements: turn source text
/// into a root code object registered in the VM's heap.
pub trait FrontEnd: Send + Sync {
    /// Compiles `source`, returning the heap handle of the module code
    /// object.
    fn compile(&self, source: &str, module_name: &str, vm: &mut Vm) -> RunResult<HeapId>;
}

static FRONT_END: LazyLock<RwLock<Option<Box<dyn FrontEnd>>>> = LazyLock::new(|| RwLock::new(None));

/// Installs the front end used by `compile()` and `interpret()`.
pub fn set_front_end(front_end: Box<dyn FrontEnd>) {
    *FRONT_END.write().unwrap_or_else(PoisonError::into_inner) = Some(front_end);
}

/// Compiles the configured input and writes the serialized module next to
/// the source file, with a `.code` extension.
pub fn compile() -> RunResult<()> {
    let mut vm = build_vm();
    let code_id = compile_front_end(&mut vm)?;
    let bytes = serialize::code_to_bytes(code_id, &vm.heap, &vm.interns)?;
    let Some(file) = config::get("file") else {
        return Err(ExcType::value_error(
            "compile() requires a 'file' entry in the configuration",
        ));
    };
    let target = Path::new(&file).with_extension("code");
    std::fs::write(&target, &bytes)
        .map_err(|err| ExcType::value_error(format!("cannot write {}: {err}", target.display())))?;
    event_bus::publish(
        EventKind::LogInfo,
        &format!("wrote {} ({} bytes)", target.display(), bytes.len()),
    );
    Ok(())
}

/// Compiles the configured input and executes it.
pub fn interpret() -> RunResult<()> {
    let mut vm = build_vm();
    let code_id = compile_front_end(&mut vm)?;
    execute(&mut vm, code_id)
}

/// Reads the configured `.code` file and executes it.
pub fn interpret_bytecode() -> RunResult<()> {
    let Some(file) = config::get("file") else {
        return Err(ExcType::value_error(
            "interpret_bytecode() requires a 'file' entry in the configuration",
        ));
    };
    let bytes = std::fs::read(&file)
        .map_err(|err| ExcType::value_error(format!("cannot read {file}: {err}")))?;
    let mut vm = build_vm();
    let code_id = BinaryParser::new(&bytes).parse_code(&mut vm.heap, &mut vm.interns)?;
    execute(&mut vm, code_id)
}

/// Runs a module code object and drains the event loop. Unhandled errors
/// are published as `LOG_ERROR` with their frame chain before propagating
/// to the caller.
pub fn execute(vm: &mut Vm, code_id: HeapId) -> RunResult<()> {
    if config::flag("show_bc") {
        dump_bytecode(vm, code_id)?;
    }
    match vm.run_code(code_id) {
        Ok(()) => Ok(()),
        Err(err) => {
            vm.publish(EventKind::LogError, &err.render());
            Err(err)
        }
    }
}

/// Publishes a disassembly of the module's instruction stream on
/// `LOG_DEBUG`, one line per instruction.
fn dump_bytecode(vm: &Vm, code_id: HeapId) -> RunResult<()> {
    use crate::bytecode::Operand;

    let crate::heap::HeapData::Code(code) = vm.heap.get(code_id) else {
        return Err(ExcType::internal("dump_bytecode expects a code handle"));
    };
    let name = vm.interns.get(code.name).to_owned();
    vm.publish(EventKind::LogDebug, &format!("disassembly of {name}:"));
    for (pc, inst) in code.instructions()?.iter().enumerate() {
        let line = match inst.operand {
            Operand::None => format!("{pc:4} {}", inst.op),
            Operand::Index(index) => format!("{pc:4} {} {index}", inst.op),
            Operand::Offset(offset) => format!("{pc:4} {} {offset:+}", inst.op),
            Operand::Compare(tag) => format!("{pc:4} {} {tag}", inst.op),
        };
        vm.publish(EventKind::LogDebug, &line);
    }
    Ok(())
}

fn build_vm() -> Vm {
    let mut vm = Vm::new();
    vm.set_verbose(config::flag("verbose"));
    vm
}

fn compile_front_end(vm: &mut Vm) -> RunResult<HeapId> {
    let (source, module_name) = read_input()?;
    let front_end = FRONT_END.read().unwrap_or_else(PoisonError::into_inner);
    let Some(front_end) = front_end.as_ref() else {
        return Err(ExcType::value_error(
            "no front end installed; only pre-compiled .code files can be executed",
        ));
    };
    front_end.compile(&source, &module_name, vm)
}

fn read_input() -> RunResult<(String, String)> {
    if let Some(file) = config::get("file") {
        let source = std::fs::read_to_string(&file)
            .map_err(|err| ExcType::value_error(format!("cannot read {file}: {err}")))?;
        return Ok((source, file));
    }
    if let Some(source) = config::get("source") {
        return Ok((source, "temporaryModule".to_owned()));
    }
    Err(ExcType::value_error("configuration names neither 'file' nor 'source'"))
}

/// Maps a runtime outcome to a process exit code and publishes the
/// `EXIT_PROGRAM` event.
#[must_use]
pub fn exit_code(result: &RunResult<()>) -> i32 {
    let code = i32::from(result.is_err());
    event_bus::publish(EventKind::ExitProgram, &code.to_string());
    code
}
