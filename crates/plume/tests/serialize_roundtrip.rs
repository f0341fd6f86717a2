//! Binary format round trips: values, integers through their limb
//! encoding, and whole code objects re-executed from bytes.

use plume::{
    CodeBuilder, EventKind, ExcType, Opcode, StaticStrings, Value, Vm, code_eq,
    serialize::{self, BinaryParser},
};
use pretty_assertions::assert_eq;

fn info_lines(logs: &plume::LogSink) -> Vec<String> {
    logs.lock()
        .unwrap()
        .iter()
        .filter(|(kind, _)| *kind == EventKind::LogInfo)
        .map(|(_, line)| line.clone())
        .collect()
}

/// Builds the one-side-effect module: `print("hello")`.
fn hello_module(vm: &mut Vm) -> plume::HeapId {
    let mut module = CodeBuilder::new(StaticStrings::Module.id());
    module.load_name(StaticStrings::Print.id());
    let hello = vm.interns.intern("hello");
    module.load_const(Value::Str(hello));
    module.call_function(1);
    module.emit(Opcode::PopTop);
    module.load_const(Value::None);
    module.emit(Opcode::ReturnValue);
    vm.register_code(module.build(0))
}

/// Serialize the integer 10, deserialize it, and multiply it into a
/// twenty-factor product: the result is 10^20.
#[test]
fn deserialized_ten_multiplies_to_ten_to_the_twentieth() {
    let mut vm = Vm::new();
    let logs = vm.collect_logs();

    let mut bytes = Vec::new();
    serialize::serialize_value(&Value::Int(10), &vm.heap, &vm.interns, &mut bytes).unwrap();
    let parsed = BinaryParser::new(&bytes)
        .parse_value(&mut vm.heap, &mut vm.interns)
        .unwrap();
    let Value::Int(ten) = parsed else {
        panic!("expected a machine integer back, got {parsed:?}");
    };
    assert_eq!(ten, 10);

    let mut module = CodeBuilder::new(StaticStrings::Module.id());
    module.load_name(StaticStrings::Print.id());
    module.load_const(Value::Int(ten));
    for _ in 0..19 {
        module.load_const(Value::Int(ten));
        module.emit(Opcode::BinaryMultiply);
    }
    module.call_function(1);
    module.emit(Opcode::PopTop);
    let code = vm.register_code(module.build(0));
    vm.run_code(code).unwrap();

    assert_eq!(info_lines(&logs), vec!["100000000000000000000".to_owned()]);
}

/// Compile-then-serialize-then-parse-then-execute produces the same log
/// stream as direct execution, including across a fresh VM.
#[test]
fn code_round_trip_preserves_the_log_stream() {
    let mut vm = Vm::new();
    let logs = vm.collect_logs();
    let code_id = hello_module(&mut vm);

    vm.run_code(code_id).unwrap();
    assert_eq!(info_lines(&logs), vec!["hello".to_owned()]);

    let bytes = serialize::code_to_bytes(code_id, &vm.heap, &vm.interns).unwrap();

    // Same VM: the parsed copy is structurally equal and runs identically.
    let reparsed = BinaryParser::new(&bytes)
        .parse_code(&mut vm.heap, &mut vm.interns)
        .unwrap();
    assert!(code_eq(code_id, reparsed, &vm.heap));
    vm.run_code(reparsed).unwrap();
    assert_eq!(info_lines(&logs), vec!["hello".to_owned(), "hello".to_owned()]);

    // Fresh VM: only the byte stream crosses over.
    let mut other = Vm::new();
    let other_logs = other.collect_logs();
    let parsed = BinaryParser::new(&bytes)
        .parse_code(&mut other.heap, &mut other.interns)
        .unwrap();
    other.run_code(parsed).unwrap();
    assert_eq!(info_lines(&other_logs), vec!["hello".to_owned()]);
}

/// Structural code equality is sensitive to the instruction stream.
#[test]
fn code_equality_detects_differences()  {
    let mut vm = Vm::new();
    let a = hello_module(&mut vm);

    let mut other = CodeBuilder::new(StaticStrings::Module.id());
    other.load_name(StaticStrings::Print.id());
    let changed = vm.interns.intern("changed");
    other.load_const(Value::Str(changed));
    other.call_function(1);
    other.emit(Opcode::PopTop);
    other.load_const(Value::None);
    other.emit(Opcode::ReturnValue);
    let b = vm.register_code(other.build(0));

    assert!(code_eq(a, a, &vm.heap));
    assert!(!code_eq(a, b, &vm.heap));
}

/// Functions and generators survive serialization: a module whose function
/// is a nested code constant executes identically after a round trip.
#[test]
fn nested_code_constants_round_trip() {
    let mut vm = Vm::new();
    let logs = vm.collect_logs();

    // def shout(): print("nested"); shout()
    let shout = vm.interns.intern("shout");
    let mut function = CodeBuilder::new(shout);
    function.load_name(StaticStrings::Print.id());
    let nested = vm.interns.intern("nested");
    function.load_const(Value::Str(nested));
    function.call_function(1);
    function.emit(Opcode::PopTop);
    function.load_const(Value::None);
    function.emit(Opcode::ReturnValue);
    let function_code = vm.register_code(function.build(0));

    let mut module = CodeBuilder::new(StaticStrings::Module.id());
    module.load_const(Value::Ref(function_code));
    module.load_const(Value::Str(shout));
    module.emit(Opcode::MakeFunction);
    module.store_name(shout);
    module.load_name(shout);
    module.call_function(0);
    module.emit(Opcode::PopTop);
    let code_id = vm.register_code(module.build(0));

    let bytes = serialize::code_to_bytes(code_id, &vm.heap, &vm.interns).unwrap();

    let mut fresh = Vm::new();
    let fresh_logs = fresh.collect_logs();
    let parsed = BinaryParser::new(&bytes)
        .parse_code(&mut fresh.heap, &mut fresh.interns)
        .unwrap();
    fresh.run_code(parsed).unwrap();
    assert_eq!(info_lines(&fresh_logs), vec!["nested".to_owned()]);

    // Round-tripping the bytes again yields a structurally equal object.
    let again = serialize::code_to_bytes(parsed, &fresh.heap, &fresh.interns).unwrap();
    assert_eq!(bytes, again);
}

/// Malformed streams surface SerializationError rather than panicking.
#[test]
fn malformed_streams_are_serialization_errors() {
    let mut vm = Vm::new();

    // Not a CODE literal at the root.
    let err = BinaryParser::new(&[6])
        .parse_code(&mut vm.heap, &mut vm.interns)
        .unwrap_err();
    assert_eq!(err.exc_type(), ExcType::SerializationError);

    // A CODE literal whose payload is cut short.
    let code_id = hello_module(&mut vm);
    let mut bytes = serialize::code_to_bytes(code_id, &vm.heap, &vm.interns).unwrap();
    bytes.truncate(bytes.len() / 2);
    let err = BinaryParser::new(&bytes)
        .parse_code(&mut vm.heap, &mut vm.interns)
        .unwrap_err();
    assert_eq!(err.exc_type(), ExcType::SerializationError);
}
