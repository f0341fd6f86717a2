//! Interpreter scenarios: name resolution, generators, iterators, operator
//! dispatch through user classes, and string interning, all observed
//! through the log stream.

use plume::{CodeBuilder, CompareOp, EventKind, ExcType, Opcode, StaticStrings, Value, Vm};
use pretty_assertions::assert_eq;

fn info_lines(logs: &plume::LogSink) -> Vec<String> {
    logs.lock()
        .unwrap()
        .iter()
        .filter(|(kind, _)| *kind == EventKind::LogInfo)
        .map(|(_, line)| line.clone())
        .collect()
}

/// Emits `print(<top of stack>)` assuming the callable and argument are
/// pushed by the caller-provided closure.
fn emit_print_of(module: &mut CodeBuilder, push_argument: impl FnOnce(&mut CodeBuilder)) {
    module.load_name(StaticStrings::Print.id());
    push_argument(module);
    module.call_function(1);
    module.emit(Opcode::PopTop);
}

/// A local binding hides a module-level binding of the same name within
/// its frame.
#[test]
fn local_binding_shadows_global() {
    let mut vm = Vm::new();
    let logs = vm.collect_logs();
    let x = vm.interns.intern("x");

    // def f(): x = 1; print(x)
    let mut function = CodeBuilder::new(vm.interns.intern("f"));
    function.load_const(Value::Int(1));
    function.store_name(x);
    emit_print_of(&mut function, |b| b.load_name(x));
    function.load_const(Value::None);
    function.emit(Opcode::ReturnValue);
    let function_code = vm.register_code(function.build(0));

    // x = 2; f()
    let f = vm.interns.intern("f");
    let mut module = CodeBuilder::new(StaticStrings::Module.id());
    module.load_const(Value::Int(2));
    module.store_name(x);
    module.load_const(Value::Ref(function_code));
    module.load_const(Value::Str(f));
    module.emit(Opcode::MakeFunction);
    module.store_name(f);
    module.load_name(f);
    module.call_function(0);
    module.emit(Opcode::PopTop);
    emit_print_of(&mut module, |b| b.load_name(x));

    let code = vm.register_code(module.build(0));
    vm.run_code(code).unwrap();

    // The local 1 inside f, the untouched global 2 afterwards.
    assert_eq!(info_lines(&logs), vec!["1".to_owned(), "2".to_owned()]);
}

/// Without a local, the same lookup reaches the module global; without the
/// global it is a NameError naming the missing identifier.
#[test]
fn name_lookup_falls_back_to_globals_then_fails() {
    let mut vm = Vm::new();
    let logs = vm.collect_logs();
    let x = vm.interns.intern("x");
    let f = vm.interns.intern("f");

    // def f(): print(x)
    let mut function = CodeBuilder::new(f);
    emit_print_of(&mut function, |b| b.load_name(x));
    function.load_const(Value::None);
    function.emit(Opcode::ReturnValue);
    let function_code = vm.register_code(function.build(0));

    // x = 2; f()
    let mut module = CodeBuilder::new(StaticStrings::Module.id());
    module.load_const(Value::Int(2));
    module.store_name(x);
    module.load_const(Value::Ref(function_code));
    module.load_const(Value::Str(f));
    module.emit(Opcode::MakeFunction);
    module.store_name(f);
    module.load_name(f);
    module.call_function(0);
    module.emit(Opcode::PopTop);
    let code = vm.register_code(module.build(0));
    vm.run_code(code).unwrap();
    assert_eq!(info_lines(&logs), vec!["2".to_owned()]);

    // A fresh module with no global x: the same function body fails.
    let mut vm = Vm::new();
    let x = vm.interns.intern("x");
    let mut module = CodeBuilder::new(StaticStrings::Module.id());
    emit_print_of(&mut module, |b| b.load_name(x));
    let code = vm.register_code(module.build(0));
    let err = vm.run_code(code).unwrap_err();
    assert_eq!(err.exc_type(), ExcType::NameError);
    assert_eq!(err.message(), "name 'x' is not defined");
    assert!(!err.frames().is_empty());
}

/// `list(range(0, 5, 2))` is `[0, 2, 4]`; a further `next` on the spent
/// iterator yields the exhaustion sentinel.
#[test]
fn range_produces_stepped_sequence_then_exhausts() {
    let mut vm = Vm::new();
    let logs = vm.collect_logs();
    let it = vm.interns.intern("it");

    let mut module = CodeBuilder::new(StaticStrings::Module.id());
    // it = range(0, 5, 2)
    module.load_name(StaticStrings::Range.id());
    module.load_const(Value::Int(0));
    module.load_const(Value::Int(5));
    module.load_const(Value::Int(2));
    module.call_function(3);
    module.store_name(it);
    // print(iter(it) is it)  — iter of an iterator is the iterator
    emit_print_of(&mut module, |b| {
        b.load_name(StaticStrings::Iter.id());
        b.load_name(it);
        b.call_function(1);
        b.load_name(it);
        b.compare_op(CompareOp::Is);
    });
    // print(list(it))
    emit_print_of(&mut module, |b| {
        b.load_name(StaticStrings::List.id());
        b.load_name(it);
        b.call_function(1);
    });
    // print(next(it))
    emit_print_of(&mut module, |b| {
        b.load_name(StaticStrings::Next.id());
        b.load_name(it);
        b.call_function(1);
    });

    let code = vm.register_code(module.build(0));
    vm.run_code(code).unwrap();
    assert_eq!(
        info_lines(&logs),
        vec!["True".to_owned(), "[0, 2, 4]".to_owned(), "StopIteration".to_owned()]
    );
}

/// `reversed` walks a list back to front.
#[test]
fn reversed_walks_lists_backwards() {
    let mut vm = Vm::new();
    let logs = vm.collect_logs();
    let mut module = CodeBuilder::new(StaticStrings::Module.id());
    emit_print_of(&mut module, |b| {
        b.load_name(StaticStrings::List.id());
        b.load_name(StaticStrings::Reversed.id());
        b.load_const(Value::Int(1));
        b.load_const(Value::Int(2));
        b.load_const(Value::Int(3));
        b.build_list(3);
        b.call_function(1);
        b.call_function(1);
    });
    let code = vm.register_code(module.build(0));
    vm.run_code(code).unwrap();
    assert_eq!(info_lines(&logs), vec!["[3, 2, 1]".to_owned()]);
}

/// `range` with a zero step is rejected up front.
#[test]
fn range_step_zero_is_a_value_error() {
    let mut vm = Vm::new();
    let mut module = CodeBuilder::new(StaticStrings::Module.id());
    module.load_name(StaticStrings::Range.id());
    module.load_const(Value::Int(0));
    module.load_const(Value::Int(5));
    module.load_const(Value::Int(0));
    module.call_function(3);
    module.emit(Opcode::PopTop);
    let code = vm.register_code(module.build(0));
    let err = vm.run_code(code).unwrap_err();
    assert_eq!(err.exc_type(), ExcType::ValueError);
}

/// A generator function call builds the generator without running the
/// body; each resumption runs to the next yield, and exhaustion is the
/// sentinel.
#[test]
fn generator_yields_then_exhausts() {
    let mut vm = Vm::new();
    let logs = vm.collect_logs();
    let g = vm.interns.intern("g");
    let gen_fn = vm.interns.intern("gen");

    // def gen(): yield 1; yield 2
    let mut body = CodeBuilder::new(gen_fn);
    body.load_const(Value::Int(1));
    body.emit(Opcode::YieldValue);
    body.emit(Opcode::PopTop);
    body.load_const(Value::Int(2));
    body.emit(Opcode::YieldValue);
    body.emit(Opcode::PopTop);
    body.load_const(Value::None);
    body.emit(Opcode::ReturnValue);
    let body_code = vm.register_code(body.build(0));

    let mut module = CodeBuilder::new(StaticStrings::Module.id());
    module.load_const(Value::Ref(body_code));
    module.load_const(Value::Str(gen_fn));
    module.emit(Opcode::MakeFunction);
    module.store_name(gen_fn);
    // g = gen()
    module.load_name(gen_fn);
    module.call_function(0);
    module.store_name(g);
    // print(g.done); three nexts; print(g.done)
    emit_print_of(&mut module, |b| {
        b.load_name(g);
        b.load_attr(StaticStrings::Done.id());
    });
    for _ in 0..3 {
        emit_print_of(&mut module, |b| {
            b.load_name(StaticStrings::Next.id());
            b.load_name(g);
            b.call_function(1);
        });
    }
    emit_print_of(&mut module, |b| {
        b.load_name(g);
        b.load_attr(StaticStrings::Done.id());
    });

    let code = vm.register_code(module.build(0));
    vm.run_code(code).unwrap();
    assert_eq!(
        info_lines(&logs),
        vec!["False", "1", "2", "StopIteration", "True"]
            .into_iter()
            .map(str::to_owned)
            .collect::<Vec<_>>()
    );
}

/// `send` resumes the paused frame with the sent value as the yield
/// expression's result.
#[test]
fn generator_send_delivers_the_sent_value() {
    let mut vm = Vm::new();
    let logs = vm.collect_logs();
    let g = vm.interns.intern("g");
    let echo = vm.interns.intern("echo");

    // def echo(): got = yield 1; print(got)
    let got = vm.interns.intern("got");
    let mut body = CodeBuilder::new(echo);
    body.load_const(Value::Int(1));
    body.emit(Opcode::YieldValue);
    body.store_fast(got);
    emit_print_of(&mut body, |b| b.load_fast(got));
    body.load_const(Value::None);
    body.emit(Opcode::ReturnValue);
    let body_code = vm.register_code(body.build(1));

    let mut module = CodeBuilder::new(StaticStrings::Module.id());
    module.load_const(Value::Ref(body_code));
    module.load_const(Value::Str(echo));
    module.emit(Opcode::MakeFunction);
    module.store_name(echo);
    module.load_name(echo);
    module.call_function(0);
    module.store_name(g);
    // print(next(g)); g.send(42)
    emit_print_of(&mut module, |b| {
        b.load_name(StaticStrings::Next.id());
        b.load_name(g);
        b.call_function(1);
    });
    module.load_name(g);
    module.load_attr(StaticStrings::Send.id());
    module.load_const(Value::Int(42));
    module.call_function(1);
    module.emit(Opcode::PopTop);

    let code = vm.register_code(module.build(0));
    vm.run_code(code).unwrap();
    assert_eq!(info_lines(&logs), vec!["1".to_owned(), "42".to_owned()]);
}

/// User-defined classes dispatch `__init__`, attribute storage, and
/// `__add__` through the method-resolution machinery.
#[test]
fn dunder_init_and_add_drive_operator_dispatch() {
    let mut vm = Vm::new();
    let logs = vm.collect_logs();
    let self_name = vm.interns.intern("self");
    let v = vm.interns.intern("v");
    let other = vm.interns.intern("other");
    let box_name = vm.interns.intern("Box");
    let a = vm.interns.intern("a");
    let b = vm.interns.intern("b");

    // def __init__(self, v): self.v = v
    let mut init = CodeBuilder::new(StaticStrings::DunderInit.id());
    init.varname_index(self_name);
    init.varname_index(v);
    init.load_fast(v);
    init.load_fast(self_name);
    init.store_attr(v);
    init.load_const(Value::None);
    init.emit(Opcode::ReturnValue);
    let init_code = vm.register_code(init.build(2));

    // def __add__(self, other): return self.v + other.v
    let mut add = CodeBuilder::new(StaticStrings::DunderAdd.id());
    add.varname_index(self_name);
    add.varname_index(other);
    add.load_fast(self_name);
    add.load_attr(v);
    add.load_fast(other);
    add.load_attr(v);
    add.emit(Opcode::BinaryAdd);
    add.emit(Opcode::ReturnValue);
    let add_code = vm.register_code(add.build(2));

    // class body: bind both methods
    let mut body = CodeBuilder::new(vm.interns.intern("classbody"));
    body.load_const(Value::Ref(init_code));
    body.load_const(Value::Str(StaticStrings::DunderInit.id()));
    body.emit(Opcode::MakeFunction);
    body.store_name(StaticStrings::DunderInit.id());
    body.load_const(Value::Ref(add_code));
    body.load_const(Value::Str(StaticStrings::DunderAdd.id()));
    body.emit(Opcode::MakeFunction);
    body.store_name(StaticStrings::DunderAdd.id());
    body.load_const(Value::None);
    body.emit(Opcode::ReturnValue);
    let body_code = vm.register_code(body.build(0));

    let mut module = CodeBuilder::new(StaticStrings::Module.id());
    module.emit(Opcode::LoadBuildClass);
    module.load_const(Value::Ref(body_code));
    module.load_const(Value::Str(box_name));
    module.emit(Opcode::MakeFunction);
    module.load_const(Value::Str(box_name));
    module.build_list(0);
    module.call_function(3);
    module.store_name(box_name);
    // a = Box(2); b = Box(3); print(a + b)
    module.load_name(box_name);
    module.load_const(Value::Int(2));
    module.call_function(1);
    module.store_name(a);
    module.load_name(box_name);
    module.load_const(Value::Int(3));
    module.call_function(1);
    module.store_name(b);
    emit_print_of(&mut module, |builder| {
        builder.load_name(a);
        builder.load_name(b);
        builder.emit(Opcode::BinaryAdd);
    });

    let code = vm.register_code(module.build(0));
    vm.run_code(code).unwrap();
    assert_eq!(info_lines(&logs), vec!["5".to_owned()]);
}

/// Interned strings: equal content is handle identity, and hashes agree.
#[test]
fn string_interning_gives_identity_and_equal_hashes() {
    let mut vm = Vm::new();
    let logs = vm.collect_logs();

    let foo = vm.interns.intern("foo");
    let bar = vm.interns.intern("bar");
    let foobar = vm.interns.intern("foobar");

    let mut module = CodeBuilder::new(StaticStrings::Module.id());
    // print(("foo" + "bar") is "foobar")
    emit_print_of(&mut module, |b| {
        b.load_const(Value::Str(foo));
        b.load_const(Value::Str(bar));
        b.emit(Opcode::BinaryAdd);
        b.load_const(Value::Str(foobar));
        b.compare_op(CompareOp::Is);
    });
    // print(hash("foo" + "bar") == hash("foobar"))
    emit_print_of(&mut module, |b| {
        b.load_name(StaticStrings::Hash.id());
        b.load_const(Value::Str(foo));
        b.load_const(Value::Str(bar));
        b.emit(Opcode::BinaryAdd);
        b.call_function(1);
        b.load_name(StaticStrings::Hash.id());
        b.load_const(Value::Str(foobar));
        b.call_function(1);
        b.compare_op(CompareOp::Eq);
    });

    let code = vm.register_code(module.build(0));
    vm.run_code(code).unwrap();
    assert_eq!(info_lines(&logs), vec!["True".to_owned(), "True".to_owned()]);
}

/// Loops: `FOR_ITER` walks an iterator to exhaustion, and conditional
/// jumps drive a while-style countdown.
#[test]
fn for_iter_and_conditional_jumps_run_loops() {
    let mut vm = Vm::new();
    let logs = vm.collect_logs();
    let total = vm.interns.intern("total");
    let x = vm.interns.intern("x");

    // total = 0
    // for x in [1, 2, 3]: total = total + x
    // print(total)
    let mut module = CodeBuilder::new(StaticStrings::Module.id());
    module.load_const(Value::Int(0));
    module.store_name(total);
    module.load_const(Value::Int(1));
    module.load_const(Value::Int(2));
    module.load_const(Value::Int(3));
    module.build_list(3);
    module.emit(Opcode::GetIter);
    let loop_start = module.position();
    let exit = module.emit_jump(Opcode::ForIter);
    module.store_name(x);
    module.load_name(total);
    module.load_name(x);
    module.emit(Opcode::BinaryAdd);
    module.store_name(total);
    module.jump_absolute(loop_start);
    module.patch_jump(exit);
    emit_print_of(&mut module, |b| b.load_name(total));

    let code = vm.register_code(module.build(0));
    vm.run_code(code).unwrap();
    assert_eq!(info_lines(&logs), vec!["6".to_owned()]);
}

/// Arbitrary-precision arithmetic: machine-word overflow promotes to the
/// big-integer representation transparently.
#[test]
fn integer_overflow_promotes_to_big_integers() {
    let mut vm = Vm::new();
    let logs = vm.collect_logs();
    let mut module = CodeBuilder::new(StaticStrings::Module.id());
    // print(10 ** 20 + 1)
    emit_print_of(&mut module, |b| {
        b.load_const(Value::Int(10));
        b.load_const(Value::Int(20));
        b.emit(Opcode::BinaryPower);
        b.load_const(Value::Int(1));
        b.emit(Opcode::BinaryAdd);
    });
    let code = vm.register_code(module.build(0));
    vm.run_code(code).unwrap();
    assert_eq!(info_lines(&logs), vec!["100000000000000000001".to_owned()]);
}

/// Division by zero surfaces as ValueError with the frame chain attached.
#[test]
fn division_by_zero_unwinds_with_frames() {
    let mut vm = Vm::new();
    let mut module = CodeBuilder::new(StaticStrings::Module.id());
    module.load_const(Value::Int(1));
    module.load_const(Value::Int(0));
    module.emit(Opcode::BinaryTrueDivide);
    module.emit(Opcode::PopTop);
    let code = vm.register_code(module.build(0));
    let err = vm.run_code(code).unwrap_err();
    assert_eq!(err.exc_type(), ExcType::ValueError);
    assert_eq!(err.message(), "division by zero");
    assert_eq!(err.frames()[0].function, "<module>");
}

/// Reference counting returns the heap to its pre-run footprint: the
/// module's transient allocations (list, module globals) are all released
/// by the time `run_code` returns.
#[test]
fn transient_allocations_are_released_after_the_run() {
    let mut vm = Vm::new();
    let mut module = CodeBuilder::new(StaticStrings::Module.id());
    emit_print_of(&mut module, |b| {
        b.load_const(Value::Int(1));
        b.load_const(Value::Int(2));
        b.load_const(Value::Int(3));
        b.build_list(3);
    });
    let code = vm.register_code(module.build(0));
    let baseline = vm.heap.live_objects();
    assert_eq!(vm.heap.ref_count(code), 1);

    vm.run_code(code).unwrap();

    assert_eq!(vm.heap.live_objects(), baseline);
    assert_eq!(vm.heap.ref_count(code), 1);
}

/// Calling a non-callable is the canonical TypeError.
#[test]
fn calling_an_integer_is_a_type_error() {
    let mut vm = Vm::new();
    let mut module = CodeBuilder::new(StaticStrings::Module.id());
    module.load_const(Value::Int(7));
    module.call_function(0);
    module.emit(Opcode::PopTop);
    let code = vm.register_code(module.build(0));
    let err = vm.run_code(code).unwrap_err();
    assert_eq!(err.exc_type(), ExcType::TypeError);
    assert_eq!(err.message(), "'int' object is not callable");
}
