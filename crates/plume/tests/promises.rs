//! Promise and event-loop scenarios: chaining through `then`/`catch`,
//! idempotent settlement, and microtask/macrotask ordering.

use plume::{
    CodeBuilder, Dict, EventKind, Function, HeapData, Opcode, StaticStrings, Value, Vm,
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

/// Builds `def <name>(x): print(x); return <tail>` where `tail` is emitted
/// by the caller on top of `x`.
fn handler_function(
    vm: &mut Vm,
    name: &str,
    tail: impl FnOnce(&mut CodeBuilder, plume::StringId),
) -> plume::HeapId {
    let x = vm.interns.intern("x");
    let mut body = CodeBuilder::new(vm.interns.intern(name));
    body.varname_index(x);
    body.load_name(StaticStrings::Print.id());
    body.load_fast(x);
    body.call_function(1);
    body.emit(Opcode::PopTop);
    tail(&mut body, x);
    body.emit(Opcode::ReturnValue);
    vm.register_code(body.build(1))
}

fn bind_function(vm: &mut Vm, module: &mut CodeBuilder, code: plume::HeapId, name: &str) {
    let name_id = vm.interns.intern(name);
    module.load_const(Value::Ref(code));
    module.load_const(Value::Str(name_id));
    module.emit(Opcode::MakeFunction);
    module.store_name(name_id);
}

/// The chaining scenario: resolve with 100, double, add five, throw, catch.
/// The four callback log lines appear in order before the loop reports
/// idle (`run_code` returns only after the loop drained).
#[test]
fn promise_chain_logs_in_order_then_catches() {
    let mut vm = Vm::new();
    let logs = vm.collect_logs();

    let double = handler_function(&mut vm, "double", |b, x| {
        b.load_fast(x);
        b.load_const(Value::Int(2));
        b.emit(Opcode::BinaryMultiply);
    });
    let add_five = handler_function(&mut vm, "add_five", |b, x| {
        b.load_fast(x);
        b.load_const(Value::Int(5));
        b.emit(Opcode::BinaryAdd);
    });
    let blow_up = handler_function(&mut vm, "blow_up", |b, _| {
        b.load_const(Value::Int(1));
        b.load_const(Value::Int(0));
        b.emit(Opcode::BinaryTrueDivide);
    });
    let report = handler_function(&mut vm, "report", |b, _| {
        b.load_const(Value::None);
    });

    let mut module = CodeBuilder::new(StaticStrings::Module.id());
    bind_function(&mut vm, &mut module, double, "double");
    bind_function(&mut vm, &mut module, add_five, "add_five");
    bind_function(&mut vm, &mut module, blow_up, "blow_up");
    bind_function(&mut vm, &mut module, report, "report");

    // Promise.resolve(100).then(double).then(add_five).then(blow_up).catch(report)
    module.load_name(StaticStrings::PromiseName.id());
    module.load_attr(StaticStrings::Resolve.id());
    module.load_const(Value::Int(100));
    module.call_function(1);
    for name in ["double", "add_five", "blow_up"] {
        module.load_attr(StaticStrings::Then.id());
        module.load_name(vm.interns.intern(name));
        module.call_function(1);
    }
    module.load_attr(StaticStrings::Catch.id());
    module.load_name(vm.interns.intern("report"));
    module.call_function(1);
    module.emit(Opcode::PopTop);

    let code = vm.register_code(module.build(0));
    vm.run_code(code).unwrap();

    assert_eq!(
        info_lines(&logs),
        vec![
            "100".to_owned(),
            "200".to_owned(),
            "205".to_owned(),
            "ValueError: division by zero".to_owned(),
        ]
    );
}

/// The executor runs immediately; only the first settlement out of PENDING
/// takes effect, and each callback fires at most once.
#[test]
fn settlement_is_idempotent() {
    let mut vm = Vm::new();
    let logs = vm.collect_logs();

    // def ex(resolve, reject): resolve(1); resolve(2); reject(3)
    let resolve = vm.interns.intern("resolve");
    let reject = vm.interns.intern("reject");
    let mut executor = CodeBuilder::new(vm.interns.intern("ex"));
    executor.varname_index(resolve);
    executor.varname_index(reject);
    for (callable, payload) in [(resolve, 1), (resolve, 2), (reject, 3)] {
        executor.load_fast(callable);
        executor.load_const(Value::Int(payload));
        executor.call_function(1);
        executor.emit(Opcode::PopTop);
    }
    executor.load_const(Value::None);
    executor.emit(Opcode::ReturnValue);
    let executor_code = vm.register_code(executor.build(2));

    let mut module = CodeBuilder::new(StaticStrings::Module.id());
    bind_function(&mut vm, &mut module, executor_code, "ex");
    // p = Promise(ex); p.then(print); p.catch(print)
    let p = vm.interns.intern("p");
    module.load_name(StaticStrings::PromiseName.id());
    module.load_name(vm.interns.intern("ex"));
    module.call_function(1);
    module.store_name(p);
    module.load_name(p);
    module.load_attr(StaticStrings::Then.id());
    module.load_name(StaticStrings::Print.id());
    module.call_function(1);
    module.emit(Opcode::PopTop);
    module.load_name(p);
    module.load_attr(StaticStrings::Catch.id());
    module.load_name(StaticStrings::Print.id());
    module.call_function(1);
    module.emit(Opcode::PopTop);

    let code = vm.register_code(module.build(0));
    vm.run_code(code).unwrap();

    // Only the first resolve(1) ran a callback; the reject side never fired.
    assert_eq!(info_lines(&logs), vec!["1".to_owned()]);
}

/// Registering on an already-settled promise still observes the microtask
/// discipline: nothing runs inline during registration.
#[test]
fn settled_registration_still_runs_as_microtask() {
    let mut vm = Vm::new();
    let logs = vm.collect_logs();

    // p = Promise.resolve(7); p.then(print); print("registered")
    let p = vm.interns.intern("p");
    let mut module = CodeBuilder::new(StaticStrings::Module.id());
    module.load_name(StaticStrings::PromiseName.id());
    module.load_attr(StaticStrings::Resolve.id());
    module.load_const(Value::Int(7));
    module.call_function(1);
    module.store_name(p);
    module.load_name(p);
    module.load_attr(StaticStrings::Then.id());
    module.load_name(StaticStrings::Print.id());
    module.call_function(1);
    module.emit(Opcode::PopTop);
    module.load_name(StaticStrings::Print.id());
    module.load_const(Value::Str(vm.interns.intern("registered")));
    module.call_function(1);
    module.emit(Opcode::PopTop);

    let code = vm.register_code(module.build(0));
    vm.run_code(code).unwrap();

    // The module's own print runs first; the handler only fires once the
    // loop drains microtasks.
    assert_eq!(info_lines(&logs), vec!["registered".to_owned(), "7".to_owned()]);
}

/// Microtasks drain fully before each macrotask, and microtasks enqueued
/// by a macrotask run before the next macrotask begins.
#[test]
fn microtasks_drain_between_macrotasks() {
    let mut vm = Vm::new();
    let logs = vm.collect_logs();

    // A macrotask body that chains a microtask and then logs.
    //   Promise.resolve(5).then(print); print("macro1")
    let globals = vm.heap.allocate(HeapData::Dict(Dict::new()));
    let name = vm.interns.intern("first_macro");
    let mut body = CodeBuilder::new(name);
    body.load_global(StaticStrings::PromiseName.id());
    body.load_attr(StaticStrings::Resolve.id());
    body.load_const(Value::Int(5));
    body.call_function(1);
    body.load_attr(StaticStrings::Then.id());
    body.load_global(StaticStrings::Print.id());
    body.call_function(1);
    body.emit(Opcode::PopTop);
    body.load_global(StaticStrings::Print.id());
    body.load_const(Value::Str(vm.interns.intern("macro1")));
    body.call_function(1);
    body.emit(Opcode::PopTop);
    body.load_const(Value::None);
    body.emit(Opcode::ReturnValue);
    let body_code = vm.register_code(body.build(0));

    let function = Function {
        code: body_code,
        globals,
        name,
    };
    let function_id = vm.heap.allocate(HeapData::Function(function));

    vm.enqueue_task(Value::Ref(function_id), vec![]);
    let print_fn = vm.builtin_value("print").unwrap();
    let macro2 = vm.str_value("macro2");
    vm.enqueue_task(print_fn, vec![macro2]);

    let print_fn = vm.builtin_value("print").unwrap();
    let micro0 = vm.str_value("micro0");
    vm.enqueue_microtask(print_fn, vec![micro0]);

    vm.run_event_loop();

    // micro0 precedes every macrotask; macro1's chained microtask ("5")
    // lands between macro1 and macro2.
    assert_eq!(
        info_lines(&logs),
        vec![
            "micro0".to_owned(),
            "macro1".to_owned(),
            "5".to_owned(),
            "macro2".to_owned(),
        ]
    );
}

/// Errors escaping a macrotask are logged as LOG_ERROR and the loop moves
/// on to the next task.
#[test]
fn task_errors_are_logged_and_the_loop_continues() {
    let mut vm = Vm::new();
    let logs = vm.collect_logs();

    // `len()` with no arguments raises a TypeError inside the task.
    let len_fn = vm.builtin_value("len").unwrap();
    vm.enqueue_task(len_fn, vec![]);
    let print_fn = vm.builtin_value("print").unwrap();
    let after = vm.str_value("after");
    vm.enqueue_task(print_fn, vec![after]);

    vm.run_event_loop();

    let recorded = logs.lock().unwrap().clone();
    assert!(
        recorded
            .iter()
            .any(|(kind, line)| *kind == EventKind::LogError && line.starts_with("TypeError"))
    );
    assert_eq!(info_lines(&logs), vec!["after".to_owned()]);
}
