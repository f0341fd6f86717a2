//! The `input()` builtin: promises fulfilled from `INPUT` events published
//! on the bus, served in registration order, and released when the host
//! closes the stream.
//!
//! Kept in one test function: the input mailbox is process-global, so the
//! scenarios run sequentially.

use plume::{CodeBuilder, EventKind, Opcode, StaticStrings, Value, Vm, event_bus};
use pretty_assertions::assert_eq;

fn info_lines(logs: &plume::LogSink) -> Vec<String> {
    logs.lock()
        .unwrap()
        .iter()
        .filter(|(kind, _)| *kind == EventKind::LogInfo)
        .map(|(_, line)| line.clone())
        .collect()
}

/// Builds `input(<prompt?>).then(print)`.
fn emit_input_then_print(vm: &mut Vm, module: &mut CodeBuilder, prompt: Option<&str>) {
    module.load_name(StaticStrings::Input.id());
    let argc = match prompt {
        Some(prompt) => {
            let prompt = vm.interns.intern(prompt);
            module.load_const(Value::Str(prompt));
            1
        }
        None => 0,
    };
    module.call_function(argc);
    module.load_attr(StaticStrings::Then.id());
    module.load_name(StaticStrings::Print.id());
    module.call_function(1);
    module.emit(Opcode::PopTop);
}

#[test]
fn input_promises_consume_published_events_in_order() {
    event_bus::reopen_input();

    // Two pending payloads, two readers: delivery is FIFO, one payload per
    // waiter, and the waiter is removed after delivery.
    event_bus::publish(EventKind::Input, "first line");
    event_bus::publish(EventKind::Input, "second line");

    let mut vm = Vm::new();
    let logs = vm.collect_logs();
    let mut module = CodeBuilder::new(StaticStrings::Module.id());
    emit_input_then_print(&mut vm, &mut module, Some("name?"));
    emit_input_then_print(&mut vm, &mut module, None);
    let code = vm.register_code(module.build(0));
    vm.run_code(code).unwrap();

    assert_eq!(
        info_lines(&logs),
        vec!["name?".to_owned(), "first line".to_owned(), "second line".to_owned()]
    );

    // Closed stream: an unserved input promise does not wedge the loop;
    // run_code returns with the waiter released and its handler unrun.
    event_bus::close_input();
    let mut vm = Vm::new();
    let logs = vm.collect_logs();
    let mut module = CodeBuilder::new(StaticStrings::Module.id());
    emit_input_then_print(&mut vm, &mut module, None);
    let code = vm.register_code(module.build(0));
    vm.run_code(code).unwrap();
    assert_eq!(info_lines(&logs), Vec::<String>::new());

    event_bus::reopen_input();
}
