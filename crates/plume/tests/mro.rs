//! Method-resolution-order scenarios, driven end to end through bytecode:
//! classes are defined via `LOAD_BUILD_CLASS` and introspected through the
//! `__mro__` IIFE attribute.

use plume::{CodeBuilder, EventKind, Opcode, StaticStrings, Value, Vm};
use pretty_assertions::assert_eq;

/// Emits `class <name>(<bases>): pass` into the module builder, storing
/// the class under its name.
fn define_class(vm: &mut Vm, module: &mut CodeBuilder, body_code: plume::HeapId, name: &str, bases: &[&str]) {
    let name_id = vm.interns.intern(name);
    module.emit(Opcode::LoadBuildClass);
    vm.heap.inc_ref(body_code);
    module.load_const(Value::Ref(body_code));
    module.load_const(Value::Str(name_id));
    module.emit(Opcode::MakeFunction);
    module.load_const(Value::Str(name_id));
    for base in bases {
        module.load_name(vm.interns.intern(base));
    }
    module.build_list(bases.len() as u64);
    module.call_function(3);
    module.store_name(name_id);
}

/// Builds the shared empty class body: `return None`.
fn empty_class_body(vm: &mut Vm) -> plume::HeapId {
    let mut body = CodeBuilder::new(vm.interns.intern("classbody"));
    body.load_const(Value::None);
    body.emit(Opcode::ReturnValue);
    vm.register_code(body.build(0))
}

fn info_lines(logs: &plume::LogSink) -> Vec<String> {
    logs.lock()
        .unwrap()
        .iter()
        .filter(|(kind, _)| *kind == EventKind::LogInfo)
        .map(|(_, line)| line.clone())
        .collect()
}

/// The diamond from the specification: classes `O`, `A(O)`, `B(O)`,
/// `C(O)`, `E(A,B)`, `F(B,C)`, `G(E,F)` linearize G as
/// `[G, E, A, F, B, C, O, object]`.
#[test]
fn diamond_inheritance_linearizes_like_c3() {
    let mut vm = Vm::new();
    let logs = vm.collect_logs();
    let body = empty_class_body(&mut vm);

    let mut module = CodeBuilder::new(StaticStrings::Module.id());
    define_class(&mut vm, &mut module, body, "O", &[]);
    define_class(&mut vm, &mut module, body, "A", &["O"]);
    define_class(&mut vm, &mut module, body, "B", &["O"]);
    define_class(&mut vm, &mut module, body, "C", &["O"]);
    define_class(&mut vm, &mut module, body, "E", &["A", "B"]);
    define_class(&mut vm, &mut module, body, "F", &["B", "C"]);
    define_class(&mut vm, &mut module, body, "G", &["E", "F"]);

    // print(G.__mro__)
    module.load_name(StaticStrings::Print.id());
    module.load_name(vm.interns.intern("G"));
    module.load_attr(StaticStrings::DunderMro.id());
    module.call_function(1);
    module.emit(Opcode::PopTop);

    let code = vm.register_code(module.build(0));
    vm.run_code(code).unwrap();

    assert_eq!(
        info_lines(&logs),
        vec![
            "[<class 'G'>, <class 'E'>, <class 'A'>, <class 'F'>, <class 'B'>, <class 'C'>, \
             <class 'O'>, <class 'object'>]"
                .to_owned()
        ]
    );
}

/// For every class, the MRO starts with the class itself and ends with
/// `object`, and each parent's MRO is a subsequence of the child's.
#[test]
fn parent_mros_embed_into_child_mros() {
    let mut vm = Vm::new();
    let logs = vm.collect_logs();
    let body = empty_class_body(&mut vm);

    let mut module = CodeBuilder::new(StaticStrings::Module.id());
    define_class(&mut vm, &mut module, body, "Base", &[]);
    define_class(&mut vm, &mut module, body, "Left", &["Base"]);
    define_class(&mut vm, &mut module, body, "Right", &["Base"]);
    define_class(&mut vm, &mut module, body, "Join", &["Left", "Right"]);

    for name in ["Left", "Right", "Join"] {
        module.load_name(StaticStrings::Print.id());
        module.load_name(vm.interns.intern(name));
        module.load_attr(StaticStrings::DunderMro.id());
        module.call_function(1);
        module.emit(Opcode::PopTop);
    }

    let code = vm.register_code(module.build(0));
    vm.run_code(code).unwrap();

    let lines = info_lines(&logs);
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0], "[<class 'Left'>, <class 'Base'>, <class 'object'>]");
    assert_eq!(lines[1], "[<class 'Right'>, <class 'Base'>, <class 'object'>]");
    assert_eq!(
        lines[2],
        "[<class 'Join'>, <class 'Left'>, <class 'Right'>, <class 'Base'>, <class 'object'>]"
    );

    // Subsequence check: Left's MRO appears, in order, inside Join's.
    let join = &lines[2];
    let mut cursor = 0;
    for entry in ["<class 'Left'>", "<class 'Base'>", "<class 'object'>"] {
        let found = join[cursor..].find(entry).expect("parent MRO entry present in child");
        cursor += found + entry.len();
    }
}

/// Methods resolve through the MRO: a grandchild without an override finds
/// the grandparent implementation, and a child override wins.
#[test]
fn method_lookup_walks_the_mro() {
    let mut vm = Vm::new();
    let logs = vm.collect_logs();

    // Body for a class defining `def speak(self): return <text>`.
    let make_speaker = |vm: &mut Vm, text: &str| -> plume::HeapId {
        let speak_name = vm.interns.intern("speak");
        let self_name = vm.interns.intern("self");
        let mut speak = CodeBuilder::new(speak_name);
        speak.varname_index(self_name);
        let text_value = Value::Str(vm.interns.intern(text));
        speak.load_const(text_value);
        speak.emit(Opcode::ReturnValue);
        let speak_id = vm.register_code(speak.build(1));

        let mut body = CodeBuilder::new(vm.interns.intern("classbody"));
        body.load_const(Value::Ref(speak_id));
        body.load_const(Value::Str(speak_name));
        body.emit(Opcode::MakeFunction);
        body.store_name(speak_name);
        body.load_const(Value::None);
        body.emit(Opcode::ReturnValue);
        vm.register_code(body.build(0))
    };

    let animal_body = make_speaker(&mut vm, "generic noise");
    let dog_body = make_speaker(&mut vm, "woof");
    let silent_body = empty_class_body(&mut vm);

    let mut module = CodeBuilder::new(StaticStrings::Module.id());
    define_class(&mut vm, &mut module, animal_body, "Animal", &[]);
    define_class(&mut vm, &mut module, silent_body, "Pet", &["Animal"]);
    define_class(&mut vm, &mut module, dog_body, "Dog", &["Pet"]);

    // print(Pet().speak()); print(Dog().speak())
    for name in ["Pet", "Dog"] {
        module.load_name(StaticStrings::Print.id());
        module.load_name(vm.interns.intern(name));
        module.call_function(0);
        module.load_attr(vm.interns.intern("speak"));
        module.call_function(0);
        module.call_function(1);
        module.emit(Opcode::PopTop);
    }

    let code = vm.register_code(module.build(0));
    vm.run_code(code).unwrap();

    assert_eq!(info_lines(&logs), vec!["generic noise".to_owned(), "woof".to_owned()]);
}
