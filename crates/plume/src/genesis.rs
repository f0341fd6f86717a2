//! VM bootstrap: native class objects and the builtins table.
//!
//! Every native kind gets a pinned class descriptor with a trivial MRO
//! (`[self, object]`; `object` itself is `[object]`), the introspection
//! attributes every class carries, and its method table. The builtins dict
//! is assembled last, mirroring the registration order of the original
//! runtime's genesis step.

use crate::{
    builtins::Builtin,
    heap::{HeapData, HeapId},
    intern::StaticStrings,
    types::{ClassObject, Dict, Iife},
    value::{Type, Value},
    vm::Vm,
};

/// Populates a fresh VM with classes and builtins.
pub(crate) fn bootstrap(vm: &mut Vm) {
    allocate_native_classes(vm);
    link_trivial_mros(vm);
    for kind in Type::ALL {
        let class_id = vm.class_id(kind);
        configure_basic_attributes(vm, class_id);
    }
    install_method_tables(vm);
    install_builtins(vm);
}

fn allocate_native_classes(vm: &mut Vm) {
    for kind in Type::ALL {
        let class = ClassObject {
            name: kind.name_id(),
            attrs: Dict::new(),
            bases: Vec::new(),
            mro: Vec::new(),
            native: Some(kind),
        };
        let id = vm.heap.allocate(HeapData::Class(class));
        // Class descriptors live for the rest of the process; pinning them
        // is what makes their reference cycles safe.
        vm.heap.pin(id);
        vm.classes.insert(kind, id);
    }
}

fn link_trivial_mros(vm: &mut Vm) {
    let object_id = vm.class_id(Type::Object);
    for kind in Type::ALL {
        let class_id = vm.class_id(kind);
        let (bases, mro) = if kind == Type::Object {
            (Vec::new(), vec![object_id])
        } else {
            (vec![object_id], vec![class_id, object_id])
        };
        for &entry in bases.iter().chain(&mro) {
            vm.heap.inc_ref(entry);
        }
        let HeapData::Class(class) = vm.heap.get_mut(class_id) else {
            unreachable!("registry holds classes");
        };
        class.bases = bases;
        class.mro = mro;
    }
}

/// `__name__`, `__class__`, and the IIFE introspection attributes present
/// on every class.
fn configure_basic_attributes(vm: &mut Vm, class_id: HeapId) {
    let name = {
        let HeapData::Class(class) = vm.heap.get(class_id) else {
            unreachable!("registry holds classes");
        };
        class.name
    };
    vm.class_attr_insert(class_id, StaticStrings::DunderName.id(), Value::Str(name));
    vm.heap.inc_ref(class_id);
    vm.class_attr_insert(class_id, StaticStrings::DunderClass.id(), Value::Ref(class_id));
    for (attr, builtin) in [
        (StaticStrings::DunderBases, Builtin::ClassBases),
        (StaticStrings::DunderMro, Builtin::ClassMro),
        (StaticStrings::DunderDict, Builtin::ClassDict),
    ] {
        let iife = vm.heap.allocate(HeapData::Iife(Iife {
            func: Value::Builtin(builtin),
        }));
        vm.class_attr_insert(class_id, attr.id(), Value::Ref(iife));
    }
}

fn install_method_tables(vm: &mut Vm) {
    let methods: &[(Type, StaticStrings, Builtin)] = &[
        (Type::List, StaticStrings::Append, Builtin::ListAppend),
        (Type::List, StaticStrings::Pop, Builtin::ListPop),
        (Type::Dict, StaticStrings::Get, Builtin::DictGet),
        (Type::Dict, StaticStrings::Keys, Builtin::DictKeys),
        (Type::Dict, StaticStrings::Values, Builtin::DictValues),
        (Type::Str, StaticStrings::Upper, Builtin::StrUpper),
        (Type::Str, StaticStrings::Lower, Builtin::StrLower),
        (Type::Str, StaticStrings::Join, Builtin::StrJoin),
        (Type::Str, StaticStrings::Split, Builtin::StrSplit),
        (Type::Generator, StaticStrings::Send, Builtin::GenSend),
        (Type::Promise, StaticStrings::Then, Builtin::PromiseThen),
        (Type::Promise, StaticStrings::Catch, Builtin::PromiseCatch),
        (Type::Promise, StaticStrings::Resolve, Builtin::PromiseResolve),
        (Type::Promise, StaticStrings::Reject, Builtin::PromiseReject),
    ];
    for &(kind, name, builtin) in methods {
        let class_id = vm.class_id(kind);
        vm.class_attr_insert(class_id, name.id(), Value::Builtin(builtin));
    }

    // `generator.done` is an IIFE attribute: reading it through an instance
    // invokes it with the generator and yields a bool.
    let done = vm.heap.allocate(HeapData::Iife(Iife {
        func: Value::Builtin(Builtin::GenDone),
    }));
    let generator_class = vm.class_id(Type::Generator);
    vm.class_attr_insert(generator_class, StaticStrings::Done.id(), Value::Ref(done));
}

fn install_builtins(vm: &mut Vm) {
    let functions: &[(StaticStrings, Builtin)] = &[
        (StaticStrings::Print, Builtin::Print),
        (StaticStrings::Len, Builtin::Len),
        (StaticStrings::Next, Builtin::Next),
        (StaticStrings::Iter, Builtin::Iter),
        (StaticStrings::Range, Builtin::Range),
        (StaticStrings::Type, Builtin::Type),
        (StaticStrings::Id, Builtin::Id),
        (StaticStrings::Hash, Builtin::Hash),
        (StaticStrings::Str, Builtin::Str),
        (StaticStrings::Repr, Builtin::Repr),
        (StaticStrings::Bool, Builtin::Bool),
        (StaticStrings::Input, Builtin::Input),
        (StaticStrings::List, Builtin::List),
        (StaticStrings::Reversed, Builtin::Reversed),
        (StaticStrings::DunderBuildClass, Builtin::BuildClass),
    ];

    let mut builtins = Dict::new();
    for &(name, builtin) in functions {
        builtins.insert(
            Value::Str(name.id()),
            Value::Builtin(builtin),
            &mut vm.heap,
            &vm.interns,
        );
    }
    builtins.insert(
        Value::Str(StaticStrings::NoneName.id()),
        Value::None,
        &mut vm.heap,
        &vm.interns,
    );
    builtins.insert(
        Value::Str(StaticStrings::TrueName.id()),
        Value::Bool(true),
        &mut vm.heap,
        &vm.interns,
    );
    builtins.insert(
        Value::Str(StaticStrings::FalseName.id()),
        Value::Bool(false),
        &mut vm.heap,
        &vm.interns,
    );

    let promise_class = vm.class_id(Type::Promise);
    vm.heap.inc_ref(promise_class);
    builtins.insert(
        Value::Str(StaticStrings::PromiseName.id()),
        Value::Ref(promise_class),
        &mut vm.heap,
        &vm.interns,
    );

    vm.builtins = builtins;
}
