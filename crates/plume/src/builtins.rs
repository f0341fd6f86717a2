//! Native functions: the builtins table and native method tables.
//!
//! Every native callable is a variant of `Builtin`, dispatched through
//! `call_builtin`. Variants cover the global builtins (`print`, `len`,
//! `range`, ...), the methods installed on native classes (`list.append`,
//! `promise.then`, ...), and the IIFE class attributes (`__mro__`,
//! `generator.done`).

use strum::IntoStaticStr;

use crate::{
    event_bus::EventKind,
    exception::{ExcType, RunError, RunResult},
    heap::{HeapData, HeapId},
    intern::StaticStrings,
    types::{Dict, Iter, List, Promise, PromiseState},
    value::Value,
    vm::Vm,
};

/// Identifier of a native function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum Builtin {
    Print,
    Len,
    Next,
    Iter,
    Range,
    Type,
    Id,
    Hash,
    Str,
    Repr,
    Bool,
    Input,
    List,
    Reversed,
    #[strum(serialize = "__build_class__")]
    BuildClass,

    // list methods
    #[strum(serialize = "append")]
    ListAppend,
    #[strum(serialize = "pop")]
    ListPop,

    // dict methods
    #[strum(serialize = "get")]
    DictGet,
    #[strum(serialize = "keys")]
    DictKeys,
    #[strum(serialize = "values")]
    DictValues,

    // str methods
    #[strum(serialize = "upper")]
    StrUpper,
    #[strum(serialize = "lower")]
    StrLower,
    #[strum(serialize = "join")]
    StrJoin,
    #[strum(serialize = "split")]
    StrSplit,

    // generator methods
    #[strum(serialize = "send")]
    GenSend,
    #[strum(serialize = "done")]
    GenDone,

    // promise methods
    #[strum(serialize = "then")]
    PromiseThen,
    #[strum(serialize = "catch")]
    PromiseCatch,
    #[strum(serialize = "resolve")]
    PromiseResolve,
    #[strum(serialize = "reject")]
    PromiseReject,

    // class introspection (installed as IIFE attributes)
    #[strum(serialize = "__bases__")]
    ClassBases,
    #[strum(serialize = "__mro__")]
    ClassMro,
    #[strum(serialize = "__dict__")]
    ClassDict,
}

impl Builtin {
    /// The surface-level name, used in reprs and error messages.
    #[must_use]
    pub fn name(self) -> &'static str {
        self.into()
    }
}

/// Dispatches a native function call, consuming the arguments.
pub(crate) fn call_builtin(vm: &mut Vm, builtin: Builtin, args: Vec<Value>) -> RunResult<Value> {
    match builtin {
        Builtin::Print => builtin_print(vm, args),
        Builtin::Len => builtin_len(vm, args),
        Builtin::Next => {
            let [arg] = take_exact(vm, "next", args)?;
            let result = vm.iter_next_value(&arg);
            arg.drop_with_heap(&mut vm.heap);
            result
        }
        Builtin::Iter => {
            let [arg] = take_exact(vm, "iter", args)?;
            vm.get_iter(arg)
        }
        Builtin::Range => builtin_range(vm, args),
        Builtin::Type => {
            let [arg] = take_exact(vm, "type", args)?;
            let class_id = vm.class_of(&arg);
            vm.heap.inc_ref(class_id);
            arg.drop_with_heap(&mut vm.heap);
            Ok(Value::Ref(class_id))
        }
        Builtin::Id => {
            let [arg] = take_exact(vm, "id", args)?;
            let identity = value_identity(&arg);
            arg.drop_with_heap(&mut vm.heap);
            Ok(Value::Int(identity))
        }
        Builtin::Hash => builtin_hash(vm, args),
        Builtin::Str => {
            let [arg] = take_exact(vm, "str", args)?;
            let text = vm.value_str(&arg);
            arg.drop_with_heap(&mut vm.heap);
            Ok(vm.str_value(&text?))
        }
        Builtin::Repr => {
            let [arg] = take_exact(vm, "repr", args)?;
            let text = vm.value_repr(&arg);
            arg.drop_with_heap(&mut vm.heap);
            Ok(vm.str_value(&text?))
        }
        Builtin::Bool => {
            let [arg] = take_exact(vm, "bool", args)?;
            let truthy = vm.truthy(&arg);
            arg.drop_with_heap(&mut vm.heap);
            Ok(Value::Bool(truthy?))
        }
        Builtin::Input => builtin_input(vm, args),
        Builtin::List => builtin_list(vm, args),
        Builtin::Reversed => builtin_reversed(vm, args),
        Builtin::BuildClass => builtin_build_class(vm, args),

        Builtin::ListAppend => {
            let [target, item] = take_exact(vm, "append", args)?;
            let Some(list_id) = as_heap_kind(vm, &target, |data| matches!(data, HeapData::List(_))) else {
                return wrong_receiver(vm, "append", "list", target, vec![item]);
            };
            let HeapData::List(list) = vm.heap.get_mut(list_id) else {
                unreachable!("checked above");
            };
            list.push(item);
            target.drop_with_heap(&mut vm.heap);
            Ok(Value::None)
        }
        Builtin::ListPop => {
            let [target] = take_exact(vm, "pop", args)?;
            let Some(list_id) = as_heap_kind(vm, &target, |data| matches!(data, HeapData::List(_))) else {
                return wrong_receiver(vm, "pop", "list", target, vec![]);
            };
            let HeapData::List(list) = vm.heap.get_mut(list_id) else {
                unreachable!("checked above");
            };
            let popped = list.pop();
            target.drop_with_heap(&mut vm.heap);
            popped.ok_or_else(|| ExcType::index_error("pop from empty list"))
        }

        Builtin::DictGet => builtin_dict_get(vm, args),
        Builtin::DictKeys => builtin_dict_keys(vm, args, true),
        Builtin::DictValues => builtin_dict_keys(vm, args, false),

        Builtin::StrUpper | Builtin::StrLower => {
            let name = builtin.name();
            let [target] = take_exact(vm, name, args)?;
            let Value::Str(s) = &target else {
                return wrong_receiver(vm, name, "str", target, vec![]);
            };
            let text = vm.interns.get(*s);
            let transformed = if builtin == Builtin::StrUpper {
                text.to_uppercase()
            } else {
                text.to_lowercase()
            };
            Ok(vm.str_value(&transformed))
        }
        Builtin::StrJoin => builtin_str_join(vm, args),
        Builtin::StrSplit => builtin_str_split(vm, args),

        Builtin::GenSend => {
            let [target, value] = take_exact(vm, "send", args)?;
            let Some(gen_id) = as_heap_kind(vm, &target, |data| matches!(data, HeapData::Generator(_))) else {
                return wrong_receiver(vm, "send", "generator", target, vec![value]);
            };
            let result = vm.gen_send(gen_id, value);
            target.drop_with_heap(&mut vm.heap);
            result
        }
        Builtin::GenDone => {
            let [target] = take_exact(vm, "done", args)?;
            let Some(gen_id) = as_heap_kind(vm, &target, |data| matches!(data, HeapData::Generator(_))) else {
                return wrong_receiver(vm, "done", "generator", target, vec![]);
            };
            let HeapData::Generator(generator) = vm.heap.get(gen_id) else {
                unreachable!("checked above");
            };
            let exhausted = generator.exhausted;
            target.drop_with_heap(&mut vm.heap);
            Ok(Value::Bool(exhausted))
        }

        Builtin::PromiseThen | Builtin::PromiseCatch => {
            let name = builtin.name();
            let [target, handler] = take_exact(vm, name, args)?;
            let Some(promise_id) = as_heap_kind(vm, &target, |data| matches!(data, HeapData::Promise(_))) else {
                return wrong_receiver(vm, name, "promise", target, vec![handler]);
            };
            let downstream = if builtin == Builtin::PromiseThen {
                vm.promise_then(promise_id, handler)
            } else {
                vm.promise_catch(promise_id, handler)
            };
            target.drop_with_heap(&mut vm.heap);
            Ok(downstream)
        }
        Builtin::PromiseResolve => {
            let [value] = take_exact(vm, "resolve", args)?;
            if as_heap_kind(vm, &value, |data| matches!(data, HeapData::Promise(_))).is_some() {
                return Ok(value);
            }
            let id = vm
                .heap
                .allocate(HeapData::Promise(Promise::settled(PromiseState::Fulfilled, value)));
            Ok(Value::Ref(id))
        }
        Builtin::PromiseReject => {
            let [reason] = take_exact(vm, "reject", args)?;
            let id = vm
                .heap
                .allocate(HeapData::Promise(Promise::settled(PromiseState::Rejected, reason)));
            Ok(Value::Ref(id))
        }

        Builtin::ClassBases | Builtin::ClassMro => {
            let [target] = take_exact(vm, builtin.name(), args)?;
            let class_id = owning_class(vm, &target);
            let ids: Vec<HeapId> = {
                let HeapData::Class(class) = vm.heap.get(class_id) else {
                    target.drop_with_heap(&mut vm.heap);
                    return Err(ExcType::internal("class registry slot does not hold a class"));
                };
                if builtin == Builtin::ClassBases {
                    class.bases.clone()
                } else {
                    class.mro.clone()
                }
            };
            let mut values = Vec::with_capacity(ids.len());
            for id in ids {
                vm.heap.inc_ref(id);
                values.push(Value::Ref(id));
            }
            let list_id = vm.heap.allocate(HeapData::List(List::from_values(values)));
            target.drop_with_heap(&mut vm.heap);
            Ok(Value::Ref(list_id))
        }
        Builtin::ClassDict => builtin_class_dict(vm, args),
    }
}

/// Consumes args into a fixed-size array, or raises the conventional
/// arity `TypeError` (releasing the arguments).
fn take_exact<const N: usize>(vm: &mut Vm, name: &str, args: Vec<Value>) -> RunResult<[Value; N]> {
    match <[Value; N]>::try_from(args) {
        Ok(array) => Ok(array),
        Err(args) => Err(arity_error(vm, name, &format!("exactly {N}"), args)),
    }
}

fn arity_error(vm: &mut Vm, name: &str, expected: &str, args: Vec<Value>) -> RunError {
    let given = args.len();
    for arg in args {
        arg.drop_with_heap(&mut vm.heap);
    }
    ExcType::type_error(format!("{name}() takes {expected} arguments ({given} given)"))
}

/// Reads the heap id behind a value when its data matches `want`.
fn as_heap_kind(vm: &Vm, value: &Value, want: impl Fn(&HeapData) -> bool) -> Option<HeapId> {
    match value {
        Value::Ref(id) if want(vm.heap.get(*id)) => Some(*id),
        _ => None,
    }
}

fn wrong_receiver(
    vm: &mut Vm,
    name: &str,
    expected: &str,
    target: Value,
    rest: Vec<Value>,
) -> RunResult<Value> {
    let message = format!(
        "{name}() requires a {expected}, not '{}'",
        vm.type_name(&target)
    );
    target.drop_with_heap(&mut vm.heap);
    for value in rest {
        value.drop_with_heap(&mut vm.heap);
    }
    Err(ExcType::type_error(message))
}

fn owning_class(vm: &Vm, value: &Value) -> HeapId {
    if let Value::Ref(id) = value
        && matches!(vm.heap.get(*id), HeapData::Class(_))
    {
        return *id;
    }
    vm.class_of(value)
}

fn value_identity(value: &Value) -> i64 {
    match value {
        Value::None => -1,
        Value::StopIteration => -2,
        Value::Bool(b) => i64::from(*b),
        Value::Int(i) => *i,
        Value::Float(f) => f.to_bits() as i64,
        Value::Str(s) => s.index() as i64,
        Value::Builtin(b) => *b as i64,
        Value::Ref(id) => id.index() as i64,
    }
}

fn builtin_print(vm: &mut Vm, args: Vec<Value>) -> RunResult<Value> {
    if args.is_empty() {
        return Ok(Value::None);
    }
    let mut line = String::new();
    let mut failure = None;
    for (i, arg) in args.iter().enumerate() {
        if failure.is_some() {
            break;
        }
        if i > 0 {
            line.push(' ');
        }
        match vm.value_str(arg) {
            Ok(text) => line.push_str(&text),
            Err(err) => failure = Some(err),
        }
    }
    for arg in args {
        arg.drop_with_heap(&mut vm.heap);
    }
    if let Some(err) = failure {
        return Err(err);
    }
    vm.publish(EventKind::LogInfo, &line);
    Ok(Value::None)
}

fn builtin_len(vm: &mut Vm, args: Vec<Value>) -> RunResult<Value> {
    let [arg] = take_exact(vm, "len", args)?;
    if let Some(length) = arg.native_len(&vm.heap, &vm.interns) {
        arg.drop_with_heap(&mut vm.heap);
        return Ok(Value::Int(length as i64));
    }
    if let Some(result) = vm.call_optional_dunder_nullary(&arg, StaticStrings::DunderLen)? {
        let length = result.as_index(&vm.heap);
        result.drop_with_heap(&mut vm.heap);
        arg.drop_with_heap(&mut vm.heap);
        return match length {
            Some(n) => Ok(Value::Int(n)),
            None => Err(ExcType::type_error("__len__ should return an integer")),
        };
    }
    let message = format!("object of type '{}' has no len()", vm.type_name(&arg));
    arg.drop_with_heap(&mut vm.heap);
    Err(ExcType::type_error(message))
}

fn builtin_hash(vm: &mut Vm, args: Vec<Value>) -> RunResult<Value> {
    let [arg] = take_exact(vm, "hash", args)?;
    if let Some(hash) = arg.content_hash(&vm.heap, &vm.interns) {
        arg.drop_with_heap(&mut vm.heap);
        return Ok(Value::Int(hash as i64));
    }
    if let Value::Ref(id) = &arg {
        match vm.heap.get(*id) {
            HeapData::Instance(instance) => {
                // Identity hash, computed at most once and immutable after.
                let hash = match instance.hash.get() {
                    Some(hash) => hash,
                    None => {
                        let hash = crate::py_hash::hash_int(id.index() as i64);
                        instance.hash.set(Some(hash));
                        hash
                    }
                };
                arg.drop_with_heap(&mut vm.heap);
                return Ok(Value::Int(hash as i64));
            }
            HeapData::List(_) | HeapData::Dict(_) => {
                let message = format!("unhashable type: '{}'", vm.type_name(&arg));
                arg.drop_with_heap(&mut vm.heap);
                return Err(ExcType::type_error(message));
            }
            _ => {
                let hash = crate::py_hash::hash_int(id.index() as i64);
                arg.drop_with_heap(&mut vm.heap);
                return Ok(Value::Int(hash as i64));
            }
        }
    }
    arg.drop_with_heap(&mut vm.heap);
    Ok(Value::Int(0))
}

fn builtin_range(vm: &mut Vm, args: Vec<Value>) -> RunResult<Value> {
    if args.is_empty() || args.len() > 3 {
        return Err(arity_error(vm, "range", "1 to 3", args));
    }
    let mut bounds = Vec::with_capacity(args.len());
    for arg in &args {
        match arg.as_index(&vm.heap) {
            Some(value) => bounds.push(value),
            None => {
                let message = format!("range() argument must be an integer, not '{}'", vm.type_name(arg));
                for arg in args {
                    arg.drop_with_heap(&mut vm.heap);
                }
                return Err(ExcType::type_error(message));
            }
        }
    }
    for arg in args {
        arg.drop_with_heap(&mut vm.heap);
    }
    let (start, stop, step) = match bounds.as_slice() {
        [stop] => (0, *stop, 1),
        [start, stop] => (*start, *stop, 1),
        [start, stop, step] => (*start, *stop, *step),
        _ => unreachable!("length checked"),
    };
    if step == 0 {
        return Err(ExcType::value_error("range() arg 3 must not be zero"));
    }
    let id = vm.heap.allocate(HeapData::Iter(Iter::Range {
        current: start,
        stop,
        step,
    }));
    Ok(Value::Ref(id))
}

fn builtin_input(vm: &mut Vm, args: Vec<Value>) -> RunResult<Value> {
    if args.len() > 1 {
        return Err(arity_error(vm, "input", "at most 1", args));
    }
    if let Some(prompt) = args.first() {
        let text = vm.value_str(prompt)?;
        vm.publish(EventKind::LogInfo, &text);
    }
    for arg in args {
        arg.drop_with_heap(&mut vm.heap);
    }
    let promise_id = vm.heap.allocate(HeapData::Promise(Promise::pending(Value::None)));
    vm.register_input_waiter(promise_id);
    Ok(Value::Ref(promise_id))
}

fn builtin_list(vm: &mut Vm, mut args: Vec<Value>) -> RunResult<Value> {
    if args.len() > 1 {
        return Err(arity_error(vm, "list", "at most 1", args));
    }
    let Some(source) = args.pop() else {
        let id = vm.heap.allocate(HeapData::List(List::new()));
        return Ok(Value::Ref(id));
    };
    let iterator = vm.get_iter(source)?;
    let mut values: Vec<Value> = Vec::new();
    loop {
        let next = match vm.iter_next_value(&iterator) {
            Ok(next) => next,
            Err(err) => {
                for value in values {
                    value.drop_with_heap(&mut vm.heap);
                }
                iterator.drop_with_heap(&mut vm.heap);
                return Err(err);
            }
        };
        if matches!(next, Value::StopIteration) {
            break;
        }
        values.push(next);
    }
    iterator.drop_with_heap(&mut vm.heap);
    let id = vm.heap.allocate(HeapData::List(List::from_values(values)));
    Ok(Value::Ref(id))
}

fn builtin_reversed(vm: &mut Vm, args: Vec<Value>) -> RunResult<Value> {
    let [source] = take_exact(vm, "reversed", args)?;
    if let Some(list_id) = as_heap_kind(vm, &source, |data| matches!(data, HeapData::List(_))) {
        let HeapData::List(list) = vm.heap.get(list_id) else {
            unreachable!("checked above");
        };
        let remaining = list.len();
        // The popped reference moves into the cursor.
        let id = vm.heap.allocate(HeapData::Iter(Iter::ListReverse {
            list: list_id,
            remaining,
        }));
        return Ok(Value::Ref(id));
    }
    if source.is_instance(&vm.heap) {
        return vm.call_required_dunder(source, StaticStrings::DunderReversed, vec![], "reversed");
    }
    wrong_receiver(vm, "reversed", "list", source, vec![])
}

fn builtin_build_class(vm: &mut Vm, mut args: Vec<Value>) -> RunResult<Value> {
    match args.len() {
        3 => {
            let bases = args.pop().expect("length checked");
            let name = args.pop().expect("length checked");
            let body = args.pop().expect("length checked");
            vm.build_class(body, name, bases)
        }
        2 => {
            let name = args.pop().expect("length checked");
            let body = args.pop().expect("length checked");
            let bases = Value::Ref(vm.heap.allocate(HeapData::List(List::new())));
            vm.build_class(body, name, bases)
        }
        _ => Err(arity_error(vm, "__build_class__", "2 or 3", args)),
    }
}

fn builtin_dict_get(vm: &mut Vm, mut args: Vec<Value>) -> RunResult<Value> {
    if args.len() < 2 || args.len() > 3 {
        return Err(arity_error(vm, "get", "2 or 3", args));
    }
    let default = if args.len() == 3 { args.pop() } else { None };
    let key = args.pop().expect("length checked");
    let target = args.pop().expect("length checked");
    let Some(dict_id) = as_heap_kind(vm, &target, |data| matches!(data, HeapData::Dict(_))) else {
        let mut rest = vec![key];
        rest.extend(default);
        return wrong_receiver(vm, "get", "dict", target, rest);
    };
    let HeapData::Dict(dict) = vm.heap.get(dict_id) else {
        unreachable!("checked above");
    };
    let found = dict
        .get(&key, &vm.heap, &vm.interns)
        .map(|v| v.clone_with_heap(&vm.heap));
    target.drop_with_heap(&mut vm.heap);
    key.drop_with_heap(&mut vm.heap);
    match found {
        Some(value) => {
            if let Some(default) = default {
                default.drop_with_heap(&mut vm.heap);
            }
            Ok(value)
        }
        None => Ok(default.unwrap_or(Value::None)),
    }
}

fn builtin_dict_keys(vm: &mut Vm, args: Vec<Value>, keys: bool) -> RunResult<Value> {
    let name = if keys { "keys" } else { "values" };
    let [target] = take_exact(vm, name, args)?;
    let Some(dict_id) = as_heap_kind(vm, &target, |data| matches!(data, HeapData::Dict(_))) else {
        return wrong_receiver(vm, name, "dict", target, vec![]);
    };
    let HeapData::Dict(dict) = vm.heap.get(dict_id) else {
        unreachable!("checked above");
    };
    let values: Vec<Value> = dict
        .entries()
        .iter()
        .map(|(k, v)| {
            let chosen = if keys { k } else { v };
            chosen.clone_with_heap(&vm.heap)
        })
        .collect();
    target.drop_with_heap(&mut vm.heap);
    let id = vm.heap.allocate(HeapData::List(List::from_values(values)));
    Ok(Value::Ref(id))
}

fn builtin_str_join(vm: &mut Vm, args: Vec<Value>) -> RunResult<Value> {
    let [separator, iterable] = take_exact(vm, "join", args)?;
    let Value::Str(sep_id) = &separator else {
        return wrong_receiver(vm, "join", "str", separator, vec![iterable]);
    };
    let sep = vm.interns.get(*sep_id).to_owned();
    let iterator = vm.get_iter(iterable)?;
    let mut parts: Vec<String> = Vec::new();
    loop {
        let next = match vm.iter_next_value(&iterator) {
            Ok(next) => next,
            Err(err) => {
                iterator.drop_with_heap(&mut vm.heap);
                return Err(err);
            }
        };
        if matches!(next, Value::StopIteration) {
            break;
        }
        let Value::Str(part) = &next else {
            let message = format!("join() requires strings, found '{}'", vm.type_name(&next));
            next.drop_with_heap(&mut vm.heap);
            iterator.drop_with_heap(&mut vm.heap);
            return Err(ExcType::type_error(message));
        };
        parts.push(vm.interns.get(*part).to_owned());
    }
    iterator.drop_with_heap(&mut vm.heap);
    Ok(vm.str_value(&parts.join(&sep)))
}

fn builtin_str_split(vm: &mut Vm, mut args: Vec<Value>) -> RunResult<Value> {
    if args.is_empty() || args.len() > 2 {
        return Err(arity_error(vm, "split", "1 or 2", args));
    }
    let separator = if args.len() == 2 { args.pop() } else { None };
    let target = args.pop().expect("length checked");
    let Value::Str(text_id) = &target else {
        let rest = separator.into_iter().collect();
        return wrong_receiver(vm, "split", "str", target, rest);
    };
    let text = vm.interns.get(*text_id).to_owned();
    let parts: Vec<String> = match &separator {
        None | Some(Value::None) => text.split_whitespace().map(str::to_owned).collect(),
        Some(Value::Str(sep_id)) => {
            let sep = vm.interns.get(*sep_id).to_owned();
            if sep.is_empty() {
                return Err(ExcType::value_error("empty separator"));
            }
            text.split(&sep).map(str::to_owned).collect()
        }
        Some(other) => {
            let message = format!("split() separator must be a string, not '{}'", vm.type_name(other));
            return Err(ExcType::type_error(message));
        }
    };
    if let Some(separator) = separator {
        separator.drop_with_heap(&mut vm.heap);
    }
    let values: Vec<Value> = parts.iter().map(|part| vm.str_value(part)).collect();
    let id = vm.heap.allocate(HeapData::List(List::from_values(values)));
    Ok(Value::Ref(id))
}

fn builtin_class_dict(vm: &mut Vm, args: Vec<Value>) -> RunResult<Value> {
    let [target] = take_exact(vm, "__dict__", args)?;

    // Instances expose their attribute table merged with the method cache;
    // classes expose their attribute table.
    let pairs: Vec<(Value, Value)> = match &target {
        Value::Ref(id) => match vm.heap.get(*id) {
            HeapData::Instance(instance) => instance
                .attrs
                .entries()
                .iter()
                .chain(instance.method_cache.entries())
                .map(|(k, v)| (k.clone_with_heap(&vm.heap), v.clone_with_heap(&vm.heap)))
                .collect(),
            HeapData::Class(class) => class
                .attrs
                .entries()
                .iter()
                .map(|(k, v)| (k.clone_with_heap(&vm.heap), v.clone_with_heap(&vm.heap)))
                .collect(),
            _ => Vec::new(),
        },
        _ => Vec::new(),
    };
    target.drop_with_heap(&mut vm.heap);

    let mut dict = Dict::new();
    for (key, value) in pairs {
        dict.insert(key, value, &mut vm.heap, &vm.interns);
    }
    let id = vm.heap.allocate(HeapData::Dict(dict));
    Ok(Value::Ref(id))
}
