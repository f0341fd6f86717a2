//! `str`/`repr` rendering.
//!
//! Native kinds render directly; user instances consult `__str__` /
//! `__repr__` through the usual lookup machinery and fall back to the
//! `<Name object at 0x...>` form.

use std::fmt::Write;

use crate::{
    exception::RunResult,
    heap::{HeapData, HeapId},
    intern::StaticStrings,
    value::{Value, format_float},
};

use super::Vm;

impl Vm {
    /// Display form, as `print` shows it: strings render bare.
    pub fn value_str(&mut self, value: &Value) -> RunResult<String> {
        if let Value::Str(s) = value {
            return Ok(self.interns.get(*s).to_owned());
        }
        if value.is_instance(&self.heap) {
            if let Some(result) = self.call_optional_dunder_nullary(value, StaticStrings::DunderStr)? {
                return self.rendered_to_string(result);
            }
        }
        self.value_repr(value)
    }

    /// Canonical form, as the REPL would show it: strings render quoted.
    pub fn value_repr(&mut self, value: &Value) -> RunResult<String> {
        let rendered = match value {
            Value::None => "None".to_owned(),
            Value::Bool(true) => "True".to_owned(),
            Value::Bool(false) => "False".to_owned(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => format_float(*f),
            Value::Str(s) => quote_str(self.interns.get(*s)),
            Value::StopIteration => "StopIteration".to_owned(),
            Value::Builtin(b) => format!("<native function {}>", b.name()),
            Value::Ref(id) => return self.repr_heap(*id, value),
        };
        Ok(rendered)
    }

    fn repr_heap(&mut self, id: HeapId, value: &Value) -> RunResult<String> {
        match self.heap.get(id) {
            HeapData::LongInt(li) => Ok(li.inner().to_string()),
            HeapData::Bytes(bytes) => Ok(bytes.repr()),
            HeapData::List(list) => {
                let items: Vec<Value> = list
                    .as_slice()
                    .iter()
                    .map(|v| v.clone_with_heap(&self.heap))
                    .collect();
                let mut out = String::from("[");
                let mut result = Ok(());
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    match self.value_repr(item) {
                        Ok(text) => out.push_str(&text),
                        Err(err) => {
                            result = Err(err);
                            break;
                        }
                    }
                }
                for item in items {
                    item.drop_with_heap(&mut self.heap);
                }
                result?;
                out.push(']');
                Ok(out)
            }
            HeapData::Dict(dict) => {
                let pairs: Vec<(Value, Value)> = dict
                    .entries()
                    .iter()
                    .map(|(k, v)| (k.clone_with_heap(&self.heap), v.clone_with_heap(&self.heap)))
                    .collect();
                let mut out = String::from("{");
                let mut result = Ok(());
                for (i, (key, val)) in pairs.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    match (self.value_repr(key), self.value_repr(val)) {
                        (Ok(k), Ok(v)) => {
                            let _ = write!(out, "{k}: {v}");
                        }
                        (Err(err), _) | (_, Err(err)) => {
                            result = Err(err);
                            break;
                        }
                    }
                }
                for (key, val) in pairs {
                    key.drop_with_heap(&mut self.heap);
                    val.drop_with_heap(&mut self.heap);
                }
                result?;
                out.push('}');
                Ok(out)
            }
            HeapData::Slice(slice) => {
                let start = slice.start.shallow_copy();
                let stop = slice.stop.shallow_copy();
                let step = slice.step.shallow_copy();
                let start = self.value_repr(&start)?;
                let stop = self.value_repr(&stop)?;
                let step = self.value_repr(&step)?;
                Ok(format!("slice({start}, {stop}, {step})"))
            }
            HeapData::Code(code) => Ok(format!("<code object {}>", self.interns.get(code.name))),
            HeapData::Function(function) => Ok(format!("<function {}>", self.interns.get(function.name))),
            HeapData::NativeClosure(_) => Ok("<native function>".to_owned()),
            HeapData::Iife(_) => Ok("<iife attribute>".to_owned()),
            HeapData::Method(_) => Ok("<bound method>".to_owned()),
            HeapData::Class(class) => Ok(format!("<class '{}'>", self.interns.get(class.name))),
            HeapData::Generator(_) => Ok(format!("<generator object at {:#x}>", id.index())),
            HeapData::Iter(_) => Ok(format!("<iterator object at {:#x}>", id.index())),
            HeapData::Promise(_) => Ok(format!("<promise object at {:#x}>", id.index())),
            HeapData::Instance(_) => {
                if let Some(result) = self.call_optional_dunder_nullary(value, StaticStrings::DunderRepr)? {
                    return self.rendered_to_string(result);
                }
                let name = self.type_name(value);
                Ok(format!("<{name} object at {:#x}>", id.index()))
            }
        }
    }

    /// Converts a dunder's return value to a host string, releasing it.
    fn rendered_to_string(&mut self, result: Value) -> RunResult<String> {
        let text = match &result {
            Value::Str(s) => Ok(self.interns.get(*s).to_owned()),
            _ => Err(crate::exception::ExcType::type_error("__str__ returned non-string")),
        };
        result.drop_with_heap(&mut self.heap);
        text
    }
}

/// Single-quoted string form with minimal escaping.
fn quote_str(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('\'');
    for ch in text.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(ch),
        }
    }
    out.push('\'');
    out
}
