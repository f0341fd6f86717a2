//! Attribute lookup, method binding, and attribute assignment.
//!
//! Lookup for `obj.attr`:
//! 1. For non-native classes that define `__getattr__` anywhere in the MRO,
//!    delegate to it.
//! 2. The instance attribute table (IIFE values are invoked with the owner).
//! 3. The instance method cache, wrapping hits into bound methods.
//! 4. The MRO walk over class attribute tables; hits are cached on the
//!    instance (method cache for callables, attribute table for data and
//!    IIFE results) and callables come back bound.
//! 5. Miss: `None`; callers turn this into `AttributeError`.

use crate::{
    exception::RunResult,
    heap::{HeapData, HeapId},
    intern::{StaticStrings, StringId},
    types::{Iife, Method},
    value::Value,
};

use super::Vm;

/// Which instance-side table a cached value belongs in.
enum CacheSide {
    Attrs,
    Methods,
}

impl Vm {
    /// Looks up `name` on `obj` per the algorithm above. `Ok(None)` is an
    /// attribute miss.
    pub(crate) fn get_attr(&mut self, obj: &Value, name: StringId) -> RunResult<Option<Value>> {
        let class_id = self.class_of(obj);

        // Step 1: __getattr__ preemption for user-defined classes.
        let class_is_native = match self.heap.get(class_id) {
            HeapData::Class(class) => class.is_native(),
            _ => true,
        };
        if !class_is_native
            && name != StaticStrings::DunderGetattr.id()
            && let Some(hook) = self.mro_lookup(class_id, StaticStrings::DunderGetattr.id())
        {
            let owner = obj.clone_with_heap(&self.heap);
            let bound = self.bind_if_callable(owner, hook);
            let result = self.call_value(bound, vec![Value::Str(name)])?;
            return Ok(Some(result));
        }

        // Classes resolve attributes against their own MRO, unbound.
        if let Value::Ref(id) = obj
            && matches!(self.heap.get(*id), HeapData::Class(_))
        {
            return self.class_attr(*id, obj, name);
        }

        // Steps 2 and 3: instance tables.
        if let Value::Ref(id) = obj
            && matches!(self.heap.get(*id), HeapData::Instance(_))
        {
            if let Some(found) = self.instance_table_get(*id, name, CacheSide::Attrs) {
                if let Value::Ref(fid) = &found
                    && matches!(self.heap.get(*fid), HeapData::Iife(_))
                {
                    let result = self.invoke_iife(found, obj)?;
                    return Ok(Some(result));
                }
                return Ok(Some(found));
            }
            if let Some(cached) = self.instance_table_get(*id, name, CacheSide::Methods) {
                let owner = obj.clone_with_heap(&self.heap);
                return Ok(Some(self.make_bound_method(owner, cached)));
            }
        }

        // Step 4: the MRO walk.
        let Some(raw) = self.mro_lookup(class_id, name) else {
            return Ok(None);
        };

        if let Value::Ref(rid) = &raw
            && matches!(self.heap.get(*rid), HeapData::Iife(_))
        {
            let result = self.invoke_iife(raw, obj)?;
            if let Value::Ref(id) = obj
                && matches!(self.heap.get(*id), HeapData::Instance(_))
            {
                let cached = result.clone_with_heap(&self.heap);
                self.instance_table_insert(*id, name, cached, CacheSide::Attrs);
            }
            return Ok(Some(result));
        }

        if is_callable_attr(&raw, self) {
            if let Value::Ref(id) = obj
                && matches!(self.heap.get(*id), HeapData::Instance(_))
            {
                let cached = raw.clone_with_heap(&self.heap);
                self.instance_table_insert(*id, name, cached, CacheSide::Methods);
            }
            let owner = obj.clone_with_heap(&self.heap);
            return Ok(Some(self.make_bound_method(owner, raw)));
        }

        // Plain data attribute.
        if let Value::Ref(id) = obj
            && matches!(self.heap.get(*id), HeapData::Instance(_))
        {
            let cached = raw.clone_with_heap(&self.heap);
            self.instance_table_insert(*id, name, cached, CacheSide::Attrs);
        }
        Ok(Some(raw))
    }

    /// Attribute assignment: instances get entries in their attribute
    /// table (honoring `__setattr__` overrides), classes append to their
    /// attribute table, native values reject assignment.
    pub(crate) fn set_attr(&mut self, obj: Value, name: StringId, value: Value) -> RunResult<()> {
        if let Value::Ref(id) = &obj {
            let id = *id;
            match self.heap.get(id) {
                HeapData::Instance(instance) => {
                    let class_id = instance.class;
                    let class_is_native = match self.heap.get(class_id) {
                        HeapData::Class(class) => class.is_native(),
                        _ => true,
                    };
                    if !class_is_native
                        && let Some(hook) = self.mro_lookup(class_id, StaticStrings::DunderSetattr.id())
                    {
                        let owner = obj.clone_with_heap(&self.heap);
                        let bound = self.bind_if_callable(owner, hook);
                        let result = self.call_value(bound, vec![Value::Str(name), value]);
                        obj.drop_with_heap(&mut self.heap);
                        result?.drop_with_heap(&mut self.heap);
                        return Ok(());
                    }
                    self.instance_table_insert(id, name, value, CacheSide::Attrs);
                    self.heap.dec_ref(id);
                    return Ok(());
                }
                HeapData::Class(_) => {
                    self.class_attr_insert(id, name, value);
                    self.heap.dec_ref(id);
                    return Ok(());
                }
                _ => {}
            }
        }
        let type_name = self.type_name(&obj);
        let attr = self.interns.get(name).to_owned();
        value.drop_with_heap(&mut self.heap);
        obj.drop_with_heap(&mut self.heap);
        Err(crate::exception::ExcType::attribute_error(&type_name, &attr))
    }

    /// Walks a class's MRO looking up `name` in each attribute table,
    /// returning a cloned hit.
    pub(crate) fn mro_lookup(&self, class_id: HeapId, name: StringId) -> Option<Value> {
        let mro: Vec<HeapId> = match self.heap.get(class_id) {
            HeapData::Class(class) => class.mro.clone(),
            _ => return None,
        };
        for cid in mro {
            let HeapData::Class(class) = self.heap.get(cid) else {
                continue;
            };
            if let Some(found) = class.attrs.get_str(name, &self.heap, &self.interns) {
                return Some(found.clone_with_heap(&self.heap));
            }
        }
        None
    }

    /// Class-object attribute access: walk the class's own MRO; IIFE
    /// attributes are invoked with the class, callables come back raw.
    fn class_attr(&mut self, class_id: HeapId, obj: &Value, name: StringId) -> RunResult<Option<Value>> {
        let Some(raw) = self.mro_lookup(class_id, name) else {
            return Ok(None);
        };
        if let Value::Ref(rid) = &raw
            && matches!(self.heap.get(*rid), HeapData::Iife(_))
        {
            let result = self.invoke_iife(raw, obj)?;
            return Ok(Some(result));
        }
        Ok(Some(raw))
    }

    /// Invokes an IIFE attribute with `(owner)`, consuming the IIFE
    /// reference.
    fn invoke_iife(&mut self, iife: Value, owner: &Value) -> RunResult<Value> {
        let func = {
            let Value::Ref(id) = &iife else {
                unreachable!("caller matched an IIFE ref");
            };
            let HeapData::Iife(Iife { func }) = self.heap.get(*id) else {
                unreachable!("caller matched an IIFE ref");
            };
            func.clone_with_heap(&self.heap)
        };
        iife.drop_with_heap(&mut self.heap);
        let arg = owner.clone_with_heap(&self.heap);
        self.call_value(func, vec![arg])
    }

    /// Wraps `(owner, func)` into a bound-method value.
    pub(crate) fn make_bound_method(&mut self, owner: Value, func: Value) -> Value {
        let id = self.heap.allocate(HeapData::Method(Method { owner, func }));
        Value::Ref(id)
    }

    /// Binds `func` to `owner` when it is callable; otherwise releases the
    /// owner and returns `func` unchanged.
    fn bind_if_callable(&mut self, owner: Value, func: Value) -> Value {
        if is_callable_attr(&func, self) {
            self.make_bound_method(owner, func)
        } else {
            owner.drop_with_heap(&mut self.heap);
            func
        }
    }

    fn instance_table_get(&self, instance_id: HeapId, name: StringId, side: CacheSide) -> Option<Value> {
        let HeapData::Instance(instance) = self.heap.get(instance_id) else {
            return None;
        };
        let table = match side {
            CacheSide::Attrs => &instance.attrs,
            CacheSide::Methods => &instance.method_cache,
        };
        table
            .get_str(name, &self.heap, &self.interns)
            .map(|v| v.clone_with_heap(&self.heap))
    }

    fn instance_table_insert(&mut self, instance_id: HeapId, name: StringId, value: Value, side: CacheSide) {
        let mut table = {
            let HeapData::Instance(instance) = self.heap.get_mut(instance_id) else {
                value.drop_with_heap(&mut self.heap);
                return;
            };
            match side {
                CacheSide::Attrs => std::mem::take(&mut instance.attrs),
                CacheSide::Methods => std::mem::take(&mut instance.method_cache),
            }
        };
        table.insert(Value::Str(name), value, &mut self.heap, &self.interns);
        let HeapData::Instance(instance) = self.heap.get_mut(instance_id) else {
            unreachable!("instance vanished mid-insert");
        };
        match side {
            CacheSide::Attrs => instance.attrs = table,
            CacheSide::Methods => instance.method_cache = table,
        }
    }

    /// Inserts into a class's attribute table (class construction and
    /// user-level class attribute assignment; no deletion is exposed).
    pub(crate) fn class_attr_insert(&mut self, class_id: HeapId, name: StringId, value: Value) {
        let mut attrs = {
            let HeapData::Class(class) = self.heap.get_mut(class_id) else {
                value.drop_with_heap(&mut self.heap);
                return;
            };
            std::mem::take(&mut class.attrs)
        };
        attrs.insert(Value::Str(name), value, &mut self.heap, &self.interns);
        let HeapData::Class(class) = self.heap.get_mut(class_id) else {
            unreachable!("class vanished mid-insert");
        };
        class.attrs = attrs;
    }
}

/// True for the callable kinds that method binding applies to.
fn is_callable_attr(value: &Value, vm: &Vm) -> bool {
    match value {
        Value::Builtin(_) => true,
        Value::Ref(id) => matches!(
            vm.heap.get(*id),
            HeapData::Function(_) | HeapData::NativeClosure(_) | HeapData::Method(_)
        ),
        _ => false,
    }
}
