//! Binary, unary, comparison, subscript, and iteration dispatch.
//!
//! Native classes handle operand pairs directly; a user-defined left
//! operand falls back to the named dunder via attribute lookup. Equality
//! between handles of different native classes returns `False` without
//! raising; ordering between unsupported kinds is a `TypeError`.

use num_bigint::BigInt;
use num_integer::Integer as _;
use num_traits::{Signed, ToPrimitive, Zero};

use crate::{
    bytecode::{CompareOp, Opcode},
    exception::{ExcType, RunResult},
    heap::HeapData,
    intern::StaticStrings,
    types::{Iter, List},
    value::Value,
};

use super::Vm;

/// The binary operator set of the instruction table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinOp {
    Add,
    Sub,
    Mul,
    MatMul,
    TrueDiv,
    FloorDiv,
    Mod,
    Pow,
    And,
    Or,
    Xor,
    Lshift,
    Rshift,
}

impl BinOp {
    /// Maps a `BINARY_*` opcode to its operator.
    pub(crate) fn from_opcode(op: Opcode) -> Self {
        match op {
            Opcode::BinaryAdd => Self::Add,
            Opcode::BinarySubtract => Self::Sub,
            Opcode::BinaryMultiply => Self::Mul,
            Opcode::BinaryMatrixMultiply => Self::MatMul,
            Opcode::BinaryTrueDivide => Self::TrueDiv,
            Opcode::BinaryFloorDivide => Self::FloorDiv,
            Opcode::BinaryModulo => Self::Mod,
            Opcode::BinaryPower => Self::Pow,
            Opcode::BinaryAnd => Self::And,
            Opcode::BinaryOr => Self::Or,
            Opcode::BinaryXor => Self::Xor,
            Opcode::BinaryLshift => Self::Lshift,
            Opcode::BinaryRshift => Self::Rshift,
            _ => unreachable!("{op:?} is not a binary operator"),
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::MatMul => "@",
            Self::TrueDiv => "/",
            Self::FloorDiv => "//",
            Self::Mod => "%",
            Self::Pow => "**",
            Self::And => "&",
            Self::Or => "|",
            Self::Xor => "^",
            Self::Lshift => "<<",
            Self::Rshift => ">>",
        }
    }

    fn dunder(self) -> StaticStrings {
        match self {
            Self::Add => StaticStrings::DunderAdd,
            Self::Sub => StaticStrings::DunderSub,
            Self::Mul => StaticStrings::DunderMul,
            Self::MatMul => StaticStrings::DunderMatmul,
            Self::TrueDiv => StaticStrings::DunderTruediv,
            Self::FloorDiv => StaticStrings::DunderFloordiv,
            Self::Mod => StaticStrings::DunderMod,
            Self::Pow => StaticStrings::DunderPow,
            Self::And => StaticStrings::DunderAnd,
            Self::Or => StaticStrings::DunderOr,
            Self::Xor => StaticStrings::DunderXor,
            Self::Lshift => StaticStrings::DunderLshift,
            Self::Rshift => StaticStrings::DunderRshift,
        }
    }
}

impl Vm {
    /// Applies a binary operator, consuming both operands.
    pub(crate) fn binary_op(&mut self, op: BinOp, lhs: Value, rhs: Value) -> RunResult<Value> {
        // User-defined left operand: dispatch the named dunder.
        if lhs.is_instance(&self.heap) {
            return self.call_required_dunder(lhs, op.dunder(), vec![rhs], op.symbol());
        }

        // Integer pairs (bool counts as an integer).
        if let (Some(a), Some(b)) = (int_operand(&lhs, self), int_operand(&rhs, self)) {
            let result = self.int_binary(op, &a, &b, &lhs, &rhs)?;
            lhs.drop_with_heap(&mut self.heap);
            rhs.drop_with_heap(&mut self.heap);
            return Ok(result);
        }

        // Mixed numeric pairs fall to floats.
        if let (Some(a), Some(b)) = (lhs.as_float(&self.heap), rhs.as_float(&self.heap)) {
            let result = float_binary(op, a, b, &lhs, &rhs, self)?;
            lhs.drop_with_heap(&mut self.heap);
            rhs.drop_with_heap(&mut self.heap);
            return Ok(result);
        }

        // Sequence operators.
        match (&lhs, &rhs) {
            (Value::Str(a), Value::Str(b)) if op == BinOp::Add => {
                let joined = format!("{}{}", self.interns.get(*a), self.interns.get(*b));
                let id = self.interns.intern(&joined);
                return Ok(Value::Str(id));
            }
            (Value::Str(s), other) | (other, Value::Str(s)) if op == BinOp::Mul => {
                if let Some(count) = other.as_index(&self.heap) {
                    let repeated = self.interns.get(*s).repeat(count.max(0) as usize);
                    let id = self.interns.intern(&repeated);
                    return Ok(Value::Str(id));
                }
            }
            (Value::Ref(a), Value::Ref(b)) if op == BinOp::Add => {
                if let (HeapData::List(la), HeapData::List(lb)) = (self.heap.get(*a), self.heap.get(*b)) {
                    let mut values = Vec::with_capacity(la.len() + lb.len());
                    for value in la.as_slice().iter().chain(lb.as_slice()) {
                        values.push(value.clone_with_heap(&self.heap));
                    }
                    let id = self.heap.allocate(HeapData::List(List::from_values(values)));
                    lhs.drop_with_heap(&mut self.heap);
                    rhs.drop_with_heap(&mut self.heap);
                    return Ok(Value::Ref(id));
                }
                if let (HeapData::Bytes(ba), HeapData::Bytes(bb)) = (self.heap.get(*a), self.heap.get(*b)) {
                    let mut joined = Vec::with_capacity(ba.len() + bb.len());
                    joined.extend_from_slice(ba.as_slice());
                    joined.extend_from_slice(bb.as_slice());
                    let id = self
                        .heap
                        .allocate(HeapData::Bytes(crate::types::Bytes::new(joined)));
                    lhs.drop_with_heap(&mut self.heap);
                    rhs.drop_with_heap(&mut self.heap);
                    return Ok(Value::Ref(id));
                }
            }
            (Value::Ref(a), other) if op == BinOp::Mul => {
                if matches!(self.heap.get(*a), HeapData::List(_))
                    && let Some(count) = other.as_index(&self.heap)
                {
                    let HeapData::List(list) = self.heap.get(*a) else {
                        unreachable!("checked above");
                    };
                    let mut values = Vec::new();
                    for _ in 0..count.max(0) {
                        for value in list.as_slice() {
                            values.push(value.clone_with_heap(&self.heap));
                        }
                    }
                    let id = self.heap.allocate(HeapData::List(List::from_values(values)));
                    lhs.drop_with_heap(&mut self.heap);
                    rhs.drop_with_heap(&mut self.heap);
                    return Ok(Value::Ref(id));
                }
            }
            _ => {}
        }

        let message = format!(
            "unsupported operand type(s) for {}: '{}' and '{}'",
            op.symbol(),
            self.type_name(&lhs),
            self.type_name(&rhs)
        );
        lhs.drop_with_heap(&mut self.heap);
        rhs.drop_with_heap(&mut self.heap);
        Err(ExcType::type_error(message))
    }

    fn int_binary(
        &mut self,
        op: BinOp,
        a: &IntOperand,
        b: &IntOperand,
        lhs: &Value,
        rhs: &Value,
    ) -> RunResult<Value> {
        // Fast path on machine words with checked arithmetic; overflow
        // promotes to big integers.
        if let (IntOperand::Small(x), IntOperand::Small(y)) = (a, b) {
            let (x, y) = (*x, *y);
            match op {
                BinOp::Add => {
                    if let Some(v) = x.checked_add(y) {
                        return Ok(Value::Int(v));
                    }
                }
                BinOp::Sub => {
                    if let Some(v) = x.checked_sub(y) {
                        return Ok(Value::Int(v));
                    }
                }
                BinOp::Mul => {
                    if let Some(v) = x.checked_mul(y) {
                        return Ok(Value::Int(v));
                    }
                }
                BinOp::And => return Ok(Value::Int(x & y)),
                BinOp::Or => return Ok(Value::Int(x | y)),
                BinOp::Xor => return Ok(Value::Int(x ^ y)),
                BinOp::FloorDiv => {
                    if y == 0 {
                        return Err(ExcType::value_error("integer division or modulo by zero"));
                    }
                    if !(x == i64::MIN && y == -1) {
                        return Ok(Value::Int(x.div_floor(&y)));
                    }
                }
                BinOp::Mod => {
                    if y == 0 {
                        return Err(ExcType::value_error("integer division or modulo by zero"));
                    }
                    if !(x == i64::MIN && y == -1) {
                        return Ok(Value::Int(x.mod_floor(&y)));
                    }
                }
                BinOp::TrueDiv => {
                    if y == 0 {
                        return Err(ExcType::value_error("division by zero"));
                    }
                    return Ok(Value::Float(x as f64 / y as f64));
                }
                _ => {}
            }
        }

        // Big-integer path, shared by overflow and LongInt operands.
        let x = a.to_big();
        let y = b.to_big();
        let result = match op {
            BinOp::Add => x + y,
            BinOp::Sub => x - y,
            BinOp::Mul => x * y,
            BinOp::And => x & y,
            BinOp::Or => x | y,
            BinOp::Xor => x ^ y,
            BinOp::FloorDiv => {
                if y.is_zero() {
                    return Err(ExcType::value_error("integer division or modulo by zero"));
                }
                x.div_floor(&y)
            }
            BinOp::Mod => {
                if y.is_zero() {
                    return Err(ExcType::value_error("integer division or modulo by zero"));
                }
                x.mod_floor(&y)
            }
            BinOp::TrueDiv => {
                if y.is_zero() {
                    return Err(ExcType::value_error("division by zero"));
                }
                let (fx, fy) = (x.to_f64(), y.to_f64());
                match (fx, fy) {
                    (Some(fx), Some(fy)) => return Ok(Value::Float(fx / fy)),
                    _ => return Err(ExcType::value_error("integer too large to divide as float")),
                }
            }
            BinOp::Pow => {
                if y.is_negative() {
                    return Err(ExcType::value_error("negative exponent"));
                }
                let exponent = y
                    .to_u32()
                    .ok_or_else(|| ExcType::value_error("exponent too large"))?;
                num_traits::pow(x, exponent as usize)
            }
            BinOp::Lshift | BinOp::Rshift => {
                if y.is_negative() {
                    return Err(ExcType::value_error("negative shift count"));
                }
                let amount = y
                    .to_usize()
                    .ok_or_else(|| ExcType::value_error("shift count too large"))?;
                if op == BinOp::Lshift { x << amount } else { x >> amount }
            }
            BinOp::MatMul => {
                let message = format!(
                    "unsupported operand type(s) for @: '{}' and '{}'",
                    self.type_name(lhs),
                    self.type_name(rhs)
                );
                return Err(ExcType::type_error(message));
            }
        };
        Ok(Value::from_bigint(result, &mut self.heap))
    }

    /// Applies a unary operator, consuming the operand.
    pub(crate) fn unary_op(&mut self, op: Opcode, operand: Value) -> RunResult<Value> {
        if operand.is_instance(&self.heap) {
            let (dunder, symbol) = match op {
                Opcode::UnaryPositive => (StaticStrings::DunderPos, "+"),
                Opcode::UnaryNegative => (StaticStrings::DunderNeg, "-"),
                Opcode::UnaryInvert => (StaticStrings::DunderInvert, "~"),
                _ => unreachable!("{op:?} is not a unary operator"),
            };
            return self.call_required_dunder(operand, dunder, vec![], symbol);
        }

        match op {
            Opcode::UnaryPositive => {
                if operand.as_bigint(&self.heap).is_some() || matches!(operand, Value::Float(_)) {
                    return Ok(operand);
                }
            }
            Opcode::UnaryNegative => match &operand {
                Value::Int(i) => {
                    let result = match i.checked_neg() {
                        Some(v) => Value::Int(v),
                        None => Value::from_bigint(-BigInt::from(*i), &mut self.heap),
                    };
                    return Ok(result);
                }
                Value::Bool(b) => return Ok(Value::Int(-i64::from(*b))),
                Value::Float(f) => return Ok(Value::Float(-f)),
                Value::Ref(id) => {
                    if let HeapData::LongInt(li) = self.heap.get(*id) {
                        let negated = -li.inner().clone();
                        operand.drop_with_heap(&mut self.heap);
                        return Ok(Value::from_bigint(negated, &mut self.heap));
                    }
                }
                _ => {}
            },
            Opcode::UnaryInvert => {
                if let Some(big) = operand.as_bigint(&self.heap) {
                    operand.drop_with_heap(&mut self.heap);
                    return Ok(Value::from_bigint(-big - 1, &mut self.heap));
                }
            }
            _ => unreachable!("{op:?} is not a unary operator"),
        }

        let message = format!("bad operand type for unary operator: '{}'", self.type_name(&operand));
        operand.drop_with_heap(&mut self.heap);
        Err(ExcType::type_error(message))
    }

    /// Applies a comparison tag, consuming both operands.
    pub(crate) fn compare(&mut self, op: CompareOp, lhs: Value, rhs: Value) -> RunResult<Value> {
        let result = match op {
            CompareOp::Is => Value::Bool(lhs.is_identical(&rhs)),
            CompareOp::IsNot => Value::Bool(!lhs.is_identical(&rhs)),
            CompareOp::Eq => Value::Bool(self.values_equal(&lhs, &rhs)?),
            CompareOp::Ne => Value::Bool(!self.values_equal(&lhs, &rhs)?),
            CompareOp::In => Value::Bool(self.contains(&rhs, &lhs)?),
            CompareOp::NotIn => Value::Bool(!self.contains(&rhs, &lhs)?),
            CompareOp::Lt | CompareOp::Le | CompareOp::Gt | CompareOp::Ge => {
                let value = self.ordering_compare(op, &lhs, &rhs)?;
                Value::Bool(value)
            }
        };
        lhs.drop_with_heap(&mut self.heap);
        rhs.drop_with_heap(&mut self.heap);
        Ok(result)
    }

    /// Equality with dunder fallback for user instances. Defaults to
    /// identity when no `__eq__` is defined.
    pub(crate) fn values_equal(&mut self, lhs: &Value, rhs: &Value) -> RunResult<bool> {
        if let Some(result) = lhs.native_eq(rhs, &self.heap) {
            return Ok(result);
        }
        if lhs.is_instance(&self.heap)
            && let Some(result) = self.call_optional_dunder(lhs, StaticStrings::DunderEq, rhs)?
        {
            return self.truthy_consume(result);
        }
        if rhs.is_instance(&self.heap)
            && let Some(result) = self.call_optional_dunder(rhs, StaticStrings::DunderEq, lhs)?
        {
            return self.truthy_consume(result);
        }
        Ok(lhs.is_identical(rhs))
    }

    /// Ordering with the derived defaults for user classes:
    /// `le = lt or eq`, `gt = not le`, `ge = not lt`.
    fn ordering_compare(&mut self, op: CompareOp, lhs: &Value, rhs: &Value) -> RunResult<bool> {
        if lhs.is_instance(&self.heap) {
            let direct = match op {
                CompareOp::Lt => StaticStrings::DunderLt,
                CompareOp::Le => StaticStrings::DunderLe,
                CompareOp::Gt => StaticStrings::DunderGt,
                CompareOp::Ge => StaticStrings::DunderGe,
                _ => unreachable!("ordering tags only"),
            };
            if let Some(result) = self.call_optional_dunder(lhs, direct, rhs)? {
                return self.truthy_consume(result);
            }
            return match op {
                CompareOp::Lt => self.user_lt(lhs, rhs),
                CompareOp::Le => {
                    if self.user_lt(lhs, rhs)? {
                        Ok(true)
                    } else {
                        self.values_equal(lhs, rhs)
                    }
                }
                CompareOp::Gt => Ok(!self.ordering_compare(CompareOp::Le, lhs, rhs)?),
                CompareOp::Ge => Ok(!self.user_lt(lhs, rhs)?),
                _ => unreachable!("ordering tags only"),
            };
        }

        if let (Some(a), Some(b)) = (lhs.as_float(&self.heap), rhs.as_float(&self.heap)) {
            // Big integers outside f64 range lose precision here; exact
            // big-int ordering takes the dedicated path below.
            if let (Some(x), Some(y)) = (lhs.as_bigint(&self.heap), rhs.as_bigint(&self.heap)) {
                return Ok(apply_ordering(op, x.cmp(&y)));
            }
            // NaN is unordered: every ordering comparison involving it is
            // false.
            return Ok(a.partial_cmp(&b).is_some_and(|ordering| apply_ordering(op, ordering)));
        }
        if let (Value::Str(a), Value::Str(b)) = (lhs, rhs) {
            let ordering = self.interns.get(*a).cmp(self.interns.get(*b));
            return Ok(apply_ordering(op, ordering));
        }

        let symbol = match op {
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            _ => unreachable!("ordering tags only"),
        };
        Err(ExcType::type_error(format!(
            "'{}' not supported between instances of '{}' and '{}'",
            symbol,
            self.type_name(lhs),
            self.type_name(rhs)
        )))
    }

    fn user_lt(&mut self, lhs: &Value, rhs: &Value) -> RunResult<bool> {
        match self.call_optional_dunder(lhs, StaticStrings::DunderLt, rhs)? {
            Some(result) => self.truthy_consume(result),
            None => Err(ExcType::type_error(format!(
                "'<' not supported between instances of '{}' and '{}'",
                self.type_name(lhs),
                self.type_name(rhs)
            ))),
        }
    }

    /// Membership: `item in container`.
    pub(crate) fn contains(&mut self, container: &Value, item: &Value) -> RunResult<bool> {
        if container.is_instance(&self.heap) {
            match self.call_optional_dunder(container, StaticStrings::DunderContains, item)? {
                Some(result) => return self.truthy_consume(result),
                None => {
                    return Err(ExcType::type_error(format!(
                        "argument of type '{}' is not iterable",
                        self.type_name(container)
                    )));
                }
            }
        }
        match container {
            Value::Str(haystack) => {
                if let Value::Str(needle) = item {
                    let needle = self.interns.get(*needle).to_owned();
                    return Ok(self.interns.get(*haystack).contains(needle.as_str()));
                }
                Err(ExcType::type_error("'in <string>' requires string as left operand"))
            }
            Value::Ref(id) => match self.heap.get(*id) {
                HeapData::List(list) => {
                    let items: Vec<Value> = list
                        .as_slice()
                        .iter()
                        .map(|v| v.clone_with_heap(&self.heap))
                        .collect();
                    let mut outcome: RunResult<bool> = Ok(false);
                    for candidate in &items {
                        match self.values_equal(candidate, item) {
                            Ok(false) => {}
                            other => {
                                outcome = other;
                                break;
                            }
                        }
                    }
                    for candidate in items {
                        candidate.drop_with_heap(&mut self.heap);
                    }
                    outcome
                }
                HeapData::Dict(dict) => Ok(dict.contains(item, &self.heap, &self.interns)),
                _ => Err(ExcType::type_error(format!(
                    "argument of type '{}' is not iterable",
                    self.type_name(container)
                ))),
            },
            _ => Err(ExcType::type_error(format!(
                "argument of type '{}' is not iterable",
                self.type_name(container)
            ))),
        }
    }

    /// Truthiness with `__bool__` / `__len__` fallbacks for instances.
    pub(crate) fn truthy(&mut self, value: &Value) -> RunResult<bool> {
        if let Some(result) = value.native_truthy(&self.heap) {
            return Ok(result);
        }
        if let Some(result) = self.call_optional_dunder_nullary(value, StaticStrings::DunderBool)? {
            return self.truthy_consume(result);
        }
        if let Some(length) = self.call_optional_dunder_nullary(value, StaticStrings::DunderLen)? {
            let n = length.as_index(&self.heap);
            length.drop_with_heap(&mut self.heap);
            return match n {
                Some(n) => Ok(n != 0),
                None => Err(ExcType::type_error("__len__ should return an integer")),
            };
        }
        Ok(true)
    }

    fn truthy_consume(&mut self, value: Value) -> RunResult<bool> {
        let result = self.truthy(&value);
        value.drop_with_heap(&mut self.heap);
        result
    }

    /// Subscript read: `obj[index]`, consuming both.
    pub(crate) fn get_item(&mut self, obj: Value, index: Value) -> RunResult<Value> {
        if obj.is_instance(&self.heap) {
            return self.call_required_dunder(obj, StaticStrings::DunderGetitem, vec![index], "[]");
        }
        let result = match (&obj, &index) {
            (Value::Str(s), _) => {
                if let Some(i) = index.as_index(&self.heap) {
                    let text = self.interns.get(*s);
                    let count = text.chars().count();
                    let at = crate::types::list::resolve_sequence_index(i, count, "string index out of range")?;
                    let ch = text.chars().nth(at).expect("resolved index in range");
                    let mut buffer = [0u8; 4];
                    let id = self.interns.intern(ch.encode_utf8(&mut buffer));
                    Ok(Value::Str(id))
                } else if let Some(bounds) = self.slice_bounds_of(&index, self.interns.get(*s).chars().count())? {
                    let text = self.interns.get(*s);
                    let chars: Vec<char> = text.chars().collect();
                    let sliced: String = bounds.indices().map(|i| chars[i]).collect();
                    let id = self.interns.intern(&sliced);
                    Ok(Value::Str(id))
                } else {
                    Err(ExcType::type_error("string indices must be integers or slices"))
                }
            }
            (Value::Ref(id), _) => {
                let id = *id;
                match self.heap.get(id) {
                    HeapData::List(list) => {
                        if let Some(i) = index.as_index(&self.heap) {
                            let at = list.resolve_index(i)?;
                            Ok(list.get(at).clone_with_heap(&self.heap))
                        } else if let Some(bounds) = self.slice_bounds_of(&index, list.len())? {
                            let HeapData::List(list) = self.heap.get(id) else {
                                unreachable!("checked above");
                            };
                            let values: Vec<Value> = bounds
                                .indices()
                                .map(|i| list.get(i).clone_with_heap(&self.heap))
                                .collect();
                            let new_id = self.heap.allocate(HeapData::List(List::from_values(values)));
                            Ok(Value::Ref(new_id))
                        } else {
                            Err(ExcType::type_error("list indices must be integers or slices"))
                        }
                    }
                    HeapData::Bytes(bytes) => {
                        if let Some(i) = index.as_index(&self.heap) {
                            let at = crate::types::list::resolve_sequence_index(
                                i,
                                bytes.len(),
                                "index out of range",
                            )?;
                            Ok(Value::Int(i64::from(bytes.get(at).expect("resolved index"))))
                        } else {
                            Err(ExcType::type_error("byte indices must be integers"))
                        }
                    }
                    HeapData::Dict(dict) => match dict.get(&index, &self.heap, &self.interns) {
                        Some(value) => Ok(value.clone_with_heap(&self.heap)),
                        None => {
                            let repr = self.value_repr(&index)?;
                            Err(ExcType::index_error(format!("key not found: {repr}")))
                        }
                    },
                    _ => Err(ExcType::type_error(format!(
                        "'{}' object is not subscriptable",
                        self.type_name(&obj)
                    ))),
                }
            }
            _ => Err(ExcType::type_error(format!(
                "'{}' object is not subscriptable",
                self.type_name(&obj)
            ))),
        };
        obj.drop_with_heap(&mut self.heap);
        index.drop_with_heap(&mut self.heap);
        result
    }

    /// Subscript write: `obj[index] = value`, consuming all three.
    pub(crate) fn set_item(&mut self, obj: Value, index: Value, value: Value) -> RunResult<()> {
        if obj.is_instance(&self.heap) {
            let result = self.call_required_dunder(obj, StaticStrings::DunderSetitem, vec![index, value], "[]=")?;
            result.drop_with_heap(&mut self.heap);
            return Ok(());
        }
        if let Value::Ref(id) = &obj {
            let id = *id;
            match self.heap.get(id) {
                HeapData::List(list) => {
                    let i = index.as_index(&self.heap).ok_or_else(|| {
                        ExcType::type_error("list indices must be integers")
                    });
                    match i {
                        Ok(i) => {
                            let at = list.resolve_index(i)?;
                            let HeapData::List(list) = self.heap.get_mut(id) else {
                                unreachable!("checked above");
                            };
                            let old = list.replace(at, value);
                            old.drop_with_heap(&mut self.heap);
                            obj.drop_with_heap(&mut self.heap);
                            index.drop_with_heap(&mut self.heap);
                            return Ok(());
                        }
                        Err(err) => {
                            obj.drop_with_heap(&mut self.heap);
                            index.drop_with_heap(&mut self.heap);
                            value.drop_with_heap(&mut self.heap);
                            return Err(err);
                        }
                    }
                }
                HeapData::Dict(_) => {
                    self.dict_insert(id, index, value);
                    obj.drop_with_heap(&mut self.heap);
                    return Ok(());
                }
                _ => {}
            }
        }
        let message = format!("'{}' object does not support item assignment", self.type_name(&obj));
        obj.drop_with_heap(&mut self.heap);
        index.drop_with_heap(&mut self.heap);
        value.drop_with_heap(&mut self.heap);
        Err(ExcType::type_error(message))
    }

    /// `iter(x)`: iterators and generators pass through, native containers
    /// get a cursor, instances go through `__iter__`.
    pub(crate) fn get_iter(&mut self, value: Value) -> RunResult<Value> {
        match &value {
            Value::Str(s) => {
                let iter = Iter::Str { string: *s, index: 0 };
                let id = self.heap.allocate(HeapData::Iter(iter));
                Ok(Value::Ref(id))
            }
            Value::Ref(id) => {
                let id = *id;
                match self.heap.get(id) {
                    HeapData::Iter(_) | HeapData::Generator(_) => Ok(value),
                    HeapData::List(_) => {
                        // The popped reference moves into the cursor.
                        let iter = Iter::List { list: id, index: 0 };
                        let iter_id = self.heap.allocate(HeapData::Iter(iter));
                        Ok(Value::Ref(iter_id))
                    }
                    HeapData::Bytes(_) => {
                        let iter = Iter::Bytes { bytes: id, index: 0 };
                        let iter_id = self.heap.allocate(HeapData::Iter(iter));
                        Ok(Value::Ref(iter_id))
                    }
                    HeapData::Dict(_) => {
                        let iter = Iter::DictKeys { dict: id, index: 0 };
                        let iter_id = self.heap.allocate(HeapData::Iter(iter));
                        Ok(Value::Ref(iter_id))
                    }
                    HeapData::Instance(_) => {
                        self.call_required_dunder(value, StaticStrings::DunderIter, vec![], "iter")
                    }
                    _ => {
                        let message = format!("'{}' object is not iterable", self.type_name(&value));
                        value.drop_with_heap(&mut self.heap);
                        Err(ExcType::type_error(message))
                    }
                }
            }
            _ => {
                let message = format!("'{}' object is not iterable", self.type_name(&value));
                value.drop_with_heap(&mut self.heap);
                Err(ExcType::type_error(message))
            }
        }
    }

    /// `next(x)`: advances iterators and generators; instances go through
    /// `__next__`. Exhaustion is the `StopIteration` sentinel.
    pub(crate) fn iter_next_value(&mut self, value: &Value) -> RunResult<Value> {
        if let Value::Ref(id) = value {
            let id = *id;
            match self.heap.get(id) {
                HeapData::Iter(_) => {
                    return crate::types::iter::advance(&mut self.heap, &mut self.interns, id);
                }
                HeapData::Generator(_) => return self.gen_send(id, Value::None),
                HeapData::Instance(_) => {
                    let owned = value.clone_with_heap(&self.heap);
                    return self.call_required_dunder(owned, StaticStrings::DunderNext, vec![], "next");
                }
                _ => {}
            }
        }
        Err(ExcType::type_error(format!(
            "'{}' object is not an iterator",
            self.type_name(value)
        )))
    }

    /// Invokes a dunder that must exist, consuming `owner` and `args`;
    /// missing dunders are operator-unsupported `TypeError`s.
    pub(crate) fn call_required_dunder(
        &mut self,
        owner: Value,
        dunder: StaticStrings,
        args: Vec<Value>,
        symbol: &str,
    ) -> RunResult<Value> {
        match self.get_attr(&owner, dunder.id())? {
            Some(bound) => {
                owner.drop_with_heap(&mut self.heap);
                self.call_value(bound, args)
            }
            None => {
                let message = format!("unsupported operand type(s) for {}: '{}'", symbol, self.type_name(&owner));
                owner.drop_with_heap(&mut self.heap);
                for arg in args {
                    arg.drop_with_heap(&mut self.heap);
                }
                Err(ExcType::type_error(message))
            }
        }
    }

    /// Invokes a unary-argument dunder when defined; `Ok(None)` when the
    /// class does not define it.
    pub(crate) fn call_optional_dunder(
        &mut self,
        owner: &Value,
        dunder: StaticStrings,
        arg: &Value,
    ) -> RunResult<Option<Value>> {
        if !owner.is_instance(&self.heap) {
            return Ok(None);
        }
        match self.get_attr(owner, dunder.id())? {
            Some(bound) => {
                let arg = arg.clone_with_heap(&self.heap);
                Ok(Some(self.call_value(bound, vec![arg])?))
            }
            None => Ok(None),
        }
    }

    /// Invokes a no-argument dunder when defined.
    pub(crate) fn call_optional_dunder_nullary(
        &mut self,
        owner: &Value,
        dunder: StaticStrings,
    ) -> RunResult<Option<Value>> {
        if !owner.is_instance(&self.heap) {
            return Ok(None);
        }
        match self.get_attr(owner, dunder.id())? {
            Some(bound) => Ok(Some(self.call_value(bound, vec![])?)),
            None => Ok(None),
        }
    }

    /// Reads slice bounds when `index` is a slice value.
    fn slice_bounds_of(
        &self,
        index: &Value,
        len: usize,
    ) -> RunResult<Option<crate::types::slice::SliceBounds>> {
        if let Value::Ref(id) = index
            && let HeapData::Slice(slice) = self.heap.get(*id)
        {
            return Ok(Some(slice.bounds(len)?));
        }
        Ok(None)
    }
}

/// Integer operand view: machine word or big integer.
enum IntOperand {
    Small(i64),
    Big(BigInt),
}

impl IntOperand {
    fn to_big(&self) -> BigInt {
        match self {
            Self::Small(v) => BigInt::from(*v),
            Self::Big(v) => v.clone(),
        }
    }
}

fn int_operand(value: &Value, vm: &Vm) -> Option<IntOperand> {
    match value {
        Value::Int(i) => Some(IntOperand::Small(*i)),
        Value::Bool(b) => Some(IntOperand::Small(i64::from(*b))),
        Value::Ref(id) => match vm.heap.get(*id) {
            HeapData::LongInt(li) => Some(IntOperand::Big(li.inner().clone())),
            _ => None,
        },
        _ => None,
    }
}

fn float_binary(op: BinOp, a: f64, b: f64, lhs: &Value, rhs: &Value, vm: &Vm) -> RunResult<Value> {
    let result = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::TrueDiv => {
            if b == 0.0 {
                return Err(ExcType::value_error("division by zero"));
            }
            a / b
        }
        BinOp::FloorDiv => {
            if b == 0.0 {
                return Err(ExcType::value_error("division by zero"));
            }
            (a / b).floor()
        }
        BinOp::Mod => {
            if b == 0.0 {
                return Err(ExcType::value_error("division by zero"));
            }
            a - b * (a / b).floor()
        }
        BinOp::Pow => a.powf(b),
        _ => {
            return Err(ExcType::type_error(format!(
                "unsupported operand type(s) for {}: '{}' and '{}'",
                op.symbol(),
                vm.type_name(lhs),
                vm.type_name(rhs)
            )));
        }
    };
    Ok(Value::Float(result))
}

fn apply_ordering(op: CompareOp, ordering: std::cmp::Ordering) -> bool {
    match op {
        CompareOp::Lt => ordering.is_lt(),
        CompareOp::Le => ordering.is_le(),
        CompareOp::Gt => ordering.is_gt(),
        CompareOp::Ge => ordering.is_ge(),
        _ => unreachable!("ordering tags only"),
    }
}
