//! Tree-walking evaluator. Walks the node arena under a read-only context
//! and a policy, producing a [`Value`] or the first error on the path.

pub mod builtins;

use std::cmp::Ordering;

use indexmap::IndexMap;
use tracing::error;

use crate::error::CelError;
use crate::parser::parse::MAX_DEPTH;
use crate::parser::{Literal, Node, NodeId, Operator, Program};
use crate::value::{MapKey, Value};

/// Per-evaluation variable bindings, name to value.
pub type Context = IndexMap<String, Value>;

/// Evaluation policy, fixed when the expression is compiled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Policy {
    /// When true, referencing an absent variable fails only if the
    /// reference is actually evaluated; short-circuited branches get away
    /// with it. When false, every variable in the expression must be
    /// declared (or be a built-in), checked before evaluation starts.
    pub allow_undeclared_vars: bool,
}

impl Default for Policy {
    fn default() -> Self {
        Policy {
            allow_undeclared_vars: true,
        }
    }
}

pub(crate) fn evaluate(
    program: &Program,
    context: &Context,
    policy: Policy,
) -> Result<Value, CelError> {
    if !policy.allow_undeclared_vars {
        check_declared(program, context, program.root(), 0)?;
    }
    Evaluator { program, context }.eval(program.root(), 0)
}

/// The parser caps tree depth at [`MAX_DEPTH`], so the recursive walks here
/// should never get near it; the guard bounds them anyway for trees that
/// did not come from the parser.
fn too_deep() -> CelError {
    CelError::Evaluation("expression tree is too deep".to_string())
}

/// Strict-policy pass: every identifier in the tree must name a context
/// entry or a built-in, even inside branches evaluation would skip.
/// Member-access field names are not identifiers and resolve at evaluation.
fn check_declared(
    program: &Program,
    context: &Context,
    id: NodeId,
    depth: usize,
) -> Result<(), CelError> {
    if depth > MAX_DEPTH {
        return Err(too_deep());
    }
    match program.node(id) {
        Node::Literal(_) => Ok(()),
        Node::Ident(name) => {
            if context.contains_key(name) || builtins::is_builtin(name) {
                Ok(())
            } else {
                Err(CelError::Undefined(format!(
                    "undeclared variable '{name}'"
                )))
            }
        }
        Node::Member(obj, _) => check_declared(program, context, *obj, depth + 1),
        Node::Unary(_, expr) => check_declared(program, context, *expr, depth + 1),
        Node::Index(a, b) | Node::Binary(_, a, b) => {
            check_declared(program, context, *a, depth + 1)?;
            check_declared(program, context, *b, depth + 1)
        }
        Node::Ternary(cond, then, other) => {
            check_declared(program, context, *cond, depth + 1)?;
            check_declared(program, context, *then, depth + 1)?;
            check_declared(program, context, *other, depth + 1)
        }
        Node::Call(callee, args) => {
            check_declared(program, context, *callee, depth + 1)?;
            args.iter()
                .try_for_each(|arg| check_declared(program, context, *arg, depth + 1))
        }
        Node::List(items) => items
            .iter()
            .try_for_each(|item| check_declared(program, context, *item, depth + 1)),
        Node::Map(entries) => entries.iter().try_for_each(|(key, value)| {
            check_declared(program, context, *key, depth + 1)?;
            check_declared(program, context, *value, depth + 1)
        }),
    }
}

struct Evaluator<'a> {
    program: &'a Program,
    context: &'a Context,
}

impl<'a> Evaluator<'a> {
    fn eval(&self, id: NodeId, depth: usize) -> Result<Value, CelError> {
        if depth > MAX_DEPTH {
            return Err(too_deep());
        }
        match self.program.node(id) {
            Node::Literal(lit) => Ok(match lit {
                Literal::Null => Value::Null,
                Literal::Bool(b) => Value::Bool(*b),
                Literal::Int(n) => Value::Int(*n),
                Literal::Float(x) => Value::Float(*x),
                Literal::Str(s) => Value::String(s.clone()),
            }),
            Node::Ident(name) => self.lookup(name),
            Node::Member(obj, field) => self.eval_member(*obj, field, depth),
            Node::Index(obj, index) => self.eval_index(*obj, *index, depth),
            Node::Unary(op, expr) => self.eval_unary(*op, *expr, depth),
            Node::Binary(op, left, right) => self.eval_binary(*op, *left, *right, depth),
            Node::Ternary(cond, then, other) => self.eval_ternary(*cond, *then, *other, depth),
            Node::Call(callee, args) => self.eval_call(*callee, args, depth),
            Node::List(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval(*item, depth + 1)?);
                }
                Ok(Value::List(values))
            }
            Node::Map(entries) => self.eval_map(entries, depth),
        }
    }

    fn lookup(&self, name: &str) -> Result<Value, CelError> {
        if let Some(value) = self.context.get(name) {
            Ok(value.clone())
        } else if builtins::is_builtin(name) {
            Err(CelError::Type(format!(
                "built-in function '{name}' is not a value"
            )))
        } else {
            Err(CelError::Undefined(format!("undefined variable '{name}'")))
        }
    }

    fn eval_member(&self, obj_id: NodeId, field: &str, depth: usize) -> Result<Value, CelError> {
        let obj = self.eval(obj_id, depth + 1)?;
        match obj {
            Value::Map(map) => match map.get(&MapKey::String(field.to_string())) {
                Some(value) => Ok(value.clone()),
                None => Err(CelError::Undefined(format!(
                    "field '{field}' not found in '{}'",
                    self.program.render_node(obj_id)
                ))),
            },
            other => Err(CelError::Type(format!(
                "cannot access field '{field}' on {}",
                other.type_name()
            ))),
        }
    }

    fn eval_index(&self, obj_id: NodeId, index_id: NodeId, depth: usize) -> Result<Value, CelError> {
        let obj = self.eval(obj_id, depth + 1)?;
        let index = self.eval(index_id, depth + 1)?;
        match obj {
            Value::List(items) => match index {
                Value::Int(i) if i >= 0 && (i as usize) < items.len() => {
                    Ok(items[i as usize].clone())
                }
                Value::Int(i) => Err(CelError::Evaluation(format!(
                    "index {i} out of range for list of length {}",
                    items.len()
                ))),
                other => Err(CelError::Type(format!(
                    "list index must be an int, got {}",
                    other.type_name()
                ))),
            },
            Value::Map(map) => {
                let key = MapKey::try_from(index).map_err(|value| {
                    CelError::Type(format!(
                        "map key must be null, bool, int, or string, got {}",
                        value.type_name()
                    ))
                })?;
                match map.get(&key) {
                    Some(value) => Ok(value.clone()),
                    None => Err(CelError::Undefined(format!("key {key} not found in map"))),
                }
            }
            other => Err(CelError::Type(format!(
                "cannot index into {}",
                other.type_name()
            ))),
        }
    }

    fn eval_unary(&self, op: Operator, expr: NodeId, depth: usize) -> Result<Value, CelError> {
        let value = self.eval(expr, depth + 1)?;
        match op {
            Operator::Not => match value {
                Value::Bool(b) => Ok(Value::Bool(!b)),
                other => Err(CelError::Type(format!(
                    "'!' requires a bool operand, got {}",
                    other.type_name()
                ))),
            },
            Operator::Minus => match value {
                Value::Int(n) => n
                    .checked_neg()
                    .map(Value::Int)
                    .ok_or_else(|| CelError::Evaluation("integer overflow in '-'".to_string())),
                Value::Float(x) => Ok(Value::Float(-x)),
                other => Err(CelError::Type(format!(
                    "'-' requires a numeric operand, got {}",
                    other.type_name()
                ))),
            },
            other => {
                // The parser only builds '!' and '-' prefix nodes
                error!("evaluating impossible unary operator '{other}'");
                Err(CelError::Type(format!(
                    "'{other}' is not a unary operator"
                )))
            }
        }
    }

    fn eval_binary(
        &self,
        op: Operator,
        left: NodeId,
        right: NodeId,
        depth: usize,
    ) -> Result<Value, CelError> {
        let child = depth + 1;
        match op {
            Operator::And | Operator::Or => self.eval_logical(op, left, right, depth),
            Operator::Eq => Ok(Value::Bool(self.eval(left, child)? == self.eval(right, child)?)),
            Operator::Ne => Ok(Value::Bool(self.eval(left, child)? != self.eval(right, child)?)),
            Operator::Lt | Operator::Le | Operator::Gt | Operator::Ge => {
                self.eval_ordering(op, left, right, depth)
            }
            Operator::Plus => add(self.eval(left, child)?, self.eval(right, child)?),
            Operator::Minus | Operator::Star | Operator::Slash | Operator::Percent => {
                arith(op, self.eval(left, child)?, self.eval(right, child)?)
            }
            Operator::Not => {
                // The parser never builds this
                error!("evaluating '!' as a binary operator");
                Err(CelError::Type("'!' is not a binary operator".to_string()))
            }
        }
    }

    /// `&&` and `||` with short-circuit: when the first operand decides the
    /// result, the second is neither evaluated nor type-checked.
    fn eval_logical(
        &self,
        op: Operator,
        left: NodeId,
        right: NodeId,
        depth: usize,
    ) -> Result<Value, CelError> {
        let lhs = match self.eval(left, depth + 1)? {
            Value::Bool(b) => b,
            other => {
                return Err(CelError::Type(format!(
                    "'{op}' requires bool operands, got {}",
                    other.type_name()
                )));
            }
        };
        match (op, lhs) {
            (Operator::And, false) => Ok(Value::Bool(false)),
            (Operator::Or, true) => Ok(Value::Bool(true)),
            _ => match self.eval(right, depth + 1)? {
                Value::Bool(b) => Ok(Value::Bool(b)),
                other => Err(CelError::Type(format!(
                    "'{op}' requires bool operands, got {}",
                    other.type_name()
                ))),
            },
        }
    }

    fn eval_ordering(
        &self,
        op: Operator,
        left: NodeId,
        right: NodeId,
        depth: usize,
    ) -> Result<Value, CelError> {
        let a = self.eval(left, depth + 1)?;
        let b = self.eval(right, depth + 1)?;
        if !a.comparable_with(&b) {
            return Err(CelError::Type(format!(
                "cannot compare {} and {} with '{op}'",
                a.type_name(),
                b.type_name()
            )));
        }
        // A None ordering on a comparable pair means a NaN operand; IEEE
        // says every ordering test on NaN is false
        let result = match a.compare(&b) {
            Some(ord) => match op {
                Operator::Lt => ord == Ordering::Less,
                Operator::Le => ord != Ordering::Greater,
                Operator::Gt => ord == Ordering::Greater,
                Operator::Ge => ord != Ordering::Less,
                _ => unreachable!(),
            },
            None => false,
        };
        Ok(Value::Bool(result))
    }

    fn eval_ternary(
        &self,
        cond: NodeId,
        then: NodeId,
        other: NodeId,
        depth: usize,
    ) -> Result<Value, CelError> {
        match self.eval(cond, depth + 1)? {
            Value::Bool(true) => self.eval(then, depth + 1),
            Value::Bool(false) => self.eval(other, depth + 1),
            value => Err(CelError::Type(format!(
                "ternary condition must be a bool, got {}",
                value.type_name()
            ))),
        }
    }

    /// Only a plain identifier naming a built-in can be called; the context
    /// is consulted first so a binding always shadows the registry.
    fn eval_call(&self, callee: NodeId, args: &[NodeId], depth: usize) -> Result<Value, CelError> {
        let Node::Ident(name) = self.program.node(callee) else {
            return Err(CelError::Type(format!(
                "'{}' is not a function",
                self.program.render_node(callee)
            )));
        };
        if self.context.contains_key(name) {
            return Err(CelError::Type(format!("'{name}' is not a function")));
        }
        if !builtins::is_builtin(name) {
            return Err(CelError::Undefined(format!(
                "undefined function '{name}'"
            )));
        }
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.eval(*arg, depth + 1)?);
        }
        builtins::call(name, &values)
    }

    fn eval_map(&self, entries: &[(NodeId, NodeId)], depth: usize) -> Result<Value, CelError> {
        let mut map = IndexMap::with_capacity(entries.len());
        for (key_id, value_id) in entries {
            let key = MapKey::try_from(self.eval(*key_id, depth + 1)?).map_err(|value| {
                CelError::Type(format!(
                    "map key must be null, bool, int, or string, got {}",
                    value.type_name()
                ))
            })?;
            if map.contains_key(&key) {
                return Err(CelError::Evaluation(format!("duplicate map key {key}")));
            }
            let value = self.eval(*value_id, depth + 1)?;
            map.insert(key, value);
        }
        Ok(Value::Map(map))
    }
}

fn add(a: Value, b: Value) -> Result<Value, CelError> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => x
            .checked_add(y)
            .map(Value::Int)
            .ok_or_else(|| CelError::Evaluation("integer overflow in '+'".to_string())),
        (Value::Float(x), Value::Float(y)) => Ok(Value::Float(x + y)),
        (Value::Int(x), Value::Float(y)) => Ok(Value::Float(x as f64 + y)),
        (Value::Float(x), Value::Int(y)) => Ok(Value::Float(x + y as f64)),
        (Value::String(mut x), Value::String(y)) => {
            x.push_str(&y);
            Ok(Value::String(x))
        }
        (Value::List(mut x), Value::List(y)) => {
            x.extend(y);
            Ok(Value::List(x))
        }
        (a, b) => Err(CelError::Type(format!(
            "cannot add {} and {}",
            a.type_name(),
            b.type_name()
        ))),
    }
}

/// `-`, `*`, `/`, `%` on numbers. Pure-int stays int with overflow and
/// zero-divisor checks; any double operand switches to IEEE arithmetic,
/// where division by zero is inf/NaN rather than an error.
fn arith(op: Operator, a: Value, b: Value) -> Result<Value, CelError> {
    if let (Value::Int(x), Value::Int(y)) = (&a, &b) {
        let (x, y) = (*x, *y);
        let result = match op {
            Operator::Minus => x.checked_sub(y),
            Operator::Star => x.checked_mul(y),
            Operator::Slash => {
                if y == 0 {
                    return Err(CelError::Evaluation("division by zero".to_string()));
                }
                x.checked_div(y)
            }
            Operator::Percent => {
                if y == 0 {
                    return Err(CelError::Evaluation("modulo by zero".to_string()));
                }
                x.checked_rem(y)
            }
            _ => unreachable!(),
        };
        return result
            .map(Value::Int)
            .ok_or_else(|| CelError::Evaluation(format!("integer overflow in '{op}'")));
    }

    // '%' never promotes
    if op == Operator::Percent {
        return Err(CelError::Type(format!(
            "'%' requires integer operands, got {} and {}",
            a.type_name(),
            b.type_name()
        )));
    }

    let pair = match (&a, &b) {
        (Value::Float(x), Value::Float(y)) => Some((*x, *y)),
        (Value::Int(x), Value::Float(y)) => Some((*x as f64, *y)),
        (Value::Float(x), Value::Int(y)) => Some((*x, *y as f64)),
        _ => None,
    };
    match pair {
        Some((x, y)) => Ok(Value::Float(match op {
            Operator::Minus => x - y,
            Operator::Star => x * y,
            Operator::Slash => x / y,
            _ => unreachable!(),
        })),
        None => Err(CelError::Type(format!(
            "cannot apply '{op}' to {} and {}",
            a.type_name(),
            b.type_name()
        ))),
    }
}
