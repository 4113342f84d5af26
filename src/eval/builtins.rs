//! The built-in function registry. Consulted only after a context miss, so
//! a caller's binding always wins over a built-in name.

use regex::Regex;

use crate::error::CelError;
use crate::value::Value;

const NAMES: &[&str] = &[
    "size",
    "contains",
    "startsWith",
    "endsWith",
    "matches",
    "int",
    "float",
    "bool",
    "string",
    "type",
];

pub(crate) fn is_builtin(name: &str) -> bool {
    NAMES.contains(&name)
}

pub(crate) fn call(name: &str, args: &[Value]) -> Result<Value, CelError> {
    match name {
        "size" => size(args),
        "contains" => contains(args),
        "startsWith" => starts_with(args),
        "endsWith" => ends_with(args),
        "matches" => matches_fn(args),
        "int" => to_int(args),
        "float" => to_float(args),
        "bool" => to_bool(args),
        "string" => to_string(args),
        "type" => type_of(args),
        other => Err(CelError::Undefined(format!(
            "undefined function '{other}'"
        ))),
    }
}

fn expect_arity(name: &str, args: &[Value], arity: usize) -> Result<(), CelError> {
    if args.len() == arity {
        Ok(())
    } else {
        Err(CelError::Type(format!(
            "{name}() takes {arity} argument{}, got {}",
            if arity == 1 { "" } else { "s" },
            args.len()
        )))
    }
}

/// Length of a string in code points, or element/entry count of a list/map.
fn size(args: &[Value]) -> Result<Value, CelError> {
    expect_arity("size", args, 1)?;
    match &args[0] {
        Value::String(s) => Ok(Value::Int(s.chars().count() as i64)),
        Value::List(items) => Ok(Value::Int(items.len() as i64)),
        Value::Map(map) => Ok(Value::Int(map.len() as i64)),
        other => Err(CelError::Type(format!(
            "size() requires a string, list, or map, got {}",
            other.type_name()
        ))),
    }
}

/// Substring test on strings, structural membership test on lists.
fn contains(args: &[Value]) -> Result<Value, CelError> {
    expect_arity("contains", args, 2)?;
    match (&args[0], &args[1]) {
        (Value::String(haystack), Value::String(needle)) => {
            Ok(Value::Bool(haystack.contains(needle.as_str())))
        }
        (Value::List(items), needle) => Ok(Value::Bool(items.iter().any(|item| item == needle))),
        (a, b) => Err(CelError::Type(format!(
            "contains() requires (string, string) or (list, value), got ({}, {})",
            a.type_name(),
            b.type_name()
        ))),
    }
}

fn starts_with(args: &[Value]) -> Result<Value, CelError> {
    expect_arity("startsWith", args, 2)?;
    match (&args[0], &args[1]) {
        (Value::String(s), Value::String(prefix)) => Ok(Value::Bool(s.starts_with(prefix))),
        (a, b) => Err(CelError::Type(format!(
            "startsWith() requires two strings, got ({}, {})",
            a.type_name(),
            b.type_name()
        ))),
    }
}

fn ends_with(args: &[Value]) -> Result<Value, CelError> {
    expect_arity("endsWith", args, 2)?;
    match (&args[0], &args[1]) {
        (Value::String(s), Value::String(suffix)) => Ok(Value::Bool(s.ends_with(suffix))),
        (a, b) => Err(CelError::Type(format!(
            "endsWith() requires two strings, got ({}, {})",
            a.type_name(),
            b.type_name()
        ))),
    }
}

/// Anchored full match. The pattern flavor is the `regex` crate's
/// (Perl-style classes, no backreferences); anchoring wraps the pattern in
/// a non-capturing group.
fn matches_fn(args: &[Value]) -> Result<Value, CelError> {
    expect_arity("matches", args, 2)?;
    match (&args[0], &args[1]) {
        (Value::String(text), Value::String(pattern)) => {
            let anchored = format!("^(?:{pattern})$");
            let re = Regex::new(&anchored).map_err(|e| {
                CelError::Evaluation(format!("invalid regular expression: {e}"))
            })?;
            Ok(Value::Bool(re.is_match(text)))
        }
        (a, b) => Err(CelError::Type(format!(
            "matches() requires two strings, got ({}, {})",
            a.type_name(),
            b.type_name()
        ))),
    }
}

fn to_int(args: &[Value]) -> Result<Value, CelError> {
    expect_arity("int", args, 1)?;
    match &args[0] {
        Value::Bool(b) => Ok(Value::Int(i64::from(*b))),
        Value::Int(n) => Ok(Value::Int(*n)),
        Value::Float(x) => {
            let truncated = x.trunc();
            // i64::MAX as f64 rounds up to 2^63, so >= excludes it correctly
            if truncated.is_nan()
                || truncated < i64::MIN as f64
                || truncated >= i64::MAX as f64
            {
                Err(CelError::Evaluation(format!(
                    "cannot convert {} to int",
                    crate::value::float_repr(*x)
                )))
            } else {
                Ok(Value::Int(truncated as i64))
            }
        }
        Value::String(s) => s.parse::<i64>().map(Value::Int).map_err(|_| {
            CelError::Evaluation(format!("cannot convert '{s}' to int"))
        }),
        other => Err(CelError::Type(format!(
            "int() requires a bool, int, double, or string, got {}",
            other.type_name()
        ))),
    }
}

fn to_float(args: &[Value]) -> Result<Value, CelError> {
    expect_arity("float", args, 1)?;
    match &args[0] {
        Value::Bool(b) => Ok(Value::Float(if *b { 1.0 } else { 0.0 })),
        Value::Int(n) => Ok(Value::Float(*n as f64)),
        Value::Float(x) => Ok(Value::Float(*x)),
        Value::String(s) => s.parse::<f64>().map(Value::Float).map_err(|_| {
            CelError::Evaluation(format!("cannot convert '{s}' to double"))
        }),
        other => Err(CelError::Type(format!(
            "float() requires a bool, int, double, or string, got {}",
            other.type_name()
        ))),
    }
}

/// Only bools and the exact strings "true"/"false" convert.
fn to_bool(args: &[Value]) -> Result<Value, CelError> {
    expect_arity("bool", args, 1)?;
    match &args[0] {
        Value::Bool(b) => Ok(Value::Bool(*b)),
        Value::String(s) => match s.as_str() {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            other => Err(CelError::Evaluation(format!(
                "cannot convert '{other}' to bool"
            ))),
        },
        other => Err(CelError::Type(format!(
            "bool() requires a bool or string, got {}",
            other.type_name()
        ))),
    }
}

fn to_string(args: &[Value]) -> Result<Value, CelError> {
    expect_arity("string", args, 1)?;
    Ok(Value::String(args[0].to_string()))
}

fn type_of(args: &[Value]) -> Result<Value, CelError> {
    expect_arity("type", args, 1)?;
    Ok(Value::String(args[0].type_name().to_string()))
}
