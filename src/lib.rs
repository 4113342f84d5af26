//! Parser and tree-walking evaluator for the Common Expression Language
//! (CEL): side-effect-free predicates and transformations over a caller
//! supplied variable context.
//!
//! An expression is compiled once into a [`Program`] (or an [`Expression`],
//! which pins an evaluation [`Policy`] to it) and evaluated any number of
//! times against different contexts:
//!
//! ```
//! use celparse::{Context, Expression, Value};
//!
//! let expr = Expression::compile("a + b * 2").unwrap();
//! let mut context = Context::new();
//! context.insert("a".to_string(), Value::from(10));
//! context.insert("b".to_string(), Value::from(5));
//! assert_eq!(expr.evaluate(&context).unwrap(), Value::Int(20));
//! ```
//!
//! Failures are diagnosed as one of four [`CelError`] kinds; syntax errors
//! render with a caret pointing into the source.

pub mod error;
pub mod eval;
pub mod parser;
pub mod value;

pub use error::{CelError, SyntaxError};
pub use eval::{Context, Policy};
pub use parser::Program;
pub use value::{MapKey, Value};

use parser::parse::Parser;

/// Parses a source string into an immutable [`Program`]. Pure and
/// deterministic; the first offense aborts with a [`CelError::Syntax`].
pub fn parse(source: &str) -> Result<Program, CelError> {
    let mut nodes = Vec::new();
    let root = Parser::new(source, &mut nodes)
        .and_then(Parser::parse)
        .map_err(|e| SyntaxError::new(e.to_string(), e.offset(), source))?;
    Ok(Program::new(nodes, root))
}

/// Evaluates a parsed program under the default policy
/// (`allow_undeclared_vars = true`).
pub fn evaluate(program: &Program, context: &Context) -> Result<Value, CelError> {
    eval::evaluate(program, context, Policy::default())
}

/// A compiled expression: a parsed [`Program`] plus the [`Policy`] it will
/// always be evaluated under. Immutable, so freely shareable across threads
/// and reusable across contexts.
#[derive(Debug, Clone)]
pub struct Expression {
    program: Program,
    policy: Policy,
}

impl Expression {
    /// Compiles with the default policy (`allow_undeclared_vars = true`).
    pub fn compile(source: &str) -> Result<Expression, CelError> {
        Expression::with_policy(source, Policy::default())
    }

    pub fn with_policy(source: &str, policy: Policy) -> Result<Expression, CelError> {
        Ok(Expression {
            program: parse(source)?,
            policy,
        })
    }

    pub fn evaluate(&self, context: &Context) -> Result<Value, CelError> {
        eval::evaluate(&self.program, context, self.policy)
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn policy(&self) -> Policy {
        self.policy
    }
}


// Universal properties from the contract: determinism, precedence against
// the parenthesized reading, short-circuiting, literal round-trips,
// rendering idempotence, concatenation associativity.
#[cfg(test)]
mod properties {
    use proptest::prelude::*;

    use super::*;
    use crate::parser::lex::Lexer;
    use crate::parser::TokenKind;
    use crate::value::float_repr;

    fn int_ctx(pairs: &[(&str, i64)]) -> Context {
        pairs
            .iter()
            .map(|(name, value)| (name.to_string(), Value::Int(*value)))
            .collect()
    }

    proptest! {
        #[test]
        fn prop_precedence_matches_parenthesized(
            a in -1_000_000i64..1_000_000,
            b in -1_000_000i64..1_000_000,
            c in -1_000_000i64..1_000_000,
        ) {
            let context = int_ctx(&[("a", a), ("b", b), ("c", c)]);
            let flat = evaluate(&parse("a + b * c").unwrap(), &context).unwrap();
            let grouped = evaluate(&parse("a + (b * c)").unwrap(), &context).unwrap();
            prop_assert_eq!(flat, grouped);

            let flat = evaluate(&parse("a - b - c").unwrap(), &context).unwrap();
            let grouped = evaluate(&parse("(a - b) - c").unwrap(), &context).unwrap();
            prop_assert_eq!(flat, grouped);
        }

        #[test]
        fn prop_determinism(a in any::<i64>(), b in -1000i64..1000) {
            let context = int_ctx(&[("a", a), ("b", b)]);
            let expr = Expression::compile("a * 2 + b < a ? a : b").unwrap();
            let first = expr.evaluate(&context);
            let second = expr.evaluate(&context);
            prop_assert_eq!(first, second);
        }

        #[test]
        fn prop_short_circuit_guards_division(b in any::<bool>()) {
            let context = ctx_bool(b);
            let result = evaluate(&parse("b || (1 / 0 == 0)").unwrap(), &context);
            if b {
                prop_assert_eq!(result, Ok(Value::Bool(true)));
            } else {
                prop_assert!(matches!(result, Err(CelError::Evaluation(_))));
            }
        }

        #[test]
        fn prop_int_literal_round_trip(n in 0i64..i64::MAX) {
            let rendered = n.to_string();
            let token = Lexer::new(&rendered).next_token().unwrap();
            prop_assert_eq!(token.kind, TokenKind::Int(n));
        }

        #[test]
        fn prop_float_literal_round_trip(x in 0.0f64..1e300) {
            let rendered = float_repr(x);
            let token = Lexer::new(&rendered).next_token().unwrap();
            prop_assert_eq!(token.kind, TokenKind::Float(x));
        }

        #[test]
        fn prop_string_rendering_idempotent(text in ".*", n in any::<i64>()) {
            for value in [Value::from(text.as_str()), Value::Int(n)] {
                let context: Context =
                    [("x".to_string(), value)].into_iter().collect();
                let once = evaluate(&parse("string(x)").unwrap(), &context).unwrap();
                let twice = evaluate(&parse("string(string(x))").unwrap(), &context).unwrap();
                prop_assert_eq!(once, twice);
            }
        }

        #[test]
        fn prop_string_concat_associative(a in ".*", b in ".*", c in ".*") {
            let context: Context = [
                ("a".to_string(), Value::from(a.as_str())),
                ("b".to_string(), Value::from(b.as_str())),
                ("c".to_string(), Value::from(c.as_str())),
            ]
            .into_iter()
            .collect();
            let left = evaluate(&parse("(a + b) + c").unwrap(), &context).unwrap();
            let right = evaluate(&parse("a + (b + c)").unwrap(), &context).unwrap();
            prop_assert_eq!(left, right);
        }

        #[test]
        fn prop_list_concat_associative(
            a in proptest::collection::vec(-100i64..100, 0..5),
            b in proptest::collection::vec(-100i64..100, 0..5),
            c in proptest::collection::vec(-100i64..100, 0..5),
        ) {
            let as_list = |items: &[i64]| Value::List(items.iter().copied().map(Value::Int).collect());
            let context: Context = [
                ("a".to_string(), as_list(&a)),
                ("b".to_string(), as_list(&b)),
                ("c".to_string(), as_list(&c)),
            ]
            .into_iter()
            .collect();
            let left = evaluate(&parse("(a + b) + c").unwrap(), &context).unwrap();
            let right = evaluate(&parse("a + (b + c)").unwrap(), &context).unwrap();
            prop_assert_eq!(left, right);
        }
    }

    fn ctx_bool(b: bool) -> Context {
        [("b".to_string(), Value::Bool(b))].into_iter().collect()
    }
}
