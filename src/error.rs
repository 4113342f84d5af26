//! Public error taxonomy. Everything an expression can fail with is one of
//! four kinds; callers match on the variant, the message text is informative
//! only.

use std::fmt;

use thiserror::Error;

/// Any failure from parsing or evaluating an expression.
#[derive(Error, Debug, PartialEq)]
pub enum CelError {
    /// The source text is not a well-formed expression. Carries the offset
    /// and the original expression and renders with a caret pointer.
    #[error(transparent)]
    Syntax(#[from] SyntaxError),
    /// An operation was applied to values of the wrong type.
    #[error("type error: {0}")]
    Type(String),
    /// A variable, field, or map key was referenced but not present.
    #[error("undefined: {0}")]
    Undefined(String),
    /// Evaluation failed for a reason other than typing: division by zero,
    /// index out of range, duplicate map key, bad coercion, invalid regex.
    #[error("evaluation error: {0}")]
    Evaluation(String),
}

/// A diagnosed syntax error: message, zero-based byte offset, and the
/// expression it occurred in.
#[derive(Debug, PartialEq, Clone)]
pub struct SyntaxError {
    pub message: String,
    pub offset: usize,
    pub expression: String,
}

impl SyntaxError {
    pub fn new(message: impl Into<String>, offset: usize, expression: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            offset,
            expression: expression.into(),
        }
    }
}

impl fmt::Display for SyntaxError {
    /// Three lines: the message, the expression, and a caret under the
    /// offending character.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.message)?;
        writeln!(f, "{}", self.expression)?;
        write!(f, "{}^", " ".repeat(self.offset))
    }
}

impl std::error::Error for SyntaxError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_caret_points_at_offset() {
        let err = SyntaxError::new("expected an expression, found '*'", 4, "a + * b");
        let rendered = err.to_string();
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1], "a + * b");
        assert_eq!(lines[2], "    ^");
    }

    #[test]
    fn test_caret_at_offset_zero() {
        let err = SyntaxError::new("unexpected character '@'", 0, "@");
        assert_eq!(err.to_string(), "unexpected character '@'\n@\n^");
    }

    #[test]
    fn test_kinds_are_distinguishable() {
        let type_err = CelError::Type("cannot add int and string".into());
        let undef = CelError::Undefined("undefined variable 'x'".into());
        assert_ne!(type_err, undef);
        assert!(matches!(type_err, CelError::Type(_)));
    }
}
