//! Lexer over the raw source bytes. Byte-offset aware so diagnostics can
//! point a caret at the offending character.
//!
//! Handles CEL's token set: identifiers and the three keyword literals,
//! decimal integers, floats with fraction and/or exponent, single- or
//! double-quoted strings with a fixed escape set, `//` line comments, and
//! longest-match operators.

use std::iter::Peekable;
use std::str::CharIndices;

use tracing::warn;

use crate::parser::{LexError, Operator, Punct, Token, TokenKind};

pub struct Lexer<'a> {
    src: &'a str,
    chars: Peekable<CharIndices<'a>>,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Lexer<'a> {
        Lexer {
            src: input,
            chars: input.char_indices().peekable(),
        }
    }

    fn bump(&mut self) -> Option<(usize, char)> {
        self.chars.next()
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().map(|&(_, c)| c)
    }

    /// One character past the current peek. Used only to tell `/` from `//`.
    fn peek_second(&self) -> Option<char> {
        self.chars.clone().nth(1).map(|(_, c)| c)
    }

    /// Byte offset of the next character, or the source length at the end.
    fn offset(&mut self) -> usize {
        self.chars.peek().map_or(self.src.len(), |&(i, _)| i)
    }

    pub fn next_token(&mut self) -> Result<Token, LexError> {
        self.skip_trivia();
        let offset = self.offset();
        let kind = match self.peek() {
            None => TokenKind::Eof,
            Some(c) => match c {
                'a'..='z' | 'A'..='Z' | '_' => self.lex_ident(),
                '0'..='9' => self.lex_number(offset)?,
                '\'' | '"' => self.lex_string(offset)?,
                '+' => self.single(Operator::Plus),
                '-' => self.single(Operator::Minus),
                '*' => self.single(Operator::Star),
                '/' => self.single(Operator::Slash),
                '%' => self.single(Operator::Percent),
                '!' => {
                    self.bump();
                    if self.peek() == Some('=') {
                        self.bump();
                        TokenKind::Op(Operator::Ne)
                    } else {
                        TokenKind::Op(Operator::Not)
                    }
                }
                '<' => {
                    self.bump();
                    if self.peek() == Some('=') {
                        self.bump();
                        TokenKind::Op(Operator::Le)
                    } else {
                        TokenKind::Op(Operator::Lt)
                    }
                }
                '>' => {
                    self.bump();
                    if self.peek() == Some('=') {
                        self.bump();
                        TokenKind::Op(Operator::Ge)
                    } else {
                        TokenKind::Op(Operator::Gt)
                    }
                }
                '=' => {
                    self.bump();
                    if self.peek() == Some('=') {
                        self.bump();
                        TokenKind::Op(Operator::Eq)
                    } else {
                        // Hey pal, this isn't that kind of statement!
                        return Err(LexError::SolitaryEquals { offset });
                    }
                }
                '&' => {
                    self.bump();
                    if self.peek() == Some('&') {
                        self.bump();
                        TokenKind::Op(Operator::And)
                    } else {
                        return Err(LexError::HalfOperator { ch: '&', offset });
                    }
                }
                '|' => {
                    self.bump();
                    if self.peek() == Some('|') {
                        self.bump();
                        TokenKind::Op(Operator::Or)
                    } else {
                        return Err(LexError::HalfOperator { ch: '|', offset });
                    }
                }
                '?' => self.punct(Punct::Question),
                ':' => self.punct(Punct::Colon),
                '.' => self.punct(Punct::Dot),
                ',' => self.punct(Punct::Comma),
                '(' => self.punct(Punct::Lparen),
                ')' => self.punct(Punct::Rparen),
                '[' => self.punct(Punct::Lbracket),
                ']' => self.punct(Punct::Rbracket),
                '{' => self.punct(Punct::Lbrace),
                '}' => self.punct(Punct::Rbrace),
                other => {
                    return Err(LexError::UnexpectedChar { ch: other, offset });
                }
            },
        };
        Ok(Token { kind, offset })
    }

    /// Skips whitespace (space, tab, CR, LF) and `//` line comments.
    fn skip_trivia(&mut self) {
        loop {
            match self.peek() {
                Some(' ' | '\t' | '\r' | '\n') => {
                    self.bump();
                }
                Some('/') if self.peek_second() == Some('/') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                _ => return,
            }
        }
    }

    fn single(&mut self, op: Operator) -> TokenKind {
        self.bump();
        TokenKind::Op(op)
    }

    fn punct(&mut self, p: Punct) -> TokenKind {
        self.bump();
        TokenKind::Punct(p)
    }

    fn lex_ident(&mut self) -> TokenKind {
        let mut name = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                name.push(c);
                self.bump();
            } else {
                break;
            }
        }
        match name.as_str() {
            "true" => TokenKind::Bool(true),
            "false" => TokenKind::Bool(false),
            "null" => TokenKind::Null,
            _ => TokenKind::Ident(name),
        }
    }

    /// Lexes a decimal integer or float. The literal is normalized into a
    /// buffer so an empty fraction ("1.") still parses as a float. A leading
    /// sign is the parser's business, not ours.
    fn lex_number(&mut self, offset: usize) -> Result<TokenKind, LexError> {
        let mut digits = String::new();
        self.take_digits(&mut digits);

        let mut is_float = false;
        if self.peek() == Some('.') {
            is_float = true;
            self.bump();
            digits.push('.');
            let before = digits.len();
            self.take_digits(&mut digits);
            if digits.len() == before {
                digits.push('0');
            }
        }
        if let Some(e @ ('e' | 'E')) = self.peek() {
            is_float = true;
            self.bump();
            digits.push(e);
            if let Some(sign @ ('+' | '-')) = self.peek() {
                self.bump();
                digits.push(sign);
            }
            let before = digits.len();
            self.take_digits(&mut digits);
            if digits.len() == before {
                return Err(LexError::MalformedExponent { offset });
            }
        }

        if is_float {
            match digits.parse::<f64>() {
                Ok(x) => Ok(TokenKind::Float(x)),
                Err(_) => Err(LexError::MalformedExponent { offset }),
            }
        } else {
            match digits.parse::<i64>() {
                Ok(n) => Ok(TokenKind::Int(n)),
                Err(_) => {
                    warn!("integer literal {digits} does not fit in 64 bits");
                    Err(LexError::IntOutOfRange { offset })
                }
            }
        }
    }

    fn take_digits(&mut self, buf: &mut String) {
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                buf.push(c);
                self.bump();
            } else {
                break;
            }
        }
    }

    /// Lexes a quoted string, decoding escapes as it goes. The token carries
    /// the decoded text; `offset` is the opening quote.
    fn lex_string(&mut self, offset: usize) -> Result<TokenKind, LexError> {
        let (_, quote) = self.bump().expect("caller peeked a quote");
        let mut text = String::new();
        loop {
            match self.bump() {
                None => return Err(LexError::UnterminatedString { offset }),
                Some((at, '\n')) => return Err(LexError::NewlineInString { offset: at }),
                Some((_, c)) if c == quote => return Ok(TokenKind::Str(text)),
                Some((at, '\\')) => match self.bump() {
                    None => return Err(LexError::UnterminatedString { offset }),
                    Some((_, '\\')) => text.push('\\'),
                    Some((_, '\'')) => text.push('\''),
                    Some((_, '"')) => text.push('"'),
                    Some((_, 'n')) => text.push('\n'),
                    Some((_, 't')) => text.push('\t'),
                    Some((_, 'r')) => text.push('\r'),
                    Some((_, '0')) => text.push('\0'),
                    Some((_, other)) => {
                        return Err(LexError::UnknownEscape {
                            ch: other,
                            offset: at,
                        });
                    }
                },
                Some((_, c)) => text.push(c),
            }
        }
    }
}

// Mostly focused on verifying offsets, literal decoding, and longest-match
// operator selection.
#[cfg(test)]
mod tests {
    use super::*;

    fn assert_token(lexer: &mut Lexer, expected: TokenKind, offset: usize) {
        let token = lexer.next_token().unwrap();
        assert_eq!(token.kind, expected, "token mismatch at offset {offset}");
        assert_eq!(token.offset, offset, "offset mismatch for {expected:?}");
    }

    fn ident(name: &str) -> TokenKind {
        TokenKind::Ident(name.to_string())
    }

    #[test]
    fn test_single_char_tokens_no_whitespace() {
        let mut lexer = Lexer::new("a+b");
        assert_token(&mut lexer, ident("a"), 0);
        assert_token(&mut lexer, TokenKind::Op(Operator::Plus), 1);
        assert_token(&mut lexer, ident("b"), 2);
        assert_token(&mut lexer, TokenKind::Eof, 3);
    }

    #[test]
    fn test_whitespace_is_skipped() {
        let mut lexer = Lexer::new("a \t + \r\n b");
        assert_token(&mut lexer, ident("a"), 0);
        assert_token(&mut lexer, TokenKind::Op(Operator::Plus), 4);
        assert_token(&mut lexer, ident("b"), 9);
        assert_token(&mut lexer, TokenKind::Eof, 10);
    }

    #[test]
    fn test_line_comments() {
        let mut lexer = Lexer::new("a // rest of line\n+ b // trailing");
        assert_token(&mut lexer, ident("a"), 0);
        assert_token(&mut lexer, TokenKind::Op(Operator::Plus), 18);
        assert_token(&mut lexer, ident("b"), 20);
        assert_token(&mut lexer, TokenKind::Eof, 33);
    }

    #[test]
    fn test_division_is_not_a_comment() {
        let mut lexer = Lexer::new("a / b");
        assert_token(&mut lexer, ident("a"), 0);
        assert_token(&mut lexer, TokenKind::Op(Operator::Slash), 2);
        assert_token(&mut lexer, ident("b"), 4);
    }

    #[test]
    fn test_keywords_lex_as_literals() {
        let mut lexer = Lexer::new("true false null truely");
        assert_token(&mut lexer, TokenKind::Bool(true), 0);
        assert_token(&mut lexer, TokenKind::Bool(false), 5);
        assert_token(&mut lexer, TokenKind::Null, 11);
        // Prefix match must not turn an identifier into a keyword
        assert_token(&mut lexer, ident("truely"), 16);
    }

    #[test]
    fn test_identifier_charset() {
        let mut lexer = Lexer::new("_x x_1 camelCase");
        assert_token(&mut lexer, ident("_x"), 0);
        assert_token(&mut lexer, ident("x_1"), 3);
        assert_token(&mut lexer, ident("camelCase"), 7);
    }

    // ==================== Numbers ====================

    #[test]
    fn test_integer_literals() {
        let mut lexer = Lexer::new("0 7 123");
        assert_token(&mut lexer, TokenKind::Int(0), 0);
        assert_token(&mut lexer, TokenKind::Int(7), 2);
        assert_token(&mut lexer, TokenKind::Int(123), 4);
    }

    #[test]
    fn test_integer_max() {
        let mut lexer = Lexer::new("9223372036854775807");
        assert_token(&mut lexer, TokenKind::Int(i64::MAX), 0);
    }

    #[test]
    fn test_integer_overflow_is_an_error() {
        let mut lexer = Lexer::new("9223372036854775808");
        assert_eq!(
            lexer.next_token(),
            Err(LexError::IntOutOfRange { offset: 0 })
        );
    }

    #[test]
    fn test_float_with_fraction() {
        let mut lexer = Lexer::new("3.25");
        assert_token(&mut lexer, TokenKind::Float(3.25), 0);
    }

    #[test]
    fn test_float_with_empty_fraction() {
        let mut lexer = Lexer::new("3.");
        assert_token(&mut lexer, TokenKind::Float(3.0), 0);
    }

    #[test]
    fn test_float_with_exponent() {
        let mut lexer = Lexer::new("1e3 2.5e-2 7E+1");
        assert_token(&mut lexer, TokenKind::Float(1000.0), 0);
        assert_token(&mut lexer, TokenKind::Float(0.025), 4);
        assert_token(&mut lexer, TokenKind::Float(70.0), 11);
    }

    #[test]
    fn test_exponent_without_digits_is_an_error() {
        let mut lexer = Lexer::new("1e");
        assert_eq!(
            lexer.next_token(),
            Err(LexError::MalformedExponent { offset: 0 })
        );

        let mut lexer = Lexer::new("1e+");
        assert_eq!(
            lexer.next_token(),
            Err(LexError::MalformedExponent { offset: 0 })
        );
    }

    #[test]
    fn test_minus_is_not_part_of_the_literal() {
        let mut lexer = Lexer::new("-5");
        assert_token(&mut lexer, TokenKind::Op(Operator::Minus), 0);
        assert_token(&mut lexer, TokenKind::Int(5), 1);
    }

    #[test]
    fn test_number_followed_by_member_dot_lexes_as_float() {
        // "1.x" takes the dot into the number; the parser rejects what's left
        let mut lexer = Lexer::new("1.x");
        assert_token(&mut lexer, TokenKind::Float(1.0), 0);
        assert_token(&mut lexer, ident("x"), 2);
    }

    // ==================== Strings ====================

    #[test]
    fn test_double_and_single_quotes() {
        let mut lexer = Lexer::new("\"abc\" 'def'");
        assert_token(&mut lexer, TokenKind::Str("abc".into()), 0);
        assert_token(&mut lexer, TokenKind::Str("def".into()), 6);
    }

    #[test]
    fn test_empty_string() {
        let mut lexer = Lexer::new("''");
        assert_token(&mut lexer, TokenKind::Str(String::new()), 0);
    }

    #[test]
    fn test_escapes_are_decoded() {
        let mut lexer = Lexer::new(r#"'a\n\t\r\0\\\'\"b'"#);
        assert_token(&mut lexer, TokenKind::Str("a\n\t\r\0\\'\"b".into()), 0);
    }

    #[test]
    fn test_other_quote_kind_needs_no_escape() {
        let mut lexer = Lexer::new(r#""it's""#);
        assert_token(&mut lexer, TokenKind::Str("it's".into()), 0);
    }

    #[test]
    fn test_unknown_escape_is_an_error() {
        let mut lexer = Lexer::new(r"'a\qb'");
        assert_eq!(
            lexer.next_token(),
            Err(LexError::UnknownEscape { ch: 'q', offset: 2 })
        );
    }

    #[test]
    fn test_unterminated_string_points_at_opening_quote() {
        let mut lexer = Lexer::new("a + 'oops");
        lexer.next_token().unwrap();
        lexer.next_token().unwrap();
        assert_eq!(
            lexer.next_token(),
            Err(LexError::UnterminatedString { offset: 4 })
        );
    }

    #[test]
    fn test_raw_newline_in_string_is_an_error() {
        let mut lexer = Lexer::new("'a\nb'");
        assert_eq!(
            lexer.next_token(),
            Err(LexError::NewlineInString { offset: 2 })
        );
    }

    // ==================== Operators ====================

    #[test]
    fn test_longest_match() {
        let mut lexer = Lexer::new("<= < >= > == != ! && ||");
        assert_token(&mut lexer, TokenKind::Op(Operator::Le), 0);
        assert_token(&mut lexer, TokenKind::Op(Operator::Lt), 3);
        assert_token(&mut lexer, TokenKind::Op(Operator::Ge), 5);
        assert_token(&mut lexer, TokenKind::Op(Operator::Gt), 8);
        assert_token(&mut lexer, TokenKind::Op(Operator::Eq), 10);
        assert_token(&mut lexer, TokenKind::Op(Operator::Ne), 13);
        assert_token(&mut lexer, TokenKind::Op(Operator::Not), 16);
        assert_token(&mut lexer, TokenKind::Op(Operator::And), 18);
        assert_token(&mut lexer, TokenKind::Op(Operator::Or), 21);
    }

    #[test]
    fn test_puncts() {
        let mut lexer = Lexer::new("?:.,()[]{}");
        assert_token(&mut lexer, TokenKind::Punct(Punct::Question), 0);
        assert_token(&mut lexer, TokenKind::Punct(Punct::Colon), 1);
        assert_token(&mut lexer, TokenKind::Punct(Punct::Dot), 2);
        assert_token(&mut lexer, TokenKind::Punct(Punct::Comma), 3);
        assert_token(&mut lexer, TokenKind::Punct(Punct::Lparen), 4);
        assert_token(&mut lexer, TokenKind::Punct(Punct::Rparen), 5);
        assert_token(&mut lexer, TokenKind::Punct(Punct::Lbracket), 6);
        assert_token(&mut lexer, TokenKind::Punct(Punct::Rbracket), 7);
        assert_token(&mut lexer, TokenKind::Punct(Punct::Lbrace), 8);
        assert_token(&mut lexer, TokenKind::Punct(Punct::Rbrace), 9);
    }

    #[test]
    fn test_solitary_equals() {
        let mut lexer = Lexer::new("a = b");
        lexer.next_token().unwrap();
        assert_eq!(
            lexer.next_token(),
            Err(LexError::SolitaryEquals { offset: 2 })
        );
    }

    #[test]
    fn test_half_operators() {
        let mut lexer = Lexer::new("a & b");
        lexer.next_token().unwrap();
        assert_eq!(
            lexer.next_token(),
            Err(LexError::HalfOperator { ch: '&', offset: 2 })
        );

        let mut lexer = Lexer::new("|");
        assert_eq!(
            lexer.next_token(),
            Err(LexError::HalfOperator { ch: '|', offset: 0 })
        );
    }

    #[test]
    fn test_unexpected_character() {
        let mut lexer = Lexer::new("a @ b");
        lexer.next_token().unwrap();
        assert_eq!(
            lexer.next_token(),
            Err(LexError::UnexpectedChar { ch: '@', offset: 2 })
        );
    }

    #[test]
    fn test_eof_offsets() {
        let mut lexer = Lexer::new("");
        assert_token(&mut lexer, TokenKind::Eof, 0);

        let mut lexer = Lexer::new("ab ");
        assert_token(&mut lexer, ident("ab"), 0);
        assert_token(&mut lexer, TokenKind::Eof, 3);
    }
}
