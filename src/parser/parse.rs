//! Pratt parser: token stream to node arena via precedence climbing.
//!
//! The first offense aborts the parse; no recovery, no partial trees.

use super::lex::Lexer;
use super::{Literal, Node, NodeId, Operator, ParseError, Punct, Token, TokenKind};

/// Nesting levels before a parse is rejected outright. Enforced on parser
/// recursion and, separately, on the subtree depth of every constructed
/// node, so flat operator and postfix chains are capped along with
/// parenthesized nesting. Bounding the tree here also bounds the recursive
/// evaluator on adversarial input.
pub(crate) const MAX_DEPTH: usize = 200;

/// Wraps a lexer with one token of lookahead and builds an AST into the
/// caller's arena.
pub struct Parser<'a, 'b> {
    lexer: Lexer<'a>,
    current: Token,
    arena: &'b mut Vec<Node>,
    /// Subtree depth of each arena node, index-aligned.
    depths: Vec<usize>,
    depth: usize,
}

impl<'a, 'b> Parser<'a, 'b> {
    pub fn new(input: &'a str, arena: &'b mut Vec<Node>) -> Result<Self, ParseError> {
        let mut lexer = Lexer::new(input);
        let current = lexer.next_token()?;
        let depths = vec![1; arena.len()];
        Ok(Parser {
            lexer,
            current,
            arena,
            depths,
            depth: 0,
        })
    }

    pub fn parse(mut self) -> Result<NodeId, ParseError> {
        let root = self.parse_expr(0)?;
        match self.current.kind {
            TokenKind::Eof => Ok(root),
            ref found => Err(ParseError::TrailingInput {
                found: found.clone(),
                offset: self.current.offset,
            }),
        }
    }

    fn advance(&mut self) -> Result<(), ParseError> {
        self.current = self.lexer.next_token()?;
        Ok(())
    }

    /// Appends a node, tracking its subtree depth: one past its deepest
    /// child. Infix and postfix chains deepen the tree one level per
    /// iteration with almost no parser recursion, so the depth cap has to
    /// live here, not only on the recursion counter.
    fn push_node(&mut self, node: Node) -> Result<NodeId, ParseError> {
        let depth = self.node_depth(&node);
        if depth > MAX_DEPTH {
            return Err(ParseError::TooDeep {
                offset: self.current.offset,
            });
        }
        let id = self.arena.len();
        self.arena.push(node);
        self.depths.push(depth);
        Ok(id)
    }

    fn node_depth(&self, node: &Node) -> usize {
        let d = |id: &NodeId| self.depths[*id];
        1 + match node {
            Node::Literal(_) | Node::Ident(_) => 0,
            Node::Member(obj, _) => d(obj),
            Node::Unary(_, expr) => d(expr),
            Node::Index(a, b) | Node::Binary(_, a, b) => d(a).max(d(b)),
            Node::Ternary(a, b, c) => d(a).max(d(b)).max(d(c)),
            Node::Call(callee, args) => args.iter().map(d).fold(d(callee), usize::max),
            Node::List(items) => items.iter().map(d).max().unwrap_or(0),
            Node::Map(entries) => entries
                .iter()
                .map(|(key, value)| d(key).max(d(value)))
                .max()
                .unwrap_or(0),
        }
    }

    fn at_punct(&self, p: Punct) -> bool {
        self.current.kind == TokenKind::Punct(p)
    }

    /// Consumes the expected closing delimiter. Running out of input is
    /// reported at the opening token, anything else at the stray token.
    fn expect_closing(&mut self, delimiter: Punct, open_offset: usize) -> Result<(), ParseError> {
        if self.at_punct(delimiter) {
            self.advance()
        } else if self.current.kind == TokenKind::Eof {
            Err(ParseError::Unclosed {
                delimiter,
                offset: open_offset,
            })
        } else {
            Err(ParseError::Expected {
                expected: delimiter.as_str(),
                found: self.current.kind.clone(),
                offset: self.current.offset,
            })
        }
    }

    /// The recursion counter guards the parser's own stack against nesting
    /// like `((((...`; flat chains are caught by [`push_node`](Self::push_node).
    fn parse_expr(&mut self, min_bp: u8) -> Result<NodeId, ParseError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(ParseError::TooDeep {
                offset: self.current.offset,
            });
        }
        let result = self.parse_expr_at(min_bp);
        self.depth -= 1;
        result
    }

    fn parse_expr_at(&mut self, min_bp: u8) -> Result<NodeId, ParseError> {
        let mut left = self.parse_prefix()?;

        loop {
            // The ternary is an infix of its own kind: lowest precedence,
            // right-associative through the ':' branch.
            if self.at_punct(Punct::Question) {
                let (l_bp, r_bp) = TERNARY_BP;
                if l_bp < min_bp {
                    break;
                }
                self.advance()?;
                let then = self.parse_expr(0)?;
                if !self.at_punct(Punct::Colon) {
                    return Err(ParseError::Expected {
                        expected: "':' in ternary expression",
                        found: self.current.kind.clone(),
                        offset: self.current.offset,
                    });
                }
                self.advance()?;
                let other = self.parse_expr(r_bp)?;
                left = self.push_node(Node::Ternary(left, then, other))?;
                continue;
            }

            if let TokenKind::Op(op) = self.current.kind {
                if let Some((l_bp, r_bp)) = binding_power(op) {
                    if l_bp < min_bp {
                        break;
                    }
                    self.advance()?;
                    let right = self.parse_expr(r_bp)?;
                    left = self.push_node(Node::Binary(op, left, right))?;
                    continue;
                }
            }

            // Not an infix operator (closing delimiter, comma, EOF, ...)
            break;
        }

        Ok(left)
    }

    fn parse_prefix(&mut self) -> Result<NodeId, ParseError> {
        if let TokenKind::Op(op @ (Operator::Not | Operator::Minus)) = self.current.kind {
            self.advance()?;
            let operand = self.parse_expr(PREFIX_BP)?;
            return self.push_node(Node::Unary(op, operand));
        }
        let primary = self.parse_primary()?;
        self.parse_postfix(primary)
    }

    /// Applies `.name`, `[index]`, and `(args)` chains, tightest-binding.
    fn parse_postfix(&mut self, mut expr: NodeId) -> Result<NodeId, ParseError> {
        loop {
            if self.at_punct(Punct::Dot) {
                self.advance()?;
                let TokenKind::Ident(ref name) = self.current.kind else {
                    return Err(ParseError::Expected {
                        expected: "field name after '.'",
                        found: self.current.kind.clone(),
                        offset: self.current.offset,
                    });
                };
                let name = name.clone();
                self.advance()?;
                expr = self.push_node(Node::Member(expr, name))?;
            } else if self.at_punct(Punct::Lbracket) {
                let open = self.current.offset;
                self.advance()?;
                let index = self.parse_expr(0)?;
                self.expect_closing(Punct::Rbracket, open)?;
                expr = self.push_node(Node::Index(expr, index))?;
            } else if self.at_punct(Punct::Lparen) {
                let open = self.current.offset;
                self.advance()?;
                let mut args = Vec::new();
                if !self.at_punct(Punct::Rparen) {
                    loop {
                        args.push(self.parse_expr(0)?);
                        if self.at_punct(Punct::Comma) {
                            self.advance()?;
                            continue;
                        }
                        break;
                    }
                }
                self.expect_closing(Punct::Rparen, open)?;
                expr = self.push_node(Node::Call(expr, args))?;
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<NodeId, ParseError> {
        let literal = match self.current.kind {
            TokenKind::Int(n) => Some(Literal::Int(n)),
            TokenKind::Float(x) => Some(Literal::Float(x)),
            TokenKind::Str(ref s) => Some(Literal::Str(s.clone())),
            TokenKind::Bool(b) => Some(Literal::Bool(b)),
            TokenKind::Null => Some(Literal::Null),
            _ => None,
        };
        if let Some(literal) = literal {
            self.advance()?;
            return self.push_node(Node::Literal(literal));
        }

        match self.current.kind {
            TokenKind::Ident(ref name) => {
                let name = name.clone();
                self.advance()?;
                self.push_node(Node::Ident(name))
            }
            TokenKind::Punct(Punct::Lparen) => {
                let open = self.current.offset;
                self.advance()?;
                let expr = self.parse_expr(0)?;
                self.expect_closing(Punct::Rparen, open)?;
                Ok(expr)
            }
            TokenKind::Punct(Punct::Lbracket) => self.parse_list(),
            TokenKind::Punct(Punct::Lbrace) => self.parse_map(),
            ref found => Err(ParseError::ExpectedExpression {
                found: found.clone(),
                offset: self.current.offset,
            }),
        }
    }

    fn parse_list(&mut self) -> Result<NodeId, ParseError> {
        let open = self.current.offset;
        self.advance()?;
        let mut items = Vec::new();
        if !self.at_punct(Punct::Rbracket) {
            loop {
                items.push(self.parse_expr(0)?);
                if self.at_punct(Punct::Comma) {
                    // A trailing comma fails on the next iteration, which
                    // expects an expression and finds ']'
                    self.advance()?;
                    continue;
                }
                break;
            }
        }
        self.expect_closing(Punct::Rbracket, open)?;
        self.push_node(Node::List(items))
    }

    fn parse_map(&mut self) -> Result<NodeId, ParseError> {
        let open = self.current.offset;
        self.advance()?;
        let mut entries = Vec::new();
        if !self.at_punct(Punct::Rbrace) {
            loop {
                let key = self.parse_expr(0)?;
                if !self.at_punct(Punct::Colon) {
                    return Err(ParseError::Expected {
                        expected: "':' between map key and value",
                        found: self.current.kind.clone(),
                        offset: self.current.offset,
                    });
                }
                self.advance()?;
                let value = self.parse_expr(0)?;
                entries.push((key, value));
                if self.at_punct(Punct::Comma) {
                    self.advance()?;
                    continue;
                }
                break;
            }
        }
        self.expect_closing(Punct::Rbrace, open)?;
        self.push_node(Node::Map(entries))
    }
}

/// Infix binding powers, loosest to tightest. Left-associative pairs bind
/// tighter on the right.
fn binding_power(op: Operator) -> Option<(u8, u8)> {
    match op {
        Operator::Or => Some((10, 11)),
        Operator::And => Some((20, 21)),
        Operator::Eq | Operator::Ne => Some((30, 31)),
        Operator::Lt | Operator::Le | Operator::Gt | Operator::Ge => Some((40, 41)),
        Operator::Plus | Operator::Minus => Some((50, 51)),
        Operator::Star | Operator::Slash | Operator::Percent => Some((60, 61)),
        Operator::Not => None,
    }
}

/// Right-associative: the else branch parses at a lower power so another
/// `?:` can claim it.
const TERNARY_BP: (u8, u8) = (2, 1);

/// Prefix `!` and `-` bind tighter than any infix, looser than postfix.
const PREFIX_BP: u8 = 70;
