// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Template parsing.
//!
//! Builds the template AST out of lexed segments. Block actions (`if`,
//! `for`) nest through a frame stack, so `{{ end }}` always closes the
//! innermost open block. Everything else is either literal text or an
//! expression to interpolate.
//!
//! # Expression Grammar
//!
//! ```text
//! expr    := or
//! or      := and ("or" and)*
//! and     := not ("and" not)*
//! not     := "not" not | cmp
//! cmp     := pipe (("==" | "!=") pipe)?
//! pipe    := primary ("|" IDENT primary?)*
//! primary := STRING | INT | "true" | "false" | path
//! path    := "."? IDENT ("." IDENT)*
//! ```

use crate::template::lexer::{Segment, Token};

/// One node of the template AST.
#[derive(Clone, Debug, PartialEq)]
pub enum Node {
    /// Literal text copied through verbatim.
    Text(String),

    /// `{{ expr }}` interpolation.
    Output(Expr),

    /// `{{ if expr }} ... {{ else }} ... {{ end }}` block.
    If {
        cond: Expr,
        then: Vec<Node>,
        otherwise: Vec<Node>,
    },

    /// `{{ for var in expr }} ... {{ end }}` block.
    For {
        var: String,
        list: Expr,
        body: Vec<Node>,
    },
}

/// One expression inside an action.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    /// Dotted variable path.
    Var(Vec<String>),

    /// String literal.
    Str(String),

    /// Integer literal.
    Int(i64),

    /// Boolean literal.
    Bool(bool),

    /// Logical negation.
    Not(Box<Expr>),

    /// Logical conjunction.
    And(Box<Expr>, Box<Expr>),

    /// Logical disjunction.
    Or(Box<Expr>, Box<Expr>),

    /// Equality test.
    Eq(Box<Expr>, Box<Expr>),

    /// Inequality test.
    Ne(Box<Expr>, Box<Expr>),

    /// Filter application: `input | name arg?`.
    Filter {
        input: Box<Expr>,
        name: String,
        arg: Option<Box<Expr>>,
    },
}

/// Parse lexed segments into the template AST.
///
/// # Errors
///
/// - Return [`ParseError::UnclosedBlock`] if an `if` or `for` block never
///   reaches its `end`.
/// - Return [`ParseError::UnmatchedEnd`] / [`ParseError::UnmatchedElse`] for
///   block actions with no open block to close.
/// - Return [`ParseError::UnexpectedToken`] / [`ParseError::UnexpectedEnd`]
///   for malformed expressions.
pub fn parse(segments: Vec<Segment>) -> Result<Vec<Node>> {
    let mut stack = vec![Frame::Root(Vec::new())];

    for segment in segments {
        match segment {
            Segment::Text(text) => current_nodes(&mut stack).push(Node::Text(text)),
            Segment::Action(tokens) => parse_action(&mut stack, tokens)?,
        }
    }

    match stack.pop() {
        Some(Frame::Root(nodes)) if stack.is_empty() => Ok(nodes),
        _ => Err(ParseError::UnclosedBlock),
    }
}

/// Open block frames during parsing.
enum Frame {
    Root(Vec<Node>),
    If {
        cond: Expr,
        then: Vec<Node>,
        otherwise: Vec<Node>,
        in_else: bool,
    },
    For {
        var: String,
        list: Expr,
        body: Vec<Node>,
    },
}

/// Nodes being collected by the innermost open frame.
fn current_nodes(stack: &mut [Frame]) -> &mut Vec<Node> {
    // INVARIANT: Stack always holds at least the root frame.
    match stack.last_mut().expect("parser frame stack underflow") {
        Frame::Root(nodes) => nodes,
        Frame::If {
            then,
            otherwise,
            in_else,
            ..
        } => {
            if *in_else {
                otherwise
            } else {
                then
            }
        }
        Frame::For { body, .. } => body,
    }
}

fn parse_action(stack: &mut Vec<Frame>, tokens: Vec<Token>) -> Result<()> {
    match tokens.first() {
        Some(Token::Ident(word)) if word == "if" => {
            let mut cursor = Cursor::new(&tokens[1..]);
            let cond = cursor.parse_expr()?;
            cursor.finish()?;
            stack.push(Frame::If {
                cond,
                then: Vec::new(),
                otherwise: Vec::new(),
                in_else: false,
            });
        }
        Some(Token::Ident(word)) if word == "for" => {
            let mut cursor = Cursor::new(&tokens[1..]);
            let var = cursor.expect_ident()?;
            cursor.expect_keyword("in")?;
            let list = cursor.parse_expr()?;
            cursor.finish()?;
            stack.push(Frame::For {
                var,
                list,
                body: Vec::new(),
            });
        }
        Some(Token::Ident(word)) if word == "else" => {
            if tokens.len() > 1 {
                return Err(ParseError::TrailingTokens);
            }
            match stack.last_mut() {
                Some(Frame::If { in_else, .. }) if !*in_else => *in_else = true,
                _ => return Err(ParseError::UnmatchedElse),
            }
        }
        Some(Token::Ident(word)) if word == "end" => {
            if tokens.len() > 1 {
                return Err(ParseError::TrailingTokens);
            }
            let node = match stack.pop() {
                Some(Frame::If {
                    cond,
                    then,
                    otherwise,
                    ..
                }) => Node::If {
                    cond,
                    then,
                    otherwise,
                },
                Some(Frame::For { var, list, body }) => Node::For { var, list, body },
                Some(frame @ Frame::Root(_)) => {
                    stack.push(frame);
                    return Err(ParseError::UnmatchedEnd);
                }
                None => return Err(ParseError::UnmatchedEnd),
            };
            current_nodes(stack).push(node);
        }
        Some(_) => {
            let mut cursor = Cursor::new(&tokens);
            let expr = cursor.parse_expr()?;
            cursor.finish()?;
            current_nodes(stack).push(Node::Output(expr));
        }
        None => return Err(ParseError::EmptyAction),
    }

    Ok(())
}

/// Token cursor for recursive-descent expression parsing.
struct Cursor<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(tokens: &'a [Token]) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<&Token> {
        let token = self.tokens.get(self.pos);
        self.pos += 1;
        token
    }

    fn finish(&self) -> Result<()> {
        if self.pos < self.tokens.len() {
            return Err(ParseError::TrailingTokens);
        }

        Ok(())
    }

    fn expect_ident(&mut self) -> Result<String> {
        match self.bump() {
            Some(Token::Ident(word)) => Ok(word.clone()),
            Some(token) => Err(ParseError::UnexpectedToken(format!("{token:?}"))),
            None => Err(ParseError::UnexpectedEnd),
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<()> {
        match self.bump() {
            Some(Token::Ident(word)) if word == keyword => Ok(()),
            Some(token) => Err(ParseError::UnexpectedToken(format!("{token:?}"))),
            None => Err(ParseError::UnexpectedEnd),
        }
    }

    fn parse_expr(&mut self) -> Result<Expr> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut left = self.parse_and()?;
        while matches!(self.peek(), Some(Token::Ident(word)) if word == "or") {
            self.bump();
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }

        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut left = self.parse_not()?;
        while matches!(self.peek(), Some(Token::Ident(word)) if word == "and") {
            self.bump();
            let right = self.parse_not()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }

        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr> {
        if matches!(self.peek(), Some(Token::Ident(word)) if word == "not") {
            self.bump();
            let inner = self.parse_not()?;
            return Ok(Expr::Not(Box::new(inner)));
        }

        self.parse_cmp()
    }

    fn parse_cmp(&mut self) -> Result<Expr> {
        let left = self.parse_pipe()?;
        match self.peek() {
            Some(Token::EqEq) => {
                self.bump();
                let right = self.parse_pipe()?;
                Ok(Expr::Eq(Box::new(left), Box::new(right)))
            }
            Some(Token::BangEq) => {
                self.bump();
                let right = self.parse_pipe()?;
                Ok(Expr::Ne(Box::new(left), Box::new(right)))
            }
            _ => Ok(left),
        }
    }

    fn parse_pipe(&mut self) -> Result<Expr> {
        let mut input = self.parse_primary()?;
        while matches!(self.peek(), Some(Token::Pipe)) {
            self.bump();
            let name = self.expect_ident()?;

            // INVARIANT: A filter argument can only be a primary, so the
            // next pipe always belongs to the chain, not the argument.
            let arg = match self.peek() {
                Some(Token::Str(_) | Token::Int(_) | Token::Dot | Token::Ident(_)) => {
                    Some(Box::new(self.parse_primary()?))
                }
                _ => None,
            };

            input = Expr::Filter {
                input: Box::new(input),
                name,
                arg,
            };
        }

        Ok(input)
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.bump() {
            Some(Token::Str(literal)) => Ok(Expr::Str(literal.clone())),
            Some(Token::Int(value)) => Ok(Expr::Int(*value)),
            Some(Token::Ident(word)) if word == "true" => Ok(Expr::Bool(true)),
            Some(Token::Ident(word)) if word == "false" => Ok(Expr::Bool(false)),
            Some(Token::Ident(word)) => {
                let mut path = vec![word.clone()];
                self.parse_path_rest(&mut path)?;
                Ok(Expr::Var(path))
            }
            Some(Token::Dot) => {
                let mut path = vec![self.expect_ident()?];
                self.parse_path_rest(&mut path)?;
                Ok(Expr::Var(path))
            }
            Some(token) => Err(ParseError::UnexpectedToken(format!("{token:?}"))),
            None => Err(ParseError::UnexpectedEnd),
        }
    }

    fn parse_path_rest(&mut self, path: &mut Vec<String>) -> Result<()> {
        while matches!(self.peek(), Some(Token::Dot)) {
            self.bump();
            path.push(self.expect_ident()?);
        }

        Ok(())
    }
}

/// Parsing error types.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum ParseError {
    /// An `if` or `for` block never reached its `end`.
    #[error("block is never closed with an end action")]
    UnclosedBlock,

    /// An `end` action with no open block.
    #[error("end action without an open block")]
    UnmatchedEnd,

    /// An `else` action outside an `if` block, or a second `else`.
    #[error("else action without an open if block")]
    UnmatchedElse,

    /// An action containing no tokens at all.
    #[error("empty action")]
    EmptyAction,

    /// Leftover tokens after a complete expression.
    #[error("trailing tokens after expression")]
    TrailingTokens,

    /// A token that cannot start or continue an expression.
    #[error("unexpected token {0}")]
    UnexpectedToken(String),

    /// Expression ended before it was complete.
    #[error("expression ended unexpectedly")]
    UnexpectedEnd,
}

/// Friendly result alias :3
type Result<T, E = ParseError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::lexer::lex;
    use pretty_assertions::assert_eq;

    fn parse_str(source: &str) -> Result<Vec<Node>> {
        parse(lex(source).expect("lexing must succeed"))
    }

    #[test]
    fn parse_output_with_path() {
        let result = parse_str("Host {{ .net.hostname }}").unwrap();

        let expect = vec![
            Node::Text("Host ".into()),
            Node::Output(Expr::Var(vec!["net".into(), "hostname".into()])),
        ];

        assert_eq!(result, expect);
    }

    #[test]
    fn parse_if_else_block() {
        let result = parse_str(r#"{{ if .os == "linux" }}a{{ else }}b{{ end }}"#).unwrap();

        let expect = vec![Node::If {
            cond: Expr::Eq(
                Box::new(Expr::Var(vec!["os".into()])),
                Box::new(Expr::Str("linux".into())),
            ),
            then: vec![Node::Text("a".into())],
            otherwise: vec![Node::Text("b".into())],
        }];

        assert_eq!(result, expect);
    }

    #[test]
    fn parse_nested_for_inside_if() {
        let result =
            parse_str("{{ if .full }}{{ for pkg in .packages }}{{ pkg }} {{ end }}{{ end }}")
                .unwrap();

        let expect = vec![Node::If {
            cond: Expr::Var(vec!["full".into()]),
            then: vec![Node::For {
                var: "pkg".into(),
                list: Expr::Var(vec!["packages".into()]),
                body: vec![
                    Node::Output(Expr::Var(vec!["pkg".into()])),
                    Node::Text(" ".into()),
                ],
            }],
            otherwise: vec![],
        }];

        assert_eq!(result, expect);
    }

    #[test]
    fn parse_filter_chain() {
        let result = parse_str(r#"{{ .packages | join " " | upper }}"#).unwrap();

        let expect = vec![Node::Output(Expr::Filter {
            input: Box::new(Expr::Filter {
                input: Box::new(Expr::Var(vec!["packages".into()])),
                name: "join".into(),
                arg: Some(Box::new(Expr::Str(" ".into()))),
            }),
            name: "upper".into(),
            arg: None,
        })];

        assert_eq!(result, expect);
    }

    #[test]
    fn parse_logical_precedence() {
        let result = parse_str("{{ if not .a and .b or .c }}x{{ end }}").unwrap();

        let expect = vec![Node::If {
            cond: Expr::Or(
                Box::new(Expr::And(
                    Box::new(Expr::Not(Box::new(Expr::Var(vec!["a".into()])))),
                    Box::new(Expr::Var(vec!["b".into()])),
                )),
                Box::new(Expr::Var(vec!["c".into()])),
            ),
            then: vec![Node::Text("x".into())],
            otherwise: vec![],
        }];

        assert_eq!(result, expect);
    }

    #[test]
    fn parse_unclosed_block_fails() {
        assert_eq!(parse_str("{{ if .a }}oops"), Err(ParseError::UnclosedBlock));
    }

    #[test]
    fn parse_unmatched_end_fails() {
        assert_eq!(parse_str("{{ end }}"), Err(ParseError::UnmatchedEnd));
    }

    #[test]
    fn parse_unmatched_else_fails() {
        assert_eq!(parse_str("{{ else }}"), Err(ParseError::UnmatchedElse));
    }
}
