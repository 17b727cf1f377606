// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Template tokenization.
//!
//! Splits raw template text into literal text segments and `{{ ... }}`
//! action segments, tokenizing the contents of each action. The lexer knows
//! nothing about block structure; matching `if`/`for` actions with their
//! `end` is the parser's job.

/// One lexed piece of a template.
#[derive(Clone, Debug, PartialEq)]
pub enum Segment {
    /// Literal text copied through verbatim.
    Text(String),

    /// Tokenized contents of one `{{ ... }}` action.
    Action(Vec<Token>),
}

/// A single token inside an action.
#[derive(Clone, Debug, PartialEq)]
pub enum Token {
    /// Bare identifier, including keywords like `if` and `for`.
    Ident(String),

    /// Double-quoted string literal, escapes resolved.
    Str(String),

    /// Integer literal.
    Int(i64),

    /// `.` path separator.
    Dot,

    /// `|` filter pipe.
    Pipe,

    /// `==` equality operator.
    EqEq,

    /// `!=` inequality operator.
    BangEq,
}

/// Tokenize template text into segments.
///
/// # Errors
///
/// - Return [`LexError::UnterminatedAction`] if a `{{` never closes.
/// - Return [`LexError::UnterminatedString`] if a string literal never
///   closes before the end of its action.
/// - Return [`LexError::UnexpectedChar`] for characters with no meaning
///   inside an action.
pub fn lex(source: &str) -> Result<Vec<Segment>> {
    let chars: Vec<char> = source.chars().collect();
    let mut segments = Vec::new();
    let mut text = String::new();
    let mut pos = 0;

    while pos < chars.len() {
        if chars[pos] == '{' && chars.get(pos + 1) == Some(&'{') {
            if !text.is_empty() {
                segments.push(Segment::Text(std::mem::take(&mut text)));
            }

            let (tokens, next) = lex_action(&chars, pos + 2)?;
            segments.push(Segment::Action(tokens));
            pos = next;
        } else {
            text.push(chars[pos]);
            pos += 1;
        }
    }

    if !text.is_empty() {
        segments.push(Segment::Text(text));
    }

    Ok(segments)
}

/// Tokenize one action body starting just past its `{{`.
///
/// Returns the tokens plus the position just past the closing `}}`.
fn lex_action(chars: &[char], mut pos: usize) -> Result<(Vec<Token>, usize)> {
    let mut tokens = Vec::new();

    while pos < chars.len() {
        let current = chars[pos];
        match current {
            '}' if chars.get(pos + 1) == Some(&'}') => return Ok((tokens, pos + 2)),
            _ if current.is_whitespace() => pos += 1,
            '.' => {
                tokens.push(Token::Dot);
                pos += 1;
            }
            '|' => {
                tokens.push(Token::Pipe);
                pos += 1;
            }
            '=' if chars.get(pos + 1) == Some(&'=') => {
                tokens.push(Token::EqEq);
                pos += 2;
            }
            '!' if chars.get(pos + 1) == Some(&'=') => {
                tokens.push(Token::BangEq);
                pos += 2;
            }
            '"' => {
                let (literal, next) = lex_string(chars, pos + 1)?;
                tokens.push(Token::Str(literal));
                pos = next;
            }
            _ if current.is_ascii_digit() => {
                let start = pos;
                while pos < chars.len() && chars[pos].is_ascii_digit() {
                    pos += 1;
                }
                let digits: String = chars[start..pos].iter().collect();
                // INVARIANT: Only ASCII digits collected, so parsing cannot
                // fail short of overflow.
                let value = digits.parse().map_err(|_| LexError::IntegerOverflow(digits))?;
                tokens.push(Token::Int(value));
            }
            _ if current.is_alphabetic() || current == '_' => {
                let start = pos;
                while pos < chars.len() && (chars[pos].is_alphanumeric() || chars[pos] == '_') {
                    pos += 1;
                }
                tokens.push(Token::Ident(chars[start..pos].iter().collect()));
            }
            _ => return Err(LexError::UnexpectedChar(current)),
        }
    }

    Err(LexError::UnterminatedAction)
}

/// Tokenize a string literal starting just past its opening quote.
fn lex_string(chars: &[char], mut pos: usize) -> Result<(String, usize)> {
    let mut literal = String::new();

    while pos < chars.len() {
        match chars[pos] {
            '"' => return Ok((literal, pos + 1)),
            '\\' => {
                let escape = chars.get(pos + 1).ok_or(LexError::UnterminatedString)?;
                match escape {
                    '"' => literal.push('"'),
                    '\\' => literal.push('\\'),
                    'n' => literal.push('\n'),
                    't' => literal.push('\t'),
                    other => return Err(LexError::UnexpectedChar(*other)),
                }
                pos += 2;
            }
            other => {
                literal.push(other);
                pos += 1;
            }
        }
    }

    Err(LexError::UnterminatedString)
}

/// Tokenization error types.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum LexError {
    /// An action opened with `{{` but never closed with `}}`.
    #[error("action opened with '{{{{' is never closed")]
    UnterminatedAction,

    /// A string literal never closed before the end of the template.
    #[error("string literal is never closed")]
    UnterminatedString,

    /// A character with no meaning inside an action.
    #[error("unexpected character {0:?} inside action")]
    UnexpectedChar(char),

    /// An integer literal too large to represent.
    #[error("integer literal {0:?} does not fit in 64 bits")]
    IntegerOverflow(String),
}

/// Friendly result alias :3
type Result<T, E = LexError> = std::result::Result<T, E>;
