//! Parenthesized prefix form of rule trees.
//!
//! `(str= LANG "en")` is a call, bare identifiers are symbols, `#t`/`#f` are booleans, numbers
//! containing `.` are floats. A conditional value renders as the `cond` special form:
//!
//! ```text
//! (cond ((str= LANG "en") 999) (else 100000))
//! ```
use std::fmt::Write as _;

use super::{CondValue, CondValues, Expression, Scalar};
use crate::{Error, Result};

const COND: &str = "cond";
const ELSE: &str = "else";

impl Expression {
    /// Render in canonical prefix form (single spaces, no trailing whitespace).
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        write_expression(&mut out, self);
        out
    }

    pub fn parse_text(text: &str) -> Result<Expression> {
        let mut parser = Parser::new(text)?;
        let expression = parser.expression()?;
        parser.finish()?;
        Ok(expression)
    }
}

impl CondValues {
    pub fn to_text(&self) -> String {
        let mut out = String::from("(cond");
        for CondValue { condition, value } in &self.cond_values {
            out.push_str(" (");
            write_expression(&mut out, condition);
            out.push(' ');
            write_scalar(&mut out, value);
            out.push(')');
        }
        out.push_str(" (else ");
        write_scalar(&mut out, &self.default_value);
        out.push_str("))");
        out
    }

    /// Parse the `cond` special form. The `else` clause is mandatory and must come last.
    pub fn parse_text(text: &str) -> Result<CondValues> {
        let mut parser = Parser::new(text)?;
        parser.expect(&Token::Open)?;
        match parser.next() {
            Some(Token::Atom(head)) if head == COND => {}
            _ => return Err(decode_error("expected `cond`")),
        }

        let mut cond_values = Vec::new();
        loop {
            parser.expect(&Token::Open)?;
            if parser.peek() == Some(&Token::Atom(ELSE.to_owned())) {
                parser.next();
                let default_value = parser.scalar()?;
                parser.expect(&Token::Close)?;
                parser.expect(&Token::Close)?;
                parser.finish()?;
                return Ok(CondValues {
                    cond_values,
                    default_value,
                });
            }
            let condition = parser.expression()?;
            let value = parser.scalar()?;
            parser.expect(&Token::Close)?;
            cond_values.push(CondValue { condition, value });
        }
    }
}

fn write_expression(out: &mut String, expression: &Expression) {
    match expression {
        Expression::Literal(value) => write_scalar(out, value),
        Expression::Symbol { symbol } => out.push_str(symbol),
        Expression::Call { func, args } => {
            out.push('(');
            out.push_str(func);
            for arg in args {
                out.push(' ');
                write_expression(out, arg);
            }
            out.push(')');
        }
    }
}

fn write_scalar(out: &mut String, value: &Scalar) {
    match value {
        Scalar::Bool(true) => out.push_str("#t"),
        Scalar::Bool(false) => out.push_str("#f"),
        Scalar::Int(i) => {
            let _ = write!(out, "{i}");
        }
        // Integral floats keep a `.0` so they parse back as floats.
        Scalar::Float(f) if f.is_finite() && f.fract() == 0.0 => {
            let _ = write!(out, "{f:.1}");
        }
        Scalar::Float(f) => {
            let _ = write!(out, "{f}");
        }
        Scalar::String(s) => {
            out.push('"');
            for c in s.chars() {
                match c {
                    '"' => out.push_str("\\\""),
                    '\\' => out.push_str("\\\\"),
                    '\n' => out.push_str("\\n"),
                    '\t' => out.push_str("\\t"),
                    c => out.push(c),
                }
            }
            out.push('"');
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Open,
    Close,
    Str(String),
    Atom(String),
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(text: &str) -> Result<Parser> {
        Ok(Parser {
            tokens: tokenize(text)?,
            pos: 0,
        })
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: &Token) -> Result<()> {
        match self.next() {
            Some(ref token) if token == expected => Ok(()),
            other => Err(decode_error(&format!("expected {expected:?}, found {other:?}"))),
        }
    }

    fn finish(&self) -> Result<()> {
        if self.pos < self.tokens.len() {
            return Err(decode_error("trailing input"));
        }
        Ok(())
    }

    fn expression(&mut self) -> Result<Expression> {
        match self.next() {
            Some(Token::Open) => {
                let func = match self.next() {
                    Some(Token::Atom(func)) => func,
                    other => return Err(decode_error(&format!("expected operator, found {other:?}"))),
                };
                let mut args = Vec::new();
                while self.peek() != Some(&Token::Close) {
                    if self.peek().is_none() {
                        return Err(decode_error("unbalanced parentheses"));
                    }
                    args.push(self.expression()?);
                }
                self.next();
                Ok(Expression::Call { func, args })
            }
            Some(Token::Str(s)) => Ok(Expression::Literal(Scalar::String(s))),
            Some(Token::Atom(atom)) => Ok(match parse_atom(&atom) {
                Some(value) => Expression::Literal(value),
                None => Expression::Symbol { symbol: atom },
            }),
            Some(Token::Close) => Err(decode_error("unexpected `)`")),
            None => Err(decode_error("unexpected end of input")),
        }
    }

    fn scalar(&mut self) -> Result<Scalar> {
        match self.expression()? {
            Expression::Literal(value) => Ok(value),
            other => Err(decode_error(&format!("expected a literal, found {other:?}"))),
        }
    }
}

fn parse_atom(atom: &str) -> Option<Scalar> {
    match atom {
        "#t" => return Some(Scalar::Bool(true)),
        "#f" => return Some(Scalar::Bool(false)),
        _ => {}
    }

    let digits = atom.strip_prefix(['-', '+']).unwrap_or(atom);
    if !digits.starts_with(|c: char| c.is_ascii_digit()) {
        return None;
    }
    if let Ok(i) = atom.parse::<i64>() {
        return Some(Scalar::Int(i));
    }
    atom.parse::<f64>().ok().map(Scalar::Float)
}

fn tokenize(text: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '(' => tokens.push(Token::Open),
            ')' => tokens.push(Token::Close),
            c if c.is_whitespace() => {}
            '"' => {
                let mut s = String::new();
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some('n') => s.push('\n'),
                            Some('t') => s.push('\t'),
                            Some(c @ ('"' | '\\')) => s.push(c),
                            other => {
                                return Err(decode_error(&format!("bad escape {other:?}")))
                            }
                        },
                        Some(c) => s.push(c),
                        None => return Err(decode_error("unterminated string")),
                    }
                }
                tokens.push(Token::Str(s));
            }
            c => {
                let mut atom = String::from(c);
                while let Some(&c) = chars.peek() {
                    if c.is_whitespace() || c == '(' || c == ')' || c == '"' {
                        break;
                    }
                    atom.push(c);
                    chars.next();
                }
                tokens.push(Token::Atom(atom));
            }
        }
    }
    Ok(tokens)
}

fn decode_error(msg: &str) -> Error {
    Error::Decode(msg.to_owned())
}
