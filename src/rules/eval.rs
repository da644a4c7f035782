use std::{borrow::Cow, collections::HashMap};

use regex::Regex;

use super::{version::Version, CondValues, Expression, Operator, Scalar};
use crate::{context::ClientContext, pool::Poolable};

/// Compiled wildcard patterns kept per evaluator are dropped past this size.
const MAX_CACHED_PATTERNS: usize = 256;

/// Evaluates rule trees against a [`ClientContext`].
///
/// An evaluator holds a cache of compiled wildcard patterns, which is why instances are pooled
/// (see [`EvaluatorPool`](crate::pool::EvaluatorPool)). It never stores the context it was given:
/// every call receives the context by reference, so nothing carries over between requests.
#[derive(Debug, Default)]
pub struct Evaluator {
    patterns: HashMap<String, Option<Regex>>,
}

impl Evaluator {
    pub fn new() -> Evaluator {
        Evaluator::default()
    }

    /// Select the value of the first matching condition, or the default.
    pub fn eval_cond_values<'a>(&mut self, rule: &'a CondValues, ctx: &ClientContext) -> &'a Scalar {
        rule.cond_values
            .iter()
            .find(|entry| self.eval_bool(&entry.condition, ctx))
            .map_or(&rule.default_value, |entry| &entry.value)
    }

    /// Evaluate any expression to a scalar. Calls produce booleans, symbols produce the bound
    /// attribute text.
    pub fn eval(&mut self, expression: &Expression, ctx: &ClientContext) -> Scalar {
        match expression {
            Expression::Literal(value) => value.clone(),
            Expression::Symbol { symbol } => Scalar::String(ctx.lookup(symbol).to_owned()),
            Expression::Call { func, args } => Scalar::Bool(self.eval_call(func, args, ctx)),
        }
    }

    /// Evaluate an expression as a predicate. Anything that is not a boolean is `false`.
    pub fn eval_bool(&mut self, expression: &Expression, ctx: &ClientContext) -> bool {
        match expression {
            Expression::Literal(Scalar::Bool(b)) => *b,
            Expression::Call { func, args } => self.eval_call(func, args, ctx),
            _ => false,
        }
    }

    /// Apply an operator. Returns `false` if the operator is unknown or cannot be applied to
    /// the arguments.
    fn eval_call(&mut self, func: &str, args: &[Expression], ctx: &ClientContext) -> bool {
        let Some(op) = Operator::from_name(func) else {
            log::debug!(target: "confsync", func; "unknown operator evaluates to false");
            return false;
        };
        self.try_eval(op, args, ctx).unwrap_or(false)
    }

    /// Try applying `op`, returning `None` if it cannot be applied.
    fn try_eval(&mut self, op: Operator, args: &[Expression], ctx: &ClientContext) -> Option<bool> {
        use Operator::*;

        match op {
            And => {
                // `all`/`any` short-circuit left to right.
                Some(!args.is_empty() && args.iter().all(|arg| self.eval_bool(arg, ctx)))
            }
            Or => Some(args.iter().any(|arg| self.eval_bool(arg, ctx))),
            Not => {
                let [arg] = args else { return None };
                Some(!self.eval_bool(arg, ctx))
            }

            Eq | Ne | Gt | Gte | Lt | Lte => {
                let [a, b] = args else { return None };
                let a = operand(a, ctx)?;
                let b = operand(b, ctx)?;
                compare(op, &a, &b)
            }

            VerEq | VerNe | VerGt | VerGte | VerLt | VerLte => {
                let [a, b] = args else { return None };
                let a = Version::parse(&text(a, ctx)?)?;
                let b = Version::parse(&text(b, ctx)?)?;
                Some(match op {
                    VerEq => a == b,
                    VerNe => a != b,
                    VerGt => a > b,
                    VerGte => a >= b,
                    VerLt => a < b,
                    VerLte => a <= b,
                    _ => {
                        // unreachable
                        return None;
                    }
                })
            }

            StrEmpty | StrNotEmpty => {
                let [a] = args else { return None };
                let is_empty = text(a, ctx)?.is_empty();
                Some(is_empty == (op == StrEmpty))
            }

            StrEq | StrNe | StrContains | StrNotContains | StrWcMatch | StrNotWcMatch => {
                let [a, b] = args else { return None };
                let subject = text(a, ctx)?;
                let Expression::Literal(Scalar::String(pattern)) = b else {
                    return None;
                };
                Some(match op {
                    StrEq => *subject == **pattern,
                    StrNe => *subject != **pattern,
                    StrContains => subject.contains(pattern.as_str()),
                    StrNotContains => !subject.contains(pattern.as_str()),
                    StrWcMatch => self.wildcard(pattern)?.is_match(&subject),
                    StrNotWcMatch => !self.wildcard(pattern)?.is_match(&subject),
                    _ => {
                        // unreachable
                        return None;
                    }
                })
            }
        }
    }

    fn wildcard(&mut self, pattern: &str) -> Option<&Regex> {
        if !self.patterns.contains_key(pattern) {
            if self.patterns.len() >= MAX_CACHED_PATTERNS {
                self.patterns.clear();
            }
            let compiled = Regex::new(&wildcard_to_regex(pattern)).ok();
            self.patterns.insert(pattern.to_owned(), compiled);
        }
        self.patterns.get(pattern)?.as_ref()
    }
}

impl Poolable for Evaluator {
    fn reset(&mut self) {
        if self.patterns.len() > MAX_CACHED_PATTERNS / 2 {
            self.patterns.clear();
        }
    }
}

/// Translate a `*`/`?` wildcard into an anchored regex, escaping everything else.
pub fn wildcard_to_regex(pattern: &str) -> String {
    let mut out = String::from("(?s)^");
    let mut literal = String::new();
    for c in pattern.chars() {
        match c {
            '*' | '?' => {
                out.push_str(&regex::escape(&literal));
                literal.clear();
                out.push_str(if c == '*' { ".*" } else { "." });
            }
            c => literal.push(c),
        }
    }
    out.push_str(&regex::escape(&literal));
    out.push('$');
    out
}

/// Symbol or literal operand. Nested calls are not operands.
fn operand<'a>(arg: &'a Expression, ctx: &'a ClientContext) -> Option<Cow<'a, Scalar>> {
    match arg {
        Expression::Literal(value) => Some(Cow::Borrowed(value)),
        Expression::Symbol { symbol } => Some(Cow::Owned(Scalar::String(ctx.lookup(symbol).to_owned()))),
        Expression::Call { .. } => None,
    }
}

/// Textual view of a symbol or literal operand.
fn text<'a>(arg: &'a Expression, ctx: &'a ClientContext) -> Option<Cow<'a, str>> {
    match arg {
        Expression::Symbol { symbol } => Some(Cow::Borrowed(ctx.lookup(symbol))),
        Expression::Literal(Scalar::String(s)) => Some(Cow::Borrowed(s)),
        Expression::Literal(value) => Some(Cow::Owned(value.to_string())),
        Expression::Call { .. } => None,
    }
}

/// Generic comparison: numeric when one side is a number literal and the other reads as a finite
/// number. Otherwise only `=`/`!=` apply, as text equality.
fn compare(op: Operator, a: &Scalar, b: &Scalar) -> Option<bool> {
    let numeric = if a.is_number() || b.is_number() {
        a.as_number().zip(b.as_number())
    } else {
        None
    };
    if let Some((a, b)) = numeric {
        return Some(match op {
            Operator::Eq => a == b,
            Operator::Ne => a != b,
            Operator::Gt => a > b,
            Operator::Gte => a >= b,
            Operator::Lt => a < b,
            Operator::Lte => a <= b,
            _ => return None,
        });
    }

    match op {
        Operator::Eq => Some(a.to_string() == b.to_string()),
        Operator::Ne => Some(a.to_string() != b.to_string()),
        _ => None,
    }
}
