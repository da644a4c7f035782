//! Static admission checks for rule documents.
//!
//! The evaluator never fails on a bad tree (it degrades to `false`), so these checks are what
//! keep operator mistakes out of storage.
use super::{version::Version, CondValues, Expression, Family, Operator, Scalar};
use crate::{
    context::{Attribute, Domain},
    Error, Result,
};

/// Version literals may have at most this many dotted segments.
pub const MAX_VERSION_SEGMENTS: usize = 4;

/// Decode and validate a rule document in one step.
pub fn validate_rule(json: &str) -> Result<CondValues> {
    let rule = CondValues::from_json(json)?;
    rule.validate()?;
    Ok(rule)
}

impl CondValues {
    pub fn validate(&self) -> Result<()> {
        for (i, entry) in self.cond_values.iter().enumerate() {
            if !matches!(entry.condition, Expression::Call { .. }) {
                return Err(invalid(format!("condition #{i} must be an operator call")));
            }
            entry
                .condition
                .validate()
                .map_err(|err| invalid(format!("condition #{i}: {}", reason(err))))?;
        }
        Ok(())
    }
}

impl Expression {
    /// Check that this tree is a legal boolean predicate.
    pub fn validate(&self) -> Result<()> {
        match self {
            Expression::Literal(Scalar::Bool(_)) => Ok(()),
            Expression::Literal(value) => Err(invalid(format!(
                "literal {value} is not a boolean predicate"
            ))),
            Expression::Symbol { symbol } => Err(invalid(format!(
                "symbol {symbol} is not a boolean predicate"
            ))),
            Expression::Call { func, args } => validate_call(func, args),
        }
    }
}

fn validate_call(func: &str, args: &[Expression]) -> Result<()> {
    let op = Operator::from_name(func).ok_or_else(|| invalid(format!("unknown operator `{func}`")))?;

    match op.family() {
        Family::Logic => {
            if op.is_unary() {
                expect_arity(op, args, 1)?;
            } else if args.is_empty() {
                return Err(invalid(format!("`{func}` needs at least one argument")));
            }
            args.iter().try_for_each(Expression::validate)
        }

        Family::Compare => {
            expect_arity(op, args, 2)?;
            let mut has_symbol = false;
            for arg in args {
                match arg {
                    Expression::Symbol { symbol } => {
                        known_attribute(symbol)?;
                        has_symbol = true;
                    }
                    Expression::Literal(_) => {}
                    Expression::Call { .. } => {
                        return Err(invalid(format!("`{func}` operands must be symbols or literals")))
                    }
                }
            }
            if !has_symbol {
                return Err(invalid(format!("`{func}` must reference a client attribute")));
            }
            Ok(())
        }

        Family::Version => {
            expect_arity(op, args, 2)?;
            expect_symbol(op, &args[0], Domain::Version)?;
            let literal = expect_text_literal(op, &args[1])?;
            match Version::parse(literal) {
                Some(version) if version.segments().len() <= MAX_VERSION_SEGMENTS => Ok(()),
                Some(_) => Err(invalid(format!(
                    "version `{literal}` has more than {MAX_VERSION_SEGMENTS} segments"
                ))),
                None => Err(invalid(format!("`{literal}` is not a dotted numeric version"))),
            }
        }

        Family::String => {
            if op.is_unary() {
                expect_arity(op, args, 1)?;
                expect_symbol(op, &args[0], Domain::Text)
            } else {
                expect_arity(op, args, 2)?;
                expect_symbol(op, &args[0], Domain::Text)?;
                expect_text_literal(op, &args[1]).map(|_| ())
            }
        }
    }
}

fn expect_arity(op: Operator, args: &[Expression], arity: usize) -> Result<()> {
    if args.len() != arity {
        return Err(invalid(format!(
            "`{}` takes {arity} argument(s), got {}",
            op.name(),
            args.len()
        )));
    }
    Ok(())
}

fn expect_symbol(op: Operator, arg: &Expression, domain: Domain) -> Result<()> {
    let Expression::Symbol { symbol } = arg else {
        return Err(invalid(format!(
            "`{}` expects a client attribute as its first argument",
            op.name()
        )));
    };
    let attribute = known_attribute(symbol)?;
    if attribute.domain() != domain {
        return Err(invalid(format!(
            "`{}` cannot be applied to {symbol}",
            op.name()
        )));
    }
    Ok(())
}

fn expect_text_literal(op: Operator, arg: &Expression) -> Result<&str> {
    match arg {
        Expression::Literal(Scalar::String(s)) => Ok(s),
        _ => Err(invalid(format!(
            "`{}` expects a string literal argument",
            op.name()
        ))),
    }
}

fn known_attribute(symbol: &str) -> Result<Attribute> {
    Attribute::from_name(symbol).ok_or_else(|| invalid(format!("unknown symbol `{symbol}`")))
}

fn invalid(reason: String) -> Error {
    Error::Validation(reason)
}

fn reason(err: Error) -> String {
    match err {
        Error::Validation(reason) => reason,
        other => other.to_string(),
    }
}
