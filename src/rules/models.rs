use derive_more::From;
use serde::{Deserialize, Serialize};

use crate::Result;

/// A JSON scalar: the kind of value rules produce and compare.
///
/// Untagged, so rule documents carry native JSON scalars. Integers that fit `i64` decode as
/// [`Scalar::Int`], other numbers as [`Scalar::Float`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, From)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::String(value.to_owned())
    }
}

impl std::fmt::Display for Scalar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scalar::Bool(b) => write!(f, "{b}"),
            Scalar::Int(i) => write!(f, "{i}"),
            Scalar::Float(n) => write!(f, "{n}"),
            Scalar::String(s) => f.write_str(s),
        }
    }
}

impl Scalar {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Scalar::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Scalar::String(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric view of the scalar. Strings are parsed and must be finite, so `"nan"` and `"inf"`
    /// stay text; booleans have no numeric value.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Scalar::Int(i) => Some(*i as f64),
            Scalar::Float(n) => Some(*n),
            Scalar::String(s) => s.trim().parse().ok().filter(|n: &f64| n.is_finite()),
            Scalar::Bool(_) => None,
        }
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Scalar::Int(_) | Scalar::Float(_))
    }
}

/// Rule tree node.
///
/// Wire form: literals are native JSON scalars, a symbol is `{"symbol": name}`, and a call is
/// `{"func": name, "arguments": [...]}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Expression {
    Literal(Scalar),
    Symbol {
        symbol: String,
    },
    Call {
        func: String,
        #[serde(rename = "arguments")]
        args: Vec<Expression>,
    },
}

impl Expression {
    pub fn symbol(name: impl Into<String>) -> Expression {
        Expression::Symbol {
            symbol: name.into(),
        }
    }

    pub fn call(func: impl Into<String>, args: Vec<Expression>) -> Expression {
        Expression::Call {
            func: func.into(),
            args,
        }
    }

    pub fn literal(value: impl Into<Scalar>) -> Expression {
        Expression::Literal(value.into())
    }

    pub fn from_json(json: &str) -> Result<Expression> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl From<Scalar> for Expression {
    fn from(value: Scalar) -> Self {
        Expression::Literal(value)
    }
}

impl From<&str> for Expression {
    fn from(value: &str) -> Self {
        Expression::Literal(value.into())
    }
}

impl From<f64> for Expression {
    fn from(value: f64) -> Self {
        Expression::Literal(value.into())
    }
}

impl From<i64> for Expression {
    fn from(value: i64) -> Self {
        Expression::Literal(value.into())
    }
}

impl From<bool> for Expression {
    fn from(value: bool) -> Self {
        Expression::Literal(value.into())
    }
}

/// One `(condition, value)` pair of a [`CondValues`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CondValue {
    pub condition: Expression,
    pub value: Scalar,
}

/// Conditional value: ordered `(condition, value)` pairs plus a default.
///
/// The first condition that evaluates to `true` selects its value; the default is returned when
/// none match. Compiled once and never patched: an edit replaces the whole document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CondValues {
    #[serde(rename = "cond-values")]
    pub cond_values: Vec<CondValue>,
    #[serde(rename = "default-value")]
    pub default_value: Scalar,
}

impl CondValues {
    /// Decode a rule document. Fails as a whole on malformed input.
    pub fn from_json(json: &str) -> Result<CondValues> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Operator family. Each family constrains arity and operand domains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    /// `= != > >= < <=`: numeric when both sides are numeric, otherwise textual equality.
    Compare,
    /// `ver*`: dotted numeric version comparison.
    Version,
    /// `str*`: text predicates.
    String,
    /// `and or not`.
    Logic,
}

/// The closed operator registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    VerEq,
    VerNe,
    VerGt,
    VerGte,
    VerLt,
    VerLte,
    StrEq,
    StrNe,
    StrEmpty,
    StrNotEmpty,
    StrContains,
    StrNotContains,
    StrWcMatch,
    StrNotWcMatch,
    And,
    Or,
    Not,
}

impl Operator {
    pub const ALL: [Operator; 23] = [
        Operator::Eq,
        Operator::Ne,
        Operator::Gt,
        Operator::Gte,
        Operator::Lt,
        Operator::Lte,
        Operator::VerEq,
        Operator::VerNe,
        Operator::VerGt,
        Operator::VerGte,
        Operator::VerLt,
        Operator::VerLte,
        Operator::StrEq,
        Operator::StrNe,
        Operator::StrEmpty,
        Operator::StrNotEmpty,
        Operator::StrContains,
        Operator::StrNotContains,
        Operator::StrWcMatch,
        Operator::StrNotWcMatch,
        Operator::And,
        Operator::Or,
        Operator::Not,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Ne => "!=",
            Operator::Gt => ">",
            Operator::Gte => ">=",
            Operator::Lt => "<",
            Operator::Lte => "<=",
            Operator::VerEq => "ver=",
            Operator::VerNe => "ver!=",
            Operator::VerGt => "ver>",
            Operator::VerGte => "ver>=",
            Operator::VerLt => "ver<",
            Operator::VerLte => "ver<=",
            Operator::StrEq => "str=",
            Operator::StrNe => "str!=",
            Operator::StrEmpty => "str-empty?",
            Operator::StrNotEmpty => "str-not-empty?",
            Operator::StrContains => "str-contains?",
            Operator::StrNotContains => "str-not-contains?",
            Operator::StrWcMatch => "str-wcmatch?",
            Operator::StrNotWcMatch => "str-not-wcmatch?",
            Operator::And => "and",
            Operator::Or => "or",
            Operator::Not => "not",
        }
    }

    pub fn from_name(name: &str) -> Option<Operator> {
        Operator::ALL.into_iter().find(|op| op.name() == name)
    }

    pub fn family(self) -> Family {
        use Operator::*;
        match self {
            Eq | Ne | Gt | Gte | Lt | Lte => Family::Compare,
            VerEq | VerNe | VerGt | VerGte | VerLt | VerLte => Family::Version,
            StrEq | StrNe | StrEmpty | StrNotEmpty | StrContains | StrNotContains | StrWcMatch
            | StrNotWcMatch => Family::String,
            And | Or | Not => Family::Logic,
        }
    }

    /// Operators that take exactly one argument.
    pub fn is_unary(self) -> bool {
        matches!(self, Operator::StrEmpty | Operator::StrNotEmpty | Operator::Not)
    }
}

#[cfg(test)]
mod tests {
    use super::{CondValues, Expression, Operator, Scalar};

    #[test]
    fn parse_scenario_rule() {
        let rule = CondValues::from_json(
            r#"{"cond-values":[{"condition":{"func":"str=","arguments":[{"symbol":"LANG"},"en"]},"value":999}],"default-value":100000}"#,
        )
        .unwrap();

        assert_eq!(rule.cond_values.len(), 1);
        assert_eq!(
            rule.cond_values[0].condition,
            Expression::call(
                "str=",
                vec![Expression::symbol("LANG"), Expression::literal("en")]
            )
        );
        assert_eq!(rule.cond_values[0].value, Scalar::Int(999));
        assert_eq!(rule.default_value, Scalar::Int(100000));
    }

    #[test]
    fn json_roundtrip_keeps_number_kinds() {
        let rule = CondValues {
            cond_values: vec![super::CondValue {
                condition: Expression::call(
                    "and",
                    vec![
                        Expression::call(
                            "ver>=",
                            vec![Expression::symbol("APP_VERSION"), "1.0".into()],
                        ),
                        Expression::call("=", vec![Expression::symbol("IP"), 1.5.into()]),
                    ],
                ),
                value: Scalar::Float(1.0),
            }],
            default_value: Scalar::Bool(false),
        };

        let json = rule.to_json().unwrap();
        assert!(json.contains("1.0"));
        assert_eq!(CondValues::from_json(&json).unwrap(), rule);
    }

    #[test]
    fn malformed_documents_are_rejected() {
        assert!(CondValues::from_json("{").is_err());
        assert!(CondValues::from_json(r#"{"cond-values":[]}"#).is_err());
        assert!(CondValues::from_json(r#"{"cond-values":[{"value":1}],"default-value":1}"#).is_err());
        assert!(Expression::from_json("null").is_err());
        assert!(Expression::from_json("[1, 2]").is_err());
        assert!(Expression::from_json(r#"{"func":"and"}"#).is_err());
    }

    #[test]
    fn registry_names_roundtrip() {
        for op in Operator::ALL {
            assert_eq!(Operator::from_name(op.name()), Some(op));
        }
        assert_eq!(Operator::from_name("str-regex?"), None);
    }
}
