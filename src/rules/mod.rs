//! Conditional rule DSL.
//!
//! A rule document is a [`CondValues`]: ordered `(condition, value)` pairs and a default. Each
//! condition is an [`Expression`] tree over client attributes built from a closed
//! [`Operator`] registry. Documents travel as JSON, are checked by [`validate_rule`] before they
//! are stored, and are executed by an [`Evaluator`] that never fails: a predicate that cannot be
//! applied is `false`.
//!
//! Trees also have a parenthesized prefix form ([`Expression::to_text`],
//! [`CondValues::to_text`]) used for compact storage and logging.
mod eval;
mod models;
mod text;
mod validate;
mod version;

pub use eval::{wildcard_to_regex, Evaluator};
pub use models::{CondValue, CondValues, Expression, Family, Operator, Scalar};
pub use validate::{validate_rule, MAX_VERSION_SEGMENTS};
pub use version::Version;
