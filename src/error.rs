use std::sync::Arc;

use thiserror::Error;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the configuration server core.
///
/// Rule evaluation never produces an `Error`: predicates that cannot be applied evaluate to a
/// neutral `false` instead.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// Rule document is not valid JSON or does not have a known shape.
    #[error("malformed rule document: {0}")]
    Decode(String),

    /// Rule or entity is well-formed but not admissible.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Durable storage failed. The mutation was rolled back.
    #[error("storage error: {0}")]
    Persistence(String),

    /// The referenced entity does not exist.
    #[error("{kind} not found: {key}")]
    NotFound {
        /// Entity kind.
        kind: &'static str,
        /// Entity key.
        key: String,
    },

    /// Write attempted on a node that is not the master.
    #[error("operation not permitted on this node")]
    NotPermitted,

    /// Slave data is older than the staleness threshold.
    #[error("node data is stale")]
    StaleData {
        /// Seconds since the last successful check against the master. `None` if it never
        /// succeeded.
        age_secs: Option<i64>,
    },

    /// Caller expected a different current data version.
    #[error("data version conflict: expected {expected}, current {current}")]
    VersionConflict {
        /// Version the caller expected.
        expected: i64,
        /// Version this node is at.
        current: i64,
    },

    /// Replicated delta does not extend the local version chain.
    #[error("data version gap: local {local}, received {received}")]
    VersionGap {
        /// Local version.
        local: i64,
        /// Version carried by the delta.
        received: i64,
    },

    /// Another master is already registered.
    #[error("another master is already registered: {url}")]
    MasterConflict {
        /// URL of the registered master.
        url: String,
    },

    /// Invalid node URL.
    #[error("invalid node url")]
    InvalidUrl(#[source] url::ParseError),

    /// A peer answered with an error envelope.
    #[error("peer error {code}: {msg}")]
    Remote {
        /// Error code reported by the peer.
        code: String,
        /// Message reported by the peer.
        msg: String,
    },

    /// Network error talking to a peer.
    #[error(transparent)]
    Network(Arc<reqwest::Error>),

    /// An I/O error.
    #[error(transparent)]
    // std::io::Error is not clonable, so we're wrapping it in an Arc.
    Io(Arc<std::io::Error>),

    /// A background thread panicked.
    #[error("background thread panicked")]
    ThreadPanicked,
}

impl Error {
    /// Stable error code reported in the response envelope.
    pub fn code(&self) -> &str {
        match self {
            Error::Decode(_) => "DECODE_ERROR",
            Error::Validation(_) => "VALIDATION_ERROR",
            Error::NotFound { .. } => "NOT_FOUND",
            Error::NotPermitted => "NOT_PERMITTED",
            Error::StaleData { .. } => "STALE_DATA",
            Error::VersionConflict { .. } => "VERSION_CONFLICT",
            Error::VersionGap { .. } => "VERSION_GAP",
            Error::MasterConflict { .. } => "MASTER_CONFLICT",
            Error::InvalidUrl(_) => "INVALID_URL",
            Error::Remote { code, .. } => code.as_str(),
            Error::Persistence(_)
            | Error::Network(_)
            | Error::Io(_)
            | Error::ThreadPanicked => "SERVER_ERROR",
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(Arc::new(value))
    }
}

impl From<reqwest::Error> for Error {
    fn from(value: reqwest::Error) -> Self {
        Error::Network(Arc::new(value.without_url()))
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Error::Decode(value.to_string())
    }
}
