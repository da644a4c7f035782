//! Core of a remote configuration server.
//!
//! # Overview
//!
//! Clients poll a [`ConfigService`] for the settings of an app. Each setting is a plain value, a
//! reference to a template app, or a rule document ([`rules::CondValues`]) that picks a value based
//! on the client's attributes ([`ClientContext`]): language, OS, app version, timezone and so on.
//!
//! Operators edit users, apps, configs, webhooks and nodes through the service's write path. Every
//! accepted mutation is persisted through the [`Storage`] collaborator together with a new
//! [`DataVersion`], then applied to the in-memory snapshot and pushed to slave nodes. Versions form
//! a hash chain so slaves can tell when they missed an update and resync.
//!
//! # Error Handling
//!
//! Errors are represented by the [`Error`] enum. Each error has a stable [`Error::code`] that is
//! reported in response envelopes.
//!
//! Rule evaluation itself never fails: a predicate that cannot be applied to its arguments (say, a
//! version comparison against `"abc"`) evaluates to `false`.
//!
//! # Logging
//!
//! The crate uses the [`log`](https://docs.rs/log/latest/log/) crate with structured key-values,
//! under the `confsync` target. Consider integrating a `log`-compatible logger implementation for
//! better visibility into replication and rejected requests.

#![warn(rustdoc::missing_crate_level_docs)]

mod config;
pub mod configuration_store;
pub mod context;
mod envelope;
mod error;
pub mod matcher;
pub mod models;
pub mod pool;
pub mod replication;
pub mod rules;
mod service;
pub mod storage;
mod sync_thread;
pub mod telemetry;
pub mod transport;

pub use config::ServerConfig;
pub use configuration_store::{ConfigurationStore, Dump, Snapshot};
pub use context::{Attribute, ClientContext};
pub use envelope::{Envelope, EnvelopeData, ErrorBody};
pub use error::{Error, Result};
pub use matcher::{ResolvedConfigs, ResolvedValue};
pub use models::DataVersion;
pub use replication::{MutationOutcome, SyncOutcome};
pub use service::{ConfigService, ConfigsResponse};
pub use storage::{MemoryStorage, Storage};
pub use sync_thread::SyncThread;
pub use transport::{HttpTransport, PeerTransport, PushPayload};
