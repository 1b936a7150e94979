//! PushLog Grouping Engine: deterministic issue grouping for error events.
//!
//! Turns an event's stack trace into an explainable tree of contributing
//! signals, reduces each grouping variant to stable hashes, and reconciles
//! those hashes with the persisted hash store to decide which issue the
//! event belongs to.
//!
//! Storage, configs, flags and metrics are reached through traits; the
//! in-memory implementations back the tests and the JSON-lines harness.

pub mod component;
pub mod config;
pub mod engine;
pub mod enhancements;
pub mod error;
pub mod fingerprint;
pub mod frame;
pub mod hashes;
pub mod matching;
pub mod metrics;
pub mod normalize;
pub mod options;
pub mod resolver;
pub mod stacktrace;
pub mod store;
pub mod strategy;
pub mod types;

pub use config::Config;
pub use engine::{Collaborators, GroupingEngine, GroupingOutcome, GroupingResult, HashOutcome};
pub use error::{ConfigError, GroupingError, StoreError};
pub use hashes::CalculatedHashes;
pub use strategy::{GroupingConfigId, GroupingConfigRef};
pub use types::{Event, Project};
