//! Structured error types for the grouping engine.

use thiserror::Error;

use crate::types::TombstoneId;

/// Failures while resolving or parsing grouping configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
  #[error("unknown grouping config: {0}")]
  UnknownConfig(String),

  #[error("invalid stack trace rule on line {line}: {reason}")]
  InvalidEnhancements { line: usize, reason: String },

  #[error("invalid fingerprinting rule on line {line}: {reason}")]
  InvalidFingerprintRule { line: usize, reason: String },
}

impl ConfigError {
  pub fn enhancements(line: usize, reason: impl Into<String>) -> Self {
    Self::InvalidEnhancements {
      line,
      reason: reason.into(),
    }
  }

  pub fn fingerprint_rule(line: usize, reason: impl Into<String>) -> Self {
    Self::InvalidFingerprintRule {
      line,
      reason: reason.into(),
    }
  }
}

/// Failures reported by a hash or metadata store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
  #[error("store unavailable: {0}")]
  Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GroupingError {
  #[error("config: {0}")]
  Config(#[from] ConfigError),

  #[error("store: {0}")]
  Store(#[from] StoreError),

  /// Not a defect: the event matched a tombstoned hash and must be dropped.
  #[error("event discarded by tombstone {tombstone_id}")]
  Discarded { tombstone_id: TombstoneId },
}

impl GroupingError {
  pub fn is_discarded(&self) -> bool {
    matches!(self, Self::Discarded { .. })
  }

  /// True for errors that the primary pass retries against the project default config.
  pub fn is_recoverable(&self) -> bool {
    matches!(self, Self::Config(ConfigError::UnknownConfig(_)))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn discard_is_distinguishable() {
    let err = GroupingError::Discarded {
      tombstone_id: TombstoneId(9),
    };
    assert!(err.is_discarded());
    assert!(!err.is_recoverable());
    assert!(err.to_string().contains('9'));
  }

  #[test]
  fn only_unknown_config_is_recoverable() {
    let unknown = GroupingError::from(ConfigError::UnknownConfig("nope:1".into()));
    assert!(unknown.is_recoverable());

    let invalid = GroupingError::from(ConfigError::enhancements(3, "unknown action"));
    assert!(!invalid.is_recoverable());
    assert!(invalid.to_string().contains("line 3"));

    let store = GroupingError::from(StoreError::Unavailable("down".into()));
    assert!(!store.is_recoverable());
    assert!(!store.is_discarded());
  }
}
