//! Core types for the grouping engine (event payload + persisted hash records).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::strategy::GroupingConfigRef;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

macro_rules! id_type {
  ($(#[$meta:meta])* $name:ident) => {
    $(#[$meta])*
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct $name(pub u64);

    impl fmt::Display for $name {
      fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
      }
    }
  };
}

id_type!(ProjectId);
id_type!(
  /// Issue a hash resolves to.
  GroupId
);
id_type!(TombstoneId);
id_type!(GroupHashId);

// ---------------------------------------------------------------------------
// Platform
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
  Java,
  Javascript,
  Node,
  Cocoa,
  Python,
  Ruby,
  Php,
  #[default]
  #[serde(other)]
  Other,
}

// ---------------------------------------------------------------------------
// Event payload
// ---------------------------------------------------------------------------

/// One stack entry. Unknown fields are silently ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Frame {
  #[serde(default)]
  pub filename: Option<String>,
  #[serde(default)]
  pub abs_path: Option<String>,
  #[serde(default)]
  pub package: Option<String>,
  #[serde(default)]
  pub module: Option<String>,
  #[serde(default)]
  pub function: Option<String>,
  #[serde(default)]
  pub symbol: Option<String>,
  #[serde(default)]
  pub lineno: Option<u32>,
  #[serde(default)]
  pub colno: Option<u32>,
  #[serde(default)]
  pub context_line: Option<String>,
  #[serde(default)]
  pub in_app: bool,
  #[serde(default)]
  pub platform: Option<Platform>,
}

impl Frame {
  /// Frame was loaded from a URL (browser bundles, blobs, local files).
  pub fn is_url(&self) -> bool {
    let path = self.abs_path.as_deref().or(self.filename.as_deref());
    path.is_some_and(crate::normalize::has_url_origin)
  }

  /// Same call site as `other` across every field that identifies a frame.
  pub fn is_recursion_of(&self, other: &Frame) -> bool {
    self.abs_path == other.abs_path
      && self.package == other.package
      && self.module == other.module
      && self.filename == other.filename
      && self.function == other.function
      && self.lineno == other.lineno
      && self.colno == other.colno
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Stacktrace {
  #[serde(default)]
  pub frames: Vec<Frame>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Exception {
  #[serde(rename = "type", default)]
  pub ty: Option<String>,
  #[serde(default)]
  pub value: Option<String>,
  #[serde(default)]
  pub stacktrace: Option<Stacktrace>,
}

/// The event being grouped. Owned by the caller; grouping may rewrite
/// `fingerprint` and frame `in_app` flags in place.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Event {
  #[serde(default)]
  pub event_id: String,
  #[serde(default)]
  pub platform: Platform,
  #[serde(default)]
  pub message: Option<String>,
  #[serde(default)]
  pub exception: Option<Exception>,
  #[serde(default)]
  pub stacktrace: Option<Stacktrace>,
  #[serde(default)]
  pub fingerprint: Option<Vec<String>>,
  /// Config stamped on the event at ingestion time; may be stale.
  #[serde(default)]
  pub grouping_config: Option<GroupingConfigRef>,
}

impl Event {
  /// The stacktrace used for grouping: the exception's, else the top-level one.
  pub fn grouping_stacktrace(&self) -> Option<&Stacktrace> {
    self
      .exception
      .as_ref()
      .and_then(|e| e.stacktrace.as_ref())
      .or(self.stacktrace.as_ref())
  }

  pub(crate) fn stacktraces_mut(&mut self) -> impl Iterator<Item = &mut Stacktrace> {
    let exception = self.exception.as_mut().and_then(|e| e.stacktrace.as_mut());
    exception.into_iter().chain(self.stacktrace.as_mut())
  }

  pub fn exception_type(&self) -> Option<&str> {
    self.exception.as_ref().and_then(|e| e.ty.as_deref())
  }

  pub fn exception_value(&self) -> Option<&str> {
    self.exception.as_ref().and_then(|e| e.value.as_deref())
  }

  pub fn frames(&self) -> &[Frame] {
    self
      .grouping_stacktrace()
      .map(|s| s.frames.as_slice())
      .unwrap_or_default()
  }
}

// ---------------------------------------------------------------------------
// Project
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
  pub id: ProjectId,
  #[serde(default)]
  pub organization_id: u64,
  /// Current grouping config id, e.g. "legacy:2019-03-12".
  pub grouping_config: String,
  #[serde(default)]
  pub grouping_enhancements: String,
  #[serde(default)]
  pub fingerprinting_rules: String,
  #[serde(default)]
  pub secondary_grouping_config: Option<String>,
  #[serde(default)]
  pub secondary_grouping_expiry: Option<DateTime<Utc>>,
}

impl Project {
  pub fn new(id: u64, grouping_config: impl Into<String>) -> Self {
    Self {
      id: ProjectId(id),
      organization_id: 0,
      grouping_config: grouping_config.into(),
      grouping_enhancements: String::new(),
      fingerprinting_rules: String::new(),
      secondary_grouping_config: None,
      secondary_grouping_expiry: None,
    }
  }

  /// Reference to the project's current config.
  pub fn config_ref(&self) -> GroupingConfigRef {
    GroupingConfigRef {
      id: self.grouping_config.clone(),
      enhancements: self.grouping_enhancements.clone(),
    }
  }

  /// Secondary config while the project migrates between configs.
  pub fn active_secondary_config(&self, now: DateTime<Utc>) -> Option<GroupingConfigRef> {
    let id = self.secondary_grouping_config.as_ref()?;
    let expiry = self.secondary_grouping_expiry?;
    (expiry > now).then(|| GroupingConfigRef {
      id: id.clone(),
      enhancements: self.grouping_enhancements.clone(),
    })
  }
}

// ---------------------------------------------------------------------------
// Persisted hash records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupHashState {
  #[default]
  Normal,
  /// Subdivided into more specific hashes; must not absorb new events.
  Split,
}

/// One row of the hash store, unique on `(project_id, hash)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupHash {
  pub id: GroupHashId,
  pub project_id: ProjectId,
  pub hash: String,
  pub group_id: Option<GroupId>,
  pub group_tombstone_id: Option<TombstoneId>,
  pub state: GroupHashState,
}

impl GroupHash {
  pub fn is_split(&self) -> bool {
    self.state == GroupHashState::Split
  }

  /// Either attached to an issue or tombstoned.
  pub fn is_committed(&self) -> bool {
    self.group_id.is_some() || self.group_tombstone_id.is_some()
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupHashMetadata {
  pub group_hash_id: GroupHashId,
  pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Harness output
// ---------------------------------------------------------------------------

/// Structured error output for lines that could not be grouped.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorOutput {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub event_id: Option<String>,
  pub outcome: &'static str,
  pub message: String,
}

impl ErrorOutput {
  pub fn new(message: impl Into<String>) -> Self {
    Self {
      event_id: None,
      outcome: "error",
      message: message.into(),
    }
  }

  pub fn with_event_id(mut self, event_id: impl Into<String>) -> Self {
    self.event_id = Some(event_id.into());
    self
  }
}
