//! Feature flags and runtime options, passed explicitly into the engine.

use std::collections::{HashMap, HashSet};

use serde_json::Value;

use crate::types::Project;

/// Project-scoped feature gating metadata rows on first-seen hashes.
pub const METADATA_FEATURE: &str = "projects:grouphash-metadata-creation";
/// Global switch for metadata writes during ingestion.
pub const METADATA_WRITES_OPTION: &str = "grouping.grouphash_metadata.ingestion_writes_enabled";
/// Fraction (0..=1) of events that also run the background config.
pub const BACKGROUND_SAMPLE_RATE_OPTION: &str = "store.background-grouping-sample-rate";
/// Config id used for background grouping.
pub const BACKGROUND_CONFIG_OPTION: &str = "store.background-grouping-config-id";

pub trait OptionsProvider: Send + Sync {
  fn feature_enabled(&self, feature: &str, project: &Project) -> bool;

  fn get(&self, key: &str) -> Option<Value>;

  fn get_bool(&self, key: &str) -> bool {
    self.get(key).and_then(|v| v.as_bool()).unwrap_or(false)
  }

  fn get_f64(&self, key: &str) -> f64 {
    self.get(key).and_then(|v| v.as_f64()).unwrap_or(0.0)
  }

  fn get_str(&self, key: &str) -> Option<String> {
    self.get(key).and_then(|v| v.as_str().map(str::to_string))
  }
}

/// Fixed flags and options, for tests and the harness.
#[derive(Debug, Clone, Default)]
pub struct StaticOptions {
  features: HashSet<String>,
  values: HashMap<String, Value>,
}

impl StaticOptions {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_feature(mut self, feature: impl Into<String>) -> Self {
    self.features.insert(feature.into());
    self
  }

  pub fn with_option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
    self.values.insert(key.into(), value.into());
    self
  }
}

impl OptionsProvider for StaticOptions {
  fn feature_enabled(&self, feature: &str, _project: &Project) -> bool {
    self.features.contains(feature)
  }

  fn get(&self, key: &str) -> Option<Value> {
    self.values.get(key).cloned()
  }
}
