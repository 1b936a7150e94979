//! Core engine: computes hashes for an event under each active config and
//! reconciles them against the hash store.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{ConfigError, GroupingError};
use crate::fingerprint::apply_fingerprinting;
use crate::hashes::CalculatedHashes;
use crate::metrics::{MetricsSink, TracingMetrics};
use crate::options::{
  OptionsProvider, StaticOptions, BACKGROUND_CONFIG_OPTION, BACKGROUND_SAMPLE_RATE_OPTION,
};
use crate::resolver::{resolve, resolve_flat, Resolution};
use crate::stacktrace::normalize_stacktraces_for_grouping;
use crate::store::{ensure_hashes, HashStore, InMemoryHashStore, InMemoryMetadataStore, MetadataStore};
use crate::strategy::{get_grouping_variants, BuiltinRegistry, ConfigRegistry, GroupingConfig, GroupingConfigRef};
use crate::types::{Event, GroupHashId, GroupId, Project};

/// External services the engine talks to.
#[derive(Clone)]
pub struct Collaborators {
  pub registry: Arc<dyn ConfigRegistry>,
  pub options: Arc<dyn OptionsProvider>,
  pub store: Arc<dyn HashStore>,
  pub metadata: Arc<dyn MetadataStore>,
  pub metrics: Arc<dyn MetricsSink>,
}

impl Collaborators {
  /// Built-in configs, no flags, empty in-memory stores, tracing metrics.
  pub fn in_memory(config: &Config) -> Self {
    Self {
      registry: Arc::new(BuiltinRegistry::new(config.default_grouping_config)),
      options: Arc::new(StaticOptions::new()),
      store: Arc::new(InMemoryHashStore::new()),
      metadata: Arc::new(InMemoryMetadataStore::new()),
      metrics: Arc::new(TracingMetrics),
    }
  }
}

/// Hashes from every pass that ran for one event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HashOutcome {
  pub primary: CalculatedHashes,
  pub secondary: Option<CalculatedHashes>,
  pub background: Option<CalculatedHashes>,
  /// Primary plus secondary hashes, used for matching.
  pub merged: CalculatedHashes,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum GroupingOutcome {
  /// The event joins an existing issue through `hash`.
  Existing { group_id: GroupId, hash: String },
  /// Nothing matched; the caller creates an issue anchored at the root hash.
  New { root_hierarchical_hash: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupingResult {
  pub outcome: GroupingOutcome,
  pub hashes: HashOutcome,
  /// Store ids for the merged flat then hierarchical hashes.
  pub group_hash_ids: Vec<GroupHashId>,
}

/// The grouping engine. Stateless apart from its collaborators.
pub struct GroupingEngine {
  config: Config,
  registry: Arc<dyn ConfigRegistry>,
  options: Arc<dyn OptionsProvider>,
  store: Arc<dyn HashStore>,
  metadata: Arc<dyn MetadataStore>,
  metrics: Arc<dyn MetricsSink>,
}

impl GroupingEngine {
  pub fn new(config: Config, collaborators: Collaborators) -> Self {
    let Collaborators {
      registry,
      options,
      store,
      metadata,
      metrics,
    } = collaborators;
    Self {
      config,
      registry,
      options,
      store,
      metadata,
      metrics,
    }
  }

  pub fn with_defaults() -> Self {
    let config = Config::default();
    let collaborators = Collaborators::in_memory(&config);
    Self::new(config, collaborators)
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  /// Group one event end to end: compute, persist, resolve.
  ///
  /// A tombstoned match is returned as [`GroupingError::Discarded`].
  pub fn assign(&self, project: &Project, event: &mut Event) -> Result<GroupingResult, GroupingError> {
    let primary = event
      .grouping_config
      .clone()
      .unwrap_or_else(|| project.config_ref());
    let secondary = project.active_secondary_config(Utc::now());
    let background = self.background_config(project, event);

    let hashes = self.compute_hashes(
      project,
      event,
      &primary,
      secondary.as_ref(),
      background.as_ref(),
    )?;

    let group_hash_ids = ensure_hashes(
      self.store.as_ref(),
      self.metadata.as_ref(),
      self.options.as_ref(),
      self.metrics.as_ref(),
      project,
      &hashes.merged,
    )?;

    let merged = &hashes.merged;
    let resolution = if merged.hierarchical_hashes.is_empty() {
      resolve_flat(self.store.as_ref(), project.id, &merged.hashes).map(|group_hash| Resolution {
        group_hash,
        root_hierarchical_hash: None,
      })
    } else {
      resolve(
        self.store.as_ref(),
        project.id,
        &merged.hashes,
        &merged.hierarchical_hashes,
      )
    };

    let resolution = match resolution {
      Err(GroupingError::Discarded { tombstone_id }) => {
        info!(project_id = %project.id, event_id = %event.event_id, %tombstone_id, "discarding event");
        self.metrics.increment("grouping.discarded", &[]);
        return Err(GroupingError::Discarded { tombstone_id });
      }
      other => other?,
    };

    let outcome = match resolution.group_hash {
      Some(record) => match record.group_id {
        Some(group_id) => GroupingOutcome::Existing {
          group_id,
          hash: record.hash,
        },
        None => GroupingOutcome::New {
          root_hierarchical_hash: resolution.root_hierarchical_hash,
        },
      },
      None => GroupingOutcome::New {
        root_hierarchical_hash: resolution.root_hierarchical_hash,
      },
    };

    Ok(GroupingResult {
      outcome,
      hashes,
      group_hash_ids,
    })
  }

  /// Hashes under the primary config and, when given, the secondary and
  /// background configs.
  ///
  /// Only the primary pass touches `event`; the others run on copies and
  /// their failures are reported and dropped.
  pub fn compute_hashes(
    &self,
    project: &Project,
    event: &mut Event,
    primary: &GroupingConfigRef,
    secondary: Option<&GroupingConfigRef>,
    background: Option<&GroupingConfigRef>,
  ) -> Result<HashOutcome, GroupingError> {
    let background = background.and_then(|config| {
      let mut copy = event.clone();
      let result = self
        .registry
        .load_config(config)
        .map_err(GroupingError::from)
        .map(|grouping| self.calculate_event_grouping(project, &mut copy, &grouping, "background"));
      self.best_effort("background", result)
    });

    let secondary = secondary.and_then(|config| {
      let mut copy = event.clone();
      let result = self
        .registry
        .load_config(config)
        .map_err(GroupingError::from)
        .map(|grouping| self.calculate_event_grouping(project, &mut copy, &grouping, "secondary"));
      self.best_effort("secondary", result)
    });

    let grouping = self.load_primary_config(project, primary)?;
    let primary = self.calculate_event_grouping(project, event, &grouping, "primary");

    let merged = CalculatedHashes::merged(&primary, secondary.as_ref());
    Ok(HashOutcome {
      primary,
      secondary,
      background,
      merged,
    })
  }

  /// Load the event's config, falling back once to the project's current
  /// config when the id is unknown.
  fn load_primary_config(
    &self,
    project: &Project,
    config: &GroupingConfigRef,
  ) -> Result<GroupingConfig, GroupingError> {
    match self.registry.load_config(config) {
      Ok(grouping) => Ok(grouping),
      Err(err @ ConfigError::UnknownConfig(_)) => {
        warn!(project_id = %project.id, error = %err, "falling back to project grouping config");
        Ok(self.registry.project_default_config(project)?)
      }
      Err(err) => Err(err.into()),
    }
  }

  /// Normalize, fingerprint and reduce one event under one loaded config.
  pub fn calculate_event_grouping(
    &self,
    project: &Project,
    event: &mut Event,
    grouping: &GroupingConfig,
    pass: &str,
  ) -> CalculatedHashes {
    let start = Instant::now();

    normalize_stacktraces_for_grouping(event, grouping);
    let rules = self.registry.project_fingerprinting_rules(project);
    let matched_rule = apply_fingerprinting(event, &rules);
    let variants = get_grouping_variants(event, grouping, &self.config, matched_rule.as_deref());
    let hashes = CalculatedHashes::from_variants(
      variants,
      grouping.id.supports_hierarchical(),
      self.config.hierarchical_max_depth,
    );

    self.metrics.timing(
      "grouping.calculate_event_grouping",
      start.elapsed(),
      &[("config", grouping.id.as_str()), ("pass", pass)],
    );
    debug!(
      event_id = %event.event_id,
      config = %grouping.id,
      pass,
      hashes = ?hashes.hashes,
      "calculated event grouping"
    );
    hashes
  }

  fn best_effort(
    &self,
    pass: &str,
    result: Result<CalculatedHashes, GroupingError>,
  ) -> Option<CalculatedHashes> {
    match result {
      Ok(hashes) => {
        self
          .metrics
          .increment(&format!("grouping.{}.calculated", pass), &[]);
        Some(hashes)
      }
      Err(err) => {
        warn!(pass, error = %err, "ignoring failed grouping pass");
        self.metrics.report_exception(pass, &err);
        None
      }
    }
  }

  /// Background config for a sampled share of events.
  fn background_config(&self, project: &Project, event: &Event) -> Option<GroupingConfigRef> {
    let rate = self.options.get_f64(BACKGROUND_SAMPLE_RATE_OPTION);
    if rate <= 0.0 || (rate < 1.0 && sample_bucket(&event.event_id) >= rate) {
      return None;
    }
    let id = self.options.get_str(BACKGROUND_CONFIG_OPTION)?;
    Some(GroupingConfigRef {
      id,
      enhancements: project.grouping_enhancements.clone(),
    })
  }
}

/// Stable position of an event id in [0, 1].
fn sample_bucket(event_id: &str) -> f64 {
  let hash = blake3::hash(event_id.as_bytes());
  let mut prefix = [0u8; 8];
  prefix.copy_from_slice(&hash.as_bytes()[..8]);
  u64::from_be_bytes(prefix) as f64 / u64::MAX as f64
}
