//! Grouping configs and per-event variant assembly.
//!
//! Configs form a closed set; ids arriving from events or projects are
//! resolved through a [`ConfigRegistry`] and unknown ids surface as
//! [`ConfigError::UnknownConfig`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::component::{ComponentId, GroupingComponent};
use crate::config::Config;
use crate::enhancements::Enhancements;
use crate::error::ConfigError;
use crate::fingerprint::{resolve_fingerprint, FingerprintMode, FingerprintingRules};
use crate::hashes::hash_from_values;
use crate::stacktrace::{group_stacktrace, StackVariant};
use crate::types::{Event, Exception, Project};

// ---------------------------------------------------------------------------
// Config ids
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupingConfigId {
  /// `legacy:2019-03-12`: flat hashes only.
  Legacy2019,
  /// `mobile:2021-02-12`: legacy frame rules plus hierarchical hashes.
  Mobile2021,
}

impl GroupingConfigId {
  pub const ALL: [Self; 2] = [Self::Legacy2019, Self::Mobile2021];

  pub fn as_str(self) -> &'static str {
    match self {
      Self::Legacy2019 => "legacy:2019-03-12",
      Self::Mobile2021 => "mobile:2021-02-12",
    }
  }

  pub fn supports_hierarchical(self) -> bool {
    match self {
      Self::Legacy2019 => false,
      Self::Mobile2021 => true,
    }
  }
}

impl FromStr for GroupingConfigId {
  type Err = ConfigError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Self::ALL
      .into_iter()
      .find(|id| id.as_str() == s)
      .ok_or_else(|| ConfigError::UnknownConfig(s.to_string()))
  }
}

impl fmt::Display for GroupingConfigId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Unresolved config as carried on events and projects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupingConfigRef {
  pub id: String,
  #[serde(default)]
  pub enhancements: String,
}

impl GroupingConfigRef {
  pub fn new(id: impl Into<String>) -> Self {
    Self {
      id: id.into(),
      enhancements: String::new(),
    }
  }
}

/// A loaded, validated grouping config.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupingConfig {
  pub id: GroupingConfigId,
  pub enhancements: Enhancements,
}

impl GroupingConfig {
  pub fn new(id: GroupingConfigId) -> Self {
    Self {
      id,
      enhancements: Enhancements::default(),
    }
  }

  pub fn from_ref(config: &GroupingConfigRef) -> Result<Self, ConfigError> {
    Ok(Self {
      id: config.id.parse()?,
      enhancements: Enhancements::parse(&config.enhancements)?,
    })
  }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Source of grouping configs and per-project grouping rules.
pub trait ConfigRegistry: Send + Sync {
  fn load_config(&self, config: &GroupingConfigRef) -> Result<GroupingConfig, ConfigError>;

  /// The project's current config, used when an event carries a stale one.
  fn project_default_config(&self, project: &Project) -> Result<GroupingConfig, ConfigError>;

  fn project_fingerprinting_rules(&self, project: &Project) -> FingerprintingRules;
}

/// Registry backed by the built-in configs and the project's own fields.
#[derive(Debug, Clone)]
pub struct BuiltinRegistry {
  fallback: GroupingConfigId,
}

impl BuiltinRegistry {
  pub fn new(fallback: GroupingConfigId) -> Self {
    Self { fallback }
  }
}

impl ConfigRegistry for BuiltinRegistry {
  fn load_config(&self, config: &GroupingConfigRef) -> Result<GroupingConfig, ConfigError> {
    GroupingConfig::from_ref(config)
  }

  fn project_default_config(&self, project: &Project) -> Result<GroupingConfig, ConfigError> {
    let mut config = project.config_ref();
    if config.id.is_empty() {
      config.id = self.fallback.as_str().to_string();
    }
    GroupingConfig::from_ref(&config)
  }

  fn project_fingerprinting_rules(&self, project: &Project) -> FingerprintingRules {
    match FingerprintingRules::parse(&project.fingerprinting_rules) {
      Ok(rules) => rules,
      Err(err) => {
        warn!(project_id = %project.id, error = %err, "ignoring invalid fingerprinting rules");
        FingerprintingRules::default()
      }
    }
  }
}

// ---------------------------------------------------------------------------
// Variants
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum VariantKind {
  App,
  System,
  Default,
  CustomFingerprint,
}

impl From<StackVariant> for VariantKind {
  fn from(v: StackVariant) -> Self {
    match v {
      StackVariant::App => Self::App,
      StackVariant::System => Self::System,
    }
  }
}

/// One grouping lens over an event and the component tree it produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupingVariant {
  pub kind: VariantKind,
  pub component: GroupingComponent,
  /// Fingerprint values appended to the hash input.
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub salt: Vec<String>,
}

impl GroupingVariant {
  pub fn contributes(&self) -> bool {
    self.component.contributes()
  }

  /// Flat hash, or `None` when the variant does not contribute.
  pub fn hash(&self) -> Option<String> {
    if !self.contributes() {
      return None;
    }
    let values = self.component.hash_values();
    Some(hash_from_values(
      values.into_iter().chain(self.salt.iter().map(String::as_str)),
    ))
  }
}

/// Compute every grouping variant for an event.
///
/// `matched_rule` is the fingerprinting rule that set the event's
/// fingerprint, used to explain a custom fingerprint variant.
pub fn get_grouping_variants(
  event: &Event,
  grouping: &GroupingConfig,
  config: &Config,
  matched_rule: Option<&str>,
) -> Vec<GroupingVariant> {
  let variants = component_variants(event, grouping, config);

  match resolve_fingerprint(event) {
    FingerprintMode::Default => variants,
    FingerprintMode::Salted(salt) => variants
      .into_iter()
      .map(|v| GroupingVariant {
        salt: salt.clone(),
        ..v
      })
      .collect(),
    FingerprintMode::Custom(values) => {
      let hint = match matched_rule {
        Some(rule) => format!("fingerprint from rule: {}", rule),
        None => "custom client fingerprint".to_string(),
      };
      let mut out: Vec<GroupingVariant> = variants
        .into_iter()
        .map(|v| GroupingVariant {
          component: v.component.forced(false, "custom fingerprint takes precedence"),
          ..v
        })
        .collect();
      out.push(GroupingVariant {
        kind: VariantKind::CustomFingerprint,
        component: GroupingComponent::new(ComponentId::CustomFingerprint)
          .with_values(values)
          .hinted(hint),
        salt: Vec::new(),
      });
      out
    }
  }
}

fn component_variants(
  event: &Event,
  grouping: &GroupingConfig,
  config: &Config,
) -> Vec<GroupingVariant> {
  let stacktrace = event.grouping_stacktrace();
  if event.exception.is_none() && stacktrace.is_none() {
    return vec![GroupingVariant {
      kind: VariantKind::Default,
      component: message_component(event),
      salt: Vec::new(),
    }];
  }

  [StackVariant::App, StackVariant::System]
    .into_iter()
    .map(|variant| {
      let stack = match stacktrace {
        Some(s) => group_stacktrace(&s.frames, variant, event.platform, grouping, config),
        None => GroupingComponent::new(ComponentId::Stacktrace),
      };
      let component = match &event.exception {
        Some(exception) => exception_component(exception, stack),
        None => stack,
      };
      GroupingVariant {
        kind: variant.into(),
        component,
        salt: Vec::new(),
      }
    })
    .collect()
}

/// Type and value only count when the stack does not.
fn exception_component(exception: &Exception, stack: GroupingComponent) -> GroupingComponent {
  let stack_contributes = stack.contributes();
  let leaf = |id: ComponentId, value: Option<&str>| {
    let component = GroupingComponent::new(id);
    match value.filter(|v| !v.is_empty()) {
      Some(v) if stack_contributes => component
        .with_value(v)
        .forced(false, "stacktrace takes precedence"),
      Some(v) => component.with_value(v),
      None => component,
    }
  };
  let ty = leaf(ComponentId::Type, exception.ty.as_deref());
  let value = leaf(ComponentId::Value, exception.value.as_deref());
  GroupingComponent::new(ComponentId::Exception).with_children([stack, ty, value])
}

fn message_component(event: &Event) -> GroupingComponent {
  let component = GroupingComponent::new(ComponentId::Message);
  match event.message.as_deref().filter(|m| !m.is_empty()) {
    Some(message) => component.with_value(message),
    None => component.hinted("event has no message"),
  }
}
