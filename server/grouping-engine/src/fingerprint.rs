//! Fingerprint overrides: the `{{ default }}` sentinel, value templates and
//! project fingerprinting rules.
//!
//! Rule syntax, one per line (`#` comments):
//!
//! ```text
//! type:DatabaseUnavailable -> database-down
//! message:"*connection reset*" function:fetch* -> network, {{ default }}
//! ```

use crate::error::ConfigError;
use crate::matching::{find_unquoted, split_list, strip_comment, tokenize, FrameMatcher, Glob};
use crate::types::Event;

pub const DEFAULT_FINGERPRINT: &str = "{{ default }}";

pub fn default_fingerprint() -> Vec<String> {
  vec![DEFAULT_FINGERPRINT.to_string()]
}

/// Template name inside `{{ ... }}`, if `value` is a template.
fn template_name(value: &str) -> Option<&str> {
  value
    .trim()
    .strip_prefix("{{")
    .and_then(|v| v.strip_suffix("}}"))
    .map(str::trim)
}

pub fn is_default_value(value: &str) -> bool {
  template_name(value) == Some("default")
}

/// How an event's fingerprint combines with automatic grouping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FingerprintMode {
  /// Only the default sentinel: automatic grouping alone.
  Default,
  /// Default plus extra values: automatic grouping salted with the extras.
  Salted(Vec<String>),
  /// No default sentinel: the values replace automatic grouping.
  Custom(Vec<String>),
}

/// Resolve templates in the event fingerprint and classify it.
pub fn resolve_fingerprint(event: &Event) -> FingerprintMode {
  let raw = match event.fingerprint.as_deref() {
    Some(values) if !values.is_empty() => values,
    _ => return FingerprintMode::Default,
  };

  let mut has_default = false;
  let mut values = Vec::with_capacity(raw.len());
  for value in raw {
    if is_default_value(value) {
      has_default = true;
    } else {
      values.push(expand_template(value, event));
    }
  }

  match (has_default, values.is_empty()) {
    (true, true) => FingerprintMode::Default,
    (true, false) => FingerprintMode::Salted(values),
    (false, _) => FingerprintMode::Custom(values),
  }
}

fn expand_template(value: &str, event: &Event) -> String {
  let resolved = match template_name(value) {
    Some("type") | Some("error.type") => event.exception_type().unwrap_or("<no-type>"),
    Some("error.value") => event.exception_value().unwrap_or("<no-value>"),
    Some("message") => event
      .message
      .as_deref()
      .or(event.exception_value())
      .unwrap_or("<no-message>"),
    _ => value,
  };
  resolved.to_string()
}

// ---------------------------------------------------------------------------
// Project fingerprinting rules
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum RuleMatcher {
  Type(Glob),
  Message(Glob),
  Frame(FrameMatcher),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FingerprintRule {
  matchers: Vec<RuleMatcher>,
  fingerprint: Vec<String>,
  text: String,
}

impl FingerprintRule {
  /// Event-level matchers must all match; frame matchers must all match
  /// the same frame.
  pub fn matches(&self, event: &Event) -> bool {
    let mut frame_matchers = Vec::new();
    for matcher in &self.matchers {
      let ok = match matcher {
        RuleMatcher::Type(g) => event.exception_type().is_some_and(|t| g.is_match(t)),
        RuleMatcher::Message(g) => [event.message.as_deref(), event.exception_value()]
          .into_iter()
          .flatten()
          .any(|m| g.is_match(m)),
        RuleMatcher::Frame(m) => {
          frame_matchers.push(m);
          true
        }
      };
      if !ok {
        return false;
      }
    }
    frame_matchers.is_empty()
      || event
        .frames()
        .iter()
        .any(|f| frame_matchers.iter().all(|m| m.matches(f)))
  }

  pub fn fingerprint(&self) -> &[String] {
    &self.fingerprint
  }

  pub fn text(&self) -> &str {
    &self.text
  }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FingerprintingRules {
  rules: Vec<FingerprintRule>,
}

impl FingerprintingRules {
  pub fn parse(text: &str) -> Result<Self, ConfigError> {
    let mut rules = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
      let line_no = idx + 1;
      let line = strip_comment(raw).trim();
      if line.is_empty() {
        continue;
      }
      let arrow = find_unquoted(line, "->")
        .ok_or_else(|| ConfigError::fingerprint_rule(line_no, "missing '->'"))?;
      let (lhs, rhs) = (&line[..arrow], &line[arrow + 2..]);

      let mut matchers = Vec::new();
      for token in tokenize(lhs).map_err(|e| ConfigError::fingerprint_rule(line_no, e))? {
        let (key, value) = token.split_once(':').ok_or_else(|| {
          ConfigError::fingerprint_rule(line_no, format!("expected key:value, got {:?}", token))
        })?;
        let glob = |v: &str| Glob::new(v).map_err(|e| ConfigError::fingerprint_rule(line_no, e));
        let matcher = match key {
          "type" | "error.type" => RuleMatcher::Type(glob(value)?),
          "message" | "error.value" => RuleMatcher::Message(glob(value)?),
          _ => FrameMatcher::parse(key, value)
            .map_err(|e| ConfigError::fingerprint_rule(line_no, e))?
            .map(RuleMatcher::Frame)
            .ok_or_else(|| {
              ConfigError::fingerprint_rule(line_no, format!("unknown matcher {:?}", key))
            })?,
        };
        matchers.push(matcher);
      }
      if matchers.is_empty() {
        return Err(ConfigError::fingerprint_rule(line_no, "rule has no matchers"));
      }

      let fingerprint = split_list(rhs).map_err(|e| ConfigError::fingerprint_rule(line_no, e))?;
      if fingerprint.is_empty() {
        return Err(ConfigError::fingerprint_rule(line_no, "empty fingerprint"));
      }

      rules.push(FingerprintRule {
        matchers,
        fingerprint,
        text: line.to_string(),
      });
    }
    Ok(Self { rules })
  }

  pub fn is_empty(&self) -> bool {
    self.rules.is_empty()
  }

  pub fn first_match(&self, event: &Event) -> Option<&FingerprintRule> {
    self.rules.iter().find(|r| r.matches(event))
  }
}

/// Fill in the default sentinel and apply the first matching project rule.
///
/// Returns the text of the rule that replaced the fingerprint, if any.
pub fn apply_fingerprinting(event: &mut Event, rules: &FingerprintingRules) -> Option<String> {
  if event.fingerprint.as_ref().map_or(true, Vec::is_empty) {
    event.fingerprint = Some(default_fingerprint());
  }
  let rule = rules.first_match(event)?;
  event.fingerprint = Some(rule.fingerprint().to_vec());
  Some(rule.text().to_string())
}
