//! Stack trace rules carried by a grouping config.
//!
//! One rule per line: one or more frame matchers followed by one or more
//! actions. `#` starts a comment.
//!
//! ```text
//! module:com.example.* +app
//! path:**/node_modules/** -app
//! function:panic_handler* -group
//! ```
//!
//! In-app actions rewrite the event's frames before grouping. Group actions
//! are consulted by the stack strategy. For both, the last matching rule wins.

use crate::error::ConfigError;
use crate::matching::{strip_comment, tokenize, FrameMatcher};
use crate::types::Frame;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnhancementAction {
  InApp(bool),
  Group(bool),
}

impl EnhancementAction {
  fn parse(token: &str) -> Option<Self> {
    match token {
      "+app" => Some(Self::InApp(true)),
      "-app" => Some(Self::InApp(false)),
      "+group" => Some(Self::Group(true)),
      "-group" => Some(Self::Group(false)),
      _ => None,
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnhancementRule {
  matchers: Vec<FrameMatcher>,
  actions: Vec<EnhancementAction>,
  text: String,
}

impl EnhancementRule {
  pub fn matches(&self, frame: &Frame) -> bool {
    self.matchers.iter().all(|m| m.matches(frame))
  }

  pub fn text(&self) -> &str {
    &self.text
  }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Enhancements {
  rules: Vec<EnhancementRule>,
}

impl Enhancements {
  pub fn parse(text: &str) -> Result<Self, ConfigError> {
    let mut rules = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
      let line_no = idx + 1;
      let line = strip_comment(raw).trim();
      if line.is_empty() {
        continue;
      }
      let tokens = tokenize(line).map_err(|e| ConfigError::enhancements(line_no, e))?;

      let mut matchers = Vec::new();
      let mut actions = Vec::new();
      for token in &tokens {
        if let Some(action) = EnhancementAction::parse(token) {
          actions.push(action);
          continue;
        }
        if !actions.is_empty() {
          return Err(ConfigError::enhancements(
            line_no,
            format!("matcher {:?} after actions", token),
          ));
        }
        let (key, value) = token
          .split_once(':')
          .ok_or_else(|| ConfigError::enhancements(line_no, format!("unknown token {:?}", token)))?;
        let matcher = FrameMatcher::parse(key, value)
          .map_err(|e| ConfigError::enhancements(line_no, e))?
          .ok_or_else(|| ConfigError::enhancements(line_no, format!("unknown matcher {:?}", key)))?;
        matchers.push(matcher);
      }

      if matchers.is_empty() {
        return Err(ConfigError::enhancements(line_no, "rule has no matchers"));
      }
      if actions.is_empty() {
        return Err(ConfigError::enhancements(line_no, "rule has no actions"));
      }
      rules.push(EnhancementRule {
        matchers,
        actions,
        text: line.to_string(),
      });
    }
    Ok(Self { rules })
  }

  pub fn is_empty(&self) -> bool {
    self.rules.is_empty()
  }

  /// Rewrite `in_app` on every frame a rule decides for.
  pub fn apply_in_app(&self, frames: &mut [Frame]) {
    for frame in frames {
      if let Some((in_app, _)) = self.last_action(frame, |a| match a {
        EnhancementAction::InApp(v) => Some(v),
        EnhancementAction::Group(_) => None,
      }) {
        frame.in_app = in_app;
      }
    }
  }

  /// Group decision for a frame and the rule that made it.
  pub fn group_override(&self, frame: &Frame) -> Option<(bool, &EnhancementRule)> {
    self.last_action(frame, |a| match a {
      EnhancementAction::Group(v) => Some(v),
      EnhancementAction::InApp(_) => None,
    })
  }

  fn last_action(
    &self,
    frame: &Frame,
    pick: impl Fn(EnhancementAction) -> Option<bool>,
  ) -> Option<(bool, &EnhancementRule)> {
    self
      .rules
      .iter()
      .rev()
      .filter(|rule| rule.matches(frame))
      .find_map(|rule| {
        rule
          .actions
          .iter()
          .rev()
          .find_map(|a| pick(*a))
          .map(|v| (v, rule))
      })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn frame(module: &str, in_app: bool) -> Frame {
    Frame {
      module: Some(module.into()),
      function: Some("run".into()),
      in_app,
      ..Frame::default()
    }
  }

  #[test]
  fn parses_rules_and_comments() {
    let e = Enhancements::parse(
      "# vendored code\nmodule:vendor.* -app -group\n\n  function:main +app # entry\n",
    )
    .unwrap();
    assert_eq!(e.rules.len(), 2);
    assert_eq!(e.rules[0].text(), "module:vendor.* -app -group");
  }

  #[test]
  fn hash_inside_quotes_survives_comment_stripping() {
    let e = Enhancements::parse("function:\"handle#*\" -group # generated\nmodule:app.* +app").unwrap();
    assert_eq!(e.rules.len(), 2);
    assert_eq!(e.rules[0].text(), "function:\"handle#*\" -group");

    let mut generated = frame("lib.gen", true);
    generated.function = Some("handle#3".into());
    let (group, _) = e.group_override(&generated).unwrap();
    assert!(!group);
  }

  #[test]
  fn rejects_malformed_rules() {
    let err = Enhancements::parse("module:foo\n").unwrap_err();
    assert_eq!(err, ConfigError::enhancements(1, "rule has no actions"));

    let err = Enhancements::parse("module:a +app\n+app\n").unwrap_err();
    assert_eq!(err, ConfigError::enhancements(2, "rule has no matchers"));

    assert!(Enhancements::parse("family:native -app").is_err());
    assert!(Enhancements::parse("module:x +app function:y").is_err());
    assert!(Enhancements::parse("module:x +frobnicate").is_err());
  }

  #[test]
  fn last_matching_rule_wins_for_in_app() {
    let e = Enhancements::parse("module:com.* +app\nmodule:com.vendor.* -app").unwrap();
    let mut frames = vec![frame("com.example.Foo", false), frame("com.vendor.Bar", true)];
    e.apply_in_app(&mut frames);
    assert!(frames[0].in_app);
    assert!(!frames[1].in_app);
  }

  #[test]
  fn group_override_reports_rule() {
    let e = Enhancements::parse("module:* -group\nmodule:app.* +group").unwrap();
    let (group, rule) = e.group_override(&frame("lib.x", true)).unwrap();
    assert!(!group);
    assert_eq!(rule.text(), "module:* -group");

    let (group, _) = e.group_override(&frame("app.views", true)).unwrap();
    assert!(group);
  }

  #[test]
  fn in_app_only_rules_do_not_decide_grouping() {
    let e = Enhancements::parse("module:* -group\nmodule:* +app").unwrap();
    let (group, _) = e.group_override(&frame("x", false)).unwrap();
    assert!(!group);
    assert!(Enhancements::default().group_override(&frame("x", false)).is_none());
  }
}
