//! Glob patterns and frame matchers shared by stack trace rules and
//! fingerprinting rules.

use regex::Regex;

use crate::types::Frame;

/// Compiled glob: `*` matches any run of characters, `?` a single one.
/// Matching is case-insensitive.
///
/// Path globs ([`Glob::path`]) keep `*` and `?` within one path segment;
/// `**` spans any number of segments.
#[derive(Debug, Clone)]
pub struct Glob {
  source: String,
  re: Regex,
}

impl Glob {
  pub fn new(pattern: &str) -> Result<Self, String> {
    Self::compile(pattern, false)
  }

  pub fn path(pattern: &str) -> Result<Self, String> {
    Self::compile(pattern, true)
  }

  fn compile(pattern: &str, path: bool) -> Result<Self, String> {
    let mut re = String::with_capacity(pattern.len() + 8);
    re.push_str("(?is)^");
    let mut chars = pattern.chars().peekable();
    while let Some(ch) = chars.next() {
      match ch {
        '*' if path && chars.peek() == Some(&'*') => {
          chars.next();
          if chars.peek() == Some(&'/') {
            chars.next();
            re.push_str("(?:.*/)?");
          } else {
            re.push_str(".*");
          }
        }
        '*' if path => re.push_str("[^/]*"),
        '?' if path => re.push_str("[^/]"),
        '*' => re.push_str(".*"),
        '?' => re.push('.'),
        other => re.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
      }
    }
    re.push('$');
    let re = Regex::new(&re).map_err(|e| format!("bad pattern {:?}: {}", pattern, e))?;
    Ok(Self {
      source: pattern.to_string(),
      re,
    })
  }

  pub fn is_match(&self, value: &str) -> bool {
    self.re.is_match(value)
  }
}

impl PartialEq for Glob {
  fn eq(&self, other: &Self) -> bool {
    self.source == other.source
  }
}

/// Matcher against a single frame, written `key:pattern` in rule text.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameMatcher {
  Module(Glob),
  Function(Glob),
  /// Matches `abs_path` or `filename`.
  Path(Glob),
  App(bool),
}

impl FrameMatcher {
  /// Parse a frame matcher; `Ok(None)` when `key` is not a frame key.
  pub fn parse(key: &str, value: &str) -> Result<Option<Self>, String> {
    let matcher = match key {
      "module" => Self::Module(Glob::new(value)?),
      "function" => Self::Function(Glob::new(value)?),
      "path" => Self::Path(Glob::path(value)?),
      "app" => match value {
        "yes" | "true" | "1" => Self::App(true),
        "no" | "false" | "0" => Self::App(false),
        other => return Err(format!("app expects yes|no, got {:?}", other)),
      },
      _ => return Ok(None),
    };
    Ok(Some(matcher))
  }

  pub fn matches(&self, frame: &Frame) -> bool {
    match self {
      Self::Module(g) => frame.module.as_deref().is_some_and(|m| g.is_match(m)),
      Self::Function(g) => frame.function.as_deref().is_some_and(|f| g.is_match(f)),
      Self::Path(g) => [frame.abs_path.as_deref(), frame.filename.as_deref()]
        .into_iter()
        .flatten()
        .any(|p| g.is_match(p)),
      Self::App(in_app) => frame.in_app == *in_app,
    }
  }
}

/// Byte offset of the first `pat` outside double quotes.
pub fn find_unquoted(line: &str, pat: &str) -> Option<usize> {
  let mut in_quotes = false;
  for (i, ch) in line.char_indices() {
    if ch == '"' {
      in_quotes = !in_quotes;
    } else if !in_quotes && line[i..].starts_with(pat) {
      return Some(i);
    }
  }
  None
}

/// The line up to its first unquoted `#`.
pub fn strip_comment(line: &str) -> &str {
  match find_unquoted(line, "#") {
    Some(i) => &line[..i],
    None => line,
  }
}

/// Split a rule line into whitespace separated tokens, keeping
/// double-quoted runs together (`message:"connection reset*"`).
/// An unquoted `#` ends the line.
pub fn tokenize(line: &str) -> Result<Vec<String>, String> {
  let mut tokens = Vec::new();
  let mut current = String::new();
  let mut in_quotes = false;
  for ch in line.chars() {
    match ch {
      '"' => in_quotes = !in_quotes,
      '#' if !in_quotes => break,
      c if c.is_whitespace() && !in_quotes => {
        if !current.is_empty() {
          tokens.push(std::mem::take(&mut current));
        }
      }
      c => current.push(c),
    }
  }
  if in_quotes {
    return Err("unterminated quote".into());
  }
  if !current.is_empty() {
    tokens.push(current);
  }
  Ok(tokens)
}

/// Split a comma separated value list; commas inside double quotes are
/// part of the value. Empty entries are dropped.
pub fn split_list(text: &str) -> Result<Vec<String>, String> {
  let mut values = Vec::new();
  let mut current = String::new();
  let mut in_quotes = false;
  for ch in text.chars() {
    match ch {
      '"' => in_quotes = !in_quotes,
      ',' if !in_quotes => values.push(std::mem::take(&mut current)),
      c => current.push(c),
    }
  }
  if in_quotes {
    return Err("unterminated quote".into());
  }
  values.push(current);
  Ok(
    values
      .into_iter()
      .map(|v| v.trim().to_string())
      .filter(|v| !v.is_empty())
      .collect(),
  )
}
