//! Grouping component tree.
//!
//! A component is a named node whose values are either primitive leaves or
//! nested components. Whether a node takes part in the hash is rolled up from
//! its children unless explicitly forced; every forced decision carries a
//! hint so the tree can explain why an event grouped the way it did.
//!
//! Trees are built bottom-up with consuming builders and never mutated in
//! place afterwards.

use serde::ser::{Serialize, SerializeStruct, Serializer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentId {
  Frame,
  Module,
  Filename,
  ContextLine,
  Symbol,
  Function,
  Lineno,
  Salt,
  Stacktrace,
  Exception,
  Type,
  Value,
  Message,
  CustomFingerprint,
}

impl ComponentId {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Frame => "frame",
      Self::Module => "module",
      Self::Filename => "filename",
      Self::ContextLine => "context-line",
      Self::Symbol => "symbol",
      Self::Function => "function",
      Self::Lineno => "lineno",
      Self::Salt => "salt",
      Self::Stacktrace => "stacktrace",
      Self::Exception => "exception",
      Self::Type => "type",
      Self::Value => "value",
      Self::Message => "message",
      Self::CustomFingerprint => "custom-fingerprint",
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ComponentValue {
  Leaf(String),
  Node(GroupingComponent),
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupingComponent {
  id: ComponentId,
  values: Vec<ComponentValue>,
  forced: Option<bool>,
  hint: Option<String>,
}

impl GroupingComponent {
  pub fn new(id: ComponentId) -> Self {
    Self {
      id,
      values: Vec::new(),
      forced: None,
      hint: None,
    }
  }

  pub fn with_value(mut self, value: impl Into<String>) -> Self {
    self.values.push(ComponentValue::Leaf(value.into()));
    self
  }

  pub fn with_values<I, S>(mut self, values: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self
      .values
      .extend(values.into_iter().map(|v| ComponentValue::Leaf(v.into())));
    self
  }

  pub fn with_child(mut self, child: GroupingComponent) -> Self {
    self.values.push(ComponentValue::Node(child));
    self
  }

  pub fn with_children(mut self, children: impl IntoIterator<Item = GroupingComponent>) -> Self {
    self.values.extend(children.into_iter().map(ComponentValue::Node));
    self
  }

  /// Force contribution on or off, replacing any previous hint.
  pub fn forced(mut self, contributes: bool, hint: impl Into<String>) -> Self {
    self.forced = Some(contributes);
    self.hint = Some(hint.into());
    self
  }

  /// Attach an explanation without changing contribution.
  pub fn hinted(mut self, hint: impl Into<String>) -> Self {
    self.hint = Some(hint.into());
    self
  }

  pub fn id(&self) -> ComponentId {
    self.id
  }

  pub fn hint(&self) -> Option<&str> {
    self.hint.as_deref()
  }

  pub fn values(&self) -> &[ComponentValue] {
    &self.values
  }

  pub fn is_forced(&self) -> bool {
    self.forced.is_some()
  }

  /// Explicit override if set; otherwise a node contributes when it holds a
  /// primitive value or when any nested component contributes.
  pub fn contributes(&self) -> bool {
    if let Some(forced) = self.forced {
      return forced;
    }
    self.values.iter().any(|v| match v {
      ComponentValue::Leaf(_) => true,
      ComponentValue::Node(child) => child.contributes(),
    })
  }

  pub fn children(&self) -> impl Iterator<Item = &GroupingComponent> {
    self.values.iter().filter_map(|v| match v {
      ComponentValue::Node(child) => Some(child),
      ComponentValue::Leaf(_) => None,
    })
  }

  /// First direct child with the given id.
  pub fn child(&self, id: ComponentId) -> Option<&GroupingComponent> {
    self.children().find(|c| c.id == id)
  }

  /// Depth-first search for the first descendant (or self) with the given id.
  pub fn find(&self, id: ComponentId) -> Option<&GroupingComponent> {
    if self.id == id {
      return Some(self);
    }
    self.children().find_map(|c| c.find(id))
  }

  /// Ordered leaf values of every contributing node, the hash input.
  pub fn hash_values(&self) -> Vec<&str> {
    let mut out = Vec::new();
    if self.contributes() {
      self.collect_hash_values(&mut out);
    }
    out
  }

  fn collect_hash_values<'a>(&'a self, out: &mut Vec<&'a str>) {
    for value in &self.values {
      match value {
        ComponentValue::Leaf(s) => out.push(s.as_str()),
        ComponentValue::Node(child) if child.contributes() => child.collect_hash_values(out),
        ComponentValue::Node(_) => {}
      }
    }
  }
}

impl Serialize for ComponentValue {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    match self {
      Self::Leaf(s) => serializer.serialize_str(s),
      Self::Node(c) => c.serialize(serializer),
    }
  }
}

impl Serialize for GroupingComponent {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    let mut s = serializer.serialize_struct("GroupingComponent", 4)?;
    s.serialize_field("id", self.id.as_str())?;
    s.serialize_field("contributes", &self.contributes())?;
    s.serialize_field("hint", &self.hint)?;
    s.serialize_field("values", &self.values)?;
    s.end()
  }
}
