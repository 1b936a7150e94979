//! Reduce grouping variants to stable hash values.

use serde::Serialize;

use crate::component::{ComponentId, GroupingComponent};
use crate::strategy::{GroupingVariant, VariantKind};

/// Hash an ordered sequence of values.
///
/// Uses blake3 truncated to 32 hex chars; stable across runs and processes.
pub fn hash_from_values<'a>(values: impl IntoIterator<Item = &'a str>) -> String {
  let mut hasher = blake3::Hasher::new();
  for value in values {
    hasher.update(value.as_bytes());
    hasher.update(b"\0");
  }
  let hex = hasher.finalize().to_hex();
  hex[..32].to_string()
}

/// Output of one hash computation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CalculatedHashes {
  /// One hash per contributing variant, de-duplicated, in variant order.
  pub hashes: Vec<String>,
  /// Most specific level first. Empty for configs without hierarchical grouping.
  pub hierarchical_hashes: Vec<String>,
  /// Per-variant trees, kept for debugging. Never merged across configs.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub variants: Option<Vec<GroupingVariant>>,
}

impl CalculatedHashes {
  pub fn from_variants(
    variants: Vec<GroupingVariant>,
    hierarchical: bool,
    max_depth: usize,
  ) -> Self {
    let mut hashes: Vec<String> = Vec::new();
    for hash in variants.iter().filter_map(GroupingVariant::hash) {
      if !hashes.contains(&hash) {
        hashes.push(hash);
      }
    }
    let hierarchical_hashes = if hierarchical {
      hierarchical_hashes(&variants, max_depth)
    } else {
      Vec::new()
    };
    Self {
      hashes,
      hierarchical_hashes,
      variants: Some(variants),
    }
  }

  /// Concatenate primary and secondary hashes for matching.
  ///
  /// Variant trees are dropped: two configs judge the same fields
  /// differently and a keyed merge would silently overwrite one of them.
  pub fn merged(primary: &Self, secondary: Option<&Self>) -> Self {
    let mut hashes = primary.hashes.clone();
    let mut hierarchical_hashes = primary.hierarchical_hashes.clone();
    if let Some(secondary) = secondary {
      hashes.extend(secondary.hashes.iter().cloned());
      hierarchical_hashes.extend(secondary.hierarchical_hashes.iter().cloned());
    }
    Self {
      hashes,
      hierarchical_hashes,
      variants: None,
    }
  }

  /// Flat hashes followed by hierarchical hashes.
  pub fn all_hashes(&self) -> impl Iterator<Item = &str> {
    self
      .hashes
      .iter()
      .chain(self.hierarchical_hashes.iter())
      .map(String::as_str)
  }

  pub fn variant(&self, kind: VariantKind) -> Option<&GroupingVariant> {
    self.variants.as_ref()?.iter().find(|v| v.kind == kind)
  }
}

/// Hashes over the innermost 1..=max_depth contributing frames of the app
/// stack (else the system stack), most specific level first.
fn hierarchical_hashes(variants: &[GroupingVariant], max_depth: usize) -> Vec<String> {
  if variants.iter().any(|v| v.kind == VariantKind::CustomFingerprint) {
    return Vec::new();
  }
  let source = [VariantKind::App, VariantKind::System]
    .into_iter()
    .filter_map(|kind| variants.iter().find(|v| v.kind == kind))
    .find(|v| v.contributes());
  let Some(variant) = source else {
    return Vec::new();
  };
  let Some(stack) = variant
    .component
    .find(ComponentId::Stacktrace)
    .filter(|s| s.contributes())
  else {
    return Vec::new();
  };

  let frames: Vec<&GroupingComponent> = stack.children().filter(|f| f.contributes()).collect();
  let depth = frames.len().min(max_depth);
  (1..=depth)
    .rev()
    .map(|level| {
      let innermost = &frames[frames.len() - level..];
      hash_from_values(
        innermost
          .iter()
          .flat_map(|f| f.hash_values())
          .chain(variant.salt.iter().map(String::as_str)),
      )
    })
    .collect()
}
