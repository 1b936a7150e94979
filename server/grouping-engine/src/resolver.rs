//! Decide which existing issue (if any) a set of computed hashes belongs to.
//!
//! Hierarchical hashes are scanned from the most specific level outward.
//! A SPLIT record ends the scan and also rules out the flat hashes, since
//! the event's lineage was deliberately subdivided below that level.

use std::collections::HashMap;

use serde::Serialize;
use tracing::debug;

use crate::error::GroupingError;
use crate::store::HashStore;
use crate::types::{GroupHash, ProjectId};

/// Outcome of a hierarchical resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Resolution {
  /// Record carrying the issue the event joins, if any.
  pub group_hash: Option<GroupHash>,
  /// Hash a new issue should be rooted at when nothing matched.
  pub root_hierarchical_hash: Option<String>,
}

pub fn resolve(
  store: &dyn HashStore,
  project: ProjectId,
  flat_hashes: &[String],
  hierarchical_hashes: &[String],
) -> Result<Resolution, GroupingError> {
  let records: HashMap<String, GroupHash> = store
    .get_many(project, hierarchical_hashes)?
    .into_iter()
    .map(|r| (r.hash.clone(), r))
    .collect();

  let mut root: Option<&String> = None;
  let mut candidates: Vec<GroupHash> = Vec::new();
  let mut found_split = false;

  for hash in hierarchical_hashes {
    let record = records.get(hash);
    if record.is_some_and(GroupHash::is_split) {
      found_split = true;
      break;
    }
    root = Some(hash);
    if let Some(record) = record.filter(|r| r.is_committed()) {
      candidates.push(record.clone());
      break;
    }
  }

  if root.is_none() {
    root = hierarchical_hashes.first();
    if let Some(record) = root.and_then(|h| records.get(h)) {
      candidates.push(record.clone());
    }
  }

  if !found_split {
    candidates.extend(store.get_many(project, flat_hashes)?);
  }

  debug!(
    project_id = %project,
    found_split,
    candidates = candidates.len(),
    "resolving hierarchical hashes"
  );

  Ok(Resolution {
    group_hash: first_group(candidates)?,
    root_hierarchical_hash: root.cloned(),
  })
}

/// Candidate walk over flat hash records only.
pub fn resolve_flat(
  store: &dyn HashStore,
  project: ProjectId,
  flat_hashes: &[String],
) -> Result<Option<GroupHash>, GroupingError> {
  first_group(store.get_many(project, flat_hashes)?)
}

/// First record attached to an issue. A tombstone met before any such
/// record discards the event; one met after it is ignored.
fn first_group(candidates: Vec<GroupHash>) -> Result<Option<GroupHash>, GroupingError> {
  for candidate in candidates {
    if candidate.group_id.is_some() {
      return Ok(Some(candidate));
    }
    if let Some(tombstone_id) = candidate.group_tombstone_id {
      return Err(GroupingError::Discarded { tombstone_id });
    }
  }
  Ok(None)
}
