//! Hash persistence seam and idempotent hash upsert.
//!
//! The real store lives outside this crate. [`HashStore::insert_if_absent`]
//! must be atomic on `(project_id, hash)` so concurrent ingesters of the
//! same hash converge on one row.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::debug;

use crate::error::{GroupingError, StoreError};
use crate::hashes::CalculatedHashes;
use crate::metrics::MetricsSink;
use crate::options::{OptionsProvider, METADATA_FEATURE, METADATA_WRITES_OPTION};
use crate::types::{
  GroupHash, GroupHashId, GroupHashMetadata, GroupHashState, GroupId, Project, ProjectId,
  TombstoneId,
};

pub trait HashStore: Send + Sync {
  /// Existing records for `hashes`, in the order the hashes were given.
  /// Missing hashes are skipped.
  fn get_many(&self, project: ProjectId, hashes: &[String]) -> Result<Vec<GroupHash>, StoreError>;

  /// Fetch or create the record. The flag is true when this call created it.
  fn insert_if_absent(&self, project: ProjectId, hash: &str) -> Result<(GroupHash, bool), StoreError>;
}

pub trait MetadataStore: Send + Sync {
  fn insert(&self, group_hash_id: GroupHashId, created_at: DateTime<Utc>) -> Result<(), StoreError>;
}

/// Make sure every computed hash has a record, flat hashes first.
///
/// Returns record ids in input order. A metadata row is written only for
/// records this call created, and only when both the project feature and
/// the global write switch are on.
pub fn ensure_hashes(
  store: &dyn HashStore,
  metadata: &dyn MetadataStore,
  options: &dyn OptionsProvider,
  metrics: &dyn MetricsSink,
  project: &Project,
  hashes: &CalculatedHashes,
) -> Result<Vec<GroupHashId>, GroupingError> {
  let write_metadata =
    options.feature_enabled(METADATA_FEATURE, project) && options.get_bool(METADATA_WRITES_OPTION);

  let mut ids = Vec::with_capacity(hashes.hashes.len() + hashes.hierarchical_hashes.len());
  for hash in hashes.all_hashes() {
    let (record, created) = store.insert_if_absent(project.id, hash)?;
    if created {
      debug!(project_id = %project.id, hash, "created group hash");
      if write_metadata {
        metadata.insert(record.id, Utc::now())?;
        metrics.increment("grouping.grouphash_metadata.created", &[]);
      }
    }
    ids.push(record.id);
  }
  Ok(ids)
}

// ---------------------------------------------------------------------------
// In-memory implementations
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct HashTable {
  next_id: u64,
  rows: HashMap<(ProjectId, String), GroupHash>,
}

impl HashTable {
  fn get_or_create(&mut self, project: ProjectId, hash: &str) -> (&mut GroupHash, bool) {
    let next_id = &mut self.next_id;
    let mut created = false;
    let row = self
      .rows
      .entry((project, hash.to_string()))
      .or_insert_with(|| {
        created = true;
        *next_id += 1;
        GroupHash {
          id: GroupHashId(*next_id),
          project_id: project,
          hash: hash.to_string(),
          group_id: None,
          group_tombstone_id: None,
          state: GroupHashState::Normal,
        }
      });
    (row, created)
  }
}

/// Process-local hash store, used by tests and the stdin harness.
#[derive(Debug, Default)]
pub struct InMemoryHashStore {
  table: Mutex<HashTable>,
}

impl InMemoryHashStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn len(&self) -> usize {
    self.table.lock().rows.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn get(&self, project: ProjectId, hash: &str) -> Option<GroupHash> {
    self
      .table
      .lock()
      .rows
      .get(&(project, hash.to_string()))
      .cloned()
  }

  /// Attach a hash to an issue, creating the record if needed.
  pub fn assign_group(&self, project: ProjectId, hash: &str, group: GroupId) {
    let mut table = self.table.lock();
    let (row, _) = table.get_or_create(project, hash);
    row.group_id = Some(group);
  }

  pub fn mark_split(&self, project: ProjectId, hash: &str) {
    let mut table = self.table.lock();
    let (row, _) = table.get_or_create(project, hash);
    row.state = GroupHashState::Split;
  }

  pub fn tombstone(&self, project: ProjectId, hash: &str, tombstone: TombstoneId) {
    let mut table = self.table.lock();
    let (row, _) = table.get_or_create(project, hash);
    row.group_tombstone_id = Some(tombstone);
  }
}

impl HashStore for InMemoryHashStore {
  fn get_many(&self, project: ProjectId, hashes: &[String]) -> Result<Vec<GroupHash>, StoreError> {
    let table = self.table.lock();
    Ok(
      hashes
        .iter()
        .filter_map(|h| table.rows.get(&(project, h.clone())).cloned())
        .collect(),
    )
  }

  fn insert_if_absent(&self, project: ProjectId, hash: &str) -> Result<(GroupHash, bool), StoreError> {
    let mut table = self.table.lock();
    let (row, created) = table.get_or_create(project, hash);
    Ok((row.clone(), created))
  }
}

#[derive(Debug, Default)]
pub struct InMemoryMetadataStore {
  rows: Mutex<Vec<GroupHashMetadata>>,
}

impl InMemoryMetadataStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn len(&self) -> usize {
    self.rows.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn rows(&self) -> Vec<GroupHashMetadata> {
    self.rows.lock().clone()
  }
}

impl MetadataStore for InMemoryMetadataStore {
  fn insert(&self, group_hash_id: GroupHashId, created_at: DateTime<Utc>) -> Result<(), StoreError> {
    self.rows.lock().push(GroupHashMetadata {
      group_hash_id,
      created_at,
    });
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;
  use std::thread;

  use super::*;
  use crate::metrics::RecordingMetrics;
  use crate::options::StaticOptions;

  fn hashes(flat: &[&str], hierarchical: &[&str]) -> CalculatedHashes {
    CalculatedHashes {
      hashes: flat.iter().map(|h| h.to_string()).collect(),
      hierarchical_hashes: hierarchical.iter().map(|h| h.to_string()).collect(),
      variants: None,
    }
  }

  fn metadata_on() -> StaticOptions {
    StaticOptions::new()
      .with_feature(METADATA_FEATURE)
      .with_option(METADATA_WRITES_OPTION, true)
  }

  #[test]
  fn ensure_is_idempotent() {
    let store = InMemoryHashStore::new();
    let metadata = InMemoryMetadataStore::new();
    let metrics = RecordingMetrics::new();
    let project = Project::new(1, "legacy:2019-03-12");
    let computed = hashes(&["aaa"], &[]);

    let first = ensure_hashes(&store, &metadata, &metadata_on(), &metrics, &project, &computed).unwrap();
    let second = ensure_hashes(&store, &metadata, &metadata_on(), &metrics, &project, &computed).unwrap();

    assert_eq!(first, second);
    assert_eq!(store.len(), 1);
    assert_eq!(metadata.len(), 1);
    assert_eq!(metadata.rows()[0].group_hash_id, first[0]);
    assert_eq!(metrics.count("grouping.grouphash_metadata.created"), 1);
  }

  #[test]
  fn ids_follow_flat_then_hierarchical_order() {
    let store = InMemoryHashStore::new();
    let metadata = InMemoryMetadataStore::new();
    let project = Project::new(1, "mobile:2021-02-12");
    store.insert_if_absent(project.id, "h0").unwrap();

    let ids = ensure_hashes(
      &store,
      &metadata,
      &StaticOptions::new(),
      &RecordingMetrics::new(),
      &project,
      &hashes(&["f0", "f1"], &["h0", "h1"]),
    )
    .unwrap();

    let expected: Vec<GroupHashId> = ["f0", "f1", "h0", "h1"]
      .iter()
      .map(|h| store.get(project.id, h).unwrap().id)
      .collect();
    assert_eq!(ids, expected);
    assert_eq!(ids[2], GroupHashId(1));
  }

  #[test]
  fn metadata_needs_feature_and_option() {
    let project = Project::new(1, "legacy:2019-03-12");
    let gated = [
      StaticOptions::new(),
      StaticOptions::new().with_feature(METADATA_FEATURE),
      StaticOptions::new().with_option(METADATA_WRITES_OPTION, true),
    ];
    for options in gated {
      let store = InMemoryHashStore::new();
      let metadata = InMemoryMetadataStore::new();
      ensure_hashes(&store, &metadata, &options, &RecordingMetrics::new(), &project, &hashes(&["a"], &[])).unwrap();
      assert_eq!(store.len(), 1);
      assert!(metadata.is_empty());
    }
  }

  #[test]
  fn concurrent_first_sight_converges_on_one_row() {
    let store = Arc::new(InMemoryHashStore::new());
    let project = ProjectId(1);

    let results: Vec<(GroupHash, bool)> = thread::scope(|scope| {
      let handles: Vec<_> = (0..8)
        .map(|_| {
          let store = Arc::clone(&store);
          scope.spawn(move || store.insert_if_absent(project, "shared").unwrap())
        })
        .collect();
      handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(store.len(), 1);
    assert_eq!(results.iter().filter(|(_, created)| *created).count(), 1);
    assert!(results.iter().all(|(row, _)| row.id == results[0].0.id));
  }

  #[test]
  fn concurrent_ensure_writes_metadata_once() {
    let store = Arc::new(InMemoryHashStore::new());
    let metadata = Arc::new(InMemoryMetadataStore::new());
    let metrics = RecordingMetrics::new();
    let options = metadata_on();
    let project = Project::new(1, "legacy:2019-03-12");
    let computed = hashes(&["aaa"], &["h0"]);

    let ids: Vec<Vec<GroupHashId>> = thread::scope(|scope| {
      let handles: Vec<_> = (0..8)
        .map(|_| {
          scope.spawn(|| {
            ensure_hashes(
              store.as_ref(),
              metadata.as_ref(),
              &options,
              &metrics,
              &project,
              &computed,
            )
            .unwrap()
          })
        })
        .collect();
      handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(store.len(), 2);
    assert!(ids.iter().all(|i| i == &ids[0]));
    assert_eq!(metadata.len(), 2);
    assert_eq!(metrics.count("grouping.grouphash_metadata.created"), 2);
  }

  #[test]
  fn records_are_scoped_per_project() {
    let store = InMemoryHashStore::new();
    let (_, a) = store.insert_if_absent(ProjectId(1), "same").unwrap();
    let (_, b) = store.insert_if_absent(ProjectId(2), "same").unwrap();
    assert!(a && b);
    assert_eq!(store.len(), 2);
  }

  #[test]
  fn admin_helpers_update_records() {
    let store = InMemoryHashStore::new();
    let project = ProjectId(3);
    store.assign_group(project, "x", GroupId(7));
    store.mark_split(project, "y");
    store.tombstone(project, "z", TombstoneId(4));

    let rows = store
      .get_many(project, &["z".into(), "missing".into(), "x".into(), "y".into()])
      .unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0].group_tombstone_id, Some(TombstoneId(4)));
    assert_eq!(rows[1].group_id, Some(GroupId(7)));
    assert!(rows[2].is_split());
  }
}
