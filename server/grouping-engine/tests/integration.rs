//! Integration tests for the grouping engine.

use std::sync::Arc;

use chrono::{Duration, Utc};
use grouping_engine::component::ComponentId;
use grouping_engine::engine::Collaborators;
use grouping_engine::metrics::RecordingMetrics;
use grouping_engine::options::{StaticOptions, METADATA_FEATURE, METADATA_WRITES_OPTION};
use grouping_engine::store::{InMemoryHashStore, InMemoryMetadataStore};
use grouping_engine::strategy::{BuiltinRegistry, VariantKind};
use grouping_engine::types::{Frame, GroupId, Stacktrace, TombstoneId};
use grouping_engine::{
  Config, Event, GroupingConfigId, GroupingConfigRef, GroupingEngine, GroupingError,
  GroupingOutcome, Project,
};
use pretty_assertions::assert_eq;

const LEGACY: &str = "legacy:2019-03-12";
const MOBILE: &str = "mobile:2021-02-12";

struct Setup {
  engine: GroupingEngine,
  store: Arc<InMemoryHashStore>,
  metadata: Arc<InMemoryMetadataStore>,
  metrics: Arc<RecordingMetrics>,
}

fn setup(options: StaticOptions) -> Setup {
  let store = Arc::new(InMemoryHashStore::new());
  let metadata = Arc::new(InMemoryMetadataStore::new());
  let metrics = Arc::new(RecordingMetrics::new());
  let engine = GroupingEngine::new(
    Config::default(),
    Collaborators {
      registry: Arc::new(BuiltinRegistry::new(GroupingConfigId::Legacy2019)),
      options: Arc::new(options),
      store: store.clone(),
      metadata: metadata.clone(),
      metrics: metrics.clone(),
    },
  );
  Setup {
    engine,
    store,
    metadata,
    metrics,
  }
}

fn fixture_event() -> Event {
  let json = r#"{
    "event_id": "4f1c2b7e",
    "platform": "python",
    "exception": {
      "type": "ValueError",
      "value": "invalid literal for int() with base 10: 'abc'",
      "stacktrace": {
        "frames": [
          {"module": "django.core.handlers.base", "filename": "django/core/handlers/base.py", "function": "get_response", "lineno": 113},
          {"module": "shop.views", "filename": "shop/views.py", "function": "checkout", "lineno": 42, "in_app": true},
          {"module": "shop.cart", "filename": "shop/cart.py", "function": "parse_quantity", "lineno": 7, "in_app": true}
        ]
      }
    }
  }"#;
  serde_json::from_str(json).unwrap()
}

fn frame(function: &str, in_app: bool) -> Frame {
  Frame {
    module: Some("shop.jobs".into()),
    function: Some(function.into()),
    in_app,
    ..Frame::default()
  }
}

fn stack_event(frames: Vec<Frame>) -> Event {
  Event {
    event_id: "e".into(),
    stacktrace: Some(Stacktrace { frames }),
    ..Event::default()
  }
}

fn contributing_frames(event: &mut Event, kind: VariantKind) -> usize {
  let s = setup(StaticOptions::new());
  let project = Project::new(1, LEGACY);
  let out = s
    .engine
    .compute_hashes(&project, event, &GroupingConfigRef::new(LEGACY), None, None)
    .unwrap();
  let variant = out.primary.variant(kind).unwrap();
  variant
    .component
    .find(ComponentId::Stacktrace)
    .unwrap()
    .children()
    .filter(|f| f.contributes())
    .count()
}

#[test]
fn same_event_hashes_identically() {
  let s = setup(StaticOptions::new());
  let project = Project::new(1, MOBILE);
  let config = GroupingConfigRef::new(MOBILE);

  let a = s
    .engine
    .compute_hashes(&project, &mut fixture_event(), &config, None, None)
    .unwrap();
  let b = s
    .engine
    .compute_hashes(&project, &mut fixture_event(), &config, None, None)
    .unwrap();

  assert_eq!(a.primary.hashes, b.primary.hashes);
  assert_eq!(a.primary.hierarchical_hashes, b.primary.hierarchical_hashes);
  assert_eq!(a.primary.hashes.len(), 2);
  assert_eq!(a.primary.hierarchical_hashes.len(), 2);
}

#[test]
fn path_versions_do_not_split_issues() {
  let s = setup(StaticOptions::new());
  let project = Project::new(1, LEGACY);
  let event = |path: &str| {
    stack_event(vec![Frame {
      filename: Some(path.into()),
      function: Some("load".into()),
      in_app: true,
      ..Frame::default()
    }])
  };

  let hash = |mut e: Event| {
    s.engine
      .compute_hashes(&project, &mut e, &GroupingConfigRef::new(LEGACY), None, None)
      .unwrap()
      .primary
      .hashes
  };
  assert_eq!(hash(event("app/v1.2.3/lib.py")), hash(event("app/v1.2.4/lib.py")));
  assert_ne!(hash(event("app/v1.2.3/lib.py")), hash(event("app/v1.2.3/other.py")));
}

#[test]
fn recursion_collapses_to_one_frame() {
  let mut deep = stack_event(vec![frame("walk", true); 4]);
  let mut shallow = stack_event(vec![frame("walk", true); 2]);
  assert_eq!(contributing_frames(&mut deep, VariantKind::System), 1);
  assert_eq!(contributing_frames(&mut shallow, VariantKind::System), 1);

  let s = setup(StaticOptions::new());
  let project = Project::new(1, LEGACY);
  let hashes = |mut e: Event| {
    s.engine
      .compute_hashes(&project, &mut e, &GroupingConfigRef::new(LEGACY), None, None)
      .unwrap()
      .primary
      .hashes
  };
  assert_eq!(
    hashes(stack_event(vec![frame("walk", true); 4])),
    hashes(stack_event(vec![frame("walk", true); 2]))
  );
}

#[test]
fn in_app_ratio_boundary_is_exclusive() {
  let stack = |total: usize| {
    let mut frames: Vec<Frame> = (0..total).map(|i| frame(&format!("f{}", i), false)).collect();
    frames[total - 1].in_app = true;
    stack_event(frames)
  };

  let s = setup(StaticOptions::new());
  let project = Project::new(1, LEGACY);
  let app_contributes = |mut e: Event| {
    s.engine
      .compute_hashes(&project, &mut e, &GroupingConfigRef::new(LEGACY), None, None)
      .unwrap()
      .primary
      .variant(VariantKind::App)
      .map(|v| v.contributes())
  };

  assert_eq!(app_contributes(stack(10)), Some(true));
  assert_eq!(app_contributes(stack(11)), Some(false));
}

#[test]
fn split_level_blocks_general_matches() {
  let s = setup(StaticOptions::new());
  let project = Project::new(1, MOBILE);
  let mut event = stack_event(vec![frame("a", true), frame("b", true), frame("c", true)]);

  let first = s.engine.assign(&project, &mut event.clone()).unwrap();
  let hierarchical = first.hashes.merged.hierarchical_hashes.clone();
  assert_eq!(hierarchical.len(), 3);

  s.store.mark_split(project.id, &hierarchical[1]);
  s.store.assign_group(project.id, &hierarchical[2], GroupId(42));
  s.store
    .assign_group(project.id, &first.hashes.merged.hashes[0], GroupId(43));

  let second = s.engine.assign(&project, &mut event).unwrap();
  assert_eq!(
    second.outcome,
    GroupingOutcome::New {
      root_hierarchical_hash: Some(hierarchical[0].clone())
    }
  );
}

#[test]
fn unseen_levels_fall_back_to_flat_group() {
  let s = setup(StaticOptions::new());
  let project = Project::new(1, MOBILE);
  let event = stack_event(vec![frame("a", true), frame("b", true)]);

  let hashes = s
    .engine
    .compute_hashes(&project, &mut event.clone(), &GroupingConfigRef::new(MOBILE), None, None)
    .unwrap();
  s.store
    .assign_group(project.id, &hashes.primary.hashes[0], GroupId(5));

  let result = s.engine.assign(&project, &mut event.clone()).unwrap();
  assert_eq!(
    result.outcome,
    GroupingOutcome::Existing {
      group_id: GroupId(5),
      hash: hashes.primary.hashes[0].clone()
    }
  );
}

#[test]
fn tombstone_ahead_of_group_discards() {
  let s = setup(StaticOptions::new());
  let project = Project::new(1, LEGACY);
  let event = stack_event(vec![frame("lib", false), frame("handler", true)]);

  let first = s.engine.assign(&project, &mut event.clone()).unwrap();
  let flat = &first.hashes.merged.hashes;
  assert_eq!(flat.len(), 2);
  s.store.tombstone(project.id, &flat[0], TombstoneId(11));
  s.store.assign_group(project.id, &flat[1], GroupId(7));

  let err = s.engine.assign(&project, &mut event.clone()).unwrap_err();
  assert!(err.is_discarded());
  assert_eq!(err, GroupingError::Discarded { tombstone_id: TombstoneId(11) });
  assert_eq!(s.metrics.count("grouping.discarded"), 1);
}

#[test]
fn custom_fingerprint_replaces_stack_grouping() {
  let s = setup(StaticOptions::new());
  let project = Project::new(1, MOBILE);

  let mut a = fixture_event();
  a.fingerprint = Some(vec!["checkout-failure".into(), "{{ type }}".into()]);
  let mut b = stack_event(vec![frame("other", true)]);
  b.exception = a.exception.clone();
  b.exception.as_mut().unwrap().stacktrace = None;
  b.fingerprint = a.fingerprint.clone();

  let config = GroupingConfigRef::new(MOBILE);
  let ha = s.engine.compute_hashes(&project, &mut a, &config, None, None).unwrap();
  let hb = s.engine.compute_hashes(&project, &mut b, &config, None, None).unwrap();

  assert_eq!(ha.primary.hashes, hb.primary.hashes);
  assert_eq!(ha.primary.hashes.len(), 1);
  assert!(ha.primary.hierarchical_hashes.is_empty());
  let custom = ha.primary.variant(VariantKind::CustomFingerprint).unwrap();
  assert_eq!(custom.component.hash_values(), vec!["checkout-failure", "ValueError"]);
}

#[test]
fn project_fingerprinting_rules_apply() {
  let s = setup(StaticOptions::new());
  let mut project = Project::new(1, LEGACY);
  project.fingerprinting_rules = "type:ValueError module:shop.cart -> bad-quantity".into();

  let mut event = fixture_event();
  let out = s
    .engine
    .compute_hashes(&project, &mut event, &GroupingConfigRef::new(LEGACY), None, None)
    .unwrap();
  assert_eq!(event.fingerprint, Some(vec!["bad-quantity".to_string()]));
  let custom = out.primary.variant(VariantKind::CustomFingerprint).unwrap();
  assert_eq!(
    custom.component.hint(),
    Some("fingerprint from rule: type:ValueError module:shop.cart -> bad-quantity")
  );
}

#[test]
fn expired_or_broken_secondary_never_blocks_primary() {
  let s = setup(StaticOptions::new());
  let mut project = Project::new(1, LEGACY);
  project.secondary_grouping_config = Some("retired:2018-01-01".into());
  project.secondary_grouping_expiry = Some(Utc::now() + Duration::days(1));

  let result = s.engine.assign(&project, &mut fixture_event()).unwrap();
  assert!(result.hashes.secondary.is_none());
  assert_eq!(s.metrics.exceptions(), vec!["secondary".to_string()]);

  project.secondary_grouping_expiry = Some(Utc::now() - Duration::days(1));
  s.engine.assign(&project, &mut fixture_event()).unwrap();
  assert_eq!(s.metrics.exceptions().len(), 1);
}

#[test]
fn stale_event_config_uses_project_config() {
  let s = setup(StaticOptions::new());
  let project = Project::new(1, MOBILE);

  let mut stale = fixture_event();
  stale.grouping_config = Some(GroupingConfigRef::new("newstyle:2023-01-11"));
  let result = s.engine.assign(&project, &mut stale).unwrap();
  assert!(!result.hashes.primary.hierarchical_hashes.is_empty());
}

#[test]
fn metadata_rows_only_for_new_hashes() {
  let s = setup(
    StaticOptions::new()
      .with_feature(METADATA_FEATURE)
      .with_option(METADATA_WRITES_OPTION, true),
  );
  let project = Project::new(1, MOBILE);

  let first = s.engine.assign(&project, &mut fixture_event()).unwrap();
  let rows = s.store.len();
  assert_eq!(first.group_hash_ids.len(), rows);
  assert_eq!(s.metadata.len(), rows);

  s.engine.assign(&project, &mut fixture_event()).unwrap();
  assert_eq!(s.store.len(), rows);
  assert_eq!(s.metadata.len(), rows);
}

#[test]
fn with_defaults_groups_repeat_events_consistently() {
  let engine = GroupingEngine::with_defaults();
  let project = Project::new(9, engine.config().default_grouping_config.as_str());
  let a = engine.assign(&project, &mut fixture_event()).unwrap();
  let b = engine.assign(&project, &mut fixture_event()).unwrap();
  assert_eq!(a.hashes.merged, b.hashes.merged);
  assert_eq!(a.group_hash_ids, b.group_hash_ids);
}
