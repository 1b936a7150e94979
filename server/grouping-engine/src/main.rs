//! Binary entrypoint: read JSON lines from stdin, write JSON lines to stdout.
//!
//! Each input line is an Event with an optional `project_id` (default 1).
//! Each output line reports the event's outcome: `existing`, `new`,
//! `discarded` or `error`. For `new` outcomes the harness stands in for
//! issue management: it allocates a group id and links it to the event's
//! flat hashes and root hierarchical hash.
//!
//! Logs go to stderr, filtered by `RUST_LOG` (default `info`).

use std::collections::HashMap;
use std::io::{self, BufRead, Write};
use std::sync::Arc;

use grouping_engine::engine::Collaborators;
use grouping_engine::store::InMemoryHashStore;
use grouping_engine::types::{ErrorOutput, GroupId};
use grouping_engine::{Config, Event, GroupingEngine, GroupingError, GroupingOutcome, Project};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Deserialize)]
struct InboundEvent {
  #[serde(default)]
  project_id: Option<u64>,
  #[serde(flatten)]
  event: Event,
}

#[derive(Debug, Serialize)]
struct OutcomeLine {
  event_id: String,
  outcome: &'static str,
  group_id: Option<GroupId>,
  hashes: Vec<String>,
  hierarchical_hashes: Vec<String>,
}

fn init_logging() {
  let filter = EnvFilter::builder()
    .with_default_directive(tracing::Level::INFO.into())
    .from_env_lossy();
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(io::stderr)
    .init();
}

fn main() {
  init_logging();

  let config = Config::default();
  let default_config = config.default_grouping_config;
  let store = Arc::new(InMemoryHashStore::new());
  let collaborators = Collaborators {
    store: store.clone(),
    ..Collaborators::in_memory(&config)
  };
  let engine = GroupingEngine::new(config, collaborators);

  let mut projects: HashMap<u64, Project> = HashMap::new();
  let mut next_group_id = 0u64;

  let stdin = io::stdin();
  let stdout = io::stdout();
  let mut out = io::BufWriter::new(stdout.lock());

  for line in stdin.lock().lines() {
    let line = match line {
      Ok(l) => l,
      Err(e) => {
        error!(error = %e, "read error");
        std::process::exit(1);
      }
    };

    // Skip blank lines.
    let trimmed = line.trim();
    if trimmed.is_empty() {
      continue;
    }

    // Parse inbound event.
    let inbound: InboundEvent = match serde_json::from_str(trimmed) {
      Ok(v) => v,
      Err(e) => {
        write_line(&mut out, &ErrorOutput::new(format!("json parse: {}", e)));
        continue;
      }
    };

    // Projects are created on first sight with the default config.
    let project_id = inbound.project_id.unwrap_or(1);
    let project = projects
      .entry(project_id)
      .or_insert_with(|| Project::new(project_id, default_config.as_str()));
    let mut event = inbound.event;

    // Group through engine.
    match engine.assign(project, &mut event) {
      Ok(result) => {
        let merged = result.hashes.merged;
        let (outcome, group_id) = match result.outcome {
          GroupingOutcome::Existing { group_id, .. } => ("existing", group_id),
          GroupingOutcome::New {
            root_hierarchical_hash,
          } => {
            // Stand in for issue creation: link the new group to its hashes.
            next_group_id += 1;
            let group_id = GroupId(next_group_id);
            for hash in merged.hashes.iter().chain(root_hierarchical_hash.iter()) {
              store.assign_group(project.id, hash, group_id);
            }
            debug!(%group_id, "created group");
            ("new", group_id)
          }
        };
        write_line(
          &mut out,
          &OutcomeLine {
            event_id: event.event_id,
            outcome,
            group_id: Some(group_id),
            hashes: merged.hashes,
            hierarchical_hashes: merged.hierarchical_hashes,
          },
        );
      }
      // Tombstoned: report the drop, no group.
      Err(GroupingError::Discarded { .. }) => {
        write_line(
          &mut out,
          &OutcomeLine {
            event_id: event.event_id,
            outcome: "discarded",
            group_id: None,
            hashes: Vec::new(),
            hierarchical_hashes: Vec::new(),
          },
        );
      }
      Err(e) => {
        write_line(
          &mut out,
          &ErrorOutput::new(e.to_string()).with_event_id(event.event_id),
        );
      }
    }
  }

  let _ = out.flush();
}

fn write_line(out: &mut impl Write, value: &impl Serialize) {
  let _ = serde_json::to_writer(&mut *out, value);
  let _ = writeln!(out);
}
