//! Error and metrics sink. Used for observability only, never for control flow.

use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::GroupingError;

pub type Tags<'a> = &'a [(&'a str, &'a str)];

pub trait MetricsSink: Send + Sync {
  fn report_exception(&self, context: &str, err: &GroupingError);

  fn timing(&self, name: &str, elapsed: Duration, tags: Tags<'_>);

  fn increment(&self, name: &str, tags: Tags<'_>);
}

/// Emits metrics as tracing events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingMetrics;

impl MetricsSink for TracingMetrics {
  fn report_exception(&self, context: &str, err: &GroupingError) {
    warn!(context, error = %err, "grouping failure contained");
  }

  fn timing(&self, name: &str, elapsed: Duration, tags: Tags<'_>) {
    debug!(
      target: "metrics",
      metric = name,
      elapsed_us = elapsed.as_micros() as u64,
      tags = ?tags,
      "timing"
    );
  }

  fn increment(&self, name: &str, tags: Tags<'_>) {
    debug!(target: "metrics", metric = name, tags = ?tags, "increment");
  }
}

/// One recorded sink call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recorded {
  Exception { context: String, error: String },
  Timing { name: String, tags: Vec<(String, String)> },
  Increment { name: String, tags: Vec<(String, String)> },
}

/// Keeps every call in memory for assertions.
#[derive(Debug, Default)]
pub struct RecordingMetrics {
  calls: Mutex<Vec<Recorded>>,
}

impl RecordingMetrics {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn calls(&self) -> Vec<Recorded> {
    self.calls.lock().clone()
  }

  pub fn exceptions(&self) -> Vec<String> {
    self
      .calls
      .lock()
      .iter()
      .filter_map(|c| match c {
        Recorded::Exception { context, .. } => Some(context.clone()),
        _ => None,
      })
      .collect()
  }

  pub fn count(&self, name: &str) -> usize {
    self
      .calls
      .lock()
      .iter()
      .filter(|c| match c {
        Recorded::Timing { name: n, .. } | Recorded::Increment { name: n, .. } => n == name,
        Recorded::Exception { .. } => false,
      })
      .count()
  }
}

fn owned_tags(tags: Tags<'_>) -> Vec<(String, String)> {
  tags
    .iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

impl MetricsSink for RecordingMetrics {
  fn report_exception(&self, context: &str, err: &GroupingError) {
    self.calls.lock().push(Recorded::Exception {
      context: context.to_string(),
      error: err.to_string(),
    });
  }

  fn timing(&self, name: &str, _elapsed: Duration, tags: Tags<'_>) {
    self.calls.lock().push(Recorded::Timing {
      name: name.to_string(),
      tags: owned_tags(tags),
    });
  }

  fn increment(&self, name: &str, tags: Tags<'_>) {
    self.calls.lock().push(Recorded::Increment {
      name: name.to_string(),
      tags: owned_tags(tags),
    });
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::StoreError;

  #[test]
  fn recording_sink_keeps_calls_in_order() {
    let sink = RecordingMetrics::new();
    sink.timing("grouping.calculate_event_grouping", Duration::from_millis(2), &[("pass", "primary")]);
    sink.increment("grouping.discarded", &[]);
    sink.report_exception("background", &StoreError::Unavailable("down".into()).into());

    assert_eq!(sink.calls().len(), 3);
    assert_eq!(sink.count("grouping.discarded"), 1);
    assert_eq!(sink.exceptions(), vec!["background".to_string()]);
    assert_eq!(
      sink.calls()[0],
      Recorded::Timing {
        name: "grouping.calculate_event_grouping".into(),
        tags: vec![("pass".into(), "primary".into())],
      }
    );
  }
}
