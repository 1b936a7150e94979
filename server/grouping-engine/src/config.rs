//! Engine configuration with sane defaults.

use crate::strategy::GroupingConfigId;

/// Tunable thresholds for grouping.
#[derive(Debug, Clone)]
pub struct Config {
  /// Context lines longer than this are dropped from grouping (minified code).
  pub max_context_line_len: usize,
  /// In-app stacks with a smaller share of in-app frames do not contribute.
  pub min_in_app_ratio: f64,
  /// Deepest hierarchical level emitted for hierarchical configs.
  pub hierarchical_max_depth: usize,
  /// Config used for projects without a valid one of their own.
  pub default_grouping_config: GroupingConfigId,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      max_context_line_len: 120,
      min_in_app_ratio: 0.10,
      hierarchical_max_depth: 5,
      default_grouping_config: GroupingConfigId::Legacy2019,
    }
  }
}
