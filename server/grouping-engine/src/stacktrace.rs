//! Stack grouping strategy: roll per-frame components into one `stacktrace`
//! component per variant, collapsing recursion and discarding stacks whose
//! in-app signal is too weak to trust.

use crate::component::{ComponentId, GroupingComponent};
use crate::config::Config;
use crate::frame::normalize_frame;
use crate::strategy::GroupingConfig;
use crate::types::{Event, Frame, Platform};

/// Lens over a stack: every frame, or only the application's own frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackVariant {
  App,
  System,
}

/// Build the `stacktrace` component for one variant.
pub fn group_stacktrace(
  frames: &[Frame],
  variant: StackVariant,
  platform: Platform,
  grouping: &GroupingConfig,
  config: &Config,
) -> GroupingComponent {
  let app = variant == StackVariant::App;
  let mut stack_override: Option<String> = None;
  let mut all_frames_in_app = false;

  // Browsers often throw from vendor code with a single anonymous URL frame.
  let single_url_frame = matches!(
    frames,
    [only] if only.function.as_deref().map_or(true, str::is_empty) && only.is_url()
  );

  if single_url_frame {
    stack_override = Some("ignored single frame stack".into());
  } else if app {
    let total = frames.len();
    let in_app = frames.iter().filter(|f| f.in_app).count();
    if in_app == 0 {
      all_frames_in_app = true;
    } else if (in_app as f64) / (total as f64) < config.min_in_app_ratio {
      stack_override = Some(format!(
        "less than {:.0}% of frames are in-app",
        config.min_in_app_ratio * 100.0
      ));
    }
  }

  let mut children = Vec::with_capacity(frames.len());
  let mut prev: Option<&Frame> = None;
  for frame in frames {
    let mut component = normalize_frame(frame, platform, config);
    let foreign = app && !frame.in_app;

    if foreign && !all_frames_in_app {
      component = component.forced(false, "non app frame");
    } else if prev.is_some_and(|p| frame.is_recursion_of(p)) {
      component = component.forced(false, "ignored due to recursion");
    } else if foreign && !component.is_forced() {
      component = component.hinted("frame considered in-app because no frame is in-app");
    }

    if component.contributes() {
      if let Some((false, rule)) = grouping.enhancements.group_override(frame) {
        component = component.forced(
          false,
          format!("marked out of grouping by stack trace rule ({})", rule.text()),
        );
      }
    }

    children.push(component);
    prev = Some(frame);
  }

  let stack = GroupingComponent::new(ComponentId::Stacktrace).with_children(children);
  match stack_override {
    Some(hint) => stack.forced(false, hint),
    None => stack,
  }
}

/// Apply the config's in-app rules to every stacktrace of the event.
///
/// This rewrites the event; passes that must not affect the primary event
/// run on a copy.
pub fn normalize_stacktraces_for_grouping(event: &mut Event, grouping: &GroupingConfig) {
  if grouping.enhancements.is_empty() {
    return;
  }
  for stacktrace in event.stacktraces_mut() {
    grouping.enhancements.apply_in_app(&mut stacktrace.frames);
  }
}
