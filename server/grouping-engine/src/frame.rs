//! Frame normalizer: turn one stack frame into a `frame` component whose
//! children are the independently judged signals `module`, `filename`,
//! `context-line`, `symbol`, `function` and `lineno`.

use crate::component::{ComponentId, GroupingComponent};
use crate::config::Config;
use crate::normalize::{
  is_unhashable_function, is_unhashable_module, remove_filename_outliers, remove_function_outliers,
  remove_module_outliers,
};
use crate::types::{Frame, Platform};

/// Build the grouping component for a single frame.
///
/// `platform` is the event platform; a per-frame platform takes precedence.
pub fn normalize_frame(frame: &Frame, platform: Platform, config: &Config) -> GroupingComponent {
  let platform = frame.platform.unwrap_or(platform);
  let is_url = frame.is_url();
  let filename_value = non_empty(&frame.filename);
  let function_value = non_empty(&frame.function);

  // Safari reports builtins like forEach as "[native code]"; Chrome omits them.
  let mut native_code = false;

  let mut filename = GroupingComponent::new(ComponentId::Filename);
  match filename_value {
    Some("<anonymous>") => {
      filename = filename
        .with_value("<anonymous>")
        .forced(false, "anonymous filename discarded");
    }
    Some("[native code]") => native_code = true,
    Some(name) if is_url => {
      filename = filename
        .with_value(name)
        .forced(false, "ignored because filename is a URL");
    }
    // Embedded exception text carries dynamic values.
    Some(name) if name.starts_with("Caused by: ") => {
      filename = filename
        .with_value(name)
        .forced(false, "ignored because invalid");
    }
    Some(name) => {
      let (value, hint) = remove_filename_outliers(name, platform);
      filename = with_optional_hint(filename.with_value(value), hint);
    }
    None => {}
  }

  // A module always takes precedence over the filename, even when the
  // module itself had to be replaced by a placeholder.
  let mut module = GroupingComponent::new(ComponentId::Module);
  if let Some(name) = non_empty(&frame.module) {
    module = if is_unhashable_module(name, frame.abs_path.as_deref(), platform) {
      module
        .with_child(
          GroupingComponent::new(ComponentId::Salt)
            .with_value("<module>")
            .hinted("normalized generated module name"),
        )
        .hinted("ignored module")
    } else {
      let (value, hint) = remove_module_outliers(name, platform);
      with_optional_hint(module.with_value(value), hint)
    };
    if let Some(name) = filename_value {
      filename = GroupingComponent::new(ComponentId::Filename)
        .with_value(name)
        .forced(false, "module takes precedence");
    }
  }

  let mut context_line = GroupingComponent::new(ComponentId::ContextLine);
  if let Some(line) = frame.context_line.as_deref() {
    context_line = if line.chars().count() > config.max_context_line_len {
      context_line.hinted("discarded because line too long")
    } else if is_url && function_value.is_none() {
      context_line.hinted("discarded because from URL origin")
    } else {
      context_line.with_value(line)
    };
  }

  let (symbol, function, lineno) =
    if !context_line.contributes() && (module.contributes() || filename.contributes()) {
      secondary_signals(frame, function_value)
    } else {
      let hint = if context_line.contributes() {
        "context line takes precedence"
      } else {
        "used only if module or filename are available"
      };
      (
        discarded(ComponentId::Symbol, non_empty(&frame.symbol), hint),
        discarded(ComponentId::Function, function_value, hint),
        discarded(ComponentId::Lineno, frame.lineno.map(|l| l.to_string()).as_deref(), hint),
      )
    };

  let component = GroupingComponent::new(ComponentId::Frame).with_children([
    module,
    filename,
    context_line,
    symbol,
    function,
    lineno,
  ]);

  if native_code {
    component.forced(false, "native code indicated by filename")
  } else {
    component
  }
}

/// Symbol, else function, else line number.
fn secondary_signals(
  frame: &Frame,
  function_value: Option<&str>,
) -> (GroupingComponent, GroupingComponent, GroupingComponent) {
  let lineno_value = frame.lineno.map(|l| l.to_string());
  let mut symbol = GroupingComponent::new(ComponentId::Symbol);
  let mut function = GroupingComponent::new(ComponentId::Function);
  let mut lineno = GroupingComponent::new(ComponentId::Lineno);

  if let Some(name) = non_empty(&frame.symbol) {
    symbol = symbol.with_value(name);
    function = discarded(ComponentId::Function, function_value, "symbol takes precedence");
    lineno = discarded(ComponentId::Lineno, lineno_value.as_deref(), "symbol takes precedence");
  } else if let Some(name) = function_value {
    function = if is_unhashable_function(name) {
      function.with_child(
        GroupingComponent::new(ComponentId::Salt)
          .with_value("<function>")
          .hinted("normalized lambda function name"),
      )
    } else {
      let (value, hint) = remove_function_outliers(name);
      with_optional_hint(function.with_value(value), hint)
    };
    lineno = discarded(ComponentId::Lineno, lineno_value.as_deref(), "function takes precedence");
  } else if let Some(value) = lineno_value {
    lineno = lineno.with_value(value);
  }

  (symbol, function, lineno)
}

/// Component carrying `value` for display only.
fn discarded(id: ComponentId, value: Option<&str>, hint: &str) -> GroupingComponent {
  match value {
    Some(v) => GroupingComponent::new(id).with_value(v).forced(false, hint),
    None => GroupingComponent::new(id),
  }
}

fn with_optional_hint(component: GroupingComponent, hint: Option<String>) -> GroupingComponent {
  match hint {
    Some(h) => component.hinted(h),
    None => component,
  }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
  value.as_deref().filter(|v| !v.is_empty())
}
