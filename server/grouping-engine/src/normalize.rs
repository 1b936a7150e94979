//! Normalization rules: strip volatile outliers from filenames, modules and
//! function names so that builds, deploys and code generators do not split
//! otherwise identical issues.
//!
//! Every rewrite returns the new value plus a hint when something changed.

use std::sync::LazyLock;

use regex::Regex;

use crate::types::Platform;

// ---------------------------------------------------------------------------
// Compiled patterns
// ---------------------------------------------------------------------------

static VERSION_SEGMENT_RE: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r"(?i)^(?:v?\d+(?:\.\d+)*|[a-f0-9]{7,8}|[a-f0-9]{32}|[a-f0-9]{40})$").unwrap()
});

static JAVA_REFLECT_RE: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"(sun\.reflect\.GeneratedMethodAccessor)\d+").unwrap());

static JAVA_CGLIB_RE: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"(\$\$[\w_]+?CGLIB\$\$)[a-fA-F0-9]+(_[0-9]+)?").unwrap());

static JAVASSIST_RE: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"(\$\$_javassist)(?:_seam)?(?:_[0-9]+)?").unwrap());

static CLOJURE_FN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\$fn__)\d+").unwrap());

static RUBY_ANON_FUNC_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"_\d{2,}").unwrap());

const URL_SCHEMES: [&str; 4] = ["http:", "https:", "applewebdata:", "blob:"];

const REFLECTION_ACCESSORS: [&str; 2] = [
  "sun.reflect.GeneratedMethodAccessor",
  "jdk.internal.reflect.GeneratedMethodAccessor",
];

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

/// Path was served from a URL rather than a source file.
pub fn has_url_origin(path: &str) -> bool {
  path.starts_with("file:") || URL_SCHEMES.iter().any(|s| path.starts_with(s))
}

/// Strip javassist markers and version-like directory segments.
pub fn remove_filename_outliers(filename: &str, platform: Platform) -> (String, Option<String>) {
  // Debug-info paths on cocoa carry build-machine prefixes; only the basename is stable.
  if platform == Platform::Cocoa {
    let base = filename.rsplit('/').next().unwrap_or(filename);
    let hint = (base != filename).then(|| "stripped to basename".to_string());
    return (base.to_string(), hint);
  }

  let mut removed = Vec::new();
  let mut out = filename.to_string();

  if platform == Platform::Java {
    let stripped = JAVASSIST_RE.replace_all(&out, "${1}<auto>").into_owned();
    if stripped != out {
      removed.push("javassist parts");
      out = stripped;
    }
  }

  let versionless = strip_version_segments(&out);
  if versionless != out {
    removed.push("version");
    out = versionless;
  }

  let hint = (!removed.is_empty()).then(|| format!("removed {}", removed.join(" and ")));
  (out, hint)
}

/// Replace every directory segment that looks like a version or a commit
/// hash with `<version>`. The final segment (the file itself) is kept.
fn strip_version_segments(path: &str) -> String {
  let segments: Vec<&str> = path.split('/').collect();
  let last = segments.len() - 1;
  segments
    .iter()
    .enumerate()
    .map(|(i, &seg)| {
      if i < last && VERSION_SEGMENT_RE.is_match(seg) {
        "<version>"
      } else {
        seg
      }
    })
    .collect::<Vec<_>>()
    .join("/")
}

/// Collapse generated Java class markers to stable placeholders.
pub fn remove_module_outliers(module: &str, platform: Platform) -> (String, Option<String>) {
  if platform != Platform::Java {
    return (module.to_string(), None);
  }

  if let Some(prefix) = REFLECTION_ACCESSORS.iter().find(|p| module.starts_with(*p)) {
    return (prefix.to_string(), Some("removed reflection marker".into()));
  }

  let mut out = JAVA_REFLECT_RE.replace_all(module, "${1}<auto>").into_owned();
  out = JAVA_CGLIB_RE.replace_all(&out, "${1}<auto>").into_owned();
  out = JAVASSIST_RE.replace_all(&out, "${1}<auto>").into_owned();
  out = CLOJURE_FN_RE.replace_all(&out, "${1}<auto>").into_owned();

  if out != module {
    (out, Some("removed codegen marker".into()))
  } else {
    (out, None)
  }
}

/// Module that should be replaced wholesale by a `<module>` placeholder.
///
/// Browser modules are often just a copy of part of the URL, and Java
/// lambda classes carry a per-JVM counter.
pub fn is_unhashable_module(module: &str, abs_path: Option<&str>, platform: Platform) -> bool {
  match platform {
    Platform::Javascript => {
      module.contains('/') && abs_path.is_some_and(|p| p.ends_with(module))
    }
    Platform::Java => module.contains("$$Lambda$"),
    _ => false,
  }
}

/// Java lambdas and PHP anonymous callables have no stable name.
pub fn is_unhashable_function(function: &str) -> bool {
  function.starts_with("lambda$") || function.starts_with("[Anonymous")
}

/// Collapse Ruby block names and numbered anonymous functions.
pub fn remove_function_outliers(function: &str) -> (String, Option<String>) {
  if function.starts_with("block ") {
    return ("block".into(), Some("ruby block".into()));
  }
  let out = RUBY_ANON_FUNC_RE.replace_all(function, "_<anon>").into_owned();
  if out != function {
    (out, Some("trimmed integer suffix".into()))
  } else {
    (out, None)
  }
}
