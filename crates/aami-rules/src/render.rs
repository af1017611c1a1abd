//! Query template rendering.
//!
//! Templates are backend queries with `{{ placeholder }}` tokens. Accepted
//! forms: `{{name}}`, `{{ name }}`, `{{ .name }}` and dotted paths into nested
//! values such as `{{ .labels.team }}`.
//!
//! Strings render verbatim, numbers and booleans through their canonical text.
//! `null`, arrays and objects cannot be spliced into a query and fail.

use std::collections::BTreeMap;

use aami_core::ParamMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use thiserror::Error;

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{(.*?)\}\}").unwrap_or_else(|_| unreachable!()));

static PATH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*\.?([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)*)\s*$")
        .unwrap_or_else(|_| unreachable!())
});

/// Template rendering failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    /// A placeholder names a key that is not in the parameters.
    #[error("missing parameter '{key}'")]
    MissingKey {
        /// The dotted path that could not be resolved.
        key: String,
    },

    /// The value cannot be spliced into a query.
    #[error("parameter '{key}' is {kind} and cannot be rendered")]
    UnsupportedValue {
        /// The dotted path.
        key: String,
        /// JSON type of the value.
        kind: &'static str,
    },

    /// The text between `{{` and `}}` is not a parameter path.
    #[error("malformed placeholder '{placeholder}'")]
    Malformed {
        /// The offending placeholder, braces included.
        placeholder: String,
    },

    /// A `{{` was never closed.
    #[error("unclosed placeholder at byte {offset}")]
    Unclosed {
        /// Byte offset of the opening braces.
        offset: usize,
    },
}

/// Renders `template` against `params`.
///
/// Rendering is pure: the same inputs always yield the same output.
///
/// # Errors
///
/// Returns a [`RenderError`] naming the first placeholder that failed.
pub fn render(template: &str, params: &ParamMap) -> Result<String, RenderError> {
    let mut out = String::with_capacity(template.len());
    let mut last = 0;

    for caps in PLACEHOLDER.captures_iter(template) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        let inner = caps.get(1).map_or("", |m| m.as_str());
        let path = PATH
            .captures(inner)
            .and_then(|c| c.get(1))
            .ok_or_else(|| RenderError::Malformed {
                placeholder: whole.as_str().to_string(),
            })?;

        out.push_str(&template[last..whole.start()]);
        out.push_str(&resolve(path.as_str(), params)?);
        last = whole.end();
    }

    let rest = &template[last..];
    if let Some(offset) = rest.find("{{") {
        return Err(RenderError::Unclosed {
            offset: last + offset,
        });
    }
    out.push_str(rest);
    Ok(out)
}

fn resolve(path: &str, params: &ParamMap) -> Result<String, RenderError> {
    let missing = || RenderError::MissingKey {
        key: path.to_string(),
    };

    let mut segments = path.split('.');
    let first = segments.next().ok_or_else(missing)?;
    let mut value = params.get(first).ok_or_else(missing)?;
    for segment in segments {
        value = value.get(segment).ok_or_else(missing)?;
    }

    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Null => Err(unsupported(path, "null")),
        Value::Array(_) => Err(unsupported(path, "an array")),
        Value::Object(_) => Err(unsupported(path, "an object")),
    }
}

fn unsupported(path: &str, kind: &'static str) -> RenderError {
    RenderError::UnsupportedValue {
        key: path.to_string(),
        kind,
    }
}

/// Merges `overlay` over `base`.
///
/// Objects present on both sides are merged recursively; any other value in
/// `overlay` replaces the one in `base`.
#[must_use]
pub fn merge_params(base: &ParamMap, overlay: &ParamMap) -> ParamMap {
    let mut merged = base.clone();
    for (key, value) in overlay {
        match (merged.get_mut(key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                merge_objects(existing, incoming);
            }
            _ => {
                merged.insert(key.clone(), value.clone());
            }
        }
    }
    merged
}

fn merge_objects(base: &mut serde_json::Map<String, Value>, overlay: &serde_json::Map<String, Value>) {
    for (key, value) in overlay {
        match (base.get_mut(key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                merge_objects(existing, incoming);
            }
            _ => {
                base.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Builds the render context for one rule.
///
/// The merged parameters are exposed at the top level. `for_duration`,
/// `labels` and `annotations` are added unless a parameter of the same name
/// already exists.
#[must_use]
pub fn build_context(
    params: ParamMap,
    for_duration: Option<&str>,
    labels: &BTreeMap<String, String>,
    annotations: &BTreeMap<String, String>,
) -> ParamMap {
    let mut context = params;
    if let Some(duration) = for_duration {
        context
            .entry("for_duration".to_string())
            .or_insert_with(|| Value::String(duration.to_string()));
    }
    context
        .entry("labels".to_string())
        .or_insert_with(|| string_map(labels));
    context
        .entry("annotations".to_string())
        .or_insert_with(|| string_map(annotations));
    context
}

fn string_map(map: &BTreeMap<String, String>) -> Value {
    Value::Object(
        map.iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect(),
    )
}
