//! Template rendering: `{{path.to.field}}` substitution
//!
//! Tokens resolve as dot-paths into the run context's JSON document. A
//! missing path substitutes an empty string and is reported as a warning,
//! never an error: a dangling reference must not abort an otherwise-valid
//! run.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

fn token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z0-9_][A-Za-z0-9_.\-]*)\s*\}\}")
            .unwrap_or_else(|e| panic!("invalid template token regex: {e}"))
    })
}

/// Resolve a dot-path (`a.b.2.c`) in a JSON document
///
/// Numeric segments index into arrays. Returns `None` when any segment is
/// missing or the traversal hits a scalar.
pub fn resolve_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for part in path.split('.') {
        match current {
            Value::Object(map) => current = map.get(part)?,
            Value::Array(arr) => {
                let index: usize = part.parse().ok()?;
                current = arr.get(index)?;
            }
            _ => return None,
        }
    }
    Some(current)
}

/// How a resolved value substitutes into a template string
fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

/// Replace every `{{path}}` token in `template` with its context value
///
/// Returns the rendered string and the list of paths that did not resolve
/// (substituted as empty strings).
pub fn render_str(template: &str, context: &Value) -> (String, Vec<String>) {
    let mut warnings = Vec::new();
    let rendered = token_re()
        .replace_all(template, |caps: &regex::Captures<'_>| {
            let path = &caps[1];
            match resolve_path(context, path) {
                Some(value) => stringify(value),
                None => {
                    warnings.push(path.to_string());
                    String::new()
                }
            }
        })
        .into_owned();
    (rendered, warnings)
}

/// Recursively render every string leaf of a JSON value
///
/// Non-string leaves pass through unchanged. Used on an action's config so
/// executors receive fully-resolved, concrete values.
pub fn render_value(value: &Value, context: &Value) -> (Value, Vec<String>) {
    let mut warnings = Vec::new();
    let rendered = render_value_inner(value, context, &mut warnings);
    (rendered, warnings)
}

fn render_value_inner(value: &Value, context: &Value, warnings: &mut Vec<String>) -> Value {
    match value {
        Value::String(s) => {
            let (rendered, mut missed) = render_str(s, context);
            warnings.append(&mut missed);
            Value::String(rendered)
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| render_value_inner(item, context, warnings))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), render_value_inner(v, context, warnings)))
                .collect(),
        ),
        other => other.clone(),
    }
}
