//! Condition evaluation: `(field, operator, value)` against the context
//!
//! Evaluation is total: an incomparable operator/type pair resolves to
//! `false` rather than erroring, so branching stays deterministic and
//! side-effect-free.

use std::cmp::Ordering;

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::template::resolve_path;

/// Operators available to condition steps and event filters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    Gt,
    Gte,
    Lt,
    Lte,
    IsEmpty,
    IsNotEmpty,
    In,
    NotIn,
}

/// Evaluate one condition triple against a context document
///
/// `field` is a dot-path into `context`; a missing path behaves as a null
/// value (so `is_empty` on a missing field is `true`).
pub fn evaluate_condition(
    context: &Value,
    field: &str,
    operator: ConditionOperator,
    value: Option<&Value>,
) -> bool {
    let resolved = resolve_path(context, field);
    let lhs = resolved.unwrap_or(&Value::Null);

    match operator {
        ConditionOperator::Equals => value.is_some_and(|rhs| lhs == rhs),
        ConditionOperator::NotEquals => value.is_some_and(|rhs| lhs != rhs),
        ConditionOperator::Contains => value.is_some_and(|rhs| contains(lhs, rhs)),
        ConditionOperator::NotContains => value.is_some_and(|rhs| !contains(lhs, rhs)),
        ConditionOperator::StartsWith => match (lhs.as_str(), value.and_then(Value::as_str)) {
            (Some(s), Some(prefix)) => s.starts_with(prefix),
            _ => false,
        },
        ConditionOperator::EndsWith => match (lhs.as_str(), value.and_then(Value::as_str)) {
            (Some(s), Some(suffix)) => s.ends_with(suffix),
            _ => false,
        },
        ConditionOperator::Gt => compare(lhs, value) == Some(Ordering::Greater),
        ConditionOperator::Gte => matches!(
            compare(lhs, value),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        ConditionOperator::Lt => compare(lhs, value) == Some(Ordering::Less),
        ConditionOperator::Lte => matches!(compare(lhs, value), Some(Ordering::Less | Ordering::Equal)),
        ConditionOperator::IsEmpty => is_empty(lhs),
        ConditionOperator::IsNotEmpty => !is_empty(lhs),
        ConditionOperator::In => value
            .and_then(Value::as_array)
            .is_some_and(|arr| arr.contains(lhs)),
        ConditionOperator::NotIn => value
            .and_then(Value::as_array)
            .is_some_and(|arr| !arr.contains(lhs)),
    }
}

/// Substring for strings, membership for arrays
fn contains(lhs: &Value, rhs: &Value) -> bool {
    match lhs {
        Value::String(s) => rhs.as_str().is_some_and(|needle| s.contains(needle)),
        Value::Array(arr) => arr.contains(rhs),
        _ => false,
    }
}

/// Numeric or date ordering; `None` when the pair is not comparable
fn compare(lhs: &Value, rhs: Option<&Value>) -> Option<Ordering> {
    let rhs = rhs?;
    if let (Some(a), Some(b)) = (lhs.as_f64(), rhs.as_f64()) {
        return a.partial_cmp(&b);
    }
    if let (Some(a), Some(b)) = (lhs.as_str(), rhs.as_str()) {
        let a = DateTime::parse_from_rfc3339(a).ok()?;
        let b = DateTime::parse_from_rfc3339(b).ok()?;
        return Some(a.cmp(&b));
    }
    None
}

/// Null, missing, empty string, or empty array
fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(arr) => arr.is_empty(),
        _ => false,
    }
}
