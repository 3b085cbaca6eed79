//! Attribute condition evaluation
//!
//! Condition keys are dotted paths into the request attributes. Values are
//! matched by shape:
//! - operator objects: `$eq $ne $gt $gte $lt $lte $in $nin`, all entries
//!   must hold
//! - arrays: membership
//! - strings: anchored regex match against string attributes (a plain
//!   literal is the degenerate regex matching itself)
//! - anything else: equality
//!
//! A missing path compares as absent and fails the condition unless the
//! operator explicitly accepts absence (`$ne`, `$nin`).

use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;

/// Whether every condition holds against the attributes
///
/// `None` means an unconditional rule.
pub fn evaluate_conditions(
    conditions: Option<&HashMap<String, Value>>,
    attributes: &serde_json::Map<String, Value>,
) -> bool {
    let Some(conditions) = conditions else {
        return true;
    };

    conditions.iter().all(|(path, expected)| {
        let actual = resolve_path(attributes, path);
        match_value(expected, actual)
    })
}

/// Traverse a dotted path through nested objects
fn resolve_path<'a>(
    attributes: &'a serde_json::Map<String, Value>,
    path: &str,
) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = attributes.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

fn match_value(expected: &Value, actual: Option<&Value>) -> bool {
    match expected {
        Value::Object(ops) if ops.keys().any(|k| k.starts_with('$')) => {
            ops.iter().all(|(op, operand)| apply_operator(op, operand, actual))
        }
        Value::Array(list) => match actual {
            Some(actual) => list.contains(actual),
            None => false,
        },
        Value::String(pattern) => match actual {
            Some(Value::String(actual)) => regex_or_literal(pattern, actual),
            _ => false,
        },
        other => actual == Some(other),
    }
}

fn apply_operator(op: &str, operand: &Value, actual: Option<&Value>) -> bool {
    match op {
        "$eq" => actual == Some(operand),
        "$ne" => actual != Some(operand),
        "$gt" => compare(actual, operand).map(|o| o == std::cmp::Ordering::Greater).unwrap_or(false),
        "$gte" => compare(actual, operand).map(|o| o != std::cmp::Ordering::Less).unwrap_or(false),
        "$lt" => compare(actual, operand).map(|o| o == std::cmp::Ordering::Less).unwrap_or(false),
        "$lte" => compare(actual, operand).map(|o| o != std::cmp::Ordering::Greater).unwrap_or(false),
        "$in" => match (operand, actual) {
            (Value::Array(list), Some(actual)) => list.contains(actual),
            _ => false,
        },
        "$nin" => match (operand, actual) {
            (Value::Array(list), Some(actual)) => !list.contains(actual),
            // Absent values are trivially not in the list
            (Value::Array(_), None) => true,
            _ => false,
        },
        _ => false,
    }
}

/// Ordering between an attribute and an operand, for numbers and strings
fn compare(actual: Option<&Value>, operand: &Value) -> Option<std::cmp::Ordering> {
    match (actual?, operand) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.as_str().cmp(b.as_str())),
        _ => None,
    }
}

fn regex_or_literal(pattern: &str, actual: &str) -> bool {
    match Regex::new(&format!("^(?:{pattern})$")) {
        Ok(re) => re.is_match(actual),
        Err(_) => pattern == actual,
    }
}
