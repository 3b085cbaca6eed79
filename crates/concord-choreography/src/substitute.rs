//! Variable substitution for step inputs
//!
//! A string value of the exact form `${name}` resolves against the
//! execution's variables first, then the flattened step outputs; the
//! literal falls through unresolved. Substitution recurses through nested
//! maps and arrays.

use serde_json::Value;
use std::collections::HashMap;

/// Resolve placeholders in a step input map
pub fn substitute_inputs(
    inputs: &serde_json::Map<String, Value>,
    variables: &HashMap<String, Value>,
    step_outputs_flat: &serde_json::Map<String, Value>,
) -> serde_json::Map<String, Value> {
    inputs
        .iter()
        .map(|(k, v)| (k.clone(), substitute_value(v, variables, step_outputs_flat)))
        .collect()
}

fn substitute_value(
    value: &Value,
    variables: &HashMap<String, Value>,
    step_outputs_flat: &serde_json::Map<String, Value>,
) -> Value {
    match value {
        Value::String(s) => match placeholder_name(s) {
            Some(name) => variables
                .get(name)
                .or_else(|| step_outputs_flat.get(name))
                .cloned()
                .unwrap_or_else(|| value.clone()),
            None => value.clone(),
        },
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), substitute_value(v, variables, step_outputs_flat)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(
            items.iter().map(|v| substitute_value(v, variables, step_outputs_flat)).collect(),
        ),
        other => other.clone(),
    }
}

/// `${name}` → `name`; anything else is a literal
fn placeholder_name(s: &str) -> Option<&str> {
    s.strip_prefix("${").and_then(|rest| rest.strip_suffix('}')).filter(|name| !name.is_empty())
}
