//! Execution condition evaluation
//!
//! A condition reads from the execution's variable map first and the
//! flattened step outputs second. Expressions are deliberately small:
//! one comparison `<variable> <op> <literal>` or a bare variable tested
//! for truthiness. Nothing else evaluates; there is no access to the host
//! environment.

use serde_json::Value;
use std::collections::HashMap;

use concord_types::{ConditionOperator, ExecutionCondition};

/// Scope a condition evaluates against
pub struct ConditionScope<'a> {
    pub variables: &'a HashMap<String, Value>,
    pub step_outputs_flat: &'a serde_json::Map<String, Value>,
}

impl<'a> ConditionScope<'a> {
    /// Variables shadow step outputs
    pub fn resolve(&self, name: &str) -> Option<&'a Value> {
        self.variables.get(name).or_else(|| self.step_outputs_flat.get(name))
    }
}

/// Whether the condition holds in the given scope
pub fn evaluate(condition: &ExecutionCondition, scope: &ConditionScope<'_>) -> bool {
    match condition {
        ExecutionCondition::Comparison { variable, operator, value } => {
            compare(scope.resolve(variable), *operator, value)
        }
        ExecutionCondition::Expression { expression } => evaluate_expression(expression, scope),
    }
}

fn compare(actual: Option<&Value>, operator: ConditionOperator, expected: &Value) -> bool {
    use ConditionOperator::*;
    match operator {
        Eq => actual == Some(expected),
        Neq => actual != Some(expected),
        Gt => ordering(actual, expected).map(|o| o == std::cmp::Ordering::Greater).unwrap_or(false),
        Gte => ordering(actual, expected).map(|o| o != std::cmp::Ordering::Less).unwrap_or(false),
        Lt => ordering(actual, expected).map(|o| o == std::cmp::Ordering::Less).unwrap_or(false),
        Lte => ordering(actual, expected).map(|o| o != std::cmp::Ordering::Greater).unwrap_or(false),
        In => match (expected, actual) {
            (Value::Array(list), Some(actual)) => list.contains(actual),
            _ => false,
        },
        NotIn => match (expected, actual) {
            (Value::Array(list), Some(actual)) => !list.contains(actual),
            (Value::Array(_), None) => true,
            _ => false,
        },
    }
}

fn ordering(actual: Option<&Value>, expected: &Value) -> Option<std::cmp::Ordering> {
    match (actual?, expected) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.as_str().cmp(b.as_str())),
        _ => None,
    }
}

/// Parse and evaluate `<variable> <op> <literal>` or a bare variable
fn evaluate_expression(expression: &str, scope: &ConditionScope<'_>) -> bool {
    const OPERATORS: [(&str, ConditionOperator); 6] = [
        ("==", ConditionOperator::Eq),
        ("!=", ConditionOperator::Neq),
        (">=", ConditionOperator::Gte),
        ("<=", ConditionOperator::Lte),
        (">", ConditionOperator::Gt),
        ("<", ConditionOperator::Lt),
    ];

    for (token, operator) in OPERATORS {
        if let Some((lhs, rhs)) = expression.split_once(token) {
            let variable = lhs.trim();
            let Some(expected) = parse_literal(rhs.trim()) else {
                return false;
            };
            return compare(scope.resolve(variable), operator, &expected);
        }
    }

    // Bare variable: truthiness
    scope.resolve(expression.trim()).map(truthy).unwrap_or(false)
}

fn parse_literal(input: &str) -> Option<Value> {
    let unquoted = input
        .strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
        .map(|s| Value::String(s.to_string()));
    unquoted.or_else(|| serde_json::from_str(input).ok())
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(_) => true,
    }
}
