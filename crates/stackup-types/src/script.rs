//! Typed expression results.
//!
//! The evaluator returns JSON; callers convert it to [`ScriptValue`] and then
//! apply one of the explicit conversion rules below instead of guessing.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Result of evaluating an expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ScriptValue {
    Bool(bool),
    String(String),
    Number(f64),
    /// Objects and arrays.
    Object(Value),
    Null,
}

impl ScriptValue {
    /// Guard rule: only a boolean decides; anything else is undetermined.
    pub fn as_guard(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// JavaScript-like truthiness, used for remediation outcomes.
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Bool(b) => *b,
            Self::String(s) => !s.is_empty(),
            Self::Number(n) => *n != 0.0,
            Self::Object(_) => true,
            Self::Null => false,
        }
    }

    /// Text rule: strings verbatim, scalars formatted, null and objects refused.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Self::String(s) => Some(s.clone()),
            Self::Bool(b) => Some(b.to_string()),
            Self::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => Some(format!("{}", *n as i64)),
            Self::Number(n) => Some(n.to_string()),
            Self::Object(_) | Self::Null => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::String(_) => "string",
            Self::Number(_) => "number",
            Self::Object(_) => "object",
            Self::Null => "null",
        }
    }
}

impl From<Value> for ScriptValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Bool(b) => Self::Bool(b),
            Value::String(s) => Self::String(s),
            Value::Number(n) => Self::Number(n.as_f64().unwrap_or(0.0)),
            Value::Null => Self::Null,
            other @ (Value::Array(_) | Value::Object(_)) => Self::Object(other),
        }
    }
}
