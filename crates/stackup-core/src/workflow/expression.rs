//! JEXL expression evaluator for task guards, commands, paths and checks.
//!
//! Wraps `jexl_eval::Evaluator` with pre-registered standard transforms and an
//! install-once registry of capability modules (see [`super::capability`]).
//!
//! Scripts in workflow files are marked with a `{{ ... }}` delimiter pair. A
//! bare `$VAR` is shorthand for `{{ env.VAR }}`.
//!
//! **Security note:** values are always passed as context objects, never
//! interpolated into expression strings.

use std::collections::HashSet;

use serde_json::{Value, json};
use stackup_types::script::ScriptValue;

use super::capability::ScriptCapability;

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur during expression evaluation.
#[derive(Debug, thiserror::Error)]
pub enum ExpressionError {
    #[error("expression evaluation failed: {0}")]
    EvalFailed(String),

    #[error("expression '{expression}' did not evaluate to a boolean: got {got}")]
    NotBoolean { expression: String, got: &'static str },

    #[error("expression '{expression}' did not evaluate to text: got {got}")]
    NotText { expression: String, got: &'static str },

    #[error("invalid context: {0}")]
    InvalidContext(String),
}

// ---------------------------------------------------------------------------
// Delimiters
// ---------------------------------------------------------------------------

/// True iff the trimmed string is wrapped in the `{{ }}` delimiter pair.
pub fn is_evaluatable_script_string(s: &str) -> bool {
    let trimmed = s.trim();
    trimmed.len() >= OPEN.len() + CLOSE.len() && trimmed.starts_with(OPEN) && trimmed.ends_with(CLOSE)
}

/// Rewrite a bare `$VAR` into `{{ env.VAR }}`; anything else is returned as is.
pub fn normalize_env_shorthand(s: &str) -> String {
    let trimmed = s.trim();
    match trimmed.strip_prefix('$') {
        Some(name)
            if !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') =>
        {
            format!("{OPEN} env.{name} {CLOSE}")
        }
        _ => s.to_string(),
    }
}

/// Expression body without delimiters.
fn strip_delimiters(s: &str) -> &str {
    let trimmed = s.trim();
    if is_evaluatable_script_string(trimmed) {
        trimmed[OPEN.len()..trimmed.len() - CLOSE.len()].trim()
    } else {
        trimmed
    }
}

// ---------------------------------------------------------------------------
// WorkflowEvaluator
// ---------------------------------------------------------------------------

/// JEXL evaluator with standard transforms and installed capabilities.
pub struct WorkflowEvaluator {
    evaluator: jexl_eval::Evaluator<'static>,
    installed: HashSet<&'static str>,
}

impl WorkflowEvaluator {
    /// Create a new evaluator with the standard string and boolean transforms.
    pub fn new() -> Self {
        let evaluator = jexl_eval::Evaluator::new()
            .with_transform("lower", |args: &[Value]| {
                Ok(json!(first_str(args).to_lowercase()))
            })
            .with_transform("upper", |args: &[Value]| {
                Ok(json!(first_str(args).to_uppercase()))
            })
            .with_transform("trim", |args: &[Value]| Ok(json!(first_str(args).trim())))
            .with_transform("split", |args: &[Value]| {
                let delimiter = args.get(1).and_then(|v| v.as_str()).unwrap_or(",");
                let parts: Vec<&str> = first_str(args).split(delimiter).collect();
                Ok(json!(parts))
            })
            .with_transform("not", |args: &[Value]| {
                let value = args.first().cloned().unwrap_or(Value::Null);
                Ok(json!(!ScriptValue::from(value).is_truthy()))
            })
            .with_transform("contains", |args: &[Value]| {
                let search = args.get(1).and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(first_str(args).contains(search)))
            })
            .with_transform("startsWith", |args: &[Value]| {
                let prefix = args.get(1).and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(first_str(args).starts_with(prefix)))
            })
            .with_transform("endsWith", |args: &[Value]| {
                let suffix = args.get(1).and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(first_str(args).ends_with(suffix)))
            })
            .with_transform("length", |args: &[Value]| {
                let len = match args.first() {
                    Some(Value::String(s)) => s.len(),
                    Some(Value::Array(a)) => a.len(),
                    Some(Value::Object(o)) => o.len(),
                    _ => 0,
                };
                Ok(json!(len as f64))
            });

        Self {
            evaluator,
            installed: HashSet::new(),
        }
    }

    /// Install a capability's transforms. Installing the same name twice is a no-op.
    pub fn with_capability(mut self, capability: &dyn ScriptCapability) -> Self {
        let name = capability.name();
        if !self.installed.insert(name) {
            tracing::debug!(capability = name, "capability already installed");
            return self;
        }

        for (transform, f) in capability.transforms() {
            self.evaluator = self.evaluator.with_transform(transform, f);
        }
        tracing::debug!(capability = name, "capability installed");
        self
    }

    pub fn has_capability(&self, name: &str) -> bool {
        self.installed.contains(name)
    }

    /// Evaluate a script (delimited or bare) and return the raw JSON value.
    pub fn evaluate_value(&self, script: &str, context: &Value) -> Result<Value, ExpressionError> {
        if !context.is_object() {
            return Err(ExpressionError::InvalidContext(
                "context must be a JSON object".to_string(),
            ));
        }

        let expression = strip_delimiters(script);
        if expression.is_empty() {
            return Ok(Value::Null);
        }

        self.evaluator
            .eval_in_context(expression, context)
            .map_err(|e| ExpressionError::EvalFailed(format!("{expression}: {e}")))
    }

    /// Evaluate a script into a typed [`ScriptValue`].
    pub fn evaluate(&self, script: &str, context: &Value) -> Result<ScriptValue, ExpressionError> {
        self.evaluate_value(script, context).map(ScriptValue::from)
    }
}

impl Default for WorkflowEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

fn first_str(args: &[Value]) -> &str {
    args.first().and_then(|v| v.as_str()).unwrap_or("")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::capability::{TransformFn, transform};

    fn evaluator() -> WorkflowEvaluator {
        WorkflowEvaluator::new()
    }

    #[test]
    fn test_delimiter_detection() {
        assert!(is_evaluatable_script_string("{{ 1 + 1 }}"));
        assert!(is_evaluatable_script_string("  {{env.HOME}}  "));
        assert!(!is_evaluatable_script_string("npm run build"));
        assert!(!is_evaluatable_script_string("{{ unterminated"));
        assert!(!is_evaluatable_script_string("{}"));
    }

    #[test]
    fn test_env_shorthand() {
        assert_eq!(normalize_env_shorthand("$HOME"), "{{ env.HOME }}");
        assert_eq!(normalize_env_shorthand("$PROJECT_ROOT"), "{{ env.PROJECT_ROOT }}");
        assert_eq!(normalize_env_shorthand("./src"), "./src");
        assert_eq!(normalize_env_shorthand("$HOME/src"), "$HOME/src");
        assert_eq!(normalize_env_shorthand("$"), "$");
    }

    #[test]
    fn test_evaluate_delimited_and_bare() {
        let ctx = json!({ "platform": "linux" });
        let eval = evaluator();
        assert_eq!(
            eval.evaluate("{{ platform == 'linux' }}", &ctx).unwrap(),
            ScriptValue::Bool(true)
        );
        assert_eq!(
            eval.evaluate("platform != 'windows'", &ctx).unwrap(),
            ScriptValue::Bool(true)
        );
    }

    #[test]
    fn test_evaluate_string_literal() {
        let eval = evaluator();
        assert_eq!(
            eval.evaluate("{{ 'echo hi' }}", &json!({})).unwrap(),
            ScriptValue::String("echo hi".to_string())
        );
    }

    #[test]
    fn test_nested_context_access() {
        let ctx = json!({ "env": { "APP_ENV": "dev" } });
        let eval = evaluator();
        assert_eq!(
            eval.evaluate("env.APP_ENV", &ctx).unwrap(),
            ScriptValue::String("dev".to_string())
        );
        assert_eq!(eval.evaluate("env.MISSING", &ctx).unwrap(), ScriptValue::Null);
    }

    #[test]
    fn test_standard_transforms() {
        let ctx = json!({ "name": "  Hello  ", "csv": "a,b" });
        let eval = evaluator();
        assert_eq!(eval.evaluate_value("name|trim|lower", &ctx).unwrap(), json!("hello"));
        assert_eq!(eval.evaluate_value("csv|split(',')", &ctx).unwrap(), json!(["a", "b"]));
        assert_eq!(eval.evaluate_value("csv|contains('b')", &ctx).unwrap(), json!(true));
    }

    #[test]
    fn test_invalid_context_rejected() {
        assert!(evaluator().evaluate("true", &json!("nope")).is_err());
    }

    #[test]
    fn test_empty_script_is_null() {
        assert_eq!(evaluator().evaluate("{{ }}", &json!({})).unwrap(), ScriptValue::Null);
    }

    struct Echo;

    impl ScriptCapability for Echo {
        fn name(&self) -> &'static str {
            "echo"
        }

        fn transforms(&self) -> Vec<(&'static str, TransformFn)> {
            vec![transform("echo", |args: &[Value]| {
                Ok(args.first().cloned().unwrap_or(Value::Null))
            })]
        }
    }

    #[test]
    fn test_capability_installed_once() {
        let eval = evaluator().with_capability(&Echo).with_capability(&Echo);
        assert!(eval.has_capability("echo"));
        assert!(!eval.has_capability("fs"));
        assert_eq!(eval.evaluate_value("'x'|echo", &json!({})).unwrap(), json!("x"));
    }
}
