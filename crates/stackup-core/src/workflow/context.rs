//! Execution context shared by every evaluation in a run.
//!
//! Holds the evaluator, the workflow variable store (plus the exported
//! environment overlay handed to spawned commands) and the working directory.
//! The "current task" stack is task-local: each run (startup, a scheduler
//! firing, a remediation) sees only the frames it entered itself, and the
//! innermost one is exposed to expressions as `task`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::{Map, Value, json};
use stackup_types::script::ScriptValue;
use uuid::Uuid;

use super::capability::{
    AppCapability, DevCapability, EnvCapability, FsCapability, ScriptCapability, VarsCapability,
};
use super::expression::{ExpressionError, WorkflowEvaluator};

// ---------------------------------------------------------------------------
// VariableStore
// ---------------------------------------------------------------------------

/// Workflow variables and the environment overlay for spawned commands.
///
/// The process environment is never mutated; exported values live here.
#[derive(Debug, Default)]
pub struct VariableStore {
    values: DashMap<String, Value>,
    exported: DashMap<String, String>,
}

impl VariableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.values.get(name).map(|v| v.value().clone())
    }

    pub fn set(&self, name: &str, value: Value) {
        self.values.insert(name.to_string(), value);
    }

    /// Add a value to the environment overlay.
    pub fn set_exported(&self, name: &str, value: impl Into<String>) {
        self.exported.insert(name.to_string(), value.into());
    }

    /// Overlay first, then the process environment.
    pub fn env_value(&self, name: &str) -> Option<String> {
        self.exported
            .get(name)
            .map(|v| v.value().clone())
            .or_else(|| std::env::var(name).ok())
    }

    /// Snapshot of the environment overlay, sorted for stable output.
    pub fn exported_env(&self) -> BTreeMap<String, String> {
        self.exported
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    fn values_json(&self) -> Value {
        let map: Map<String, Value> = self
            .values
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        Value::Object(map)
    }

    fn env_json(&self) -> Value {
        let mut map: Map<String, Value> = std::env::vars()
            .map(|(k, v)| (k, Value::String(v)))
            .collect();
        for entry in self.exported.iter() {
            map.insert(entry.key().clone(), Value::String(entry.value().clone()));
        }
        Value::Object(map)
    }
}

// ---------------------------------------------------------------------------
// Current task stack
// ---------------------------------------------------------------------------

/// Identity of a task as seen by expressions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFrame {
    pub id: Option<String>,
    pub name: String,
    pub uuid: Uuid,
}

tokio::task_local! {
    static CURRENT_TASKS: Vec<TaskFrame>;
}

/// Run `future` with `frame` as the current task. Frames nest; the enclosing
/// frame is current again once `future` completes.
pub async fn with_current_task<F: Future>(frame: TaskFrame, future: F) -> F::Output {
    let mut frames = CURRENT_TASKS.try_with(Clone::clone).unwrap_or_default();
    frames.push(frame);
    CURRENT_TASKS.scope(frames, future).await
}

/// Innermost task entered by the running future, if any.
pub fn current_task() -> Option<TaskFrame> {
    CURRENT_TASKS
        .try_with(|frames| frames.last().cloned())
        .ok()
        .flatten()
}

// ---------------------------------------------------------------------------
// ExecutionContext
// ---------------------------------------------------------------------------

/// Evaluator plus everything an expression can observe.
pub struct ExecutionContext {
    evaluator: WorkflowEvaluator,
    variables: Arc<VariableStore>,
    working_dir: PathBuf,
    app_version: String,
}

impl ExecutionContext {
    /// Build a context with the built-in capabilities installed.
    ///
    /// `extra` capabilities (e.g. notifications from infra) are installed after
    /// the built-ins; duplicates by name are ignored.
    pub fn new(
        working_dir: impl Into<PathBuf>,
        app_version: impl Into<String>,
        extra: &[&dyn ScriptCapability],
    ) -> Self {
        let working_dir = working_dir.into();
        let app_version = app_version.into();
        let variables = Arc::new(VariableStore::new());

        let mut evaluator = WorkflowEvaluator::new()
            .with_capability(&FsCapability::new(working_dir.clone()))
            .with_capability(&EnvCapability::new(variables.clone()))
            .with_capability(&DevCapability)
            .with_capability(&VarsCapability::new(variables.clone()))
            .with_capability(&AppCapability::new(app_version.clone()));
        for capability in extra {
            evaluator = evaluator.with_capability(*capability);
        }

        Self {
            evaluator,
            variables,
            working_dir,
            app_version,
        }
    }

    pub fn evaluator(&self) -> &WorkflowEvaluator {
        &self.evaluator
    }

    pub fn variables(&self) -> &Arc<VariableStore> {
        &self.variables
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Build the JSON object expressions evaluate against.
    ///
    /// Shape:
    /// ```json
    /// {
    ///   "env": { ... }, "vars": { ... },
    ///   "platform": "linux", "arch": "x86_64", "cwd": "/path",
    ///   "app": { "version": "0.1.0" },
    ///   "task": { "id": "...", "name": "...", "uuid": "..." } | null,
    ///   "tasks": { "<id>": { ... } }
    /// }
    /// ```
    pub fn expression_context(&self, tasks: Value) -> Value {
        let task = current_task()
            .map(|f| json!({ "id": f.id, "name": f.name, "uuid": f.uuid.to_string() }))
            .unwrap_or(Value::Null);

        json!({
            "env": self.variables.env_json(),
            "vars": self.variables.values_json(),
            "platform": current_platform(),
            "arch": std::env::consts::ARCH,
            "cwd": self.working_dir.display().to_string(),
            "app": { "version": self.app_version },
            "task": task,
            "tasks": tasks,
        })
    }

    pub fn evaluate(&self, script: &str, tasks: Value) -> Result<ScriptValue, ExpressionError> {
        self.evaluate_value(script, tasks).map(ScriptValue::from)
    }

    pub fn evaluate_value(&self, script: &str, tasks: Value) -> Result<Value, ExpressionError> {
        self.evaluator
            .evaluate_value(script, &self.expression_context(tasks))
    }
}

/// Host OS name as used in `platforms` lists (`darwin` rather than `macos`).
pub fn current_platform() -> &'static str {
    match std::env::consts::OS {
        "macos" => "darwin",
        other => other,
    }
}

/// Case-insensitive platform match; `darwin` and `macos` are aliases.
pub fn platform_matches(wanted: &str, host: &str) -> bool {
    let normalize = |s: &str| match s.trim().to_lowercase().as_str() {
        "macos" | "osx" | "mac" => "darwin".to_string(),
        other => other.to_string(),
    };
    normalize(wanted) == normalize(host)
}
