//! The workflow aggregate.
//!
//! A [`Workflow`] is built once from the parsed definition and then only grows:
//! include workers append tasks and prepend preconditions through
//! [`Workflow::merge_fragment`], and task runs bump run counters and register
//! detached processes. It is shared as `Arc<Workflow>` between the driver,
//! include workers and scheduler callbacks.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::{Map, Value, json};
use stackup_types::script::ScriptValue;
use stackup_types::workflow::{
    IncludeDefinition, ScheduledTaskDefinition, Settings, TaskReference, VariableDefinition,
    WorkflowDefinition,
};
use tokio::sync::RwLock;

use super::context::ExecutionContext;
use super::definition::WorkflowError;
use super::expression::{ExpressionError, is_evaluatable_script_string, normalize_env_shorthand};
use super::precondition::Precondition;
use super::task::{RunMode, Task, TaskOutcome};
use crate::process::{ProcessRegistry, ProcessRunner};
use crate::report::StatusReporter;

/// Called right after a detached task's process starts, with its pid.
pub type StartHook = Arc<dyn Fn(&Task, Option<u32>) + Send + Sync>;

/// What a fragment merge changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeSummary {
    pub tasks_added: usize,
    pub preconditions_added: usize,
    /// Task ids dropped because the workflow already declares them.
    pub duplicate_ids: Vec<String>,
}

pub struct Workflow {
    pub name: String,
    settings: Settings,
    includes: Vec<IncludeDefinition>,
    vars: Vec<VariableDefinition>,
    startup: Vec<TaskReference>,
    shutdown: Vec<TaskReference>,
    servers: Vec<TaskReference>,
    scheduler: Vec<ScheduledTaskDefinition>,
    tasks: RwLock<Vec<Arc<Task>>>,
    preconditions: RwLock<Vec<Arc<Precondition>>>,
    context: ExecutionContext,
    runner: Arc<dyn ProcessRunner>,
    reporter: Arc<dyn StatusReporter>,
    processes: ProcessRegistry,
    start_hook: Option<StartHook>,
}

impl Workflow {
    pub fn new(
        definition: WorkflowDefinition,
        context: ExecutionContext,
        runner: Arc<dyn ProcessRunner>,
        reporter: Arc<dyn StatusReporter>,
    ) -> Self {
        let defaults = definition.settings.defaults.tasks.clone();
        let tasks = definition
            .tasks
            .into_iter()
            .map(|def| Arc::new(Task::from_definition(def, &defaults, false)))
            .collect();
        let preconditions = definition
            .preconditions
            .into_iter()
            .map(|def| Arc::new(Precondition::from_definition(def)))
            .collect();

        Self {
            name: definition.name,
            settings: definition.settings,
            includes: definition.includes,
            vars: definition.vars,
            startup: definition.startup,
            shutdown: definition.shutdown,
            servers: definition.servers,
            scheduler: definition.scheduler,
            tasks: RwLock::new(tasks),
            preconditions: RwLock::new(preconditions),
            context,
            runner,
            reporter,
            processes: ProcessRegistry::new(),
            start_hook: None,
        }
    }

    pub fn with_start_hook(mut self, hook: StartHook) -> Self {
        self.start_hook = Some(hook);
        self
    }

    // -- accessors ----------------------------------------------------------

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn includes(&self) -> &[IncludeDefinition] {
        &self.includes
    }

    pub fn startup(&self) -> &[TaskReference] {
        &self.startup
    }

    pub fn shutdown(&self) -> &[TaskReference] {
        &self.shutdown
    }

    pub fn servers(&self) -> &[TaskReference] {
        &self.servers
    }

    pub fn scheduled(&self) -> &[ScheduledTaskDefinition] {
        &self.scheduler
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    pub fn runner(&self) -> &dyn ProcessRunner {
        self.runner.as_ref()
    }

    pub fn reporter(&self) -> &dyn StatusReporter {
        self.reporter.as_ref()
    }

    pub fn processes(&self) -> &ProcessRegistry {
        &self.processes
    }

    pub fn start_hook(&self) -> Option<&StartHook> {
        self.start_hook.as_ref()
    }

    /// Snapshot of the task list in declaration (then merge) order.
    pub async fn tasks(&self) -> Vec<Arc<Task>> {
        self.tasks.read().await.clone()
    }

    /// Snapshot of the precondition list in run order.
    pub async fn preconditions(&self) -> Vec<Arc<Precondition>> {
        self.preconditions.read().await.clone()
    }

    pub async fn find_task(&self, id: &str) -> Option<Arc<Task>> {
        self.tasks
            .read()
            .await
            .iter()
            .find(|t| t.id.as_deref() == Some(id))
            .cloned()
    }

    // -- expressions --------------------------------------------------------

    /// Task table exposed to expressions as `tasks.<id>`.
    pub async fn tasks_json(&self) -> Value {
        let tasks = self.tasks.read().await;
        let map: Map<String, Value> = tasks
            .iter()
            .filter_map(|t| {
                let id = t.id.clone()?;
                let entry = json!({
                    "id": id,
                    "name": t.name,
                    "runs": t.run_count(),
                    "maxRuns": t.max_runs,
                    "fromRemote": t.from_remote,
                    "uuid": t.uuid.to_string(),
                });
                Some((id, entry))
            })
            .collect();
        Value::Object(map)
    }

    /// Evaluate a script, delimited or bare.
    pub async fn evaluate(&self, script: &str) -> Result<ScriptValue, ExpressionError> {
        let tasks = self.tasks_json().await;
        self.context.evaluate(script, tasks)
    }

    /// Evaluate a delimited script to text; anything else is returned as is.
    pub async fn evaluate_text(&self, script: &str) -> Result<String, ExpressionError> {
        if !is_evaluatable_script_string(script) {
            return Ok(script.to_string());
        }
        let value = self.evaluate(script).await?;
        value.as_text().ok_or_else(|| ExpressionError::NotText {
            expression: script.to_string(),
            got: value.type_name(),
        })
    }

    // -- references ---------------------------------------------------------

    /// Resolve a task reference (an id, or an expression yielding one) against
    /// the current task list.
    pub async fn resolve_reference(&self, reference: &str) -> Result<Arc<Task>, WorkflowError> {
        let id = if is_evaluatable_script_string(reference) {
            self.evaluate_text(reference)
                .await
                .map_err(|e| WorkflowError::ExpressionError(e.to_string()))?
        } else {
            reference.trim().to_string()
        };

        self.find_task(&id)
            .await
            .ok_or(WorkflowError::UnresolvedReference(id))
    }

    /// Resolve and run a reference. An unresolved reference is reported and
    /// only fails this reference.
    pub async fn run_reference(&self, reference: &str, mode: RunMode) -> TaskOutcome {
        match self.resolve_reference(reference).await {
            Ok(task) => task.run(self, mode).await,
            Err(e) => {
                tracing::warn!(reference, error = %e, "task reference unresolved");
                self.reporter.failure(&e.to_string());
                TaskOutcome::Failed(e.to_string())
            }
        }
    }

    // -- mutation -----------------------------------------------------------

    /// Merge an include fragment.
    ///
    /// Preconditions are prepended in the fragment's order; tasks are appended
    /// as remote tasks with fresh identities. Both lists are locked for the
    /// whole merge so concurrent merges never interleave.
    pub async fn merge_fragment(&self, fragment: WorkflowDefinition) -> MergeSummary {
        if !fragment.includes.is_empty() || !fragment.vars.is_empty() {
            tracing::debug!("nested includes and vars in fragments are ignored");
        }

        let defaults = &self.settings.defaults.tasks;
        let mut preconditions = self.preconditions.write().await;
        let mut tasks = self.tasks.write().await;

        let mut summary = MergeSummary::default();
        let mut known: HashSet<String> = tasks.iter().filter_map(|t| t.id.clone()).collect();

        for def in fragment.tasks {
            if let Some(id) = def.id.as_deref() {
                if !known.insert(id.to_string()) {
                    tracing::warn!(task = id, "include task id already declared, skipping");
                    summary.duplicate_ids.push(id.to_string());
                    continue;
                }
            }
            tasks.push(Arc::new(Task::from_definition(def, defaults, true)));
            summary.tasks_added += 1;
        }

        let merged: Vec<Arc<Precondition>> = fragment
            .preconditions
            .into_iter()
            .map(|def| Arc::new(Precondition::from_definition(def)))
            .collect();
        summary.preconditions_added = merged.len();
        preconditions.splice(0..0, merged);

        summary
    }

    /// Evaluate `vars:` in declaration order. Exported values join the
    /// environment overlay for spawned commands.
    pub async fn apply_variables(&self) {
        for var in &self.vars {
            let source = normalize_env_shorthand(&var.value);
            let value = if is_evaluatable_script_string(&source) {
                let tasks = self.tasks_json().await;
                match self.context.evaluate_value(&source, tasks) {
                    Ok(value) => value,
                    Err(e) => {
                        self.reporter
                            .failure(&format!("variable {}: {e}", var.name));
                        continue;
                    }
                }
            } else {
                Value::String(source)
            };

            if var.export {
                let text = match &value {
                    Value::String(s) => s.clone(),
                    Value::Null => String::new(),
                    other => other.to_string(),
                };
                self.context.variables().set_exported(&var.name, text);
            }
            tracing::debug!(variable = %var.name, exported = var.export, "variable set");
            self.context.variables().set(&var.name, value);
        }
    }
}


#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::testing::build_workflow;
    use super::*;
    use crate::report::Status;
    use crate::workflow::definition::parse_fragment_yaml;

    const BASE: &str = r#"
preconditions:
  - name: local check
    check: true
tasks:
  - id: build
    command: make
  - id: test
    command: make test
"#;

    #[tokio::test]
    async fn test_resolve_literal_and_expression_references() {
        let (wf, _, _) = build_workflow(BASE).await;
        wf.context().variables().set("target", json!("test"));

        assert_eq!(wf.resolve_reference("build").await.unwrap().name, "build");
        assert_eq!(
            wf.resolve_reference("{{ vars.target }}").await.unwrap().name,
            "test"
        );
        assert!(matches!(
            wf.resolve_reference("missing").await,
            Err(WorkflowError::UnresolvedReference(_))
        ));
    }

    #[tokio::test]
    async fn test_unresolved_reference_is_soft() {
        let (wf, runner, reporter) = build_workflow(BASE).await;
        let outcome = wf.run_reference("ghost", RunMode::Synchronous).await;
        assert!(matches!(outcome, TaskOutcome::Failed(_)));
        assert!(reporter.contains(Status::Failure, "ghost"));
        assert!(runner.completed_commands().is_empty());
    }

    #[tokio::test]
    async fn test_merge_prepends_preconditions_and_appends_tasks() {
        let (wf, _, _) = build_workflow(BASE).await;
        let fragment = parse_fragment_yaml(
            r#"
preconditions:
  - name: remote first
    check: true
  - name: remote second
    check: true
tasks:
  - id: lint
    command: eslint .
  - id: build
    command: remote build
"#,
        )
        .unwrap();

        let summary = wf.merge_fragment(fragment).await;
        assert_eq!(summary.tasks_added, 1);
        assert_eq!(summary.preconditions_added, 2);
        assert_eq!(summary.duplicate_ids, vec!["build"]);

        let names: Vec<String> = wf
            .preconditions()
            .await
            .iter()
            .map(|p| p.name.clone())
            .collect();
        assert_eq!(names, vec!["remote first", "remote second", "local check"]);

        let tasks = wf.tasks().await;
        let lint = tasks.last().unwrap();
        assert_eq!(lint.id.as_deref(), Some("lint"));
        assert!(lint.from_remote);
        assert!(!tasks[0].from_remote);
        assert_eq!(wf.find_task("build").await.unwrap().command, "make");
    }

    #[tokio::test]
    async fn test_concurrent_merges_do_not_interleave() {
        let (wf, _, _) = build_workflow(BASE).await;
        let counter = Arc::new(AtomicU32::new(0));
        let mut handles = Vec::new();
        for i in 0..10 {
            let wf = wf.clone();
            let counter = counter.clone();
            handles.push(tokio::spawn(async move {
                let yaml = format!(
                    "tasks:\n  - id: t{i}-a\n    command: a\n  - id: t{i}-b\n    command: b\n"
                );
                let summary = wf.merge_fragment(parse_fragment_yaml(&yaml).unwrap()).await;
                counter.fetch_add(summary.tasks_added as u32, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(counter.load(Ordering::SeqCst), 20);
        let tasks = wf.tasks().await;
        assert_eq!(tasks.len(), 22);
        // Each fragment's pair stays adjacent.
        for pair in tasks[2..].chunks(2) {
            let a = pair[0].id.as_deref().unwrap();
            let b = pair[1].id.as_deref().unwrap();
            assert_eq!(a.trim_end_matches("-a"), b.trim_end_matches("-b"));
        }
    }

    #[tokio::test]
    async fn test_tasks_json_exposes_run_counts() {
        let (wf, _, _) = build_workflow(BASE).await;
        let build = wf.find_task("build").await.unwrap();
        build.run(&wf, RunMode::Synchronous).await;

        let value = wf.evaluate("tasks.build.runs").await.unwrap();
        assert_eq!(value, ScriptValue::Number(1.0));
    }

    #[tokio::test]
    async fn test_evaluate_text_passes_literals_through() {
        let (wf, _, _) = build_workflow(BASE).await;
        assert_eq!(wf.evaluate_text("npm start").await.unwrap(), "npm start");
        assert!(matches!(
            wf.evaluate_text("{{ null }}").await,
            Err(ExpressionError::NotText { .. })
        ));
    }

    #[tokio::test]
    async fn test_apply_variables_in_order_with_export() {
        let yaml = r#"
vars:
  - name: greeting
    value: hello
  - name: shout
    value: "{{ vars.greeting|upper }}"
    export: true
  - name: broken
    value: "{{ 'x'|nosuchtransform }}"
tasks:
  - id: echo
    command: echo
"#;
        let (wf, runner, reporter) = build_workflow(yaml).await;
        wf.apply_variables().await;

        let vars = wf.context().variables();
        assert_eq!(vars.get("greeting"), Some(json!("hello")));
        assert_eq!(vars.get("shout"), Some(json!("HELLO")));
        assert!(vars.get("broken").is_none());
        assert!(reporter.contains(Status::Failure, "broken"));

        wf.run_reference("echo", RunMode::Synchronous).await;
        let spec = runner.completed.lock().unwrap()[0].clone();
        assert_eq!(spec.env.get("shout").map(String::as_str), Some("HELLO"));
        assert!(!spec.env.contains_key("greeting"));
    }

    #[tokio::test]
    async fn test_start_hook_sees_pid() {
        let seen = Arc::new(AtomicU32::new(0));
        let (definition, _) =
            crate::workflow::definition::parse_workflow_yaml("tasks:\n  - id: web\n    command: serve\n")
                .unwrap();
        let hook_seen = seen.clone();
        let wf = Workflow::new(
            definition,
            ExecutionContext::new(std::env::temp_dir(), "0", &[]),
            Arc::new(crate::process::testing::RecordingRunner::default()),
            Arc::new(crate::report::TracingReporter),
        )
        .with_start_hook(Arc::new(move |_task: &Task, pid: Option<u32>| {
            hook_seen.store(pid.unwrap_or(0), Ordering::SeqCst);
        }));

        assert_eq!(
            wf.run_reference("web", RunMode::Detached).await,
            TaskOutcome::Started
        );
        assert_eq!(seen.load(Ordering::SeqCst), 4242);
    }
}
