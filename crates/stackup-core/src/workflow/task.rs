//! Task lifecycle.
//!
//! A task runs through four gates before its command is launched, each an
//! early "skip" rather than an error: working-directory resolution, the `if`
//! guard, the platform allow-list, and the run limit. Only then is the run
//! counter claimed and the command executed, either to completion or detached
//! into the workflow's process registry.

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};

use stackup_types::workflow::{TaskDefaults, TaskDefinition};
use uuid::Uuid;

use super::context::{TaskFrame, current_platform, platform_matches, with_current_task};
use super::expression::{ExpressionError, is_evaluatable_script_string, normalize_env_shorthand};
use super::model::Workflow;
use crate::process::ProcessSpec;

// ---------------------------------------------------------------------------
// Outcome types
// ---------------------------------------------------------------------------

/// How a task's command is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Run to completion, inheriting stdio unless silent.
    Synchronous,
    /// Start detached and register in the process registry.
    Detached,
}

/// Why a task did not run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The `if` guard evaluated to `false`.
    ConditionFalse,
    /// The `if` guard produced a non-boolean or failed to evaluate.
    ConditionUndetermined(String),
    UnsupportedPlatform(String),
    RunLimitReached(u32),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConditionFalse => write!(f, "condition not met"),
            Self::ConditionUndetermined(why) => write!(f, "condition could not be determined ({why})"),
            Self::UnsupportedPlatform(platform) => write!(f, "not supported on {platform}"),
            Self::RunLimitReached(max) => write!(f, "run limit of {max} reached"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Synchronous run finished successfully.
    Completed,
    /// Detached process started and registered.
    Started,
    Skipped(SkipReason),
    Failed(String),
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed | Self::Started)
    }
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// A runnable task with its run counter.
#[derive(Debug)]
pub struct Task {
    pub id: Option<String>,
    pub name: String,
    pub command: String,
    pub if_expr: Option<String>,
    /// Empty means every platform.
    pub platforms: Vec<String>,
    /// `0` means unbounded.
    pub max_runs: u32,
    run_count: AtomicU32,
    pub path: Option<String>,
    pub silent: bool,
    /// Identity for process tracking, independent of `id`.
    pub uuid: Uuid,
    /// Whether this task was merged from an include.
    pub from_remote: bool,
}

impl Task {
    /// Build a task from its definition, filling unset fields from `defaults`.
    pub fn from_definition(def: TaskDefinition, defaults: &TaskDefaults, from_remote: bool) -> Self {
        let command = def.command.unwrap_or_default();
        let name = def
            .name
            .or_else(|| def.id.clone())
            .unwrap_or_else(|| command.clone());

        Self {
            id: def.id,
            name,
            command,
            if_expr: def.if_expr,
            platforms: def.platforms.unwrap_or_else(|| defaults.platforms.clone()),
            max_runs: def.max_runs.unwrap_or(0),
            run_count: AtomicU32::new(0),
            path: def.path.or_else(|| defaults.path.clone()),
            silent: def.silent.unwrap_or(defaults.silent),
            uuid: Uuid::new_v4(),
            from_remote,
        }
    }

    pub fn run_count(&self) -> u32 {
        self.run_count.load(Ordering::SeqCst)
    }

    fn frame(&self) -> TaskFrame {
        TaskFrame {
            id: self.id.clone(),
            name: self.name.clone(),
            uuid: self.uuid,
        }
    }

    /// Atomically take one run; refused once `run_count >= max_runs`.
    fn claim_run(&self) -> bool {
        let max = self.max_runs;
        self.run_count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| {
                if max > 0 && count >= max {
                    None
                } else {
                    Some(count + 1)
                }
            })
            .is_ok()
    }

    fn supports_platform(&self, host: &str) -> bool {
        self.platforms.is_empty() || self.platforms.iter().any(|p| platform_matches(p, host))
    }

    async fn resolve_path(&self, workflow: &Workflow) -> Result<PathBuf, ExpressionError> {
        let base = workflow.context().working_dir().to_path_buf();
        let Some(raw) = self.path.as_deref().filter(|p| !p.trim().is_empty()) else {
            return Ok(base);
        };

        let normalized = normalize_env_shorthand(raw);
        let resolved = if is_evaluatable_script_string(&normalized) {
            workflow.evaluate_text(&normalized).await?
        } else {
            normalized
        };

        let path = PathBuf::from(resolved);
        Ok(if path.is_absolute() { path } else { base.join(path) })
    }

    async fn check_guard(&self, workflow: &Workflow) -> Option<SkipReason> {
        let guard = self.if_expr.as_deref()?;
        match workflow.evaluate(guard).await {
            Ok(value) => match value.as_guard() {
                Some(true) => None,
                Some(false) => Some(SkipReason::ConditionFalse),
                None => Some(SkipReason::ConditionUndetermined(format!(
                    "got {}",
                    value.type_name()
                ))),
            },
            Err(e) => Some(SkipReason::ConditionUndetermined(e.to_string())),
        }
    }

    async fn resolve_command(&self, workflow: &Workflow) -> Result<String, String> {
        let command = if is_evaluatable_script_string(&self.command) {
            workflow
                .evaluate_text(&self.command)
                .await
                .map_err(|e| e.to_string())?
        } else {
            self.command.clone()
        };
        if command.trim().is_empty() {
            return Err("no command to run".to_string());
        }
        Ok(command)
    }

    fn skip(&self, workflow: &Workflow, reason: SkipReason) -> TaskOutcome {
        tracing::debug!(task = %self.name, %reason, "task skipped");
        workflow
            .reporter()
            .skipped(&format!("{}: {reason}", self.name));
        TaskOutcome::Skipped(reason)
    }

    fn fail(&self, workflow: &Workflow, reason: String) -> TaskOutcome {
        tracing::warn!(task = %self.name, %reason, "task failed");
        workflow
            .reporter()
            .failure(&format!("{}: {reason}", self.name));
        TaskOutcome::Failed(reason)
    }

    /// Run the task.
    ///
    /// The task is the current task for every expression evaluated during the
    /// run; the previous current task is restored on return.
    pub async fn run(&self, workflow: &Workflow, mode: RunMode) -> TaskOutcome {
        with_current_task(self.frame(), self.run_as_current(workflow, mode)).await
    }

    async fn run_as_current(&self, workflow: &Workflow, mode: RunMode) -> TaskOutcome {
        let cwd = match self.resolve_path(workflow).await {
            Ok(cwd) => cwd,
            Err(e) => return self.fail(workflow, format!("could not resolve path: {e}")),
        };

        if let Some(reason) = self.check_guard(workflow).await {
            return self.skip(workflow, reason);
        }

        let host = current_platform();
        if !self.supports_platform(host) {
            return self.skip(workflow, SkipReason::UnsupportedPlatform(host.to_string()));
        }

        if !self.claim_run() {
            return self.skip(workflow, SkipReason::RunLimitReached(self.max_runs));
        }

        let command = match self.resolve_command(workflow).await {
            Ok(command) => command,
            Err(e) => return self.fail(workflow, e),
        };

        let spec = ProcessSpec {
            command,
            cwd: Some(cwd),
            silent: self.silent,
            env: workflow.context().variables().exported_env(),
        };

        tracing::info!(task = %self.name, command = %spec.command, ?mode, "running task");
        match mode {
            RunMode::Synchronous => self.run_to_completion(workflow, &spec).await,
            RunMode::Detached => self.start_detached(workflow, &spec).await,
        }
    }

    async fn run_to_completion(&self, workflow: &Workflow, spec: &ProcessSpec) -> TaskOutcome {
        match workflow.runner().run_to_completion(spec).await {
            Ok(report) if report.success => {
                workflow.reporter().success(&self.name);
                TaskOutcome::Completed
            }
            Ok(report) => {
                let code = report
                    .code
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "signal".to_string());
                self.fail(workflow, format!("exited with {code}"))
            }
            Err(e) => self.fail(workflow, e.to_string()),
        }
    }

    async fn start_detached(&self, workflow: &Workflow, spec: &ProcessSpec) -> TaskOutcome {
        match workflow.runner().start_detached(spec).await {
            Ok(handle) => {
                let pid = handle.pid();
                if let Some(hook) = workflow.start_hook() {
                    hook(self, pid);
                }
                if workflow
                    .processes()
                    .register(self.uuid, self.name.clone(), handle)
                    .is_some()
                {
                    tracing::warn!(task = %self.name, "replaced an already registered process");
                }
                workflow.reporter().success(&format!("{} started", self.name));
                TaskOutcome::Started
            }
            Err(e) => self.fail(workflow, format!("could not start: {e}")),
        }
    }
}
