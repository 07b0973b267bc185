//! Precondition gate.
//!
//! A precondition is checked before startup tasks run. When the check fails
//! and `on-fail` is set, the remediation (an expression or a task id) runs and,
//! if it succeeds, the check is retried. Attempts are bounded by
//! `max_retries`; a precondition that runs out of attempts halts the run.

use std::sync::atomic::{AtomicU32, Ordering};

use stackup_types::script::ScriptValue;
use stackup_types::workflow::{CheckSource, PreconditionDefinition};

use super::expression::{ExpressionError, is_evaluatable_script_string};
use super::model::Workflow;
use super::task::{RunMode, TaskOutcome};

#[derive(Debug)]
pub struct Precondition {
    pub name: String,
    /// `None` is vacuously satisfied.
    pub check: Option<CheckSource>,
    /// Task id or `{{ expression }}`.
    pub on_fail: Option<String>,
    pub max_retries: u32,
    attempts: AtomicU32,
}

impl Precondition {
    /// Defaults: one attempt, or two when remediation is configured so the
    /// remediated check gets its retry.
    pub fn from_definition(def: PreconditionDefinition) -> Self {
        let default_retries = if def.on_fail.is_some() { 2 } else { 1 };
        let name = if def.name.trim().is_empty() {
            match &def.check {
                Some(CheckSource::Script(s)) => s.clone(),
                Some(CheckSource::Literal(b)) => b.to_string(),
                None => "precondition".to_string(),
            }
        } else {
            def.name
        };

        Self {
            name,
            check: def.check,
            on_fail: def.on_fail.filter(|s| !s.trim().is_empty()),
            max_retries: def.max_retries.unwrap_or(default_retries),
            attempts: AtomicU32::new(0),
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Evaluate the check. A string result is itself evaluated once more; the
    /// final value must be a boolean.
    async fn evaluate_check(&self, workflow: &Workflow) -> Result<bool, ExpressionError> {
        let script = match &self.check {
            None => return Ok(true),
            Some(CheckSource::Literal(b)) => return Ok(*b),
            Some(CheckSource::Script(s)) => s,
        };

        let first = workflow.evaluate(script).await?;
        let value = match first {
            ScriptValue::String(inner) => workflow.evaluate(&inner).await?,
            other => other,
        };

        value.as_guard().ok_or_else(|| ExpressionError::NotBoolean {
            expression: script.clone(),
            got: value.type_name(),
        })
    }

    /// Run the remediation. Returns whether it succeeded.
    async fn remediate(&self, on_fail: &str, workflow: &Workflow) -> bool {
        if is_evaluatable_script_string(on_fail) {
            return match workflow.evaluate(on_fail).await {
                Ok(value) => value.is_truthy(),
                Err(e) => {
                    workflow
                        .reporter()
                        .failure(&format!("{}: remediation failed: {e}", self.name));
                    false
                }
            };
        }

        match workflow.resolve_reference(on_fail).await {
            Ok(task) => {
                tracing::info!(precondition = %self.name, task = %task.name, "running remediation task");
                matches!(
                    task.run(workflow, RunMode::Synchronous).await,
                    TaskOutcome::Completed
                )
            }
            Err(e) => {
                workflow
                    .reporter()
                    .failure(&format!("{}: {e}", self.name));
                false
            }
        }
    }

    /// Run the gate. Returns `true` when the precondition is satisfied.
    pub async fn run(&self, workflow: &Workflow) -> bool {
        if self.check.is_none() {
            return true;
        }

        loop {
            let spent = self.attempts.load(Ordering::SeqCst);
            if spent >= self.max_retries {
                workflow.reporter().failure(&format!(
                    "{}: failed after {spent} attempt(s)",
                    self.name
                ));
                return false;
            }
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;

            match self.evaluate_check(workflow).await {
                Ok(true) => {
                    workflow.reporter().success(&self.name);
                    return true;
                }
                Ok(false) => {
                    tracing::debug!(precondition = %self.name, attempt, "check returned false");
                }
                Err(e) => {
                    tracing::warn!(precondition = %self.name, attempt, error = %e, "check could not be evaluated");
                }
            }

            // Without remediation there is nothing to change between attempts.
            let Some(on_fail) = self.on_fail.as_deref() else {
                workflow.reporter().failure(&format!(
                    "{}: failed after {attempt} attempt(s)",
                    self.name
                ));
                return false;
            };
            if attempt >= self.max_retries {
                workflow.reporter().failure(&format!(
                    "{}: failed after {attempt} attempt(s)",
                    self.name
                ));
                return false;
            }
            if !self.remediate(on_fail, workflow).await {
                workflow
                    .reporter()
                    .failure(&format!("{}: remediation did not succeed", self.name));
                return false;
            }
            workflow
                .reporter()
                .info(&format!("{}: remediated, checking again", self.name));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::Status;
    use crate::workflow::model::testing::build_workflow;

    #[tokio::test]
    async fn test_false_check_fails_after_one_attempt() {
        let (wf, _, reporter) = build_workflow(
            "preconditions:\n  - name: never\n    check: \"false\"\n    max-retries: 1\n",
        )
        .await;
        let pre = wf.preconditions().await.remove(0);
        assert!(!pre.run(&wf).await);
        assert_eq!(pre.attempts(), 1);
        assert!(reporter.contains(Status::Failure, "never"));
    }

    #[tokio::test]
    async fn test_false_check_without_remediation_evaluates_once() {
        let (wf, _, reporter) = build_workflow(
            "preconditions:\n  - name: lonely\n    check: \"false\"\n    max-retries: 4\n",
        )
        .await;
        let pre = wf.preconditions().await.remove(0);
        assert!(!pre.run(&wf).await);
        assert_eq!(pre.attempts(), 1);
        assert!(reporter.contains(Status::Failure, "lonely"));
    }

    #[tokio::test]
    async fn test_zero_max_retries_never_evaluates() {
        let (wf, _, reporter) = build_workflow(
            "preconditions:\n  - name: disabled\n    check: \"true\"\n    max-retries: 0\n",
        )
        .await;
        let pre = wf.preconditions().await.remove(0);
        assert!(!pre.run(&wf).await);
        assert_eq!(pre.attempts(), 0);
        assert!(reporter.contains(Status::Failure, "disabled"));
    }

    #[tokio::test]
    async fn test_rerun_after_exhaustion_stays_within_budget() {
        let yaml = r#"
preconditions:
  - name: stubborn
    check: "false"
    on-fail: "{{ true }}"
    max-retries: 2
"#;
        let (wf, _, _) = build_workflow(yaml).await;
        let pre = wf.preconditions().await.remove(0);
        assert!(!pre.run(&wf).await);
        assert_eq!(pre.attempts(), 2);
        assert!(!pre.run(&wf).await);
        assert_eq!(pre.attempts(), 2);
    }

    #[tokio::test]
    async fn test_literal_and_empty_checks() {
        let (wf, _, _) = build_workflow(
            "preconditions:\n  - name: yes\n    check: true\n  - name: empty\n",
        )
        .await;
        for pre in wf.preconditions().await {
            assert!(pre.run(&wf).await, "{} should pass", pre.name);
        }
    }

    #[tokio::test]
    async fn test_string_result_is_evaluated_again() {
        let (wf, _, _) = build_workflow(
            "preconditions:\n  - name: indirect\n    check: \"'1 == 1'\"\n",
        )
        .await;
        let pre = wf.preconditions().await.remove(0);
        assert!(pre.run(&wf).await);
    }

    #[tokio::test]
    async fn test_non_boolean_result_fails() {
        let (wf, _, _) = build_workflow(
            "preconditions:\n  - name: number\n    check: \"42\"\n",
        )
        .await;
        let pre = wf.preconditions().await.remove(0);
        assert!(!pre.run(&wf).await);
    }

    #[tokio::test]
    async fn test_remediation_task_then_retry() {
        let yaml = r#"
preconditions:
  - name: marker set
    check: "{{ vars.ready == true }}"
    on-fail: "{{ 'ready'|setVar(true) }}"
"#;
        let (wf, _, reporter) = build_workflow(yaml).await;
        let pre = wf.preconditions().await.remove(0);
        assert_eq!(pre.max_retries, 2);
        assert!(pre.run(&wf).await);
        assert_eq!(pre.attempts(), 2);
        assert!(reporter.contains(Status::Info, "remediated"));
    }

    #[tokio::test]
    async fn test_remediation_by_task_id() {
        let yaml = r#"
preconditions:
  - name: tool installed
    check: "false"
    on-fail: install-tool
tasks:
  - id: install-tool
    command: ./install.sh
"#;
        let (wf, runner, _) = build_workflow(yaml).await;
        let pre = wf.preconditions().await.remove(0);
        // The check stays false, so the remediated retry exhausts attempts.
        assert!(!pre.run(&wf).await);
        assert_eq!(pre.attempts(), 2);
        assert_eq!(runner.completed_commands(), vec!["./install.sh"]);
    }

    #[tokio::test]
    async fn test_failed_remediation_is_terminal() {
        let yaml = r#"
preconditions:
  - name: broken
    check: "false"
    on-fail: fixer
    max-retries: 5
tasks:
  - id: fixer
    command: this will fail
"#;
        let (wf, _, _) = build_workflow(yaml).await;
        let pre = wf.preconditions().await.remove(0);
        assert!(!pre.run(&wf).await);
        assert_eq!(pre.attempts(), 1);
    }

    #[tokio::test]
    async fn test_unknown_remediation_task() {
        let yaml = "preconditions:\n  - name: p\n    check: \"false\"\n    on-fail: ghost\n";
        let (wf, _, reporter) = build_workflow(yaml).await;
        let pre = wf.preconditions().await.remove(0);
        assert!(!pre.run(&wf).await);
        assert!(reporter.contains(Status::Failure, "ghost"));
    }
}
