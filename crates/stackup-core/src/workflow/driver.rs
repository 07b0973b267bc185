//! Run lifecycle: includes, variables, preconditions, startup, servers,
//! scheduler, the idle loop, and shutdown.
//!
//! The driver never exits the process. Hard failures come back as
//! [`RunOutcome::Halted`] and the binary decides the exit code after calling
//! [`WorkflowDriver::shutdown`].

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Timelike, Utc};
use tokio_util::sync::CancellationToken;

use super::model::Workflow;
use super::scheduler::{CronCallback, CronScheduler};
use super::task::{RunMode, TaskOutcome};
use crate::hash::ContentHasher;
use crate::include::cache::IncludeCache;
use crate::include::resolver::IncludeResolver;
use crate::include::transport::IncludeTransport;

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Reached the idle loop and left it on a termination signal.
    Completed,
    /// A hard failure stopped the run before the idle loop.
    Halted { reason: String },
}

impl RunOutcome {
    pub fn is_halted(&self) -> bool {
        matches!(self, Self::Halted { .. })
    }
}

pub struct WorkflowDriver<C, T, H> {
    workflow: Arc<Workflow>,
    resolver: Arc<IncludeResolver<C, T, H>>,
    scheduler: CronScheduler,
    cancel: CancellationToken,
}

impl<C, T, H> WorkflowDriver<C, T, H>
where
    C: IncludeCache + 'static,
    T: IncludeTransport + 'static,
    H: ContentHasher + 'static,
{
    pub fn new(workflow: Arc<Workflow>, resolver: Arc<IncludeResolver<C, T, H>>) -> Self {
        Self {
            workflow,
            resolver,
            scheduler: CronScheduler::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn workflow(&self) -> &Arc<Workflow> {
        &self.workflow
    }

    /// Token that ends the idle loop when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Bring the workflow up and idle until cancelled.
    pub async fn run(&self) -> RunOutcome {
        let outcome = self.start().await;
        if outcome.is_halted() {
            return outcome;
        }
        self.idle().await;
        RunOutcome::Completed
    }

    /// Everything before the idle loop.
    pub async fn start(&self) -> RunOutcome {
        match self.resolver.purge_expired().await {
            Ok(0) => {}
            Ok(purged) => tracing::debug!(purged, "expired include cache entries removed"),
            Err(e) => tracing::warn!(error = %e, "include cache purge failed"),
        }

        if !self.workflow.includes().is_empty() {
            if let Err(e) = self.resolver.resolve_all(&self.workflow).await {
                tracing::error!(error = %e, "include resolution halted the run");
                return RunOutcome::Halted {
                    reason: e.to_string(),
                };
            }
        }

        self.workflow.apply_variables().await;

        for precondition in self.workflow.preconditions().await {
            if !precondition.run(&self.workflow).await {
                return RunOutcome::Halted {
                    reason: format!("precondition '{}' failed", precondition.name),
                };
            }
        }

        for reference in self.workflow.startup() {
            self.workflow
                .run_reference(&reference.task, RunMode::Synchronous)
                .await;
        }

        for reference in self.workflow.servers() {
            self.workflow.run_reference(&reference.task, RunMode::Detached).await;
        }

        self.start_scheduler().await;
        RunOutcome::Completed
    }

    async fn start_scheduler(&self) {
        let scheduled = self.workflow.scheduled();
        if scheduled.is_empty() {
            return;
        }
        if let Err(e) = self.scheduler.start().await {
            tracing::error!(error = %e, "cron scheduler failed to start");
            self.workflow.reporter().failure(&format!("scheduler: {e}"));
            return;
        }

        for entry in scheduled {
            let workflow = Arc::clone(&self.workflow);
            let callback: CronCallback = Arc::new(move |reference, fired_at| {
                let workflow = Arc::clone(&workflow);
                Box::pin(async move {
                    fire_scheduled(&workflow, &reference, fired_at).await;
                })
            });
            match self.scheduler.schedule_task(&entry.task, &entry.cron, callback).await {
                Ok(_) => self
                    .workflow
                    .reporter()
                    .info(&format!("{} scheduled ({})", entry.task, entry.cron)),
                Err(e) => self
                    .workflow
                    .reporter()
                    .failure(&format!("{}: {e}", entry.task)),
            }
        }
    }

    /// Sleep to the top of each minute until cancelled.
    pub async fn idle(&self) {
        loop {
            let wait = until_next_minute(Utc::now());
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::debug!("idle loop cancelled");
                    return;
                }
                _ = tokio::time::sleep(wait) => {
                    tracing::trace!("idle tick");
                }
            }
        }
    }

    /// Stop the scheduler, kill detached processes, then run shutdown tasks.
    pub async fn shutdown(&self) {
        if let Err(e) = self.scheduler.stop().await {
            tracing::warn!(error = %e, "scheduler did not stop cleanly");
        }

        for report in self.workflow.processes().kill_all().await {
            match report.result {
                Ok(()) => self
                    .workflow
                    .reporter()
                    .info(&format!("stopped {}", report.name)),
                Err(e) => self
                    .workflow
                    .reporter()
                    .failure(&format!("{}: {e}", report.name)),
            }
        }

        for reference in self.workflow.shutdown() {
            self.workflow
                .run_reference(&reference.task, RunMode::Synchronous)
                .await;
        }
    }
}

/// One cron firing: the reference is resolved against the current task list.
pub(crate) async fn fire_scheduled(workflow: &Workflow, reference: &str, fired_at: DateTime<Utc>) {
    tracing::debug!(task = reference, %fired_at, "running scheduled task");
    let outcome = workflow.run_reference(reference, RunMode::Synchronous).await;
    if let TaskOutcome::Failed(reason) = outcome {
        tracing::warn!(task = reference, %reason, "scheduled task failed");
    }
}

/// Time left until the next whole minute.
pub fn until_next_minute(now: DateTime<Utc>) -> Duration {
    let millis = u64::from(now.nanosecond() / 1_000_000).min(999);
    let elapsed_ms = u64::from(now.second()) * 1000 + millis;
    Duration::from_millis(60_000 - elapsed_ms)
}
