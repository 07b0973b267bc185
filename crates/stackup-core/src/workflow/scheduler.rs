//! Cron scheduler wrapping `tokio-cron-scheduler` for scheduled tasks.
//!
//! Provides:
//! - Standard cron expression parsing (5-field, or 6-field with seconds)
//! - Human-readable schedule normalization ("every 5 minutes" -> cron)
//! - Per-job overlap protection: a firing is skipped while the previous
//!   firing of the same job is still running
//! - Job lifecycle (schedule, start, stop)

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler};
use uuid::Uuid;

use super::definition::WorkflowError;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur during scheduling operations.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// Failed to create or manipulate a cron job.
    #[error("scheduler error: {0}")]
    JobError(String),

    /// Invalid cron expression or schedule string.
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),
}

impl From<SchedulerError> for WorkflowError {
    fn from(e: SchedulerError) -> Self {
        WorkflowError::ExecutionError(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Human-readable schedule normalization
// ---------------------------------------------------------------------------

/// Normalize a schedule string to a 6-field cron expression.
///
/// Supported patterns (case-insensitive):
/// - "every N seconds"     -> "*/N * * * * *"
/// - "every N minutes"     -> "0 */N * * * *"
/// - "every N hours"       -> "0 0 */N * * *"
/// - "every minute"        -> "0 * * * * *"
/// - "every hour"          -> "0 0 * * * *"
/// - "every day"           -> "0 0 0 * * *"
/// - "every day at HH:MM"  -> "0 MM HH * * *"
/// - "hourly"              -> "0 0 * * * *"
/// - "daily"               -> "0 0 0 * * *"
///
/// A 5-field cron expression gets a leading `0` seconds field; a 6-field one
/// is returned unchanged.
pub fn normalize_schedule(input: &str) -> Result<String, SchedulerError> {
    let trimmed = input.trim();

    let fields = trimmed.split_whitespace().count();
    if fields == 5 && looks_like_cron(trimmed) {
        return Ok(format!("0 {trimmed}"));
    }
    if fields == 6 && looks_like_cron(trimmed) {
        return Ok(trimmed.to_string());
    }

    let lower = trimmed.to_lowercase();
    match lower.as_str() {
        "every minute" | "minutely" => return Ok("0 * * * * *".to_string()),
        "every hour" | "hourly" => return Ok("0 0 * * * *".to_string()),
        "every day" | "daily" => return Ok("0 0 0 * * *".to_string()),
        _ => {}
    }

    let invalid = || SchedulerError::InvalidSchedule(input.to_string());

    if let Some(rest) = lower.strip_prefix("every ") {
        if let Some(at) = rest.strip_prefix("day at ") {
            let (hour, minute) = at.split_once(':').ok_or_else(invalid)?;
            let hour: u32 = hour.trim().parse().map_err(|_| invalid())?;
            let minute: u32 = minute.trim().parse().map_err(|_| invalid())?;
            if hour < 24 && minute < 60 {
                return Ok(format!("0 {minute} {hour} * * *"));
            }
            return Err(invalid());
        }

        let words: Vec<&str> = rest.split_whitespace().collect();
        if let [count, unit] = words.as_slice() {
            let n: u32 = count.parse().map_err(|_| invalid())?;
            if n == 0 {
                return Err(SchedulerError::InvalidSchedule(
                    "interval must be > 0".to_string(),
                ));
            }
            return match unit.trim_end_matches('s') {
                "second" => Ok(format!("*/{n} * * * * *")),
                "minute" => Ok(format!("0 */{n} * * * *")),
                "hour" => Ok(format!("0 0 */{n} * * *")),
                _ => Err(invalid()),
            };
        }
    }

    Err(SchedulerError::InvalidSchedule(format!(
        "unrecognized schedule format: '{trimmed}'"
    )))
}

/// Cron fields only contain digits, `*`, `/`, `,`, `-`, `?`, `#` and
/// three-letter month/day names.
fn looks_like_cron(expr: &str) -> bool {
    expr.split_whitespace().all(|field| {
        field
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '*' | '/' | ',' | '-' | '?' | '#'))
            && field
                .split(|c: char| !c.is_ascii_alphabetic())
                .all(|name| name.is_empty() || name.len() == 3)
    })
}

// ---------------------------------------------------------------------------
// Overlap guard
// ---------------------------------------------------------------------------

/// Lets at most one firing of a job run at a time.
#[derive(Debug, Clone, Default)]
pub struct OverlapGuard {
    running: Arc<AtomicBool>,
}

/// Held for the duration of one firing.
pub struct FiringPermit {
    running: Arc<AtomicBool>,
}

impl Drop for FiringPermit {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

impl OverlapGuard {
    /// `None` while a previous firing still holds its permit.
    pub fn try_enter(&self) -> Option<FiringPermit> {
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| FiringPermit {
                running: self.running.clone(),
            })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// CronScheduler
// ---------------------------------------------------------------------------

/// Callback invoked when a job fires, with the task reference it was
/// registered for.
pub type CronCallback = Arc<
    dyn Fn(String, DateTime<Utc>) -> futures_util::future::BoxFuture<'static, ()> + Send + Sync,
>;

/// Cron scheduler that wraps `tokio-cron-scheduler::JobScheduler`.
pub struct CronScheduler {
    inner: Arc<RwLock<Option<JobScheduler>>>,
}

impl CronScheduler {
    /// Create a new cron scheduler (not yet started).
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(None)),
        }
    }

    /// Start the scheduler. Must be called before scheduling tasks.
    pub async fn start(&self) -> Result<(), SchedulerError> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| SchedulerError::JobError(e.to_string()))?;

        scheduler
            .start()
            .await
            .map_err(|e| SchedulerError::JobError(e.to_string()))?;

        *self.inner.write().await = Some(scheduler);

        tracing::info!("cron scheduler started");
        Ok(())
    }

    /// Stop the scheduler. Its jobs are dropped with it.
    pub async fn stop(&self) -> Result<(), SchedulerError> {
        if let Some(mut scheduler) = self.inner.write().await.take() {
            scheduler
                .shutdown()
                .await
                .map_err(|e| SchedulerError::JobError(e.to_string()))?;
            tracing::info!("cron scheduler stopped");
        }
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        self.inner.read().await.is_some()
    }

    /// Register `task` to fire on `schedule`. Returns the job id.
    ///
    /// The callback receives the task reference, not a resolved task, so it
    /// can look the task up fresh on every firing.
    pub async fn schedule_task(
        &self,
        task: &str,
        schedule: &str,
        callback: CronCallback,
    ) -> Result<Uuid, SchedulerError> {
        let cron_expr = normalize_schedule(schedule)?;

        let inner = self.inner.read().await;
        let scheduler = inner
            .as_ref()
            .ok_or_else(|| SchedulerError::JobError("scheduler not started".to_string()))?;

        let guard = OverlapGuard::default();
        let task_ref = task.to_string();
        let job = Job::new_async(cron_expr.as_str(), move |_uuid, _lock| {
            let cb = callback.clone();
            let guard = guard.clone();
            let task_ref = task_ref.clone();
            Box::pin(async move {
                let Some(_permit) = guard.try_enter() else {
                    tracing::warn!(task = %task_ref, "previous run still in progress, skipping firing");
                    return;
                };
                let now = Utc::now();
                tracing::debug!(task = %task_ref, %now, "cron trigger fired");
                cb(task_ref, now).await;
            })
        })
        .map_err(|e| SchedulerError::InvalidSchedule(e.to_string()))?;

        let job_id = job.guid();
        scheduler
            .add(job)
            .await
            .map_err(|e| SchedulerError::JobError(e.to_string()))?;

        tracing::info!(task, cron = %cron_expr, %job_id, "task scheduled");
        Ok(job_id)
    }
}

impl Default for CronScheduler {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
