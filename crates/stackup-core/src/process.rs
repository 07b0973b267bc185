//! Process runner port and the registry of detached processes.
//!
//! `ProcessRunner` is object-safe (boxed futures) so the workflow can hold a
//! single `Arc<dyn ProcessRunner>` regardless of the adapter. The registry is
//! owned by the workflow and passed by reference; there is no global map.

use std::collections::BTreeMap;
use std::path::PathBuf;

use dashmap::DashMap;
use futures_util::future::BoxFuture;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("failed to spawn '{command}': {reason}")]
    Spawn { command: String, reason: String },

    #[error("process wait failed: {0}")]
    Wait(String),

    #[error("failed to kill process: {0}")]
    Kill(String),
}

// ---------------------------------------------------------------------------
// Port
// ---------------------------------------------------------------------------

/// Everything a runner needs to launch one command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessSpec {
    /// Shell command line, run through the platform shell.
    pub command: String,
    pub cwd: Option<PathBuf>,
    /// Discard stdout/stderr instead of inheriting them.
    pub silent: bool,
    /// Extra environment on top of the inherited process environment.
    pub env: BTreeMap<String, String>,
}

/// Result of a command run to completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitReport {
    pub success: bool,
    pub code: Option<i32>,
}

/// Handle to a detached process.
pub trait RunningProcess: Send + Sync {
    fn pid(&self) -> Option<u32>;

    /// Terminate the process. A process that already exited is not an error.
    fn kill(&mut self) -> BoxFuture<'_, Result<(), ProcessError>>;
}

/// Spawns shell commands.
pub trait ProcessRunner: Send + Sync {
    fn run_to_completion<'a>(
        &'a self,
        spec: &'a ProcessSpec,
    ) -> BoxFuture<'a, Result<ExitReport, ProcessError>>;

    fn start_detached<'a>(
        &'a self,
        spec: &'a ProcessSpec,
    ) -> BoxFuture<'a, Result<Box<dyn RunningProcess>, ProcessError>>;
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Detached processes keyed by the owning task's `Uuid`.
#[derive(Default)]
pub struct ProcessRegistry {
    processes: DashMap<Uuid, RegisteredProcess>,
}

struct RegisteredProcess {
    name: String,
    handle: Box<dyn RunningProcess>,
}

/// Result of killing one registry entry.
#[derive(Debug)]
pub struct KillReport {
    pub uuid: Uuid,
    pub name: String,
    pub pid: Option<u32>,
    pub result: Result<(), ProcessError>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a detached process. A previous entry for the same task is
    /// replaced and returned so the caller can decide what to do with it.
    pub fn register(
        &self,
        uuid: Uuid,
        name: impl Into<String>,
        handle: Box<dyn RunningProcess>,
    ) -> Option<Box<dyn RunningProcess>> {
        self.processes
            .insert(
                uuid,
                RegisteredProcess {
                    name: name.into(),
                    handle,
                },
            )
            .map(|previous| previous.handle)
    }

    pub fn contains(&self, uuid: &Uuid) -> bool {
        self.processes.contains_key(uuid)
    }

    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    /// Remove and kill every registered process, one entry at a time.
    pub async fn kill_all(&self) -> Vec<KillReport> {
        let uuids: Vec<Uuid> = self.processes.iter().map(|entry| *entry.key()).collect();
        let mut reports = Vec::with_capacity(uuids.len());

        for uuid in uuids {
            // Removed before awaiting so no map guard is held across the kill.
            let Some((_, mut entry)) = self.processes.remove(&uuid) else {
                continue;
            };
            let pid = entry.handle.pid();
            let result = entry.handle.kill().await;
            match &result {
                Ok(()) => tracing::info!(%uuid, name = %entry.name, ?pid, "killed process"),
                Err(e) => tracing::warn!(%uuid, name = %entry.name, ?pid, error = %e, "failed to kill process"),
            }
            reports.push(KillReport {
                uuid,
                name: entry.name,
                pid,
                result,
            });
        }

        reports
    }
}
