//! Workflow definition types for stackup.
//!
//! `WorkflowDefinition` is the deserialized shape of a `stackup.yaml` file and
//! of every remote fragment pulled in through `includes`. The runtime model
//! (tasks with run counters, the process registry, merged include content)
//! lives in `stackup-core`; this module only describes what is on disk.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Workflow Definition
// ---------------------------------------------------------------------------

/// The parsed workflow file.
///
/// Every section is optional so that include fragments (which usually carry
/// only `preconditions` and `tasks`) deserialize with the same type.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct WorkflowDefinition {
    /// Project name shown in the transcript header.
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default)]
    pub settings: Settings,
    /// Variables evaluated in order at startup, after includes are merged.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vars: Vec<VariableDefinition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub includes: Vec<IncludeDefinition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub preconditions: Vec<PreconditionDefinition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub startup: Vec<TaskReference>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub shutdown: Vec<TaskReference>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub servers: Vec<TaskReference>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scheduler: Vec<ScheduledTaskDefinition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tasks: Vec<TaskDefinition>,
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

/// A task as written in the workflow file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TaskDefinition {
    /// Identifier used by startup/shutdown/server/scheduler references.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Shell command, or a `{{ expression }}` evaluating to one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Guard expression; the task is skipped unless it evaluates to `true`.
    #[serde(rename = "if", default, skip_serializing_if = "Option::is_none")]
    pub if_expr: Option<String>,
    /// Host OS allow-list. Empty means every platform.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platforms: Option<Vec<String>>,
    /// Maximum number of runs; `0` or absent means unbounded.
    #[serde(default, alias = "maxRuns", skip_serializing_if = "Option::is_none")]
    pub max_runs: Option<u32>,
    /// Working directory, literal or expression (`$VAR` shorthand accepted).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub silent: Option<bool>,
}

/// A reference to a task by id (or by an expression evaluating to an id).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskReference {
    pub task: String,
}

/// A task registered with the cron scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledTaskDefinition {
    pub task: String,
    /// 5/6-field cron expression or a human-readable schedule ("every 5 minutes").
    pub cron: String,
}

// ---------------------------------------------------------------------------
// Preconditions
// ---------------------------------------------------------------------------

/// A check that must pass before startup tasks run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PreconditionDefinition {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check: Option<CheckSource>,
    /// Remediation: a task id, or a `{{ expression }}`.
    #[serde(default, alias = "onFail", skip_serializing_if = "Option::is_none")]
    pub on_fail: Option<String>,
    #[serde(default, alias = "maxRetries", skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
}

/// A precondition check as written: either a YAML boolean or a script string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CheckSource {
    Literal(bool),
    Script(String),
}

// ---------------------------------------------------------------------------
// Includes
// ---------------------------------------------------------------------------

/// A remote or local workflow fragment to merge into this workflow.
///
/// Exactly one of `url` or `file` is expected. `url` accepts `http(s)://`,
/// the `gh:` shorthand, and `s3:<endpoint>/<bucket>/<key>`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct IncludeDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    /// Extra request headers as `Name: value` strings.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<String>,
    /// Per-include checksum toggle; falls back to the global setting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verify: Option<bool>,
    /// Checksum file tried before the standard candidate list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<String>,
    /// S3 only: use https (default) or plain http.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secure: Option<bool>,
}

impl IncludeDefinition {
    /// Stable display name, also used as the cache key.
    pub fn display_name(&self) -> String {
        match (&self.url, &self.file) {
            (Some(url), _) => url.clone(),
            (None, Some(file)) => file.clone(),
            (None, None) => "<empty include>".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Variables
// ---------------------------------------------------------------------------

/// A workflow variable, evaluated at startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VariableDefinition {
    pub name: String,
    /// Literal value or `{{ expression }}`.
    #[serde(default)]
    pub value: String,
    /// Also expose the value to spawned commands' environment.
    #[serde(default)]
    pub export: bool,
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

fn default_true() -> bool {
    true
}

/// Workflow-level settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Settings {
    /// Global checksum-verification toggle for includes.
    #[serde(default = "default_true")]
    pub checksum_verification: bool,
    /// Terminate the run when a verified include's checksum does not match.
    #[serde(default = "default_true")]
    pub exit_on_checksum_mismatch: bool,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub domains: DomainSettings,
    #[serde(default)]
    pub gateway: GatewaySettings,
    #[serde(default)]
    pub notifications: NotificationSettings,
    #[serde(default)]
    pub defaults: DefaultSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            checksum_verification: true,
            exit_on_checksum_mismatch: true,
            cache: CacheSettings::default(),
            domains: DomainSettings::default(),
            gateway: GatewaySettings::default(),
            notifications: NotificationSettings::default(),
            defaults: DefaultSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CacheSettings {
    /// Include cache TTL; falls back to the global config default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_minutes: Option<i64>,
}

/// Domain allow/deny lists and per-host policies for the gateway.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DomainSettings {
    #[serde(default)]
    pub allowed: Vec<String>,
    #[serde(default)]
    pub blocked: Vec<String>,
    #[serde(default)]
    pub hosts: Vec<HostSettings>,
}

/// Policy for requests to hosts matching `hostname` (exact or glob).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct HostSettings {
    pub hostname: String,
    #[serde(default)]
    pub headers: Vec<String>,
    #[serde(default)]
    pub content_types: ContentTypeSettings,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContentTypeSettings {
    #[serde(default)]
    pub allowed: Vec<String>,
    #[serde(default)]
    pub blocked: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GatewaySettings {
    /// When false every gateway check is bypassed.
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub content_types: ContentTypeSettings,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            content_types: ContentTypeSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slack: Option<SlackSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub telegram: Option<TelegramSettings>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SlackSettings {
    pub webhook_url: String,
    #[serde(default)]
    pub channels: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TelegramSettings {
    pub api_key: String,
    #[serde(default)]
    pub chat_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DefaultSettings {
    #[serde(default)]
    pub tasks: TaskDefaults,
}

/// Values applied to tasks that leave the corresponding field unset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskDefaults {
    #[serde(default)]
    pub silent: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default)]
    pub platforms: Vec<String>,
}
