//! Workflow definition parsing, validation, and filesystem operations.
//!
//! Converts between YAML files and `WorkflowDefinition`, validates structural
//! constraints (unique task ids, include locators, schedules), and locates the
//! workflow file in a project directory.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use stackup_types::workflow::WorkflowDefinition;
use thiserror::Error;

use super::expression::is_evaluatable_script_string;
use super::scheduler::normalize_schedule;

/// File names tried, in order, when no `--config` is given.
pub const DEFAULT_WORKFLOW_FILES: [&str; 3] = ["stackup.yaml", "stackup.yml", "stackup.dist.yaml"];

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur while loading or driving a workflow.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// YAML parse failure.
    #[error("parse error: {0}")]
    ParseError(String),

    /// Structural validation failure.
    #[error("validation error: {0}")]
    ValidationError(String),

    /// Filesystem I/O failure.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("no workflow file found in {0} (tried stackup.yaml, stackup.yml, stackup.dist.yaml)")]
    NotFound(PathBuf),

    /// A task reference did not resolve to exactly one task.
    #[error("task reference '{0}' did not resolve to a task")]
    UnresolvedReference(String),

    #[error("expression error: {0}")]
    ExpressionError(String),

    #[error("execution error: {0}")]
    ExecutionError(String),
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a workflow file's YAML and validate it.
///
/// Returns the definition together with non-fatal warnings (references to
/// tasks that an include may still supply).
pub fn parse_workflow_yaml(yaml: &str) -> Result<(WorkflowDefinition, Vec<String>), WorkflowError> {
    let def: WorkflowDefinition =
        serde_yaml_ng::from_str(yaml).map_err(|e| WorkflowError::ParseError(e.to_string()))?;
    let warnings = validate_definition(&def)?;
    Ok((def, warnings))
}

/// Parse an include fragment. Fragments only need unique task ids; their
/// references are not checked because they are never driven directly.
pub fn parse_fragment_yaml(yaml: &str) -> Result<WorkflowDefinition, WorkflowError> {
    let def: WorkflowDefinition =
        serde_yaml_ng::from_str(yaml).map_err(|e| WorkflowError::ParseError(e.to_string()))?;
    check_unique_task_ids(&def)?;
    Ok(def)
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn check_unique_task_ids(def: &WorkflowDefinition) -> Result<HashSet<&str>, WorkflowError> {
    let mut seen_ids = HashSet::new();
    for task in &def.tasks {
        if let Some(id) = task.id.as_deref() {
            if !seen_ids.insert(id) {
                return Err(WorkflowError::ValidationError(format!(
                    "duplicate task id: '{id}'"
                )));
            }
        }
    }
    Ok(seen_ids)
}

/// Validate structural constraints on a `WorkflowDefinition`.
///
/// Errors:
/// - Duplicate task ids
/// - Includes with neither `url` nor `file`, or with both
/// - Scheduler entries whose schedule does not normalize to a cron expression
///
/// Warnings (returned, not fatal):
/// - Literal startup/shutdown/server/scheduler references to undeclared ids,
///   since includes merge later and may supply them
pub fn validate_definition(def: &WorkflowDefinition) -> Result<Vec<String>, WorkflowError> {
    let ids = check_unique_task_ids(def)?;

    for include in &def.includes {
        match (&include.url, &include.file) {
            (Some(_), Some(_)) => {
                return Err(WorkflowError::ValidationError(format!(
                    "include '{}' sets both url and file",
                    include.display_name()
                )));
            }
            (None, None) => {
                return Err(WorkflowError::ValidationError(
                    "include must set either url or file".to_string(),
                ));
            }
            _ => {}
        }
    }

    for entry in &def.scheduler {
        normalize_schedule(&entry.cron).map_err(|e| {
            WorkflowError::ValidationError(format!("scheduled task '{}': {e}", entry.task))
        })?;
    }

    let mut warnings = Vec::new();
    let references = def
        .startup
        .iter()
        .map(|r| ("startup", r.task.as_str()))
        .chain(def.shutdown.iter().map(|r| ("shutdown", r.task.as_str())))
        .chain(def.servers.iter().map(|r| ("servers", r.task.as_str())))
        .chain(def.scheduler.iter().map(|r| ("scheduler", r.task.as_str())));
    for (section, task) in references {
        if is_evaluatable_script_string(task) || ids.contains(task) {
            continue;
        }
        if def.includes.is_empty() {
            warnings.push(format!("{section} references unknown task '{task}'"));
        } else {
            warnings.push(format!(
                "{section} references task '{task}' which is not declared locally; an include must provide it"
            ));
        }
    }

    Ok(warnings)
}

// ---------------------------------------------------------------------------
// Filesystem operations
// ---------------------------------------------------------------------------

/// Load and validate a workflow file.
pub fn load_workflow_file(path: &Path) -> Result<(WorkflowDefinition, Vec<String>), WorkflowError> {
    let content = std::fs::read_to_string(path)?;
    parse_workflow_yaml(&content)
}

/// Find the workflow file: an explicit path wins, otherwise the first default
/// file name that exists in `dir`.
pub fn find_workflow_file(dir: &Path, explicit: Option<&Path>) -> Result<PathBuf, WorkflowError> {
    if let Some(path) = explicit {
        let path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            dir.join(path)
        };
        return if path.is_file() {
            Ok(path)
        } else {
            Err(WorkflowError::IoError(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("workflow file {} does not exist", path.display()),
            )))
        };
    }

    DEFAULT_WORKFLOW_FILES
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.is_file())
        .ok_or_else(|| WorkflowError::NotFound(dir.to_path_buf()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_workflow() {
        let yaml = r#"
name: demo
startup:
  - task: build
tasks:
  - id: build
    command: make
"#;
        let (def, warnings) = parse_workflow_yaml(yaml).unwrap();
        assert_eq!(def.name, "demo");
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_duplicate_task_ids_rejected() {
        let yaml = r#"
tasks:
  - id: a
    command: x
  - id: a
    command: y
"#;
        let err = parse_workflow_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("duplicate task id"));
    }

    #[test]
    fn test_tasks_without_ids_are_not_duplicates() {
        let yaml = "tasks:\n  - command: a\n  - command: b\n";
        assert!(parse_workflow_yaml(yaml).is_ok());
    }

    #[test]
    fn test_unknown_reference_is_warning() {
        let yaml = r#"
includes:
  - url: https://raw.githubusercontent.com/org/repo/main/php.yaml
servers:
  - task: php-server
"#;
        let (_, warnings) = parse_workflow_yaml(yaml).unwrap();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("php-server"));
    }

    #[test]
    fn test_expression_reference_not_warned() {
        let yaml = "startup:\n  - task: \"{{ vars.first }}\"\n";
        let (_, warnings) = parse_workflow_yaml(yaml).unwrap();
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_invalid_schedule_rejected() {
        let yaml = r#"
scheduler:
  - task: backup
    cron: "whenever you like"
tasks:
  - id: backup
    command: ./backup.sh
"#;
        assert!(matches!(
            parse_workflow_yaml(yaml),
            Err(WorkflowError::ValidationError(_))
        ));
    }

    #[test]
    fn test_include_requires_single_locator() {
        assert!(parse_workflow_yaml("includes:\n  - headers: []\n").is_err());
        assert!(parse_workflow_yaml("includes:\n  - url: a\n    file: b\n").is_err());
    }

    #[test]
    fn test_fragment_skips_reference_checks() {
        let yaml = "startup:\n  - task: nowhere\ntasks:\n  - id: lint\n    command: x\n";
        let def = parse_fragment_yaml(yaml).unwrap();
        assert_eq!(def.tasks.len(), 1);
    }

    #[test]
    fn test_malformed_yaml() {
        assert!(matches!(
            parse_workflow_yaml("tasks: [unclosed"),
            Err(WorkflowError::ParseError(_))
        ));
    }

    #[test]
    fn test_find_workflow_file_order() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            find_workflow_file(dir.path(), None),
            Err(WorkflowError::NotFound(_))
        ));

        std::fs::write(dir.path().join("stackup.dist.yaml"), "name: dist").unwrap();
        std::fs::write(dir.path().join("stackup.yml"), "name: yml").unwrap();
        let found = find_workflow_file(dir.path(), None).unwrap();
        assert_eq!(found.file_name().unwrap(), "stackup.yml");

        let explicit = find_workflow_file(dir.path(), Some(Path::new("stackup.dist.yaml"))).unwrap();
        assert_eq!(explicit.file_name().unwrap(), "stackup.dist.yaml");
        assert!(find_workflow_file(dir.path(), Some(Path::new("missing.yaml"))).is_err());
    }

    #[test]
    fn test_load_workflow_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stackup.yaml");
        std::fs::write(&path, "name: file-test\ntasks:\n  - id: a\n    command: echo a\n").unwrap();
        let (def, _) = load_workflow_file(&path).unwrap();
        assert_eq!(def.name, "file-test");
        assert_eq!(def.tasks.len(), 1);
    }
}
