//! `stackup init`: scaffold a starter workflow file.

use std::path::{Path, PathBuf};

use anyhow::{Context, bail};

const STARTER_FILE: &str = "stackup.yaml";

const STARTER_WORKFLOW: &str = r#"name: my-project
description: Development workflow
version: 1.0.0

settings:
  checksum-verification: true
  exit-on-checksum-mismatch: true
  domains:
    allowed:
      - raw.githubusercontent.com

preconditions:
  - name: git is installed
    check: "'git'|hasBinary"

startup:
  - task: hello

servers: []

shutdown:
  - task: goodbye

scheduler: []

tasks:
  - id: hello
    name: Say hello
    command: echo "stackup is running"

  - id: goodbye
    name: Say goodbye
    command: echo "stackup stopped"
"#;

/// Write the starter workflow into `dir`. An existing file is only replaced
/// with `force`.
pub async fn init_workflow(dir: &Path, force: bool) -> anyhow::Result<PathBuf> {
    let path = dir.join(STARTER_FILE);

    let exists = tokio::fs::try_exists(&path)
        .await
        .with_context(|| format!("failed to inspect {}", path.display()))?;
    if exists && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }

    tokio::fs::write(&path, STARTER_WORKFLOW)
        .await
        .with_context(|| format!("failed to write {}", path.display()))?;
    tracing::info!(path = %path.display(), "starter workflow written");

    Ok(path)
}

#[cfg(test)]
mod tests {
    use stackup_core::workflow::definition::parse_workflow_yaml;

    use super::*;

    #[test]
    fn test_starter_workflow_is_valid() {
        let (def, warnings) = parse_workflow_yaml(STARTER_WORKFLOW).unwrap();
        assert_eq!(def.name, "my-project");
        assert_eq!(def.tasks.len(), 2);
        assert!(warnings.is_empty(), "unexpected warnings: {warnings:?}");
    }

    #[tokio::test]
    async fn test_init_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = init_workflow(dir.path(), false).await.unwrap();
        assert_eq!(path, dir.path().join("stackup.yaml"));
        let written = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(written, STARTER_WORKFLOW);
    }

    #[tokio::test]
    async fn test_init_refuses_to_overwrite_without_force() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stackup.yaml");
        tokio::fs::write(&path, "name: mine\n").await.unwrap();

        let err = init_workflow(dir.path(), false).await.unwrap_err();
        assert!(err.to_string().contains("already exists"));
        assert_eq!(tokio::fs::read_to_string(&path).await.unwrap(), "name: mine\n");

        init_workflow(dir.path(), true).await.unwrap();
        assert_eq!(tokio::fs::read_to_string(&path).await.unwrap(), STARTER_WORKFLOW);
    }
}
