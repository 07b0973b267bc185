//! Data directory and per-project cache bucket resolution.

use std::path::{Path, PathBuf};

/// Resolve the data directory (holds `config.toml` and `cache.db`).
///
/// Priority:
/// 1. `STACKUP_DATA_DIR` environment variable
/// 2. Platform config directory (`~/.config/stackup` on Linux)
/// 3. `./.stackup`
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("STACKUP_DATA_DIR") {
        return PathBuf::from(dir);
    }

    if let Some(config) = dirs::config_dir() {
        return config.join("stackup");
    }

    PathBuf::from(".stackup")
}

/// Cache bucket for a project: the working directory's basename.
pub fn project_bucket(working_dir: &Path) -> String {
    working_dir
        .file_name()
        .and_then(|name| name.to_str())
        .filter(|name| !name.is_empty())
        .unwrap_or("default")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_bucket_uses_basename() {
        assert_eq!(project_bucket(Path::new("/home/dev/projects/shop")), "shop");
        assert_eq!(project_bucket(Path::new("/")), "default");
    }

    #[test]
    fn test_resolve_data_dir_is_not_empty() {
        assert!(!resolve_data_dir().as_os_str().is_empty());
    }
}
