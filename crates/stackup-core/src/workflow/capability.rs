//! Capability modules exposed to workflow expressions.
//!
//! A capability is a named bundle of JEXL transforms. The evaluator installs
//! each capability at most once by name. Built-in modules live here; the
//! notification module lives in stackup-infra because it needs HTTP.
//!
//! | Module | Transforms |
//! |--------|------------|
//! | `fs`   | `exists`, `isFile`, `isDir`, `readFile` |
//! | `env`  | `env`, `hasEnv` |
//! | `dev`  | `hasBinary`, `semverGte` |
//! | `vars` | `var`, `setVar` |
//! | `app`  | `appVersion` |

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{Value, json};

use super::context::VariableStore;

/// A single transform: receives the piped subject followed by its arguments.
pub type TransformFn = Box<dyn Fn(&[Value]) -> anyhow::Result<Value> + Send + Sync>;

/// A named module of transforms.
pub trait ScriptCapability: Send + Sync {
    fn name(&self) -> &'static str;

    fn transforms(&self) -> Vec<(&'static str, TransformFn)>;
}

/// Box a closure as a named transform.
pub fn transform<F>(name: &'static str, f: F) -> (&'static str, TransformFn)
where
    F: Fn(&[Value]) -> anyhow::Result<Value> + Send + Sync + 'static,
{
    (name, Box::new(f))
}

fn arg_str(args: &[Value], index: usize) -> anyhow::Result<&str> {
    args.get(index)
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow::anyhow!("expected a string argument at position {index}"))
}

// ---------------------------------------------------------------------------
// fs
// ---------------------------------------------------------------------------

/// Read-only filesystem checks relative to the working directory.
pub struct FsCapability {
    base: PathBuf,
}

impl FsCapability {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }
}

fn resolve(base: &Path, path: &str) -> PathBuf {
    let path = Path::new(path);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

impl ScriptCapability for FsCapability {
    fn name(&self) -> &'static str {
        "fs"
    }

    fn transforms(&self) -> Vec<(&'static str, TransformFn)> {
        let exists_base = self.base.clone();
        let file_base = self.base.clone();
        let dir_base = self.base.clone();
        let read_base = self.base.clone();

        vec![
            transform(
                "exists",
                move |args: &[Value]| {
                    Ok(json!(resolve(&exists_base, arg_str(args, 0)?).exists()))
                },
            ),
            transform(
                "isFile",
                move |args: &[Value]| {
                    Ok(json!(resolve(&file_base, arg_str(args, 0)?).is_file()))
                },
            ),
            transform(
                "isDir",
                move |args: &[Value]| {
                    Ok(json!(resolve(&dir_base, arg_str(args, 0)?).is_dir()))
                },
            ),
            transform(
                "readFile",
                move |args: &[Value]| {
                    let path = resolve(&read_base, arg_str(args, 0)?);
                    let contents = std::fs::read_to_string(&path)
                        .map_err(|e| anyhow::anyhow!("readFile {}: {e}", path.display()))?;
                    Ok(json!(contents))
                },
            ),
        ]
    }
}

// ---------------------------------------------------------------------------
// env
// ---------------------------------------------------------------------------

/// Environment lookups: exported workflow variables first, then the process env.
pub struct EnvCapability {
    variables: Arc<VariableStore>,
}

impl EnvCapability {
    pub fn new(variables: Arc<VariableStore>) -> Self {
        Self { variables }
    }
}

impl ScriptCapability for EnvCapability {
    fn name(&self) -> &'static str {
        "env"
    }

    fn transforms(&self) -> Vec<(&'static str, TransformFn)> {
        let env_vars = self.variables.clone();
        let has_vars = self.variables.clone();

        vec![
            transform(
                "env",
                move |args: &[Value]| {
                    let name = arg_str(args, 0)?;
                    Ok(env_vars
                        .env_value(name)
                        .map(Value::String)
                        .unwrap_or(Value::Null))
                },
            ),
            transform(
                "hasEnv",
                move |args: &[Value]| {
                    Ok(json!(has_vars.env_value(arg_str(args, 0)?).is_some()))
                },
            ),
        ]
    }
}

// ---------------------------------------------------------------------------
// dev
// ---------------------------------------------------------------------------

/// Developer tooling checks.
pub struct DevCapability;

/// Whether `name` resolves to an executable on `PATH`.
pub fn has_binary(name: &str) -> bool {
    if name.is_empty() {
        return false;
    }
    if name.contains(std::path::MAIN_SEPARATOR) {
        return is_executable(Path::new(name));
    }
    let Some(paths) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&paths).any(|dir| {
        if is_executable(&dir.join(name)) {
            return true;
        }
        cfg!(windows)
            && ["exe", "cmd", "bat"]
                .iter()
                .any(|ext| is_executable(&dir.join(format!("{name}.{ext}"))))
    })
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

fn parse_version(raw: &str) -> anyhow::Result<semver::Version> {
    let trimmed = raw.trim().trim_start_matches('v');
    semver::Version::parse(trimmed).map_err(|e| anyhow::anyhow!("invalid version '{raw}': {e}"))
}

impl ScriptCapability for DevCapability {
    fn name(&self) -> &'static str {
        "dev"
    }

    fn transforms(&self) -> Vec<(&'static str, TransformFn)> {
        vec![
            transform(
                "hasBinary",
                |args: &[Value]| Ok(json!(has_binary(arg_str(args, 0)?))),
            ),
            transform(
                "semverGte",
                |args: &[Value]| {
                    let actual = parse_version(arg_str(args, 0)?)?;
                    let required = parse_version(arg_str(args, 1)?)?;
                    Ok(json!(actual >= required))
                },
            ),
        ]
    }
}

// ---------------------------------------------------------------------------
// vars
// ---------------------------------------------------------------------------

/// Read and write workflow variables from expressions.
pub struct VarsCapability {
    variables: Arc<VariableStore>,
}

impl VarsCapability {
    pub fn new(variables: Arc<VariableStore>) -> Self {
        Self { variables }
    }
}

impl ScriptCapability for VarsCapability {
    fn name(&self) -> &'static str {
        "vars"
    }

    fn transforms(&self) -> Vec<(&'static str, TransformFn)> {
        let get_vars = self.variables.clone();
        let set_vars = self.variables.clone();

        vec![
            transform(
                "var",
                move |args: &[Value]| {
                    Ok(get_vars.get(arg_str(args, 0)?).unwrap_or(Value::Null))
                },
            ),
            transform(
                "setVar",
                move |args: &[Value]| {
                    let name = arg_str(args, 0)?;
                    let value = args.get(1).cloned().unwrap_or(Value::Null);
                    set_vars.set(name, value.clone());
                    Ok(value)
                },
            ),
        ]
    }
}

// ---------------------------------------------------------------------------
// app
// ---------------------------------------------------------------------------

/// Application metadata.
pub struct AppCapability {
    version: String,
}

impl AppCapability {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
        }
    }
}

impl ScriptCapability for AppCapability {
    fn name(&self) -> &'static str {
        "app"
    }

    fn transforms(&self) -> Vec<(&'static str, TransformFn)> {
        let version = self.version.clone();
        vec![transform("appVersion", move |_args: &[Value]| {
            Ok(json!(version))
        })]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::expression::WorkflowEvaluator;

    fn evaluator_with(capability: &dyn ScriptCapability) -> WorkflowEvaluator {
        WorkflowEvaluator::new().with_capability(capability)
    }

    #[test]
    fn test_fs_checks_relative_to_base() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("present.txt"), "hello").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let eval = evaluator_with(&FsCapability::new(dir.path()));
        let ctx = json!({});

        assert_eq!(eval.evaluate_value("'present.txt'|exists", &ctx).unwrap(), json!(true));
        assert_eq!(eval.evaluate_value("'missing.txt'|exists", &ctx).unwrap(), json!(false));
        assert_eq!(eval.evaluate_value("'present.txt'|isFile", &ctx).unwrap(), json!(true));
        assert_eq!(eval.evaluate_value("'sub'|isDir", &ctx).unwrap(), json!(true));
        assert_eq!(eval.evaluate_value("'present.txt'|readFile", &ctx).unwrap(), json!("hello"));
        assert!(eval.evaluate_value("'missing.txt'|readFile", &ctx).is_err());
    }

    #[test]
    fn test_env_prefers_exported_variables() {
        let store = Arc::new(VariableStore::new());
        store.set_exported("STACKUP_TEST_ONLY_VAR", "from-overlay");
        let eval = evaluator_with(&EnvCapability::new(store));
        let ctx = json!({});

        assert_eq!(
            eval.evaluate_value("'STACKUP_TEST_ONLY_VAR'|env", &ctx).unwrap(),
            json!("from-overlay")
        );
        assert_eq!(
            eval.evaluate_value("'STACKUP_DEFINITELY_UNSET_VAR'|hasEnv", &ctx).unwrap(),
            json!(false)
        );
    }

    #[test]
    fn test_semver_gte() {
        let eval = evaluator_with(&DevCapability);
        let ctx = json!({});
        assert_eq!(eval.evaluate_value("'1.10.0'|semverGte('1.9.3')", &ctx).unwrap(), json!(true));
        assert_eq!(eval.evaluate_value("'v1.2.0'|semverGte('2.0.0')", &ctx).unwrap(), json!(false));
        assert!(eval.evaluate_value("'banana'|semverGte('1.0.0')", &ctx).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_has_binary() {
        assert!(has_binary("sh"));
        assert!(!has_binary("definitely-not-a-real-binary-name"));
        assert!(!has_binary(""));
    }

    #[test]
    fn test_vars_set_then_get() {
        let store = Arc::new(VariableStore::new());
        let eval = evaluator_with(&VarsCapability::new(store.clone()));
        let ctx = json!({});

        assert_eq!(eval.evaluate_value("'greeting'|setVar('hi')", &ctx).unwrap(), json!("hi"));
        assert_eq!(eval.evaluate_value("'greeting'|var", &ctx).unwrap(), json!("hi"));
        assert_eq!(store.get("greeting"), Some(json!("hi")));
        assert_eq!(eval.evaluate_value("'nope'|var", &ctx).unwrap(), Value::Null);
    }

    #[test]
    fn test_app_version() {
        let eval = evaluator_with(&AppCapability::new("9.9.9"));
        assert_eq!(eval.evaluate_value("''|appVersion", &json!({})).unwrap(), json!("9.9.9"));
    }
}
