//! Application state wiring.
//!
//! The driver and resolver are generic over cache, transport and hasher
//! ports; [`AppState`] pins them to the SQLite, reqwest and sha2 adapters.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use stackup_core::include::gateway::Gateway;
use stackup_core::include::resolver::IncludeResolver;
use stackup_core::workflow::capability::ScriptCapability;
use stackup_core::workflow::context::ExecutionContext;
use stackup_core::workflow::definition::{find_workflow_file, load_workflow_file};
use stackup_core::workflow::driver::WorkflowDriver;
use stackup_core::workflow::model::Workflow;
use stackup_infra::config::load_global_config;
use stackup_infra::crypto::hash::Sha2ContentHasher;
use stackup_infra::filesystem::{project_bucket, resolve_data_dir};
use stackup_infra::http::HttpTransport;
use stackup_infra::notify::NotifyCapability;
use stackup_infra::process::TokioProcessRunner;
use stackup_infra::sqlite::cache::SqliteIncludeCache;
use stackup_infra::sqlite::pool::{DatabasePool, database_url};

use crate::cli::reporter::ConsoleReporter;

pub type ConcreteResolver = IncludeResolver<SqliteIncludeCache, HttpTransport, Sha2ContentHasher>;

pub type ConcreteDriver = WorkflowDriver<SqliteIncludeCache, HttpTransport, Sha2ContentHasher>;

pub struct AppState {
    pub driver: ConcreteDriver,
    pub workflow_path: PathBuf,
    pub data_dir: PathBuf,
}

impl AppState {
    /// Load the workflow from `working_dir` (or `config`) and wire every adapter.
    pub async fn init(working_dir: &Path, config: Option<&Path>) -> anyhow::Result<Self> {
        let workflow_path = find_workflow_file(working_dir, config)?;
        let (definition, warnings) = load_workflow_file(&workflow_path)
            .with_context(|| format!("failed to load {}", workflow_path.display()))?;
        for warning in &warnings {
            tracing::warn!(file = %workflow_path.display(), "{warning}");
        }

        let data_dir = resolve_data_dir();
        tokio::fs::create_dir_all(&data_dir)
            .await
            .with_context(|| format!("failed to create {}", data_dir.display()))?;
        let global = load_global_config(&data_dir).await;

        let db_pool = DatabasePool::new(&database_url(&data_dir))
            .await
            .context("failed to open the include cache")?;
        let bucket = project_bucket(working_dir);
        tracing::debug!(data_dir = %data_dir.display(), %bucket, "include cache ready");

        let timeout = Duration::from_secs(global.http_timeout_secs);
        let transport = HttpTransport::new(timeout)?;
        let notify_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build notification client")?;
        let notify = NotifyCapability::new(notify_client, &definition.settings.notifications);

        let gateway = Gateway::from_settings(&definition.settings, &global.default_allowed_domains);
        let extra: [&dyn ScriptCapability; 1] = [&notify];
        let context = ExecutionContext::new(working_dir, env!("CARGO_PKG_VERSION"), &extra);
        let workflow = Arc::new(Workflow::new(
            definition,
            context,
            Arc::new(TokioProcessRunner::new()),
            Arc::new(ConsoleReporter::new()),
        ));

        let resolver: Arc<ConcreteResolver> = Arc::new(IncludeResolver::new(
            Arc::new(SqliteIncludeCache::new(db_pool, bucket)),
            Arc::new(transport),
            Arc::new(Sha2ContentHasher::new()),
            Arc::new(gateway),
            global.default_cache_ttl_minutes,
        ));

        Ok(Self {
            driver: WorkflowDriver::new(workflow, resolver),
            workflow_path,
            data_dir,
        })
    }
}
