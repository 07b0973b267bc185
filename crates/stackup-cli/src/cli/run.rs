//! Default command: run the workflow until a termination signal.

use std::path::Path;
use std::process::ExitCode;

use console::style;
use stackup_core::workflow::driver::RunOutcome;
use tokio_util::sync::CancellationToken;

use crate::cli::reporter::print_header;
use crate::state::AppState;

pub async fn run_workflow(working_dir: &Path, config: Option<&Path>) -> anyhow::Result<ExitCode> {
    let state = AppState::init(working_dir, config).await?;
    tracing::debug!(
        workflow = %state.workflow_path.display(),
        data_dir = %state.data_dir.display(),
        "workflow loaded"
    );
    print_header(
        &state.driver.workflow().name,
        &state.workflow_path.display().to_string(),
    );

    tokio::spawn(cancel_on_signal(state.driver.cancellation_token()));

    let outcome = state.driver.run().await;
    state.driver.shutdown().await;

    match outcome {
        RunOutcome::Completed => Ok(ExitCode::SUCCESS),
        RunOutcome::Halted { reason } => {
            eprintln!("{} {reason}", style("stackup halted:").red().bold());
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn cancel_on_signal(token: CancellationToken) {
    shutdown_signal().await;
    tracing::info!("termination signal received, shutting down");
    token.cancel();
}

/// Resolves on Ctrl+C, or on SIGTERM, SIGHUP or SIGQUIT on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    {
        use tokio::signal::unix::SignalKind;

        tokio::select! {
            () = ctrl_c => {},
            () = unix_signal(SignalKind::terminate()) => {},
            () = unix_signal(SignalKind::hangup()) => {},
            () = unix_signal(SignalKind::quit()) => {},
        }
    }

    #[cfg(not(unix))]
    ctrl_c.await;
}

#[cfg(unix)]
async fn unix_signal(kind: tokio::signal::unix::SignalKind) {
    match tokio::signal::unix::signal(kind) {
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(e) => {
            tracing::warn!(error = %e, "failed to install signal handler");
            std::future::pending::<()>().await;
        }
    }
}
