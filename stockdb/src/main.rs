use std::process::ExitCode;

use stockdb_core::config::Settings;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::supervisor::RestartPolicy;

mod setup_tracing;
mod supervisor;

#[tokio::main]
async fn main() -> ExitCode {
    setup_tracing::register();

    let settings = match Settings::load() {
        Ok(settings) => settings,
        Err(e) => {
            error!(?e, "Failed to load configuration");
            return ExitCode::FAILURE;
        }
    };

    let cln_token = CancellationToken::new();
    let shutdown_cln_token = cln_token.clone();

    // wait for SIG{INT,TERM} and invoke cancellation token.
    let shutdown_handle = tokio::spawn(async move {
        stockdb_core::shutdown_signal().await;
        shutdown_cln_token.cancel();
    });

    let policy = RestartPolicy {
        max_restarts: settings.max_restarts,
        backoff: settings.restart_backoff,
    };
    let outcome = supervisor::supervise(policy, cln_token.clone(), || {
        stockdb_core::run_pipeline(&settings, cln_token.clone())
    })
    .await;

    if !shutdown_handle.is_finished() {
        shutdown_handle.abort();
    }

    info!(?outcome, "Exiting...");
    outcome.into()
}
