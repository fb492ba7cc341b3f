use std::future::Future;
use std::process::ExitCode;
use std::time::Duration;

use stockdb_core::Error;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// How often a failed pipeline is restarted, and how long to wait before each restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RestartPolicy {
    pub(crate) max_restarts: u16,
    pub(crate) backoff: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    /// shutdown was requested
    Stopped,
    /// the pipeline kept failing, or failed in a way a restart cannot fix
    Failed,
}

impl From<Outcome> for ExitCode {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Stopped => ExitCode::SUCCESS,
            Outcome::Failed => ExitCode::FAILURE,
        }
    }
}

/// Runs `pipeline` until shutdown is requested through `cancel`, restarting it when it fails.
/// Configuration errors are not retried.
pub(crate) async fn supervise<F, Fut>(
    policy: RestartPolicy,
    cancel: CancellationToken,
    mut pipeline: F,
) -> Outcome
where
    F: FnMut() -> Fut,
    Fut: Future<Output = stockdb_core::Result<()>>,
{
    let mut failures: u16 = 0;
    loop {
        let result = pipeline().await;
        if cancel.is_cancelled() {
            if let Err(e) = result {
                warn!(?e, "Pipeline failed while shutting down");
            }
            info!("Shutdown requested, not restarting the pipeline");
            return Outcome::Stopped;
        }

        match result {
            Ok(()) => warn!("Pipeline stopped without a shutdown request, restarting it"),
            Err(e @ Error::Config(_)) => {
                error!(?e, "Invalid configuration, giving up");
                return Outcome::Failed;
            }
            Err(e) => {
                failures += 1;
                error!(
                    ?e,
                    restart = failures,
                    max_restarts = policy.max_restarts,
                    "Pipeline failed"
                );
                if failures >= policy.max_restarts {
                    error!(failures, "Maximum number of restarts reached, exiting");
                    return Outcome::Failed;
                }
            }
        }

        info!(
            backoff_secs = policy.backoff.as_secs(),
            "Restarting the pipeline after backoff"
        );
        tokio::select! {
            _ = cancel.cancelled() => return Outcome::Stopped,
            _ = sleep(policy.backoff) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU16, Ordering};

    use super::*;

    const POLICY: RestartPolicy = RestartPolicy {
        max_restarts: 5,
        backoff: Duration::from_secs(5),
    };

    #[tokio::test(start_paused = true)]
    async fn test_exits_after_max_restarts() {
        let runs = Arc::new(AtomicU16::new(0));
        let counter = Arc::clone(&runs);

        let outcome = supervise(POLICY, CancellationToken::new(), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::Source("connection refused".into())) }
        })
        .await;

        assert_eq!(outcome, Outcome::Failed);
        assert_eq!(runs.load(Ordering::SeqCst), 5);
        assert_eq!(ExitCode::from(outcome), ExitCode::FAILURE);
    }

    #[tokio::test(start_paused = true)]
    async fn test_graceful_stop() {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let outcome = supervise(POLICY, cancel, move || {
            let token = token.clone();
            async move {
                token.cancel();
                Ok(())
            }
        })
        .await;

        assert_eq!(outcome, Outcome::Stopped);
        assert_eq!(ExitCode::from(outcome), ExitCode::SUCCESS);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_failures() {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let runs = Arc::new(AtomicU16::new(0));
        let counter = Arc::clone(&runs);

        // fails four times, then runs until shutdown
        let outcome = supervise(POLICY, cancel, move || {
            let run = counter.fetch_add(1, Ordering::SeqCst) + 1;
            let token = token.clone();
            async move {
                if run < 5 {
                    return Err(Error::Sink("write failed".into()));
                }
                token.cancel();
                Ok(())
            }
        })
        .await;

        assert_eq!(outcome, Outcome::Stopped);
        assert_eq!(runs.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_config_error_is_not_retried() {
        let runs = Arc::new(AtomicU16::new(0));
        let counter = Arc::clone(&runs);

        let outcome = supervise(POLICY, CancellationToken::new(), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::Config("bad url".into())) }
        })
        .await;

        assert_eq!(outcome, Outcome::Failed);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unexpected_return_does_not_count_as_failure() {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let runs = Arc::new(AtomicU16::new(0));
        let counter = Arc::clone(&runs);

        // returns Ok without a shutdown request more often than the restart limit
        let outcome = supervise(POLICY, cancel, move || {
            let run = counter.fetch_add(1, Ordering::SeqCst) + 1;
            let token = token.clone();
            async move {
                if run == 8 {
                    token.cancel();
                }
                Ok(())
            }
        })
        .await;

        assert_eq!(outcome, Outcome::Stopped);
        assert_eq!(runs.load(Ordering::SeqCst), 8);
    }
}
