//! Runs long-lived app processes side by side and shuts them down together.
//!
//! Every process gets a clone of one [`CancellationToken`]. The token is cancelled on
//! SIGINT/SIGTERM, or as soon as any process fails. Once all processes have stopped,
//! closers run concurrently under a timeout.
//!
//! ```no_run
//! use connectivity_runner::Runner;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     Runner::new()
//!         .with_app_process("ticker", |ctx| async move {
//!             loop {
//!                 tokio::select! {
//!                     _ = ctx.cancelled() => break,
//!                     _ = tokio::time::sleep(Duration::from_secs(1)) => tracing::info!("tick"),
//!                 }
//!             }
//!             Ok(())
//!         })
//!         .with_closer(|| async move { Ok(()) })
//!         .with_closer_timeout(Duration::from_secs(5))
//!         .run()
//!         .await;
//! }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub type ProcessFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// A long-running process; returns when its token is cancelled or it fails
pub type AppProcess = Box<dyn FnOnce(CancellationToken) -> ProcessFuture + Send>;

/// Cleanup run after every process has stopped
pub type Closer = Box<dyn FnOnce() -> ProcessFuture + Send>;

/// Box a process closure into an [`AppProcess`]
pub fn app_process<F, Fut>(process: F) -> AppProcess
where
    F: FnOnce(CancellationToken) -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Box::new(move |token| -> ProcessFuture { Box::pin(process(token)) })
}

pub struct Runner {
    app_processes: Vec<(String, AppProcess)>,
    closers: Vec<Closer>,
    closer_timeout: Duration,
    cancellation_token: CancellationToken,
}

impl Default for Runner {
    fn default() -> Self {
        Self::new()
    }
}

impl Runner {
    /// Closer timeout defaults to 10 seconds
    pub fn new() -> Self {
        Self {
            app_processes: Vec::new(),
            closers: Vec::new(),
            closer_timeout: Duration::from_secs(10),
            cancellation_token: CancellationToken::new(),
        }
    }

    pub fn with_app_process<F, Fut>(self, name: impl Into<String>, process: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.with_named_process(name, app_process(process))
    }

    pub fn with_named_process(mut self, name: impl Into<String>, process: AppProcess) -> Self {
        self.app_processes.push((name.into(), process));
        self
    }

    pub fn with_closer<F, Fut>(mut self, closer: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.closers
            .push(Box::new(move || -> ProcessFuture { Box::pin(closer()) }));
        self
    }

    pub fn with_closer_timeout(mut self, timeout: Duration) -> Self {
        self.closer_timeout = timeout;
        self
    }

    /// Share cancellation with the caller
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = token;
        self
    }

    /// Run to completion and exit the process: code 1 if any app process failed
    pub async fn run(self) {
        match self.run_until_stopped().await {
            Ok(()) => {
                info!("application exiting normally");
                std::process::exit(0);
            }
            Err(e) => {
                error!(error = %format!("{e:#}"), "application exiting with error");
                std::process::exit(1);
            }
        }
    }

    /// Run every process until cancellation or the first failure, then run closers.
    ///
    /// Returns the first process error, if any.
    pub async fn run_until_stopped(self) -> anyhow::Result<()> {
        let token = self.cancellation_token;
        let mut join_set = JoinSet::new();

        for (name, process) in self.app_processes {
            let process_token = token.clone();
            join_set.spawn(async move {
                debug!(process = %name, "starting app process");
                let result = process(process_token).await;
                (name, result)
            });
        }

        spawn_signal_handlers(token.clone());

        let mut first_error = None;
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((name, Ok(()))) => {
                    debug!(process = %name, "app process stopped");
                }
                Ok((name, Err(e))) => {
                    if !token.is_cancelled() {
                        error!(process = %name, error = %format!("{e:#}"), "app process failed");
                        first_error = Some(e.context(format!("process {name} failed")));
                        token.cancel();
                    } else {
                        warn!(process = %name, error = %e, "app process failed during shutdown");
                    }
                }
                Err(e) => {
                    error!(error = %e, "app process panicked");
                    token.cancel();
                }
            }

            if token.is_cancelled() {
                break;
            }
        }

        join_set.shutdown().await;

        if !self.closers.is_empty() {
            info!(timeout = ?self.closer_timeout, "running closers");
            if tokio::time::timeout(self.closer_timeout, run_closers(self.closers))
                .await
                .is_err()
            {
                error!(timeout = ?self.closer_timeout, "closers timed out");
            }
        }

        first_error.map_or(Ok(()), Err)
    }
}

fn spawn_signal_handlers(token: CancellationToken) {
    let ctrl_c_token = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received SIGINT, shutting down");
                ctrl_c_token.cancel();
            }
            Err(e) => error!(error = %e, "failed to listen for SIGINT"),
        }
    });

    #[cfg(unix)]
    tokio::spawn(async move {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                info!("received SIGTERM, shutting down");
                token.cancel();
            }
            Err(e) => error!(error = %e, "failed to listen for SIGTERM"),
        }
    });
}

async fn run_closers(closers: Vec<Closer>) {
    let mut closer_set = JoinSet::new();
    for closer in closers {
        closer_set.spawn(closer());
    }

    while let Some(joined) = closer_set.join_next().await {
        match joined {
            Ok(Ok(())) => debug!("closer completed"),
            Ok(Err(e)) => error!(error = %format!("{e:#}"), "closer failed"),
            Err(e) => error!(error = %e, "closer panicked"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    async fn wait_for_cancel(ctx: CancellationToken) -> anyhow::Result<()> {
        ctx.cancelled().await;
        Ok(())
    }

    #[tokio::test]
    async fn test_cancellation_stops_processes_and_runs_closers() {
        let closed = Arc::new(AtomicBool::new(false));
        let closed_flag = Arc::clone(&closed);
        let token = CancellationToken::new();

        let runner = Runner::new()
            .with_app_process("first", wait_for_cancel)
            .with_app_process("second", wait_for_cancel)
            .with_closer(move || async move {
                closed_flag.store(true, Ordering::SeqCst);
                Ok(())
            })
            .with_cancellation_token(token.clone());

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        assert!(runner.run_until_stopped().await.is_ok());
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_failing_process_cancels_the_rest() {
        let token = CancellationToken::new();

        let runner = Runner::new()
            .with_app_process("healthy", wait_for_cancel)
            .with_app_process("broken", |_ctx| async move {
                Err(anyhow::anyhow!("lost connection"))
            });

        let err = runner
            .with_cancellation_token(token.clone())
            .run_until_stopped()
            .await
            .unwrap_err();

        assert!(token.is_cancelled());
        assert!(format!("{err:#}").contains("process broken failed"));
        assert!(format!("{err:#}").contains("lost connection"));
    }

    #[tokio::test]
    async fn test_slow_closer_is_abandoned_after_timeout() {
        let token = CancellationToken::new();
        token.cancel();

        let runner = Runner::new()
            .with_app_process("idle", wait_for_cancel)
            .with_closer(|| async move {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            })
            .with_closer_timeout(Duration::from_millis(20))
            .with_cancellation_token(token);

        let started = std::time::Instant::now();
        assert!(runner.run_until_stopped().await.is_ok());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_named_process() {
        let ran = Arc::new(AtomicBool::new(false));
        let ran_flag = Arc::clone(&ran);
        let token = CancellationToken::new();
        let process_token = token.clone();

        let runner = Runner::new()
            .with_named_process(
                "boxed",
                app_process(move |_ctx| async move {
                    ran_flag.store(true, Ordering::SeqCst);
                    process_token.cancel();
                    Ok(())
                }),
            )
            .with_cancellation_token(token);

        assert!(runner.run_until_stopped().await.is_ok());
        assert!(ran.load(Ordering::SeqCst));
    }
}
