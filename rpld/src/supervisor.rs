use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Service priority, determines restart behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServicePriority {
    /// The per-interface receive loop — restart immediately, unlimited retries.
    Critical,
    /// Nothing currently runs at this level, kept for parity with the
    /// priority scheme this supervisor was adapted from.
    Important,
    /// Nothing currently runs at this level either.
    Background,
}

impl ServicePriority {
    fn max_retries(self) -> u32 {
        match self {
            Self::Critical => u32::MAX,
            Self::Important => 10,
            Self::Background => 3,
        }
    }

    fn backoff(self, retry: u32) -> Duration {
        match self {
            Self::Critical => Duration::from_millis(100 * retry as u64),
            Self::Important => Duration::from_secs(retry as u64),
            Self::Background => Duration::from_secs(5 * retry as u64),
        }
    }
}

/// Runs a service in a supervised tokio task, restarting it on error or
/// panic according to its priority. Critical services restart forever.
pub fn spawn_supervised<F, Fut>(name: &'static str, priority: ServicePriority, factory: F) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    let factory = Arc::new(factory);
    tokio::spawn(async move {
        let max_retries = priority.max_retries();
        let mut retries: u32 = 0;
        let mut last_restart = Instant::now();

        loop {
            info!("[supervisor] starting service: {name}");

            let f = Arc::clone(&factory);
            let result = tokio::spawn(async move {
                let fut = f();
                fut.await
            })
            .await;

            match result {
                Ok(Ok(())) => {
                    info!("[supervisor] {name} exited cleanly");
                    break;
                }
                Ok(Err(e)) => {
                    error!("[supervisor] {name} failed: {e:#}");
                }
                Err(join_error) => {
                    error!("[supervisor] {name} task panicked: {join_error}");
                }
            }

            if last_restart.elapsed() > Duration::from_secs(60) {
                retries = 0;
            }

            retries = retries.saturating_add(1);

            if retries > max_retries {
                error!("[supervisor] {name} exceeded max retries ({max_retries}), giving up");
                break;
            }

            let backoff = priority.backoff(retries);
            warn!("[supervisor] {name} restarting in {backoff:?} (attempt {retries}/{max_retries})");
            tokio::time::sleep(backoff).await;
            last_restart = Instant::now();
        }
    })
}
