//! Bounded worker pool and timeout helpers
//!
//! Stages submitted through [`WorkerPool::run`] each hold one permit while
//! they execute, so the pool size is the only concurrency throttle. A stage
//! that overruns its deadline, or whose caller goes away, is aborted.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::error::{Error, Result};

/// Await `fut`, failing with [`Error::Timeout`] once `limit` elapses
pub async fn with_timeout<F, T>(stage: &'static str, limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => {
            warn!(stage, timeout_secs = limit.as_secs(), "External call timed out");
            Err(Error::Timeout {
                stage,
                secs: limit.as_secs(),
            })
        }
    }
}

/// Aborts the wrapped task when dropped
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Semaphore-bounded task executor
#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
    stage_timeout: Duration,
}

impl WorkerPool {
    /// Create a pool with `size` workers (at least one)
    pub fn new(size: usize, stage_timeout: Duration) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
            stage_timeout,
        }
    }

    /// Configured number of workers
    pub fn size(&self) -> usize {
        self.size
    }

    /// Workers currently idle
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run a stage on the pool
    ///
    /// Waits for a free worker, spawns the stage and awaits it under the
    /// pool's stage timeout. Dropping the returned future aborts the stage.
    pub async fn run<F, T>(&self, stage: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::Worker("worker pool closed".to_string()))?;

        let mut task = AbortOnDrop(tokio::spawn(async move {
            let _permit = permit;
            fut.await
        }));

        match tokio::time::timeout(self.stage_timeout, &mut task.0).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(Error::Worker(format!("{} task failed: {}", stage, join_err))),
            Err(_) => {
                warn!(stage, timeout_secs = self.stage_timeout.as_secs(), "Stage timed out");
                Err(Error::Timeout {
                    stage,
                    secs: self.stage_timeout.as_secs(),
                })
            }
        }
    }
}
