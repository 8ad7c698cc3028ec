use log::{error, warn};
use std::sync::Arc;
use std::time::Duration;

use crate::backend::{AcquireError, ConnectionPool, Lease};
use crate::error::GatewayError;
use crate::normalizer::{ExecutionOutcome, normalize};

/// Runs admitted statements on a pooled connection under a fixed deadline.
///
/// Each call acquires exactly one lease and releases it exactly once. The
/// lease moves into the task that talks to the backend and is dropped there,
/// so release follows execution on success, on backend error and on panic.
/// When the deadline fires first the task is left to finish on its own; the
/// caller gets `Timeout` straight away and the lease goes back to the pool
/// once the backend answers.
pub struct Executor {
    pool: Arc<dyn ConnectionPool>,
    deadline: Duration,
    acquire_timeout: Option<Duration>,
}

impl Executor {
    pub fn new(pool: Arc<dyn ConnectionPool>, deadline: Duration) -> Self {
        Self {
            pool,
            deadline,
            acquire_timeout: None,
        }
    }

    /// Bound the wait for a free connection. `None` waits indefinitely.
    pub fn with_acquire_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    pub async fn execute(&self, statement: &str) -> ExecutionOutcome {
        let mut lease = self.acquire().await?;
        let sql = statement.to_owned();

        let mut running = tokio::spawn(async move {
            let result = lease.fetch(&sql).await;
            drop(lease);
            result
        });

        tokio::select! {
            joined = &mut running => match joined {
                Ok(result) => normalize(result),
                Err(err) => {
                    error!("Query task failed: {}", err);
                    Err(GatewayError::Internal(err.to_string()))
                }
            },
            _ = tokio::time::sleep(self.deadline) => {
                warn!("Query exceeded deadline of {:?}", self.deadline);
                Err(GatewayError::Timeout)
            }
        }
    }

    async fn acquire(&self) -> Result<Box<dyn Lease>, GatewayError> {
        let acquired = match self.acquire_timeout {
            Some(limit) => tokio::time::timeout(limit, self.pool.acquire())
                .await
                .unwrap_or(Err(AcquireError::TimedOut)),
            None => self.pool.acquire().await,
        };

        acquired.map_err(|err| {
            error!("Failed to acquire sandbox connection: {}", err);
            GatewayError::Internal(err.to_string())
        })
    }
}
