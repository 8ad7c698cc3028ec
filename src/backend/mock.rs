//! Scripted in-memory pool for exercising the executor without a database.
//!
//! Every lease runs the same [`Script`] and records its lifecycle in a shared
//! [`LeaseLog`], so tests can check acquire/execute/release ordering.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use super::{AcquireError, BackendFailure, ConnectionPool, Lease, RawResultSet};

#[derive(Debug, Clone)]
pub enum Script {
    Rows(RawResultSet),
    Fail(BackendFailure),
    Panic,
    Delayed(Duration, Box<Script>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseEvent {
    Acquired,
    Executed,
    Released,
}

#[derive(Debug, Default)]
pub struct LeaseLog {
    events: Mutex<Vec<(usize, LeaseEvent)>>,
}

impl LeaseLog {
    fn record(&self, lease: usize, event: LeaseEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push((lease, event));
        }
    }

    pub fn events(&self) -> Vec<(usize, LeaseEvent)> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn count(&self, event: LeaseEvent) -> usize {
        self.events().iter().filter(|(_, e)| *e == event).count()
    }

    /// Events of a single lease, in the order they happened.
    pub fn history(&self, lease: usize) -> Vec<LeaseEvent> {
        self.events()
            .into_iter()
            .filter(|(id, _)| *id == lease)
            .map(|(_, event)| event)
            .collect()
    }
}

pub struct ScriptedPool {
    script: Script,
    log: Arc<LeaseLog>,
    permits: Arc<Semaphore>,
    next_id: AtomicUsize,
}

impl ScriptedPool {
    /// A pool with effectively unlimited connections.
    pub fn new(script: Script) -> Self {
        Self::with_capacity(script, Semaphore::MAX_PERMITS)
    }

    pub fn with_capacity(script: Script, connections: usize) -> Self {
        Self {
            script,
            log: Arc::new(LeaseLog::default()),
            permits: Arc::new(Semaphore::new(connections)),
            next_id: AtomicUsize::new(0),
        }
    }

    pub fn log(&self) -> Arc<LeaseLog> {
        self.log.clone()
    }
}

#[async_trait]
impl ConnectionPool for ScriptedPool {
    async fn acquire(&self) -> Result<Box<dyn Lease>, AcquireError> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| AcquireError::Closed)?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.log.record(id, LeaseEvent::Acquired);

        Ok(Box::new(ScriptedLease {
            id,
            script: self.script.clone(),
            log: self.log.clone(),
            _permit: permit,
        }))
    }

    async fn close(&self) {
        self.permits.close();
    }
}

struct ScriptedLease {
    id: usize,
    script: Script,
    log: Arc<LeaseLog>,
    _permit: OwnedSemaphorePermit,
}

#[async_trait]
impl Lease for ScriptedLease {
    async fn fetch(&mut self, _sql: &str) -> Result<RawResultSet, BackendFailure> {
        self.log.record(self.id, LeaseEvent::Executed);

        let mut script = &self.script;
        loop {
            match script {
                Script::Delayed(delay, next) => {
                    tokio::time::sleep(*delay).await;
                    script = &**next;
                }
                Script::Rows(set) => return Ok(set.clone()),
                Script::Fail(failure) => return Err(failure.clone()),
                Script::Panic => panic!("scripted backend fault"),
            }
        }
    }
}

impl Drop for ScriptedLease {
    fn drop(&mut self) {
        self.log.record(self.id, LeaseEvent::Released);
    }
}
