//! Connection pool seam for the sandbox database.
//!
//! The executor only sees [`ConnectionPool`] and [`Lease`]. A lease owns one
//! physical connection; dropping it returns the connection to the pool, so
//! release happens on every exit path including unwinding.

pub mod mock;
mod postgres;

pub use postgres::{PgLease, PgSandbox};

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AcquireError {
    #[error("Timed out waiting for a sandbox connection")]
    TimedOut,

    #[error("Sandbox pool is closed")]
    Closed,

    #[error("Sandbox connection failed: {0}")]
    Connect(String),
}

/// A failure reported while running a statement on a lease.
#[derive(Debug, Clone, Error)]
pub enum BackendFailure {
    /// The backend rejected or failed the statement itself.
    #[error("{message}")]
    Statement {
        message: String,
        sqlstate: Option<String>,
    },

    /// Transport or protocol fault unrelated to the statement text.
    #[error("Connection error: {0}")]
    Connection(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawColumn {
    pub name: String,
    pub type_oid: u32,
    pub type_name: String,
}

/// Rows as the backend produced them, values positionally aligned with
/// `columns`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawResultSet {
    pub columns: Vec<RawColumn>,
    pub rows: Vec<Vec<JsonValue>>,
}

/// A bounded pool of sandbox connections.
#[async_trait]
pub trait ConnectionPool: Send + Sync {
    /// Wait for a free connection. May block while the pool is exhausted.
    async fn acquire(&self) -> Result<Box<dyn Lease>, AcquireError>;

    /// Close every connection. Called once at shutdown.
    async fn close(&self);
}

/// Exclusive use of one pooled connection. Dropping the lease releases it.
#[async_trait]
pub trait Lease: Send {
    async fn fetch(&mut self, sql: &str) -> Result<RawResultSet, BackendFailure>;
}
