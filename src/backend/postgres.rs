use async_trait::async_trait;
use log::info;
use sqlx::postgres::{PgColumn, PgPool, PgPoolOptions, Postgres};
use sqlx::pool::PoolConnection;
use sqlx::{Column, Executor as _, TypeInfo};

use super::{AcquireError, BackendFailure, ConnectionPool, Lease, RawColumn, RawResultSet};
use crate::config::SandboxConfig;
use crate::normalizer::decode_row;

/// Run on every connection handed back to the pool. Restores each setting to
/// its connection-time value, which includes the session `options`.
const SESSION_RESET: &str = "RESET ALL";

impl From<sqlx::Error> for AcquireError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => AcquireError::TimedOut,
            sqlx::Error::PoolClosed => AcquireError::Closed,
            other => AcquireError::Connect(other.to_string()),
        }
    }
}

impl From<sqlx::Error> for BackendFailure {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db) => BackendFailure::Statement {
                message: db.message().to_string(),
                sqlstate: db.code().map(|code| code.into_owned()),
            },
            other => BackendFailure::Connection(other.to_string()),
        }
    }
}

/// The shared sandbox pool. Created once at startup, closed once at shutdown.
pub struct PgSandbox {
    pool: PgPool,
}

impl PgSandbox {
    pub async fn connect(config: &SandboxConfig) -> Result<Self, sqlx::Error> {
        let mut options = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .idle_timeout(Some(config.idle_timeout))
            .after_release(|conn, _meta| {
                Box::pin(async move {
                    // A failed reset closes the connection instead of reusing it.
                    conn.execute(SESSION_RESET).await?;
                    Ok::<_, sqlx::Error>(true)
                })
            });

        if let Some(timeout) = config.acquire_timeout {
            options = options.acquire_timeout(timeout);
        }

        let pool = options.connect_with(config.connect_options()?).await?;

        info!(
            "Sandbox pool ready (max {} connections, read_only={})",
            config.max_connections, config.read_only
        );

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl ConnectionPool for PgSandbox {
    async fn acquire(&self) -> Result<Box<dyn Lease>, AcquireError> {
        let conn = self.pool.acquire().await?;
        Ok(Box::new(PgLease { conn }))
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

/// One pooled connection; dropping it hands the connection back to sqlx.
pub struct PgLease {
    conn: PoolConnection<Postgres>,
}

#[async_trait]
impl Lease for PgLease {
    async fn fetch(&mut self, sql: &str) -> Result<RawResultSet, BackendFailure> {
        // User statements are one-off; keep them out of the statement cache.
        let rows = sqlx::query(sql)
            .persistent(false)
            .fetch_all(&mut *self.conn)
            .await?;

        // An empty result carries no row metadata, so describe the statement
        // instead. `describe` leaves the statement cache alone.
        let columns = match rows.first() {
            Some(row) => raw_columns(sqlx::Row::columns(row)),
            None => {
                let described = (&mut *self.conn).describe(sql).await?;
                raw_columns(described.columns())
            }
        };

        let rows = rows.iter().map(decode_row).collect();

        Ok(RawResultSet { columns, rows })
    }
}

fn raw_columns(columns: &[PgColumn]) -> Vec<RawColumn> {
    columns
        .iter()
        .map(|column| {
            let type_info = column.type_info();
            RawColumn {
                name: column.name().to_string(),
                type_oid: type_info.oid().map(|oid| oid.0).unwrap_or_default(),
                type_name: type_info.name().to_string(),
            }
        })
        .collect()
}
