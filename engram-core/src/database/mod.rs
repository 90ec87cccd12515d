//! Database access: connection pool, operation timeouts, and the
//! persistence ports with their Postgres and in-memory implementations.

use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use engram_config::DatabaseSettings;

use crate::error::{EngramError, Result};

pub mod memory;
pub mod ports;
pub mod postgres;

/// Per-class operation deadlines. Short operations cover inserts and point
/// reads; analytical covers statistics and consolidation scans.
#[derive(Debug, Clone, Copy)]
pub struct OpTimeouts {
    pub short_op: Duration,
    pub analytical: Duration,
}

impl Default for OpTimeouts {
    fn default() -> Self {
        Self {
            short_op: Duration::from_secs(10),
            analytical: Duration::from_secs(300),
        }
    }
}

impl OpTimeouts {
    pub fn from_settings(settings: &DatabaseSettings) -> Self {
        Self {
            short_op: Duration::from_secs(settings.short_op_timeout_secs),
            analytical: Duration::from_secs(settings.analytical_timeout_secs),
        }
    }
}

/// Bound a database future by a deadline, mapping elapse to a timeout
/// error that names the operation.
pub(crate) async fn bounded<T, F>(limit: Duration, label: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| EngramError::Timeout(format!("{label} exceeded {limit:?}")))?
}

/// Process-lifetime handle to the backing database. Initialized once at
/// startup and passed by reference; components never look it up globally.
#[derive(Debug, Clone)]
pub struct Database {
    pool: PgPool,
    timeouts: OpTimeouts,
}

impl Database {
    pub async fn connect(settings: &DatabaseSettings) -> Result<Self> {
        let url = settings
            .url
            .as_deref()
            .ok_or_else(|| EngramError::Internal("database URL not configured".into()))?;
        let timeouts = OpTimeouts::from_settings(settings);

        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .acquire_timeout(timeouts.short_op)
            .connect(url)
            .await?;

        tracing::info!(
            target: "database",
            max_connections = settings.max_connections,
            "connected to database"
        );

        Ok(Database { pool, timeouts })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn timeouts(&self) -> OpTimeouts {
        self.timeouts
    }
}
