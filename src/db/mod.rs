//! Database connection pool, migrations, and health check.
//!
//! The `Db` handle owns the shared Postgres pool and the push client used
//! for post-commit notification delivery. Every state-machine operation
//! lives in a submodule as an `impl Db` block and runs inside a single
//! transaction: job writes, assignment bulk writes, exception and audit
//! inserts, and billing upserts commit together or not at all.

pub mod audit;
pub mod close;
pub mod exception;
pub mod group;
pub mod job;
pub mod list;
pub mod notify;
pub mod routing;

use crate::error::Result;
use crate::push::PushClient;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// Database handle. Owns the connection pool shared across all modules.
pub struct Db {
    pool: PgPool,
    push: PushClient,
}

impl Db {
    /// Connect to Postgres and create a connection pool.
    /// Push delivery is disabled until [`Db::with_push`] is called.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await?;
        Ok(Self {
            pool,
            push: PushClient::disabled(),
        })
    }

    /// Attach a push client for best-effort delivery after commits.
    pub fn with_push(mut self, push: PushClient) -> Self {
        self.push = push;
        self
    }

    /// Run all pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| crate::error::Error::Other(format!("migration failed: {e}")))?;
        Ok(())
    }

    /// Simple health check — run a SELECT 1.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Get a reference to the connection pool (for submodules).
    pub(crate) fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub(crate) fn push(&self) -> &PushClient {
        &self.push
    }
}
