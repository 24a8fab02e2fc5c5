//! Tenant-scoped PostgreSQL access.
//!
//! Every statement runs inside a transaction that first pins the tenant with a
//! transaction-local `set_config`, so the row-level security policies only ever
//! see one tenant and the setting is discarded before the connection goes back
//! to the pool.

use futures::{future::BoxFuture, FutureExt};
use sqlx::{
    migrate::MigrateError,
    postgres::{PgConnection, PgPool, PgPoolOptions},
};
use std::panic::AssertUnwindSafe;
use thiserror::Error;

use crate::config::DatabaseConfig;
use crate::models::TenantId;
use secrecy::ExposeSecret;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] MigrateError),

    #[error("invalid row: {0}")]
    InvalidRow(String),
}

/// PostgreSQL pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        tracing::info!(max_connections = config.max_connections, "Connecting to PostgreSQL");
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(config.url.expose_secret())
            .await?;
        tracing::info!("Successfully connected to PostgreSQL");
        Ok(Self { pool })
    }

    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        tracing::info!("Applying database migrations");
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Run `f` in a transaction scoped to `tenant`.
    ///
    /// Commits when `f` returns `Ok`. Rolls back when it returns `Err` or
    /// panics; the panic is resumed after the rollback. Calls do not nest: `f`
    /// receives a bare connection, not another `Database`.
    pub async fn with_transaction<T, F>(&self, tenant: TenantId, f: F) -> Result<T, StoreError>
    where
        T: Send,
        F: for<'c> FnOnce(&'c mut PgConnection) -> BoxFuture<'c, Result<T, StoreError>> + Send,
    {
        let mut tx = self.pool.begin().await?;

        // is_local = true: the setting dies with the transaction.
        sqlx::query("SELECT set_config('app.current_tenant', $1, true)")
            .bind(tenant.to_string())
            .execute(&mut *tx)
            .await?;

        let outcome = AssertUnwindSafe(f(&mut *tx)).catch_unwind().await;

        match outcome {
            Ok(Ok(value)) => {
                tx.commit().await?;
                Ok(value)
            }
            Ok(Err(err)) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::warn!(error = %rollback_err, "Rollback failed");
                }
                Err(err)
            }
            Err(panic) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::warn!(error = %rollback_err, "Rollback after panic failed");
                }
                std::panic::resume_unwind(panic)
            }
        }
    }
}
