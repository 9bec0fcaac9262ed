//! Composition utilities for building the SQLite-backed stores.
//!
//! Focused purely on construction; no domain logic.

use sqlx::SqlitePool;
use std::sync::Arc;

use revenc_core::config::BrandingDefaults;
use revenc_core::ports::{JobStore, UserStore};

use crate::repositories::{SqliteJobStore, SqliteUserStore};

/// Factory for creating store instances with SQLite backends.
pub struct StoreFactory;

impl StoreFactory {
    /// Create an in-memory SQLite pool for testing.
    pub async fn create_test_pool() -> anyhow::Result<SqlitePool> {
        let pool = SqlitePool::connect("sqlite::memory:").await?;
        crate::setup::create_schema(&pool).await?;
        Ok(pool)
    }

    /// Build the job store from a pool.
    pub fn build_job_store(pool: SqlitePool) -> Arc<dyn JobStore> {
        Arc::new(SqliteJobStore::new(pool))
    }

    /// Build the user store from a pool and branding defaults.
    pub fn build_user_store(pool: SqlitePool, branding: BrandingDefaults) -> Arc<dyn UserStore> {
        Arc::new(SqliteUserStore::new(pool, branding))
    }
}
