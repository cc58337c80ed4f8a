//! Configuration loaded from environment variables.

use std::env;

use anyhow::{Context, Result};

/// Tuning knobs for tree maintenance operations.
#[derive(Debug, Clone, Copy)]
pub struct TreeSettings {
    /// Maximum closure rows inserted per write batch during a full rebuild,
    /// keeping any single transaction bounded.
    pub closure_rebuild_batch_size: usize,

    /// Spacing between sibling sort orders after compaction.
    pub sort_order_step: i32,
}

impl Default for TreeSettings {
    fn default() -> Self {
        Self {
            closure_rebuild_batch_size: 500,
            sort_order_step: 10,
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection URL.
    pub database_url: String,

    /// Maximum database connections in pool (default: 10).
    pub database_max_connections: u32,

    /// Tree maintenance settings.
    pub settings: TreeSettings,
}

impl Config {
    /// Load configuration from environment variables (and `.env` if present).
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let database_url =
            env::var("DATABASE_URL").context("DATABASE_URL environment variable is required")?;

        let database_max_connections = env::var("DATABASE_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .context("DATABASE_MAX_CONNECTIONS must be a valid u32")?;

        let closure_rebuild_batch_size = env::var("CLOSURE_REBUILD_BATCH_SIZE")
            .unwrap_or_else(|_| "500".to_string())
            .parse()
            .context("CLOSURE_REBUILD_BATCH_SIZE must be a valid usize")?;

        let sort_order_step = env::var("SORT_ORDER_STEP")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .context("SORT_ORDER_STEP must be a valid i32")?;

        Ok(Self {
            database_url,
            database_max_connections,
            settings: TreeSettings {
                closure_rebuild_batch_size,
                sort_order_step,
            },
        })
    }
}
