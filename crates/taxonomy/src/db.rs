//! Database connection pool management and schema bootstrap.

use anyhow::{Context, Result};
use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::config::Config;

/// Create a PostgreSQL connection pool.
pub async fn create_pool(config: &Config) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await
        .context("failed to connect to PostgreSQL")?;

    Ok(pool)
}

/// Check if the database connection is healthy.
pub async fn check_health(pool: &PgPool) -> bool {
    sqlx::query("SELECT 1").execute(pool).await.is_ok()
}

/// DDL for the two tables this subsystem owns.
///
/// Code has no unique constraint at the schema level: uniqueness among
/// non-deleted rows is enforced by the Category Store, and the `CreateNew`
/// import strategy is explicitly allowed to duplicate codes.
const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS category_node (
        id UUID PRIMARY KEY,
        name TEXT NOT NULL,
        code TEXT NOT NULL,
        description TEXT,
        parent_id UUID,
        path TEXT NOT NULL,
        depth INT NOT NULL,
        sort_order INT NOT NULL,
        category_type SMALLINT NOT NULL,
        category_level SMALLINT NOT NULL,
        allow_questions BOOLEAN NOT NULL,
        is_active BOOLEAN NOT NULL,
        is_deleted BOOLEAN NOT NULL DEFAULT FALSE,
        deleted_at TIMESTAMPTZ,
        created_at TIMESTAMPTZ NOT NULL,
        modified_at TIMESTAMPTZ NOT NULL,
        created_by TEXT,
        modified_by TEXT,
        version INT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS category_closure (
        ancestor_id UUID NOT NULL,
        descendant_id UUID NOT NULL,
        distance INT NOT NULL,
        PRIMARY KEY (ancestor_id, descendant_id)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS category_node_code_idx ON category_node (code)",
    "CREATE INDEX IF NOT EXISTS category_node_parent_idx ON category_node (parent_id)",
    "CREATE INDEX IF NOT EXISTS category_node_path_idx ON category_node (path text_pattern_ops)",
    "CREATE INDEX IF NOT EXISTS category_closure_desc_idx ON category_closure (descendant_id)",
];

/// Create the category and closure tables if they do not exist. Idempotent.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    for statement in SCHEMA {
        sqlx::query(statement)
            .execute(pool)
            .await
            .context("failed to run schema migration")?;
    }

    Ok(())
}
