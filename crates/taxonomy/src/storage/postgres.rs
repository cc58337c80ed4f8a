//! PostgreSQL storage backend.
//!
//! Fixed-shape queries are parameterized sqlx; the filtered listing is
//! rendered by the SeaQuery builder in [`crate::query`]. `apply` runs the
//! whole batch in one transaction — row-level locks taken by the updates
//! serialize concurrent structural mutations on overlapping subtrees, and a
//! stale version guard aborts the transaction with a `Conflict`.

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{TreeStore, WriteBatch, WriteOp};
use crate::error::{TaxonomyError, TaxonomyResult};
use crate::models::{
    CategoryLevel, CategoryNode, CategoryType, ClosureEntry, Lifecycle, NodePath,
};
use crate::query::{self, NodeFilter};

const SELECT_NODES: &str = "SELECT id, name, code, description, parent_id, path, depth, \
     sort_order, category_type, category_level, allow_questions, is_active, is_deleted, \
     deleted_at, created_at, modified_at, created_by, modified_by, version FROM category_node";

/// SeaQuery-free row shape; lifecycle and path are decoded in `into_node`.
#[derive(sqlx::FromRow)]
struct NodeRow {
    id: Uuid,
    name: String,
    code: String,
    description: Option<String>,
    parent_id: Option<Uuid>,
    path: String,
    depth: i32,
    sort_order: i32,
    category_type: i16,
    category_level: i16,
    allow_questions: bool,
    is_active: bool,
    is_deleted: bool,
    deleted_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    modified_at: DateTime<Utc>,
    created_by: Option<String>,
    modified_by: Option<String>,
    version: i32,
}

impl NodeRow {
    fn into_node(self) -> TaxonomyResult<CategoryNode> {
        let path = NodePath::decode(&self.path)
            .with_context(|| format!("invalid stored path for node {}", self.id))?;
        let category_type = CategoryType::from_i16(self.category_type)
            .ok_or_else(|| anyhow!("invalid category_type {} for node {}", self.category_type, self.id))?;
        let category_level = CategoryLevel::from_i16(self.category_level)
            .ok_or_else(|| anyhow!("invalid category_level {} for node {}", self.category_level, self.id))?;
        let state = match (self.is_deleted, self.deleted_at) {
            (true, Some(deleted_at)) => Lifecycle::Deleted { deleted_at },
            (true, None) => Lifecycle::Deleted {
                deleted_at: self.modified_at,
            },
            (false, _) => Lifecycle::Active,
        };

        Ok(CategoryNode {
            id: self.id,
            name: self.name,
            code: self.code,
            description: self.description,
            parent_id: self.parent_id,
            path,
            depth: self.depth,
            sort_order: self.sort_order,
            category_type,
            category_level,
            allow_questions: self.allow_questions,
            is_active: self.is_active,
            state,
            created_at: self.created_at,
            modified_at: self.modified_at,
            created_by: self.created_by,
            modified_by: self.modified_by,
            version: self.version,
        })
    }
}

fn rows_to_nodes(rows: Vec<NodeRow>) -> TaxonomyResult<Vec<CategoryNode>> {
    rows.into_iter().map(NodeRow::into_node).collect()
}

/// PostgreSQL-backed [`TreeStore`].
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TreeStore for PgStore {
    async fn node(&self, id: Uuid) -> TaxonomyResult<Option<CategoryNode>> {
        let row =
            sqlx::query_as::<_, NodeRow>(&format!("{SELECT_NODES} WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(NodeRow::into_node).transpose()
    }

    async fn node_by_code(&self, code: &str) -> TaxonomyResult<Option<CategoryNode>> {
        let row = sqlx::query_as::<_, NodeRow>(&format!(
            "{SELECT_NODES} WHERE code = $1 AND NOT is_deleted LIMIT 1"
        ))
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;

        row.map(NodeRow::into_node).transpose()
    }

    async fn children(&self, parent: Option<Uuid>) -> TaxonomyResult<Vec<CategoryNode>> {
        let rows = match parent {
            Some(parent_id) => {
                sqlx::query_as::<_, NodeRow>(&format!(
                    "{SELECT_NODES} WHERE parent_id = $1 AND NOT is_deleted \
                     ORDER BY sort_order, name"
                ))
                .bind(parent_id)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, NodeRow>(&format!(
                    "{SELECT_NODES} WHERE parent_id IS NULL AND NOT is_deleted \
                     ORDER BY sort_order, name"
                ))
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows_to_nodes(rows)
    }

    async fn descendants_by_prefix(&self, prefix: &str) -> TaxonomyResult<Vec<CategoryNode>> {
        // Paths contain only uuids and slashes, so the prefix carries no
        // LIKE wildcards.
        let rows = sqlx::query_as::<_, NodeRow>(&format!(
            "{SELECT_NODES} WHERE path LIKE $1 AND NOT is_deleted \
             ORDER BY depth, sort_order, name"
        ))
        .bind(format!("{prefix}%"))
        .fetch_all(&self.pool)
        .await?;

        rows_to_nodes(rows)
    }

    async fn all_nodes(&self, include_deleted: bool) -> TaxonomyResult<Vec<CategoryNode>> {
        let sql = if include_deleted {
            format!("{SELECT_NODES} ORDER BY depth, sort_order, name")
        } else {
            format!("{SELECT_NODES} WHERE NOT is_deleted ORDER BY depth, sort_order, name")
        };
        let rows = sqlx::query_as::<_, NodeRow>(&sql).fetch_all(&self.pool).await?;

        rows_to_nodes(rows)
    }

    async fn find(&self, filter: &NodeFilter) -> TaxonomyResult<Vec<CategoryNode>> {
        let sql = query::build_select(filter);
        let rows = sqlx::query_as::<_, NodeRow>(&sql).fetch_all(&self.pool).await?;

        rows_to_nodes(rows)
    }

    async fn closure_ancestors(&self, id: Uuid) -> TaxonomyResult<Vec<ClosureEntry>> {
        let entries = sqlx::query_as::<_, ClosureEntry>(
            "SELECT ancestor_id, descendant_id, distance FROM category_closure \
             WHERE descendant_id = $1 ORDER BY distance",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }

    async fn closure_descendants(&self, id: Uuid) -> TaxonomyResult<Vec<ClosureEntry>> {
        let entries = sqlx::query_as::<_, ClosureEntry>(
            "SELECT ancestor_id, descendant_id, distance FROM category_closure \
             WHERE ancestor_id = $1 ORDER BY distance, descendant_id",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }

    async fn closure_all(&self) -> TaxonomyResult<Vec<ClosureEntry>> {
        let entries = sqlx::query_as::<_, ClosureEntry>(
            "SELECT ancestor_id, descendant_id, distance FROM category_closure \
             ORDER BY ancestor_id, descendant_id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }

    async fn max_sort_order(&self, parent: Option<Uuid>) -> TaxonomyResult<Option<i32>> {
        let max: Option<i32> = match parent {
            Some(parent_id) => {
                sqlx::query_scalar(
                    "SELECT MAX(sort_order) FROM category_node \
                     WHERE parent_id = $1 AND NOT is_deleted",
                )
                .bind(parent_id)
                .fetch_one(&self.pool)
                .await?
            }
            None => {
                sqlx::query_scalar(
                    "SELECT MAX(sort_order) FROM category_node \
                     WHERE parent_id IS NULL AND NOT is_deleted",
                )
                .fetch_one(&self.pool)
                .await?
            }
        };

        Ok(max)
    }

    async fn apply(&self, batch: WriteBatch) -> TaxonomyResult<()> {
        let mut tx = self.pool.begin().await?;

        for op in batch.ops() {
            match op {
                WriteOp::InsertNode(node) => {
                    sqlx::query(
                        r#"
                        INSERT INTO category_node (
                            id, name, code, description, parent_id, path, depth,
                            sort_order, category_type, category_level, allow_questions,
                            is_active, is_deleted, deleted_at, created_at, modified_at,
                            created_by, modified_by, version
                        )
                        VALUES (
                            $1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                            $11, $12, $13, $14, $15, $16, $17, $18, $19
                        )
                        "#,
                    )
                    .bind(node.id)
                    .bind(&node.name)
                    .bind(&node.code)
                    .bind(&node.description)
                    .bind(node.parent_id)
                    .bind(node.path.encoded())
                    .bind(node.depth)
                    .bind(node.sort_order)
                    .bind(node.category_type.as_i16())
                    .bind(node.category_level.as_i16())
                    .bind(node.allow_questions)
                    .bind(node.is_active)
                    .bind(node.is_deleted())
                    .bind(node.state.deleted_at())
                    .bind(node.created_at)
                    .bind(node.modified_at)
                    .bind(&node.created_by)
                    .bind(&node.modified_by)
                    .bind(node.version)
                    .execute(&mut *tx)
                    .await?;
                }
                WriteOp::UpdateNode {
                    node,
                    expected_version,
                } => {
                    let result = sqlx::query(
                        r#"
                        UPDATE category_node SET
                            name = $1, code = $2, description = $3, parent_id = $4,
                            path = $5, depth = $6, sort_order = $7, category_type = $8,
                            category_level = $9, allow_questions = $10, is_active = $11,
                            is_deleted = $12, deleted_at = $13, modified_at = $14,
                            modified_by = $15, version = $16
                        WHERE id = $17 AND version = $18
                        "#,
                    )
                    .bind(&node.name)
                    .bind(&node.code)
                    .bind(&node.description)
                    .bind(node.parent_id)
                    .bind(node.path.encoded())
                    .bind(node.depth)
                    .bind(node.sort_order)
                    .bind(node.category_type.as_i16())
                    .bind(node.category_level.as_i16())
                    .bind(node.allow_questions)
                    .bind(node.is_active)
                    .bind(node.is_deleted())
                    .bind(node.state.deleted_at())
                    .bind(node.modified_at)
                    .bind(&node.modified_by)
                    .bind(node.version)
                    .bind(node.id)
                    .bind(expected_version)
                    .execute(&mut *tx)
                    .await?;

                    if result.rows_affected() == 0 {
                        return Err(TaxonomyError::Conflict(format!(
                            "stale version for {}: expected {}",
                            node.id, expected_version
                        )));
                    }
                }
                WriteOp::InsertClosure(entries) => {
                    for entry in entries {
                        sqlx::query(
                            "INSERT INTO category_closure (ancestor_id, descendant_id, distance) \
                             VALUES ($1, $2, $3) \
                             ON CONFLICT (ancestor_id, descendant_id) \
                             DO UPDATE SET distance = EXCLUDED.distance",
                        )
                        .bind(entry.ancestor_id)
                        .bind(entry.descendant_id)
                        .bind(entry.distance)
                        .execute(&mut *tx)
                        .await?;
                    }
                }
                WriteOp::DeleteClosureOf(descendants) => {
                    sqlx::query("DELETE FROM category_closure WHERE descendant_id = ANY($1)")
                        .bind(descendants)
                        .execute(&mut *tx)
                        .await?;
                }
                WriteOp::DeleteClosurePairs(pairs) => {
                    for (ancestor, descendant) in pairs {
                        sqlx::query(
                            "DELETE FROM category_closure \
                             WHERE ancestor_id = $1 AND descendant_id = $2",
                        )
                        .bind(ancestor)
                        .bind(descendant)
                        .execute(&mut *tx)
                        .await?;
                    }
                }
                WriteOp::ClearClosure => {
                    sqlx::query("DELETE FROM category_closure")
                        .execute(&mut *tx)
                        .await?;
                }
            }
        }

        tx.commit().await?;

        Ok(())
    }
}
