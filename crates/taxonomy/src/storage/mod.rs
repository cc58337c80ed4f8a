//! Storage backends for category nodes and closure entries.
//!
//! The category table and the closure table are the only shared mutable
//! state in this subsystem, and every access goes through [`TreeStore`]:
//! point reads, ordered listings, and a single atomic [`WriteBatch`] write
//! path. No component writes `path`, `depth`, `parent_id`, or closure rows
//! except through a batch, which keeps the invariant that nothing outside
//! the engine can observe a node with an updated parent but a stale path.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::TaxonomyResult;
use crate::models::{CategoryNode, ClosureEntry};
use crate::query::NodeFilter;

/// One write in a [`WriteBatch`].
#[derive(Debug, Clone)]
pub enum WriteOp {
    /// Insert a new node row.
    InsertNode(CategoryNode),

    /// Replace a node row. Fails with `Conflict` unless the stored version
    /// equals `expected_version`; the replacement row carries the already
    /// bumped version.
    UpdateNode {
        node: CategoryNode,
        expected_version: i32,
    },

    /// Insert closure rows, replacing the distance on an existing pair.
    InsertClosure(Vec<ClosureEntry>),

    /// Remove every closure row naming one of these ids as descendant.
    DeleteClosureOf(Vec<Uuid>),

    /// Remove specific (ancestor, descendant) pairs.
    DeleteClosurePairs(Vec<(Uuid, Uuid)>),

    /// Remove every closure row.
    ClearClosure,
}

/// Ordered list of writes applied atomically, in order.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_node(&mut self, node: CategoryNode) -> &mut Self {
        self.ops.push(WriteOp::InsertNode(node));
        self
    }

    pub fn update_node(&mut self, node: CategoryNode, expected_version: i32) -> &mut Self {
        self.ops.push(WriteOp::UpdateNode {
            node,
            expected_version,
        });
        self
    }

    pub fn insert_closure(&mut self, entries: Vec<ClosureEntry>) -> &mut Self {
        if !entries.is_empty() {
            self.ops.push(WriteOp::InsertClosure(entries));
        }
        self
    }

    pub fn delete_closure_of(&mut self, descendant_ids: Vec<Uuid>) -> &mut Self {
        if !descendant_ids.is_empty() {
            self.ops.push(WriteOp::DeleteClosureOf(descendant_ids));
        }
        self
    }

    pub fn delete_closure_pairs(&mut self, pairs: Vec<(Uuid, Uuid)>) -> &mut Self {
        if !pairs.is_empty() {
            self.ops.push(WriteOp::DeleteClosurePairs(pairs));
        }
        self
    }

    pub fn clear_closure(&mut self) -> &mut Self {
        self.ops.push(WriteOp::ClearClosure);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }
}

/// Mark a node soft-deleted in place, bumping its version.
pub(crate) fn mark_deleted(
    node: &CategoryNode,
    deleted_at: DateTime<Utc>,
    modified_by: Option<&str>,
) -> CategoryNode {
    let mut deleted = node.clone();
    deleted.state = crate::models::Lifecycle::Deleted { deleted_at };
    deleted.modified_at = deleted_at;
    deleted.modified_by = modified_by.map(str::to_string);
    deleted.version = node.version + 1;
    deleted
}

/// Storage abstraction over the category and closure tables.
///
/// Reads never fail on missing nodes — they return `None` or empty
/// collections. Writes go through [`TreeStore::apply`], which commits the
/// whole batch or nothing.
#[async_trait]
pub trait TreeStore: Send + Sync {
    /// Fetch one node by id, deleted or not.
    async fn node(&self, id: Uuid) -> TaxonomyResult<Option<CategoryNode>>;

    /// Fetch a non-deleted node by code.
    async fn node_by_code(&self, code: &str) -> TaxonomyResult<Option<CategoryNode>>;

    /// Non-deleted children of `parent` (None for roots), ordered by
    /// sort_order then name.
    async fn children(&self, parent: Option<Uuid>) -> TaxonomyResult<Vec<CategoryNode>>;

    /// Non-deleted nodes whose encoded path starts with `prefix`,
    /// shallowest first.
    async fn descendants_by_prefix(&self, prefix: &str) -> TaxonomyResult<Vec<CategoryNode>>;

    /// Every node, optionally including soft-deleted rows.
    async fn all_nodes(&self, include_deleted: bool) -> TaxonomyResult<Vec<CategoryNode>>;

    /// Filtered listing, ordered by depth, sort_order, name.
    async fn find(&self, filter: &NodeFilter) -> TaxonomyResult<Vec<CategoryNode>>;

    /// Closure rows naming `id` as descendant — its ancestor chain.
    async fn closure_ancestors(&self, id: Uuid) -> TaxonomyResult<Vec<ClosureEntry>>;

    /// Closure rows naming `id` as ancestor — its subtree.
    async fn closure_descendants(&self, id: Uuid) -> TaxonomyResult<Vec<ClosureEntry>>;

    /// Every closure row.
    async fn closure_all(&self) -> TaxonomyResult<Vec<ClosureEntry>>;

    /// Highest sort_order among non-deleted children of `parent`.
    async fn max_sort_order(&self, parent: Option<Uuid>) -> TaxonomyResult<Option<i32>>;

    /// Apply every op atomically, in order. Any failure rolls the whole
    /// batch back.
    async fn apply(&self, batch: WriteBatch) -> TaxonomyResult<()>;
}
