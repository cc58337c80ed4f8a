//! Category node CRUD.
//!
//! Creates compute the materialized path and depth from the parent and
//! write the node together with its derived closure rows in one batch, so
//! no reader can observe a node without its index entries. Structural
//! changes (parent reassignment) are rejected here — they go through the
//! Tree Mutator protocol.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use super::closure;
use crate::error::{TaxonomyError, TaxonomyResult};
use crate::models::{CategoryNode, CreateCategory, Lifecycle, NodePath, UpdateCategory};
use crate::storage::{self, TreeStore, WriteBatch};

/// CRUD for single category nodes.
pub struct CategoryStore {
    store: Arc<dyn TreeStore>,
}

impl CategoryStore {
    pub fn new(store: Arc<dyn TreeStore>) -> Self {
        Self { store }
    }

    /// Create a category under `parent_id` (a root when None).
    ///
    /// Fails with `NotFound` if the parent is missing or deleted, `Conflict`
    /// if the code is already used by a non-deleted node.
    pub async fn create(&self, input: CreateCategory) -> TaxonomyResult<CategoryNode> {
        self.create_with_options(input, true).await
    }

    /// Create without the code-uniqueness check. Only the import path uses
    /// this, for the `CreateNew` merge strategy.
    pub(crate) async fn create_with_options(
        &self,
        input: CreateCategory,
        enforce_unique_code: bool,
    ) -> TaxonomyResult<CategoryNode> {
        if enforce_unique_code && self.store.node_by_code(&input.code).await?.is_some() {
            return Err(TaxonomyError::Conflict(format!(
                "code '{}' is already in use",
                input.code
            )));
        }

        let (path, depth) = match input.parent_id {
            Some(parent_id) => {
                let parent = self
                    .store
                    .node(parent_id)
                    .await?
                    .filter(|p| !p.is_deleted())
                    .ok_or_else(|| TaxonomyError::not_found("parent category", parent_id))?;
                (parent.child_path(), parent.depth + 1)
            }
            None => (NodePath::root(), 0),
        };

        let sort_order = match input.sort_order {
            Some(sort_order) => sort_order,
            None => self.next_sort_order(input.parent_id).await?,
        };

        let now = Utc::now();
        let node = CategoryNode {
            id: Uuid::now_v7(),
            name: input.name,
            code: input.code,
            description: input.description,
            parent_id: input.parent_id,
            path,
            depth,
            sort_order,
            category_type: input.category_type,
            category_level: input.category_level,
            allow_questions: input.allow_questions,
            is_active: true,
            state: Lifecycle::Active,
            created_at: now,
            modified_at: now,
            created_by: input.created_by,
            modified_by: None,
            version: 1,
        };

        let mut batch = WriteBatch::new();
        batch
            .insert_node(node.clone())
            .insert_closure(closure::entries_for(node.id, &node.path));
        self.store.apply(batch).await?;

        tracing::debug!(id = %node.id, code = %node.code, depth = node.depth, "category created");

        Ok(node)
    }

    /// Fetch a non-deleted node by id.
    pub async fn get_by_id(&self, id: Uuid) -> TaxonomyResult<CategoryNode> {
        self.store
            .node(id)
            .await?
            .filter(|n| !n.is_deleted())
            .ok_or_else(|| TaxonomyError::not_found("category", id))
    }

    /// Fetch a non-deleted node by code.
    pub async fn get_by_code(&self, code: &str) -> TaxonomyResult<CategoryNode> {
        self.store
            .node_by_code(code)
            .await?
            .ok_or_else(|| TaxonomyError::not_found("category", code))
    }

    /// Update non-structural fields.
    ///
    /// `expected_version` must match the stored optimistic-concurrency
    /// version, and `input.parent_id` (when provided) must equal the stored
    /// parent — both mismatches fail with `Conflict`.
    pub async fn update(
        &self,
        id: Uuid,
        expected_version: i32,
        input: UpdateCategory,
    ) -> TaxonomyResult<CategoryNode> {
        let current = self.get_by_id(id).await?;

        if current.version != expected_version {
            return Err(TaxonomyError::Conflict(format!(
                "stale version for {id}: stored {}, expected {expected_version}",
                current.version
            )));
        }
        if let Some(parent_id) = input.parent_id
            && Some(parent_id) != current.parent_id
        {
            return Err(TaxonomyError::Conflict(
                "parent changes are moves; use the tree mutator".to_string(),
            ));
        }
        if let Some(ref name) = input.name
            && name.is_empty()
        {
            return Err(TaxonomyError::Conflict("name must not be empty".to_string()));
        }

        let mut updated = current.clone();
        if let Some(name) = input.name {
            updated.name = name;
        }
        if input.description.is_some() {
            updated.description = input.description;
        }
        if let Some(category_type) = input.category_type {
            updated.category_type = category_type;
        }
        if let Some(category_level) = input.category_level {
            updated.category_level = category_level;
        }
        if let Some(sort_order) = input.sort_order {
            updated.sort_order = sort_order;
        }
        if let Some(allow_questions) = input.allow_questions {
            updated.allow_questions = allow_questions;
        }
        if let Some(is_active) = input.is_active {
            updated.is_active = is_active;
        }
        updated.modified_by = input.modified_by;
        updated.modified_at = Utc::now();
        updated.version = current.version + 1;

        let mut batch = WriteBatch::new();
        batch.update_node(updated.clone(), current.version);
        self.store.apply(batch).await?;

        Ok(updated)
    }

    /// Soft-delete a childless node and drop its closure rows.
    ///
    /// This is the `Prevent`-strategy primitive; child handling and the
    /// attached-content gate live in the Tree Mutator.
    pub(crate) async fn soft_delete(&self, id: Uuid) -> TaxonomyResult<CategoryNode> {
        let current = self.get_by_id(id).await?;

        let children = self.store.children(Some(id)).await?;
        if !children.is_empty() {
            return Err(TaxonomyError::HasChildren {
                id,
                count: children.len(),
            });
        }

        let deleted = storage::mark_deleted(&current, Utc::now(), None);
        let mut batch = WriteBatch::new();
        batch
            .update_node(deleted.clone(), current.version)
            .delete_closure_of(vec![id]);
        self.store.apply(batch).await?;

        tracing::debug!(id = %id, code = %deleted.code, "category soft-deleted");

        Ok(deleted)
    }

    /// One past the highest sibling sort order (1 when there are none).
    pub async fn next_sort_order(&self, parent: Option<Uuid>) -> TaxonomyResult<i32> {
        let max = self.store.max_sort_order(parent).await?;
        Ok(max.map_or(1, |m| m + 1))
    }
}
