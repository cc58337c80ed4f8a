//! Structural tree mutations: move, copy, delete.
//!
//! Every mutation is planned in memory against a consistent read of the
//! affected subtree and committed as one atomic write batch — either the
//! whole new shape lands (parent, path, depth, closure rows together) or
//! nothing does. Subtree paths are re-derived top-down so each node's new
//! path is built from its already-recomputed parent.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::closure;
use super::navigator::TreeNavigator;
use super::store::CategoryStore;
use crate::error::{TaxonomyError, TaxonomyResult};
use crate::hooks::ContentHooks;
use crate::models::{CategoryNode, NodePath};
use crate::storage::{self, TreeStore, WriteBatch};

/// What to do with a deleted node's children.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteStrategy {
    /// Fail with `HasChildren` if any non-deleted child exists.
    Prevent,
    /// Re-parent direct children to the deleted node's own parent.
    MoveChildrenToParent,
    /// Re-parent direct children to root.
    MoveChildrenToRoot,
    /// Recursively soft-delete the entire subtree, depth-first.
    CascadeDelete,
}

/// Result of a copy: the new subtree root, total nodes cloned, and the
/// old-id → new-id table consumed by downstream leaf-content cloning.
#[derive(Debug, Clone)]
pub struct CopyOutcome {
    pub new_root_id: Uuid,
    pub nodes_copied: usize,
    pub id_map: HashMap<Uuid, Uuid>,
}

/// Result of a delete: nodes soft-deleted and nodes whose path changed by
/// re-parenting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteOutcome {
    pub deleted: usize,
    pub reparented: usize,
}

/// Structural operations on the category tree.
pub struct TreeMutator {
    store: Arc<dyn TreeStore>,
    categories: CategoryStore,
    navigator: TreeNavigator,
    hooks: Arc<dyn ContentHooks>,
}

impl TreeMutator {
    pub fn new(store: Arc<dyn TreeStore>, hooks: Arc<dyn ContentHooks>) -> Self {
        let categories = CategoryStore::new(Arc::clone(&store));
        let navigator = TreeNavigator::new(Arc::clone(&store));
        Self {
            store,
            categories,
            navigator,
            hooks,
        }
    }

    /// Move `id` (with its whole subtree) under `new_parent` (root when
    /// None). Returns the number of nodes whose path changed.
    pub async fn move_category(
        &self,
        id: Uuid,
        new_parent: Option<Uuid>,
        new_sort_order: Option<i32>,
    ) -> TaxonomyResult<usize> {
        if new_parent == Some(id) {
            return Err(TaxonomyError::CircularReference(format!(
                "category {id} cannot become its own parent"
            )));
        }
        if self.navigator.would_create_cycle(id, new_parent).await? {
            // new_parent is Some here; None never cycles.
            let candidate = new_parent.unwrap_or(id);
            return Err(TaxonomyError::CircularReference(format!(
                "category {candidate} is a descendant of {id}"
            )));
        }

        let node = self.live_node(id).await?;
        let (new_path, new_depth) = match new_parent {
            Some(parent_id) => {
                let parent = self.live_node(parent_id).await.map_err(|_| {
                    TaxonomyError::not_found("new parent category", parent_id)
                })?;
                (parent.child_path(), parent.depth + 1)
            }
            None => (NodePath::root(), 0),
        };

        let parent_changed = node.parent_id != new_parent;
        if !parent_changed && new_sort_order.is_none() {
            return Ok(0);
        }

        let sort_order = match new_sort_order {
            Some(sort_order) => sort_order,
            None => self
                .store
                .max_sort_order(new_parent)
                .await?
                .map_or(1, |m| m + 1),
        };

        let now = Utc::now();
        let mut batch = WriteBatch::new();

        if !parent_changed {
            // Pure reorder among the same siblings: no path or closure work.
            let mut updated = node.clone();
            updated.sort_order = sort_order;
            updated.modified_at = now;
            updated.version = node.version + 1;
            batch.update_node(updated, node.version);
            self.store.apply(batch).await?;
            return Ok(0);
        }

        let descendants = self
            .store
            .descendants_by_prefix(&node.subtree_prefix())
            .await?;
        let plan = plan_subtree_paths(&node, new_path, new_depth, &descendants)?;

        let mut moved_ids = Vec::with_capacity(plan.len());
        let mut closure_entries = Vec::new();
        let mut changed = 0usize;
        for planned in &plan {
            moved_ids.push(planned.node.id);
            closure_entries.extend(closure::entries_for(planned.node.id, &planned.path));
            if planned.path != planned.node.path {
                changed += 1;
            }

            let mut updated = planned.node.clone();
            updated.path = planned.path.clone();
            updated.depth = planned.depth;
            if updated.id == id {
                updated.parent_id = new_parent;
                updated.sort_order = sort_order;
            }
            updated.modified_at = now;
            updated.version = planned.node.version + 1;
            batch.update_node(updated, planned.node.version);
        }

        batch
            .delete_closure_of(moved_ids)
            .insert_closure(closure_entries);
        self.store.apply(batch).await?;

        tracing::info!(
            id = %id,
            new_parent = ?new_parent,
            moved = changed,
            "category subtree moved"
        );

        Ok(changed)
    }

    /// Clone `id` under `new_parent` (root when None), optionally with its
    /// whole subtree. The source is never mutated; cloned nodes get fresh
    /// ids and derived codes.
    pub async fn copy_category(
        &self,
        id: Uuid,
        new_parent: Option<Uuid>,
        include_descendants: bool,
        new_name: Option<String>,
    ) -> TaxonomyResult<CopyOutcome> {
        let source = self.live_node(id).await?;
        let (root_path, root_depth) = match new_parent {
            Some(parent_id) => {
                let parent = self.live_node(parent_id).await.map_err(|_| {
                    TaxonomyError::not_found("destination category", parent_id)
                })?;
                (parent.child_path(), parent.depth + 1)
            }
            None => (NodePath::root(), 0),
        };

        let mut taken_codes: HashSet<String> = self
            .store
            .all_nodes(false)
            .await?
            .into_iter()
            .map(|n| n.code)
            .collect();

        let sort_order = self
            .store
            .max_sort_order(new_parent)
            .await?
            .map_or(1, |m| m + 1);

        let now = Utc::now();
        let mut id_map: HashMap<Uuid, Uuid> = HashMap::new();
        let mut batch = WriteBatch::new();
        let mut nodes_copied = 0usize;

        let new_root_id = Uuid::now_v7();
        let mut root_clone = clone_node(&source, new_root_id, new_parent, root_path, root_depth, now);
        root_clone.code = derive_copy_code(&source.code, &mut taken_codes);
        if let Some(name) = new_name {
            root_clone.name = name;
        }
        root_clone.sort_order = sort_order;
        id_map.insert(source.id, new_root_id);
        batch.insert_node(root_clone.clone());
        batch.insert_closure(closure::entries_for(new_root_id, &root_clone.path));
        nodes_copied += 1;

        if include_descendants {
            // Parent clones are queued before their children, so the new
            // parent's path is always known when a child is planned.
            let mut queue: Vec<(Uuid, CategoryNode)> = Vec::new();
            for child in self.store.children(Some(source.id)).await? {
                queue.push((new_root_id, child));
            }
            let mut cursor = 0;
            while cursor < queue.len() {
                let (new_parent_id, original) = queue[cursor].clone();
                cursor += 1;

                let grandchildren = self.store.children(Some(original.id)).await?;

                let new_id = Uuid::now_v7();
                id_map.insert(original.id, new_id);
                let parent_path = self
                    .planned_path(&batch, new_parent_id)
                    .ok_or_else(|| TaxonomyError::IntegrityViolation(format!(
                        "copy plan lost track of parent {new_parent_id}"
                    )))?;
                let path = parent_path.extended(new_parent_id);
                let depth = path.depth();
                let mut node_clone = clone_node(&original, new_id, Some(new_parent_id), path, depth, now);
                node_clone.code = derive_copy_code(&original.code, &mut taken_codes);
                batch.insert_node(node_clone.clone());
                batch.insert_closure(closure::entries_for(new_id, &node_clone.path));
                nodes_copied += 1;

                for grandchild in grandchildren {
                    queue.push((new_id, grandchild));
                }
            }
        }

        self.store.apply(batch).await?;

        tracing::info!(
            source = %id,
            new_root = %new_root_id,
            copied = nodes_copied,
            "category subtree copied"
        );

        Ok(CopyOutcome {
            new_root_id,
            nodes_copied,
            id_map,
        })
    }

    /// Delete `id` after resolving its children per `strategy`. The
    /// attached-content hook must clear every node being removed, or the
    /// delete fails with `HasAttachedContent`.
    pub async fn delete_category(
        &self,
        id: Uuid,
        strategy: DeleteStrategy,
    ) -> TaxonomyResult<DeleteOutcome> {
        let node = self.live_node(id).await?;
        let children = self.store.children(Some(id)).await?;
        let now = Utc::now();

        match strategy {
            DeleteStrategy::Prevent => {
                if !children.is_empty() {
                    return Err(TaxonomyError::HasChildren {
                        id,
                        count: children.len(),
                    });
                }
                self.guard_attached_content(id).await?;
                self.categories.soft_delete(id).await?;

                tracing::info!(id = %id, "category deleted");
                Ok(DeleteOutcome {
                    deleted: 1,
                    reparented: 0,
                })
            }
            DeleteStrategy::MoveChildrenToParent | DeleteStrategy::MoveChildrenToRoot => {
                let target = match strategy {
                    DeleteStrategy::MoveChildrenToParent => node.parent_id,
                    _ => None,
                };
                self.hooks.reassign_attached_content(id, target).await?;
                self.guard_attached_content(id).await?;

                let (new_path, new_depth) = match target {
                    Some(target_id) => {
                        let parent = self.live_node(target_id).await?;
                        (parent.child_path(), parent.depth + 1)
                    }
                    None => (NodePath::root(), 0),
                };

                let mut batch = WriteBatch::new();
                let mut reparented_ids = Vec::new();
                let mut closure_entries = Vec::new();
                let mut reparented = 0usize;

                for child in &children {
                    let descendants = self
                        .store
                        .descendants_by_prefix(&child.subtree_prefix())
                        .await?;
                    let plan =
                        plan_subtree_paths(child, new_path.clone(), new_depth, &descendants)?;
                    for planned in &plan {
                        reparented_ids.push(planned.node.id);
                        closure_entries
                            .extend(closure::entries_for(planned.node.id, &planned.path));
                        if planned.path != planned.node.path {
                            reparented += 1;
                        }

                        let mut updated = planned.node.clone();
                        updated.path = planned.path.clone();
                        updated.depth = planned.depth;
                        if updated.id == child.id {
                            updated.parent_id = target;
                        }
                        updated.modified_at = now;
                        updated.version = planned.node.version + 1;
                        batch.update_node(updated, planned.node.version);
                    }
                }

                batch
                    .update_node(storage::mark_deleted(&node, now, None), node.version)
                    .delete_closure_of(
                        reparented_ids
                            .iter()
                            .copied()
                            .chain(std::iter::once(id))
                            .collect(),
                    )
                    .insert_closure(closure_entries);
                self.store.apply(batch).await?;

                tracing::info!(
                    id = %id,
                    target = ?target,
                    reparented,
                    "category deleted, children re-parented"
                );
                Ok(DeleteOutcome {
                    deleted: 1,
                    reparented,
                })
            }
            DeleteStrategy::CascadeDelete => {
                let mut subtree = vec![node.clone()];
                subtree.extend(
                    self.store
                        .descendants_by_prefix(&node.subtree_prefix())
                        .await?,
                );

                for member in &subtree {
                    self.guard_attached_content(member.id).await?;
                }

                let mut batch = WriteBatch::new();
                // Depth-first: leaves are marked before their ancestors.
                for member in subtree.iter().rev() {
                    batch.update_node(storage::mark_deleted(member, now, None), member.version);
                }
                batch.delete_closure_of(subtree.iter().map(|n| n.id).collect());
                self.store.apply(batch).await?;

                tracing::info!(id = %id, deleted = subtree.len(), "category subtree cascade-deleted");
                Ok(DeleteOutcome {
                    deleted: subtree.len(),
                    reparented: 0,
                })
            }
        }
    }

    async fn guard_attached_content(&self, id: Uuid) -> TaxonomyResult<()> {
        if self.hooks.has_attached_content(id).await? {
            return Err(TaxonomyError::HasAttachedContent(id));
        }
        Ok(())
    }

    async fn live_node(&self, id: Uuid) -> TaxonomyResult<CategoryNode> {
        self.store
            .node(id)
            .await?
            .filter(|n| !n.is_deleted())
            .ok_or_else(|| TaxonomyError::not_found("category", id))
    }

    /// Path a node inserted earlier in `batch` was planned with.
    fn planned_path(&self, batch: &WriteBatch, id: Uuid) -> Option<NodePath> {
        batch.ops().iter().rev().find_map(|op| match op {
            crate::storage::WriteOp::InsertNode(node) if node.id == id => Some(node.path.clone()),
            _ => None,
        })
    }
}

struct PlannedNode {
    node: CategoryNode,
    path: NodePath,
    depth: i32,
}

/// Re-derive paths for a subtree being attached below `new_path`/`new_depth`.
///
/// `descendants` must be ordered shallowest first; each entry's new path is
/// then built from its already-planned parent, top-down.
fn plan_subtree_paths(
    root: &CategoryNode,
    new_path: NodePath,
    new_depth: i32,
    descendants: &[CategoryNode],
) -> TaxonomyResult<Vec<PlannedNode>> {
    let mut planned: HashMap<Uuid, (NodePath, i32)> = HashMap::new();
    planned.insert(root.id, (new_path.clone(), new_depth));

    let mut plan = Vec::with_capacity(descendants.len() + 1);
    plan.push(PlannedNode {
        node: root.clone(),
        path: new_path,
        depth: new_depth,
    });

    for node in descendants {
        let Some(parent_id) = node.parent_id else {
            return Err(TaxonomyError::IntegrityViolation(format!(
                "node {} inside subtree of {} has no parent",
                node.id, root.id
            )));
        };
        let Some((parent_path, parent_depth)) = planned.get(&parent_id).cloned() else {
            return Err(TaxonomyError::IntegrityViolation(format!(
                "node {} references parent {} outside its own subtree",
                node.id, parent_id
            )));
        };
        let path = parent_path.extended(parent_id);
        let depth = parent_depth + 1;
        planned.insert(node.id, (path.clone(), depth));
        plan.push(PlannedNode {
            node: node.clone(),
            path,
            depth,
        });
    }

    Ok(plan)
}

fn clone_node(
    source: &CategoryNode,
    id: Uuid,
    parent_id: Option<Uuid>,
    path: NodePath,
    depth: i32,
    now: DateTime<Utc>,
) -> CategoryNode {
    CategoryNode {
        id,
        name: source.name.clone(),
        code: source.code.clone(),
        description: source.description.clone(),
        parent_id,
        path,
        depth,
        sort_order: source.sort_order,
        category_type: source.category_type,
        category_level: source.category_level,
        allow_questions: source.allow_questions,
        is_active: source.is_active,
        state: crate::models::Lifecycle::Active,
        created_at: now,
        modified_at: now,
        created_by: source.created_by.clone(),
        modified_by: None,
        version: 1,
    }
}

/// Derive a fresh code for a clone: `{code}-copy`, then `{code}-copy-2`, …
fn derive_copy_code(code: &str, taken: &mut HashSet<String>) -> String {
    let mut candidate = format!("{code}-copy");
    let mut n = 2;
    while taken.contains(&candidate) {
        candidate = format!("{code}-copy-{n}");
        n += 1;
    }
    taken.insert(candidate.clone());
    candidate
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn copy_codes_are_derived_uniquely() {
        let mut taken: HashSet<String> =
            ["algebra", "algebra-copy"].iter().map(|s| s.to_string()).collect();

        assert_eq!(derive_copy_code("algebra", &mut taken), "algebra-copy-2");
        assert_eq!(derive_copy_code("algebra", &mut taken), "algebra-copy-3");
        assert_eq!(derive_copy_code("geometry", &mut taken), "geometry-copy");
    }

    #[test]
    fn plan_rederives_top_down() {
        use crate::models::{CategoryLevel, CategoryType, Lifecycle};
        use chrono::Utc;

        let now = Utc::now();
        let make = |id: Uuid, parent: Option<Uuid>, path: NodePath| CategoryNode {
            id,
            name: "n".to_string(),
            code: id.to_string(),
            description: None,
            parent_id: parent,
            path: path.clone(),
            depth: path.depth(),
            sort_order: 1,
            category_type: CategoryType::Topic,
            category_level: CategoryLevel::Basic,
            allow_questions: false,
            is_active: true,
            state: Lifecycle::Active,
            created_at: now,
            modified_at: now,
            created_by: None,
            modified_by: None,
            version: 1,
        };

        let r = Uuid::now_v7();
        let c1 = Uuid::now_v7();
        let c2 = Uuid::now_v7();

        let root = make(c1, Some(r), NodePath::new(vec![r]));
        let child = make(c2, Some(c1), NodePath::new(vec![r, c1]));

        // Moving c1 to root: c1 gets [], c2 gets [c1].
        let plan = plan_subtree_paths(&root, NodePath::root(), 0, &[child]).unwrap();

        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].path, NodePath::root());
        assert_eq!(plan[0].depth, 0);
        assert_eq!(plan[1].path, NodePath::new(vec![c1]));
        assert_eq!(plan[1].depth, 1);
    }
}
