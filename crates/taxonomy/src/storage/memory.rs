//! In-memory storage backend.
//!
//! Id-indexed arena used by tests and embedded callers. Semantics mirror
//! the Postgres backend: the same filter logic, the same ordering, and the
//! same all-or-nothing batch application — [`MemoryStore::apply`] validates
//! every guard before touching state, so a failing batch leaves the arena
//! unchanged.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use uuid::Uuid;

use super::{TreeStore, WriteBatch, WriteOp};
use crate::error::{TaxonomyError, TaxonomyResult};
use crate::models::{CategoryNode, ClosureEntry};
use crate::query::NodeFilter;

#[derive(Default)]
struct Inner {
    nodes: HashMap<Uuid, CategoryNode>,
    /// (ancestor, descendant) -> distance, matching the table's primary key.
    closure: HashMap<(Uuid, Uuid), i32>,
}

/// Arena-backed [`TreeStore`].
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn sort_siblings(nodes: &mut [CategoryNode]) {
    nodes.sort_by(|a, b| {
        a.sort_order
            .cmp(&b.sort_order)
            .then_with(|| a.name.cmp(&b.name))
    });
}

fn sort_traversal(nodes: &mut [CategoryNode]) {
    nodes.sort_by(|a, b| {
        a.depth
            .cmp(&b.depth)
            .then_with(|| a.sort_order.cmp(&b.sort_order))
            .then_with(|| a.name.cmp(&b.name))
    });
}

#[async_trait]
impl TreeStore for MemoryStore {
    async fn node(&self, id: Uuid) -> TaxonomyResult<Option<CategoryNode>> {
        Ok(self.inner.read().nodes.get(&id).cloned())
    }

    async fn node_by_code(&self, code: &str) -> TaxonomyResult<Option<CategoryNode>> {
        Ok(self
            .inner
            .read()
            .nodes
            .values()
            .find(|n| n.code == code && !n.is_deleted())
            .cloned())
    }

    async fn children(&self, parent: Option<Uuid>) -> TaxonomyResult<Vec<CategoryNode>> {
        let mut children: Vec<CategoryNode> = self
            .inner
            .read()
            .nodes
            .values()
            .filter(|n| n.parent_id == parent && !n.is_deleted())
            .cloned()
            .collect();
        sort_siblings(&mut children);
        Ok(children)
    }

    async fn descendants_by_prefix(&self, prefix: &str) -> TaxonomyResult<Vec<CategoryNode>> {
        let mut nodes: Vec<CategoryNode> = self
            .inner
            .read()
            .nodes
            .values()
            .filter(|n| !n.is_deleted() && n.path.encoded().starts_with(prefix))
            .cloned()
            .collect();
        sort_traversal(&mut nodes);
        Ok(nodes)
    }

    async fn all_nodes(&self, include_deleted: bool) -> TaxonomyResult<Vec<CategoryNode>> {
        let mut nodes: Vec<CategoryNode> = self
            .inner
            .read()
            .nodes
            .values()
            .filter(|n| include_deleted || !n.is_deleted())
            .cloned()
            .collect();
        sort_traversal(&mut nodes);
        Ok(nodes)
    }

    async fn find(&self, filter: &NodeFilter) -> TaxonomyResult<Vec<CategoryNode>> {
        let mut nodes: Vec<CategoryNode> = self
            .inner
            .read()
            .nodes
            .values()
            .filter(|n| filter.matches(n))
            .cloned()
            .collect();
        sort_traversal(&mut nodes);
        Ok(nodes)
    }

    async fn closure_ancestors(&self, id: Uuid) -> TaxonomyResult<Vec<ClosureEntry>> {
        let mut entries: Vec<ClosureEntry> = self
            .inner
            .read()
            .closure
            .iter()
            .filter(|((_, descendant), _)| *descendant == id)
            .map(|((ancestor, descendant), distance)| ClosureEntry {
                ancestor_id: *ancestor,
                descendant_id: *descendant,
                distance: *distance,
            })
            .collect();
        entries.sort_by_key(|e| e.distance);
        Ok(entries)
    }

    async fn closure_descendants(&self, id: Uuid) -> TaxonomyResult<Vec<ClosureEntry>> {
        let mut entries: Vec<ClosureEntry> = self
            .inner
            .read()
            .closure
            .iter()
            .filter(|((ancestor, _), _)| *ancestor == id)
            .map(|((ancestor, descendant), distance)| ClosureEntry {
                ancestor_id: *ancestor,
                descendant_id: *descendant,
                distance: *distance,
            })
            .collect();
        entries.sort_by_key(|e| (e.distance, e.descendant_id));
        Ok(entries)
    }

    async fn closure_all(&self) -> TaxonomyResult<Vec<ClosureEntry>> {
        let mut entries: Vec<ClosureEntry> = self
            .inner
            .read()
            .closure
            .iter()
            .map(|((ancestor, descendant), distance)| ClosureEntry {
                ancestor_id: *ancestor,
                descendant_id: *descendant,
                distance: *distance,
            })
            .collect();
        entries.sort_by_key(|e| (e.ancestor_id, e.descendant_id));
        Ok(entries)
    }

    async fn max_sort_order(&self, parent: Option<Uuid>) -> TaxonomyResult<Option<i32>> {
        Ok(self
            .inner
            .read()
            .nodes
            .values()
            .filter(|n| n.parent_id == parent && !n.is_deleted())
            .map(|n| n.sort_order)
            .max())
    }

    async fn apply(&self, batch: WriteBatch) -> TaxonomyResult<()> {
        let mut inner = self.inner.write();

        // Validate every guard first so a failing batch changes nothing.
        for op in batch.ops() {
            match op {
                WriteOp::InsertNode(node) => {
                    if inner.nodes.contains_key(&node.id) {
                        return Err(TaxonomyError::Conflict(format!(
                            "node {} already exists",
                            node.id
                        )));
                    }
                }
                WriteOp::UpdateNode {
                    node,
                    expected_version,
                } => match inner.nodes.get(&node.id) {
                    None => return Err(TaxonomyError::not_found("category", node.id)),
                    Some(stored) if stored.version != *expected_version => {
                        return Err(TaxonomyError::Conflict(format!(
                            "stale version for {}: stored {}, expected {}",
                            node.id, stored.version, expected_version
                        )));
                    }
                    Some(_) => {}
                },
                WriteOp::InsertClosure(_)
                | WriteOp::DeleteClosureOf(_)
                | WriteOp::DeleteClosurePairs(_)
                | WriteOp::ClearClosure => {}
            }
        }

        for op in batch.ops() {
            match op {
                WriteOp::InsertNode(node) | WriteOp::UpdateNode { node, .. } => {
                    inner.nodes.insert(node.id, node.clone());
                }
                WriteOp::InsertClosure(entries) => {
                    for entry in entries {
                        inner
                            .closure
                            .insert((entry.ancestor_id, entry.descendant_id), entry.distance);
                    }
                }
                WriteOp::DeleteClosureOf(descendants) => {
                    inner
                        .closure
                        .retain(|(_, descendant), _| !descendants.contains(descendant));
                }
                WriteOp::DeleteClosurePairs(pairs) => {
                    for pair in pairs {
                        inner.closure.remove(pair);
                    }
                }
                WriteOp::ClearClosure => inner.closure.clear(),
            }
        }

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::{CategoryLevel, CategoryType, Lifecycle, NodePath};
    use chrono::Utc;

    fn node(name: &str, code: &str) -> CategoryNode {
        let now = Utc::now();
        CategoryNode {
            id: Uuid::now_v7(),
            name: name.to_string(),
            code: code.to_string(),
            description: None,
            parent_id: None,
            path: NodePath::root(),
            depth: 0,
            sort_order: 1,
            category_type: CategoryType::Subject,
            category_level: CategoryLevel::Basic,
            allow_questions: false,
            is_active: true,
            state: Lifecycle::Active,
            created_at: now,
            modified_at: now,
            created_by: None,
            modified_by: None,
            version: 1,
        }
    }

    #[tokio::test]
    async fn insert_and_fetch() {
        let store = MemoryStore::new();
        let n = node("Math", "math");

        let mut batch = WriteBatch::new();
        batch.insert_node(n.clone());
        store.apply(batch).await.unwrap();

        let fetched = store.node(n.id).await.unwrap().unwrap();
        assert_eq!(fetched.code, "math");
        assert!(store.node_by_code("math").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn stale_version_rolls_back_whole_batch() {
        let store = MemoryStore::new();
        let a = node("A", "a");
        let b = node("B", "b");

        let mut setup = WriteBatch::new();
        setup.insert_node(a.clone()).insert_node(b.clone());
        store.apply(setup).await.unwrap();

        // First op would succeed; the stale second op must roll it back too.
        let mut good = a.clone();
        good.name = "A2".to_string();
        good.version = 2;
        let mut stale = b.clone();
        stale.version = 9;

        let mut batch = WriteBatch::new();
        batch.update_node(good, 1).update_node(stale, 7);
        let err = store.apply(batch).await.unwrap_err();
        assert!(matches!(err, TaxonomyError::Conflict(_)));

        let untouched = store.node(a.id).await.unwrap().unwrap();
        assert_eq!(untouched.name, "A");
        assert_eq!(untouched.version, 1);
    }

    #[tokio::test]
    async fn children_ordered_by_sort_order_then_name() {
        let store = MemoryStore::new();
        let parent = node("Parent", "p");

        let mut c1 = node("Zeta", "z");
        c1.parent_id = Some(parent.id);
        c1.path = parent.child_path();
        c1.depth = 1;
        c1.sort_order = 1;

        let mut c2 = node("Alpha", "al");
        c2.parent_id = Some(parent.id);
        c2.path = parent.child_path();
        c2.depth = 1;
        c2.sort_order = 1;

        let mut c3 = node("First", "f");
        c3.parent_id = Some(parent.id);
        c3.path = parent.child_path();
        c3.depth = 1;
        c3.sort_order = 0;

        let mut batch = WriteBatch::new();
        batch
            .insert_node(parent.clone())
            .insert_node(c1)
            .insert_node(c2)
            .insert_node(c3);
        store.apply(batch).await.unwrap();

        let children = store.children(Some(parent.id)).await.unwrap();
        let names: Vec<&str> = children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["First", "Alpha", "Zeta"]);
    }

    #[tokio::test]
    async fn closure_ops() {
        let store = MemoryStore::new();
        let a = Uuid::now_v7();
        let b = Uuid::now_v7();

        let mut batch = WriteBatch::new();
        batch.insert_closure(vec![
            ClosureEntry {
                ancestor_id: a,
                descendant_id: a,
                distance: 0,
            },
            ClosureEntry {
                ancestor_id: a,
                descendant_id: b,
                distance: 1,
            },
            ClosureEntry {
                ancestor_id: b,
                descendant_id: b,
                distance: 0,
            },
        ]);
        store.apply(batch).await.unwrap();

        assert_eq!(store.closure_descendants(a).await.unwrap().len(), 2);
        assert_eq!(store.closure_ancestors(b).await.unwrap().len(), 2);

        let mut purge = WriteBatch::new();
        purge.delete_closure_of(vec![b]);
        store.apply(purge).await.unwrap();

        assert_eq!(store.closure_all().await.unwrap().len(), 1);
    }
}
