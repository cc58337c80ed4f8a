//! Closure index maintenance.
//!
//! The closure table holds one `(ancestor, descendant, distance)` row per
//! reachable pair over non-deleted nodes, including reflexive distance-0
//! self rows. For a node with an up-to-date materialized path the rows are
//! fully determined by that path; full rebuilds instead walk the parent
//! edges breadth-first from the roots so a stale path cannot leak into the
//! index.

use std::collections::HashMap;
use std::sync::Arc;

use uuid::Uuid;

use crate::config::TreeSettings;
use crate::error::{TaxonomyError, TaxonomyResult};
use crate::models::{CategoryNode, ClosureEntry, NodePath};
use crate::storage::{TreeStore, WriteBatch};

/// Closure rows for one node derived from its materialized path: a self row
/// plus one row per path ancestor, distance counted in parent-hops.
pub fn entries_for(id: Uuid, path: &NodePath) -> Vec<ClosureEntry> {
    let depth = path.depth();
    let mut entries = Vec::with_capacity(path.len() + 1);
    entries.push(ClosureEntry {
        ancestor_id: id,
        descendant_id: id,
        distance: 0,
    });
    for (i, ancestor) in path.ids().iter().enumerate() {
        entries.push(ClosureEntry {
            ancestor_id: *ancestor,
            descendant_id: id,
            distance: depth - i as i32,
        });
    }
    entries
}

/// Ancestor chains derived from parent edges alone, breadth-first from the
/// roots. Nodes not reachable from any root (orphans, cycles) are absent.
pub(crate) fn chains_from_edges(nodes: &[CategoryNode]) -> HashMap<Uuid, NodePath> {
    let mut children_of: HashMap<Option<Uuid>, Vec<Uuid>> = HashMap::new();
    for node in nodes {
        children_of.entry(node.parent_id).or_default().push(node.id);
    }

    let mut chains: HashMap<Uuid, NodePath> = HashMap::new();
    let mut frontier: Vec<Uuid> = children_of.get(&None).cloned().unwrap_or_default();
    for root in &frontier {
        chains.insert(*root, NodePath::root());
    }

    while let Some(id) = frontier.pop() {
        let child_path = match chains.get(&id) {
            Some(path) => path.extended(id),
            None => continue,
        };
        if let Some(children) = children_of.get(&Some(id)) {
            for child in children {
                chains.insert(*child, child_path.clone());
                frontier.push(*child);
            }
        }
    }

    chains
}

/// Builds and rebuilds the ancestor/descendant/distance index.
pub struct ClosureMaintainer {
    store: Arc<dyn TreeStore>,
    settings: TreeSettings,
}

impl ClosureMaintainer {
    pub fn new(store: Arc<dyn TreeStore>, settings: TreeSettings) -> Self {
        Self { store, settings }
    }

    /// Clear the closure table and recompute it as the reflexive-transitive
    /// closure of current parent edges. Inserts are chunked so no single
    /// transaction grows pathologically; the initial clear plus first chunk
    /// share a batch. Returns the number of rows written.
    pub async fn rebuild_all(&self) -> TaxonomyResult<usize> {
        let nodes = self.store.all_nodes(false).await?;
        let chains = chains_from_edges(&nodes);

        let unreachable = nodes.len() - chains.len();
        if unreachable > 0 {
            tracing::warn!(
                count = unreachable,
                "nodes unreachable from any root skipped during closure rebuild"
            );
        }

        let mut entries: Vec<ClosureEntry> = Vec::new();
        for node in &nodes {
            if let Some(chain) = chains.get(&node.id) {
                entries.extend(entries_for(node.id, chain));
            }
        }

        let total = entries.len();
        let chunk_size = self.settings.closure_rebuild_batch_size.max(1);
        let mut chunks = entries.chunks(chunk_size);

        let mut first = WriteBatch::new();
        first.clear_closure();
        if let Some(chunk) = chunks.next() {
            first.insert_closure(chunk.to_vec());
        }
        self.store.apply(first).await?;

        for chunk in chunks {
            let mut batch = WriteBatch::new();
            batch.insert_closure(chunk.to_vec());
            self.store.apply(batch).await?;
        }

        tracing::info!(rows = total, nodes = nodes.len(), "closure index rebuilt");

        Ok(total)
    }

    /// Recompute closure rows for one subtree from its (already updated)
    /// materialized paths. Used by move and delete instead of a full
    /// rebuild.
    pub async fn rebuild_for(&self, subtree_root: Uuid) -> TaxonomyResult<usize> {
        let root = self
            .store
            .node(subtree_root)
            .await?
            .ok_or_else(|| TaxonomyError::not_found("category", subtree_root))?;

        let mut nodes = vec![root.clone()];
        nodes.extend(
            self.store
                .descendants_by_prefix(&root.subtree_prefix())
                .await?,
        );

        let ids: Vec<Uuid> = nodes.iter().map(|n| n.id).collect();
        let mut entries = Vec::new();
        for node in &nodes {
            entries.extend(entries_for(node.id, &node.path));
        }
        let total = entries.len();

        let mut batch = WriteBatch::new();
        batch.delete_closure_of(ids).insert_closure(entries);
        self.store.apply(batch).await?;

        Ok(total)
    }

    /// Renumber the sort orders of `parent`'s children (roots when None) to
    /// a dense, evenly spaced sequence without reordering relative
    /// positions. Returns the number of rows renumbered.
    pub async fn compact_sort_orders(&self, parent: Option<Uuid>) -> TaxonomyResult<usize> {
        let children = self.store.children(parent).await?;
        let step = self.settings.sort_order_step.max(1);

        let mut batch = WriteBatch::new();
        let mut renumbered = 0usize;
        for (i, child) in children.iter().enumerate() {
            let target = step * (i as i32 + 1);
            if child.sort_order == target {
                continue;
            }
            let mut updated = child.clone();
            updated.sort_order = target;
            updated.version = child.version + 1;
            batch.update_node(updated, child.version);
            renumbered += 1;
        }

        if !batch.is_empty() {
            self.store.apply(batch).await?;
        }

        Ok(renumbered)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn entries_include_self_row() {
        let id = Uuid::now_v7();
        let entries = entries_for(id, &NodePath::root());

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].ancestor_id, id);
        assert_eq!(entries[0].descendant_id, id);
        assert_eq!(entries[0].distance, 0);
    }

    #[test]
    fn distances_count_parent_hops() {
        let root = Uuid::now_v7();
        let mid = Uuid::now_v7();
        let id = Uuid::now_v7();

        let entries = entries_for(id, &NodePath::new(vec![root, mid]));

        assert_eq!(entries.len(), 3);
        let by_ancestor: std::collections::HashMap<Uuid, i32> = entries
            .iter()
            .map(|e| (e.ancestor_id, e.distance))
            .collect();
        assert_eq!(by_ancestor[&id], 0);
        assert_eq!(by_ancestor[&mid], 1);
        assert_eq!(by_ancestor[&root], 2);
    }
}
