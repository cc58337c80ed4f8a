//! Read-only tree traversal.
//!
//! All operations are side-effect free. Reads on missing or deleted nodes
//! return empty collections rather than errors; only single-node lookups in
//! the Category Store fail with `NotFound`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use uuid::Uuid;

use crate::error::TaxonomyResult;
use crate::models::{CategoryNode, CategoryTreeNode, TreeStatistics};
use crate::query::NodeFilter;
use crate::storage::TreeStore;

/// Upper bound on parent-link hops during the cycle probe; well past any
/// realistic tree depth.
const MAX_ANCESTOR_HOPS: usize = 10_000;

/// Read-only traversal over the category tree.
pub struct TreeNavigator {
    store: Arc<dyn TreeStore>,
}

impl TreeNavigator {
    pub fn new(store: Arc<dyn TreeStore>) -> Self {
        Self { store }
    }

    /// Non-deleted root nodes ordered by sort_order then name.
    pub async fn roots(&self) -> TaxonomyResult<Vec<CategoryNode>> {
        self.store.children(None).await
    }

    /// Non-deleted direct children of `parent`, ordered by sort_order then
    /// name.
    pub async fn children(&self, parent: Option<Uuid>) -> TaxonomyResult<Vec<CategoryNode>> {
        self.store.children(parent).await
    }

    /// Every non-deleted node below `id` (prefix match on the materialized
    /// path), shallowest first.
    pub async fn descendants(&self, id: Uuid) -> TaxonomyResult<Vec<CategoryNode>> {
        let Some(node) = self.live_node(id).await? else {
            return Ok(Vec::new());
        };
        self.store.descendants_by_prefix(&node.subtree_prefix()).await
    }

    /// Descendants resolved through the closure index (distance > 0)
    /// instead of the path prefix. The two agree whenever the index is
    /// consistent; the validator checks exactly that.
    pub async fn descendants_via_closure(&self, id: Uuid) -> TaxonomyResult<Vec<CategoryNode>> {
        let entries = self.store.closure_descendants(id).await?;
        let mut nodes = Vec::new();
        for entry in entries {
            if entry.distance == 0 {
                continue;
            }
            if let Some(node) = self.live_node(entry.descendant_id).await? {
                nodes.push(node);
            }
        }
        Ok(nodes)
    }

    /// Ancestors of `id` ordered root first. Empty for roots, missing and
    /// deleted nodes.
    pub async fn ancestors(&self, id: Uuid) -> TaxonomyResult<Vec<CategoryNode>> {
        let Some(node) = self.live_node(id).await? else {
            return Ok(Vec::new());
        };

        let mut ancestors = Vec::with_capacity(node.path.len());
        for ancestor_id in node.path.ids() {
            if let Some(ancestor) = self.live_node(*ancestor_id).await? {
                ancestors.push(ancestor);
            }
        }
        Ok(ancestors)
    }

    /// Ancestors plus the node itself, ordered root → self.
    pub async fn breadcrumbs(&self, id: Uuid) -> TaxonomyResult<Vec<CategoryNode>> {
        let Some(node) = self.live_node(id).await? else {
            return Ok(Vec::new());
        };

        let mut trail = self.ancestors(id).await?;
        trail.push(node);
        Ok(trail)
    }

    /// Materialize the subtree under `id` down to `max_depth` levels below
    /// it (unbounded when None), child lists ordered by sort_order then
    /// name.
    pub async fn subtree(
        &self,
        id: Uuid,
        max_depth: Option<i32>,
    ) -> TaxonomyResult<Option<CategoryTreeNode>> {
        let Some(root) = self.live_node(id).await? else {
            return Ok(None);
        };

        let descendants = self
            .store
            .descendants_by_prefix(&root.subtree_prefix())
            .await?;

        let mut children_of: HashMap<Uuid, Vec<CategoryNode>> = HashMap::new();
        for node in descendants {
            if let Some(parent_id) = node.parent_id {
                children_of.entry(parent_id).or_default().push(node);
            }
        }

        let base_depth = root.depth;
        Ok(Some(build_tree(
            root,
            &mut children_of,
            base_depth,
            max_depth,
        )))
    }

    /// True iff `candidate_parent` equals `id` or lies in `id`'s subtree —
    /// exactly the moves that would create a cycle. Moving to root (None)
    /// can never create one.
    ///
    /// Walks parent links from the candidate upward rather than trusting
    /// materialized paths, since the check guards the very writes that keep
    /// those paths correct.
    pub async fn would_create_cycle(
        &self,
        id: Uuid,
        candidate_parent: Option<Uuid>,
    ) -> TaxonomyResult<bool> {
        let Some(candidate) = candidate_parent else {
            return Ok(false);
        };
        if candidate == id {
            return Ok(true);
        }

        let mut current = candidate;
        let mut seen = HashSet::new();
        for _ in 0..MAX_ANCESTOR_HOPS {
            if !seen.insert(current) {
                // Pre-existing parent cycle above the candidate; the move
                // itself adds no new one.
                return Ok(false);
            }
            let Some(node) = self.store.node(current).await? else {
                return Ok(false);
            };
            match node.parent_id {
                Some(parent_id) if parent_id == id => return Ok(true),
                Some(parent_id) => current = parent_id,
                None => return Ok(false),
            }
        }
        Ok(false)
    }

    /// Shape statistics for the whole forest or the subtree under `root`.
    pub async fn statistics(&self, root: Option<Uuid>) -> TaxonomyResult<TreeStatistics> {
        let scope: Vec<CategoryNode> = match root {
            None => self.store.all_nodes(false).await?,
            Some(id) => {
                let Some(node) = self.live_node(id).await? else {
                    return Ok(TreeStatistics::default());
                };
                let mut nodes = vec![node.clone()];
                nodes.extend(
                    self.store
                        .descendants_by_prefix(&node.subtree_prefix())
                        .await?,
                );
                nodes
            }
        };

        let ids: HashSet<Uuid> = scope.iter().map(|n| n.id).collect();
        let parents_in_scope: HashSet<Uuid> = scope
            .iter()
            .filter_map(|n| n.parent_id)
            .filter(|p| ids.contains(p))
            .collect();

        let mut stats = TreeStatistics {
            total_nodes: scope.len(),
            ..TreeStatistics::default()
        };
        for node in &scope {
            stats.max_depth = stats.max_depth.max(node.depth);
            *stats.nodes_per_depth.entry(node.depth).or_default() += 1;
            if !parents_in_scope.contains(&node.id) {
                stats.leaf_count += 1;
            }
            let parent_outside = node
                .parent_id
                .is_none_or(|parent_id| !ids.contains(&parent_id));
            if parent_outside {
                stats.root_count += 1;
            }
        }

        Ok(stats)
    }

    /// Filtered listing over the whole tree.
    pub async fn find(&self, filter: &NodeFilter) -> TaxonomyResult<Vec<CategoryNode>> {
        self.store.find(filter).await
    }

    async fn live_node(&self, id: Uuid) -> TaxonomyResult<Option<CategoryNode>> {
        Ok(self.store.node(id).await?.filter(|n| !n.is_deleted()))
    }
}

fn build_tree(
    node: CategoryNode,
    children_of: &mut HashMap<Uuid, Vec<CategoryNode>>,
    base_depth: i32,
    max_depth: Option<i32>,
) -> CategoryTreeNode {
    let id = node.id;
    let relative_depth = node.depth - base_depth;
    let descend = max_depth.is_none_or(|limit| relative_depth < limit);

    let children = if descend {
        children_of
            .remove(&id)
            .unwrap_or_default()
            .into_iter()
            .map(|child| build_tree(child, children_of, base_depth, max_depth))
            .collect()
    } else {
        Vec::new()
    };

    CategoryTreeNode { node, children }
}
