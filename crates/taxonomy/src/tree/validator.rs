//! Tree integrity checks and repair.
//!
//! Validation never trusts stored paths or closure rows: the expected shape
//! is re-derived from parent edges alone, then diffed against what the store
//! actually holds. Repair re-parents orphans to root, purges closure rows
//! with no derivable counterpart, and inserts the rows that are missing.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use super::closure;
use crate::error::TaxonomyResult;
use crate::models::{CategoryNode, ClosureEntry, NodePath};
use crate::storage::{TreeStore, WriteBatch};

/// A single inconsistency found by [`TreeValidator::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityIssue {
    /// `parent_id` points at a node that does not exist or is deleted.
    OrphanedNode { id: Uuid, parent_id: Uuid },
    /// The node's parent chain loops back on itself.
    ParentCycle { id: Uuid },
    /// A closure row exists that parent edges cannot account for.
    DanglingClosure {
        ancestor_id: Uuid,
        descendant_id: Uuid,
    },
    /// A row the parent edges require is absent from the closure index.
    MissingClosure {
        ancestor_id: Uuid,
        descendant_id: Uuid,
        distance: i32,
    },
    /// The stored materialized path disagrees with the path derived from
    /// parent edges.
    PathDrift {
        id: Uuid,
        stored: NodePath,
        derived: NodePath,
    },
}

impl IntegrityIssue {
    pub fn describe(&self) -> String {
        match self {
            Self::OrphanedNode { id, parent_id } => {
                format!("node {id} references missing parent {parent_id}")
            }
            Self::ParentCycle { id } => {
                format!("node {id} sits on a parent cycle")
            }
            Self::DanglingClosure {
                ancestor_id,
                descendant_id,
            } => format!("closure row {ancestor_id} -> {descendant_id} has no tree counterpart"),
            Self::MissingClosure {
                ancestor_id,
                descendant_id,
                distance,
            } => format!(
                "closure row {ancestor_id} -> {descendant_id} (distance {distance}) is missing"
            ),
            Self::PathDrift {
                id,
                stored,
                derived,
            } => format!(
                "node {id} stores path {} but parent edges derive {}",
                stored.encoded(),
                derived.encoded()
            ),
        }
    }
}

/// Everything `validate` found, in one pass.
#[derive(Debug, Default)]
pub struct IntegrityReport {
    pub issues: Vec<IntegrityIssue>,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn orphan_count(&self) -> usize {
        self.count(|i| matches!(i, IntegrityIssue::OrphanedNode { .. }))
    }

    pub fn cycle_count(&self) -> usize {
        self.count(|i| matches!(i, IntegrityIssue::ParentCycle { .. }))
    }

    pub fn closure_issue_count(&self) -> usize {
        self.count(|i| {
            matches!(
                i,
                IntegrityIssue::DanglingClosure { .. } | IntegrityIssue::MissingClosure { .. }
            )
        })
    }

    pub fn path_drift_count(&self) -> usize {
        self.count(|i| matches!(i, IntegrityIssue::PathDrift { .. }))
    }

    fn count(&self, pred: impl Fn(&IntegrityIssue) -> bool) -> usize {
        self.issues.iter().filter(|i| pred(i)).count()
    }
}

/// What `repair` actually changed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RepairReport {
    pub orphans_reparented: usize,
    pub paths_rewritten: usize,
    pub closure_rows_purged: usize,
    pub closure_rows_inserted: usize,
}

pub struct TreeValidator {
    store: Arc<dyn TreeStore>,
}

impl TreeValidator {
    pub fn new(store: Arc<dyn TreeStore>) -> Self {
        Self { store }
    }

    /// Full-tree consistency check over live nodes and the closure index.
    pub async fn validate(&self) -> TaxonomyResult<IntegrityReport> {
        let nodes = self.store.all_nodes(false).await?;
        let closure_rows = self.store.closure_all().await?;

        let mut report = IntegrityReport::default();
        let by_id: HashMap<Uuid, &CategoryNode> = nodes.iter().map(|n| (n.id, n)).collect();
        let derived = closure::chains_from_edges(&nodes);

        for node in &nodes {
            if let Some(parent_id) = node.parent_id {
                if !by_id.contains_key(&parent_id) {
                    report.issues.push(IntegrityIssue::OrphanedNode {
                        id: node.id,
                        parent_id,
                    });
                    continue;
                }
            }
            match derived.get(&node.id) {
                // Reachable from a root but the stored path disagrees.
                Some(path) if *path != node.path => {
                    report.issues.push(IntegrityIssue::PathDrift {
                        id: node.id,
                        stored: node.path.clone(),
                        derived: path.clone(),
                    });
                }
                Some(_) => {}
                // Parent exists but no root is reachable. A chain that ends
                // at a missing parent is an orphan problem, reported once on
                // the orphan itself; a chain that revisits a node is a cycle.
                None => {
                    if on_parent_cycle(node, &by_id) {
                        report.issues.push(IntegrityIssue::ParentCycle { id: node.id });
                    }
                }
            }
        }

        let expected = expected_closure(&derived);
        let stored: HashMap<(Uuid, Uuid), i32> = closure_rows
            .iter()
            .map(|row| ((row.ancestor_id, row.descendant_id), row.distance))
            .collect();

        for (pair, distance) in &stored {
            if expected.get(pair) != Some(distance) {
                report.issues.push(IntegrityIssue::DanglingClosure {
                    ancestor_id: pair.0,
                    descendant_id: pair.1,
                });
            }
        }
        for (pair, distance) in &expected {
            if !stored.contains_key(pair) {
                report.issues.push(IntegrityIssue::MissingClosure {
                    ancestor_id: pair.0,
                    descendant_id: pair.1,
                    distance: *distance,
                });
            }
        }

        if !report.is_clean() {
            tracing::warn!(issues = report.issues.len(), "tree integrity check failed");
        }

        Ok(report)
    }

    /// Fix what `validate` reports. Orphans (and their subtrees) are
    /// re-parented to root, drifted paths are rewritten from parent edges,
    /// and the closure index is reconciled row by row. Parent cycles are
    /// only surfaced, never broken automatically.
    pub async fn repair(&self) -> TaxonomyResult<RepairReport> {
        let report = self.validate().await?;
        if report.is_clean() {
            return Ok(RepairReport::default());
        }

        let nodes = self.store.all_nodes(false).await?;
        let by_id: HashMap<Uuid, CategoryNode> = nodes.iter().map(|n| (n.id, n.clone())).collect();
        let now = Utc::now();
        let mut repaired = RepairReport::default();
        let mut batch = WriteBatch::new();

        // Re-parent each orphan to root, then re-derive its subtree paths
        // from the repaired edge.
        let orphan_ids: Vec<Uuid> = report
            .issues
            .iter()
            .filter_map(|issue| match issue {
                IntegrityIssue::OrphanedNode { id, .. } => Some(*id),
                _ => None,
            })
            .collect();

        let mut rewritten: HashSet<Uuid> = HashSet::new();
        for orphan_id in &orphan_ids {
            let Some(orphan) = by_id.get(orphan_id) else {
                continue;
            };
            let mut updated = orphan.clone();
            updated.parent_id = None;
            updated.path = NodePath::root();
            updated.depth = 0;
            updated.modified_at = now;
            updated.version = orphan.version + 1;
            tracing::warn!(id = %orphan_id, "re-parenting orphaned node to root");
            batch.update_node(updated, orphan.version);
            rewritten.insert(*orphan_id);
            repaired.orphans_reparented += 1;

            // Descendants of the orphan keep their relative shape but need
            // paths re-rooted under the repaired node.
            let subtree = self
                .store
                .descendants_by_prefix(&orphan.subtree_prefix())
                .await?;
            let mut planned: HashMap<Uuid, NodePath> = HashMap::new();
            planned.insert(*orphan_id, NodePath::root());
            for node in &subtree {
                let Some(parent_id) = node.parent_id else {
                    continue;
                };
                let Some(parent_path) = planned.get(&parent_id).cloned() else {
                    continue;
                };
                let path = parent_path.extended(parent_id);
                let mut updated = node.clone();
                updated.path = path.clone();
                updated.depth = path.depth();
                updated.modified_at = now;
                updated.version = node.version + 1;
                batch.update_node(updated, node.version);
                rewritten.insert(node.id);
                planned.insert(node.id, path);
            }
        }

        // Rewrite drifted paths to the chain derived from parent edges. A
        // node already rewritten by orphan handling keeps that version; one
        // update per node per batch.
        for issue in &report.issues {
            let IntegrityIssue::PathDrift { id, derived, .. } = issue else {
                continue;
            };
            if rewritten.contains(id) {
                continue;
            }
            let Some(node) = by_id.get(id) else {
                continue;
            };
            let mut updated = node.clone();
            updated.path = derived.clone();
            updated.depth = derived.depth();
            updated.modified_at = now;
            updated.version = node.version + 1;
            tracing::warn!(id = %id, path = %derived, "rewriting drifted materialized path");
            batch.update_node(updated, node.version);
            rewritten.insert(*id);
            repaired.paths_rewritten += 1;
        }

        // Reconcile the closure index against the post-repair tree shape.
        let mut repaired_nodes = nodes.clone();
        for node in &mut repaired_nodes {
            if orphan_ids.contains(&node.id) {
                node.parent_id = None;
            }
        }
        let derived = closure::chains_from_edges(&repaired_nodes);
        let expected = expected_closure(&derived);
        let stored: HashMap<(Uuid, Uuid), i32> = self
            .store
            .closure_all()
            .await?
            .into_iter()
            .map(|row| ((row.ancestor_id, row.descendant_id), row.distance))
            .collect();

        // Pairs absent from the expected set are purged outright; pairs
        // present with the wrong distance are corrected by the upserting
        // insert below.
        let dangling: Vec<(Uuid, Uuid)> = stored
            .keys()
            .filter(|pair| !expected.contains_key(*pair))
            .copied()
            .collect();
        repaired.closure_rows_purged = dangling.len();
        if !dangling.is_empty() {
            tracing::warn!(rows = dangling.len(), "purging dangling closure rows");
        }

        let missing: Vec<ClosureEntry> = expected
            .iter()
            .filter(|(pair, distance)| stored.get(*pair) != Some(distance))
            .map(|(pair, distance)| ClosureEntry {
                ancestor_id: pair.0,
                descendant_id: pair.1,
                distance: *distance,
            })
            .collect();
        repaired.closure_rows_inserted = missing.len();
        if !missing.is_empty() {
            tracing::warn!(rows = missing.len(), "restoring missing closure rows");
        }

        batch.delete_closure_pairs(dangling).insert_closure(missing);
        self.store.apply(batch).await?;

        tracing::info!(
            orphans = repaired.orphans_reparented,
            purged = repaired.closure_rows_purged,
            inserted = repaired.closure_rows_inserted,
            "tree repair complete"
        );

        Ok(repaired)
    }
}

/// Whether `node`'s parent chain loops back on itself (as opposed to ending
/// at a missing parent).
fn on_parent_cycle(node: &CategoryNode, by_id: &HashMap<Uuid, &CategoryNode>) -> bool {
    let mut seen = HashSet::new();
    let mut current = node;
    loop {
        if !seen.insert(current.id) {
            return true;
        }
        match current.parent_id.and_then(|parent_id| by_id.get(&parent_id)) {
            Some(parent) => current = parent,
            None => return false,
        }
    }
}

/// All (ancestor, descendant) -> distance pairs a self-consistent tree with
/// these root-to-parent chains would hold.
fn expected_closure(derived: &HashMap<Uuid, NodePath>) -> HashMap<(Uuid, Uuid), i32> {
    let mut expected = HashMap::new();
    for (id, path) in derived {
        for entry in closure::entries_for(*id, path) {
            expected.insert((entry.ancestor_id, entry.descendant_id), entry.distance);
        }
    }
    expected
}
