#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Integrity validation and repair integration tests.
//!
//! Corruption is injected through raw write batches against the same store
//! the service runs on, bypassing the engine's own invariant maintenance.

mod common;

use std::sync::Arc;

use uuid::Uuid;

use quizforge_taxonomy::{
    CategoryLevel, CategoryNode, CategoryType, ClosureEntry, IntegrityIssue, Lifecycle,
    MemoryStore, NoAttachedContent, NodePath, TaxonomyService, TreeSettings, TreeStore,
    WriteBatch,
};

use common::{create_input, seed_math_tree};

/// Service plus a handle on the raw store for injecting corruption.
fn service_with_store() -> (Arc<TaxonomyService>, Arc<MemoryStore>) {
    common::init_tracing();
    let store = Arc::new(MemoryStore::new());
    let svc = TaxonomyService::new(
        Arc::clone(&store) as Arc<dyn TreeStore>,
        Arc::new(NoAttachedContent),
        TreeSettings::default(),
    );
    (svc, store)
}

fn raw_node(id: Uuid, code: &str, parent_id: Option<Uuid>, path: NodePath) -> CategoryNode {
    let now = chrono::Utc::now();
    CategoryNode {
        id,
        name: code.to_string(),
        code: code.to_string(),
        description: None,
        parent_id,
        depth: path.depth(),
        path,
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
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn clean_tree_validates_clean() {
    let (svc, _) = service_with_store();
    seed_math_tree(&svc).await;

    let report = svc.validate_tree().await.unwrap();
    assert!(report.is_clean());
}

#[tokio::test]
async fn orphaned_node_is_detected() {
    let (svc, store) = service_with_store();
    seed_math_tree(&svc).await;

    let ghost_parent = Uuid::now_v7();
    let orphan = raw_node(
        Uuid::now_v7(),
        "orphan",
        Some(ghost_parent),
        NodePath::new(vec![ghost_parent]),
    );
    let mut batch = WriteBatch::new();
    batch.insert_node(orphan.clone());
    store.apply(batch).await.unwrap();

    let report = svc.validate_tree().await.unwrap();
    assert_eq!(report.orphan_count(), 1);
    assert!(report.issues.iter().any(|i| matches!(
        i,
        IntegrityIssue::OrphanedNode { id, parent_id }
            if *id == orphan.id && *parent_id == ghost_parent
    )));
}

#[tokio::test]
async fn dangling_closure_row_is_detected() {
    let (svc, store) = service_with_store();
    let [math, _, _, _, _, triangles] = seed_math_tree(&svc).await;

    let mut batch = WriteBatch::new();
    batch.insert_closure(vec![ClosureEntry {
        ancestor_id: triangles,
        descendant_id: math,
        distance: 3,
    }]);
    store.apply(batch).await.unwrap();

    let report = svc.validate_tree().await.unwrap();
    assert_eq!(report.closure_issue_count(), 1);
    assert!(report.issues.iter().any(|i| matches!(
        i,
        IntegrityIssue::DanglingClosure { ancestor_id, descendant_id }
            if *ancestor_id == triangles && *descendant_id == math
    )));
}

#[tokio::test]
async fn missing_closure_rows_are_detected() {
    let (svc, store) = service_with_store();
    let [_, _, linear, ..] = seed_math_tree(&svc).await;

    // Drop every closure row that names `linear` as descendant: its self
    // row plus two ancestor rows.
    let mut batch = WriteBatch::new();
    batch.delete_closure_of(vec![linear]);
    store.apply(batch).await.unwrap();

    let report = svc.validate_tree().await.unwrap();
    assert_eq!(report.closure_issue_count(), 3);
    assert!(report
        .issues
        .iter()
        .all(|i| matches!(i, IntegrityIssue::MissingClosure { descendant_id, .. } if *descendant_id == linear)));
}

#[tokio::test]
async fn path_drift_is_detected() {
    let (svc, store) = service_with_store();
    let [math, _, _, _, geometry, triangles] = seed_math_tree(&svc).await;

    // Stored path claims triangles sits directly under the root.
    let node = store.node(triangles).await.unwrap().unwrap();
    let mut drifted = node.clone();
    drifted.path = NodePath::new(vec![math]);
    drifted.depth = 1;
    drifted.version = node.version + 1;
    let mut batch = WriteBatch::new();
    batch.update_node(drifted, node.version);
    store.apply(batch).await.unwrap();

    let report = svc.validate_tree().await.unwrap();
    assert!(report.path_drift_count() >= 1);
    assert!(report.issues.iter().any(|i| matches!(
        i,
        IntegrityIssue::PathDrift { id, derived, .. }
            if *id == triangles && derived.ids() == [math, geometry]
    )));
}

#[tokio::test]
async fn parent_cycle_is_detected_without_flagging_orphan_chains() {
    let (svc, store) = service_with_store();
    seed_math_tree(&svc).await;

    // Two raw nodes pointing at each other.
    let a = Uuid::now_v7();
    let b = Uuid::now_v7();
    let node_a = raw_node(a, "cycle-a", Some(b), NodePath::new(vec![b]));
    let node_b = raw_node(b, "cycle-b", Some(a), NodePath::new(vec![a]));

    // And one orphan chain: ghost -> orphan -> child.
    let ghost = Uuid::now_v7();
    let orphan = raw_node(Uuid::now_v7(), "orphan", Some(ghost), NodePath::new(vec![ghost]));
    let child = raw_node(
        Uuid::now_v7(),
        "orphan-child",
        Some(orphan.id),
        orphan.path.extended(orphan.id),
    );

    let mut batch = WriteBatch::new();
    batch
        .insert_node(node_a)
        .insert_node(node_b)
        .insert_node(orphan.clone())
        .insert_node(child);
    store.apply(batch).await.unwrap();

    let report = svc.validate_tree().await.unwrap();
    assert_eq!(report.cycle_count(), 2);
    // The orphan chain is reported once, on the orphan itself.
    assert_eq!(report.orphan_count(), 1);
    assert!(report.issues.iter().any(|i| matches!(
        i,
        IntegrityIssue::OrphanedNode { id, .. } if *id == orphan.id
    )));
}

// ---------------------------------------------------------------------------
// Repair
// ---------------------------------------------------------------------------

#[tokio::test]
async fn repair_on_clean_tree_is_a_noop() {
    let (svc, _) = service_with_store();
    seed_math_tree(&svc).await;

    let report = svc.repair_tree().await.unwrap();
    assert_eq!(report.orphans_reparented, 0);
    assert_eq!(report.paths_rewritten, 0);
    assert_eq!(report.closure_rows_purged, 0);
    assert_eq!(report.closure_rows_inserted, 0);
}

#[tokio::test]
async fn repair_reparents_orphans_to_root() {
    let (svc, store) = service_with_store();
    seed_math_tree(&svc).await;

    let ghost = Uuid::now_v7();
    let orphan = raw_node(Uuid::now_v7(), "orphan", Some(ghost), NodePath::new(vec![ghost]));
    let mut batch = WriteBatch::new();
    batch.insert_node(orphan.clone());
    store.apply(batch).await.unwrap();

    let report = svc.repair_tree().await.unwrap();
    assert_eq!(report.orphans_reparented, 1);
    // The orphan's self closure row gets restored once it is reachable.
    assert!(report.closure_rows_inserted >= 1);

    let repaired = svc.get_category(orphan.id).await.unwrap();
    assert!(repaired.is_root());
    assert_eq!(repaired.depth, 0);
    assert!(svc.validate_tree().await.unwrap().is_clean());
}

#[tokio::test]
async fn repair_rewrites_drifted_paths() {
    let (svc, store) = service_with_store();
    let [math, _, _, _, geometry, triangles] = seed_math_tree(&svc).await;

    let node = store.node(triangles).await.unwrap().unwrap();
    let mut drifted = node.clone();
    drifted.path = NodePath::new(vec![math]);
    drifted.depth = 1;
    drifted.version = node.version + 1;
    let mut batch = WriteBatch::new();
    batch.update_node(drifted, node.version);
    store.apply(batch).await.unwrap();

    let report = svc.repair_tree().await.unwrap();
    assert_eq!(report.paths_rewritten, 1);

    let repaired = svc.get_category(triangles).await.unwrap();
    assert_eq!(repaired.path.ids(), [math, geometry]);
    assert_eq!(repaired.depth, 2);
    assert!(svc.validate_tree().await.unwrap().is_clean());
}

#[tokio::test]
async fn repair_reconciles_the_closure_index() {
    let (svc, store) = service_with_store();
    let [math, _, linear, _, _, triangles] = seed_math_tree(&svc).await;

    let mut batch = WriteBatch::new();
    batch
        .insert_closure(vec![ClosureEntry {
            ancestor_id: triangles,
            descendant_id: math,
            distance: 9,
        }])
        .delete_closure_of(vec![linear]);
    store.apply(batch).await.unwrap();

    let report = svc.repair_tree().await.unwrap();
    assert_eq!(report.closure_rows_purged, 1);
    assert_eq!(report.closure_rows_inserted, 3);
    assert!(svc.validate_tree().await.unwrap().is_clean());
}

// ---------------------------------------------------------------------------
// Full rebuild
// ---------------------------------------------------------------------------

#[tokio::test]
async fn rebuild_closure_restores_index_from_parent_edges() {
    let (svc, store) = service_with_store();
    let [math, algebra, linear, ..] = seed_math_tree(&svc).await;

    // Wreck the index completely.
    let mut batch = WriteBatch::new();
    batch.clear_closure();
    store.apply(batch).await.unwrap();
    assert!(!svc.validate_tree().await.unwrap().is_clean());

    // 6 self rows + 5 depth-1 chains + 3 depth-2 chains… one row per
    // (node, ancestor-or-self) pair.
    let written = svc.rebuild_closure().await.unwrap();
    assert_eq!(written, 14);
    assert!(svc.validate_tree().await.unwrap().is_clean());

    let ancestors: Vec<_> = svc
        .ancestors(linear)
        .await
        .unwrap()
        .into_iter()
        .map(|n| n.id)
        .collect();
    assert_eq!(ancestors, vec![math, algebra]);
}

#[tokio::test]
async fn rebuild_for_subtree_only_touches_that_subtree() {
    let (svc, store) = service_with_store();
    let [_, algebra, linear, quadratics, ..] = seed_math_tree(&svc).await;

    let mut batch = WriteBatch::new();
    batch.delete_closure_of(vec![linear, quadratics]);
    store.apply(batch).await.unwrap();

    let written = svc.rebuild_closure_for(algebra).await.unwrap();
    // algebra (self + 1 ancestor) and each topic (self + 2 ancestors).
    assert_eq!(written, 8);
    assert!(svc.validate_tree().await.unwrap().is_clean());
}

#[tokio::test]
async fn chunked_rebuild_handles_more_nodes_than_one_batch() {
    let store = Arc::new(MemoryStore::new());
    let svc = TaxonomyService::new(
        Arc::clone(&store) as Arc<dyn TreeStore>,
        Arc::new(NoAttachedContent),
        TreeSettings {
            closure_rebuild_batch_size: 4,
            ..TreeSettings::default()
        },
    );

    let root = svc
        .create_category(create_input("Root", "root", None))
        .await
        .unwrap();
    for i in 0..10 {
        svc.create_category(create_input(
            &format!("Child {i}"),
            &format!("child-{i}"),
            Some(root.id),
        ))
        .await
        .unwrap();
    }

    let written = svc.rebuild_closure().await.unwrap();
    // 11 self rows + 10 parent rows.
    assert_eq!(written, 21);
    assert!(svc.validate_tree().await.unwrap().is_clean());
}
