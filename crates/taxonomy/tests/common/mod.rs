#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Common test utilities for integration tests.
//!
//! Tests run against the in-memory backend so they exercise the real tree
//! engine (paths, closure maintenance, batch atomicity) without a database.

#![allow(dead_code)]

use std::sync::{Arc, Once};

use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use quizforge_taxonomy::{
    CategoryLevel, CategoryType, ContentHooks, CreateCategory, MemoryStore, NoAttachedContent,
    TaxonomyService, TreeSettings,
};

static TRACING: Once = Once::new();

/// Route engine logs through the test writer, honoring `RUST_LOG`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .init();
    });
}

/// A service over a fresh, empty in-memory store.
pub fn service() -> Arc<TaxonomyService> {
    init_tracing();
    TaxonomyService::new(
        Arc::new(MemoryStore::new()),
        Arc::new(NoAttachedContent),
        TreeSettings::default(),
    )
}

/// A service over a fresh in-memory store, wired to the given content hooks.
pub fn service_with_hooks(hooks: Arc<dyn ContentHooks>) -> Arc<TaxonomyService> {
    init_tracing();
    TaxonomyService::new(Arc::new(MemoryStore::new()), hooks, TreeSettings::default())
}

pub fn create_input(name: &str, code: &str, parent: Option<Uuid>) -> CreateCategory {
    CreateCategory {
        name: name.to_string(),
        code: code.to_string(),
        description: None,
        parent_id: parent,
        category_type: CategoryType::Topic,
        category_level: CategoryLevel::Basic,
        sort_order: None,
        allow_questions: true,
        created_by: Some("tester".to_string()),
    }
}

/// Seed the canonical fixture used across scenario tests:
///
/// ```text
/// Mathematics
/// ├── Algebra
/// │   ├── Linear Equations
/// │   └── Quadratics
/// └── Geometry
///     └── Triangles
/// ```
///
/// Returns ids in the order (math, algebra, linear, quadratics, geometry,
/// triangles).
pub async fn seed_math_tree(service: &TaxonomyService) -> [Uuid; 6] {
    let math = service
        .create_category(create_input("Mathematics", "math", None))
        .await
        .unwrap();
    let algebra = service
        .create_category(create_input("Algebra", "algebra", Some(math.id)))
        .await
        .unwrap();
    let linear = service
        .create_category(create_input("Linear Equations", "linear-eq", Some(algebra.id)))
        .await
        .unwrap();
    let quadratics = service
        .create_category(create_input("Quadratics", "quadratics", Some(algebra.id)))
        .await
        .unwrap();
    let geometry = service
        .create_category(create_input("Geometry", "geometry", Some(math.id)))
        .await
        .unwrap();
    let triangles = service
        .create_category(create_input("Triangles", "triangles", Some(geometry.id)))
        .await
        .unwrap();

    [
        math.id,
        algebra.id,
        linear.id,
        quadratics.id,
        geometry.id,
        triangles.id,
    ]
}
