//! The category tree engine: CRUD, navigation, structural mutation,
//! integrity, and portable import/export behind one service facade.

pub mod closure;
pub mod mutator;
pub mod navigator;
pub mod store;
pub mod transfer;
pub mod validator;

use std::sync::Arc;

use dashmap::DashMap;
use uuid::Uuid;

use crate::config::TreeSettings;
use crate::error::TaxonomyResult;
use crate::hooks::ContentHooks;
use crate::models::{
    CategoryNode, CategoryTreeNode, CreateCategory, TreeStatistics, UpdateCategory,
};
use crate::query::NodeFilter;
use crate::storage::TreeStore;
use closure::ClosureMaintainer;
use mutator::{CopyOutcome, DeleteOutcome, DeleteStrategy, TreeMutator};
use navigator::TreeNavigator;
use store::CategoryStore;
use transfer::{ImportReport, MergeStrategy, PortableNode, TreeTransfer};
use validator::{IntegrityReport, RepairReport, TreeValidator};

/// Facade over the tree subsystems, with a node cache for hot id lookups.
///
/// The cache holds whole nodes keyed by id and is dropped wholesale on any
/// structural mutation; paths of arbitrary descendants may have changed, so
/// per-entry invalidation is not worth the bookkeeping.
pub struct TaxonomyService {
    categories: CategoryStore,
    navigator: TreeNavigator,
    mutator: TreeMutator,
    validator: TreeValidator,
    transfer: TreeTransfer,
    closure: ClosureMaintainer,
    cache: DashMap<Uuid, CategoryNode>,
}

impl TaxonomyService {
    pub fn new(
        store: Arc<dyn TreeStore>,
        hooks: Arc<dyn ContentHooks>,
        settings: TreeSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            categories: CategoryStore::new(Arc::clone(&store)),
            navigator: TreeNavigator::new(Arc::clone(&store)),
            mutator: TreeMutator::new(Arc::clone(&store), hooks),
            validator: TreeValidator::new(Arc::clone(&store)),
            transfer: TreeTransfer::new(Arc::clone(&store)),
            closure: ClosureMaintainer::new(store, settings),
            cache: DashMap::new(),
        })
    }

    // ------------------------------------------------------------------
    // CRUD
    // ------------------------------------------------------------------

    pub async fn create_category(&self, input: CreateCategory) -> TaxonomyResult<CategoryNode> {
        let node = self.categories.create(input).await?;
        self.cache.insert(node.id, node.clone());
        Ok(node)
    }

    pub async fn get_category(&self, id: Uuid) -> TaxonomyResult<CategoryNode> {
        if let Some(cached) = self.cache.get(&id) {
            return Ok(cached.clone());
        }
        let node = self.categories.get_by_id(id).await?;
        self.cache.insert(id, node.clone());
        Ok(node)
    }

    pub async fn get_category_by_code(&self, code: &str) -> TaxonomyResult<CategoryNode> {
        self.categories.get_by_code(code).await
    }

    pub async fn update_category(
        &self,
        id: Uuid,
        expected_version: i32,
        input: UpdateCategory,
    ) -> TaxonomyResult<CategoryNode> {
        let node = self.categories.update(id, expected_version, input).await?;
        self.cache.insert(id, node.clone());
        Ok(node)
    }

    /// Toggle visibility without touching structure.
    pub async fn set_category_active(
        &self,
        id: Uuid,
        expected_version: i32,
        is_active: bool,
    ) -> TaxonomyResult<CategoryNode> {
        self.update_category(
            id,
            expected_version,
            UpdateCategory {
                is_active: Some(is_active),
                ..UpdateCategory::default()
            },
        )
        .await
    }

    // ------------------------------------------------------------------
    // Navigation
    // ------------------------------------------------------------------

    pub async fn roots(&self) -> TaxonomyResult<Vec<CategoryNode>> {
        self.navigator.roots().await
    }

    pub async fn children(&self, parent: Option<Uuid>) -> TaxonomyResult<Vec<CategoryNode>> {
        self.navigator.children(parent).await
    }

    pub async fn descendants(&self, id: Uuid) -> TaxonomyResult<Vec<CategoryNode>> {
        self.navigator.descendants(id).await
    }

    pub async fn descendants_via_closure(&self, id: Uuid) -> TaxonomyResult<Vec<CategoryNode>> {
        self.navigator.descendants_via_closure(id).await
    }

    pub async fn ancestors(&self, id: Uuid) -> TaxonomyResult<Vec<CategoryNode>> {
        self.navigator.ancestors(id).await
    }

    pub async fn breadcrumbs(&self, id: Uuid) -> TaxonomyResult<Vec<CategoryNode>> {
        self.navigator.breadcrumbs(id).await
    }

    pub async fn subtree(
        &self,
        id: Uuid,
        max_depth: Option<i32>,
    ) -> TaxonomyResult<Option<CategoryTreeNode>> {
        self.navigator.subtree(id, max_depth).await
    }

    pub async fn find(&self, filter: &NodeFilter) -> TaxonomyResult<Vec<CategoryNode>> {
        self.navigator.find(filter).await
    }

    pub async fn statistics(&self, root: Option<Uuid>) -> TaxonomyResult<TreeStatistics> {
        self.navigator.statistics(root).await
    }

    // ------------------------------------------------------------------
    // Structural mutation
    // ------------------------------------------------------------------

    pub async fn move_category(
        &self,
        id: Uuid,
        new_parent: Option<Uuid>,
        new_sort_order: Option<i32>,
    ) -> TaxonomyResult<usize> {
        let moved = self.mutator.move_category(id, new_parent, new_sort_order).await?;
        self.cache.clear();
        Ok(moved)
    }

    pub async fn copy_category(
        &self,
        id: Uuid,
        new_parent: Option<Uuid>,
        include_descendants: bool,
        new_name: Option<String>,
    ) -> TaxonomyResult<CopyOutcome> {
        let outcome = self
            .mutator
            .copy_category(id, new_parent, include_descendants, new_name)
            .await?;
        self.cache.clear();
        Ok(outcome)
    }

    pub async fn delete_category(
        &self,
        id: Uuid,
        strategy: DeleteStrategy,
    ) -> TaxonomyResult<DeleteOutcome> {
        let outcome = self.mutator.delete_category(id, strategy).await?;
        self.cache.clear();
        Ok(outcome)
    }

    pub async fn compact_sort_orders(&self, parent: Option<Uuid>) -> TaxonomyResult<usize> {
        let compacted = self.closure.compact_sort_orders(parent).await?;
        self.cache.clear();
        Ok(compacted)
    }

    // ------------------------------------------------------------------
    // Integrity
    // ------------------------------------------------------------------

    pub async fn validate_tree(&self) -> TaxonomyResult<IntegrityReport> {
        self.validator.validate().await
    }

    pub async fn repair_tree(&self) -> TaxonomyResult<RepairReport> {
        let report = self.validator.repair().await?;
        self.cache.clear();
        Ok(report)
    }

    pub async fn rebuild_closure(&self) -> TaxonomyResult<usize> {
        self.closure.rebuild_all().await
    }

    pub async fn rebuild_closure_for(&self, subtree_root: Uuid) -> TaxonomyResult<usize> {
        self.closure.rebuild_for(subtree_root).await
    }

    // ------------------------------------------------------------------
    // Transfer
    // ------------------------------------------------------------------

    pub async fn export_tree(&self, root: Option<Uuid>) -> TaxonomyResult<Vec<PortableNode>> {
        self.transfer.export_tree(root).await
    }

    pub async fn import_tree(
        &self,
        document: &[PortableNode],
        parent: Option<Uuid>,
        strategy: MergeStrategy,
    ) -> TaxonomyResult<ImportReport> {
        let report = self.transfer.import_tree(document, parent, strategy).await?;
        self.cache.clear();
        Ok(report)
    }
}
