//! Portable tree export and import.
//!
//! The wire shape is structural: nested nodes keyed by code, with no ids,
//! paths, or timestamps. Import walks the document breadth-first and
//! resolves each node against the existing tree by code, per the chosen
//! merge strategy.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::navigator::TreeNavigator;
use super::store::CategoryStore;
use crate::error::{TaxonomyError, TaxonomyResult};
use crate::models::{
    CategoryLevel, CategoryTreeNode, CategoryType, CreateCategory, UpdateCategory,
};
use crate::storage::TreeStore;

/// One node of a portable tree document. Children nest; identity is the
/// `code` field, not a database id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortableNode {
    pub name: String,
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub category_type: CategoryType,
    pub category_level: CategoryLevel,
    pub sort_order: i32,
    pub allow_questions: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<PortableNode>,
}

/// How an imported node that collides with an existing code is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Keep the existing node untouched; its children still import under
    /// the existing node.
    Skip,
    /// Update the existing node's name and description in place; its
    /// classification, ordering, and question flag are left alone.
    Overwrite,
    /// Always create a fresh node, even when the code already exists.
    CreateNew,
}

/// Per-import accounting. `code_map` maps document codes to the node ids
/// they resolved to (existing or freshly created).
#[derive(Debug, Default)]
pub struct ImportReport {
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub code_map: HashMap<String, Uuid>,
}

pub struct TreeTransfer {
    categories: CategoryStore,
    navigator: TreeNavigator,
}

impl TreeTransfer {
    pub fn new(store: Arc<dyn TreeStore>) -> Self {
        Self {
            categories: CategoryStore::new(Arc::clone(&store)),
            navigator: TreeNavigator::new(store),
        }
    }

    /// Export the subtree below `root` (the whole forest when None) as
    /// portable nodes.
    pub async fn export_tree(&self, root: Option<Uuid>) -> TaxonomyResult<Vec<PortableNode>> {
        match root {
            Some(id) => {
                let tree = self
                    .navigator
                    .subtree(id, None)
                    .await?
                    .ok_or_else(|| TaxonomyError::not_found("category", id))?;
                Ok(vec![portable_from(&tree)])
            }
            None => {
                let mut out = Vec::new();
                for root_node in self.navigator.roots().await? {
                    if let Some(tree) = self.navigator.subtree(root_node.id, None).await? {
                        out.push(portable_from(&tree));
                    }
                }
                Ok(out)
            }
        }
    }

    /// Import a portable document under `parent` (root when None).
    pub async fn import_tree(
        &self,
        document: &[PortableNode],
        parent: Option<Uuid>,
        strategy: MergeStrategy,
    ) -> TaxonomyResult<ImportReport> {
        if let Some(parent_id) = parent {
            // Fails early when the anchor is missing or deleted.
            self.categories.get_by_id(parent_id).await?;
        }

        let mut report = ImportReport::default();
        let mut queue: Vec<(Option<Uuid>, &PortableNode)> =
            document.iter().map(|n| (parent, n)).collect();

        let mut cursor = 0;
        while cursor < queue.len() {
            let (target_parent, portable) = queue[cursor];
            cursor += 1;

            let resolved_id = self
                .import_one(target_parent, portable, strategy, &mut report)
                .await?;
            report
                .code_map
                .insert(portable.code.clone(), resolved_id);

            for child in &portable.children {
                queue.push((Some(resolved_id), child));
            }
        }

        tracing::info!(
            created = report.created,
            updated = report.updated,
            skipped = report.skipped,
            "tree import complete"
        );

        Ok(report)
    }

    async fn import_one(
        &self,
        parent: Option<Uuid>,
        portable: &PortableNode,
        strategy: MergeStrategy,
        report: &mut ImportReport,
    ) -> TaxonomyResult<Uuid> {
        let existing = match strategy {
            MergeStrategy::CreateNew => None,
            _ => match self.categories.get_by_code(&portable.code).await {
                Ok(node) => Some(node),
                Err(TaxonomyError::NotFound { .. }) => None,
                Err(err) => return Err(err),
            },
        };

        match (existing, strategy) {
            (Some(node), MergeStrategy::Skip) => {
                report.skipped += 1;
                Ok(node.id)
            }
            (Some(node), MergeStrategy::Overwrite) => {
                let updated = self
                    .categories
                    .update(
                        node.id,
                        node.version,
                        UpdateCategory {
                            name: Some(portable.name.clone()),
                            description: portable.description.clone(),
                            ..UpdateCategory::default()
                        },
                    )
                    .await?;
                report.updated += 1;
                Ok(updated.id)
            }
            _ => {
                let created = self
                    .categories
                    .create_with_options(
                        CreateCategory {
                            name: portable.name.clone(),
                            code: portable.code.clone(),
                            description: portable.description.clone(),
                            parent_id: parent,
                            category_type: portable.category_type,
                            category_level: portable.category_level,
                            sort_order: Some(portable.sort_order),
                            allow_questions: portable.allow_questions,
                            created_by: None,
                        },
                        // CreateNew tolerates duplicate codes; Skip and
                        // Overwrite only reach here when the code is free.
                        strategy != MergeStrategy::CreateNew,
                    )
                    .await?;
                report.created += 1;
                Ok(created.id)
            }
        }
    }
}

fn portable_from(tree: &CategoryTreeNode) -> PortableNode {
    PortableNode {
        name: tree.node.name.clone(),
        code: tree.node.code.clone(),
        description: tree.node.description.clone(),
        category_type: tree.node.category_type,
        category_level: tree.node.category_level,
        sort_order: tree.node.sort_order,
        allow_questions: tree.node.allow_questions,
        children: tree.children.iter().map(portable_from).collect(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    use async_trait::async_trait;

    use crate::models::{CategoryNode, ClosureEntry};
    use crate::query::NodeFilter;
    use crate::storage::WriteBatch;

    /// Store whose code lookups fail, as a dropped backend connection would.
    struct FailingLookups;

    #[async_trait]
    impl TreeStore for FailingLookups {
        async fn node(&self, _id: Uuid) -> TaxonomyResult<Option<CategoryNode>> {
            unimplemented!()
        }

        async fn node_by_code(&self, _code: &str) -> TaxonomyResult<Option<CategoryNode>> {
            Err(TaxonomyError::Internal(anyhow::anyhow!("connection reset")))
        }

        async fn children(&self, _parent: Option<Uuid>) -> TaxonomyResult<Vec<CategoryNode>> {
            unimplemented!()
        }

        async fn descendants_by_prefix(&self, _prefix: &str) -> TaxonomyResult<Vec<CategoryNode>> {
            unimplemented!()
        }

        async fn all_nodes(&self, _include_deleted: bool) -> TaxonomyResult<Vec<CategoryNode>> {
            unimplemented!()
        }

        async fn find(&self, _filter: &NodeFilter) -> TaxonomyResult<Vec<CategoryNode>> {
            unimplemented!()
        }

        async fn closure_ancestors(&self, _id: Uuid) -> TaxonomyResult<Vec<ClosureEntry>> {
            unimplemented!()
        }

        async fn closure_descendants(&self, _id: Uuid) -> TaxonomyResult<Vec<ClosureEntry>> {
            unimplemented!()
        }

        async fn closure_all(&self) -> TaxonomyResult<Vec<ClosureEntry>> {
            unimplemented!()
        }

        async fn max_sort_order(&self, _parent: Option<Uuid>) -> TaxonomyResult<Option<i32>> {
            unimplemented!()
        }

        async fn apply(&self, _batch: WriteBatch) -> TaxonomyResult<()> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn import_propagates_code_lookup_failures() {
        let transfer = TreeTransfer::new(Arc::new(FailingLookups));
        let doc = vec![PortableNode {
            name: "Algebra".to_string(),
            code: "algebra".to_string(),
            description: None,
            category_type: CategoryType::Subject,
            category_level: CategoryLevel::Basic,
            sort_order: 1,
            allow_questions: false,
            children: Vec::new(),
        }];

        // A lookup failure is a backend error, not an absent collision.
        let err = transfer
            .import_tree(&doc, None, MergeStrategy::Skip)
            .await
            .unwrap_err();
        assert!(matches!(err, TaxonomyError::Internal(_)));
    }

    #[test]
    fn portable_node_omits_empty_fields_in_json() {
        let node = PortableNode {
            name: "Algebra".to_string(),
            code: "algebra".to_string(),
            description: None,
            category_type: CategoryType::Subject,
            category_level: CategoryLevel::Basic,
            sort_order: 1,
            allow_questions: false,
            children: Vec::new(),
        };

        let json = serde_json::to_string(&node).unwrap();
        assert!(!json.contains("description"));
        assert!(!json.contains("children"));

        let back: PortableNode = serde_json::from_str(&json).unwrap();
        assert_eq!(back.code, "algebra");
        assert!(back.children.is_empty());
    }
}
