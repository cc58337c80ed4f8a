//! External collaborator hooks.
//!
//! Question categorization lives outside this subsystem; deletes consult it
//! through [`ContentHooks`] so no category with unresolved leaf content is
//! ever removed.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::TaxonomyResult;

/// Callbacks into the leaf-content owner (question categorization).
#[async_trait]
pub trait ContentHooks: Send + Sync {
    /// Whether any leaf content is attached directly to `category_id`.
    async fn has_attached_content(&self, category_id: Uuid) -> TaxonomyResult<bool>;

    /// Re-point content attached to `from` at `to` (detach when `to` is
    /// None). Invoked by re-parenting delete strategies before the node is
    /// removed.
    async fn reassign_attached_content(&self, from: Uuid, to: Option<Uuid>) -> TaxonomyResult<()>;
}

/// Hook implementation for deployments without attached leaf content.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAttachedContent;

#[async_trait]
impl ContentHooks for NoAttachedContent {
    async fn has_attached_content(&self, _category_id: Uuid) -> TaxonomyResult<bool> {
        Ok(false)
    }

    async fn reassign_attached_content(
        &self,
        _from: Uuid,
        _to: Option<Uuid>,
    ) -> TaxonomyResult<()> {
        Ok(())
    }
}
