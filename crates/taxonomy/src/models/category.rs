//! Category models: tree nodes and closure entries.
//!
//! Categories form an arbitrarily deep tree organizing question-bank
//! content. Each node carries a materialized path for fast subtree queries;
//! a separate closure index (ancestor/descendant/distance) accelerates
//! reachability lookups. Both are maintained solely by this subsystem's
//! write paths.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::path::NodePath;

/// Classification of a category, independent of tree depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryType {
    Subject,
    Chapter,
    Topic,
    Skill,
}

impl CategoryType {
    pub fn as_i16(self) -> i16 {
        match self {
            Self::Subject => 0,
            Self::Chapter => 1,
            Self::Topic => 2,
            Self::Skill => 3,
        }
    }

    pub fn from_i16(value: i16) -> Option<Self> {
        match value {
            0 => Some(Self::Subject),
            1 => Some(Self::Chapter),
            2 => Some(Self::Topic),
            3 => Some(Self::Skill),
            _ => None,
        }
    }
}

/// Difficulty banding of a category, independent of tree depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryLevel {
    Basic,
    Intermediate,
    Advanced,
    Expert,
}

impl CategoryLevel {
    pub fn as_i16(self) -> i16 {
        match self {
            Self::Basic => 0,
            Self::Intermediate => 1,
            Self::Advanced => 2,
            Self::Expert => 3,
        }
    }

    pub fn from_i16(value: i16) -> Option<Self> {
        match value {
            0 => Some(Self::Basic),
            1 => Some(Self::Intermediate),
            2 => Some(Self::Advanced),
            3 => Some(Self::Expert),
            _ => None,
        }
    }
}

/// Lifecycle state of a node.
///
/// One enum instead of parallel flag/timestamp pairs so the deleted
/// invariant is enforced in a single place. Deleted nodes are excluded from
/// all traversal and mutation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Lifecycle {
    Active,
    Deleted { deleted_at: DateTime<Utc> },
}

impl Lifecycle {
    pub fn is_deleted(&self) -> bool {
        matches!(self, Self::Deleted { .. })
    }

    pub fn deleted_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Active => None,
            Self::Deleted { deleted_at } => Some(*deleted_at),
        }
    }
}

/// A category tree node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryNode {
    /// Stable unique identifier (UUIDv7), assigned on creation, never
    /// reused.
    pub id: Uuid,

    /// Human-readable label.
    pub name: String,

    /// Machine code, unique across non-deleted nodes.
    pub code: String,

    /// Optional description.
    pub description: Option<String>,

    /// Parent node; None for roots.
    pub parent_id: Option<Uuid>,

    /// Materialized ancestor chain. Invariant:
    /// `path(n) == path(parent(n)) + [parent(n).id]`, empty for roots.
    pub path: NodePath,

    /// `len(path)`; 0 for roots.
    pub depth: i32,

    /// Ordering among siblings (not globally unique).
    pub sort_order: i32,

    pub category_type: CategoryType,

    pub category_level: CategoryLevel,

    /// Whether question-bank content may attach directly to this node.
    pub allow_questions: bool,

    /// Visibility flag, orthogonal to the lifecycle state.
    pub is_active: bool,

    /// Active or soft-deleted with the deletion timestamp.
    pub state: Lifecycle,

    pub created_at: DateTime<Utc>,

    pub modified_at: DateTime<Utc>,

    pub created_by: Option<String>,

    pub modified_by: Option<String>,

    /// Optimistic-concurrency version, bumped on every write.
    pub version: i32,
}

impl CategoryNode {
    pub fn is_deleted(&self) -> bool {
        self.state.is_deleted()
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// The path carried by direct children of this node.
    pub fn child_path(&self) -> NodePath {
        self.path.extended(self.id)
    }

    /// Encoded path prefix shared by every descendant of this node.
    pub fn subtree_prefix(&self) -> String {
        format!("{}{}/", self.path.encoded(), self.id)
    }
}

/// One row of the closure index: `descendant` is reachable from `ancestor`
/// in `distance` parent-hops. Includes reflexive distance-0 self rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::FromRow)]
pub struct ClosureEntry {
    pub ancestor_id: Uuid,
    pub descendant_id: Uuid,
    pub distance: i32,
}

/// Input for creating a category.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateCategory {
    pub name: String,
    pub code: String,
    pub description: Option<String>,
    pub parent_id: Option<Uuid>,
    pub category_type: CategoryType,
    pub category_level: CategoryLevel,
    /// Defaults to one past the highest sibling sort order.
    pub sort_order: Option<i32>,
    pub allow_questions: bool,
    pub created_by: Option<String>,
}

/// Input for updating a category's non-structural fields.
///
/// `parent_id`, when provided, must match the stored value — moves go
/// through the Tree Mutator, never a raw field update.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateCategory {
    pub name: Option<String>,
    pub description: Option<String>,
    pub category_type: Option<CategoryType>,
    pub category_level: Option<CategoryLevel>,
    pub sort_order: Option<i32>,
    pub allow_questions: Option<bool>,
    pub is_active: Option<bool>,
    pub parent_id: Option<Uuid>,
    pub modified_by: Option<String>,
}

/// Tree node materialized for hierarchical display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryTreeNode {
    pub node: CategoryNode,
    pub children: Vec<CategoryTreeNode>,
}

/// Shape statistics for a tree scope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TreeStatistics {
    pub total_nodes: usize,
    pub max_depth: i32,
    pub root_count: usize,
    pub leaf_count: usize,
    /// Node counts keyed by absolute depth.
    pub nodes_per_depth: std::collections::BTreeMap<i32, usize>,
}
