//! Data models for the taxonomy tree.

pub mod category;
pub mod path;

pub use category::{
    CategoryLevel, CategoryNode, CategoryTreeNode, CategoryType, ClosureEntry, CreateCategory,
    Lifecycle, TreeStatistics, UpdateCategory,
};
pub use path::NodePath;
