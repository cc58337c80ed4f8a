//! QuizForge Taxonomy Library
//!
//! Hierarchical category tree engine for exam authoring: materialized-path
//! storage with a closure index, structural mutations (move, copy, delete),
//! integrity validation and repair, and portable import/export.

pub mod config;
pub mod db;
pub mod error;
pub mod hooks;
pub mod models;
pub mod query;
pub mod storage;
pub mod tree;

pub use config::{Config, TreeSettings};
pub use error::{TaxonomyError, TaxonomyResult};
pub use hooks::{ContentHooks, NoAttachedContent};
pub use models::{
    CategoryLevel, CategoryNode, CategoryTreeNode, CategoryType, ClosureEntry, CreateCategory,
    Lifecycle, NodePath, TreeStatistics, UpdateCategory,
};
pub use query::NodeFilter;
pub use storage::{MemoryStore, PgStore, TreeStore, WriteBatch, WriteOp};
pub use tree::TaxonomyService;
pub use tree::mutator::{CopyOutcome, DeleteOutcome, DeleteStrategy};
pub use tree::transfer::{ImportReport, MergeStrategy, PortableNode};
pub use tree::validator::{IntegrityIssue, IntegrityReport, RepairReport};
