//! Filtered category queries built with SeaQuery.
//!
//! Filter composition is type-checked and injection-safe instead of
//! hand-built SQL fragments. The Postgres backend renders these into SQL;
//! the in-memory backend evaluates the same filter with
//! [`NodeFilter::matches`], so both agree on semantics.

use sea_query::{Alias, Expr, ExprTrait, Order, PostgresQueryBuilder, Query, SelectStatement};

use crate::models::{CategoryLevel, CategoryNode, CategoryType};

/// Columns selected for every node query, in `NodeRow` order.
pub(crate) const NODE_COLUMNS: &[&str] = &[
    "id",
    "name",
    "code",
    "description",
    "parent_id",
    "path",
    "depth",
    "sort_order",
    "category_type",
    "category_level",
    "allow_questions",
    "is_active",
    "is_deleted",
    "deleted_at",
    "created_at",
    "modified_at",
    "created_by",
    "modified_by",
    "version",
];

/// Composable filter over category nodes.
#[derive(Debug, Clone, Default)]
pub struct NodeFilter {
    pub category_type: Option<CategoryType>,
    pub category_level: Option<CategoryLevel>,
    pub is_active: Option<bool>,
    pub allow_questions: Option<bool>,
    /// Encoded subtree prefix; matches descendants of the prefix owner.
    pub under_prefix: Option<String>,
    /// Case-sensitive substring match on the name.
    pub name_contains: Option<String>,
    /// Soft-deleted rows are excluded unless set.
    pub include_deleted: bool,
}

impl NodeFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_type(mut self, category_type: CategoryType) -> Self {
        self.category_type = Some(category_type);
        self
    }

    pub fn with_level(mut self, category_level: CategoryLevel) -> Self {
        self.category_level = Some(category_level);
        self
    }

    pub fn active(mut self, is_active: bool) -> Self {
        self.is_active = Some(is_active);
        self
    }

    pub fn allowing_questions(mut self, allow_questions: bool) -> Self {
        self.allow_questions = Some(allow_questions);
        self
    }

    /// Restrict to the subtree below the node owning `prefix`
    /// (see `CategoryNode::subtree_prefix`).
    pub fn under(mut self, prefix: String) -> Self {
        self.under_prefix = Some(prefix);
        self
    }

    pub fn name_contains(mut self, fragment: impl Into<String>) -> Self {
        self.name_contains = Some(fragment.into());
        self
    }

    pub fn including_deleted(mut self) -> Self {
        self.include_deleted = true;
        self
    }

    /// Evaluate this filter against a node in memory.
    pub fn matches(&self, node: &CategoryNode) -> bool {
        if !self.include_deleted && node.is_deleted() {
            return false;
        }
        if let Some(ty) = self.category_type
            && node.category_type != ty
        {
            return false;
        }
        if let Some(level) = self.category_level
            && node.category_level != level
        {
            return false;
        }
        if let Some(active) = self.is_active
            && node.is_active != active
        {
            return false;
        }
        if let Some(allow) = self.allow_questions
            && node.allow_questions != allow
        {
            return false;
        }
        if let Some(ref prefix) = self.under_prefix
            && !node.path.encoded().starts_with(prefix.as_str())
        {
            return false;
        }
        if let Some(ref fragment) = self.name_contains
            && !node.name.contains(fragment.as_str())
        {
            return false;
        }
        true
    }
}

/// Render the filter as a Postgres SELECT over `category_node`, ordered by
/// depth, then sort_order, then name.
pub(crate) fn build_select(filter: &NodeFilter) -> String {
    let table = Alias::new("category_node");
    let mut query = Query::select();

    for column in NODE_COLUMNS {
        query.column((table.clone(), Alias::new(*column)));
    }
    query.from(table.clone());

    add_conditions(&mut query, &table, filter);

    query.order_by((table.clone(), Alias::new("depth")), Order::Asc);
    query.order_by((table.clone(), Alias::new("sort_order")), Order::Asc);
    query.order_by((table, Alias::new("name")), Order::Asc);

    query.to_string(PostgresQueryBuilder)
}

fn add_conditions(query: &mut SelectStatement, table: &Alias, filter: &NodeFilter) {
    if !filter.include_deleted {
        query.and_where(Expr::col((table.clone(), Alias::new("is_deleted"))).eq(false));
    }
    if let Some(ty) = filter.category_type {
        query.and_where(Expr::col((table.clone(), Alias::new("category_type"))).eq(ty.as_i16()));
    }
    if let Some(level) = filter.category_level {
        query
            .and_where(Expr::col((table.clone(), Alias::new("category_level"))).eq(level.as_i16()));
    }
    if let Some(active) = filter.is_active {
        query.and_where(Expr::col((table.clone(), Alias::new("is_active"))).eq(active));
    }
    if let Some(allow) = filter.allow_questions {
        query.and_where(Expr::col((table.clone(), Alias::new("allow_questions"))).eq(allow));
    }
    if let Some(ref prefix) = filter.under_prefix {
        // Paths contain only uuids and slashes; escaping guards future
        // encodings.
        query.and_where(
            Expr::col((table.clone(), Alias::new("path")))
                .like(format!("{}%", escape_like_wildcards(prefix))),
        );
    }
    if let Some(ref fragment) = filter.name_contains {
        query.and_where(
            Expr::col((table.clone(), Alias::new("name")))
                .like(format!("%{}%", escape_like_wildcards(fragment))),
        );
    }
}

/// Escape SQL LIKE wildcard characters (`%`, `_`, `\`) in a value.
fn escape_like_wildcards(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::{Lifecycle, NodePath};
    use chrono::Utc;
    use uuid::Uuid;

    fn node() -> CategoryNode {
        let now = Utc::now();
        CategoryNode {
            id: Uuid::now_v7(),
            name: "Geometry".to_string(),
            code: "math-geometry".to_string(),
            description: None,
            parent_id: None,
            path: NodePath::root(),
            depth: 0,
            sort_order: 1,
            category_type: CategoryType::Topic,
            category_level: CategoryLevel::Intermediate,
            allow_questions: true,
            is_active: true,
            state: Lifecycle::Active,
            created_at: now,
            modified_at: now,
            created_by: None,
            modified_by: None,
            version: 1,
        }
    }

    #[test]
    fn default_filter_excludes_deleted() {
        let mut n = node();
        assert!(NodeFilter::new().matches(&n));

        n.state = Lifecycle::Deleted {
            deleted_at: Utc::now(),
        };
        assert!(!NodeFilter::new().matches(&n));
        assert!(NodeFilter::new().including_deleted().matches(&n));
    }

    #[test]
    fn type_and_level_filters() {
        let n = node();
        assert!(NodeFilter::new().with_type(CategoryType::Topic).matches(&n));
        assert!(
            !NodeFilter::new()
                .with_type(CategoryType::Subject)
                .matches(&n)
        );
        assert!(
            NodeFilter::new()
                .with_level(CategoryLevel::Intermediate)
                .matches(&n)
        );
    }

    #[test]
    fn select_contains_conditions() {
        let filter = NodeFilter::new()
            .with_type(CategoryType::Skill)
            .active(true);
        let sql = build_select(&filter);

        assert!(sql.contains("FROM \"category_node\""));
        assert!(sql.contains("\"category_type\" = 3"));
        assert!(sql.contains("\"is_active\" = TRUE"));
        assert!(sql.contains("\"is_deleted\" = FALSE"));
        assert!(sql.contains("ORDER BY"));
    }

    #[test]
    fn subtree_prefix_uses_like() {
        let id = Uuid::now_v7();
        let filter = NodeFilter::new().under(format!("/{id}/"));
        let sql = build_select(&filter);

        assert!(sql.contains("LIKE"));
        assert!(sql.contains(&id.to_string()));
    }

    #[test]
    fn like_wildcards_escaped() {
        assert_eq!(escape_like_wildcards("hello"), "hello");
        assert_eq!(escape_like_wildcards("100%"), "100\\%");
        assert_eq!(escape_like_wildcards("a_b"), "a\\_b");
        assert_eq!(escape_like_wildcards("a\\b"), "a\\\\b");
    }
}
