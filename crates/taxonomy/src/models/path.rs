//! Materialized path encoding.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Ordered ancestor ids from the root down to (but excluding) the owning
/// node.
///
/// Encoded as a `/`-delimited string with a leading and trailing delimiter:
/// `/` for roots, `/a/` for a child of root `a`, `/a/b/` one level deeper.
/// The trailing delimiter makes prefix matching unambiguous — the subtree of
/// node `n` is exactly the rows whose encoded path starts with
/// `n.path + n.id + "/"`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NodePath(Vec<Uuid>);

impl NodePath {
    /// The empty path of a root node.
    pub const fn root() -> Self {
        Self(Vec::new())
    }

    pub fn new(ids: Vec<Uuid>) -> Self {
        Self(ids)
    }

    /// Ancestor ids, root first.
    pub fn ids(&self) -> &[Uuid] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Depth of the owning node: `len(path)`.
    pub fn depth(&self) -> i32 {
        self.0.len() as i32
    }

    /// Whether `id` appears anywhere in the ancestor chain.
    pub fn contains(&self, id: Uuid) -> bool {
        self.0.contains(&id)
    }

    /// A new path with `id` appended — the path of a child of the node
    /// owning `id` when called on that node's own path.
    pub fn extended(&self, id: Uuid) -> Self {
        let mut ids = self.0.clone();
        ids.push(id);
        Self(ids)
    }

    /// Delimited string form, e.g. `/a/b/` (just `/` when empty).
    pub fn encoded(&self) -> String {
        if self.0.is_empty() {
            return "/".to_string();
        }
        let mut out = String::with_capacity(self.0.len() * 37 + 1);
        out.push('/');
        for id in &self.0 {
            out.push_str(&id.to_string());
            out.push('/');
        }
        out
    }

    /// Parse the delimited form produced by [`NodePath::encoded`].
    pub fn decode(encoded: &str) -> Result<Self, uuid::Error> {
        encoded
            .split('/')
            .filter(|part| !part.is_empty())
            .map(Uuid::parse_str)
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encoded())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn root_path_is_slash() {
        assert_eq!(NodePath::root().encoded(), "/");
        assert_eq!(NodePath::root().depth(), 0);
    }

    #[test]
    fn encode_decode_round_trip() {
        let a = Uuid::now_v7();
        let b = Uuid::now_v7();
        let path = NodePath::new(vec![a, b]);

        let encoded = path.encoded();
        assert_eq!(encoded, format!("/{a}/{b}/"));

        let decoded = NodePath::decode(&encoded).unwrap();
        assert_eq!(decoded, path);
    }

    #[test]
    fn decode_root() {
        assert_eq!(NodePath::decode("/").unwrap(), NodePath::root());
        assert_eq!(NodePath::decode("").unwrap(), NodePath::root());
    }

    #[test]
    fn extended_appends() {
        let a = Uuid::now_v7();
        let b = Uuid::now_v7();
        let path = NodePath::root().extended(a).extended(b);

        assert_eq!(path.ids(), &[a, b]);
        assert_eq!(path.depth(), 2);
        assert!(path.contains(a));
    }

    #[test]
    fn prefix_matching_is_unambiguous() {
        let a = Uuid::now_v7();
        let b = Uuid::now_v7();

        // A child of `a` has path `/a/`; grandchildren share the `/a/` prefix
        // but siblings of `a` do not.
        let child = NodePath::new(vec![a]);
        let grandchild = NodePath::new(vec![a, b]);

        let prefix = NodePath::root().encoded() + &a.to_string() + "/";
        assert!(child.encoded().starts_with(&prefix));
        assert!(grandchild.encoded().starts_with(&prefix));
        assert!(!NodePath::new(vec![b]).encoded().starts_with(&prefix));
    }
}
