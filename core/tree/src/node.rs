//! Value model for subtree snapshots.

use serde_json::Value;

use crate::path::TreePath;

/// One snapshot of a subtree: a JSON-shaped value plus typed accessors.
///
/// The store is schemaless and multi-writer, so every accessor is total:
/// a missing child or a wrongly-typed scalar yields the caller's default
/// instead of an error. Parsing layers on top of this decide which
/// absences are defaults and which are skips.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TreeNode {
    value: Value,
}

impl TreeNode {
    /// The absent value. Reading any child of it yields defaults.
    pub fn null() -> Self {
        TreeNode { value: Value::Null }
    }

    pub fn from_value(value: Value) -> Self {
        TreeNode { value }
    }

    pub fn into_value(self) -> Value {
        self.value
    }

    pub fn as_value(&self) -> &Value {
        &self.value
    }

    pub fn is_null(&self) -> bool {
        self.value.is_null()
    }

    /// True for an interior node (a map of children).
    pub fn is_branch(&self) -> bool {
        self.value.is_object()
    }

    /// The child subtree under `segment`, as an owned snapshot.
    /// Missing children come back as [`TreeNode::null`].
    pub fn child(&self, segment: &str) -> TreeNode {
        match self.value.get(segment) {
            Some(v) => TreeNode::from_value(v.clone()),
            None => TreeNode::null(),
        }
    }

    /// The subtree at a relative path.
    pub fn at(&self, path: &TreePath) -> TreeNode {
        let mut current = &self.value;
        for segment in path.segments() {
            match current.get(segment) {
                Some(v) => current = v,
                None => return TreeNode::null(),
            }
        }
        TreeNode::from_value(current.clone())
    }

    /// Child entries in the order the store delivered them.
    pub fn entries(&self) -> Vec<(String, TreeNode)> {
        match self.value.as_object() {
            Some(map) => map
                .iter()
                .map(|(k, v)| (k.clone(), TreeNode::from_value(v.clone())))
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        self.value.as_str()
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.value.as_i64()
    }

    /// Numeric value as f64; integers coerce.
    pub fn as_f64(&self) -> Option<f64> {
        self.value.as_f64()
    }

    /// Scalar string under `segment`, or `default`.
    pub fn str_or(&self, segment: &str, default: &str) -> String {
        self.value
            .get(segment)
            .and_then(Value::as_str)
            .unwrap_or(default)
            .to_string()
    }

    /// Optional scalar string under `segment`.
    pub fn str_opt(&self, segment: &str) -> Option<String> {
        self.value
            .get(segment)
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    /// Scalar integer under `segment`, or `default`.
    pub fn i64_or(&self, segment: &str, default: i64) -> i64 {
        self.value.get(segment).and_then(Value::as_i64).unwrap_or(default)
    }

    /// Scalar number under `segment`, or `default`. Integers coerce to f64.
    pub fn f64_or(&self, segment: &str, default: f64) -> f64 {
        self.value.get(segment).and_then(Value::as_f64).unwrap_or(default)
    }
}

impl From<Value> for TreeNode {
    fn from(value: Value) -> Self {
        TreeNode::from_value(value)
    }
}

impl From<TreeNode> for Value {
    fn from(node: TreeNode) -> Self {
        node.into_value()
    }
}
