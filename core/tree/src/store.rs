//! The store trait every SharedTree transport implements.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::node::TreeNode;
use crate::path::TreePath;

/// Handle for one active subscription, used to detach it.
pub type SubscriptionId = u64;

/// Callback invoked with the full subtree snapshot whenever anything under
/// the subscribed path changes. The store serializes invocations per
/// subscription; listeners must not call back into the store.
pub type SnapshotListener = Arc<dyn Fn(TreeNode) + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum TreeError {
    /// The transport cannot reach the store. Retryable.
    #[error("shared tree unreachable")]
    Unreachable,

    #[error("invalid tree path: {0:?}")]
    InvalidPath(String),
}

/// A hierarchical, multi-writer, eventually-consistent key-value store.
///
/// All operations report success or failure to the caller directly;
/// confirmation of a write's effect arrives separately, through the
/// subscription stream, once the store redelivers the mutated subtree.
pub trait SharedTree: Send + Sync {
    /// Attaches a listener to `path`. The listener receives the current
    /// value immediately, then a fresh snapshot after every mutation that
    /// overlaps the path.
    fn subscribe(&self, path: &TreePath, listener: SnapshotListener)
        -> Result<SubscriptionId, TreeError>;

    /// Detaches a subscription. Unknown ids are ignored.
    fn unsubscribe(&self, id: SubscriptionId);

    /// One-shot read of the subtree at `path`.
    fn get(&self, path: &TreePath) -> Result<TreeNode, TreeError>;

    /// Replaces the subtree at `path` with `node`.
    fn set(&self, path: &TreePath, node: TreeNode) -> Result<(), TreeError>;

    /// Shallow merge: each entry of `fields` replaces the corresponding
    /// child of `path`, leaving siblings untouched.
    fn update(&self, path: &TreePath, fields: BTreeMap<String, TreeNode>) -> Result<(), TreeError>;

    /// Removes the subtree at `path`.
    fn delete(&self, path: &TreePath) -> Result<(), TreeError>;

    /// Applies every `path -> value` replacement as one all-or-nothing
    /// mutation. A subscriber overlapping several written paths observes a
    /// single combined snapshot.
    fn atomic_update(&self, changes: BTreeMap<TreePath, TreeNode>) -> Result<(), TreeError>;
}
