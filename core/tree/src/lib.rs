//! SharedTree contract for Vesta clients.
//!
//! This crate is shared by every process that talks to the hierarchical
//! store (phone client, device agent, tests) to prevent schema drift.
//! It deliberately contains no transport: just typed addressing
//! ([`TreePath`]), the value model ([`TreeNode`]), the store trait
//! ([`SharedTree`]), and [`MemoryTree`], an in-process implementation
//! used as the reference for store semantics and by the test suites.
//!
//! Store semantics every implementation must honor:
//!
//! - Subscriptions deliver the **full subtree** under the subscribed path,
//!   once on attach and once after every completed mutation that overlaps it.
//! - `atomic_update` is all-or-nothing: a subscriber overlapping several of
//!   the written paths observes a single combined snapshot, never a partial one.
//! - Write operations report success or failure to their caller
//!   independently of the subscription stream.

pub mod memory;
pub mod node;
pub mod path;
pub mod store;

pub use memory::MemoryTree;
pub use node::TreeNode;
pub use path::TreePath;
pub use store::{SharedTree, SnapshotListener, SubscriptionId, TreeError};
