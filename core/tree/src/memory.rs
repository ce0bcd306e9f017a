//! In-process SharedTree used by tests and single-process embedders.
//!
//! `MemoryTree` is the reference for store semantics: remote transports
//! must match what it does, in particular the one-snapshot-per-operation
//! notification rule that makes `atomic_update` observable as a single
//! transition.
//!
//! # Locking
//!
//! Two mutexes, always taken in the order `dispatch` then `state`:
//!
//! - `state` guards the root value and the listener table.
//! - `dispatch` is held across an entire mutate-then-notify cycle, so
//!   concurrent writers cannot interleave their notifications and every
//!   subscription observes snapshots in mutation order.
//!
//! Listeners run with `dispatch` held (but not `state`); a listener may
//! read the tree but must not write to it from the callback.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use serde_json::{Map, Value};

use crate::node::TreeNode;
use crate::path::TreePath;
use crate::store::{SharedTree, SnapshotListener, SubscriptionId, TreeError};

struct Listener {
    path: TreePath,
    callback: SnapshotListener,
}

struct State {
    root: Value,
    listeners: HashMap<SubscriptionId, Listener>,
    next_id: SubscriptionId,
    unreachable: bool,
}

pub struct MemoryTree {
    dispatch: Mutex<()>,
    state: Mutex<State>,
}

impl Default for MemoryTree {
    fn default() -> Self {
        MemoryTree::new()
    }
}

impl MemoryTree {
    pub fn new() -> Self {
        MemoryTree {
            dispatch: Mutex::new(()),
            state: Mutex::new(State {
                root: Value::Object(Map::new()),
                listeners: HashMap::new(),
                next_id: 1,
                unreachable: false,
            }),
        }
    }

    /// Seeds the tree with an initial value without notifying anyone.
    /// Intended for test setup before subscriptions attach.
    pub fn seed(&self, path: &TreePath, node: TreeNode) {
        let _order = self.dispatch.lock().unwrap();
        let mut state = self.state.lock().unwrap();
        set_at(&mut state.root, path, node.into_value());
    }

    /// Makes every subsequent operation fail with [`TreeError::Unreachable`]
    /// until cleared. Models a down transport.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.lock().unwrap().unreachable = unreachable;
    }

    /// Applies `mutate` under the locks, then notifies every listener whose
    /// path overlaps one of the returned changed paths. Each listener gets
    /// at most one snapshot per call, regardless of how many paths changed.
    fn write(
        &self,
        mutate: impl FnOnce(&mut Value) -> Vec<TreePath>,
    ) -> Result<(), TreeError> {
        let _order = self.dispatch.lock().unwrap();
        let batch = {
            let mut state = self.state.lock().unwrap();
            if state.unreachable {
                return Err(TreeError::Unreachable);
            }
            let changed = mutate(&mut state.root);
            let mut batch = Vec::new();
            for listener in state.listeners.values() {
                if changed.iter().any(|path| path.overlaps(&listener.path)) {
                    batch.push((
                        listener.callback.clone(),
                        snapshot_at(&state.root, &listener.path),
                    ));
                }
            }
            batch
        };
        for (callback, snapshot) in batch {
            callback(snapshot);
        }
        Ok(())
    }
}

impl SharedTree for MemoryTree {
    fn subscribe(
        &self,
        path: &TreePath,
        listener: SnapshotListener,
    ) -> Result<SubscriptionId, TreeError> {
        let _order = self.dispatch.lock().unwrap();
        let (id, initial) = {
            let mut state = self.state.lock().unwrap();
            if state.unreachable {
                return Err(TreeError::Unreachable);
            }
            let id = state.next_id;
            state.next_id += 1;
            state.listeners.insert(
                id,
                Listener {
                    path: path.clone(),
                    callback: listener.clone(),
                },
            );
            (id, snapshot_at(&state.root, path))
        };
        listener(initial);
        Ok(id)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        let _order = self.dispatch.lock().unwrap();
        self.state.lock().unwrap().listeners.remove(&id);
    }

    fn get(&self, path: &TreePath) -> Result<TreeNode, TreeError> {
        let state = self.state.lock().unwrap();
        if state.unreachable {
            return Err(TreeError::Unreachable);
        }
        Ok(snapshot_at(&state.root, path))
    }

    fn set(&self, path: &TreePath, node: TreeNode) -> Result<(), TreeError> {
        let path = path.clone();
        self.write(move |root| {
            set_at(root, &path, node.into_value());
            vec![path]
        })
    }

    fn update(&self, path: &TreePath, fields: BTreeMap<String, TreeNode>) -> Result<(), TreeError> {
        let path = path.clone();
        self.write(move |root| {
            for (name, node) in fields {
                set_at(root, &path.child(&name), node.into_value());
            }
            vec![path]
        })
    }

    fn delete(&self, path: &TreePath) -> Result<(), TreeError> {
        let path = path.clone();
        self.write(move |root| {
            delete_at(root, &path);
            vec![path]
        })
    }

    fn atomic_update(&self, changes: BTreeMap<TreePath, TreeNode>) -> Result<(), TreeError> {
        self.write(move |root| {
            let mut changed = Vec::with_capacity(changes.len());
            for (path, node) in changes {
                set_at(root, &path, node.into_value());
                changed.push(path);
            }
            changed
        })
    }
}

fn snapshot_at(root: &Value, path: &TreePath) -> TreeNode {
    let mut current = root;
    for segment in path.segments() {
        match current.get(segment) {
            Some(v) => current = v,
            None => return TreeNode::null(),
        }
    }
    TreeNode::from_value(current.clone())
}

/// Replaces the value at `path`, materializing interior objects along the
/// way. A non-object interior value is overwritten; the tree never nests
/// scalars under scalars.
fn set_at(root: &mut Value, path: &TreePath, value: Value) {
    let segments = path.segments();
    if segments.is_empty() {
        *root = value;
        return;
    }
    let mut current = root;
    for segment in &segments[..segments.len() - 1] {
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        current = current
            .as_object_mut()
            .unwrap()
            .entry(segment.clone())
            .or_insert(Value::Object(Map::new()));
    }
    if !current.is_object() {
        *current = Value::Object(Map::new());
    }
    current
        .as_object_mut()
        .unwrap()
        .insert(segments[segments.len() - 1].clone(), value);
}

fn delete_at(root: &mut Value, path: &TreePath) {
    let segments = path.segments();
    if segments.is_empty() {
        *root = Value::Object(Map::new());
        return;
    }
    let mut current = root;
    for segment in &segments[..segments.len() - 1] {
        match current.get_mut(segment) {
            Some(v) => current = v,
            None => return,
        }
    }
    if let Some(map) = current.as_object_mut() {
        map.remove(&segments[segments.len() - 1]);
    }
}
