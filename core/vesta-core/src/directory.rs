//! Fleet overview: one subscription over the whole device root, reduced
//! to a row per device.
//!
//! The directory exists for the listing surface: name, mode, the front
//! group's target as the representative temperature, and an effective
//! connection status that has already been through the liveness monitor.
//! Rows are kept in store delivery order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::json;
use vesta_tree::{SharedTree, SubscriptionId, TreeNode};

use crate::config::CoreConfig;
use crate::error::{CoreError, Result};
use crate::groups::GROUP_FRONT;
use crate::liveness::{Clock, LivenessMonitor, SystemClock};
use crate::paths;
use crate::snapshot::parse_connection;
use crate::timer::{ThreadTimers, TimerDriver};
use crate::types::{ConnectionStatus, DeviceId, GlobalMode};

pub type DirectoryListener = Arc<dyn Fn(&[DeviceSummary]) + Send + Sync>;

/// One row of the fleet listing.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct DeviceSummary {
    pub id: DeviceId,
    pub name: String,
    pub mode: GlobalMode,
    /// Front group target, shown as the device's headline temperature.
    pub target_temp: i64,
    /// Reported status after the liveness verdict.
    pub effective_status: ConnectionStatus,
}

struct DirectoryState {
    subscription: Option<SubscriptionId>,
    summaries: Vec<DeviceSummary>,
    listeners: Vec<DirectoryListener>,
}

struct Inner {
    closed: AtomicBool,
    state: Mutex<DirectoryState>,
}

impl Inner {
    /// Demotes one row after a watchdog expiry and republishes.
    fn force_offline(&self, device_id: &str) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        let published = {
            let mut state = self.state.lock().unwrap();
            let row = state
                .summaries
                .iter_mut()
                .find(|row| row.id == device_id && row.effective_status.is_online());
            match row {
                Some(row) => {
                    row.effective_status = ConnectionStatus::Offline;
                    Some((state.summaries.clone(), state.listeners.clone()))
                }
                None => None,
            }
        };
        if let Some((summaries, listeners)) = published {
            for listener in listeners {
                listener(&summaries);
            }
        }
    }
}

pub struct DeviceDirectory {
    tree: Arc<dyn SharedTree>,
    config: CoreConfig,
    monitor: Arc<LivenessMonitor>,
    inner: Arc<Inner>,
}

impl DeviceDirectory {
    pub fn new(tree: Arc<dyn SharedTree>, config: CoreConfig) -> Self {
        DeviceDirectory::new_with_runtime(
            tree,
            config,
            Arc::new(SystemClock),
            Arc::new(ThreadTimers::new()),
        )
    }

    pub fn new_with_runtime(
        tree: Arc<dyn SharedTree>,
        config: CoreConfig,
        clock: Arc<dyn Clock>,
        timers: Arc<dyn TimerDriver>,
    ) -> Self {
        let inner = Arc::new(Inner {
            closed: AtomicBool::new(false),
            state: Mutex::new(DirectoryState {
                subscription: None,
                summaries: Vec::new(),
                listeners: Vec::new(),
            }),
        });
        let offline_inner = Arc::clone(&inner);
        let monitor = Arc::new(LivenessMonitor::new(
            &config,
            clock,
            timers,
            Arc::new(move |device_id: &str| offline_inner.force_offline(device_id)),
        ));
        DeviceDirectory {
            tree,
            config,
            monitor,
            inner,
        }
    }

    /// Subscribes to the device root. Idempotent while open.
    pub fn open(&self) -> Result<()> {
        {
            let state = self.inner.state.lock().unwrap();
            if state.subscription.is_some() {
                return Ok(());
            }
        }
        // Cleared first: the initial snapshot arrives inside `subscribe`.
        self.inner.closed.store(false, Ordering::SeqCst);
        let monitor = Arc::clone(&self.monitor);
        let inner = Arc::clone(&self.inner);
        let id = self.tree.subscribe(
            &paths::devices_root(),
            Arc::new(move |raw| on_snapshot(&inner, &monitor, raw)),
        )?;
        self.inner.state.lock().unwrap().subscription = Some(id);
        Ok(())
    }

    /// Drops the subscription and liveness state. Safe to repeat.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        let (subscription, ids) = {
            let mut state = self.inner.state.lock().unwrap();
            let ids: Vec<DeviceId> = state.summaries.iter().map(|row| row.id.clone()).collect();
            (state.subscription.take(), ids)
        };
        if let Some(id) = subscription {
            self.tree.unsubscribe(id);
        }
        for device_id in ids {
            self.monitor.forget(&device_id);
        }
    }

    /// Rows as of the latest snapshot, in store delivery order.
    pub fn summaries(&self) -> Vec<DeviceSummary> {
        self.inner.state.lock().unwrap().summaries.clone()
    }

    /// Registers a listing consumer; the current rows, if any, replay at
    /// once.
    pub fn on_change(&self, listener: DirectoryListener) {
        let current = {
            let mut state = self.inner.state.lock().unwrap();
            state.listeners.push(listener.clone());
            if state.subscription.is_some() {
                Some(state.summaries.clone())
            } else {
                None
            }
        };
        if let Some(summaries) = current {
            listener(&summaries);
        }
    }

    /// Renames a device. The listing picks the new name up on redelivery.
    pub fn rename(&self, device_id: &str, name: &str) -> Result<()> {
        let name = name.trim();
        if name.is_empty() {
            return Err(CoreError::InvalidName);
        }
        self.tree
            .set(&paths::device_name(device_id), json!(name).into())?;
        Ok(())
    }

    /// Deletes a device's entire subtree, presets and history included.
    pub fn remove(&self, device_id: &str) -> Result<()> {
        self.tree.delete(&paths::device(device_id))?;
        self.monitor.forget(device_id);
        Ok(())
    }
}

fn on_snapshot(inner: &Inner, monitor: &LivenessMonitor, raw: TreeNode) {
    if inner.closed.load(Ordering::SeqCst) {
        return;
    }
    let mut summaries = Vec::new();
    for (device_id, node) in raw.entries() {
        if !node.is_branch() {
            tracing::warn!(device = %device_id, "skipping non-branch device entry");
            continue;
        }
        let connection = parse_connection(&node.child("connection"));
        let control = node.child("control");
        summaries.push(DeviceSummary {
            effective_status: monitor.observe(&device_id, &connection),
            name: node.str_or("name", ""),
            mode: GlobalMode::parse_or_default(&control.str_or("global_mode", "")),
            target_temp: control.child("groups").child(GROUP_FRONT).i64_or("target_temp", 0),
            id: device_id,
        });
    }

    let (summaries, listeners) = {
        let mut state = inner.state.lock().unwrap();
        state.summaries = summaries;
        (state.summaries.clone(), state.listeners.clone())
    };
    if inner.closed.load(Ordering::SeqCst) {
        return;
    }
    for listener in listeners {
        listener(&summaries);
    }
}
