//! Per-device control sessions: one subscription, one reconciled view.
//!
//! A [`ControlSession`] owns at most one store subscription per device.
//! Each delivered snapshot is parsed defensively, run through the
//! liveness monitor, reduced to a [`DeviceView`], and published to view
//! listeners in delivery order. Intent operations validate locally and
//! issue scoped writes; the view never changes speculatively, only when
//! the subscription redelivers the mutated subtree. That keeps
//! reconciliation the single source of truth, at the cost of a
//! round-trip before a write becomes visible.
//!
//! Closing a session flips a closed flag that the dispatch path checks
//! before touching state or listeners: callbacks that begin after
//! `close` returns are suppressed, and results of writes still in flight
//! are simply discarded by the store re-observation path.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::json;
use vesta_tree::{SharedTree, SubscriptionId, TreeNode};

use crate::config::CoreConfig;
use crate::error::{CoreError, Result};
use crate::groups::{GROUP_BACK, GROUP_FRONT};
use crate::liveness::{Clock, LivenessMonitor, SystemClock};
use crate::paths;
use crate::presets::PresetManager;
use crate::snapshot::{parse_device, DeviceData};
use crate::timer::{ThreadTimers, TimerDriver};
use crate::types::{DeviceId, GlobalMode, SensorMode};
use crate::view::{build_view, DeviceView};

/// Consumer of reconciled views. Invoked in snapshot delivery order.
pub type ViewListener = Arc<dyn Fn(&DeviceView) + Send + Sync>;

/// Shared map of open device sessions. The preset manager reads it too,
/// so preset validation sees the same reconciled state the views do.
pub(crate) struct Registry {
    devices: Mutex<HashMap<DeviceId, Arc<DeviceSession>>>,
}

impl Registry {
    fn new() -> Arc<Self> {
        Arc::new(Registry {
            devices: Mutex::new(HashMap::new()),
        })
    }

    pub(crate) fn session(&self, device_id: &str) -> Option<Arc<DeviceSession>> {
        self.devices.lock().unwrap().get(device_id).cloned()
    }
}

pub(crate) struct DeviceSession {
    device_id: DeviceId,
    closed: AtomicBool,
    state: Mutex<SessionState>,
}

struct SessionState {
    subscription: Option<SubscriptionId>,
    data: Option<DeviceData>,
    view: Option<DeviceView>,
    listeners: Vec<ViewListener>,
}

impl DeviceSession {
    fn new(device_id: &str) -> Arc<Self> {
        Arc::new(DeviceSession {
            device_id: device_id.to_string(),
            closed: AtomicBool::new(false),
            state: Mutex::new(SessionState {
                subscription: None,
                data: None,
                view: None,
                listeners: Vec::new(),
            }),
        })
    }

    pub(crate) fn latest_data(&self) -> Option<DeviceData> {
        self.state.lock().unwrap().data.clone()
    }

    /// One snapshot in from the store: parse, judge liveness, rebuild the
    /// view, publish. Never aborts on malformed entries.
    fn on_snapshot(&self, monitor: &LivenessMonitor, config: &CoreConfig, raw: TreeNode) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }

        let parsed = parse_device(&raw);
        for skip in &parsed.skips {
            tracing::warn!(device = %self.device_id, entry = %skip, "skipping malformed snapshot entry");
        }

        let verdict = monitor.observe(&self.device_id, &parsed.data.connection);
        let view = build_view(
            &self.device_id,
            &parsed.data,
            verdict.is_online(),
            config.group_split,
        );

        let listeners = {
            let mut state = self.state.lock().unwrap();
            state.data = Some(parsed.data);
            state.view = Some(view.clone());
            state.listeners.clone()
        };
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        for listener in listeners {
            listener(&view);
        }
    }

    /// Watchdog expiry: republish the last view demoted to offline.
    fn force_offline(&self) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        let published = {
            let mut state = self.state.lock().unwrap();
            match state.view.clone() {
                Some(mut view) if view.is_online => {
                    view.is_online = false;
                    state.view = Some(view.clone());
                    Some((view, state.listeners.clone()))
                }
                _ => None,
            }
        };
        if let Some((view, listeners)) = published {
            for listener in listeners {
                listener(&view);
            }
        }
    }
}

/// Owns device subscriptions and translates intents into store writes.
pub struct ControlSession {
    tree: Arc<dyn SharedTree>,
    config: CoreConfig,
    monitor: Arc<LivenessMonitor>,
    registry: Arc<Registry>,
    presets: PresetManager,
}

impl ControlSession {
    /// Production wiring: real wall clock, thread-backed timers.
    pub fn new(tree: Arc<dyn SharedTree>, config: CoreConfig) -> Self {
        ControlSession::new_with_runtime(
            tree,
            config,
            Arc::new(SystemClock),
            Arc::new(ThreadTimers::new()),
        )
    }

    /// Wiring with injected clock and timer driver, for deterministic tests.
    pub fn new_with_runtime(
        tree: Arc<dyn SharedTree>,
        config: CoreConfig,
        clock: Arc<dyn Clock>,
        timers: Arc<dyn TimerDriver>,
    ) -> Self {
        let registry = Registry::new();
        let offline_registry = Arc::clone(&registry);
        let monitor = Arc::new(LivenessMonitor::new(
            &config,
            Arc::clone(&clock),
            timers,
            Arc::new(move |device_id: &str| {
                if let Some(session) = offline_registry.session(device_id) {
                    session.force_offline();
                }
            }),
        ));
        let presets =
            PresetManager::new(Arc::clone(&tree), Arc::clone(&registry), clock, config.clone());
        ControlSession {
            tree,
            config,
            monitor,
            registry,
            presets,
        }
    }

    /// Preset CRUD and atomic apply for devices opened on this session.
    pub fn presets(&self) -> &PresetManager {
        &self.presets
    }

    /// Opens (or reuses) the subscription for `device_id`. Idempotent: a
    /// second open while the session is live is a no-op.
    pub fn open(&self, device_id: &str) -> Result<()> {
        let session = {
            let mut devices = self.registry.devices.lock().unwrap();
            if devices.contains_key(device_id) {
                return Ok(());
            }
            let session = DeviceSession::new(device_id);
            devices.insert(device_id.to_string(), Arc::clone(&session));
            session
        };

        let monitor = Arc::clone(&self.monitor);
        let config = self.config.clone();
        let callback_session = Arc::clone(&session);
        let subscribed = self.tree.subscribe(
            &paths::device(device_id),
            Arc::new(move |raw| callback_session.on_snapshot(&monitor, &config, raw)),
        );

        match subscribed {
            Ok(id) => {
                session.state.lock().unwrap().subscription = Some(id);
                // A close that raced the subscribe found no id to release;
                // the take() means whoever gets the id unsubscribes it once.
                if session.closed.load(Ordering::SeqCst) {
                    if let Some(id) = session.state.lock().unwrap().subscription.take() {
                        self.tree.unsubscribe(id);
                    }
                }
                Ok(())
            }
            Err(err) => {
                // Leave the registry clean so a retry can open again.
                self.registry.devices.lock().unwrap().remove(device_id);
                Err(CoreError::Connect(err))
            }
        }
    }

    /// Releases the device's subscription and liveness state. Safe to call
    /// repeatedly and at any point in the consumer's lifecycle.
    pub fn close(&self, device_id: &str) {
        let session = self.registry.devices.lock().unwrap().remove(device_id);
        if let Some(session) = session {
            session.closed.store(true, Ordering::SeqCst);
            let subscription = session.state.lock().unwrap().subscription.take();
            if let Some(id) = subscription {
                self.tree.unsubscribe(id);
            }
            self.monitor.forget(device_id);
        }
    }

    /// Registers a view consumer. It sees every reconciled view from the
    /// next snapshot on; the current view, if any, is delivered at once so
    /// late subscribers do not start blank.
    pub fn on_view(&self, device_id: &str, listener: ViewListener) -> Result<()> {
        let session = self.session(device_id)?;
        let current = {
            let mut state = session.state.lock().unwrap();
            state.listeners.push(listener.clone());
            state.view.clone()
        };
        if let Some(view) = current {
            listener(&view);
        }
        Ok(())
    }

    /// The most recent reconciled view, if a snapshot has arrived.
    pub fn current_view(&self, device_id: &str) -> Option<DeviceView> {
        self.registry
            .session(device_id)?
            .state
            .lock()
            .unwrap()
            .view
            .clone()
    }

    /// Sets the device-wide mode. Visible in the view only after the
    /// subscription redelivers.
    pub fn set_global_mode(&self, device_id: &str, mode: GlobalMode) -> Result<()> {
        self.session(device_id)?;
        self.tree
            .set(&paths::global_mode(device_id), json!(mode.as_str()).into())?;
        Ok(())
    }

    /// Sets a group's target temperature, clamped into the configured
    /// bound. Unknown groups are rejected before any write.
    pub fn set_group_target(&self, device_id: &str, group_id: &str, temp: i64) -> Result<()> {
        let session = self.session(device_id)?;
        if !self.is_known_group(&session, group_id) {
            return Err(CoreError::InvalidTarget(format!(
                "unknown group: {group_id}"
            )));
        }
        let clamped = self.config.clamp_temp(temp);
        self.tree
            .set(&paths::group_target(device_id, group_id), json!(clamped).into())?;
        Ok(())
    }

    /// Writes a per-sensor override (legacy flat control schema, consumed
    /// by older firmware). The sensor must exist in the latest status.
    pub fn set_sensor_override(
        &self,
        device_id: &str,
        sensor_id: &str,
        mode: SensorMode,
        temp: i64,
    ) -> Result<()> {
        let session = self.session(device_id)?;
        let known = session
            .latest_data()
            .map(|data| data.status.sensors.contains_key(sensor_id))
            .unwrap_or(false);
        if !known {
            return Err(CoreError::InvalidTarget(format!(
                "unknown sensor: {sensor_id}"
            )));
        }
        let clamped = self.config.clamp_temp(temp);
        let mut fields = std::collections::BTreeMap::new();
        fields.insert("mode".to_string(), TreeNode::from(json!(mode.as_str())));
        fields.insert("target_temp".to_string(), TreeNode::from(json!(clamped)));
        self.tree
            .update(&paths::sensor_override(device_id, sensor_id), fields)?;
        Ok(())
    }

    fn session(&self, device_id: &str) -> Result<Arc<DeviceSession>> {
        self.registry
            .session(device_id)
            .ok_or_else(|| CoreError::SessionNotOpen(device_id.to_string()))
    }

    /// A group is addressable if the device reports it or it is one of the
    /// fixed policy groups. New devices may not have written `control/groups`
    /// yet; the policy groups must still be targetable.
    fn is_known_group(&self, session: &DeviceSession, group_id: &str) -> bool {
        if group_id == GROUP_FRONT || group_id == GROUP_BACK {
            return true;
        }
        session
            .latest_data()
            .map(|data| data.control.groups.contains_key(group_id))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LivenessStrategy;
    use crate::timer::manual::ManualTimers;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::atomic::AtomicI64;
    use vesta_tree::{MemoryTree, SnapshotListener, TreeError, TreePath};

    struct FixedClock(AtomicI64);

    impl Clock for FixedClock {
        fn now_millis(&self) -> i64 {
            self.0.load(Ordering::SeqCst)
        }
    }

    fn seeded_tree() -> Arc<MemoryTree> {
        let tree = Arc::new(MemoryTree::new());
        tree.seed(
            &TreePath::parse("devices/dev").unwrap(),
            TreeNode::from_value(json!({
                "name": "work vest",
                "connection": { "status": "online", "last_seen": 1_000_000 },
                "status": {
                    "current_temp": 24,
                    "sensors": {
                        "sensor_01": { "name": "front", "temp": 25 },
                        "sensor_03": { "name": "back", "temp": 23 },
                    }
                },
                "control": {
                    "global_mode": "cooling",
                    "groups": { "group_1": { "target_temp": 24 }, "group_2": { "target_temp": 24 } }
                }
            })),
        );
        tree
    }

    fn session_at(tree: Arc<MemoryTree>, now_millis: i64) -> ControlSession {
        ControlSession::new_with_runtime(
            tree,
            CoreConfig::default(),
            Arc::new(FixedClock(AtomicI64::new(now_millis))),
            Arc::new(ManualTimers::new()),
        )
    }

    #[test]
    fn open_reconciles_the_initial_snapshot() {
        let session = session_at(seeded_tree(), 1_050_000);
        session.open("dev").unwrap();

        let view = session.current_view("dev").unwrap();
        assert_eq!(view.name, "work vest");
        assert_eq!(view.current_temp, 24.0);
        assert_eq!(view.sensors.len(), 2);
        assert!(view.is_online); // heartbeat 50s old, within threshold
    }

    #[test]
    fn open_is_idempotent() {
        let tree = seeded_tree();
        let session = session_at(tree.clone(), 1_050_000);
        session.open("dev").unwrap();
        session.open("dev").unwrap();

        // A single write must produce a single delivery per listener.
        let hits = Arc::new(Mutex::new(0));
        let counter = hits.clone();
        session
            .on_view("dev", Arc::new(move |_| *counter.lock().unwrap() += 1))
            .unwrap();
        tree.set(
            &TreePath::parse("devices/dev/status/current_temp").unwrap(),
            json!(25).into(),
        )
        .unwrap();
        assert_eq!(*hits.lock().unwrap(), 2); // replayed current view + one change
    }

    #[test]
    fn unreachable_store_surfaces_connect_error_and_stays_openable() {
        let tree = seeded_tree();
        tree.set_unreachable(true);
        let session = session_at(tree.clone(), 1_050_000);

        assert!(matches!(session.open("dev"), Err(CoreError::Connect(_))));

        tree.set_unreachable(false);
        session.open("dev").unwrap();
        assert!(session.current_view("dev").is_some());
    }

    #[test]
    fn group_target_is_clamped_and_written_through() {
        let tree = seeded_tree();
        let session = session_at(tree.clone(), 1_050_000);
        session.open("dev").unwrap();

        session.set_group_target("dev", "group_1", 999).unwrap();
        let view = session.current_view("dev").unwrap();
        assert_eq!(view.target_temp_by_group["group_1"], 30); // clamped to max

        // Repeating the identical call is a no-op on resulting state.
        session.set_group_target("dev", "group_1", 999).unwrap();
        let again = session.current_view("dev").unwrap();
        assert_eq!(again.target_temp_by_group["group_1"], 30);
    }

    #[test]
    fn unknown_group_and_sensor_are_rejected_before_writing() {
        let session = session_at(seeded_tree(), 1_050_000);
        session.open("dev").unwrap();

        assert!(matches!(
            session.set_group_target("dev", "group_9", 22),
            Err(CoreError::InvalidTarget(_))
        ));
        assert!(matches!(
            session.set_sensor_override("dev", "sensor_99", SensorMode::Off, 22),
            Err(CoreError::InvalidTarget(_))
        ));
    }

    #[test]
    fn sensor_override_writes_the_legacy_flat_schema() {
        let tree = seeded_tree();
        let session = session_at(tree.clone(), 1_050_000);
        session.open("dev").unwrap();

        session
            .set_sensor_override("dev", "sensor_01", SensorMode::Off, 5)
            .unwrap();

        let node = tree
            .get(&TreePath::parse("devices/dev/control/sensors/sensor_01").unwrap())
            .unwrap();
        assert_eq!(node.str_or("mode", "?"), "off");
        assert_eq!(node.i64_or("target_temp", 0), 16); // clamped to min
    }

    #[test]
    fn intents_require_an_open_session() {
        let session = session_at(seeded_tree(), 1_050_000);
        assert!(matches!(
            session.set_global_mode("dev", GlobalMode::Heating),
            Err(CoreError::SessionNotOpen(_))
        ));
    }

    #[test]
    fn view_updates_arrive_in_delivery_order() {
        let tree = seeded_tree();
        let session = session_at(tree.clone(), 1_050_000);
        session.open("dev").unwrap();

        let temps = Arc::new(Mutex::new(Vec::new()));
        let sink = temps.clone();
        session
            .on_view("dev", Arc::new(move |view: &DeviceView| {
                sink.lock().unwrap().push(view.current_temp)
            }))
            .unwrap();

        for temp in [25, 26, 27] {
            tree.set(
                &TreePath::parse("devices/dev/status/current_temp").unwrap(),
                json!(temp).into(),
            )
            .unwrap();
        }
        assert_eq!(temps.lock().unwrap().as_slice(), &[24.0, 25.0, 26.0, 27.0]);
    }

    #[test]
    fn close_is_idempotent_and_stops_dispatch() {
        let tree = seeded_tree();
        let session = session_at(tree.clone(), 1_050_000);
        session.open("dev").unwrap();

        let hits = Arc::new(Mutex::new(0));
        let counter = hits.clone();
        session
            .on_view("dev", Arc::new(move |_| *counter.lock().unwrap() += 1))
            .unwrap();
        let before = *hits.lock().unwrap();

        session.close("dev");
        session.close("dev");

        tree.set(
            &TreePath::parse("devices/dev/status/current_temp").unwrap(),
            json!(30).into(),
        )
        .unwrap();
        assert_eq!(*hits.lock().unwrap(), before);
        assert!(session.current_view("dev").is_none());
    }

    /// Delegating store that runs a one-shot hook inside `subscribe`,
    /// exposing the window between registry insertion and the stored
    /// subscription id, and counts live subscriptions.
    struct HookedTree {
        inner: Arc<MemoryTree>,
        on_subscribe: Mutex<Option<Box<dyn FnOnce() + Send>>>,
        active: AtomicI64,
    }

    impl HookedTree {
        fn new(inner: Arc<MemoryTree>) -> Self {
            HookedTree {
                inner,
                on_subscribe: Mutex::new(None),
                active: AtomicI64::new(0),
            }
        }

        fn set_hook(&self, hook: Box<dyn FnOnce() + Send>) {
            *self.on_subscribe.lock().unwrap() = Some(hook);
        }

        fn active(&self) -> i64 {
            self.active.load(Ordering::SeqCst)
        }
    }

    impl SharedTree for HookedTree {
        fn subscribe(
            &self,
            path: &TreePath,
            listener: SnapshotListener,
        ) -> std::result::Result<SubscriptionId, TreeError> {
            let id = self.inner.subscribe(path, listener)?;
            self.active.fetch_add(1, Ordering::SeqCst);
            if let Some(hook) = self.on_subscribe.lock().unwrap().take() {
                hook();
            }
            Ok(id)
        }

        fn unsubscribe(&self, id: SubscriptionId) {
            self.inner.unsubscribe(id);
            self.active.fetch_sub(1, Ordering::SeqCst);
        }

        fn get(&self, path: &TreePath) -> std::result::Result<TreeNode, TreeError> {
            self.inner.get(path)
        }

        fn set(&self, path: &TreePath, node: TreeNode) -> std::result::Result<(), TreeError> {
            self.inner.set(path, node)
        }

        fn update(
            &self,
            path: &TreePath,
            fields: BTreeMap<String, TreeNode>,
        ) -> std::result::Result<(), TreeError> {
            self.inner.update(path, fields)
        }

        fn delete(&self, path: &TreePath) -> std::result::Result<(), TreeError> {
            self.inner.delete(path)
        }

        fn atomic_update(
            &self,
            changes: BTreeMap<TreePath, TreeNode>,
        ) -> std::result::Result<(), TreeError> {
            self.inner.atomic_update(changes)
        }
    }

    #[test]
    fn close_landing_inside_open_releases_the_subscription() {
        let tree = Arc::new(HookedTree::new(seeded_tree()));
        let session = Arc::new(ControlSession::new_with_runtime(
            tree.clone(),
            CoreConfig::default(),
            Arc::new(FixedClock(AtomicI64::new(1_050_000))),
            Arc::new(ManualTimers::new()),
        ));

        // The close runs after the store attached the listener but before
        // open stored its id; it must not leak the subscription.
        let racer = Arc::clone(&session);
        tree.set_hook(Box::new(move || racer.close("dev")));
        session.open("dev").unwrap();

        assert_eq!(tree.active(), 0);
        assert!(session.current_view("dev").is_none());

        // The device stays fully openable afterwards.
        session.open("dev").unwrap();
        assert_eq!(tree.active(), 1);
        assert!(session.current_view("dev").is_some());
    }

    #[test]
    fn session_can_reopen_after_close() {
        let tree = seeded_tree();
        let session = session_at(tree.clone(), 1_050_000);
        session.open("dev").unwrap();
        session.close("dev");
        session.open("dev").unwrap();
        assert!(session.current_view("dev").is_some());
    }

    #[test]
    fn stale_heartbeat_demotes_the_view_under_clock_comparison() {
        // Heartbeat is 180s old with a 120s threshold.
        let session = session_at(seeded_tree(), 1_000_000 + 180_000);
        session.open("dev").unwrap();
        assert!(!session.current_view("dev").unwrap().is_online);
    }

    #[test]
    fn watchdog_expiry_republishes_the_view_offline() {
        let tree = seeded_tree();
        let timers = Arc::new(ManualTimers::new());
        let session = ControlSession::new_with_runtime(
            tree,
            CoreConfig::default().with_liveness(LivenessStrategy::Watchdog),
            Arc::new(FixedClock(AtomicI64::new(1_050_000))),
            timers.clone(),
        );
        session.open("dev").unwrap();
        assert!(session.current_view("dev").unwrap().is_online);

        let offline_views = Arc::new(Mutex::new(Vec::new()));
        let sink = offline_views.clone();
        session
            .on_view("dev", Arc::new(move |view: &DeviceView| {
                sink.lock().unwrap().push(view.is_online)
            }))
            .unwrap();

        let live = timers.live_ids();
        assert_eq!(live.len(), 1);
        timers.fire(live[0]);

        assert!(!session.current_view("dev").unwrap().is_online);
        assert_eq!(offline_views.lock().unwrap().as_slice(), &[true, false]);
    }
}
