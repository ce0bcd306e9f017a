//! Named control snapshots: save, list, apply, default, delete.
//!
//! A preset freezes the global mode and every group target at save time.
//! Applying one is a single atomic multi-path write covering the mode,
//! the groups subtree, and the `preset_applied` pointer, so observers of
//! the control subtree see exactly one transition. Validation reads the
//! reconciled session state, never the store directly.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{json, Value};
use vesta_tree::{SharedTree, TreeNode, TreePath};

use crate::config::CoreConfig;
use crate::error::{CoreError, Result};
use crate::liveness::Clock;
use crate::paths;
use crate::session::Registry;
use crate::types::{Preset, PresetId, PresetPayload};

pub struct PresetManager {
    tree: Arc<dyn SharedTree>,
    registry: Arc<Registry>,
    clock: Arc<dyn Clock>,
    config: CoreConfig,
}

impl PresetManager {
    pub(crate) fn new(
        tree: Arc<dyn SharedTree>,
        registry: Arc<Registry>,
        clock: Arc<dyn Clock>,
        config: CoreConfig,
    ) -> Self {
        PresetManager {
            tree,
            registry,
            clock,
            config,
        }
    }

    /// Captures the device's current control state under a new preset id.
    /// The id is derived from the wall clock, matching the ids devices
    /// already carry, and is returned so callers can apply it right away.
    pub fn save(&self, device_id: &str, name: &str) -> Result<PresetId> {
        let name = name.trim();
        if name.is_empty() {
            return Err(CoreError::InvalidName);
        }
        let data = self.open_data(device_id)?;
        let payload = PresetPayload {
            name: name.to_string(),
            global_mode: data.control.global_mode,
            groups: data.control.groups,
        };
        let id = format!("preset_{}", self.clock.now_millis());
        self.tree
            .set(&paths::preset(device_id, &id), payload_node(&payload))?;
        Ok(id)
    }

    /// Presets in store delivery order, as of the latest snapshot.
    pub fn list(&self, device_id: &str) -> Result<Vec<Preset>> {
        Ok(self.open_data(device_id)?.presets)
    }

    /// Applies a stored preset in one atomic write. The reconciled view
    /// changes only when the subscription redelivers the device subtree,
    /// and it changes all at once.
    pub fn apply(&self, device_id: &str, preset_id: &str) -> Result<()> {
        let data = self.open_data(device_id)?;
        let preset = data
            .presets
            .iter()
            .find(|preset| preset.id == preset_id)
            .ok_or_else(|| CoreError::PresetNotFound(preset_id.to_string()))?;

        // The whole groups subtree is replaced, so groups the preset does
        // not carry cannot survive the apply and mix with its targets.
        let mut groups = serde_json::Map::new();
        for (group_id, target) in &preset.groups {
            groups.insert(
                group_id.clone(),
                json!({ "target_temp": self.config.clamp_temp(target.target_temp) }),
            );
        }

        let mut changes: BTreeMap<TreePath, TreeNode> = BTreeMap::new();
        changes.insert(
            paths::global_mode(device_id),
            json!(preset.global_mode.as_str()).into(),
        );
        changes.insert(
            paths::groups(device_id),
            TreeNode::from_value(Value::Object(groups)),
        );
        changes.insert(paths::preset_applied(device_id), json!(preset_id).into());
        self.tree.atomic_update(changes)?;
        Ok(())
    }

    /// Marks a preset as the device's default. The default survives until
    /// replaced and cannot be deleted.
    pub fn set_default(&self, device_id: &str, preset_id: &str) -> Result<()> {
        self.open_data(device_id)?;
        self.tree
            .set(&paths::default_preset(device_id), json!(preset_id).into())?;
        Ok(())
    }

    /// Removes a preset from the store. The current default is protected;
    /// a dangling `preset_applied` pointer is left behind on purpose and
    /// resolves to "no applied preset" at view time.
    pub fn delete(&self, device_id: &str, preset_id: &str) -> Result<()> {
        let data = self.open_data(device_id)?;
        if data.default_preset.as_deref() == Some(preset_id) {
            return Err(CoreError::DefaultPresetProtected(preset_id.to_string()));
        }
        self.tree.delete(&paths::preset(device_id, preset_id))?;
        Ok(())
    }

    fn open_data(&self, device_id: &str) -> Result<crate::snapshot::DeviceData> {
        let session = self
            .registry
            .session(device_id)
            .ok_or_else(|| CoreError::SessionNotOpen(device_id.to_string()))?;
        Ok(session.latest_data().unwrap_or_default())
    }
}

// Preset payloads hold only string keys and integer targets, so
// serialization cannot fail.
fn payload_node(payload: &PresetPayload) -> TreeNode {
    match serde_json::to_value(payload) {
        Ok(value) => TreeNode::from_value(value),
        Err(_) => TreeNode::null(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoreConfig;
    use crate::session::ControlSession;
    use crate::timer::manual::ManualTimers;
    use crate::types::GlobalMode;
    use serde_json::json;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Mutex;
    use vesta_tree::{MemoryTree, TreePath};

    struct FixedClock(AtomicI64);

    impl Clock for FixedClock {
        fn now_millis(&self) -> i64 {
            self.0.load(Ordering::SeqCst)
        }
    }

    fn seeded() -> (Arc<MemoryTree>, ControlSession) {
        let tree = Arc::new(MemoryTree::new());
        tree.seed(
            &TreePath::parse("devices/dev").unwrap(),
            TreeNode::from_value(json!({
                "connection": { "status": "online", "last_seen": 1_000_000 },
                "status": { "current_temp": 24, "sensors": {} },
                "control": {
                    "global_mode": "cooling",
                    "groups": { "group_1": { "target_temp": 20 }, "group_2": { "target_temp": 26 } }
                },
                "presets": {
                    "preset_100": {
                        "name": "sleep",
                        "global_mode": "heating",
                        "groups": { "group_1": { "target_temp": 18 }, "group_2": { "target_temp": 18 } }
                    }
                },
                "default_preset": "preset_100"
            })),
        );
        let session = ControlSession::new_with_runtime(
            tree.clone(),
            CoreConfig::default(),
            Arc::new(FixedClock(AtomicI64::new(1_050_000))),
            Arc::new(ManualTimers::new()),
        );
        session.open("dev").unwrap();
        (tree, session)
    }

    #[test]
    fn save_snapshots_current_control_state() {
        let (_, session) = seeded();
        let id = session.presets().save("dev", "  workday  ").unwrap();
        assert_eq!(id, "preset_1050000");

        let presets = session.presets().list("dev").unwrap();
        let saved = presets.iter().find(|p| p.id == id).unwrap();
        assert_eq!(saved.name, "workday"); // trimmed
        assert_eq!(saved.global_mode, GlobalMode::Cooling);
        assert_eq!(saved.groups["group_1"].target_temp, 20);
        assert_eq!(saved.groups["group_2"].target_temp, 26);
    }

    #[test]
    fn save_rejects_blank_names() {
        let (_, session) = seeded();
        assert!(matches!(
            session.presets().save("dev", "   "),
            Err(CoreError::InvalidName)
        ));
    }

    #[test]
    fn apply_lands_as_a_single_transition() {
        let (_, session) = seeded();

        let snapshots = Arc::new(Mutex::new(Vec::new()));
        let sink = snapshots.clone();
        session
            .on_view("dev", Arc::new(move |view: &crate::view::DeviceView| {
                sink.lock().unwrap().push((
                    view.global_mode,
                    view.target_temp_by_group.clone(),
                    view.applied_preset_name.clone(),
                ))
            }))
            .unwrap();

        session.presets().apply("dev", "preset_100").unwrap();

        let seen = snapshots.lock().unwrap();
        // Initial replay plus exactly one delivery for the whole apply.
        assert_eq!(seen.len(), 2);
        let (mode, targets, applied) = &seen[1];
        assert_eq!(*mode, GlobalMode::Heating);
        assert_eq!(targets["group_1"], 18);
        assert_eq!(targets["group_2"], 18);
        assert_eq!(applied.as_deref(), Some("sleep"));
    }

    #[test]
    fn apply_replaces_the_whole_groups_subtree() {
        let (tree, session) = seeded();
        // A group written out of band that the preset does not carry.
        tree.set(
            &TreePath::parse("devices/dev/control/groups/group_9/target_temp").unwrap(),
            json!(99).into(),
        )
        .unwrap();
        assert_eq!(
            session.current_view("dev").unwrap().target_temp_by_group["group_9"],
            99
        );

        session.presets().apply("dev", "preset_100").unwrap();

        let targets = session.current_view("dev").unwrap().target_temp_by_group;
        assert_eq!(targets.len(), 2); // group_9 is gone, not mixed in
        assert_eq!(targets["group_1"], 18);
        assert_eq!(targets["group_2"], 18);
    }

    #[test]
    fn apply_clamps_preset_targets_into_bounds() {
        let (tree, session) = seeded();
        tree.set(
            &TreePath::parse("devices/dev/presets/preset_100/groups/group_1/target_temp").unwrap(),
            json!(99).into(),
        )
        .unwrap();

        session.presets().apply("dev", "preset_100").unwrap();

        let targets = session.current_view("dev").unwrap().target_temp_by_group;
        assert_eq!(targets["group_1"], 30); // clamped to max
        assert_eq!(targets["group_2"], 18);
    }

    #[test]
    fn apply_unknown_preset_is_rejected() {
        let (_, session) = seeded();
        assert!(matches!(
            session.presets().apply("dev", "preset_999"),
            Err(CoreError::PresetNotFound(_))
        ));
    }

    #[test]
    fn default_preset_cannot_be_deleted() {
        let (_, session) = seeded();
        assert!(matches!(
            session.presets().delete("dev", "preset_100"),
            Err(CoreError::DefaultPresetProtected(_))
        ));
    }

    #[test]
    fn delete_leaves_a_resolvable_dangling_pointer() {
        let (_, session) = seeded();
        let id = session.presets().save("dev", "temp").unwrap();
        session.presets().apply("dev", &id).unwrap();
        session.presets().set_default("dev", &id).unwrap();
        session.presets().set_default("dev", "preset_100").unwrap();
        session.presets().delete("dev", &id).unwrap();

        let view = session.current_view("dev").unwrap();
        assert_eq!(view.applied_preset_name, None); // stale pointer hides itself
        assert!(session
            .presets()
            .list("dev")
            .unwrap()
            .iter()
            .all(|p| p.id != id));
    }

    #[test]
    fn operations_require_an_open_session() {
        let (_, session) = seeded();
        assert!(matches!(
            session.presets().list("other"),
            Err(CoreError::SessionNotOpen(_))
        ));
    }
}
