//! Canonical paths into a device's subtree.
//!
//! Centralized so the session, presets, directory, and history modules
//! cannot drift from the layout the device agent writes:
//!
//! ```text
//! devices/<id>/
//!   name
//!   connection/{status, last_seen}
//!   status/{current_temp, sensors/<sid>/{name, temp, posX, posY}}
//!   control/{global_mode, groups/<gid>/target_temp, sensors/<sid>/{mode, target_temp}, preset_applied}
//!   presets/<pid>/{name, global_mode, groups}
//!   default_preset
//!   logs/<yyyymmdd>/<key>/<sid>
//! ```

use vesta_tree::TreePath;

/// The root collection all devices live under.
pub fn devices_root() -> TreePath {
    TreePath::root().child("devices")
}

pub fn device(device_id: &str) -> TreePath {
    devices_root().child(device_id)
}

pub fn device_name(device_id: &str) -> TreePath {
    device(device_id).child("name")
}

pub fn connection(device_id: &str) -> TreePath {
    device(device_id).child("connection")
}

pub fn control(device_id: &str) -> TreePath {
    device(device_id).child("control")
}

pub fn global_mode(device_id: &str) -> TreePath {
    control(device_id).child("global_mode")
}

pub fn groups(device_id: &str) -> TreePath {
    control(device_id).child("groups")
}

pub fn group_target(device_id: &str, group_id: &str) -> TreePath {
    groups(device_id).child(group_id).child("target_temp")
}

/// Legacy flat per-sensor override node; written, never read back.
pub fn sensor_override(device_id: &str, sensor_id: &str) -> TreePath {
    control(device_id).child("sensors").child(sensor_id)
}

pub fn preset_applied(device_id: &str) -> TreePath {
    control(device_id).child("preset_applied")
}

pub fn presets(device_id: &str) -> TreePath {
    device(device_id).child("presets")
}

pub fn preset(device_id: &str, preset_id: &str) -> TreePath {
    presets(device_id).child(preset_id)
}

pub fn default_preset(device_id: &str) -> TreePath {
    device(device_id).child("default_preset")
}

pub fn day_log(device_id: &str, day_stamp: &str) -> TreePath {
    device(device_id).child("logs").child(day_stamp)
}
