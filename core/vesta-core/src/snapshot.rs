//! Defensive parsing of raw device snapshots.
//!
//! The store is multi-writer and schemaless, so a snapshot can be partial
//! or transiently malformed at any time. Parsing is a pure function from
//! the raw subtree to [`ParsedDevice`]: every scalar has a documented
//! default, a malformed *entry* (sensor, group, preset) becomes a
//! [`ParseSkip`] and is omitted, and nothing short of a poisoned process
//! aborts reconciliation. No shared state is touched mid-parse.
//!
//! Defaults: `global_mode` → cooling, connection status → offline, any
//! missing numeric → 0, any missing string → "".

use std::collections::BTreeMap;
use std::fmt;

use vesta_tree::TreeNode;

use crate::types::{
    ConnectionState, ConnectionStatus, ControlState, GlobalMode, GroupTarget, Preset,
    SensorReading, StatusSnapshot,
};

/// One malformed entry inside an otherwise-valid snapshot. Not an error:
/// the entry is omitted, the rest of the snapshot stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseSkip {
    /// Path of the skipped entry relative to the device root.
    pub path: String,
    pub reason: String,
}

impl fmt::Display for ParseSkip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.reason)
    }
}

/// Everything the core knows about one device after one snapshot.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DeviceData {
    pub name: String,
    pub status: StatusSnapshot,
    pub control: ControlState,
    /// Presets in store delivery order.
    pub presets: Vec<Preset>,
    pub default_preset: Option<String>,
    pub connection: ConnectionState,
}

impl DeviceData {
    /// Resolves the applied-preset pointer against the presets that
    /// actually exist. A stale pointer (preset deleted out of band) reads
    /// as "no preset applied", never as an error.
    pub fn applied_preset(&self) -> Option<&Preset> {
        let id = self.control.preset_applied.as_deref()?;
        self.presets.iter().find(|p| p.id == id)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParsedDevice {
    pub data: DeviceData,
    pub skips: Vec<ParseSkip>,
}

/// Parses one raw snapshot of `devices/<id>`.
pub fn parse_device(raw: &TreeNode) -> ParsedDevice {
    let mut skips = Vec::new();

    let status = parse_status(&raw.child("status"), &mut skips);
    let control = parse_control(&raw.child("control"), &mut skips);
    let presets = parse_presets(&raw.child("presets"), &mut skips);
    let connection = parse_connection(&raw.child("connection"));

    ParsedDevice {
        data: DeviceData {
            name: raw.str_or("name", ""),
            status,
            control,
            presets,
            default_preset: raw.str_opt("default_preset"),
            connection,
        },
        skips,
    }
}

pub fn parse_connection(node: &TreeNode) -> ConnectionState {
    ConnectionState {
        status: ConnectionStatus::parse_or_default(&node.str_or("status", "offline")),
        last_seen: node.i64_or("last_seen", 0),
    }
}

fn parse_status(node: &TreeNode, skips: &mut Vec<ParseSkip>) -> StatusSnapshot {
    let mut sensors = BTreeMap::new();
    for (sensor_id, entry) in node.child("sensors").entries() {
        if !entry.is_branch() {
            skips.push(ParseSkip {
                path: format!("status/sensors/{sensor_id}"),
                reason: "sensor entry is not a branch".to_string(),
            });
            continue;
        }
        sensors.insert(
            sensor_id,
            SensorReading {
                name: entry.str_or("name", ""),
                temp: entry.f64_or("temp", 0.0),
                pos_x: entry.f64_or("posX", 0.0),
                pos_y: entry.f64_or("posY", 0.0),
            },
        );
    }
    StatusSnapshot {
        current_temp: node.f64_or("current_temp", 0.0),
        sensors,
    }
}

fn parse_control(node: &TreeNode, skips: &mut Vec<ParseSkip>) -> ControlState {
    ControlState {
        global_mode: GlobalMode::parse_or_default(&node.str_or("global_mode", "cooling")),
        groups: parse_groups(&node.child("groups"), "control/groups", skips),
        preset_applied: node.str_opt("preset_applied"),
    }
}

fn parse_groups(
    node: &TreeNode,
    context: &str,
    skips: &mut Vec<ParseSkip>,
) -> BTreeMap<String, GroupTarget> {
    let mut groups = BTreeMap::new();
    for (group_id, entry) in node.entries() {
        if !entry.is_branch() {
            skips.push(ParseSkip {
                path: format!("{context}/{group_id}"),
                reason: "group entry is not a branch".to_string(),
            });
            continue;
        }
        groups.insert(
            group_id,
            GroupTarget {
                target_temp: entry.i64_or("target_temp", 0),
            },
        );
    }
    groups
}

fn parse_presets(node: &TreeNode, skips: &mut Vec<ParseSkip>) -> Vec<Preset> {
    let mut presets = Vec::new();
    for (preset_id, entry) in node.entries() {
        if !entry.is_branch() {
            skips.push(ParseSkip {
                path: format!("presets/{preset_id}"),
                reason: "preset entry is not a branch".to_string(),
            });
            continue;
        }
        let context = format!("presets/{preset_id}/groups");
        presets.push(Preset {
            name: entry.str_or("name", ""),
            global_mode: GlobalMode::parse_or_default(&entry.str_or("global_mode", "cooling")),
            groups: parse_groups(&entry.child("groups"), &context, skips),
            id: preset_id,
        });
    }
    presets
}
