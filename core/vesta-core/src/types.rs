//! Wire-facing types for the device subtree.
//!
//! Every struct mirrors what the device agent actually writes to the
//! store. All fields carry `#[serde(default)]` so a partial or concurrent
//! write never fails deserialization; the parsing layer decides which
//! malformed *entries* to skip.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub type DeviceId = String;
pub type GroupId = String;
pub type SensorId = String;
pub type PresetId = String;

/// Device-wide operating mode of the control subtree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum GlobalMode {
    #[default]
    Cooling,
    Heating,
}

impl GlobalMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            GlobalMode::Cooling => "cooling",
            GlobalMode::Heating => "heating",
        }
    }

    /// Unknown strings fall back to the documented default (`cooling`).
    pub fn parse_or_default(value: &str) -> Self {
        match value {
            "heating" => GlobalMode::Heating,
            _ => GlobalMode::Cooling,
        }
    }
}

/// Per-sensor override mode. The flat per-sensor control schema is a
/// legacy write surface: the core writes it for device firmware that
/// still consumes it, but never reads it back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorMode {
    Cooling,
    Heating,
    Off,
}

impl SensorMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SensorMode::Cooling => "cooling",
            SensorMode::Heating => "heating",
            SensorMode::Off => "off",
        }
    }
}

/// Raw stored connection status, as written by the heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Online,
    #[default]
    Offline,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Online => "online",
            ConnectionStatus::Offline => "offline",
        }
    }

    /// Anything that is not literally `"online"` is treated as offline.
    pub fn parse_or_default(value: &str) -> Self {
        match value {
            "online" => ConnectionStatus::Online,
            _ => ConnectionStatus::Offline,
        }
    }

    pub fn is_online(&self) -> bool {
        matches!(self, ConnectionStatus::Online)
    }
}

/// The heartbeat subtree. `last_seen` is epoch milliseconds and is the
/// only place wall-clock time enters the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ConnectionState {
    #[serde(default)]
    pub status: ConnectionStatus,
    #[serde(default)]
    pub last_seen: i64,
}

/// One device-reported sensor. `pos_x`/`pos_y` are unit-interval placement
/// coordinates consumed only by presentation; they round-trip untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SensorReading {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub temp: f64,
    #[serde(default, rename = "posX")]
    pub pos_x: f64,
    #[serde(default, rename = "posY")]
    pub pos_y: f64,
}

/// The device-reported `status` subtree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct StatusSnapshot {
    #[serde(default)]
    pub current_temp: f64,
    #[serde(default)]
    pub sensors: BTreeMap<SensorId, SensorReading>,
}

/// One group's desired state under `control/groups/<id>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct GroupTarget {
    #[serde(default)]
    pub target_temp: i64,
}

/// The client-writable `control` subtree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ControlState {
    #[serde(default)]
    pub global_mode: GlobalMode,
    #[serde(default)]
    pub groups: BTreeMap<GroupId, GroupTarget>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preset_applied: Option<PresetId>,
}

/// A named, immutable snapshot of control state under `presets/<id>`.
/// The id is the store key, not a stored field.
#[derive(Debug, Clone, PartialEq)]
pub struct Preset {
    pub id: PresetId,
    pub name: String,
    pub global_mode: GlobalMode,
    pub groups: BTreeMap<GroupId, GroupTarget>,
}

/// The stored shape of a preset, without the id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PresetPayload {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub global_mode: GlobalMode,
    #[serde(default)]
    pub groups: BTreeMap<GroupId, GroupTarget>,
}

impl Preset {
    pub fn payload(&self) -> PresetPayload {
        PresetPayload {
            name: self.name.clone(),
            global_mode: self.global_mode,
            groups: self.groups.clone(),
        }
    }
}
