//! The consumer-facing read model derived from one reconciled snapshot.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::groups::{classify, group_for_sensor, Classification};
use crate::snapshot::DeviceData;
use crate::types::{DeviceId, GlobalMode, GroupId, SensorId, SensorReading};

/// One sensor ready to render: the device-reported reading plus the
/// derived group and temperature classification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorView {
    pub id: SensorId,
    pub reading: SensorReading,
    pub group: GroupId,
    pub classification: Classification,
}

/// The reconciled aggregate for one device at one point in time. Derived,
/// never stored; consumers only ever see whole versions of it, in the
/// order snapshots were delivered.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceView {
    pub device_id: DeviceId,
    pub name: String,
    pub current_temp: f64,
    pub global_mode: GlobalMode,
    pub target_temp_by_group: BTreeMap<GroupId, i64>,
    pub sensors: Vec<SensorView>,
    /// Name of the currently applied preset; `None` when no preset is
    /// applied or the pointer is stale.
    pub applied_preset_name: Option<String>,
    pub is_online: bool,
}

/// Builds the view from parsed data and an already-computed liveness
/// verdict. Pure; the session owns when and how often this runs.
pub fn build_view(
    device_id: &str,
    data: &DeviceData,
    is_online: bool,
    group_split: u32,
) -> DeviceView {
    let avg = data.status.current_temp;
    let sensors = data
        .status
        .sensors
        .iter()
        .map(|(id, reading)| SensorView {
            id: id.clone(),
            reading: reading.clone(),
            group: group_for_sensor(id, group_split),
            classification: classify(reading.temp, avg),
        })
        .collect();

    DeviceView {
        device_id: device_id.to_string(),
        name: data.name.clone(),
        current_temp: avg,
        global_mode: data.control.global_mode,
        target_temp_by_group: data
            .control
            .groups
            .iter()
            .map(|(id, target)| (id.clone(), target.target_temp))
            .collect(),
        sensors,
        applied_preset_name: data.applied_preset().map(|p| p.name.clone()),
        is_online,
    }
}
