//! One-shot reads over the per-day temperature log.
//!
//! Devices append samples under `devices/<id>/logs/<yyyymmdd>/<key>`,
//! one integer per sensor per sample. Keys sort lexicographically in
//! recording order, so "most recent" is the tail of the day's entries.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use vesta_tree::SharedTree;

use crate::error::Result;
use crate::paths;
use crate::types::SensorId;

/// One logged sample: its store key and the per-sensor temperatures.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct LogSample {
    pub key: String,
    pub temps: BTreeMap<SensorId, i64>,
}

/// Day key the device writes its log under.
pub fn day_stamp(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}

/// Reads the last `limit` samples logged on `date`, oldest first.
/// Non-branch entries and non-numeric sensor values are skipped.
pub fn recent_log(
    tree: &dyn SharedTree,
    device_id: &str,
    date: NaiveDate,
    limit: usize,
) -> Result<Vec<LogSample>> {
    let day = tree.get(&paths::day_log(device_id, &day_stamp(date)))?;

    let mut samples = Vec::new();
    for (key, node) in day.entries() {
        if !node.is_branch() {
            tracing::warn!(device = %device_id, %key, "skipping malformed log sample");
            continue;
        }
        let mut temps = BTreeMap::new();
        for (sensor_id, value) in node.entries() {
            if let Some(temp) = value.as_i64() {
                temps.insert(sensor_id, temp);
            }
        }
        samples.push(LogSample { key, temps });
    }

    let skip = samples.len().saturating_sub(limit);
    Ok(samples.split_off(skip))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use vesta_tree::{MemoryTree, TreeNode, TreePath};

    fn seeded_tree() -> MemoryTree {
        let tree = MemoryTree::new();
        tree.seed(
            &TreePath::parse("devices/dev/logs/20260830").unwrap(),
            TreeNode::from_value(json!({
                "085500": { "sensor_01": 21, "sensor_02": 22 },
                "090000": { "sensor_01": 22, "sensor_02": 23 },
                "090500": "corrupt",
                "091000": { "sensor_01": 23, "sensor_02": "n/a" },
            })),
        );
        tree
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 8, 30).unwrap()
    }

    #[test]
    fn day_stamp_is_compact() {
        assert_eq!(day_stamp(day()), "20260830");
        assert_eq!(
            day_stamp(NaiveDate::from_ymd_opt(2026, 1, 5).unwrap()),
            "20260105"
        );
    }

    #[test]
    fn recent_log_keeps_the_tail_oldest_first() {
        let tree = seeded_tree();
        let samples = recent_log(&tree, "dev", day(), 2).unwrap();

        // The corrupt sample drops out before the limit applies.
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].key, "090000");
        assert_eq!(samples[1].key, "091000");
        assert_eq!(samples[0].temps["sensor_01"], 22);
        assert!(!samples[1].temps.contains_key("sensor_02")); // non-numeric dropped
    }

    #[test]
    fn missing_day_reads_empty() {
        let tree = seeded_tree();
        let samples = recent_log(
            &tree,
            "dev",
            NaiveDate::from_ymd_opt(2026, 8, 29).unwrap(),
            10,
        )
        .unwrap();
        assert!(samples.is_empty());
    }

    #[test]
    fn limit_larger_than_day_returns_everything() {
        let tree = seeded_tree();
        let samples = recent_log(&tree, "dev", day(), 100).unwrap();
        assert_eq!(samples.len(), 3);
        assert_eq!(samples[0].key, "085500");
    }
}
