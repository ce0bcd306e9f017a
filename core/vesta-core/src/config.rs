//! Static configuration for the client core.

use std::time::Duration;

/// A heartbeat older than this makes an `online` status untrustworthy.
pub const DEFAULT_STALENESS_MS: i64 = 2 * 60 * 1000; // 2 minutes

/// Coldest target temperature a client may write.
pub const DEFAULT_MIN_TEMP: i64 = 16;

/// Warmest target temperature a client may write.
pub const DEFAULT_MAX_TEMP: i64 = 30;

/// Sensors numbered at or below this belong to `group_1`; the rest to
/// `group_2`.
pub const DEFAULT_GROUP_SPLIT: u32 = 2;

/// How the effective online/offline verdict is derived from heartbeats.
/// Chosen once at construction, never per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessStrategy {
    /// Compare `last_seen` against the local wall clock. Requires the
    /// device's clock and ours to be reasonably synchronized.
    ClockComparison,
    /// Re-arm a per-device one-shot timer on every observation. Needs only
    /// a monotonic local scheduler; tolerates skewed clocks.
    Watchdog,
}

#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub staleness_ms: i64,
    pub min_temp: i64,
    pub max_temp: i64,
    pub group_split: u32,
    pub liveness: LivenessStrategy,
}

impl Default for CoreConfig {
    fn default() -> Self {
        CoreConfig {
            staleness_ms: DEFAULT_STALENESS_MS,
            min_temp: DEFAULT_MIN_TEMP,
            max_temp: DEFAULT_MAX_TEMP,
            group_split: DEFAULT_GROUP_SPLIT,
            liveness: LivenessStrategy::ClockComparison,
        }
    }
}

impl CoreConfig {
    pub fn with_staleness_ms(mut self, staleness_ms: i64) -> Self {
        self.staleness_ms = staleness_ms;
        self
    }

    pub fn with_temp_bounds(mut self, min_temp: i64, max_temp: i64) -> Self {
        debug_assert!(min_temp <= max_temp);
        self.min_temp = min_temp;
        self.max_temp = max_temp;
        self
    }

    pub fn with_liveness(mut self, liveness: LivenessStrategy) -> Self {
        self.liveness = liveness;
        self
    }

    pub fn with_group_split(mut self, group_split: u32) -> Self {
        self.group_split = group_split;
        self
    }

    /// Staleness threshold as a monotonic duration, for the watchdog.
    pub fn staleness(&self) -> Duration {
        Duration::from_millis(self.staleness_ms.max(0) as u64)
    }

    /// Clamps a client-issued target temperature into the device's bound.
    pub fn clamp_temp(&self, temp: i64) -> i64 {
        temp.clamp(self.min_temp, self.max_temp)
    }
}
