//! Effective online/offline verdicts from heartbeat samples.
//!
//! The stored `connection` subtree is written by the device on its own
//! cadence; a crashed device simply stops writing, leaving a stale
//! `online` behind. Two interchangeable policies turn that raw state into
//! an effective verdict, selected once from [`LivenessStrategy`]:
//!
//! - [`ClockComparison`] trusts the wall clock: an `online` sample whose
//!   `last_seen` is older than the staleness threshold reads as offline.
//!   Pure function of the latest sample; no timers, no history.
//! - [`Watchdog`] trusts only a monotonic scheduler: every observation
//!   re-arms a per-device one-shot timer, and the timer firing first is
//!   what demotes the device. Survives arbitrarily skewed device clocks.
//!
//! In both policies an explicit `offline` sample is honored immediately,
//! and an offline verdict is only ever reverted by a fresh `online`
//! observation (clock policy) or a pulse arriving before the watchdog
//! fires (timer policy).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::{CoreConfig, LivenessStrategy};
use crate::timer::{TimerDriver, TimerId};
use crate::types::{ConnectionState, ConnectionStatus, DeviceId};

/// Wall clock source, injectable for deterministic tests.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

/// The real wall clock.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Invoked when the watchdog demotes a device with no fresh observation.
/// The clock policy never calls it; its verdicts are returned inline.
pub type OfflineCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// A liveness policy converts one observation into an effective verdict.
pub trait LivenessPolicy: Send + Sync {
    fn observe(&self, device_id: &str, sample: &ConnectionState) -> ConnectionStatus;

    /// Releases any per-device state (timers). Called on session close.
    fn forget(&self, device_id: &str);
}

/// Strategy 1: compare `last_seen` against the local clock.
pub struct ClockComparison {
    staleness_ms: i64,
    clock: Arc<dyn Clock>,
}

impl ClockComparison {
    pub fn new(staleness_ms: i64, clock: Arc<dyn Clock>) -> Self {
        ClockComparison {
            staleness_ms,
            clock,
        }
    }
}

impl LivenessPolicy for ClockComparison {
    fn observe(&self, _device_id: &str, sample: &ConnectionState) -> ConnectionStatus {
        let age = self.clock.now_millis() - sample.last_seen;
        if sample.status.is_online() && age > self.staleness_ms {
            ConnectionStatus::Offline
        } else {
            sample.status
        }
    }

    fn forget(&self, _device_id: &str) {}
}

struct Armed {
    timer: TimerId,
    generation: u64,
}

struct ArmedTable {
    entries: HashMap<DeviceId, Armed>,
    /// Never reset. A generation that left the table is dead forever, so
    /// a stale expiry can never match a later re-arm of the same device.
    next_generation: u64,
}

/// Strategy 2: per-device one-shot watchdog timers.
pub struct Watchdog {
    staleness: Duration,
    timers: Arc<dyn TimerDriver>,
    on_offline: OfflineCallback,
    armed: Arc<Mutex<ArmedTable>>,
}

impl Watchdog {
    pub fn new(
        staleness: Duration,
        timers: Arc<dyn TimerDriver>,
        on_offline: OfflineCallback,
    ) -> Self {
        Watchdog {
            staleness,
            timers,
            on_offline,
            armed: Arc::new(Mutex::new(ArmedTable {
                entries: HashMap::new(),
                next_generation: 0,
            })),
        }
    }
}

impl LivenessPolicy for Watchdog {
    fn observe(&self, device_id: &str, sample: &ConnectionState) -> ConnectionStatus {
        let mut armed = self.armed.lock().unwrap();

        if !sample.status.is_online() {
            // Explicit offline: honor immediately and stand down the timer.
            if let Some(prev) = armed.entries.remove(device_id) {
                self.timers.cancel(prev.timer);
            }
            return ConnectionStatus::Offline;
        }

        // Any online observation is a liveness pulse: cancel the previous
        // timer before arming the next so re-arms never stack.
        if let Some(prev) = armed.entries.remove(device_id) {
            self.timers.cancel(prev.timer);
        }
        let generation = armed.next_generation;
        armed.next_generation += 1;

        let table = Arc::clone(&self.armed);
        let on_offline = Arc::clone(&self.on_offline);
        let device = device_id.to_string();
        let timer = self.timers.schedule(
            self.staleness,
            Box::new(move || {
                // Serialize against re-arm under the same lock; the
                // generation check discards a fire that raced a re-arm.
                let live = {
                    let mut table = table.lock().unwrap();
                    match table.entries.get(&device) {
                        Some(entry) if entry.generation == generation => {
                            table.entries.remove(&device);
                            true
                        }
                        _ => false,
                    }
                };
                if live {
                    tracing::debug!(device = %device, "watchdog expired, forcing offline");
                    on_offline(&device);
                }
            }),
        );
        armed
            .entries
            .insert(device_id.to_string(), Armed { timer, generation });

        sample.status
    }

    fn forget(&self, device_id: &str) {
        if let Some(prev) = self.armed.lock().unwrap().entries.remove(device_id) {
            self.timers.cancel(prev.timer);
        }
    }
}

/// The configured liveness policy plus the verdict helper the session and
/// directory layers consume.
pub struct LivenessMonitor {
    policy: Box<dyn LivenessPolicy>,
}

impl LivenessMonitor {
    /// Selects the policy from config, once. `on_offline` only ever fires
    /// under the watchdog strategy.
    pub fn new(
        config: &CoreConfig,
        clock: Arc<dyn Clock>,
        timers: Arc<dyn TimerDriver>,
        on_offline: OfflineCallback,
    ) -> Self {
        let policy: Box<dyn LivenessPolicy> = match config.liveness {
            LivenessStrategy::ClockComparison => {
                Box::new(ClockComparison::new(config.staleness_ms, clock))
            }
            LivenessStrategy::Watchdog => {
                Box::new(Watchdog::new(config.staleness(), timers, on_offline))
            }
        };
        LivenessMonitor { policy }
    }

    /// Effective verdict for one observation.
    pub fn observe(&self, device_id: &str, sample: &ConnectionState) -> ConnectionStatus {
        self.policy.observe(device_id, sample)
    }

    pub fn is_online(&self, device_id: &str, sample: &ConnectionState) -> bool {
        self.observe(device_id, sample).is_online()
    }

    pub fn forget(&self, device_id: &str) {
        self.policy.forget(device_id);
    }
}
