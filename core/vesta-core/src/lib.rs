//! # vesta-core
//!
//! Client core for observing and commanding Vesta climate vests through a
//! shared hierarchical store. One store subscription per opened device;
//! every delivered snapshot is reduced to an immutable [`DeviceView`].
//!
//! ## Design Principles
//!
//! - **Synchronous**: No async runtime dependency. Writes return when the
//!   store acknowledges; views change only on subscription redelivery.
//! - **Reconciliation is the source of truth**: Intents never mutate the
//!   local view speculatively.
//! - **Graceful degradation**: Malformed store entries are skipped with a
//!   warning; missing fields take documented defaults.
//! - **Deterministic by injection**: Liveness depends only on the injected
//!   [`Clock`] and [`TimerDriver`], so it can be tested without sleeping.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use vesta_core::{ControlSession, CoreConfig, GlobalMode};
//!
//! let session = ControlSession::new(tree, CoreConfig::default());
//! session.open("vest_01")?;
//! session.on_view("vest_01", Arc::new(|view| println!("{}", view.current_temp)))?;
//! session.set_global_mode("vest_01", GlobalMode::Heating)?;
//! ```

// Public modules
pub mod config;
pub mod directory;
pub mod error;
pub mod groups;
pub mod history;
pub mod liveness;
pub mod paths;
pub mod presets;
pub mod session;
pub mod snapshot;
pub mod timer;
pub mod types;
pub mod view;

// Re-export commonly used items at crate root
pub use config::{CoreConfig, LivenessStrategy};
pub use directory::{DeviceDirectory, DeviceSummary, DirectoryListener};
pub use error::{CoreError, Result};
pub use groups::{classify, group_for_sensor, Classification};
pub use history::{day_stamp, recent_log, LogSample};
pub use liveness::{Clock, LivenessMonitor, SystemClock};
pub use presets::PresetManager;
pub use session::{ControlSession, ViewListener};
pub use snapshot::{parse_device, DeviceData, ParseSkip, ParsedDevice};
pub use timer::{ThreadTimers, TimerDriver, TimerId};
pub use types::*;
pub use view::{build_view, DeviceView, SensorView};
