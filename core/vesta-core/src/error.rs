//! Error types for vesta-core operations.
//!
//! Validation errors are produced before any store interaction; only
//! [`CoreError::Connect`] ever originates from the transport.

use vesta_tree::TreeError;

/// All errors a session or preset operation can surface to its caller.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// The underlying store is unreachable. Retryable; the session stays
    /// openable and an open session keeps its last reconciled view.
    #[error("shared tree unreachable: {0}")]
    Connect(#[from] TreeError),

    /// Out-of-range value or unknown group/sensor id. Rejected before any
    /// write reaches the store.
    #[error("invalid target: {0}")]
    InvalidTarget(String),

    /// An intent was issued for a device with no open session, so there is
    /// no reconciled snapshot to validate it against.
    #[error("no open session for device: {0}")]
    SessionNotOpen(String),

    #[error("preset not found: {0}")]
    PresetNotFound(String),

    /// The preset is the device's current default; reassign the default
    /// before deleting it.
    #[error("default preset cannot be deleted: {0}")]
    DefaultPresetProtected(String),

    #[error("preset name must not be empty")]
    InvalidName,
}

/// Convenience type alias for Results using CoreError.
pub type Result<T> = std::result::Result<T, CoreError>;
