//! Unified error handling for the location core.
//!
//! Every failure in this crate is recoverable. Callers receive a
//! [`LocationError`] and decide whether to surface UI, wait for the next
//! platform callback, or retry after a delay.

use std::sync::PoisonError;

use thiserror::Error;

/// Unified error type for location tracking and storage operations.
#[derive(Debug, Clone, PartialEq, Error)]
#[cfg_attr(feature = "ffi", derive(uniffi::Error))]
pub enum LocationError {
    /// The user denied (or restricted) location access. Wait for user action.
    #[error("Location permission denied")]
    PermissionDenied,
    /// The local database could not be reached. Retry on the next event.
    #[error("Storage unavailable: {message}")]
    StorageUnavailable { message: String },
    /// Location hardware or the platform service is unavailable. Retry later.
    #[error("Location hardware unavailable: {message}")]
    HardwareUnavailable { message: String },
    /// A reading with unusable coordinates or accuracy.
    #[error("Invalid location point: {message}")]
    InvalidPoint { message: String },
    /// Configuration could not be parsed or failed validation.
    #[error("Configuration error: {message}")]
    ConfigError { message: String },
    /// An upload pass failed or timed out.
    #[error("Sync failed: {message}")]
    SyncFailed { message: String },
    /// Generic internal error
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl LocationError {
    /// Whether the error came from the storage layer.
    pub fn is_storage(&self) -> bool {
        matches!(self, LocationError::StorageUnavailable { .. })
    }

    pub(crate) fn storage(message: impl Into<String>) -> Self {
        LocationError::StorageUnavailable {
            message: message.into(),
        }
    }

    pub(crate) fn hardware(message: impl Into<String>) -> Self {
        LocationError::HardwareUnavailable {
            message: message.into(),
        }
    }

    pub(crate) fn invalid_point(message: impl Into<String>) -> Self {
        LocationError::InvalidPoint {
            message: message.into(),
        }
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        LocationError::ConfigError {
            message: message.into(),
        }
    }
}

impl From<rusqlite::Error> for LocationError {
    fn from(err: rusqlite::Error) -> Self {
        LocationError::storage(err.to_string())
    }
}

impl From<rusqlite_migration::Error> for LocationError {
    fn from(err: rusqlite_migration::Error) -> Self {
        LocationError::storage(format!("migration failed: {}", err))
    }
}

impl<T> From<PoisonError<T>> for LocationError {
    fn from(_: PoisonError<T>) -> Self {
        LocationError::storage("store lock poisoned")
    }
}

impl From<serde_json::Error> for LocationError {
    fn from(err: serde_json::Error) -> Self {
        LocationError::config(err.to_string())
    }
}

/// Result type alias for location core operations.
pub type Result<T> = std::result::Result<T, LocationError>;
