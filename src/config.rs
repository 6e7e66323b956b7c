//! Runtime configuration for the location core.
//!
//! The host app hands configuration over as JSON (the same shape the FFI layer
//! accepts). Every field has a default, so `{}` is a valid document.

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::{LocationError, Result};
use crate::policy::AcceptancePolicy;

/// Top-level configuration bundle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationConfig {
    /// Reading acceptance thresholds
    pub policy: AcceptancePolicy,
    /// Local point retention
    pub retention: RetentionConfig,
    /// Background upload settings
    pub sync: SyncConfig,
}

impl LocationConfig {
    /// Parse and validate configuration from JSON. Missing fields take defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: LocationConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to JSON.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    /// Reject values the tracker or store cannot work with.
    pub fn validate(&self) -> Result<()> {
        let p = &self.policy;
        if !p.max_horizontal_accuracy_m.is_finite() || p.max_horizontal_accuracy_m <= 0.0 {
            return Err(LocationError::config(
                "policy.max_horizontal_accuracy_m must be a positive number",
            ));
        }
        if !p.min_distance_m.is_finite() || p.min_distance_m < 0.0 {
            return Err(LocationError::config(
                "policy.min_distance_m must be zero or positive",
            ));
        }
        if self.retention.retention_days == 0 {
            return Err(LocationError::config(
                "retention.retention_days must be at least 1",
            ));
        }
        if self.sync.max_points_per_upload == 0 {
            return Err(LocationError::config(
                "sync.max_points_per_upload must be at least 1",
            ));
        }
        if self.sync.upload_timeout_secs == 0 {
            return Err(LocationError::config(
                "sync.upload_timeout_secs must be at least 1",
            ));
        }
        Ok(())
    }
}

/// How long points are kept locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Points captured longer ago than this are purged on foreground.
    /// Default: 7 days
    pub retention_days: u32,
}

impl RetentionConfig {
    pub fn window(&self) -> Duration {
        Duration::days(i64::from(self.retention_days))
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self { retention_days: 7 }
    }
}

/// Background upload settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Maximum points handed to the uploader per call.
    /// Default: 500
    pub max_points_per_upload: u32,
    /// Deadline for a whole upload pass, in seconds. Background fetch windows
    /// on iOS are roughly 30 seconds.
    /// Default: 25
    pub upload_timeout_secs: u64,
}

impl SyncConfig {
    pub fn upload_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.upload_timeout_secs)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_points_per_upload: 500,
            upload_timeout_secs: 25,
        }
    }
}
