//! # HAT Location
//!
//! Location tracking and local point storage for the HAT mobile client.
//!
//! This library provides:
//! - A tracker that owns the platform location-services lifecycle (standard
//!   updates, region monitoring, significant-change monitoring)
//! - An acceptance policy that debounces readings by accuracy, time and distance
//! - A SQLite point store with age-based purge and sync-state queries
//! - App lifecycle glue for relaunch, foreground and logout transitions
//!
//! ## Features
//!
//! - **`sync`** - Enable the background-fetch upload driver
//! - **`ffi`** - Enable FFI bindings for mobile platforms (iOS/Android)
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use chrono::Utc;
//! use hat_location::{LocalStore, LocationReading};
//!
//! let store = LocalStore::in_memory().unwrap();
//! store
//!     .insert(&LocationReading::new(51.5074, -0.1278, 5.0, Utc::now()))
//!     .unwrap();
//!
//! let unsynced: Vec<_> = store
//!     .query_unsynced()
//!     .iter()
//!     .collect::<Result<_, _>>()
//!     .unwrap();
//! assert_eq!(unsynced.len(), 1);
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// Unified error handling
pub mod error;
pub use error::{LocationError, Result};

// Runtime configuration (policy, retention, sync)
pub mod config;
pub use config::{LocationConfig, RetentionConfig, SyncConfig};

// Geographic utilities (distance calculations)
pub mod geo_utils;

// Reading acceptance policy (accuracy/time/distance debounce)
pub mod policy;
pub use policy::{AcceptancePolicy, Decision, RejectReason};

// Schema migrations for the point store
pub mod migrations;

// SQLite point store
pub mod store;
pub use store::{LocalStore, UnsyncedPoints};

// Location tracker and its platform seam
pub mod tracker;
pub use tracker::{
    AuthorizationStatus, LocationProvider, LocationTracker, TrackerEvent, TrackerEventSender,
    TrackerSnapshot, TrackerStats,
};

// App lifecycle glue (launch, foreground, logout)
pub mod lifecycle;
pub use lifecycle::{AppLifecycle, LaunchOptions};

// Background-fetch upload driver
#[cfg(feature = "sync")]
pub mod sync;
#[cfg(feature = "sync")]
pub use sync::{
    BackgroundTaskApi, BackgroundTaskGuard, BackgroundTaskId, FetchOutcome, PointUploader,
    SyncDriver,
};

// FFI bindings for mobile platforms (iOS/Android)
#[cfg(feature = "ffi")]
pub mod ffi;

#[cfg(feature = "ffi")]
uniffi::setup_scaffolding!();

/// Initialize logging for Android (only used in FFI)
#[cfg(all(feature = "ffi", target_os = "android"))]
pub(crate) fn init_logging() {
    use android_logger::Config;
    use log::LevelFilter;

    android_logger::init_once(
        Config::default()
            .with_max_level(LevelFilter::Debug)
            .with_tag("HatLocation"),
    );
}

/// Initialize logging for iOS (only used in FFI)
#[cfg(all(feature = "ffi", target_os = "ios"))]
pub(crate) fn init_logging() {
    use log::LevelFilter;
    use std::sync::Once;

    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = oslog::OsLogger::new("org.hatdex.location")
            .level_filter(LevelFilter::Debug)
            .init();
    });
}

#[cfg(all(feature = "ffi", not(any(target_os = "android", target_os = "ios"))))]
pub(crate) fn init_logging() {
    // No-op on desktop platforms
}

// ============================================================================
// Core Types
// ============================================================================

/// A single reading delivered by the platform location service.
///
/// # Example
/// ```
/// use chrono::Utc;
/// use hat_location::LocationReading;
/// let reading = LocationReading::new(51.5074, -0.1278, 8.0, Utc::now()); // London
/// assert!(reading.is_valid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationReading {
    pub latitude: f64,
    pub longitude: f64,
    /// Horizontal accuracy in meters
    pub accuracy: f64,
    pub captured_at: DateTime<Utc>,
}

impl LocationReading {
    /// Create a new reading.
    pub fn new(latitude: f64, longitude: f64, accuracy: f64, captured_at: DateTime<Utc>) -> Self {
        Self {
            latitude,
            longitude,
            accuracy,
            captured_at,
        }
    }

    /// Check if the reading has valid coordinates and accuracy, and a
    /// timestamp the store can represent.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
            && self.accuracy.is_finite()
            && self.accuracy >= 0.0
            && self.captured_at.timestamp_nanos_opt().is_some()
    }
}

/// Opaque identifier assigned to a point by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PointId(pub i64);

/// A reading persisted in the local store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationPoint {
    pub id: PointId,
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: f64,
    pub captured_at: DateTime<Utc>,
    /// When the point was uploaded. `None` until the sync driver marks it.
    pub synced_at: Option<DateTime<Utc>>,
}

impl LocationPoint {
    /// The reading this point was created from.
    pub fn reading(&self) -> LocationReading {
        LocationReading::new(self.latitude, self.longitude, self.accuracy, self.captured_at)
    }

    pub fn is_synced(&self) -> bool {
        self.synced_at.is_some()
    }
}

/// A circular geofence registered with the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircularRegion {
    pub identifier: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Radius in meters
    pub radius: f64,
}

impl CircularRegion {
    pub fn new(identifier: impl Into<String>, latitude: f64, longitude: f64, radius: f64) -> Self {
        Self {
            identifier: identifier.into(),
            latitude,
            longitude,
            radius,
        }
    }

    /// Finite in-range center and a positive radius.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
            && self.radius.is_finite()
            && self.radius > 0.0
    }

    /// Whether a reading falls inside the region.
    pub fn contains(&self, reading: &LocationReading) -> bool {
        geo_utils::haversine_distance(
            self.latitude,
            self.longitude,
            reading.latitude,
            reading.longitude,
        ) <= self.radius
    }
}

// ============================================================================
// Tests
// ============================================================================
