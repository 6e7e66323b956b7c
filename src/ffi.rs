//! FFI bindings for mobile platforms (iOS/Android).
//!
//! This module provides the UniFFI bindings that expose the location core to
//! Swift and Kotlin. The host app creates one [`LocationSession`], implements
//! [`PlatformLocationService`] on top of CoreLocation / FusedLocationProvider,
//! and forwards every platform callback to the session.
//!
//! Uploading stays on the host side: it reads [`LocationSession::unsynced_points`]
//! and reports back through [`LocationSession::mark_synced`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{info, warn};

use crate::error::LocationError;
use crate::lifecycle::{AppLifecycle, LaunchOptions};
use crate::store::LocalStore;
use crate::tracker::{
    AuthorizationStatus, LocationProvider, LocationTracker, TrackerEvent, TrackerEventSender,
};
use crate::{init_logging, CircularRegion, LocationConfig, LocationPoint, LocationReading, PointId};

// ============================================================================
// FFI Types
// ============================================================================

/// A platform reading. Timestamps cross the FFI boundary as Unix milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, uniffi::Record)]
pub struct FfiLocationReading {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: f64,
    pub captured_at_ms: i64,
}

fn datetime_from_millis(ms: i64) -> Result<DateTime<Utc>, LocationError> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| LocationError::invalid_point(format!("timestamp {}ms out of range", ms)))
}

impl TryFrom<FfiLocationReading> for LocationReading {
    type Error = LocationError;

    fn try_from(r: FfiLocationReading) -> Result<Self, LocationError> {
        Ok(LocationReading::new(
            r.latitude,
            r.longitude,
            r.accuracy,
            datetime_from_millis(r.captured_at_ms)?,
        ))
    }
}

/// A stored point handed to the host uploader.
#[derive(Debug, Clone, PartialEq, uniffi::Record)]
pub struct FfiLocationPoint {
    pub id: i64,
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: f64,
    pub captured_at_ms: i64,
    pub synced_at_ms: Option<i64>,
}

impl From<LocationPoint> for FfiLocationPoint {
    fn from(p: LocationPoint) -> Self {
        Self {
            id: p.id.0,
            latitude: p.latitude,
            longitude: p.longitude,
            accuracy: p.accuracy,
            captured_at_ms: p.captured_at.timestamp_millis(),
            synced_at_ms: p.synced_at.map(|t| t.timestamp_millis()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, uniffi::Record)]
pub struct FfiCircularRegion {
    pub identifier: String,
    pub latitude: f64,
    pub longitude: f64,
    pub radius: f64,
}

impl From<FfiCircularRegion> for CircularRegion {
    fn from(r: FfiCircularRegion) -> Self {
        CircularRegion::new(r.identifier, r.latitude, r.longitude, r.radius)
    }
}

impl From<&CircularRegion> for FfiCircularRegion {
    fn from(r: &CircularRegion) -> Self {
        Self {
            identifier: r.identifier.clone(),
            latitude: r.latitude,
            longitude: r.longitude,
            radius: r.radius,
        }
    }
}

/// Tracker state for settings/debug screens.
#[derive(Debug, Clone, PartialEq, uniffi::Record)]
pub struct FfiTrackerStatus {
    pub is_tracking: bool,
    pub significant_changes: bool,
    pub monitored_regions: Vec<String>,
    pub unsynced_count: u64,
}

// ============================================================================
// Callback Interfaces
// ============================================================================

/// Platform location service implemented in Swift/Kotlin.
/// `start_*` methods return false when the hardware or service is unavailable.
#[uniffi::export(callback_interface)]
pub trait PlatformLocationService: Send + Sync {
    fn authorization_status(&self) -> AuthorizationStatus;
    fn request_authorization(&self) -> AuthorizationStatus;
    fn start_updating_location(&self) -> bool;
    fn stop_updating_location(&self);
    fn start_monitoring_region(&self, region: FfiCircularRegion) -> bool;
    fn stop_monitoring_region(&self, identifier: String);
    fn monitored_region_ids(&self) -> Vec<String>;
    fn start_monitoring_significant_changes(&self) -> bool;
    fn stop_monitoring_significant_changes(&self);
}

struct ForeignProvider(Box<dyn PlatformLocationService>);

impl LocationProvider for ForeignProvider {
    fn authorization_status(&self) -> AuthorizationStatus {
        self.0.authorization_status()
    }

    fn request_authorization(&self) -> AuthorizationStatus {
        self.0.request_authorization()
    }

    fn start_updating_location(&self) -> crate::Result<()> {
        if self.0.start_updating_location() {
            Ok(())
        } else {
            Err(LocationError::hardware("standard updates unavailable"))
        }
    }

    fn stop_updating_location(&self) {
        self.0.stop_updating_location()
    }

    fn start_monitoring_region(&self, region: &CircularRegion) -> crate::Result<()> {
        if self.0.start_monitoring_region(region.into()) {
            Ok(())
        } else {
            Err(LocationError::hardware(format!(
                "region monitoring unavailable for '{}'",
                region.identifier
            )))
        }
    }

    fn stop_monitoring_region(&self, identifier: &str) {
        self.0.stop_monitoring_region(identifier.to_string())
    }

    fn monitored_region_ids(&self) -> Vec<String> {
        self.0.monitored_region_ids()
    }

    fn start_monitoring_significant_changes(&self) -> crate::Result<()> {
        if self.0.start_monitoring_significant_changes() {
            Ok(())
        } else {
            Err(LocationError::hardware(
                "significant-change monitoring unavailable",
            ))
        }
    }

    fn stop_monitoring_significant_changes(&self) {
        self.0.stop_monitoring_significant_changes()
    }
}

// ============================================================================
// Session Object
// ============================================================================

/// Default configuration as JSON, for the host to edit and pass back.
#[uniffi::export]
pub fn default_config_json() -> String {
    LocationConfig::default().to_json()
}

/// One tracker + store pair, owned by the host app delegate.
#[derive(uniffi::Object)]
pub struct LocationSession {
    lifecycle: AppLifecycle,
    events: TrackerEventSender,
}

#[uniffi::export]
impl LocationSession {
    /// Open the store at `db_path` and start the tracker's event loop.
    #[uniffi::constructor]
    pub fn new(
        db_path: String,
        config_json: String,
        service: Box<dyn PlatformLocationService>,
    ) -> Result<Arc<Self>, LocationError> {
        init_logging();
        let config = LocationConfig::from_json(&config_json)?;

        let store = Arc::new(LocalStore::open(&db_path)?.with_retention(config.retention.clone()));
        let provider: Arc<dyn LocationProvider> = Arc::new(ForeignProvider(service));
        let tracker = Arc::new(LocationTracker::new(
            provider,
            store.clone(),
            config.policy.clone(),
        ));
        tracker
            .spawn_event_loop()
            .map_err(|e| LocationError::Internal {
                message: format!("event loop: {}", e),
            })?;

        info!("[LocationSession] Created for {}", db_path);
        Ok(Arc::new(Self {
            events: tracker.event_sender(),
            lifecycle: AppLifecycle::new(tracker, store),
        }))
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    pub fn did_finish_launching(&self, location_relaunch: bool) -> Result<(), LocationError> {
        self.lifecycle
            .did_finish_launching(LaunchOptions { location_relaunch })
    }

    /// Returns the number of points purged.
    pub fn will_enter_foreground(&self) -> Result<u64, LocationError> {
        Ok(self.lifecycle.will_enter_foreground()? as u64)
    }

    pub fn did_logout(&self) -> Result<(), LocationError> {
        self.lifecycle.did_logout()
    }

    // ------------------------------------------------------------------------
    // Tracking control
    // ------------------------------------------------------------------------

    pub fn start_updating_location(&self) -> Result<(), LocationError> {
        self.lifecycle.tracker().start_updating_location()
    }

    pub fn stop_updating_location(&self) {
        self.lifecycle.tracker().stop_updating_location()
    }

    pub fn start_monitoring_region(&self, region: FfiCircularRegion) -> Result<(), LocationError> {
        self.lifecycle.tracker().start_monitoring_region(region.into())
    }

    pub fn stop_monitoring_all_regions(&self) {
        self.lifecycle.tracker().stop_monitoring_all_regions()
    }

    pub fn start_monitoring_significant_location_changes(&self) -> Result<(), LocationError> {
        self.lifecycle
            .tracker()
            .start_monitoring_significant_location_changes()
    }

    pub fn stop_monitoring_significant_location_changes(&self) {
        self.lifecycle
            .tracker()
            .stop_monitoring_significant_location_changes()
    }

    pub fn status(&self) -> FfiTrackerStatus {
        let snapshot = self.lifecycle.tracker().snapshot();
        let unsynced_count = self.lifecycle.store().unsynced_count().unwrap_or_else(|e| {
            warn!("[LocationSession] Could not count unsynced points: {}", e);
            0
        });
        FfiTrackerStatus {
            is_tracking: snapshot.is_tracking,
            significant_changes: snapshot.significant_changes,
            monitored_regions: snapshot.monitored_regions,
            unsynced_count: unsynced_count as u64,
        }
    }

    // ------------------------------------------------------------------------
    // Platform callbacks (queued, never processed on the caller's thread)
    // ------------------------------------------------------------------------

    pub fn location_updated(&self, reading: FfiLocationReading) {
        if let Some(reading) = convert_reading(reading) {
            self.events.send(TrackerEvent::LocationUpdated(reading));
        }
    }

    pub fn significant_change(&self, reading: FfiLocationReading) {
        if let Some(reading) = convert_reading(reading) {
            self.events.send(TrackerEvent::SignificantChange(reading));
        }
    }

    pub fn region_entered(&self, region_id: String, reading: Option<FfiLocationReading>) {
        self.events.send(TrackerEvent::RegionEntered {
            region_id,
            reading: reading.and_then(convert_reading),
        });
    }

    pub fn region_exited(&self, region_id: String, reading: Option<FfiLocationReading>) {
        self.events.send(TrackerEvent::RegionExited {
            region_id,
            reading: reading.and_then(convert_reading),
        });
    }

    pub fn authorization_changed(&self, status: AuthorizationStatus) {
        self.events.send(TrackerEvent::AuthorizationChanged(status));
    }

    /// The platform reported a hardware or service fault.
    pub fn provider_failed(&self, message: String) {
        self.events
            .send(TrackerEvent::ProviderFailed(LocationError::hardware(message)));
    }

    // ------------------------------------------------------------------------
    // Sync hand-off
    // ------------------------------------------------------------------------

    /// Up to `limit` unsynced points, oldest first.
    pub fn unsynced_points(&self, limit: u32) -> Result<Vec<FfiLocationPoint>, LocationError> {
        let query = self.lifecycle.store().query_unsynced();
        query
            .iter()
            .take(limit as usize)
            .map(|p| p.map(FfiLocationPoint::from))
            .collect()
    }

    /// Returns the number of points newly marked.
    pub fn mark_synced(&self, ids: Vec<i64>, synced_at_ms: i64) -> Result<u64, LocationError> {
        let synced_at = datetime_from_millis(synced_at_ms)?;
        let ids: Vec<PointId> = ids.into_iter().map(PointId).collect();
        let marked = self.lifecycle.store().mark_synced(&ids, synced_at)?;
        Ok(marked as u64)
    }
}

/// Unrepresentable timestamps are logged and the reading dropped.
fn convert_reading(reading: FfiLocationReading) -> Option<LocationReading> {
    LocationReading::try_from(reading)
        .inspect_err(|e| warn!("[LocationSession] Dropping reading: {}", e))
        .ok()
}

impl Drop for LocationSession {
    fn drop(&mut self) {
        self.lifecycle.tracker().shutdown();
    }
}
