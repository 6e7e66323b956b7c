//! # Location Tracker
//!
//! Mediates between the platform location service and the local store.
//!
//! Two independent state machines live here:
//!
//! 1. **Standard updates**: `Stopped -> Tracking -> Stopped`
//! 2. **Monitoring** (regions and significant changes): `Stopped -> Monitoring -> Stopped`
//!
//! Stopping one never stops the other. Platform callbacks do not call into the
//! tracker directly; the platform shell pushes [`TrackerEvent`]s through a
//! [`TrackerEventSender`] and the tracker drains them serially, either on its
//! own thread ([`LocationTracker::spawn_event_loop`]) or on demand
//! ([`LocationTracker::process_pending`]).
//!
//! Events are gated against the state current at the time they are processed,
//! so once a stop call has returned, late callbacks for the stopped
//! subscription never reach the store.

use std::collections::BTreeMap;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::thread;

use log::{debug, info, warn};

use crate::error::{LocationError, Result};
use crate::policy::{AcceptancePolicy, Decision, RejectReason};
use crate::store::LocalStore;
use crate::{CircularRegion, LocationReading, PointId};

// ============================================================================
// Platform Seam
// ============================================================================

/// Location permission as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
pub enum AuthorizationStatus {
    NotDetermined,
    Restricted,
    Denied,
    AuthorizedWhenInUse,
    AuthorizedAlways,
}

impl AuthorizationStatus {
    /// Denied or restricted: only the user can change this.
    pub fn is_denied(&self) -> bool {
        matches!(
            self,
            AuthorizationStatus::Denied | AuthorizationStatus::Restricted
        )
    }
}

/// The platform location service.
///
/// Implementations forward to CoreLocation / FusedLocationProvider and deliver
/// readings back through a [`TrackerEventSender`], never by calling the tracker.
pub trait LocationProvider: Send + Sync {
    fn authorization_status(&self) -> AuthorizationStatus;

    /// Ask the user for permission. Returns the status known after asking,
    /// which may still be `NotDetermined` while the prompt is showing.
    fn request_authorization(&self) -> AuthorizationStatus;

    fn start_updating_location(&self) -> Result<()>;
    fn stop_updating_location(&self);

    fn start_monitoring_region(&self, region: &CircularRegion) -> Result<()>;
    fn stop_monitoring_region(&self, identifier: &str);

    /// Regions the platform still has registered, including ones left over
    /// from earlier launches.
    fn monitored_region_ids(&self) -> Vec<String>;

    fn start_monitoring_significant_changes(&self) -> Result<()>;
    fn stop_monitoring_significant_changes(&self);
}

// ============================================================================
// Events
// ============================================================================

/// Inbound platform callbacks.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackerEvent {
    /// Standard continuous update
    LocationUpdated(LocationReading),
    /// Low-power significant-change update
    SignificantChange(LocationReading),
    RegionEntered {
        region_id: String,
        reading: Option<LocationReading>,
    },
    RegionExited {
        region_id: String,
        reading: Option<LocationReading>,
    },
    AuthorizationChanged(AuthorizationStatus),
    /// The platform reported an error (permission revoked, hardware fault)
    ProviderFailed(LocationError),
    /// Stop the event loop
    Shutdown,
}

/// Cloneable handle the platform shell uses to deliver callbacks.
#[derive(Debug, Clone)]
pub struct TrackerEventSender {
    tx: mpsc::Sender<TrackerEvent>,
}

impl TrackerEventSender {
    /// Queue an event. Returns false if the tracker has been dropped.
    pub fn send(&self, event: TrackerEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    pub fn location_updated(&self, reading: LocationReading) -> bool {
        self.send(TrackerEvent::LocationUpdated(reading))
    }
}

// ============================================================================
// State
// ============================================================================

#[derive(Debug, Default)]
struct TrackerState {
    is_tracking: bool,
    significant_changes: bool,
    monitored_regions: BTreeMap<String, CircularRegion>,
    last_accepted: Option<LocationReading>,
}

/// Point-in-time copy of the tracker state.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerSnapshot {
    pub is_tracking: bool,
    pub significant_changes: bool,
    /// Registered region identifiers, sorted
    pub monitored_regions: Vec<String>,
    pub last_accepted: Option<LocationReading>,
}

impl TrackerSnapshot {
    pub fn is_monitoring(&self) -> bool {
        self.significant_changes || !self.monitored_regions.is_empty()
    }
}

/// Running counters for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackerStats {
    pub accepted: u64,
    pub rejected: u64,
    pub ignored_after_stop: u64,
    pub storage_failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
    accepted: AtomicU64,
    rejected: AtomicU64,
    ignored_after_stop: AtomicU64,
    storage_failures: AtomicU64,
}

// ============================================================================
// Location Tracker
// ============================================================================

/// Owns the location-services lifecycle and feeds accepted readings to the store.
pub struct LocationTracker {
    provider: Arc<dyn LocationProvider>,
    store: Arc<LocalStore>,
    policy: AcceptancePolicy,
    state: Mutex<TrackerState>,
    counters: Counters,
    sender: mpsc::Sender<TrackerEvent>,
    receiver: Mutex<mpsc::Receiver<TrackerEvent>>,
}

impl LocationTracker {
    pub fn new(
        provider: Arc<dyn LocationProvider>,
        store: Arc<LocalStore>,
        policy: AcceptancePolicy,
    ) -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            provider,
            store,
            policy,
            state: Mutex::new(TrackerState::default()),
            counters: Counters::default(),
            sender,
            receiver: Mutex::new(receiver),
        }
    }

    /// Handle for delivering platform callbacks.
    pub fn event_sender(&self) -> TrackerEventSender {
        TrackerEventSender {
            tx: self.sender.clone(),
        }
    }

    pub fn store(&self) -> &Arc<LocalStore> {
        &self.store
    }

    pub fn policy(&self) -> &AcceptancePolicy {
        &self.policy
    }

    // Poisoning is recovered; the state is plain flags.
    fn state(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> TrackerSnapshot {
        let state = self.state();
        TrackerSnapshot {
            is_tracking: state.is_tracking,
            significant_changes: state.significant_changes,
            monitored_regions: state.monitored_regions.keys().cloned().collect(),
            last_accepted: state.last_accepted,
        }
    }

    pub fn is_tracking(&self) -> bool {
        self.state().is_tracking
    }

    pub fn stats(&self) -> TrackerStats {
        TrackerStats {
            accepted: self.counters.accepted.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
            ignored_after_stop: self.counters.ignored_after_stop.load(Ordering::Relaxed),
            storage_failures: self.counters.storage_failures.load(Ordering::Relaxed),
        }
    }

    // ========================================================================
    // Standard Updates
    // ========================================================================

    /// Restart standard updates after the process was relaunched by a
    /// location event. Does not prompt for authorization.
    pub fn resume_location_services(&self) -> Result<()> {
        let mut state = self.state();
        if state.is_tracking {
            debug!("[LocationTracker] Resume requested while already tracking");
            return Ok(());
        }

        self.provider.start_updating_location().inspect_err(|e| {
            warn!("[LocationTracker] Failed to resume location services: {}", e);
        })?;
        state.is_tracking = true;
        info!("[LocationTracker] Resumed location services after relaunch");
        Ok(())
    }

    /// Begin continuous updates, prompting for permission if it has not been
    /// asked yet.
    ///
    /// Returns [`LocationError::PermissionDenied`] if the user has denied or
    /// restricted access; the tracker stays usable for later attempts.
    pub fn start_updating_location(&self) -> Result<()> {
        let mut status = self.provider.authorization_status();
        if status == AuthorizationStatus::NotDetermined {
            status = self.provider.request_authorization();
            debug!("[LocationTracker] Authorization after request: {:?}", status);
        }
        let mut state = self.state();
        if status.is_denied() {
            warn!("[LocationTracker] Cannot start updates: permission {:?}", status);
            if state.is_tracking {
                self.provider.stop_updating_location();
                state.is_tracking = false;
            }
            return Err(LocationError::PermissionDenied);
        }

        if state.is_tracking {
            return Ok(());
        }

        // A prompt still pending is fine: the platform holds updates until the
        // user answers and reports a denial as AuthorizationChanged.
        self.provider.start_updating_location().inspect_err(|e| {
            warn!("[LocationTracker] Failed to start updates: {}", e);
        })?;
        state.is_tracking = true;
        info!("[LocationTracker] Started location updates");
        Ok(())
    }

    /// Halt continuous updates. Safe to call repeatedly.
    pub fn stop_updating_location(&self) {
        let mut state = self.state();
        self.provider.stop_updating_location();
        if state.is_tracking {
            state.is_tracking = false;
            info!("[LocationTracker] Stopped location updates");
        }
    }

    // ========================================================================
    // Monitoring
    // ========================================================================

    /// Register a circular region with the platform.
    pub fn start_monitoring_region(&self, region: CircularRegion) -> Result<()> {
        if !region.is_valid() {
            return Err(LocationError::invalid_point(format!(
                "region '{}' has invalid center or radius",
                region.identifier
            )));
        }

        let mut state = self.state();
        self.provider.start_monitoring_region(&region)?;
        info!(
            "[LocationTracker] Monitoring region '{}' ({:.0}m)",
            region.identifier, region.radius
        );
        state
            .monitored_regions
            .insert(region.identifier.clone(), region);
        Ok(())
    }

    /// Unregister every region, including ones the platform kept from earlier
    /// launches. Safe to call repeatedly.
    pub fn stop_monitoring_all_regions(&self) {
        let mut state = self.state();

        let mut ids: Vec<String> = state.monitored_regions.keys().cloned().collect();
        for id in self.provider.monitored_region_ids() {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        for id in &ids {
            self.provider.stop_monitoring_region(id);
        }
        state.monitored_regions.clear();

        if !ids.is_empty() {
            info!("[LocationTracker] Stopped monitoring {} regions", ids.len());
        }
    }

    pub fn start_monitoring_significant_location_changes(&self) -> Result<()> {
        let mut state = self.state();
        if state.significant_changes {
            return Ok(());
        }
        self.provider.start_monitoring_significant_changes()?;
        state.significant_changes = true;
        info!("[LocationTracker] Started significant-change monitoring");
        Ok(())
    }

    /// Safe to call repeatedly.
    pub fn stop_monitoring_significant_location_changes(&self) {
        let mut state = self.state();
        self.provider.stop_monitoring_significant_changes();
        if state.significant_changes {
            state.significant_changes = false;
            info!("[LocationTracker] Stopped significant-change monitoring");
        }
    }

    /// Stop everything and forget the last accepted reading (logout).
    pub fn reset(&self) {
        self.stop_updating_location();
        self.stop_monitoring_all_regions();
        self.stop_monitoring_significant_location_changes();
        self.state().last_accepted = None;
        info!("[LocationTracker] Reset");
    }

    // ========================================================================
    // Readings
    // ========================================================================

    /// Apply the acceptance policy and persist the reading if accepted.
    ///
    /// Returns the new point id, or `None` if the reading was dropped. Storage
    /// failures are returned to the caller and not retried here; the next
    /// reading is evaluated against the last *persisted* one.
    pub fn on_location_update(&self, reading: LocationReading) -> Result<Option<PointId>> {
        let mut state = self.state();
        self.accept(&mut state, reading)
    }

    fn accept(
        &self,
        state: &mut TrackerState,
        reading: LocationReading,
    ) -> Result<Option<PointId>> {
        match self.policy.evaluate(state.last_accepted.as_ref(), &reading) {
            Decision::Reject(RejectReason::Invalid) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "[LocationTracker] Dropping invalid reading lat={} lng={} accuracy={}",
                    reading.latitude, reading.longitude, reading.accuracy
                );
                Ok(None)
            }
            Decision::Reject(reason) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                debug!("[LocationTracker] Rejected reading: {:?}", reason);
                Ok(None)
            }
            Decision::Accept => match self.store.insert(&reading) {
                Ok(id) => {
                    self.counters.accepted.fetch_add(1, Ordering::Relaxed);
                    state.last_accepted = Some(reading);
                    Ok(Some(id))
                }
                Err(e) => {
                    self.counters.storage_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        "[LocationTracker] Could not persist reading, waiting for next one: {}",
                        e
                    );
                    Err(e)
                }
            },
        }
    }

    fn ignore(&self, what: &str) -> Result<Option<PointId>> {
        self.counters.ignored_after_stop.fetch_add(1, Ordering::Relaxed);
        debug!("[LocationTracker] Ignoring {} (subscription stopped)", what);
        Ok(None)
    }

    // ========================================================================
    // Event Dispatch
    // ========================================================================

    /// Process a single platform event against the current state.
    pub fn handle_event(&self, event: TrackerEvent) -> Result<Option<PointId>> {
        let mut state = self.state();
        match event {
            TrackerEvent::LocationUpdated(reading) => {
                if !state.is_tracking {
                    return self.ignore("location update");
                }
                self.accept(&mut state, reading)
            }
            TrackerEvent::SignificantChange(reading) => {
                if !state.significant_changes {
                    return self.ignore("significant change");
                }
                self.accept(&mut state, reading)
            }
            TrackerEvent::RegionEntered { region_id, reading }
            | TrackerEvent::RegionExited { region_id, reading } => {
                if !state.monitored_regions.contains_key(&region_id) {
                    return self.ignore("region event");
                }
                debug!("[LocationTracker] Region event for '{}'", region_id);
                match reading {
                    Some(reading) => self.accept(&mut state, reading),
                    None => Ok(None),
                }
            }
            TrackerEvent::AuthorizationChanged(status) => {
                if status.is_denied() {
                    Self::drop_subscriptions(&mut state);
                    warn!("[LocationTracker] Authorization changed to {:?}", status);
                } else {
                    info!("[LocationTracker] Authorization changed to {:?}", status);
                }
                Ok(None)
            }
            TrackerEvent::ProviderFailed(error) => {
                if error == LocationError::PermissionDenied {
                    Self::drop_subscriptions(&mut state);
                }
                warn!("[LocationTracker] Provider failure: {}", error);
                Ok(None)
            }
            TrackerEvent::Shutdown => Ok(None),
        }
    }

    // The platform has already stopped delivering; only our flags need updating.
    fn drop_subscriptions(state: &mut TrackerState) {
        state.is_tracking = false;
        state.significant_changes = false;
    }

    /// Drain all queued events without blocking. Returns the number processed.
    ///
    /// Returns 0 without draining while a [`run`](Self::run) loop owns the
    /// channel; that loop processes the events instead.
    pub fn process_pending(&self) -> usize {
        let receiver = match self.receiver.try_lock() {
            Ok(receiver) => receiver,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                debug!("[LocationTracker] Event loop is running, skipping drain");
                return 0;
            }
        };
        let mut processed = 0;
        while let Ok(event) = receiver.try_recv() {
            processed += 1;
            if matches!(event, TrackerEvent::Shutdown) {
                continue;
            }
            // Failures are already logged; the next callback is the retry
            let _ = self.handle_event(event);
        }
        processed
    }

    /// Block on the event channel until [`TrackerEvent::Shutdown`] arrives.
    pub fn run(&self) {
        let receiver = self.receiver.lock().unwrap_or_else(PoisonError::into_inner);
        info!("[LocationTracker] Event loop started");
        while let Ok(event) = receiver.recv() {
            if matches!(event, TrackerEvent::Shutdown) {
                break;
            }
            let _ = self.handle_event(event);
        }
        info!("[LocationTracker] Event loop stopped");
    }

    /// Run the event loop on a dedicated thread.
    pub fn spawn_event_loop(self: &Arc<Self>) -> io::Result<thread::JoinHandle<()>> {
        let tracker = Arc::clone(self);
        thread::Builder::new()
            .name("hat-location-tracker".to_string())
            .spawn(move || tracker.run())
    }

    /// Ask a running event loop to exit after the events already queued.
    pub fn shutdown(&self) {
        let _ = self.sender.send(TrackerEvent::Shutdown);
    }
}

// ============================================================================
// Tests
// ============================================================================
