//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex, Once};

use chrono::{DateTime, Duration, TimeZone, Utc};
use hat_location::{
    AcceptancePolicy, AuthorizationStatus, CircularRegion, LocalStore, LocationProvider,
    LocationReading, LocationTracker, Result,
};

static INIT: Once = Once::new();

/// Route `log` output to the test harness (`RUST_LOG=debug cargo test`).
pub fn init_logging() {
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

/// A good-accuracy reading `secs` after `t0`, moving north ~11m per step.
pub fn reading_at(secs: i64, step: u32) -> LocationReading {
    LocationReading::new(
        51.5074 + step as f64 * 0.0001,
        -0.1278,
        5.0,
        t0() + Duration::seconds(secs),
    )
}

/// Scripted platform service that records every call.
#[derive(Default)]
pub struct MockProvider {
    pub status: Mutex<Option<AuthorizationStatus>>,
    pub updates_running: Mutex<bool>,
    pub significant_running: Mutex<bool>,
    pub regions: Mutex<Vec<String>>,
    pub authorization_requests: Mutex<u32>,
}

impl MockProvider {
    pub fn authorized() -> Arc<Self> {
        Arc::new(Self {
            status: Mutex::new(Some(AuthorizationStatus::AuthorizedAlways)),
            ..Default::default()
        })
    }

    pub fn undetermined() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn updates_running(&self) -> bool {
        *self.updates_running.lock().unwrap()
    }

    pub fn authorization_requests(&self) -> u32 {
        *self.authorization_requests.lock().unwrap()
    }
}

impl LocationProvider for MockProvider {
    fn authorization_status(&self) -> AuthorizationStatus {
        self.status
            .lock()
            .unwrap()
            .unwrap_or(AuthorizationStatus::NotDetermined)
    }

    fn request_authorization(&self) -> AuthorizationStatus {
        *self.authorization_requests.lock().unwrap() += 1;
        self.authorization_status()
    }

    fn start_updating_location(&self) -> Result<()> {
        *self.updates_running.lock().unwrap() = true;
        Ok(())
    }

    fn stop_updating_location(&self) {
        *self.updates_running.lock().unwrap() = false;
    }

    fn start_monitoring_region(&self, region: &CircularRegion) -> Result<()> {
        self.regions.lock().unwrap().push(region.identifier.clone());
        Ok(())
    }

    fn stop_monitoring_region(&self, identifier: &str) {
        self.regions.lock().unwrap().retain(|r| r != identifier);
    }

    fn monitored_region_ids(&self) -> Vec<String> {
        self.regions.lock().unwrap().clone()
    }

    fn start_monitoring_significant_changes(&self) -> Result<()> {
        *self.significant_running.lock().unwrap() = true;
        Ok(())
    }

    fn stop_monitoring_significant_changes(&self) {
        *self.significant_running.lock().unwrap() = false;
    }
}

pub fn tracker_with(provider: Arc<MockProvider>, store: Arc<LocalStore>) -> Arc<LocationTracker> {
    Arc::new(LocationTracker::new(
        provider,
        store,
        AcceptancePolicy::default(),
    ))
}
