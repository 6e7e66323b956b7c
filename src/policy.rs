//! Reading acceptance policy.
//!
//! The platform delivers far more readings than are worth keeping. A reading
//! is persisted when it is accurate enough and either enough time has passed
//! since the last accepted reading or the device has moved far enough.

use serde::{Deserialize, Serialize};

use crate::geo_utils::haversine_distance;
use crate::LocationReading;

/// Thresholds for accepting a reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcceptancePolicy {
    /// Readings with worse horizontal accuracy are dropped.
    /// Default: 100.0 meters
    pub max_horizontal_accuracy_m: f64,

    /// Minimum displacement from the last accepted reading.
    /// Default: 10.0 meters
    pub min_distance_m: f64,

    /// Minimum time since the last accepted reading.
    /// Default: 30 seconds
    pub min_interval_secs: u64,
}

impl Default for AcceptancePolicy {
    fn default() -> Self {
        Self {
            max_horizontal_accuracy_m: 100.0,
            min_distance_m: 10.0,
            min_interval_secs: 30,
        }
    }
}

/// Why a reading was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// NaN or out-of-range coordinates, or unusable accuracy
    Invalid,
    /// Horizontal accuracy worse than the configured maximum
    Inaccurate,
    /// Neither the interval nor the distance threshold was reached
    TooSoonAndTooClose,
}

/// Outcome of evaluating a reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accept,
    Reject(RejectReason),
}

impl Decision {
    pub fn is_accept(&self) -> bool {
        matches!(self, Decision::Accept)
    }
}

impl AcceptancePolicy {
    /// Decide whether `candidate` should be persisted given the last accepted reading.
    pub fn evaluate(
        &self,
        last_accepted: Option<&LocationReading>,
        candidate: &LocationReading,
    ) -> Decision {
        if !candidate.is_valid() {
            return Decision::Reject(RejectReason::Invalid);
        }
        if candidate.accuracy > self.max_horizontal_accuracy_m {
            return Decision::Reject(RejectReason::Inaccurate);
        }

        let Some(last) = last_accepted else {
            return Decision::Accept;
        };

        // Clock going backwards counts as no time elapsed
        let elapsed_ms = (candidate.captured_at - last.captured_at)
            .num_milliseconds()
            .max(0);
        let min_interval_ms = (self.min_interval_secs as i64).saturating_mul(1000);
        let too_soon = elapsed_ms < min_interval_ms;

        let displacement = haversine_distance(
            last.latitude,
            last.longitude,
            candidate.latitude,
            candidate.longitude,
        );
        let too_close = displacement < self.min_distance_m;

        if too_soon && too_close {
            Decision::Reject(RejectReason::TooSoonAndTooClose)
        } else {
            Decision::Accept
        }
    }
}
