//! App lifecycle glue.
//!
//! The host app owns one [`AppLifecycle`] and forwards its delegate callbacks
//! here. Nothing in this crate is reached through a global.

use std::sync::Arc;

use log::{info, warn};

use crate::error::Result;
use crate::store::LocalStore;
use crate::tracker::LocationTracker;

/// What the platform told us about this launch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LaunchOptions {
    /// The process was relaunched in the background to deliver a location event.
    pub location_relaunch: bool,
}

/// Routes launch, foreground and logout transitions to the tracker and store.
pub struct AppLifecycle {
    tracker: Arc<LocationTracker>,
    store: Arc<LocalStore>,
}

impl AppLifecycle {
    pub fn new(tracker: Arc<LocationTracker>, store: Arc<LocalStore>) -> Self {
        Self { tracker, store }
    }

    pub fn tracker(&self) -> &Arc<LocationTracker> {
        &self.tracker
    }

    pub fn store(&self) -> &Arc<LocalStore> {
        &self.store
    }

    /// Process start. A location relaunch resumes updates without prompting.
    pub fn did_finish_launching(&self, options: LaunchOptions) -> Result<()> {
        if options.location_relaunch {
            info!("[AppLifecycle] Relaunched for a location event");
            self.tracker.resume_location_services()?;
        }
        Ok(())
    }

    /// Foreground transition: purge points past the retention window.
    pub fn will_enter_foreground(&self) -> Result<usize> {
        let purged = self.store.purge_expired().inspect_err(|e| {
            warn!("[AppLifecycle] Purge on foreground failed: {}", e);
        })?;
        info!("[AppLifecycle] Entered foreground, purged {} points", purged);
        Ok(purged)
    }

    /// Explicit logout: no monitoring or points survive into the next account.
    pub fn did_logout(&self) -> Result<()> {
        self.tracker.reset();
        self.store.clear()?;
        info!("[AppLifecycle] Logged out, tracker reset and store cleared");
        Ok(())
    }
}
