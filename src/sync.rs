//! Background-fetch upload driver.
//!
//! One pass per background-fetch wake-up:
//! - Hold a platform background-task token for the whole pass
//! - Upload unsynced points oldest first, in chunks
//! - Mark each uploaded chunk synced; stop at the first failed chunk
//! - Give up when the pass deadline expires
//!
//! There is no retry inside a pass. Whatever is left unsynced goes out on the
//! next wake-up.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use log::{debug, info, warn};

use crate::config::SyncConfig;
use crate::error::{LocationError, Result};
use crate::store::LocalStore;
use crate::{LocationPoint, PointId};

/// Transport for a batch of points (the HAT HTTP client lives outside this crate).
#[async_trait]
pub trait PointUploader: Send + Sync {
    async fn upload(&self, points: &[LocationPoint]) -> Result<()>;
}

/// Platform token identifier (UIBackgroundTaskIdentifier on iOS).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BackgroundTaskId(pub u64);

/// Platform background-task API.
pub trait BackgroundTaskApi: Send + Sync {
    /// Ask the platform for extra execution time.
    fn begin(&self, name: &str) -> Result<BackgroundTaskId>;
    /// Hand the time back. Must be called exactly once per successful `begin`.
    fn end(&self, id: BackgroundTaskId);
}

/// Holds a background-task token and ends it when dropped.
pub struct BackgroundTaskGuard {
    api: Arc<dyn BackgroundTaskApi>,
    id: BackgroundTaskId,
}

impl BackgroundTaskGuard {
    pub fn begin(api: Arc<dyn BackgroundTaskApi>, name: &str) -> Result<Self> {
        let id = api.begin(name)?;
        debug!("[SyncDriver] Began background task {} ({})", id.0, name);
        Ok(Self { api, id })
    }

    pub fn id(&self) -> BackgroundTaskId {
        self.id
    }
}

impl Drop for BackgroundTaskGuard {
    fn drop(&mut self) {
        self.api.end(self.id);
        debug!("[SyncDriver] Ended background task {}", self.id.0);
    }
}

/// Result of a background-fetch pass, mirroring the platform's fetch result.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    NewData { uploaded: usize },
    NoData,
    Failed { uploaded: usize, error: LocationError },
}

/// Uploads unsynced points when the platform grants background time.
pub struct SyncDriver {
    store: Arc<LocalStore>,
    uploader: Arc<dyn PointUploader>,
    background: Arc<dyn BackgroundTaskApi>,
    config: SyncConfig,
}

impl SyncDriver {
    pub fn new(
        store: Arc<LocalStore>,
        uploader: Arc<dyn PointUploader>,
        background: Arc<dyn BackgroundTaskApi>,
        config: SyncConfig,
    ) -> Self {
        Self {
            store,
            uploader,
            background,
            config,
        }
    }

    /// Run one upload pass under a background-task token and the configured deadline.
    pub async fn perform_background_fetch(&self) -> FetchOutcome {
        let _token = match BackgroundTaskGuard::begin(self.background.clone(), "hat-location-sync")
        {
            Ok(token) => token,
            Err(error) => {
                warn!("[SyncDriver] Could not acquire background time: {}", error);
                return FetchOutcome::Failed { uploaded: 0, error };
            }
        };

        let uploaded = AtomicUsize::new(0);
        let deadline = self.config.upload_timeout();
        let result = tokio::time::timeout(deadline, self.upload_pending(&uploaded)).await;
        let uploaded = uploaded.load(Ordering::SeqCst);

        match result {
            Ok(Ok(())) if uploaded == 0 => {
                debug!("[SyncDriver] Nothing to upload");
                FetchOutcome::NoData
            }
            Ok(Ok(())) => {
                info!("[SyncDriver] Uploaded {} points", uploaded);
                FetchOutcome::NewData { uploaded }
            }
            Ok(Err(error)) => {
                warn!(
                    "[SyncDriver] Upload pass failed after {} points: {}",
                    uploaded, error
                );
                FetchOutcome::Failed { uploaded, error }
            }
            Err(_) => {
                warn!(
                    "[SyncDriver] Upload pass timed out after {:?} ({} points uploaded)",
                    deadline, uploaded
                );
                FetchOutcome::Failed {
                    uploaded,
                    error: LocationError::SyncFailed {
                        message: format!("timed out after {}s", deadline.as_secs()),
                    },
                }
            }
        }
    }

    /// Hand a pass off to the tokio runtime so the caller's thread is not held.
    pub fn spawn_background_fetch(self: &Arc<Self>) -> tokio::task::JoinHandle<FetchOutcome> {
        let driver = Arc::clone(self);
        tokio::spawn(async move { driver.perform_background_fetch().await })
    }

    async fn upload_pending(&self, uploaded: &AtomicUsize) -> Result<()> {
        let chunk_size = self.config.max_points_per_upload.max(1) as usize;
        let query = self.store.query_unsynced();
        let mut points = query.iter();

        loop {
            let chunk = points
                .by_ref()
                .take(chunk_size)
                .collect::<Result<Vec<LocationPoint>>>()?;
            if chunk.is_empty() {
                return Ok(());
            }

            self.uploader.upload(&chunk).await?;

            let ids: Vec<PointId> = chunk.iter().map(|p| p.id).collect();
            self.store.mark_synced(&ids, Utc::now())?;
            uploaded.fetch_add(chunk.len(), Ordering::SeqCst);
            debug!("[SyncDriver] Uploaded chunk of {} points", chunk.len());
        }
    }
}
