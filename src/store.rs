//! # Local Point Store
//!
//! Durable, append-only log of accepted location readings backed by SQLite.
//!
//! - Points are never overwritten; the only mutation is the one-time
//!   `synced_at` transition performed by the sync driver.
//! - Old points are purged by age once per foreground transition.
//! - Unsynced points are read back oldest first, in pages, so the upload
//!   order matches capture order.
//!
//! All access goes through a single coarse lock around the connection.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use log::{debug, info};
use rusqlite::{params, Connection, Row};

use crate::config::RetentionConfig;
use crate::error::{LocationError, Result};
use crate::migrations;
use crate::{LocationPoint, LocationReading, PointId};

/// Rows fetched per round trip while iterating unsynced points.
const UNSYNCED_PAGE_SIZE: usize = 256;

const POINT_COLUMNS: &str = "id, latitude, longitude, accuracy, captured_at, synced_at";

/// SQLite-backed store of location points.
pub struct LocalStore {
    /// Database connection, serialized behind one lock
    db: Mutex<Connection>,

    /// Database path (":memory:" for in-memory stores)
    db_path: String,

    /// Retention window used by purges
    retention: RetentionConfig,
}

impl LocalStore {
    // ========================================================================
    // Initialization
    // ========================================================================

    /// Open (or create) a store at the given database path.
    pub fn open(db_path: &str) -> Result<Self> {
        let mut db = Connection::open(db_path)?;
        migrations::migrate_to_latest(&mut db)?;
        info!("[LocalStore] Opened {}", db_path);

        Ok(Self {
            db: Mutex::new(db),
            db_path: db_path.to_string(),
            retention: RetentionConfig::default(),
        })
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory() -> Result<Self> {
        Self::open(":memory:")
    }

    /// Replace the retention window used by purges.
    pub fn with_retention(mut self, retention: RetentionConfig) -> Self {
        self.retention = retention;
        self
    }

    pub fn path(&self) -> &str {
        &self.db_path
    }

    pub fn retention(&self) -> &RetentionConfig {
        &self.retention
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        Ok(self.db.lock()?)
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Append a reading. Never overwrites an existing point.
    pub fn insert(&self, reading: &LocationReading) -> Result<PointId> {
        if !reading.is_valid() {
            return Err(LocationError::invalid_point(format!(
                "lat={} lng={} accuracy={}",
                reading.latitude, reading.longitude, reading.accuracy
            )));
        }

        let captured_at = to_nanos(reading.captured_at)?;

        let db = self.conn()?;
        db.execute(
            "INSERT INTO location_points (latitude, longitude, accuracy, captured_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![reading.latitude, reading.longitude, reading.accuracy, captured_at],
        )?;
        let id = PointId(db.last_insert_rowid());
        debug!("[LocalStore] Inserted point {}", id.0);
        Ok(id)
    }

    /// Delete every point captured at or before `cutoff`, synced or not.
    ///
    /// Unsynced points still inside the retention window (measured from now)
    /// are kept even if `cutoff` would cover them.
    pub fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let retention_cutoff = Utc::now() - self.retention.window();

        let deleted = self.conn()?.execute(
            "DELETE FROM location_points
             WHERE captured_at <= ?1
               AND (synced_at IS NOT NULL OR captured_at <= ?2)",
            params![clamped_nanos(cutoff), clamped_nanos(retention_cutoff)],
        )?;

        if deleted > 0 {
            info!(
                "[LocalStore] Purged {} points captured at or before {}",
                deleted, cutoff
            );
        }
        Ok(deleted)
    }

    /// Purge points older than the retention window.
    pub fn purge_expired(&self) -> Result<usize> {
        self.purge_older_than(Utc::now() - self.retention.window())
    }

    /// Record that the given points were uploaded at `at`.
    ///
    /// Points that are already synced (or unknown) are left untouched, so
    /// repeating a call is a no-op. Returns the number of points newly marked.
    pub fn mark_synced(&self, ids: &[PointId], at: DateTime<Utc>) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let at = to_nanos(at)?;

        let mut db = self.conn()?;
        let tx = db.transaction()?;
        let mut marked = 0;
        {
            // synced_at never precedes captured_at
            let mut stmt = tx.prepare(
                "UPDATE location_points SET synced_at = MAX(?1, captured_at)
                 WHERE id = ?2 AND synced_at IS NULL",
            )?;
            for id in ids {
                marked += stmt.execute(params![at, id.0])?;
            }
        }
        tx.commit()?;

        debug!(
            "[LocalStore] Marked {} of {} points synced",
            marked,
            ids.len()
        );
        Ok(marked)
    }

    /// Delete every point (logout).
    pub fn clear(&self) -> Result<usize> {
        let deleted = self.conn()?.execute("DELETE FROM location_points", [])?;
        info!("[LocalStore] Cleared {} points", deleted);
        Ok(deleted)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Unsynced points, oldest first.
    ///
    /// The returned value is a restartable query: every call to
    /// [`UnsyncedPoints::iter`] starts a fresh, lazily paged scan.
    pub fn query_unsynced(&self) -> UnsyncedPoints<'_> {
        UnsyncedPoints {
            store: self,
            page_size: UNSYNCED_PAGE_SIZE,
        }
    }

    /// Points captured within `[from, to]`, oldest first.
    pub fn query_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<LocationPoint>> {
        let db = self.conn()?;
        let mut stmt = db.prepare(&format!(
            "SELECT {} FROM location_points
             WHERE captured_at >= ?1 AND captured_at <= ?2
             ORDER BY captured_at ASC, id ASC",
            POINT_COLUMNS
        ))?;
        let points = stmt
            .query_map(
                params![clamped_nanos(from), clamped_nanos(to)],
                point_from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(points)
    }

    /// Fetch a single point.
    pub fn get(&self, id: PointId) -> Result<Option<LocationPoint>> {
        let db = self.conn()?;
        let mut stmt = db.prepare(&format!(
            "SELECT {} FROM location_points WHERE id = ?1",
            POINT_COLUMNS
        ))?;
        let mut rows = stmt.query_map(params![id.0], point_from_row)?;
        let point = rows.next().transpose()?;
        Ok(point)
    }

    /// Total number of stored points.
    pub fn count(&self) -> Result<usize> {
        let count: i64 = self.conn()?.query_row(
            "SELECT COUNT(*) FROM location_points",
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Number of points waiting for upload.
    pub fn unsynced_count(&self) -> Result<usize> {
        let count: i64 = self.conn()?.query_row(
            "SELECT COUNT(*) FROM location_points WHERE synced_at IS NULL",
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// One page of unsynced points strictly after the `(captured_at, id)` cursor.
    fn unsynced_page(&self, after: (i64, i64), limit: usize) -> Result<Vec<LocationPoint>> {
        let db = self.conn()?;
        let mut stmt = db.prepare_cached(&format!(
            "SELECT {} FROM location_points
             WHERE synced_at IS NULL
               AND (captured_at > ?1 OR (captured_at = ?1 AND id > ?2))
             ORDER BY captured_at ASC, id ASC
             LIMIT ?3",
            POINT_COLUMNS
        ))?;
        let points = stmt
            .query_map(params![after.0, after.1, limit as i64], point_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(points)
    }
}

/// Timestamps are stored as Unix nanoseconds, which covers 1677 to 2262.
fn to_nanos(t: DateTime<Utc>) -> Result<i64> {
    t.timestamp_nanos_opt()
        .ok_or_else(|| LocationError::invalid_point(format!("timestamp {} out of range", t)))
}

/// Query bounds outside the storable range saturate.
fn clamped_nanos(t: DateTime<Utc>) -> i64 {
    t.timestamp_nanos_opt()
        .unwrap_or(if t.timestamp() < 0 { i64::MIN } else { i64::MAX })
}

fn point_from_row(row: &Row<'_>) -> rusqlite::Result<LocationPoint> {
    let synced_at: Option<i64> = row.get(5)?;
    Ok(LocationPoint {
        id: PointId(row.get(0)?),
        latitude: row.get(1)?,
        longitude: row.get(2)?,
        accuracy: row.get(3)?,
        captured_at: DateTime::from_timestamp_nanos(row.get(4)?),
        synced_at: synced_at.map(DateTime::from_timestamp_nanos),
    })
}

// ============================================================================
// Unsynced Query
// ============================================================================

/// Restartable query over unsynced points.
pub struct UnsyncedPoints<'s> {
    store: &'s LocalStore,
    page_size: usize,
}

impl<'s> UnsyncedPoints<'s> {
    /// Override the page size (mainly for tests).
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Start a new scan from the oldest unsynced point.
    pub fn iter(&self) -> UnsyncedIter<'s> {
        UnsyncedIter {
            store: self.store,
            page_size: self.page_size,
            cursor: (i64::MIN, i64::MIN),
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    /// Drain a fresh scan into a vector.
    pub fn collect_all(&self) -> Result<Vec<LocationPoint>> {
        self.iter().collect()
    }
}

impl<'s> IntoIterator for &UnsyncedPoints<'s> {
    type Item = Result<LocationPoint>;
    type IntoIter = UnsyncedIter<'s>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Lazy, paged scan of unsynced points.
///
/// Yields an error at most once; the scan ends after it.
pub struct UnsyncedIter<'s> {
    store: &'s LocalStore,
    page_size: usize,
    cursor: (i64, i64),
    buffer: VecDeque<LocationPoint>,
    exhausted: bool,
}

impl Iterator for UnsyncedIter<'_> {
    type Item = Result<LocationPoint>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            match self.store.unsynced_page(self.cursor, self.page_size) {
                Ok(page) => {
                    if page.len() < self.page_size {
                        self.exhausted = true;
                    }
                    self.buffer.extend(page);
                }
                Err(e) => {
                    self.exhausted = true;
                    return Some(Err(e));
                }
            }
        }

        let point = self.buffer.pop_front()?;
        self.cursor = (clamped_nanos(point.captured_at), point.id.0);
        Some(Ok(point))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn reading(secs: i64) -> LocationReading {
        LocationReading::new(
            51.5074 + secs as f64 * 0.0001,
            -0.1278,
            5.0,
            t0() + Duration::seconds(secs),
        )
    }

    #[test]
    fn test_create_store() {
        let store = LocalStore::in_memory().unwrap();
        assert_eq!(store.count().unwrap(), 0);
        assert_eq!(store.path(), ":memory:");
    }

    #[test]
    fn test_insert_assigns_distinct_ids() {
        let store = LocalStore::in_memory().unwrap();
        let a = store.insert(&reading(0)).unwrap();
        let b = store.insert(&reading(0)).unwrap();
        assert_ne!(a, b);
        assert_eq!(store.count().unwrap(), 2);

        let point = store.get(a).unwrap().unwrap();
        assert_eq!(point.captured_at, t0());
        assert_eq!(point.synced_at, None);
    }

    #[test]
    fn test_insert_rejects_invalid() {
        let store = LocalStore::in_memory().unwrap();
        let mut bad = reading(0);
        bad.latitude = f64::NAN;
        assert!(matches!(
            store.insert(&bad),
            Err(LocationError::InvalidPoint { .. })
        ));
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_query_unsynced_orders_by_capture_time() {
        let store = LocalStore::in_memory().unwrap();
        for secs in [30, 10, 20, 0] {
            store.insert(&reading(secs)).unwrap();
        }

        let times: Vec<_> = store
            .query_unsynced()
            .collect_all()
            .unwrap()
            .iter()
            .map(|p| p.captured_at)
            .collect();
        let mut sorted = times.clone();
        sorted.sort();
        assert_eq!(times, sorted);
        assert_eq!(times.len(), 4);
    }

    #[test]
    fn test_query_unsynced_pages_and_restarts() {
        let store = LocalStore::in_memory().unwrap();
        for secs in 0..10 {
            store.insert(&reading(secs)).unwrap();
        }
        // Two points share a timestamp to exercise the id tiebreak
        store.insert(&reading(5)).unwrap();

        let query = store.query_unsynced().with_page_size(3);
        let first: Vec<_> = query.iter().map(|p| p.unwrap().id).collect();
        let second: Vec<_> = (&query).into_iter().map(|p| p.unwrap().id).collect();
        assert_eq!(first.len(), 11);
        assert_eq!(first, second);
    }

    #[test]
    fn test_mark_synced_is_idempotent() {
        let store = LocalStore::in_memory().unwrap();
        let a = store.insert(&reading(0)).unwrap();
        let b = store.insert(&reading(1)).unwrap();
        let at = t0() + Duration::hours(1);

        assert_eq!(store.mark_synced(&[a], at).unwrap(), 1);
        assert_eq!(store.mark_synced(&[a], at + Duration::hours(1)).unwrap(), 0);

        let point = store.get(a).unwrap().unwrap();
        assert_eq!(point.synced_at, Some(at));

        let unsynced = store.query_unsynced().collect_all().unwrap();
        assert_eq!(unsynced.len(), 1);
        assert_eq!(unsynced[0].id, b);
    }

    #[test]
    fn test_mark_synced_never_precedes_capture() {
        let store = LocalStore::in_memory().unwrap();
        let id = store.insert(&reading(60)).unwrap();
        store.mark_synced(&[id], t0()).unwrap();

        let point = store.get(id).unwrap().unwrap();
        assert_eq!(point.synced_at, Some(point.captured_at));
    }

    #[test]
    fn test_mark_synced_ignores_unknown_ids() {
        let store = LocalStore::in_memory().unwrap();
        assert_eq!(store.mark_synced(&[PointId(42)], t0()).unwrap(), 0);
        assert_eq!(store.mark_synced(&[], t0()).unwrap(), 0);
    }

    #[test]
    fn test_purge_respects_cutoff_and_sync_state() {
        let store = LocalStore::in_memory().unwrap();
        // Far in the past, well outside any retention window
        let old_synced = store.insert(&reading(0)).unwrap();
        store.insert(&reading(10)).unwrap();
        let kept = store.insert(&reading(20)).unwrap();
        store.mark_synced(&[old_synced], t0() + Duration::seconds(30)).unwrap();

        let deleted = store.purge_older_than(t0() + Duration::seconds(10)).unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(store.count().unwrap(), 1);
        assert!(store.get(kept).unwrap().is_some());
    }

    #[test]
    fn test_purge_keeps_unsynced_inside_retention() {
        let store = LocalStore::in_memory().unwrap();
        let now = Utc::now();
        let recent = store
            .insert(&LocationReading::new(51.5, -0.12, 5.0, now - Duration::days(1)))
            .unwrap();
        let recent_synced = store
            .insert(&LocationReading::new(51.5, -0.12, 5.0, now - Duration::days(1)))
            .unwrap();
        store.mark_synced(&[recent_synced], now).unwrap();

        // Asking to purge everything only removes the synced point
        let deleted = store.purge_older_than(now).unwrap();
        assert_eq!(deleted, 1);
        assert!(store.get(recent).unwrap().is_some());
        assert!(store.get(recent_synced).unwrap().is_none());
    }

    #[test]
    fn test_purge_cutoff_keeps_sub_millisecond_later_point() {
        let store = LocalStore::in_memory().unwrap();
        let captured_at = t0() + Duration::microseconds(600);
        let id = store
            .insert(&LocationReading::new(51.5, -0.12, 5.0, captured_at))
            .unwrap();

        let deleted = store
            .purge_older_than(t0() + Duration::microseconds(100))
            .unwrap();
        assert_eq!(deleted, 0);

        let deleted = store.purge_older_than(captured_at).unwrap();
        assert_eq!(deleted, 1);
        assert!(store.get(id).unwrap().is_none());
    }

    #[test]
    fn test_timestamps_keep_full_precision() {
        let store = LocalStore::in_memory().unwrap();
        let captured_at = t0() + Duration::nanoseconds(123_456_789);
        let id = store
            .insert(&LocationReading::new(51.5, -0.12, 5.0, captured_at))
            .unwrap();
        let synced_at = captured_at + Duration::nanoseconds(1);
        store.mark_synced(&[id], synced_at).unwrap();

        let point = store.get(id).unwrap().unwrap();
        assert_eq!(point.captured_at, captured_at);
        assert_eq!(point.synced_at, Some(synced_at));
    }

    #[test]
    fn test_mark_synced_rejects_unrepresentable_time() {
        let store = LocalStore::in_memory().unwrap();
        let id = store.insert(&reading(0)).unwrap();
        let far_future = DateTime::from_timestamp(20_000_000_000, 0).unwrap();
        assert!(matches!(
            store.mark_synced(&[id], far_future),
            Err(LocationError::InvalidPoint { .. })
        ));
        assert_eq!(store.unsynced_count().unwrap(), 1);
    }

    #[test]
    fn test_query_range() {
        let store = LocalStore::in_memory().unwrap();
        for secs in 0..5 {
            store.insert(&reading(secs * 10)).unwrap();
        }
        let points = store
            .query_range(t0() + Duration::seconds(10), t0() + Duration::seconds(30))
            .unwrap();
        assert_eq!(points.len(), 3);
        assert_eq!(points[0].captured_at, t0() + Duration::seconds(10));
    }

    #[test]
    fn test_clear() {
        let store = LocalStore::in_memory().unwrap();
        store.insert(&reading(0)).unwrap();
        store.insert(&reading(1)).unwrap();
        assert_eq!(store.clear().unwrap(), 2);
        assert_eq!(store.count().unwrap(), 0);
        assert_eq!(store.unsynced_count().unwrap(), 0);
    }

    #[test]
    fn test_open_in_missing_directory_fails() {
        let result = LocalStore::open("/nonexistent-dir/hat/points.db");
        assert!(matches!(
            result,
            Err(LocationError::StorageUnavailable { .. })
        ));
    }
}
