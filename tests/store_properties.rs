//! Point store integration tests against on-disk databases.
//!
//! Run with: `cargo test --test store_properties`

mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use chrono::{Duration, Utc};
use hat_location::{LocalStore, LocationError, LocationReading, PointId, RetentionConfig};
use tempfile::TempDir;

use common::{init_logging, reading_at, t0};

/// Helper: open a store in a fresh temp directory.
fn temp_store() -> (LocalStore, TempDir) {
    let tmp_dir = TempDir::new().expect("failed to create temp dir");
    let db_path = tmp_dir.path().join("points.db");
    let store = LocalStore::open(db_path.to_str().unwrap()).expect("failed to open store");
    (store, tmp_dir)
}

// ============================================================================
// Persistence
// ============================================================================

#[test]
fn test_points_survive_reopen() {
    init_logging();
    let tmp_dir = TempDir::new().unwrap();
    let db_path = tmp_dir.path().join("points.db");
    let path = db_path.to_str().unwrap();

    let (first, second) = {
        let store = LocalStore::open(path).unwrap();
        let first = store.insert(&reading_at(0, 0)).unwrap();
        let second = store.insert(&reading_at(60, 1)).unwrap();
        store.mark_synced(&[first], t0() + Duration::minutes(5)).unwrap();
        (first, second)
    };

    let store = LocalStore::open(path).unwrap();
    assert_eq!(store.count().unwrap(), 2);
    assert!(store.get(first).unwrap().unwrap().is_synced());

    let unsynced = store.query_unsynced().collect_all().unwrap();
    assert_eq!(unsynced.len(), 1);
    assert_eq!(unsynced[0].id, second);
    assert_eq!(unsynced[0].reading(), reading_at(60, 1));
}

#[test]
fn test_ids_unique_across_reopen_after_clear() {
    let tmp_dir = TempDir::new().unwrap();
    let db_path = tmp_dir.path().join("points.db");
    let path = db_path.to_str().unwrap();

    let old = {
        let store = LocalStore::open(path).unwrap();
        let id = store.insert(&reading_at(0, 0)).unwrap();
        store.clear().unwrap();
        id
    };

    let store = LocalStore::open(path).unwrap();
    let new = store.insert(&reading_at(0, 0)).unwrap();
    assert_ne!(old, new);
}

// ============================================================================
// Unsynced ordering and sync marking
// ============================================================================

#[test]
fn test_unsynced_is_oldest_first_regardless_of_insert_order() {
    let (store, _tmp) = temp_store();
    for (step, secs) in [300, 0, 120, 60, 240, 180].into_iter().enumerate() {
        store.insert(&reading_at(secs, step as u32)).unwrap();
    }

    let points = store.query_unsynced().with_page_size(2).collect_all().unwrap();
    assert_eq!(points.len(), 6);
    for pair in points.windows(2) {
        assert!(pair[0].captured_at <= pair[1].captured_at);
    }
}

#[test]
fn test_synced_points_leave_unsynced_query() {
    let (store, _tmp) = temp_store();
    let ids: Vec<PointId> = (0..5)
        .map(|i| store.insert(&reading_at(i * 60, i as u32)).unwrap())
        .collect();

    let marked = store.mark_synced(&ids[..3], t0() + Duration::hours(1)).unwrap();
    assert_eq!(marked, 3);
    assert_eq!(store.unsynced_count().unwrap(), 2);

    let remaining: Vec<PointId> = store
        .query_unsynced()
        .collect_all()
        .unwrap()
        .into_iter()
        .map(|p| p.id)
        .collect();
    assert_eq!(remaining, ids[3..].to_vec());
}

#[test]
fn test_mark_synced_twice_keeps_first_timestamp() {
    let (store, _tmp) = temp_store();
    let id = store.insert(&reading_at(0, 0)).unwrap();
    let first = t0() + Duration::hours(1);

    store.mark_synced(&[id], first).unwrap();
    store.mark_synced(&[id], first + Duration::days(1)).unwrap();

    let point = store.get(id).unwrap().unwrap();
    assert_eq!(point.synced_at, Some(first));
    assert!(point.synced_at.unwrap() >= point.captured_at);
}

#[test]
fn test_iteration_tolerates_marking_mid_scan() {
    let (store, _tmp) = temp_store();
    for i in 0..10 {
        store.insert(&reading_at(i * 60, i as u32)).unwrap();
    }

    let query = store.query_unsynced().with_page_size(3);
    let mut seen = 0;
    for point in query.iter() {
        let point = point.unwrap();
        store.mark_synced(&[point.id], Utc::now()).unwrap();
        seen += 1;
    }
    assert_eq!(seen, 10);
    assert_eq!(store.unsynced_count().unwrap(), 0);
}

// ============================================================================
// Purge
// ============================================================================

#[test]
fn test_purge_retention_window_over_ten_days() {
    init_logging();
    let (store, _tmp) = temp_store();
    let store = store.with_retention(RetentionConfig { retention_days: 7 });
    let now = Utc::now();

    // One point per day for days 0..=10, each an hour inside its day
    let ids: Vec<PointId> = (0..=10)
        .map(|day| {
            let captured_at = now - Duration::days(day) + Duration::hours(1);
            store
                .insert(&LocationReading::new(51.5, -0.12, 5.0, captured_at))
                .unwrap()
        })
        .collect();

    let purged = store.purge_expired().unwrap();
    assert_eq!(purged, 3);
    assert_eq!(store.count().unwrap(), 8);

    for (day, id) in ids.iter().enumerate() {
        let present = store.get(*id).unwrap().is_some();
        assert_eq!(present, day <= 7, "day {} presence", day);
    }
}

#[test]
fn test_purge_removes_synced_and_unsynced_alike() {
    let (store, _tmp) = temp_store();
    let synced = store.insert(&reading_at(0, 0)).unwrap();
    let unsynced = store.insert(&reading_at(60, 1)).unwrap();
    store.mark_synced(&[synced], t0() + Duration::minutes(2)).unwrap();

    // t0 is years in the past, so both are outside retention
    let purged = store.purge_older_than(t0() + Duration::minutes(1)).unwrap();
    assert_eq!(purged, 2);
    assert!(store.get(synced).unwrap().is_none());
    assert!(store.get(unsynced).unwrap().is_none());
}

#[test]
fn test_purge_is_idempotent() {
    let (store, _tmp) = temp_store();
    store.insert(&reading_at(0, 0)).unwrap();
    let cutoff = t0() + Duration::seconds(1);
    assert_eq!(store.purge_older_than(cutoff).unwrap(), 1);
    assert_eq!(store.purge_older_than(cutoff).unwrap(), 0);
}

// ============================================================================
// Concurrency and failures
// ============================================================================

#[test]
fn test_concurrent_inserts_get_unique_ids() {
    let (store, _tmp) = temp_store();
    let store = Arc::new(store);

    let handles: Vec<_> = (0..4)
        .map(|worker| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                (0..50)
                    .map(|i| store.insert(&reading_at(i * 60 + worker, i as u32)).unwrap())
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let ids: HashSet<PointId> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    assert_eq!(ids.len(), 200);
    assert_eq!(store.count().unwrap(), 200);
}

#[test]
fn test_missing_table_surfaces_storage_error() {
    let tmp_dir = TempDir::new().unwrap();
    let db_path = tmp_dir.path().join("points.db");
    let store = LocalStore::open(db_path.to_str().unwrap()).unwrap();

    let other = rusqlite::Connection::open(&db_path).unwrap();
    other.execute("DROP TABLE location_points", []).unwrap();

    let err = store.insert(&reading_at(0, 0)).unwrap_err();
    assert!(matches!(err, LocationError::StorageUnavailable { .. }));
    assert!(err.is_storage());
}
