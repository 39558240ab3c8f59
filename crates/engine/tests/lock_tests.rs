//! Cross-thread lock discipline over real file locks.

mod common;

use common::*;
use std::sync::mpsc;
use std::time::Duration;
use tidestore_engine::{
    create_measurement, open_or_create_and_lock_series, Database, SeriesReadLock, SeriesTotalLock,
};

#[test]
fn test_second_writer_blocks_until_first_drops() {
    let td = tempfile::tempdir().unwrap();
    let root = make_root(&td, 128, 16);
    let db = Database::open(&root, "db1").unwrap();
    let m = create_measurement(&db, "m1", &u64_schema()).unwrap();
    drop(open_or_create_and_lock_series(&m, "s1").unwrap());

    let first = open_or_create_and_lock_series(&m, "s1").unwrap();
    let (tx, rx) = mpsc::channel();

    std::thread::scope(|scope| {
        let m_ref = &m;
        scope.spawn(move || {
            let _second = open_or_create_and_lock_series(m_ref, "s1").unwrap();
            tx.send(()).unwrap();
        });

        // The second writer is stuck behind the exclusive time_last lock.
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        drop(first);
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
    });
}

#[test]
fn test_readers_coexist_with_writer() {
    let td = tempfile::tempdir().unwrap();
    let root = make_root(&td, 128, 16);
    let db = Database::open(&root, "db1").unwrap();
    let m = create_measurement(&db, "m1", &u64_schema()).unwrap();
    drop(open_or_create_and_lock_series(&m, "s1").unwrap());

    let _writer = open_or_create_and_lock_series(&m, "s1").unwrap();
    let r1 = SeriesReadLock::open(&m, "s1").unwrap();
    let r2 = SeriesReadLock::open(&m, "s1").unwrap();
    assert_eq!(r1.time_first, r2.time_first);
}

#[test]
fn test_total_lock_blocks_and_unblocks_readers() {
    let td = tempfile::tempdir().unwrap();
    let root = make_root(&td, 128, 16);
    let db = Database::open(&root, "db1").unwrap();
    let m = create_measurement(&db, "m1", &u64_schema()).unwrap();
    drop(open_or_create_and_lock_series(&m, "s1").unwrap());

    let total = SeriesTotalLock::open(&m, "s1").unwrap();
    let (tx, rx) = mpsc::channel();

    std::thread::scope(|scope| {
        let m_ref = &m;
        scope.spawn(move || {
            let _reader = SeriesReadLock::open(m_ref, "s1").unwrap();
            tx.send(()).unwrap();
        });

        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        drop(total);
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
    });
}
