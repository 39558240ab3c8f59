//! Shared scaffolding for the engine integration tests.

#![allow(dead_code)]

use tempfile::TempDir;
use tidestore_core::{Field, FieldType};
use tidestore_engine::{
    create_root, Configuration, SelectOp, SeriesReadLock, StorageRoot, WalQuery,
};

/// Route engine tracing through the test harness, once per process.
fn init_tracing() {
    static TRACING: std::sync::Once = std::sync::Once::new();
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    });
}

/// Create a root with the given geometry and one database `db1`.
pub fn make_root(td: &TempDir, chunk_size: u64, wal_max_entries: usize) -> StorageRoot {
    init_tracing();
    let config = Configuration {
        chunk_size,
        wal_max_entries,
        write_throttle_ns: 0,
    };
    create_root(td.path(), &config).unwrap();
    let root = StorageRoot::open(td.path()).unwrap();
    root.create_database("db1").unwrap();
    root
}

/// Single-field schema: one u64 column named `v`.
pub fn u64_schema() -> Vec<Field> {
    vec![Field::new("v", FieldType::U64)]
}

/// Single-field schema: one u32 column named `v`.
pub fn u32_schema() -> Vec<Field> {
    vec![Field::new("v", FieldType::U32)]
}

fn pad8(buf: &mut Vec<u8>) {
    while buf.len() % 8 != 0 {
        buf.push(0);
    }
}

/// Build a write buffer for the single-u64-field schema.  `values[i]` is
/// ignored when `nulls[i]` is set.
pub fn build_u64_buffer(times: &[u64], values: &[u64], nulls: &[bool]) -> Vec<u8> {
    assert_eq!(times.len(), values.len());
    assert_eq!(times.len(), nulls.len());
    let n = times.len();

    let mut buf = Vec::new();
    for t in times {
        buf.extend_from_slice(&t.to_ne_bytes());
    }
    let mut bitmap = vec![0u64; (n + 63) / 64];
    for (i, null) in nulls.iter().enumerate() {
        if !null {
            bitmap[i / 64] |= 1 << (i % 64);
        }
    }
    for w in &bitmap {
        buf.extend_from_slice(&w.to_ne_bytes());
    }
    for v in values {
        buf.extend_from_slice(&v.to_ne_bytes());
    }
    buf
}

/// Build a write buffer for the single-u32-field schema.
pub fn build_u32_buffer(times: &[u64], values: &[u32]) -> Vec<u8> {
    assert_eq!(times.len(), values.len());
    let n = times.len();

    let mut buf = Vec::new();
    for t in times {
        buf.extend_from_slice(&t.to_ne_bytes());
    }
    let mut bitmap = vec![0u64; (n + 63) / 64];
    for i in 0..n {
        bitmap[i / 64] |= 1 << (i % 64);
    }
    for w in &bitmap {
        buf.extend_from_slice(&w.to_ne_bytes());
    }
    for v in values {
        buf.extend_from_slice(&v.to_ne_bytes());
    }
    pad8(&mut buf);
    buf
}

/// Evenly-strided timestamps.
pub fn stride_times(start: u64, stride: u64, count: usize) -> Vec<u64> {
    (0..count as u64).map(|i| start + i * stride).collect()
}

/// Read every live point of the single-u64-field series, chunk store then
/// WAL, as `(time_ns, value-or-null)`.
pub fn read_all_u64(lock: &SeriesReadLock<'_>) -> Vec<(u64, Option<u64>)> {
    let mut out = Vec::new();
    let mut op = SelectOp::first(lock, &[], 0, u64::MAX, u64::MAX).unwrap();
    while op.npoints() > 0 {
        for i in 0..op.npoints() {
            let v = (!op.is_field_null(0, i)).then(|| op.field_raw_u64(0, i));
            out.push((op.timestamp(i), v));
        }
        if op.is_last() {
            break;
        }
        op.advance().unwrap();
    }
    let wq = WalQuery::new(lock, 0, u64::MAX).unwrap();
    for e in wq.iter() {
        let v = (!e.is_field_null(0)).then(|| e.field_raw(0));
        out.push((e.time_ns(), v));
    }
    out
}

/// Number of whole entries sitting in the series WAL file on disk.
pub fn wal_entries_on_disk(td: &TempDir, series: &str, nfields: usize) -> usize {
    let path = td
        .path()
        .join("databases/db1/m1")
        .join(series)
        .join("wal");
    let len = std::fs::metadata(path).unwrap().len() as usize;
    len / (16 + 8 * nfields)
}

/// Path of a series directory under the conventional `db1/m1` namespace.
pub fn series_path(td: &TempDir, series: &str) -> std::path::PathBuf {
    td.path().join("databases/db1/m1").join(series)
}
