//! # tidestore
//!
//! An embedded time-series storage engine: one process, one root
//! directory, crash-consistent columnar chunks fed by a per-series
//! write-ahead log.
//!
//! # Quick start
//!
//! ```no_run
//! use tidestore::{
//!     count_points, create_measurement, create_root, open_or_create_and_lock_series,
//!     write_wal, Configuration, Database, Field, FieldType, StorageRoot,
//! };
//!
//! fn main() -> tidestore::Result<()> {
//!     let path = std::path::Path::new("./data");
//!     create_root(path, &Configuration::default())?;
//!     let root = StorageRoot::open(path)?;
//!     root.create_database("plant")?;
//!
//!     let db = Database::open(&root, "plant")?;
//!     let m = create_measurement(
//!         &db,
//!         "xtalx_data",
//!         &[
//!             Field::new("pressure_psi", FieldType::F64),
//!             Field::new("temp_c", FieldType::F32),
//!         ],
//!     )?;
//!
//!     // One point: timestamp, then per-field bitmap word + padded values.
//!     let mut buf = Vec::new();
//!     buf.extend_from_slice(&1_000_000_000u64.to_ne_bytes());
//!     buf.extend_from_slice(&1u64.to_ne_bytes());
//!     buf.extend_from_slice(&14.7f64.to_ne_bytes());
//!     buf.extend_from_slice(&1u64.to_ne_bytes());
//!     buf.extend_from_slice(&21.5f32.to_ne_bytes());
//!     buf.extend_from_slice(&[0u8; 4]);
//!
//!     let mut lock = open_or_create_and_lock_series(&m, "sensor-007")?;
//!     write_wal(&mut lock, 1, 0, &buf)?;
//!
//!     let count = count_points(&lock, 0, u64::MAX)?;
//!     assert_eq!(count.npoints, 1);
//!     Ok(())
//! }
//! ```
//!
//! The engine lives in three crates re-exported here: `tidestore-core`
//! (types, errors), `tidestore-fs` (descriptors, locks, mappings, sync
//! flavors) and `tidestore-engine` (the storage engine proper).

#![warn(missing_docs)]

pub use tidestore_core::{
    bitmap_get, bitmap_set, Error, Field, FieldType, Result, SchemaEntry, StatusCode, MAX_FIELDS,
};
pub use tidestore_engine::{
    commit_wal, count_points, create_measurement, create_root, delete_points,
    open_or_create_and_lock_series, write_wal, Configuration, CountResult, Database, IndexEntry,
    IntegralOp, Measurement, SelectOp, SeriesIndex, SeriesReadLock, SeriesTotalLock,
    SeriesWriteLock, StorageRoot, SumOp, SumWindow, WalQuery,
};
