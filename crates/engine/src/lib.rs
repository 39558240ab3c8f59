//! The tidestore storage engine
//!
//! An embedded time-series engine serving one process against a single
//! on-disk root directory.  Writers append timestamped multi-field records
//! into a per-series write-ahead log; full WALs are committed into columnar
//! chunk files; readers merge the chunk store with the WAL tail.
//!
//! # On-disk layout
//!
//! ```text
//! <root>/
//! ├── config.txt                    chunk size, WAL bound, write throttle
//! ├── passwd / passwd.lock          credential store (managed externally)
//! ├── tmp/                          staging for atomic construction
//! └── databases/
//!     └── <database>/
//!         └── <measurement>/
//!             ├── schema            array of 128-byte field records
//!             ├── create_series_lock
//!             └── <series>/
//!                 ├── time_first    8 bytes, smallest live timestamp
//!                 ├── time_last     8 bytes, largest committed timestamp
//!                 ├── index         32-byte (time_ns, chunk name) records
//!                 ├── wal           row-oriented pending writes
//!                 ├── time_ns/      one packed-u64 timestamp file per chunk
//!                 ├── fields/<f>/   one value file per chunk (.gz if sealed)
//!                 └── bitmaps/<f>/  one null bitmap file per chunk
//! ```
//!
//! # Concurrency
//!
//! Advisory file locks over `time_first`/`time_last` give three lock
//! flavors: read (shared/shared), write (shared/exclusive) and total
//! (exclusive).  Acquisition order is always `time_first` then `time_last`.
//! There is no in-process shared state; the filesystem is the only
//! authority.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod count;
pub mod database;
pub mod delete;
pub mod index;
pub mod integral;
pub mod measurement;
pub mod root;
pub mod select;
pub mod series;
pub mod sum;
pub mod wal;
pub mod write;

pub use config::Configuration;
pub use count::{count_points, CountResult};
pub use database::Database;
pub use delete::delete_points;
pub use index::{IndexEntry, SeriesIndex};
pub use integral::IntegralOp;
pub use measurement::{create_measurement, Measurement};
pub use root::{create_root, StorageRoot};
pub use select::SelectOp;
pub use series::{
    open_or_create_and_lock_series, SeriesReadLock, SeriesTotalLock, SeriesWriteLock,
};
pub use sum::{Scalar, SumOp, SumWindow};
pub use wal::{commit_wal, WalQuery};
pub use write::write_wal;
