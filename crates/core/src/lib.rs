//! Core types for the tidestore engine
//!
//! This crate holds everything the storage crates agree on but that carries
//! no I/O of its own:
//!
//! - Field types and the on-disk measurement schema record
//! - Null/non-null bitmap primitives
//! - The unified error taxonomy with wire status codes
//! - On-disk layout limits

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bitmap;
pub mod error;
pub mod field;
pub mod limits;

pub use bitmap::{bitmap_get, bitmap_get_bytes, bitmap_set, bitmap_set_bytes};
pub use error::{Error, Result, StatusCode};
pub use field::{Field, FieldType, FieldVec, SchemaEntry};
pub use limits::{
    INDEX_ENTRY_SIZE, MAX_FIELDS, SCHEMA_ENTRY_SIZE, SCHEMA_VERSION, TIMESTAMP_FILE_NAME_LEN,
};
