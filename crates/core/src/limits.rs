//! On-disk layout limits.

/// Maximum number of fields in a measurement.  Partly fixed by the width of
/// the per-entry WAL bitmap and the index byte in a schema record, so raising
/// it past 64 requires a format change; lowering it would be safe.
pub const MAX_FIELDS: usize = 64;

/// Size in bytes of one schema record in a measurement's `schema` file.
pub const SCHEMA_ENTRY_SIZE: usize = 128;

/// Current schema record format version.
pub const SCHEMA_VERSION: u8 = 1;

/// Size in bytes of one record in a series `index` file.
pub const INDEX_ENTRY_SIZE: usize = 32;

/// Width of the chunk-name field in an index record.  Chunk files are named
/// by the decimal first timestamp, which fits in 20 digits plus a NUL.
pub const TIMESTAMP_FILE_NAME_LEN: usize = 24;
