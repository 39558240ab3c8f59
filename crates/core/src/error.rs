//! Error types for the tidestore engine
//!
//! One unified `Error` enum covers every failure the engine can report.
//! Each variant maps onto a small negative integer [`StatusCode`] used as
//! the wire status by external frontends.
//!
//! Categories:
//!
//! - **Input/validation**: bad names, bad write buffers, bad configuration
//! - **Not found**: database / measurement / series / field
//! - **Conflict**: measurement exists with a different schema
//! - **Protocol**: advancing a select past its last batch
//! - **Overwrite mismatch**: replayed writes that differ from stored bytes
//! - **Corruption**: on-disk state violating a series invariant
//! - **I/O**: operating-system failures, wrapping the underlying error

use std::io;
use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Wire status codes, one per error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
#[allow(missing_docs)]
pub enum StatusCode {
    InitIoError = -1,
    CreateDatabaseIoError = -2,
    CreateMeasurementIoError = -3,
    InvalidMeasurement = -4,
    InvalidSeries = -5,
    CorruptSchemaFile = -6,
    NoSuchField = -7,
    EndOfSelect = -8,
    IncorrectWriteChunkLen = -9,
    OutOfOrderTimestamps = -10,
    TimestampOverwriteMismatch = -11,
    FieldOverwriteMismatch = -12,
    BitmapOverwriteMismatch = -13,
    TailFileTooBig = -14,
    TailFileInvalidSize = -15,
    InvalidTimeLast = -16,
    NoSuchSeries = -17,
    NoSuchDatabase = -18,
    NoSuchMeasurement = -19,
    MeasurementExists = -20,
    UserExists = -21,
    NoSuchUser = -22,
    NotARoot = -23,
    DuplicateField = -24,
    TooManyFields = -25,
    InvalidConfigFile = -26,
    InvalidChunkSize = -27,
}

/// Error type for the tidestore engine.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error while creating a root.
    #[error("I/O error initializing root: {0}")]
    InitIo(#[source] io::Error),

    /// I/O error while creating a database.
    #[error("I/O error creating database: {0}")]
    CreateDatabaseIo(#[source] io::Error),

    /// I/O error while creating a measurement.
    #[error("I/O error creating measurement: {0}")]
    CreateMeasurementIo(#[source] io::Error),

    /// The measurement name is empty or contains a forbidden character.
    #[error("invalid measurement name")]
    InvalidMeasurement,

    /// The series name is empty or contains a forbidden character.
    #[error("invalid series name")]
    InvalidSeries,

    /// The measurement's schema file is malformed.
    #[error("corrupt schema file")]
    CorruptSchemaFile,

    /// A queried field is not part of the measurement's schema.
    #[error("no such field")]
    NoSuchField,

    /// Tried to advance a select operator past its last batch.
    #[error("end of select")]
    EndOfSelect,

    /// The write buffer length does not match the schema and point count.
    #[error("incorrect write chunk length: expected {expected}, got {actual}")]
    IncorrectWriteChunkLen {
        /// Length implied by the schema, `npoints` and `bitmap_offset`.
        expected: usize,
        /// Length the caller actually supplied.
        actual: usize,
    },

    /// Write timestamps were not strictly increasing.
    #[error("out of order timestamps")]
    OutOfOrderTimestamps,

    /// An overlapping rewrite supplied different timestamps.
    #[error("timestamp overwrite mismatch")]
    TimestampOverwriteMismatch,

    /// An overlapping rewrite supplied different field bytes.
    #[error("field overwrite mismatch in {field}")]
    FieldOverwriteMismatch {
        /// Field whose payload differed.
        field: String,
    },

    /// An overlapping rewrite supplied different null bits.
    #[error("bitmap overwrite mismatch in {field}")]
    BitmapOverwriteMismatch {
        /// Field whose null bits differed.
        field: String,
    },

    /// A tail timestamp file is larger than the configured chunk size.
    #[error("tail file too big: {size} bytes")]
    TailFileTooBig {
        /// Observed file size.
        size: u64,
    },

    /// A tail timestamp file length is not a multiple of 8.
    #[error("tail file has invalid size: {size} bytes")]
    TailFileInvalidSize {
        /// Observed file size.
        size: u64,
    },

    /// The stored `time_last` does not appear in the tail timestamp file.
    #[error("time_last {time_last} not found near tail timestamp {tail}")]
    InvalidTimeLast {
        /// Closest timestamp found in the tail chunk.
        tail: u64,
        /// Value stored in the `time_last` file.
        time_last: u64,
    },

    /// The series does not exist.
    #[error("no such series")]
    NoSuchSeries,

    /// The database does not exist.
    #[error("no such database")]
    NoSuchDatabase,

    /// The measurement does not exist.
    #[error("no such measurement")]
    NoSuchMeasurement,

    /// The measurement exists with a different schema.
    #[error("measurement already exists with a different schema")]
    MeasurementExists,

    /// The user already exists in the passwd file.
    #[error("user already exists")]
    UserExists,

    /// The user does not exist in the passwd file.
    #[error("no such user")]
    NoSuchUser,

    /// The path does not hold the expected root layout.
    #[error("not a tidestore root")]
    NotARoot,

    /// A schema or query field list names the same field twice.
    #[error("duplicate field: {field}")]
    DuplicateField {
        /// The repeated field name.
        field: String,
    },

    /// A schema defines more fields than the format supports.
    #[error("too many fields: {count}")]
    TooManyFields {
        /// Number of fields requested.
        count: usize,
    },

    /// The config file is malformed or contains an unknown key.
    #[error("invalid config file: {reason}")]
    InvalidConfigFile {
        /// What was wrong with it.
        reason: String,
    },

    /// The configured chunk size is not an acceptable power of two.
    #[error("invalid chunk size: {size}")]
    InvalidChunkSize {
        /// The rejected value.
        size: u64,
    },

    /// Any other operating-system failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// The wire status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::InitIo(_) => StatusCode::InitIoError,
            Error::CreateDatabaseIo(_) => StatusCode::CreateDatabaseIoError,
            Error::CreateMeasurementIo(_) => StatusCode::CreateMeasurementIoError,
            Error::InvalidMeasurement => StatusCode::InvalidMeasurement,
            Error::InvalidSeries => StatusCode::InvalidSeries,
            Error::CorruptSchemaFile => StatusCode::CorruptSchemaFile,
            Error::NoSuchField => StatusCode::NoSuchField,
            Error::EndOfSelect => StatusCode::EndOfSelect,
            Error::IncorrectWriteChunkLen { .. } => StatusCode::IncorrectWriteChunkLen,
            Error::OutOfOrderTimestamps => StatusCode::OutOfOrderTimestamps,
            Error::TimestampOverwriteMismatch => StatusCode::TimestampOverwriteMismatch,
            Error::FieldOverwriteMismatch { .. } => StatusCode::FieldOverwriteMismatch,
            Error::BitmapOverwriteMismatch { .. } => StatusCode::BitmapOverwriteMismatch,
            Error::TailFileTooBig { .. } => StatusCode::TailFileTooBig,
            Error::TailFileInvalidSize { .. } => StatusCode::TailFileInvalidSize,
            Error::InvalidTimeLast { .. } => StatusCode::InvalidTimeLast,
            Error::NoSuchSeries => StatusCode::NoSuchSeries,
            Error::NoSuchDatabase => StatusCode::NoSuchDatabase,
            Error::NoSuchMeasurement => StatusCode::NoSuchMeasurement,
            Error::MeasurementExists => StatusCode::MeasurementExists,
            Error::UserExists => StatusCode::UserExists,
            Error::NoSuchUser => StatusCode::NoSuchUser,
            Error::NotARoot => StatusCode::NotARoot,
            Error::DuplicateField { .. } => StatusCode::DuplicateField,
            Error::TooManyFields { .. } => StatusCode::TooManyFields,
            Error::InvalidConfigFile { .. } => StatusCode::InvalidConfigFile,
            Error::InvalidChunkSize { .. } => StatusCode::InvalidChunkSize,
            Error::Io(_) => StatusCode::InitIoError,
        }
    }

    /// True for the overwrite-mismatch family, which clients treat as a
    /// replay-divergence signal rather than a transient failure.
    pub fn is_overwrite_mismatch(&self) -> bool {
        matches!(
            self,
            Error::TimestampOverwriteMismatch
                | Error::FieldOverwriteMismatch { .. }
                | Error::BitmapOverwriteMismatch { .. }
        )
    }

    /// True for the corruption family: on-disk state violating an invariant.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Error::TailFileTooBig { .. }
                | Error::TailFileInvalidSize { .. }
                | Error::InvalidTimeLast { .. }
                | Error::CorruptSchemaFile
        )
    }

    /// True when the underlying cause is a missing file or directory.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NoSuchSeries
            | Error::NoSuchDatabase
            | Error::NoSuchMeasurement
            | Error::NoSuchUser => true,
            Error::Io(e) => e.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_are_stable() {
        assert_eq!(Error::InvalidMeasurement.status_code() as i32, -4);
        assert_eq!(Error::EndOfSelect.status_code() as i32, -8);
        assert_eq!(Error::OutOfOrderTimestamps.status_code() as i32, -10);
        assert_eq!(Error::NotARoot.status_code() as i32, -23);
        assert_eq!(
            Error::InvalidChunkSize { size: 100 }.status_code() as i32,
            -27
        );
    }

    #[test]
    fn test_overwrite_family() {
        assert!(Error::TimestampOverwriteMismatch.is_overwrite_mismatch());
        assert!(Error::FieldOverwriteMismatch {
            field: "t".into()
        }
        .is_overwrite_mismatch());
        assert!(!Error::OutOfOrderTimestamps.is_overwrite_mismatch());
    }

    #[test]
    fn test_not_found_wraps_io() {
        let e = Error::Io(io::Error::new(io::ErrorKind::NotFound, "gone"));
        assert!(e.is_not_found());
        assert!(!Error::MeasurementExists.is_not_found());
    }

    #[test]
    fn test_display_carries_detail() {
        let e = Error::IncorrectWriteChunkLen {
            expected: 360,
            actual: 352,
        };
        let msg = e.to_string();
        assert!(msg.contains("360"));
        assert!(msg.contains("352"));
    }
}
