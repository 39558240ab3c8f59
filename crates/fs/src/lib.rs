//! Filesystem shim for the tidestore engine
//!
//! Everything the engine does to disk goes through this crate:
//!
//! - [`Dir`]: an owned directory descriptor with directory-relative
//!   open/create/rename/unlink/mkdir (the `openat` family)
//! - [`FsFile`]: an owned file descriptor with positioned reads and writes,
//!   advisory whole-file locks, and the three sync flavors
//! - [`map_ro`]/[`map_rw`]: memory mappings over open files
//! - [`TmpFile`]/[`TmpDir`]: randomly-named staging artifacts that unlink
//!   themselves unless committed, for the temp-and-rename pattern
//!
//! # Sync flavors
//!
//! | Flavor              | Guarantee                                       |
//! |---------------------|-------------------------------------------------|
//! | `fsync`             | dirty pages pushed to the device                |
//! | `fsync_and_barrier` | no later write reorders ahead of this operation |
//! | `fsync_and_flush`   | device buffers flushed to stable media          |
//!
//! On Linux `fsync` already forces the device write cache, so all three
//! flavors issue `fsync`; on macOS the barrier and flush flavors use
//! `F_BARRIERFSYNC` and `F_FULLFSYNC`, with barrier degrading to a full
//! flush where unsupported.
//!
//! All retriable syscalls loop on `EINTR`.  Every descriptor is released
//! on drop, on all exit paths.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod dir;
mod file;
mod mmap;
mod tmp;

pub use dir::Dir;
pub use file::{FsFile, LockKind, OpenMode};
pub use mmap::{map_ro, map_ro_range, map_rw, Mapping, MappingMut};
pub use tmp::{TmpDir, TmpFile};

use std::io;

/// Convert a nix error into `std::io::Error`.
pub(crate) fn nix_err(e: nix::errno::Errno) -> io::Error {
    io::Error::from_raw_os_error(e as i32)
}

/// Retry a nix syscall while it reports `EINTR`.
pub(crate) fn retry_eintr<T>(
    mut f: impl FnMut() -> nix::Result<T>,
) -> io::Result<T> {
    loop {
        match f() {
            Ok(v) => return Ok(v),
            Err(nix::errno::Errno::EINTR) => continue,
            Err(e) => return Err(nix_err(e)),
        }
    }
}
