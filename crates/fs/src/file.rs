//! Owned file descriptors with positioned I/O, locks and sync flavors.

use crate::retry_eintr;
use nix::fcntl::FlockArg;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::os::fd::{AsRawFd, OwnedFd};
use std::os::unix::fs::FileExt;

/// How a file is opened relative to its directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Read-only.
    Read,
    /// Read-write; the file must already exist.
    ReadWrite,
    /// Read-write; create the file, failing if it already exists.
    CreateNew,
    /// Read-write; create if absent and truncate to zero length.
    CreateTruncate,
}

/// Advisory whole-file lock flavors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockKind {
    /// `LOCK_SH`: many holders, excludes exclusive holders.
    Shared,
    /// `LOCK_EX`: one holder, excludes everyone.
    Exclusive,
}

/// An owned file descriptor.
///
/// Positioned reads and writes (`pread`/`pwrite`) are used throughout so the
/// descriptor carries no hidden cursor state between callers; the handful of
/// append-style paths track their own offsets.  The descriptor closes on
/// drop.  Locks acquired through [`FsFile::lock`] are released by the kernel
/// when the descriptor closes.
#[derive(Debug)]
pub struct FsFile {
    file: File,
}

impl FsFile {
    pub(crate) fn from_owned_fd(fd: OwnedFd) -> FsFile {
        FsFile {
            file: File::from(fd),
        }
    }

    /// Current length of the file in bytes.
    pub fn len(&self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    /// True when the file is empty.
    pub fn is_empty(&self) -> io::Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Read exactly `buf.len()` bytes at `offset`.
    pub fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> io::Result<()> {
        self.file.read_exact_at(buf, offset)
    }

    /// Write all of `buf` at `offset`.
    pub fn write_all_at(&self, buf: &[u8], offset: u64) -> io::Result<()> {
        self.file.write_all_at(buf, offset)
    }

    /// Read the `u64` stored at `offset`.
    pub fn read_u64_at(&self, offset: u64) -> io::Result<u64> {
        let mut buf = [0u8; 8];
        self.read_exact_at(&mut buf, offset)?;
        Ok(u64::from_ne_bytes(buf))
    }

    /// Write a `u64` at `offset`.
    pub fn write_u64_at(&self, v: u64, offset: u64) -> io::Result<()> {
        self.write_all_at(&v.to_ne_bytes(), offset)
    }

    /// Append `buf` at the current end of file, returning the offset it
    /// landed at.
    pub fn append(&mut self, buf: &[u8]) -> io::Result<u64> {
        let pos = self.file.seek(SeekFrom::End(0))?;
        self.file.write_all(buf)?;
        Ok(pos)
    }

    /// Read the whole file into a buffer.
    pub fn read_to_vec(&mut self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.file.seek(SeekFrom::Start(0))?;
        self.file.read_to_end(&mut buf)?;
        Ok(buf)
    }

    /// Truncate (or extend with zeroes) to `len` bytes.
    pub fn truncate(&self, len: u64) -> io::Result<()> {
        self.file.set_len(len)
    }

    /// Acquire an advisory lock, blocking until granted.
    pub fn lock(&self, kind: LockKind) -> io::Result<()> {
        let arg = match kind {
            LockKind::Shared => FlockArg::LockShared,
            LockKind::Exclusive => FlockArg::LockExclusive,
        };
        retry_eintr(|| nix::fcntl::flock(self.file.as_raw_fd(), arg))
    }

    /// Try to acquire an advisory lock without blocking; `Ok(false)` when
    /// another holder is in the way.
    pub fn try_lock(&self, kind: LockKind) -> io::Result<bool> {
        let arg = match kind {
            LockKind::Shared => FlockArg::LockSharedNonblock,
            LockKind::Exclusive => FlockArg::LockExclusiveNonblock,
        };
        match retry_eintr(|| nix::fcntl::flock(self.file.as_raw_fd(), arg)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Release an advisory lock.
    pub fn unlock(&self) -> io::Result<()> {
        retry_eintr(|| nix::fcntl::flock(self.file.as_raw_fd(), FlockArg::Unlock))
    }

    /// Push dirty pages to the device.
    pub fn fsync(&self) -> io::Result<()> {
        retry_eintr(|| nix::unistd::fsync(self.file.as_raw_fd()))
    }

    /// Push dirty pages and guarantee no later write reorders ahead of this
    /// operation.
    #[cfg(target_os = "macos")]
    pub fn fsync_and_barrier(&self) -> io::Result<()> {
        // F_BARRIERFSYNC is cheaper than F_FULLFSYNC; fall back when the
        // filesystem does not support it.
        let rv = unsafe { libc::fcntl(self.file.as_raw_fd(), libc::F_BARRIERFSYNC) };
        if rv == -1 {
            self.fsync_and_flush()
        } else {
            Ok(())
        }
    }

    /// Push dirty pages and guarantee no later write reorders ahead of this
    /// operation.  Linux has no userspace barrier primitive, so this is a
    /// full flush.
    #[cfg(not(target_os = "macos"))]
    pub fn fsync_and_barrier(&self) -> io::Result<()> {
        self.fsync_and_flush()
    }

    /// Push dirty pages and flush device buffers to stable media.
    #[cfg(target_os = "macos")]
    pub fn fsync_and_flush(&self) -> io::Result<()> {
        let rv = unsafe { libc::fcntl(self.file.as_raw_fd(), libc::F_FULLFSYNC) };
        if rv == -1 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    /// Push dirty pages and flush device buffers to stable media.  On Linux
    /// `fsync` already reaches the device write cache.
    #[cfg(not(target_os = "macos"))]
    pub fn fsync_and_flush(&self) -> io::Result<()> {
        self.fsync()
    }

    pub(crate) fn as_file(&self) -> &File {
        &self.file
    }
}

impl AsRawFd for FsFile {
    fn as_raw_fd(&self) -> std::os::fd::RawFd {
        self.file.as_raw_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Dir;
    use tempfile::tempdir;

    #[test]
    fn test_positioned_io_roundtrip() {
        let td = tempdir().unwrap();
        let dir = Dir::open(td.path()).unwrap();
        let f = dir.create_file("data", OpenMode::CreateNew).unwrap();

        f.write_u64_at(0xdead_beef, 16).unwrap();
        assert_eq!(f.read_u64_at(16).unwrap(), 0xdead_beef);
        assert_eq!(f.len().unwrap(), 24);

        f.truncate(8).unwrap();
        assert_eq!(f.len().unwrap(), 8);
    }

    #[test]
    fn test_append_tracks_end() {
        let td = tempdir().unwrap();
        let dir = Dir::open(td.path()).unwrap();
        let mut f = dir.create_file("log", OpenMode::CreateNew).unwrap();

        assert_eq!(f.append(b"abcd").unwrap(), 0);
        assert_eq!(f.append(b"efgh").unwrap(), 4);
        assert_eq!(f.read_to_vec().unwrap(), b"abcdefgh");
    }

    #[test]
    fn test_lock_exclusion_between_descriptors() {
        let td = tempdir().unwrap();
        let dir = Dir::open(td.path()).unwrap();
        dir.create_file("lockfile", OpenMode::CreateNew).unwrap();

        let a = dir.open_file("lockfile", OpenMode::Read).unwrap();
        let b = dir.open_file("lockfile", OpenMode::Read).unwrap();

        a.lock(LockKind::Exclusive).unwrap();
        assert!(!b.try_lock(LockKind::Shared).unwrap());
        a.unlock().unwrap();
        assert!(b.try_lock(LockKind::Shared).unwrap());
        // Shared holders stack; upgrading past another shared holder fails.
        assert!(a.try_lock(LockKind::Shared).unwrap());
        assert!(!a.try_lock(LockKind::Exclusive).unwrap());
    }

    #[test]
    fn test_sync_flavors_run() {
        let td = tempdir().unwrap();
        let dir = Dir::open(td.path()).unwrap();
        let f = dir.create_file("synced", OpenMode::CreateNew).unwrap();
        f.write_u64_at(1, 0).unwrap();
        f.fsync().unwrap();
        f.fsync_and_barrier().unwrap();
        f.fsync_and_flush().unwrap();
    }
}
