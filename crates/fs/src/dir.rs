//! Owned directory descriptors and directory-relative operations.

use crate::file::{FsFile, OpenMode};
use crate::{nix_err, retry_eintr};
use nix::fcntl::OFlag;
use nix::sys::stat::Mode;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::path::Path;

const DIR_MODE: Mode = Mode::S_IRWXU;
const FILE_MODE: Mode = Mode::S_IRUSR.union(Mode::S_IWUSR);

/// An owned directory descriptor.
///
/// All child operations are relative to this descriptor (`openat`,
/// `mkdirat`, `renameat`, `unlinkat`), so a series keeps working even if an
/// ancestor directory is renamed, and no operation re-traverses the root
/// path.  The descriptor closes on drop.
#[derive(Debug)]
pub struct Dir {
    fd: OwnedFd,
}

impl Dir {
    /// Open a directory by path.
    pub fn open(path: &Path) -> io::Result<Dir> {
        let fd = retry_eintr(|| {
            nix::fcntl::open(path, OFlag::O_DIRECTORY | OFlag::O_RDONLY, Mode::empty())
        })?;
        // Safety: fresh descriptor from open.
        Ok(Dir {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
        })
    }

    /// Open a subdirectory.
    pub fn open_dir(&self, name: &str) -> io::Result<Dir> {
        let fd = retry_eintr(|| {
            nix::fcntl::openat(
                self.fd.as_raw_fd(),
                name,
                OFlag::O_DIRECTORY | OFlag::O_RDONLY,
                Mode::empty(),
            )
        })?;
        // Safety: fresh descriptor from openat.
        Ok(Dir {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
        })
    }

    /// Create a subdirectory.
    pub fn mkdir(&self, name: &str) -> io::Result<()> {
        retry_eintr(|| nix::sys::stat::mkdirat(self.fd.as_raw_fd(), name, DIR_MODE))
    }

    /// Create a subdirectory and open it.
    pub fn mkdir_open(&self, name: &str) -> io::Result<Dir> {
        self.mkdir(name)?;
        self.open_dir(name)
    }

    /// Open an existing file.
    pub fn open_file(&self, name: &str, mode: OpenMode) -> io::Result<FsFile> {
        self.openat(name, mode)
    }

    /// Create a file.
    pub fn create_file(&self, name: &str, mode: OpenMode) -> io::Result<FsFile> {
        self.openat(name, mode)
    }

    fn openat(&self, name: &str, mode: OpenMode) -> io::Result<FsFile> {
        let oflag = match mode {
            OpenMode::Read => OFlag::O_RDONLY,
            OpenMode::ReadWrite => OFlag::O_RDWR,
            OpenMode::CreateNew => OFlag::O_RDWR | OFlag::O_CREAT | OFlag::O_EXCL,
            OpenMode::CreateTruncate => OFlag::O_RDWR | OFlag::O_CREAT | OFlag::O_TRUNC,
        };
        let fd = retry_eintr(|| nix::fcntl::openat(self.fd.as_raw_fd(), name, oflag, FILE_MODE))?;
        // Safety: fresh descriptor from openat.
        Ok(FsFile::from_owned_fd(unsafe { OwnedFd::from_raw_fd(fd) }))
    }

    /// Open a file if it exists.
    pub fn open_file_if_exists(&self, name: &str, mode: OpenMode) -> io::Result<Option<FsFile>> {
        match self.open_file(name, mode) {
            Ok(f) => Ok(Some(f)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// True when a child with this name exists.
    pub fn exists(&self, name: &str) -> io::Result<bool> {
        use nix::sys::stat::fstatat;
        match retry_eintr(|| {
            fstatat(
                self.fd.as_raw_fd(),
                name,
                nix::fcntl::AtFlags::AT_SYMLINK_NOFOLLOW,
            )
        }) {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Remove a child file.
    pub fn unlink(&self, name: &str) -> io::Result<()> {
        retry_eintr(|| {
            nix::unistd::unlinkat(
                Some(self.fd.as_raw_fd()),
                name,
                nix::unistd::UnlinkatFlags::NoRemoveDir,
            )
        })
    }

    /// Remove a child file, succeeding when it is already gone.
    pub fn unlink_if_exists(&self, name: &str) -> io::Result<()> {
        match self.unlink(name) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Remove an empty child directory.
    pub fn rmdir(&self, name: &str) -> io::Result<()> {
        retry_eintr(|| {
            nix::unistd::unlinkat(
                Some(self.fd.as_raw_fd()),
                name,
                nix::unistd::UnlinkatFlags::RemoveDir,
            )
        })
    }

    /// Atomically rename `src_name` under `src` to `dst_name` under `dst`,
    /// replacing any existing destination.
    pub fn rename(src: &Dir, src_name: &str, dst: &Dir, dst_name: &str) -> io::Result<()> {
        retry_eintr(|| {
            nix::fcntl::renameat(
                Some(src.fd.as_raw_fd()),
                src_name,
                Some(dst.fd.as_raw_fd()),
                dst_name,
            )
        })
    }

    /// Atomically rename, failing when the destination already exists.
    ///
    /// Returns `Ok(false)` on collision so callers can fall back to opening
    /// the artifact somebody else just put in place.
    #[cfg(target_os = "linux")]
    pub fn rename_if_not_exists(
        src: &Dir,
        src_name: &str,
        dst: &Dir,
        dst_name: &str,
    ) -> io::Result<bool> {
        use nix::fcntl::RenameFlags;
        match retry_eintr(|| {
            nix::fcntl::renameat2(
                Some(src.fd.as_raw_fd()),
                src_name,
                Some(dst.fd.as_raw_fd()),
                dst_name,
                RenameFlags::RENAME_NOREPLACE,
            )
        }) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Atomically rename, failing when the destination already exists.
    #[cfg(target_os = "macos")]
    pub fn rename_if_not_exists(
        src: &Dir,
        src_name: &str,
        dst: &Dir,
        dst_name: &str,
    ) -> io::Result<bool> {
        use std::ffi::CString;
        let src_c = CString::new(src_name).map_err(|_| io::ErrorKind::InvalidInput)?;
        let dst_c = CString::new(dst_name).map_err(|_| io::ErrorKind::InvalidInput)?;
        loop {
            let rv = unsafe {
                libc::renameatx_np(
                    src.fd.as_raw_fd(),
                    src_c.as_ptr(),
                    dst.fd.as_raw_fd(),
                    dst_c.as_ptr(),
                    libc::RENAME_EXCL,
                )
            };
            if rv == 0 {
                return Ok(true);
            }
            let err = io::Error::last_os_error();
            match err.kind() {
                io::ErrorKind::Interrupted => continue,
                io::ErrorKind::AlreadyExists => return Ok(false),
                _ => return Err(err),
            }
        }
    }

    /// Names of all subdirectories, unsorted.
    pub fn list_dirs(&self) -> io::Result<Vec<String>> {
        self.list_entries(true)
    }

    /// Names of all regular files, unsorted.
    pub fn list_files(&self) -> io::Result<Vec<String>> {
        self.list_entries(false)
    }

    fn list_entries(&self, want_dirs: bool) -> io::Result<Vec<String>> {
        let mut handle = nix::dir::Dir::openat(
            self.fd.as_raw_fd(),
            ".",
            OFlag::O_DIRECTORY | OFlag::O_RDONLY,
            Mode::empty(),
        )
        .map_err(nix_err)?;

        let mut names = Vec::new();
        for entry in handle.iter() {
            let entry = entry.map_err(nix_err)?;
            let name = match entry.file_name().to_str() {
                Ok(n) => n,
                Err(_) => continue,
            };
            if name == "." || name == ".." {
                continue;
            }
            let is_dir = match entry.file_type() {
                Some(t) => t == nix::dir::Type::Directory,
                // Filesystems without d_type need a stat.
                None => {
                    let st = retry_eintr(|| {
                        nix::sys::stat::fstatat(
                            self.fd.as_raw_fd(),
                            name,
                            nix::fcntl::AtFlags::AT_SYMLINK_NOFOLLOW,
                        )
                    })?;
                    st.st_mode & libc::S_IFMT == libc::S_IFDIR
                }
            };
            if is_dir == want_dirs {
                names.push(name.to_string());
            }
        }
        Ok(names)
    }

    /// Push this directory's dirty metadata to the device.
    pub fn fsync(&self) -> io::Result<()> {
        retry_eintr(|| nix::unistd::fsync(self.fd.as_raw_fd()))
    }

    /// Barrier flavor of [`Dir::fsync`]; directories take the same
    /// degradation rules as files.
    #[cfg(target_os = "macos")]
    pub fn fsync_and_barrier(&self) -> io::Result<()> {
        let rv = unsafe { libc::fcntl(self.fd.as_raw_fd(), libc::F_BARRIERFSYNC) };
        if rv == -1 {
            self.fsync_and_flush()
        } else {
            Ok(())
        }
    }

    /// Barrier flavor of [`Dir::fsync`]; directories take the same
    /// degradation rules as files.
    #[cfg(not(target_os = "macos"))]
    pub fn fsync_and_barrier(&self) -> io::Result<()> {
        self.fsync_and_flush()
    }

    /// Full-flush flavor of [`Dir::fsync`].
    #[cfg(target_os = "macos")]
    pub fn fsync_and_flush(&self) -> io::Result<()> {
        let rv = unsafe { libc::fcntl(self.fd.as_raw_fd(), libc::F_FULLFSYNC) };
        if rv == -1 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    /// Full-flush flavor of [`Dir::fsync`].
    #[cfg(not(target_os = "macos"))]
    pub fn fsync_and_flush(&self) -> io::Result<()> {
        self.fsync()
    }
}

impl AsRawFd for Dir {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_mkdir_open_unlink() {
        let td = tempdir().unwrap();
        let root = Dir::open(td.path()).unwrap();

        let sub = root.mkdir_open("sub").unwrap();
        sub.create_file("a", OpenMode::CreateNew).unwrap();
        assert!(sub.exists("a").unwrap());
        sub.unlink("a").unwrap();
        assert!(!sub.exists("a").unwrap());
        sub.unlink_if_exists("a").unwrap();
        root.rmdir("sub").unwrap();
        assert!(!root.exists("sub").unwrap());
    }

    #[test]
    fn test_listing_splits_files_and_dirs() {
        let td = tempdir().unwrap();
        let root = Dir::open(td.path()).unwrap();
        root.mkdir("d1").unwrap();
        root.mkdir("d2").unwrap();
        root.create_file("f1", OpenMode::CreateNew).unwrap();

        let mut dirs = root.list_dirs().unwrap();
        dirs.sort();
        assert_eq!(dirs, vec!["d1", "d2"]);
        assert_eq!(root.list_files().unwrap(), vec!["f1"]);
    }

    #[test]
    fn test_rename_if_not_exists() {
        let td = tempdir().unwrap();
        let root = Dir::open(td.path()).unwrap();
        root.create_file("src1", OpenMode::CreateNew).unwrap();
        root.create_file("src2", OpenMode::CreateNew).unwrap();

        assert!(Dir::rename_if_not_exists(&root, "src1", &root, "dst").unwrap());
        // Destination now exists: the second mover loses.
        assert!(!Dir::rename_if_not_exists(&root, "src2", &root, "dst").unwrap());
        assert!(root.exists("src2").unwrap());
    }

    #[test]
    fn test_open_file_if_exists() {
        let td = tempdir().unwrap();
        let root = Dir::open(td.path()).unwrap();
        assert!(root
            .open_file_if_exists("missing", OpenMode::Read)
            .unwrap()
            .is_none());
        root.create_file("present", OpenMode::CreateNew).unwrap();
        assert!(root
            .open_file_if_exists("present", OpenMode::Read)
            .unwrap()
            .is_some());
    }
}
