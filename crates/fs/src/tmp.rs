//! Randomly-named staging artifacts for the temp-and-rename pattern.
//!
//! Everything the engine constructs atomically is first built under the
//! root's `tmp/` directory with a random 8-hex-digit name, fsynced, and
//! then renamed into its destination.  A staging artifact removes itself on
//! drop unless committed, so an error path never leaves half-built state at
//! the destination.

use crate::dir::Dir;
use crate::file::{FsFile, OpenMode};
use rand::Rng;
use std::io;

fn random_name() -> String {
    let v: u32 = rand::thread_rng().gen();
    format!("{v:08X}")
}

/// Unlinks a staged name on drop unless disarmed.
#[derive(Debug)]
struct UnlinkGuard<'a> {
    tmp: &'a Dir,
    name: String,
    armed: bool,
}

impl Drop for UnlinkGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let _ = self.tmp.unlink_if_exists(&self.name);
        }
    }
}

/// A staging file under a temp directory.
#[derive(Debug)]
pub struct TmpFile<'a> {
    /// The open staging file.
    pub file: FsFile,
    guard: UnlinkGuard<'a>,
}

impl<'a> TmpFile<'a> {
    /// Create a randomly-named file under `tmp`.
    pub fn create(tmp: &'a Dir) -> io::Result<TmpFile<'a>> {
        loop {
            let name = random_name();
            match tmp.create_file(&name, OpenMode::CreateNew) {
                Ok(file) => {
                    return Ok(TmpFile {
                        file,
                        guard: UnlinkGuard {
                            tmp,
                            name,
                            armed: true,
                        },
                    })
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// The staging name under `tmp`.
    pub fn name(&self) -> &str {
        &self.guard.name
    }

    /// Rename the staged file into place, replacing any existing target.
    /// Returns the still-open descriptor, now referring to the final path.
    pub fn rename_into(mut self, dst: &Dir, dst_name: &str) -> io::Result<FsFile> {
        Dir::rename(self.guard.tmp, &self.guard.name, dst, dst_name)?;
        self.guard.armed = false;
        Ok(self.file)
    }
}

/// A staging directory under a temp directory.
///
/// The caller populates it, fsyncs contents, then renames it into place
/// with [`TmpDir::rename_into_if_not_exists`].  An uncommitted staging
/// directory is removed on drop when still empty; populated leftovers in
/// `tmp/` are harmless and swept by the next root open.
#[derive(Debug)]
pub struct TmpDir<'a> {
    /// The open staging directory.
    pub dir: Dir,
    tmp: &'a Dir,
    name: String,
    committed: bool,
}

impl<'a> TmpDir<'a> {
    /// Create a randomly-named directory under `tmp` and open it.
    pub fn create(tmp: &'a Dir) -> io::Result<TmpDir<'a>> {
        loop {
            let name = random_name();
            match tmp.mkdir(&name) {
                Ok(()) => {
                    let dir = tmp.open_dir(&name)?;
                    return Ok(TmpDir {
                        dir,
                        tmp,
                        name,
                        committed: false,
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Create a randomly-named directory with a recognizable prefix, e.g.
    /// `measurement.3F2A9C01`.
    pub fn create_prefixed(tmp: &'a Dir, prefix: &str) -> io::Result<TmpDir<'a>> {
        loop {
            let name = format!("{prefix}.{}", random_name());
            match tmp.mkdir(&name) {
                Ok(()) => {
                    let dir = tmp.open_dir(&name)?;
                    return Ok(TmpDir {
                        dir,
                        tmp,
                        name,
                        committed: false,
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// The staging name under `tmp`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Try to rename the populated directory into place.  `Ok(false)` means
    /// the destination already exists (somebody else won the race); the
    /// staged tree is left in `tmp/` for the sweep.
    pub fn rename_into_if_not_exists(mut self, dst: &Dir, dst_name: &str) -> io::Result<bool> {
        if Dir::rename_if_not_exists(self.tmp, &self.name, dst, dst_name)? {
            self.committed = true;
            Ok(true)
        } else {
            self.committed = true;
            Ok(false)
        }
    }
}

impl Drop for TmpDir<'_> {
    fn drop(&mut self) {
        if !self.committed {
            // Only succeeds for an empty staging dir; populated leftovers
            // are reclaimed by the tmp sweep on root open.
            let _ = self.tmp.rmdir(&self.name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_tmp_file_rename_into() {
        let td = tempdir().unwrap();
        let root = Dir::open(td.path()).unwrap();
        let tmp = root.mkdir_open("tmp").unwrap();

        let staged = TmpFile::create(&tmp).unwrap();
        staged.file.write_u64_at(11, 0).unwrap();
        staged.file.fsync().unwrap();
        let f = staged.rename_into(&root, "final").unwrap();
        assert_eq!(f.read_u64_at(0).unwrap(), 11);
        assert!(root.exists("final").unwrap());
        assert!(tmp.list_files().unwrap().is_empty());
    }

    #[test]
    fn test_tmp_file_unlinks_on_drop() {
        let td = tempdir().unwrap();
        let root = Dir::open(td.path()).unwrap();
        let tmp = root.mkdir_open("tmp").unwrap();

        {
            let staged = TmpFile::create(&tmp).unwrap();
            staged.file.write_u64_at(1, 0).unwrap();
        }
        assert!(tmp.list_files().unwrap().is_empty());
    }

    #[test]
    fn test_tmp_dir_rename_race() {
        let td = tempdir().unwrap();
        let root = Dir::open(td.path()).unwrap();
        let tmp = root.mkdir_open("tmp").unwrap();

        let a = TmpDir::create(&tmp).unwrap();
        a.dir.create_file("inner", OpenMode::CreateNew).unwrap();
        assert!(a.rename_into_if_not_exists(&root, "built").unwrap());

        let b = TmpDir::create_prefixed(&tmp, "measurement").unwrap();
        assert!(b.name().starts_with("measurement."));
        assert!(!b.rename_into_if_not_exists(&root, "built").unwrap());

        let built = root.open_dir("built").unwrap();
        assert!(built.exists("inner").unwrap());
    }
}
