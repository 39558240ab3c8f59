//! The root directory: configuration, namespaces and staging.

use crate::config::Configuration;
use std::io;
use std::path::{Path, PathBuf};
use tidestore_core::{field::valid_name, Error, Result};
use tidestore_fs::{Dir, OpenMode};
use tracing::debug;

/// An open storage root.
///
/// Holds descriptors for the root itself, the `tmp/` staging area and the
/// `databases/` namespace, plus the parsed configuration.  Opened read-only
/// in the sense that nothing above the series level mutates after
/// [`create_root`].
#[derive(Debug)]
pub struct StorageRoot {
    path: PathBuf,
    root_dir: Dir,
    /// Staging area for atomic construction.
    pub tmp_dir: Dir,
    databases_dir: Dir,
    /// Parsed `config.txt`.
    pub config: Configuration,
}

impl StorageRoot {
    /// Open an existing root.  Missing subpaths mean the directory is not a
    /// root at all.
    pub fn open(path: &Path) -> Result<StorageRoot> {
        let root_dir = map_not_root(Dir::open(path))?;
        let tmp_dir = map_not_root(root_dir.open_dir("tmp"))?;
        let databases_dir = map_not_root(root_dir.open_dir("databases"))?;

        let mut config_fd = map_not_root(root_dir.open_file("config.txt", OpenMode::Read))?;
        let text = config_fd.read_to_vec()?;
        let text = String::from_utf8(text).map_err(|_| Error::InvalidConfigFile {
            reason: "config.txt is not UTF-8".into(),
        })?;
        let config = Configuration::parse(&text)?;

        let root = StorageRoot {
            path: path.to_path_buf(),
            root_dir,
            tmp_dir,
            databases_dir,
            config,
        };
        root.sweep_tmp();
        Ok(root)
    }

    /// Filesystem path this root was opened at.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create a new database.
    pub fn create_database(&self, name: &str) -> Result<()> {
        if !valid_name(name) {
            return Err(Error::CreateDatabaseIo(io::Error::new(
                io::ErrorKind::InvalidInput,
                "invalid database name",
            )));
        }
        self.databases_dir
            .mkdir(name)
            .map_err(Error::CreateDatabaseIo)?;
        self.databases_dir
            .fsync_and_flush()
            .map_err(Error::CreateDatabaseIo)?;
        Ok(())
    }

    /// Names of all databases, sorted.
    pub fn list_databases(&self) -> Result<Vec<String>> {
        let mut names = self.databases_dir.list_dirs()?;
        names.sort();
        Ok(names)
    }

    /// True when the named database exists.
    pub fn database_exists(&self, name: &str) -> Result<bool> {
        Ok(self.databases_dir.exists(name)?)
    }

    pub(crate) fn databases_dir(&self) -> &Dir {
        &self.databases_dir
    }

    /// Remove leftover staging artifacts from crashed constructions.  They
    /// are invisible to every other code path, so failure here is harmless.
    fn sweep_tmp(&self) {
        let tmp_path = self.path.join("tmp");
        if let Ok(files) = self.tmp_dir.list_files() {
            for name in files {
                debug!(name, "sweeping staging file");
                let _ = self.tmp_dir.unlink_if_exists(&name);
            }
        }
        if let Ok(dirs) = self.tmp_dir.list_dirs() {
            for name in dirs {
                debug!(name, "sweeping staging directory");
                let _ = std::fs::remove_dir_all(tmp_path.join(&name));
            }
        }
    }
}

fn map_not_root<T>(r: io::Result<T>) -> Result<T> {
    r.map_err(|e| {
        if e.kind() == io::ErrorKind::NotFound {
            Error::NotARoot
        } else {
            Error::Io(e)
        }
    })
}

/// Create a new root at an existing empty directory.
///
/// Builds `databases/`, `tmp/`, the (empty) credential files and
/// `config.txt`, then syncs the directory.  Not crash-atomic as a whole:
/// a torn root fails [`StorageRoot::open`] with [`Error::NotARoot`] and can
/// be re-initialized.
pub fn create_root(path: &Path, config: &Configuration) -> Result<()> {
    config.validate()?;
    let root_dir = Dir::open(path).map_err(Error::InitIo)?;

    root_dir.mkdir("tmp").map_err(Error::InitIo)?;
    root_dir.mkdir("databases").map_err(Error::InitIo)?;
    let passwd_lock = root_dir
        .create_file("passwd.lock", OpenMode::CreateNew)
        .map_err(Error::InitIo)?;
    let passwd = root_dir
        .create_file("passwd", OpenMode::CreateNew)
        .map_err(Error::InitIo)?;

    let config_fd = root_dir
        .create_file("config.txt", OpenMode::CreateNew)
        .map_err(Error::InitIo)?;
    config_fd
        .write_all_at(config.encode().as_bytes(), 0)
        .map_err(Error::InitIo)?;

    config_fd.fsync().map_err(Error::InitIo)?;
    passwd.fsync().map_err(Error::InitIo)?;
    passwd_lock.fsync().map_err(Error::InitIo)?;
    root_dir.fsync_and_flush().map_err(Error::InitIo)?;
    Ok(())
}
