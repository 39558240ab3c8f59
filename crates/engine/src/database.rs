//! Database handles.
//!
//! A database is a pure namespace: a directory under `databases/` holding
//! one subdirectory per measurement, with no metadata of its own.

use crate::root::StorageRoot;
use std::io;
use tidestore_core::{Error, Result};
use tidestore_fs::Dir;

/// An open database.
#[derive(Debug)]
pub struct Database<'r> {
    /// The root this database belongs to.
    pub root: &'r StorageRoot,
    /// Open descriptor of the database directory.
    pub dir: Dir,
    /// Database name.
    pub name: String,
}

impl<'r> Database<'r> {
    /// Open an existing database.
    pub fn open(root: &'r StorageRoot, name: &str) -> Result<Database<'r>> {
        let dir = root.databases_dir().open_dir(name).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                Error::NoSuchDatabase
            } else {
                Error::Io(e)
            }
        })?;
        Ok(Database {
            root,
            dir,
            name: name.to_string(),
        })
    }

    /// Names of all measurements in this database, sorted.
    pub fn list_measurements(&self) -> Result<Vec<String>> {
        let mut names = self.dir.list_dirs()?;
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Configuration;
    use crate::root::create_root;
    use tempfile::tempdir;

    #[test]
    fn test_open_missing_database() {
        let td = tempdir().unwrap();
        create_root(td.path(), &Configuration::default()).unwrap();
        let root = StorageRoot::open(td.path()).unwrap();
        assert!(matches!(
            Database::open(&root, "nope"),
            Err(Error::NoSuchDatabase)
        ));
    }

    #[test]
    fn test_open_and_list() {
        let td = tempdir().unwrap();
        create_root(td.path(), &Configuration::default()).unwrap();
        let root = StorageRoot::open(td.path()).unwrap();
        root.create_database("db1").unwrap();

        let db = Database::open(&root, "db1").unwrap();
        assert!(db.list_measurements().unwrap().is_empty());
    }
}
