//! Memory mappings over open files.
//!
//! Thin wrappers over `memmap2`.  Mapping a zero-length file is an error on
//! every platform we care about, so callers check emptiness first; the
//! engine's formats guarantee the files it maps are non-empty whenever a
//! mapping is taken.

use crate::file::FsFile;
use memmap2::{Mmap, MmapMut, MmapOptions};
use std::io;

/// A read-only mapping.
pub type Mapping = Mmap;

/// A writable shared mapping; flush with [`MmapMut::flush`] (`msync`).
pub type MappingMut = MmapMut;

/// Map the whole file read-only.
pub fn map_ro(file: &FsFile) -> io::Result<Mapping> {
    // Safety: the engine never truncates a file while a reader maps it; the
    // durability rules keep mapped bytes inside the live window.
    unsafe { MmapOptions::new().map(file.as_file()) }
}

/// Map `len` bytes starting at `offset`, read-only.
pub fn map_ro_range(file: &FsFile, offset: u64, len: usize) -> io::Result<Mapping> {
    // Safety: as for `map_ro`.
    unsafe { MmapOptions::new().offset(offset).len(len).map(file.as_file()) }
}

/// Map `len` bytes of the file as a writable shared mapping.
pub fn map_rw(file: &FsFile, len: usize) -> io::Result<MappingMut> {
    // Safety: writers hold the exclusive series lock while mutating through
    // the mapping.
    unsafe { MmapOptions::new().len(len).map_mut(file.as_file()) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Dir, OpenMode};
    use tempfile::tempdir;

    #[test]
    fn test_ro_mapping_sees_writes() {
        let td = tempdir().unwrap();
        let dir = Dir::open(td.path()).unwrap();
        let f = dir.create_file("m", OpenMode::CreateNew).unwrap();
        f.write_u64_at(42, 0).unwrap();
        f.write_u64_at(43, 8).unwrap();

        let m = map_ro(&f).unwrap();
        assert_eq!(m.len(), 16);
        assert_eq!(u64::from_ne_bytes(m[0..8].try_into().unwrap()), 42);
        assert_eq!(u64::from_ne_bytes(m[8..16].try_into().unwrap()), 43);
    }

    #[test]
    fn test_rw_mapping_flushes_through() {
        let td = tempdir().unwrap();
        let dir = Dir::open(td.path()).unwrap();
        let f = dir.create_file("m", OpenMode::CreateNew).unwrap();
        f.truncate(16).unwrap();

        let mut m = map_rw(&f, 16).unwrap();
        m[0..8].copy_from_slice(&7u64.to_ne_bytes());
        m.flush().unwrap();

        assert_eq!(f.read_u64_at(0).unwrap(), 7);
    }

    #[test]
    fn test_range_mapping() {
        let td = tempdir().unwrap();
        let dir = Dir::open(td.path()).unwrap();
        let f = dir.create_file("m", OpenMode::CreateNew).unwrap();
        // Ranged offsets must be page-aligned; write a page of zeroes first.
        f.truncate(4096).unwrap();
        f.write_u64_at(9, 4096).unwrap();
        let m = map_ro_range(&f, 4096, 8).unwrap();
        assert_eq!(u64::from_ne_bytes(m[0..8].try_into().unwrap()), 9);
    }
}
