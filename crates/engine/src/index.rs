//! The per-series chunk index.
//!
//! `index` is an array of 32-byte records:
//!
//! ```text
//! ┌──────────────┬─────────────────────────────────────┐
//! │ time_ns (8)  │ chunk name (24, NUL-terminated)     │
//! └──────────────┴─────────────────────────────────────┘
//! ```
//!
//! Records are in ascending `time_ns`.  A chunk's timestamps are all
//! ≥ its record's `time_ns` and < the next record's `time_ns` (unbounded
//! for the last record).  The name is the decimal first timestamp of the
//! chunk; the `.gz` suffix of a sealed field file lives on disk only.

use std::io;
use tidestore_core::{INDEX_ENTRY_SIZE, TIMESTAMP_FILE_NAME_LEN};
use tidestore_fs::{map_ro, FsFile, Mapping};

/// One decoded index record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    /// Lower bound of the chunk's timestamp range.
    pub time_ns: u64,
    /// Chunk file name (decimal first timestamp).
    pub name: String,
}

impl IndexEntry {
    /// Build the record for a chunk starting at `time_ns`.
    pub fn new(time_ns: u64) -> IndexEntry {
        IndexEntry {
            time_ns,
            name: time_ns.to_string(),
        }
    }

    /// Encode into the fixed 32-byte on-disk form.
    pub fn to_bytes(&self) -> [u8; INDEX_ENTRY_SIZE] {
        let mut bytes = [0u8; INDEX_ENTRY_SIZE];
        bytes[0..8].copy_from_slice(&self.time_ns.to_ne_bytes());
        bytes[8..8 + self.name.len()].copy_from_slice(self.name.as_bytes());
        bytes
    }

    /// Decode one on-disk record.
    pub fn from_bytes(bytes: &[u8]) -> io::Result<IndexEntry> {
        if bytes.len() != INDEX_ENTRY_SIZE {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        let time_ns = u64::from_ne_bytes(bytes[0..8].try_into().unwrap());
        let name_region = &bytes[8..8 + TIMESTAMP_FILE_NAME_LEN];
        let nul = name_region
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(TIMESTAMP_FILE_NAME_LEN);
        let name = std::str::from_utf8(&name_region[..nul])
            .map_err(|_| io::Error::from(io::ErrorKind::InvalidData))?
            .to_string();
        Ok(IndexEntry { time_ns, name })
    }
}

/// A read view of a series index, decoded from one mapping.
///
/// The zero-length case (everything still in the WAL) carries no mapping,
/// since empty files cannot be mapped.
#[derive(Debug)]
pub struct SeriesIndex {
    map: Option<Mapping>,
    nentries: usize,
}

impl SeriesIndex {
    /// Load the index through the given open descriptor.
    pub fn load(fd: &FsFile) -> io::Result<SeriesIndex> {
        let len = fd.len()? as usize;
        if len == 0 {
            return Ok(SeriesIndex {
                map: None,
                nentries: 0,
            });
        }
        let map = map_ro(fd)?;
        Ok(SeriesIndex {
            nentries: map.len() / INDEX_ENTRY_SIZE,
            map: Some(map),
        })
    }

    /// Number of index records.
    pub fn len(&self) -> usize {
        self.nentries
    }

    /// True when the index has no records.
    pub fn is_empty(&self) -> bool {
        self.nentries == 0
    }

    /// The `time_ns` of record `i`.
    pub fn time_ns(&self, i: usize) -> u64 {
        let map = self.map.as_ref().expect("indexing an empty index");
        let off = i * INDEX_ENTRY_SIZE;
        u64::from_ne_bytes(map[off..off + 8].try_into().unwrap())
    }

    /// Decode record `i`.
    pub fn entry(&self, i: usize) -> io::Result<IndexEntry> {
        let map = self.map.as_ref().expect("indexing an empty index");
        let off = i * INDEX_ENTRY_SIZE;
        IndexEntry::from_bytes(&map[off..off + INDEX_ENTRY_SIZE])
    }

    /// Decode every record.
    pub fn entries(&self) -> io::Result<Vec<IndexEntry>> {
        (0..self.nentries).map(|i| self.entry(i)).collect()
    }

    /// Index of the first record with `time_ns > t` (`upper_bound`).
    pub fn upper_bound(&self, t: u64) -> usize {
        let mut lo = 0usize;
        let mut hi = self.nentries;
        while lo < hi {
            let mid = (lo + hi) / 2;
            if self.time_ns(mid) <= t {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }
}

/// `lower_bound` over a packed-u64 timestamp byte region: index of the
/// first timestamp ≥ `t`.
pub(crate) fn ts_lower_bound(bytes: &[u8], t: u64) -> usize {
    let n = bytes.len() / 8;
    let mut lo = 0usize;
    let mut hi = n;
    while lo < hi {
        let mid = (lo + hi) / 2;
        if ts_at(bytes, mid) < t {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    lo
}

/// `upper_bound` over a packed-u64 timestamp byte region: index of the
/// first timestamp > `t`.
pub(crate) fn ts_upper_bound(bytes: &[u8], t: u64) -> usize {
    let n = bytes.len() / 8;
    let mut lo = 0usize;
    let mut hi = n;
    while lo < hi {
        let mid = (lo + hi) / 2;
        if ts_at(bytes, mid) <= t {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    lo
}

/// The `u64` at position `i` of a packed timestamp byte region.
#[inline]
pub(crate) fn ts_at(bytes: &[u8], i: usize) -> u64 {
    u64::from_ne_bytes(bytes[i * 8..i * 8 + 8].try_into().unwrap())
}
