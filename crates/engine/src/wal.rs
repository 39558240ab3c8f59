//! The per-series write-ahead log.
//!
//! The WAL is a row-oriented mirror of pending points.  Entries are fixed
//! size for a given measurement:
//!
//! ```text
//! ┌──────────────┬──────────────┬────────────────────────────┐
//! │ time_ns (8)  │ bitmap (8)   │ fields[F] (8 each)         │
//! └──────────────┴──────────────┴────────────────────────────┘
//! ```
//!
//! Bit `i` of the bitmap is 1 iff field `i` is non-null; each field slot
//! holds the raw value coerced to 8 bytes.  Entries are strictly ordered by
//! `time_ns`.  Writers append to the end; a commit drains the log into the
//! columnar chunk store and atomically replaces the file with the
//! uncommitted suffix.
//!
//! # Query masking
//!
//! A WAL query must skip points already committed to the chunk store.  With
//! `time_last` the last committed timestamp and `time_first` the first live
//! timestamp (which can be past `time_last` after deleting into the
//! future), the first valid WAL point is `max(time_last + 1, time_first)`,
//! so the query range becomes:
//!
//! ```text
//! t0' = max(t0, time_first, time_last + 1)
//! t1' = max(t1, t0' - 1)
//! ```
//!
//! The `t1'` clamp turns an entirely-committed (or backwards) range into an
//! empty result, which is what lets the read operators concatenate chunk
//! results and WAL results without overcounting.

use crate::series::{SeriesReadLock, SeriesWriteLock};
use crate::write::{self, ColumnarBatch, WriteChunkIndex};
use tidestore_core::{Result, SchemaEntry};
use tidestore_fs::{map_ro, Mapping, TmpFile};
use tracing::debug;

/// WAL entry header size: timestamp plus bitmap.
pub const WAL_ENTRY_HEADER: usize = 16;

/// Size in bytes of one WAL entry for a measurement with `nfields` fields.
pub fn entry_size(nfields: usize) -> usize {
    WAL_ENTRY_HEADER + 8 * nfields
}

/// A borrowed view of one WAL entry.
#[derive(Debug, Clone, Copy)]
pub struct WalEntryRef<'a> {
    bytes: &'a [u8],
}

impl<'a> WalEntryRef<'a> {
    /// The entry's timestamp.
    pub fn time_ns(&self) -> u64 {
        u64::from_ne_bytes(self.bytes[0..8].try_into().unwrap())
    }

    /// The packed non-null bitmap.
    pub fn bitmap(&self) -> u64 {
        u64::from_ne_bytes(self.bytes[8..16].try_into().unwrap())
    }

    /// Raw 8-byte slot of field `i`.
    pub fn field_raw(&self, i: usize) -> u64 {
        let off = WAL_ENTRY_HEADER + 8 * i;
        u64::from_ne_bytes(self.bytes[off..off + 8].try_into().unwrap())
    }

    /// True when field `i` is null in this entry.
    pub fn is_field_null(&self, i: usize) -> bool {
        (self.bitmap() >> i) & 1 == 0
    }
}

/// A bounded view over the mapped WAL: all pending entries in `[t0, t1]`
/// that are not shadowed by the chunk store.
#[derive(Debug)]
pub struct WalQuery {
    map: Option<Mapping>,
    entry_size: usize,
    begin: usize,
    end: usize,
}

impl WalQuery {
    /// Map the WAL and locate the masked `[t0, t1]` range.
    pub fn new(lock: &SeriesReadLock<'_>, t0: u64, t1: u64) -> Result<WalQuery> {
        let entry_size = entry_size(lock.m.fields.len());
        let t0 = t0.max(lock.time_first).max(lock.time_last + 1);
        let t1 = t1.max(t0 - 1);

        let len = lock.wal_fd.len()? as usize;
        let nentries = len / entry_size;
        if nentries == 0 {
            return Ok(WalQuery {
                map: None,
                entry_size,
                begin: 0,
                end: 0,
            });
        }

        let map = map_ro(&lock.wal_fd)?;
        let time_at = |i: usize| -> u64 {
            let off = i * entry_size;
            u64::from_ne_bytes(map[off..off + 8].try_into().unwrap())
        };

        // lower_bound(t0)
        let (mut lo, mut hi) = (0usize, nentries);
        while lo < hi {
            let mid = (lo + hi) / 2;
            if time_at(mid) < t0 {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        let begin = lo;

        // upper_bound(t1)
        let (mut lo, mut hi) = (begin, nentries);
        while lo < hi {
            let mid = (lo + hi) / 2;
            if time_at(mid) <= t1 {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        let end = lo;

        Ok(WalQuery {
            map: Some(map),
            entry_size,
            begin,
            end,
        })
    }

    /// Number of entries in range.
    pub fn nentries(&self) -> usize {
        self.end - self.begin
    }

    /// True when the range is empty.
    pub fn is_empty(&self) -> bool {
        self.begin == self.end
    }

    /// Entry `i` of the range.
    pub fn entry(&self, i: usize) -> WalEntryRef<'_> {
        debug_assert!(i < self.nentries());
        let map = self.map.as_ref().expect("entry() on empty WAL query");
        let off = (self.begin + i) * self.entry_size;
        WalEntryRef {
            bytes: &map[off..off + self.entry_size],
        }
    }

    /// Iterate the entries in range.
    pub fn iter(&self) -> impl Iterator<Item = WalEntryRef<'_>> {
        (0..self.nentries()).map(move |i| self.entry(i))
    }
}

/// Number of whole entries currently in the WAL file.
pub(crate) fn wal_len(lock: &SeriesReadLock<'_>) -> Result<usize> {
    let len = lock.wal_fd.len()? as usize;
    Ok(len / entry_size(lock.m.fields.len()))
}

/// Timestamp of the last entry in the WAL, if any.
pub(crate) fn wal_last_time(lock: &SeriesReadLock<'_>) -> Result<Option<u64>> {
    let es = entry_size(lock.m.fields.len()) as u64;
    let n = wal_len(lock)? as u64;
    if n == 0 {
        return Ok(None);
    }
    Ok(Some(lock.wal_fd.read_u64_at((n - 1) * es)?))
}

/// Transpose the columnar write input into row entries and append them,
/// then flush to stable media.
///
/// The caller has already validated ordering against both the chunk store
/// and the current WAL tail.
pub(crate) fn append_wal(
    lock: &mut SeriesWriteLock<'_>,
    wci: &WriteChunkIndex<'_>,
    skip: usize,
) -> Result<()> {
    let fields: &[SchemaEntry] = &lock.m.fields;
    let es = entry_size(fields.len());
    let npoints = wci.npoints - skip;
    debug_assert!(npoints > 0);
    debug_assert!(wci.time_at(skip) > lock.time_last);

    let mut rows = vec![0u8; es * npoints];
    for i in 0..npoints {
        let row = &mut rows[i * es..(i + 1) * es];
        row[0..8].copy_from_slice(&wci.time_at(skip + i).to_ne_bytes());
        let mut bitmap = 0u64;
        for (j, f) in fields.iter().enumerate() {
            if !wci.is_field_null(j, skip + i) {
                bitmap |= 1 << j;
            }
            let raw = wci.field_value_raw(j, f.ftype, skip + i);
            let off = WAL_ENTRY_HEADER + 8 * j;
            row[off..off + 8].copy_from_slice(&raw.to_ne_bytes());
        }
        row[8..16].copy_from_slice(&bitmap.to_ne_bytes());
    }

    let wal_fd = lock.wal_fd_mut();
    wal_fd.append(&rows)?;
    wal_fd.fsync_and_flush()?;
    Ok(())
}

/// Drain the WAL into the columnar chunk store, then truncate the committed
/// prefix by atomically replacing the log with the uncommitted suffix.
///
/// Entries below `time_first` (deleted while still pending) are discarded
/// without touching the chunk store.
pub fn commit_wal(lock: &mut SeriesWriteLock<'_>) -> Result<()> {
    let fields = lock.m.fields.clone();
    let es = entry_size(fields.len());
    let total = wal_len(lock)?;
    if total == 0 {
        return Ok(());
    }

    let live_from = lock.time_first.max(lock.time_last + 1);
    let mut batch = ColumnarBatch::new(&fields);
    {
        let map = map_ro(&lock.wal_fd)?;
        for i in 0..total {
            let entry = WalEntryRef {
                bytes: &map[i * es..(i + 1) * es],
            };
            if entry.time_ns() < live_from {
                continue;
            }
            batch.push_row(&fields, &entry);
        }
    }

    debug!(
        series = lock.series_name.as_str(),
        entries = total,
        live = batch.npoints(),
        "committing WAL to chunk store"
    );

    if batch.npoints() > 0 {
        write::append_to_chunk_store(lock, &batch)?;
    }

    // Atomically replace the WAL with the uncommitted suffix.  The whole
    // log was drained and the exclusive time_last lock keeps writers out,
    // so the replacement is empty.
    let staged = TmpFile::create(&lock.m.db.root.tmp_dir)?;
    staged.file.fsync()?;
    let new_wal = staged.rename_into(&lock.series_dir, "wal")?;
    lock.series_dir.fsync()?;
    lock.replace_wal_fd(new_wal);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_size() {
        assert_eq!(entry_size(0), 16);
        assert_eq!(entry_size(4), 48);
    }

    #[test]
    fn test_entry_ref_decodes_fields() {
        let mut bytes = vec![0u8; entry_size(2)];
        bytes[0..8].copy_from_slice(&99u64.to_ne_bytes());
        bytes[8..16].copy_from_slice(&0b01u64.to_ne_bytes());
        bytes[16..24].copy_from_slice(&7u64.to_ne_bytes());
        bytes[24..32].copy_from_slice(&1.5f64.to_bits().to_ne_bytes());

        let e = WalEntryRef { bytes: &bytes };
        assert_eq!(e.time_ns(), 99);
        assert!(!e.is_field_null(0));
        assert!(e.is_field_null(1));
        assert_eq!(e.field_raw(0), 7);
        assert_eq!(f64::from_bits(e.field_raw(1)), 1.5);
    }
}
