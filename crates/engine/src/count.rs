//! Point counting.
//!
//! The chunk-store side binary-searches only the two boundary chunks; full
//! middle chunks contribute `CHUNK_NPOINTS` each without being touched.
//! The WAL portion above the committed range is then merged in.

use crate::index::{ts_at, ts_lower_bound, ts_upper_bound, SeriesIndex};
use crate::series::SeriesReadLock;
use crate::wal::WalQuery;
use tidestore_core::Result;
use tidestore_fs::OpenMode;
use tracing::debug;

/// A count with the actual first and last matching timestamps (or the
/// clamped bounds when the range is empty).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountResult {
    /// Matching points.
    pub npoints: u64,
    /// First matching timestamp.
    pub time_first: u64,
    /// Last matching timestamp.
    pub time_last: u64,
}

/// Count the points in `[t0, t1]` across the chunk store and the WAL.
pub fn count_points(lock: &SeriesReadLock<'_>, t0: u64, t1: u64) -> Result<CountResult> {
    debug!(series = lock.series_name.as_str(), t0, t1, "count");
    let committed = count_committed_points(lock, t0, t1)?;
    if committed.npoints == 0 {
        return count_wal_points(lock, t0, t1);
    }

    let pending = count_wal_points(lock, committed.time_last + 1, t1)?;
    if pending.npoints == 0 {
        return Ok(committed);
    }

    Ok(CountResult {
        npoints: committed.npoints + pending.npoints,
        time_first: committed.time_first,
        time_last: pending.time_last,
    })
}

/// Count only the chunk-store points in `[t0, t1]`.
pub fn count_committed_points(
    lock: &SeriesReadLock<'_>,
    t0: u64,
    t1: u64,
) -> Result<CountResult> {
    let time_last = lock
        .series_dir
        .open_file("time_last", OpenMode::Read)?
        .read_u64_at(0)?;
    if lock.time_first > time_last {
        return Ok(CountResult {
            npoints: 0,
            time_first: lock.time_first,
            time_last,
        });
    }

    let t0 = t0.max(lock.time_first);
    let t1 = t1.min(time_last);
    if t0 > t1 {
        return Ok(CountResult {
            npoints: 0,
            time_first: t0,
            time_last: t1,
        });
    }

    let index_fd = lock.series_dir.open_file("index", OpenMode::Read)?;
    let index = SeriesIndex::load(&index_fd)?;
    let time_ns_dir = lock.series_dir.open_dir("time_ns")?;

    let lower_slot = index.upper_bound(t0) - 1;
    let upper_slot = index.upper_bound(t1) - 1;

    let load = |slot: usize| -> Result<Vec<u8>> {
        let entry = index.entry(slot)?;
        let fd = time_ns_dir.open_file(&entry.name, OpenMode::Read)?;
        let mut content = vec![0u8; fd.len()? as usize];
        fd.read_exact_at(&mut content, 0)?;
        Ok(content)
    };
    let lower_chunk = load(lower_slot)?;
    let upper_chunk = load(upper_slot)?;

    let lower_at = ts_lower_bound(&lower_chunk, t0);
    let upper_at = ts_upper_bound(&upper_chunk, t1);

    let chunk_npoints = lock.m.db.root.config.chunk_npoints() as u64;
    let full_chunks = (upper_slot - lower_slot) as u64;
    let npoints = full_chunks * chunk_npoints + upper_at as u64 - lower_at as u64;
    if npoints == 0 {
        return Ok(CountResult {
            npoints: 0,
            time_first: t0,
            time_last: t1,
        });
    }
    Ok(CountResult {
        npoints,
        time_first: ts_at(&lower_chunk, lower_at),
        time_last: ts_at(&upper_chunk, upper_at - 1),
    })
}

/// Count only the pending WAL points in `[t0, t1]`.
pub fn count_wal_points(lock: &SeriesReadLock<'_>, t0: u64, t1: u64) -> Result<CountResult> {
    let wq = WalQuery::new(lock, t0, t1)?;
    if wq.is_empty() {
        return Ok(CountResult {
            npoints: 0,
            time_first: t0,
            time_last: t1,
        });
    }
    Ok(CountResult {
        npoints: wq.nentries() as u64,
        time_first: wq.entry(0).time_ns(),
        time_last: wq.entry(wq.nentries() - 1).time_ns(),
    })
}
