//! Point deletion: advance `time_first`, orphan chunks, shift the index.
//!
//! Deletion is a prefix operation: every point with `time_ns ≤ t` goes
//! away.  The durable order is `time_first` first (behind a barrier), then
//! orphan unlinks, then the index rewrite through `tmp/`.  A crash part way
//! leaves extra files and index slots that precede `time_first`; reads mask
//! to the live range, and the next delete sweeps them.

use crate::index::{ts_at, ts_upper_bound, SeriesIndex};
use crate::series::SeriesTotalLock;
use tidestore_core::Result;
use tidestore_fs::{OpenMode, TmpFile};
use tracing::debug;

/// Remove all points with `time_ns ≤ t` under a total lock.
///
/// `time_first` becomes the smallest remaining timestamp, or `t + 1` when
/// the chunk store empties (which also hides any pending WAL entries up to
/// `t`; the next commit discards them).
pub fn delete_points(lock: &mut SeriesTotalLock<'_>, t: u64) -> Result<()> {
    if t < lock.time_first {
        return Ok(());
    }

    let index_fd = lock.series_dir.open_file("index", OpenMode::ReadWrite)?;
    let index = SeriesIndex::load(&index_fd)?;
    let time_ns_dir = lock.series_dir.open_dir("time_ns")?;

    // First slot whose range starts after t; t, if stored at all, lives in
    // the slot before it.
    let mut slot = index.upper_bound(t);
    let new_time_first;
    if slot > 0 {
        slot -= 1;
        let entry = index.entry(slot)?;
        let ts_fd = time_ns_dir.open_file(&entry.name, OpenMode::Read)?;
        let mut content = vec![0u8; ts_fd.len()? as usize];
        ts_fd.read_exact_at(&mut content, 0)?;

        let at = ts_upper_bound(&content, t);
        if at < content.len() / 8 {
            // A survivor inside this chunk; everything before the chunk goes.
            new_time_first = ts_at(&content, at);
        } else if slot < index.len() - 1 {
            // The chunk is fully obsolete and not the tail; drop through it.
            slot += 1;
            new_time_first = index.time_ns(slot);
        } else {
            // t swallows the whole chunk store ("deleting from the future").
            slot += 1;
            new_time_first = t + 1;
        }
    } else {
        // No chunks at or before t; everything lives in the WAL.
        new_time_first = t + 1;
    }

    lock.set_time_first(new_time_first)?;
    if slot == 0 {
        lock.time_first_fd.fsync_and_flush()?;
        return Ok(());
    }
    lock.time_first_fd.fsync_and_barrier()?;

    // A crash from here on leaves index slots that precede time_first; they
    // are invisible to readers and swept by the next delete.
    let fields_dir = lock.series_dir.open_dir("fields")?;
    let bitmaps_dir = lock.series_dir.open_dir("bitmaps")?;
    for s in 0..slot {
        let entry = index.entry(s)?;
        time_ns_dir.unlink_if_exists(&entry.name)?;
        time_ns_dir.fsync_and_flush()?;
        let gz_name = format!("{}.gz", entry.name);
        for f in &lock.m.fields {
            let fd = fields_dir.open_dir(&f.name)?;
            fd.unlink_if_exists(&entry.name)?;
            fd.unlink_if_exists(&gz_name)?;
            fd.fsync_and_flush()?;
            let bd = bitmaps_dir.open_dir(&f.name)?;
            bd.unlink_if_exists(&entry.name)?;
            bd.fsync_and_flush()?;
        }
    }

    // Shift the kept tail of the index into a fresh file and swap it in.
    let staged = TmpFile::create(&lock.m.db.root.tmp_dir)?;
    let mut kept = Vec::new();
    for s in slot..index.len() {
        kept.extend_from_slice(&index.entry(s)?.to_bytes());
    }
    staged.file.write_all_at(&kept, 0)?;
    staged.file.fsync_and_barrier()?;
    staged.rename_into(&lock.series_dir, "index")?;
    lock.series_dir.fsync_and_flush()?;

    debug!(
        series = lock.series_name.as_str(),
        dropped_slots = slot,
        time_first = new_time_first,
        "deleted index prefix"
    );
    Ok(())
}
