//! The write path: input validation, overlap handling and the columnar
//! chunk-store append.
//!
//! Predicates the chunk store maintains (and that recovery restores):
//!
//! 1. If `time_last` exists, the series is fully constructed.
//! 2. Timestamp and field files are valid up to the timestamp stored in
//!    `time_last`; they may hold garbage past it from an interrupted write
//!    (`time_last` ≤ last indexed timestamp).
//! 3. Every index entry's timestamp and bitmap files exist; its field file
//!    exists bare or with a `.gz` suffix.
//! 4. Garbage past `time_last` is never served and is overwritten or
//!    truncated by the next write.
//!
//! The durability order for appending is: field bytes, bitmaps, timestamps,
//! barrier, `time_last`.  Growing into a new chunk seals the previous one
//! (gzip the field files), creates the new files, barriers on the new
//! timestamp file and only then extends the index; the unlink of sealed
//! uncompressed originals is fused behind the following `time_last` bump.

use crate::index::{ts_lower_bound, IndexEntry, SeriesIndex};
use crate::select::SelectOp;
use crate::series::SeriesWriteLock;
use crate::wal::{self, WalEntryRef};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::Write;
use tidestore_core::{
    bitmap_get_bytes, bitmap_set_bytes, Error, FieldType, FieldVec, Result, SchemaEntry,
    INDEX_ENTRY_SIZE,
};
use tidestore_fs::{map_rw, Dir, FsFile, LockKind, OpenMode};
use tracing::{debug, warn};

/// A validated view over the caller's flat write buffer.
///
/// The buffer layout is `npoints` u64 timestamps, then for each field in
/// schema order a word-padded bitmap (whose first valid bit is shifted by
/// `bitmap_offset`) and a word-padded value array.
#[derive(Debug)]
pub struct WriteChunkIndex<'a> {
    /// Number of points in the buffer.
    pub npoints: usize,
    /// Bit position of the first valid bitmap bit.
    pub bitmap_offset: usize,
    times: &'a [u8],
    fields: Vec<FieldRegion<'a>>,
}

#[derive(Debug)]
struct FieldRegion<'a> {
    bitmap: &'a [u8],
    data: &'a [u8],
}

impl<'a> WriteChunkIndex<'a> {
    /// Slice up and validate a caller buffer: exact expected length and
    /// strictly increasing timestamps.
    pub fn new(
        schema: &[SchemaEntry],
        npoints: usize,
        bitmap_offset: usize,
        data: &'a [u8],
    ) -> Result<WriteChunkIndex<'a>> {
        let expected = crate::measurement::write_buffer_len(schema, npoints, bitmap_offset);
        if data.len() != expected {
            return Err(Error::IncorrectWriteChunkLen {
                expected,
                actual: data.len(),
            });
        }

        let (times, mut rest) = data.split_at(npoints * 8);
        let mut fields = Vec::with_capacity(schema.len());
        for f in schema {
            let bitmap_len = (npoints + bitmap_offset + 63) / 64 * 8;
            let data_len = (npoints * f.ftype.width() + 7) / 8 * 8;
            let (bitmap, after) = rest.split_at(bitmap_len);
            let (fdata, after) = after.split_at(data_len);
            fields.push(FieldRegion {
                bitmap,
                data: fdata,
            });
            rest = after;
        }

        let wci = WriteChunkIndex {
            npoints,
            bitmap_offset,
            times,
            fields,
        };
        for i in 1..npoints {
            if wci.time_at(i) <= wci.time_at(i - 1) {
                return Err(Error::OutOfOrderTimestamps);
            }
        }
        Ok(wci)
    }

    /// Timestamp of point `i`.
    pub fn time_at(&self, i: usize) -> u64 {
        u64::from_ne_bytes(self.times[i * 8..i * 8 + 8].try_into().unwrap())
    }

    /// Raw timestamp bytes for points `[from, from + n)`.
    pub fn times_bytes(&self, from: usize, n: usize) -> &[u8] {
        &self.times[from * 8..(from + n) * 8]
    }

    /// True when field `j` is null at point `i`.
    pub fn is_field_null(&self, j: usize, i: usize) -> bool {
        !bitmap_get_bytes(self.fields[j].bitmap, self.bitmap_offset + i)
    }

    /// Value bytes of field `j` for points `[from, from + n)`.
    pub fn field_bytes(&self, j: usize, width: usize, from: usize, n: usize) -> &[u8] {
        &self.fields[j].data[from * width..(from + n) * width]
    }

    /// Field `j` at point `i`, widened to a raw 8-byte slot.
    pub fn field_value_raw(&self, j: usize, ftype: FieldType, i: usize) -> u64 {
        let w = ftype.width();
        let bytes = &self.fields[j].data[i * w..(i + 1) * w];
        match w {
            1 => bytes[0] as u64,
            4 => u32::from_ne_bytes(bytes.try_into().unwrap()) as u64,
            _ => u64::from_ne_bytes(bytes.try_into().unwrap()),
        }
    }
}

/// An owned columnar batch, the form the chunk-store append consumes.
/// Built by the WAL commit by transposing row entries.
#[derive(Debug)]
pub(crate) struct ColumnarBatch {
    npoints: usize,
    times: Vec<u8>,
    /// Per field: packed bitmap bytes and packed value bytes.
    fields: FieldVec<(Vec<u8>, Vec<u8>)>,
}

impl ColumnarBatch {
    pub(crate) fn new(schema: &[SchemaEntry]) -> ColumnarBatch {
        ColumnarBatch {
            npoints: 0,
            times: Vec::new(),
            fields: schema.iter().map(|_| (Vec::new(), Vec::new())).collect(),
        }
    }

    /// Append one WAL row.
    pub(crate) fn push_row(&mut self, schema: &[SchemaEntry], entry: &WalEntryRef<'_>) {
        self.times.extend_from_slice(&entry.time_ns().to_ne_bytes());
        let i = self.npoints;
        for (j, f) in schema.iter().enumerate() {
            let (bitmap, data) = &mut self.fields[j];
            if bitmap.len() < (i / 64 + 1) * 8 {
                bitmap.extend_from_slice(&[0u8; 8]);
            }
            if !entry.is_field_null(j) {
                bitmap_set_bytes(bitmap, i, true);
            }
            let raw = entry.field_raw(j);
            match f.ftype.width() {
                1 => data.push(raw as u8),
                4 => data.extend_from_slice(&(raw as u32).to_ne_bytes()),
                _ => data.extend_from_slice(&raw.to_ne_bytes()),
            }
        }
        self.npoints += 1;
    }

    pub(crate) fn npoints(&self) -> usize {
        self.npoints
    }

    fn time_at(&self, i: usize) -> u64 {
        u64::from_ne_bytes(self.times[i * 8..i * 8 + 8].try_into().unwrap())
    }

    fn times_bytes(&self, from: usize, n: usize) -> &[u8] {
        &self.times[from * 8..(from + n) * 8]
    }

    fn is_field_null(&self, j: usize, i: usize) -> bool {
        !bitmap_get_bytes(&self.fields[j].0, i)
    }

    fn field_bytes(&self, j: usize, width: usize, from: usize, n: usize) -> &[u8] {
        &self.fields[j].1[from * width..(from + n) * width]
    }
}

/// Write points to a series: validate, trim verified overlap, append to the
/// WAL, and drain the WAL into the chunk store once it reaches the
/// configured bound.
pub fn write_wal(
    lock: &mut SeriesWriteLock<'_>,
    npoints: usize,
    bitmap_offset: usize,
    data: &[u8],
) -> Result<()> {
    if npoints == 0 {
        return Ok(());
    }
    let schema = lock.m.fields.clone();
    let wci = WriteChunkIndex::new(&schema, npoints, bitmap_offset, data)?;

    // Overlap with the chunk store: verify byte-exact and trim, so clients
    // can replay a whole buffer after a crash.
    let mut skip = 0usize;
    if wci.time_at(0) <= lock.time_last {
        skip = verify_overlap(lock, &wci)?;
        if skip == wci.npoints {
            debug!(
                series = lock.series_name.as_str(),
                npoints, "write is a full overlap, discarding"
            );
            return Ok(());
        }
        debug!(
            series = lock.series_name.as_str(),
            dropped = skip,
            "dropping verified overlap prefix"
        );
    }

    // Remaining points must extend the pending tail.
    if let Some(wal_last) = wal::wal_last_time(lock)? {
        if wci.time_at(skip) <= wal_last {
            return Err(Error::OutOfOrderTimestamps);
        }
    }

    wal::append_wal(lock, &wci, skip)?;

    if wal::wal_len(lock)? >= lock.m.db.root.config.wal_max_entries {
        wal::commit_wal(lock)?;
    }
    Ok(())
}

/// Compare the overlapping prefix of `wci` against stored data; all of the
/// timestamps, field payloads and null bits must match byte for byte.
/// Returns the number of points to drop.
fn verify_overlap(lock: &SeriesWriteLock<'_>, wci: &WriteChunkIndex<'_>) -> Result<usize> {
    // The overlap is the incoming prefix at or below time_last; it must
    // reproduce the stored run starting at its first timestamp exactly.
    let mut in_overlap = 0usize;
    while in_overlap < wci.npoints && wci.time_at(in_overlap) <= lock.time_last {
        in_overlap += 1;
    }
    let overlap_t1 = wci.time_at(in_overlap - 1);
    let mut op = SelectOp::first(lock, &[], wci.time_at(0), overlap_t1, u64::MAX)?;
    if op.npoints() == 0 {
        // Nothing stored where the caller claims an overlap; the incoming
        // timestamps cannot match history.
        return Err(Error::TimestampOverwriteMismatch);
    }

    let schema = &lock.m.fields;
    let mut n_overlap = 0usize;
    loop {
        let n = op.npoints();
        if n_overlap + n > in_overlap {
            // The store holds more points inside the overlap window than
            // the caller supplied; the timestamp runs cannot agree.
            warn!(
                series = lock.series_name.as_str(),
                "overwrite mismatch in timestamps"
            );
            return Err(Error::TimestampOverwriteMismatch);
        }
        if wci.times_bytes(n_overlap, n) != op.timestamps_raw() {
            warn!(
                series = lock.series_name.as_str(),
                "overwrite mismatch in timestamps"
            );
            return Err(Error::TimestampOverwriteMismatch);
        }

        for (j, f) in schema.iter().enumerate() {
            let width = f.ftype.width();
            if wci.field_bytes(j, width, n_overlap, n) != op.field_raw(j) {
                warn!(
                    series = lock.series_name.as_str(),
                    field = f.name.as_str(),
                    "overwrite mismatch in field payload"
                );
                return Err(Error::FieldOverwriteMismatch {
                    field: f.name.clone(),
                });
            }
        }

        for (j, f) in schema.iter().enumerate() {
            for i in 0..n {
                if wci.is_field_null(j, n_overlap + i) != op.is_field_null(j, i) {
                    warn!(
                        series = lock.series_name.as_str(),
                        field = f.name.as_str(),
                        "overwrite mismatch in bitmap"
                    );
                    return Err(Error::BitmapOverwriteMismatch {
                        field: f.name.clone(),
                    });
                }
            }
        }

        n_overlap += n;
        if op.is_last() {
            break;
        }
        op.advance()?;
    }
    Ok(n_overlap)
}

/// Open descriptors for the tail chunk being appended to.
struct TailChunk {
    name: String,
    ts_fd: FsFile,
    field_fds: FieldVec<FsFile>,
    bitmap_fds: FieldVec<FsFile>,
    /// Byte position of the next timestamp slot.
    pos: u64,
    /// Points of capacity remaining.
    avail: usize,
}

/// Append a columnar batch to the chunk store, recovering from any
/// interrupted predecessor first.  Timestamps must all be greater than the
/// current `time_last`.
pub(crate) fn append_to_chunk_store(
    lock: &mut SeriesWriteLock<'_>,
    batch: &ColumnarBatch,
) -> Result<()> {
    let config = lock.m.db.root.config;
    let chunk_size = config.chunk_size;
    let chunk_npoints = config.chunk_npoints();
    let bitmap_file_size = config.bitmap_file_size();
    let schema = lock.m.fields.clone();

    // Shared lock on the index holds off concurrent delete cleanup.
    let index_fd = lock
        .series_dir
        .open_file("index", OpenMode::ReadWrite)?;
    index_fd.lock(LockKind::Shared)?;

    let time_ns_dir = lock.series_dir.open_dir("time_ns")?;
    let fields_dir = lock.series_dir.open_dir("fields")?;
    let bitmaps_dir = lock.series_dir.open_dir("bitmaps")?;

    sweep_dangling_chunks(&index_fd, &time_ns_dir)?;

    let mut tail = recover_tail(
        lock,
        &index_fd,
        &time_ns_dir,
        &fields_dir,
        &bitmaps_dir,
        &schema,
        chunk_size,
    )?;

    // Uncompressed originals of a freshly sealed chunk, unlinked only after
    // the next time_last bump lands behind a barrier.
    let mut pending_unlink: Option<String> = None;

    let mut written = 0usize;
    let mut rem = batch.npoints();
    while rem > 0 {
        if tail.as_ref().map_or(true, |t| t.avail == 0) {
            // Seal the full predecessor before growing.
            if let Some(full) = tail.take() {
                seal_chunk(&fields_dir, &schema, &full, chunk_npoints)?;
                pending_unlink = Some(full.name.clone());
            }
            tail = Some(grow_chunk(
                lock,
                &index_fd,
                &time_ns_dir,
                &fields_dir,
                &bitmaps_dir,
                &schema,
                batch.time_at(written),
                chunk_npoints,
                bitmap_file_size,
            )?);
        }
        let tail_ref = tail.as_mut().expect("tail exists after growth");

        let n = rem.min(tail_ref.avail);
        let ts_index = (tail_ref.pos / 8) as usize;

        // Field bytes first.
        for (j, f) in schema.iter().enumerate() {
            let width = f.ftype.width();
            tail_ref.field_fds[j]
                .write_all_at(batch.field_bytes(j, width, written, n), (ts_index * width) as u64)?;
            tail_ref.field_fds[j].fsync()?;
        }

        // Bitmaps through the mapping.
        for (j, _) in schema.iter().enumerate() {
            let mut map = map_rw(&tail_ref.bitmap_fds[j], bitmap_file_size)?;
            for k in 0..n {
                if !batch.is_field_null(j, written + k) {
                    bitmap_set_bytes(&mut map, ts_index + k, true);
                }
            }
            map.flush()?;
            tail_ref.bitmap_fds[j].fsync()?;
        }

        // Timestamps, then the barrier that makes the time_last bump atomic
        // with respect to the data behind it.
        tail_ref
            .ts_fd
            .write_all_at(batch.times_bytes(written, n), tail_ref.pos)?;
        tail_ref.ts_fd.fsync_and_barrier()?;

        lock.set_time_last(batch.time_at(written + n - 1))?;
        if let Some(sealed) = pending_unlink.take() {
            lock.time_last_fd().fsync_and_barrier()?;
            for f in &schema {
                let fd = fields_dir.open_dir(&f.name)?;
                fd.unlink_if_exists(&sealed)?;
                fd.fsync()?;
            }
        } else {
            lock.time_last_fd().fsync()?;
        }

        written += n;
        rem -= n;
        tail_ref.pos += (n * 8) as u64;
        tail_ref.avail -= n;
    }

    // Final fence for the whole batch.
    lock.time_last_fd().fsync_and_flush()?;
    Ok(())
}

/// Remove `time_ns/` files whose numeric name is not present in the index;
/// they are unreachable leftovers from a crash between chunk creation and
/// the index append.
fn sweep_dangling_chunks(index_fd: &FsFile, time_ns_dir: &Dir) -> Result<()> {
    let index = SeriesIndex::load(index_fd)?;
    let mut known = std::collections::HashSet::new();
    for e in index.entries()? {
        known.insert(e.name);
    }
    for name in time_ns_dir.list_files()? {
        if !known.contains(&name) {
            warn!(chunk = name.as_str(), "unlinking dangling chunk file");
            time_ns_dir.unlink_if_exists(&name)?;
        }
    }
    Ok(())
}

/// Walk the index from the back, restoring consistency after any crashed
/// write, and return the open tail chunk (None for an empty index).
fn recover_tail(
    lock: &SeriesWriteLock<'_>,
    index_fd: &FsFile,
    time_ns_dir: &Dir,
    fields_dir: &Dir,
    bitmaps_dir: &Dir,
    schema: &[SchemaEntry],
    chunk_size: u64,
) -> Result<Option<TailChunk>> {
    let mut nindices = (index_fd.len()? / INDEX_ENTRY_SIZE as u64) as usize;

    while nindices > 0 {
        let mut rec = [0u8; INDEX_ENTRY_SIZE];
        index_fd.read_exact_at(&mut rec, ((nindices - 1) * INDEX_ENTRY_SIZE) as u64)?;
        let entry = IndexEntry::from_bytes(&rec)?;

        let ts_fd = time_ns_dir.open_file(&entry.name, OpenMode::ReadWrite)?;
        let mut pos = ts_fd.len()?;
        if pos > chunk_size {
            return Err(Error::TailFileTooBig { size: pos });
        }
        if pos % 8 != 0 {
            return Err(Error::TailFileInvalidSize { size: pos });
        }

        if pos >= 8 {
            let first = ts_fd.read_u64_at(0)?;
            let last = ts_fd.read_u64_at(pos - 8)?;

            // Fast path: the series is consistent and this is the tail.
            if last == lock.time_last {
                return Ok(Some(open_tail(
                    entry.name,
                    ts_fd,
                    fields_dir,
                    bitmaps_dir,
                    schema,
                    pos,
                    chunk_size,
                )?));
            }

            // time_last is bumped last, so it can never exceed the index.
            if last < lock.time_last {
                return Err(Error::InvalidTimeLast {
                    tail: last,
                    time_last: lock.time_last,
                });
            }

            if first <= lock.time_last {
                // An in-flight write died mid-chunk.  Find time_last inside
                // the file and truncate the garbage after it.
                let mut content = vec![0u8; pos as usize];
                ts_fd.read_exact_at(&mut content, 0)?;
                let at = ts_lower_bound(&content, lock.time_last);
                let found = crate::index::ts_at(&content, at);
                if found != lock.time_last {
                    return Err(Error::InvalidTimeLast {
                        tail: found,
                        time_last: lock.time_last,
                    });
                }
                pos = ((at + 1) * 8) as u64;
                warn!(
                    series = lock.series_name.as_str(),
                    chunk = entry.name.as_str(),
                    keep_bytes = pos,
                    "truncating interrupted tail chunk"
                );
                ts_fd.truncate(pos)?;
                return Ok(Some(open_tail(
                    entry.name,
                    ts_fd,
                    fields_dir,
                    bitmaps_dir,
                    schema,
                    pos,
                    chunk_size,
                )?));
            }
            // Every timestamp in this chunk is past time_last: the whole
            // chunk was created but never went live.  Drop it below.
        }

        warn!(
            series = lock.series_name.as_str(),
            chunk = entry.name.as_str(),
            "dropping never-live chunk"
        );
        for f in schema {
            let fd = fields_dir.open_dir(&f.name)?;
            fd.unlink_if_exists(&entry.name)?;
            fd.unlink_if_exists(&format!("{}.gz", entry.name))?;
            let bd = bitmaps_dir.open_dir(&f.name)?;
            bd.unlink_if_exists(&entry.name)?;
        }
        ts_fd.fsync_and_barrier()?;
        drop(ts_fd);
        time_ns_dir.unlink(&entry.name)?;

        index_fd.lock(LockKind::Exclusive)?;
        index_fd.truncate(((nindices - 1) * INDEX_ENTRY_SIZE) as u64)?;
        index_fd.lock(LockKind::Shared)?;
        nindices -= 1;
    }

    Ok(None)
}

fn open_tail(
    name: String,
    ts_fd: FsFile,
    fields_dir: &Dir,
    bitmaps_dir: &Dir,
    schema: &[SchemaEntry],
    pos: u64,
    chunk_size: u64,
) -> Result<TailChunk> {
    // Tail chunks are never compressed, so the bare names must exist.
    let mut field_fds = FieldVec::new();
    let mut bitmap_fds = FieldVec::new();
    for f in schema {
        field_fds.push(fields_dir.open_dir(&f.name)?.open_file(&name, OpenMode::ReadWrite)?);
        bitmap_fds.push(
            bitmaps_dir
                .open_dir(&f.name)?
                .open_file(&name, OpenMode::ReadWrite)?,
        );
    }
    Ok(TailChunk {
        name,
        ts_fd,
        field_fds,
        bitmap_fds,
        pos,
        avail: ((chunk_size - pos) / 8) as usize,
    })
}

/// Gzip each field file of a full chunk next to the original; the original
/// is unlinked later, fused behind the next `time_last` barrier.
fn seal_chunk(
    fields_dir: &Dir,
    schema: &[SchemaEntry],
    full: &TailChunk,
    chunk_npoints: usize,
) -> Result<()> {
    for (j, f) in schema.iter().enumerate() {
        let len = chunk_npoints * f.ftype.width();
        let mut content = vec![0u8; len];
        full.field_fds[j].read_exact_at(&mut content, 0)?;

        debug!(
            field = f.name.as_str(),
            chunk = full.name.as_str(),
            "compressing sealed chunk field"
        );
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&content)?;
        let compressed = encoder.finish()?;

        let dir = fields_dir.open_dir(&f.name)?;
        let gz_fd = dir.create_file(&format!("{}.gz", full.name), OpenMode::CreateTruncate)?;
        gz_fd.write_all_at(&compressed, 0)?;
        gz_fd.fsync()?;
        dir.fsync()?;
    }
    Ok(())
}

/// Create the files of a new chunk, set `time_first` when the series was
/// empty, and extend the index behind a barrier on the new timestamp file.
#[allow(clippy::too_many_arguments)]
fn grow_chunk(
    lock: &mut SeriesWriteLock<'_>,
    index_fd: &FsFile,
    time_ns_dir: &Dir,
    fields_dir: &Dir,
    bitmaps_dir: &Dir,
    schema: &[SchemaEntry],
    first_ts: u64,
    chunk_npoints: usize,
    bitmap_file_size: usize,
) -> Result<TailChunk> {
    let name = first_ts.to_string();
    let mut field_fds = FieldVec::new();
    let mut bitmap_fds = FieldVec::new();
    for f in schema {
        // Bitmap files are fully allocated up front so the writer can set
        // bits through a mapping without extending the file.
        let fd = fields_dir
            .open_dir(&f.name)?
            .create_file(&name, OpenMode::CreateTruncate)?;
        fd.fsync()?;
        field_fds.push(fd);

        let bd = bitmaps_dir
            .open_dir(&f.name)?
            .create_file(&name, OpenMode::CreateTruncate)?;
        bd.truncate(bitmap_file_size as u64)?;
        bd.fsync()?;
        bitmap_fds.push(bd);
    }

    // A crashed predecessor may have left this timestamp file dangling;
    // truncate-and-reuse.
    let ts_fd = time_ns_dir.create_file(&name, OpenMode::CreateTruncate)?;

    if lock.time_first > lock.time_last {
        lock.set_time_first(first_ts)?;
        lock.time_first_fd().fsync()?;
    }

    ts_fd.fsync_and_barrier()?;

    let entry = IndexEntry::new(first_ts);
    let mut index_end = index_fd.len()?;
    index_fd.write_all_at(&entry.to_bytes(), index_end)?;
    index_fd.fsync()?;
    index_end += INDEX_ENTRY_SIZE as u64;
    debug!(
        series = lock.series_name.as_str(),
        chunk = name.as_str(),
        slots = index_end / INDEX_ENTRY_SIZE as u64,
        "grew into new chunk"
    );

    Ok(TailChunk {
        name,
        ts_fd,
        field_fds,
        bitmap_fds,
        pos: 0,
        avail: chunk_npoints,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidestore_core::{Field, FieldType, SchemaEntry};

    fn schema() -> Vec<SchemaEntry> {
        SchemaEntry::build_schema(&[
            Field::new("a", FieldType::U64),
            Field::new("b", FieldType::U32),
        ])
        .unwrap()
    }

    fn pad8(buf: &mut Vec<u8>) {
        while buf.len() % 8 != 0 {
            buf.push(0);
        }
    }

    fn build_buffer(times: &[u64], a: &[u64], b: &[u32], null_mask: u64) -> Vec<u8> {
        let mut buf = Vec::new();
        for t in times {
            buf.extend_from_slice(&t.to_ne_bytes());
        }
        // Field a: bitmap then data, each word padded.
        let bitmap = !null_mask;
        buf.extend_from_slice(&bitmap.to_ne_bytes());
        for v in a {
            buf.extend_from_slice(&v.to_ne_bytes());
        }
        pad8(&mut buf);
        // Field b.
        buf.extend_from_slice(&bitmap.to_ne_bytes());
        for v in b {
            buf.extend_from_slice(&v.to_ne_bytes());
        }
        pad8(&mut buf);
        buf
    }

    #[test]
    fn test_wci_validates_length() {
        let schema = schema();
        let times = [1u64, 2, 3];
        let buf = build_buffer(&times, &[10, 20, 30], &[1, 2, 3], 0);
        assert!(WriteChunkIndex::new(&schema, 3, 0, &buf).is_ok());
        assert!(matches!(
            WriteChunkIndex::new(&schema, 3, 0, &buf[..buf.len() - 8]),
            Err(Error::IncorrectWriteChunkLen { .. })
        ));
    }

    #[test]
    fn test_wci_rejects_out_of_order() {
        let schema = schema();
        let buf = build_buffer(&[5u64, 5, 6], &[1, 2, 3], &[1, 2, 3], 0);
        assert!(matches!(
            WriteChunkIndex::new(&schema, 3, 0, &buf),
            Err(Error::OutOfOrderTimestamps)
        ));
    }

    #[test]
    fn test_wci_accessors() {
        let schema = schema();
        let buf = build_buffer(&[1u64, 2, 3], &[10, 20, 30], &[7, 8, 9], 0b010);
        let wci = WriteChunkIndex::new(&schema, 3, 0, &buf).unwrap();
        assert_eq!(wci.time_at(2), 3);
        assert_eq!(wci.field_value_raw(0, FieldType::U64, 1), 20);
        assert_eq!(wci.field_value_raw(1, FieldType::U32, 2), 9);
        assert!(!wci.is_field_null(0, 0));
        assert!(wci.is_field_null(0, 1));
        assert!(wci.is_field_null(1, 1));
        assert_eq!(wci.field_bytes(1, 4, 1, 2).len(), 8);
    }
}
