//! The select operators: lazy, chunk-at-a-time range reads.
//!
//! A select operator holds a read lock's snapshot, the mapped index, and
//! one mapped batch of results at a time.  `advance()` moves to the next
//! chunk; advancing past the last batch is the `EndOfSelect` error.  The
//! `first` variant yields from the front of the range; the `last` variant
//! counts the points available and fast-forwards so that at most `limit`
//! points — the numerically last ones — are yielded.
//!
//! Sealed chunks store their field files gzip-compressed; the operator
//! decompresses them transparently, so callers always see packed
//! native-width values.

use crate::index::{ts_at, ts_lower_bound, ts_upper_bound, SeriesIndex};
use crate::series::SeriesReadLock;
use flate2::read::GzDecoder;
use std::io::Read;
use tidestore_core::{bitmap_get_bytes, Error, FieldVec, Result, SchemaEntry};
use tidestore_fs::{map_ro, Dir, Mapping, OpenMode};
use tracing::debug;

/// Per-chunk field bytes: a mapping for a live file, an owned buffer for a
/// sealed (gzip-compressed) file.
#[derive(Debug)]
enum FieldData {
    Mapped(Mapping),
    Decompressed(Vec<u8>),
}

impl FieldData {
    fn bytes(&self) -> &[u8] {
        match self {
            FieldData::Mapped(m) => m,
            FieldData::Decompressed(v) => v,
        }
    }
}

/// A running select over one series.
#[derive(Debug)]
pub struct SelectOp<'lk, 'm> {
    lock: &'lk SeriesReadLock<'m>,
    fields: Vec<SchemaEntry>,

    t0: u64,
    t1: u64,
    rem_limit: u64,

    index: Option<SeriesIndex>,
    time_ns_dir: Option<Dir>,
    fields_dir: Option<Dir>,
    bitmaps_dir: Option<Dir>,
    slot: usize,

    // Current batch.
    is_last: bool,
    npoints: usize,
    start_index: usize,
    ts_map: Option<Mapping>,
    ts_len: usize,
    field_data: FieldVec<FieldData>,
    bitmap_maps: FieldVec<Mapping>,
}

impl<'lk, 'm> SelectOp<'lk, 'm> {
    /// Select from the front of `[t0, t1]`, yielding at most `limit` points.
    pub fn first(
        lock: &'lk SeriesReadLock<'m>,
        field_names: &[String],
        t0: u64,
        t1: u64,
        limit: u64,
    ) -> Result<SelectOp<'lk, 'm>> {
        let mut op = SelectOp::build(lock, field_names, t0, t1, limit)?;
        let Some(index) = &op.index else {
            return Ok(op);
        };

        debug!(
            series = lock.series_name.as_str(),
            t0 = op.t0,
            t1 = op.t1,
            limit,
            "select first"
        );

        // t0, clamped to time_first, is always at or past the first slot's
        // start, so upper_bound can never return the beginning.
        op.slot = index.upper_bound(op.t0) - 1;
        op.advance_inner(true)?;
        Ok(op)
    }

    /// Select the numerically last `limit` points of `[t0, t1]`.
    pub fn last(
        lock: &'lk SeriesReadLock<'m>,
        field_names: &[String],
        t0: u64,
        t1: u64,
        limit: u64,
    ) -> Result<SelectOp<'lk, 'm>> {
        let mut op = SelectOp::build(lock, field_names, t0, t1, limit)?;
        if op.index.is_none() {
            return Ok(op);
        };

        debug!(
            series = lock.series_name.as_str(),
            t0 = op.t0,
            t1 = op.t1,
            limit,
            "select last"
        );

        let index = op.index.as_ref().expect("index present");
        let chunk_npoints = lock.m.db.root.config.chunk_npoints();
        let t0_slot = index.upper_bound(op.t0) - 1;
        let t1_slot = index.upper_bound(op.t1) - 1;

        // Bound positions inside the two edge chunks.
        let time_ns_dir = op.time_ns_dir.as_ref().expect("dirs open");
        let t0_chunk = load_chunk_times(time_ns_dir, &index.entry(t0_slot)?.name)?;
        let t1_chunk = load_chunk_times(time_ns_dir, &index.entry(t1_slot)?.name)?;
        let t0_lower = ts_lower_bound(&t0_chunk, op.t0);
        let t1_upper = ts_upper_bound(&t1_chunk, op.t1);

        let avail = if t0_slot == t1_slot {
            (t1_upper - t0_lower) as u64
        } else {
            let middles = (t1_slot - t0_slot - 1) as u64;
            (t0_chunk.len() / 8 - t0_lower) as u64
                + middles * chunk_npoints as u64
                + t1_upper as u64
        };

        if avail > op.rem_limit {
            // Walk back from the end to the chunk holding the new start.
            let mut s = t1_slot;
            let mut upper_in_s = t1_upper;
            let mut remaining = op.rem_limit as usize;
            loop {
                let lower_in_s = if s == t0_slot { t0_lower } else { 0 };
                if remaining <= upper_in_s - lower_in_s {
                    break;
                }
                remaining -= upper_in_s - lower_in_s;
                s -= 1;
                upper_in_s = if s == t0_slot {
                    t0_chunk.len() / 8
                } else {
                    chunk_npoints
                };
            }
            let chunk = load_chunk_times(time_ns_dir, &index.entry(s)?.name)?;
            op.t0 = ts_at(&chunk, upper_in_s - remaining);
            op.slot = s;
            debug!(fast_forward_t0 = op.t0, "select last fast-forward");
        } else {
            op.rem_limit = avail;
            op.slot = t0_slot;
        }

        op.advance_inner(true)?;
        Ok(op)
    }

    fn build(
        lock: &'lk SeriesReadLock<'m>,
        field_names: &[String],
        t0: u64,
        t1: u64,
        limit: u64,
    ) -> Result<SelectOp<'lk, 'm>> {
        let fields = lock.m.gen_entries(field_names)?;
        let nfields = fields.len();

        // Fresh time_last: a write lock running a nested select sees its
        // own committed appends.
        let time_last = lock
            .series_dir
            .open_file("time_last", OpenMode::Read)?
            .read_u64_at(0)?;

        let mut op = SelectOp {
            lock,
            fields,
            t0: t0.max(lock.time_first),
            t1: t1.min(time_last),
            rem_limit: limit,
            index: None,
            time_ns_dir: None,
            fields_dir: None,
            bitmaps_dir: None,
            slot: 0,
            is_last: true,
            npoints: 0,
            start_index: 0,
            ts_map: None,
            ts_len: 0,
            field_data: FieldVec::new(),
            bitmap_maps: FieldVec::new(),
        };

        // Degenerate ranges yield zero batches.
        if lock.time_first > time_last
            || t0 > t1
            || t1 < lock.time_first
            || t0 > time_last
            || limit == 0
        {
            return Ok(op);
        }

        // time_first ≤ time_last means at least one chunk, so the index is
        // non-empty and mappable.
        let index_fd = lock.series_dir.open_file("index", OpenMode::Read)?;
        op.index = Some(SeriesIndex::load(&index_fd)?);
        op.time_ns_dir = Some(lock.series_dir.open_dir("time_ns")?);
        op.fields_dir = Some(lock.series_dir.open_dir("fields")?);
        op.bitmaps_dir = Some(lock.series_dir.open_dir("bitmaps")?);
        Ok(op)
    }

    /// Move to the next batch.  Calling past the final batch is an error.
    pub fn advance(&mut self) -> Result<()> {
        self.advance_inner(false)
    }

    fn advance_inner(&mut self, is_first: bool) -> Result<()> {
        if !is_first {
            if self.is_last {
                return Err(Error::EndOfSelect);
            }
            self.slot += 1;
        }
        let index = self.index.as_ref().expect("advance without index");
        let time_ns_dir = self.time_ns_dir.as_ref().expect("dirs open");

        let mut entry = index.entry(self.slot)?;
        let ts_fd = time_ns_dir.open_file(&entry.name, OpenMode::Read)?;
        let mut ts_map = map_ro(&ts_fd)?;
        let mut ts_len = ts_map.len() / 8;

        let start_index;
        if is_first {
            // t0 can sit partway into the chunk, or even in the gap between
            // this chunk and the next.
            let at = ts_lower_bound(&ts_map, self.t0);
            if at == ts_len {
                self.slot += 1;
                entry = index.entry(self.slot)?;
                let ts_fd = time_ns_dir.open_file(&entry.name, OpenMode::Read)?;
                ts_map = map_ro(&ts_fd)?;
                ts_len = ts_map.len() / 8;
                start_index = 0;
            } else {
                start_index = at;
            }
        } else {
            start_index = 0;
        }

        let end_index = ts_upper_bound(&ts_map, self.t1);
        let mut npoints = end_index - start_index;

        // The batch after this one exists iff the run was cut by the chunk
        // boundary rather than by t1 or the limit.
        self.is_last = !((npoints as u64) < self.rem_limit
            && end_index == ts_len
            && self.slot + 1 < index.len()
            && index.time_ns(self.slot + 1) <= self.t1);

        npoints = npoints.min(self.rem_limit as usize);
        self.rem_limit -= npoints as u64;

        // Field data, decompressing sealed chunks transparently.
        let fields_dir = self.fields_dir.as_ref().expect("dirs open");
        self.field_data.clear();
        for f in &self.fields {
            let dir = fields_dir.open_dir(&f.name)?;
            let data = match dir.open_file_if_exists(&entry.name, OpenMode::Read)? {
                Some(fd) => FieldData::Mapped(map_ro(&fd)?),
                None => {
                    let gz_fd = dir.open_file(&format!("{}.gz", entry.name), OpenMode::Read)?;
                    let map = map_ro(&gz_fd)?;
                    let mut decoded = Vec::with_capacity(ts_len * f.ftype.width());
                    GzDecoder::new(&map[..]).read_to_end(&mut decoded)?;
                    FieldData::Decompressed(decoded)
                }
            };
            self.field_data.push(data);
        }

        let bitmaps_dir = self.bitmaps_dir.as_ref().expect("dirs open");
        self.bitmap_maps.clear();
        for f in &self.fields {
            let fd = bitmaps_dir.open_dir(&f.name)?.open_file(&entry.name, OpenMode::Read)?;
            self.bitmap_maps.push(map_ro(&fd)?);
        }

        self.ts_map = Some(ts_map);
        self.ts_len = ts_len;
        self.start_index = start_index;
        self.npoints = npoints;
        Ok(())
    }

    /// The schema entries this select yields, in yield order.
    pub fn fields(&self) -> &[SchemaEntry] {
        &self.fields
    }

    /// Points in the current batch.
    pub fn npoints(&self) -> usize {
        self.npoints
    }

    /// True when no further batch follows.
    pub fn is_last(&self) -> bool {
        self.is_last
    }

    /// Bit position of the batch's first point inside the chunk's bitmap
    /// files.
    pub fn bitmap_offset(&self) -> usize {
        self.start_index
    }

    /// Timestamp of point `i` of the batch.
    pub fn timestamp(&self, i: usize) -> u64 {
        debug_assert!(i < self.npoints);
        let map = self.ts_map.as_ref().expect("empty batch");
        ts_at(map, self.start_index + i)
    }

    /// Raw timestamp bytes of the batch.
    pub fn timestamps_raw(&self) -> &[u8] {
        match &self.ts_map {
            Some(map) => &map[self.start_index * 8..(self.start_index + self.npoints) * 8],
            None => &[],
        }
    }

    /// Raw value bytes of selected field `j` for the batch.
    pub fn field_raw(&self, j: usize) -> &[u8] {
        let width = self.fields[j].ftype.width();
        let bytes = self.field_data[j].bytes();
        &bytes[self.start_index * width..(self.start_index + self.npoints) * width]
    }

    /// True when selected field `j` is null at point `i` of the batch.
    pub fn is_field_null(&self, j: usize, i: usize) -> bool {
        debug_assert!(i < self.npoints);
        !bitmap_get_bytes(&self.bitmap_maps[j], self.start_index + i)
    }

    /// Selected field `j` at point `i`, widened to a raw 8-byte slot.
    pub fn field_raw_u64(&self, j: usize, i: usize) -> u64 {
        debug_assert!(i < self.npoints);
        let width = self.fields[j].ftype.width();
        let bytes = &self.field_data[j].bytes()
            [(self.start_index + i) * width..(self.start_index + i + 1) * width];
        match width {
            1 => bytes[0] as u64,
            4 => u32::from_ne_bytes(bytes.try_into().unwrap()) as u64,
            _ => u64::from_ne_bytes(bytes.try_into().unwrap()),
        }
    }

    /// Selected field `j` at point `i`, loaded as `f64` for aggregation.
    pub fn field_f64(&self, j: usize, i: usize) -> f64 {
        self.fields[j].ftype.load_f64(self.field_raw_u64(j, i))
    }

    /// The read lock this select runs under.
    pub fn lock(&self) -> &'lk SeriesReadLock<'m> {
        self.lock
    }
}

fn load_chunk_times(time_ns_dir: &Dir, name: &str) -> Result<Vec<u8>> {
    let fd = time_ns_dir.open_file(name, OpenMode::Read)?;
    let mut content = vec![0u8; fd.len()? as usize];
    fd.read_exact_at(&mut content, 0)?;
    Ok(content)
}
