//! Windowed aggregation: per-field sum, min, max and non-null count.
//!
//! The operator walks forward through the select results and then the WAL,
//! cutting the stream into `window_ns`-wide windows.  The window grid is
//! anchored at the largest window multiple at or below `time_first`,
//! clamped up to the caller's `t0`.  `next` yields the next window holding
//! at least one point across the selected fields; windows with no points
//! are skipped, and exhaustion of both sources ends the iteration.
//!
//! Sums accumulate as `f64`; min and max stay in the field's own type so
//! wide integers do not round.

use crate::select::SelectOp;
use crate::series::SeriesReadLock;
use crate::wal::WalQuery;
use tidestore_core::{FieldType, Result};
use tracing::debug;

/// A value in a field's own type, for exact min/max.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    /// Boolean value.
    Bool(bool),
    /// 32-bit unsigned value.
    U32(u32),
    /// 64-bit unsigned value.
    U64(u64),
    /// 32-bit float value.
    F32(f32),
    /// 64-bit float value.
    F64(f64),
    /// 32-bit signed value.
    I32(i32),
    /// 64-bit signed value.
    I64(i64),
}

impl Scalar {
    /// Interpret a raw 8-byte slot in the given type.
    pub fn from_raw(ftype: FieldType, raw: u64) -> Scalar {
        match ftype {
            FieldType::Bool => Scalar::Bool(raw as u8 != 0),
            FieldType::U32 => Scalar::U32(raw as u32),
            FieldType::U64 => Scalar::U64(raw),
            FieldType::F32 => Scalar::F32(f32::from_bits(raw as u32)),
            FieldType::F64 => Scalar::F64(f64::from_bits(raw)),
            FieldType::I32 => Scalar::I32(raw as u32 as i32),
            FieldType::I64 => Scalar::I64(raw as i64),
        }
    }

    fn le(&self, other: &Scalar) -> bool {
        match (self, other) {
            (Scalar::Bool(a), Scalar::Bool(b)) => a <= b,
            (Scalar::U32(a), Scalar::U32(b)) => a <= b,
            (Scalar::U64(a), Scalar::U64(b)) => a <= b,
            (Scalar::F32(a), Scalar::F32(b)) => a <= b,
            (Scalar::F64(a), Scalar::F64(b)) => a <= b,
            (Scalar::I32(a), Scalar::I32(b)) => a <= b,
            (Scalar::I64(a), Scalar::I64(b)) => a <= b,
            _ => false,
        }
    }
}

/// One aggregated window.
#[derive(Debug, Clone, PartialEq)]
pub struct SumWindow {
    /// Start of the window (inclusive); it spans `window_ns`.
    pub window_start: u64,
    /// Non-null points per selected field.
    pub npoints: Vec<u64>,
    /// Per-field sum of non-null values.
    pub sums: Vec<f64>,
    /// Per-field minimum, `None` when the field had no points.
    pub mins: Vec<Option<Scalar>>,
    /// Per-field maximum, `None` when the field had no points.
    pub maxs: Vec<Option<Scalar>>,
}

impl SumWindow {
    fn new(window_start: u64, nfields: usize) -> SumWindow {
        SumWindow {
            window_start,
            npoints: vec![0; nfields],
            sums: vec![0.0; nfields],
            mins: vec![None; nfields],
            maxs: vec![None; nfields],
        }
    }

    fn any_points(&self) -> bool {
        self.npoints.iter().any(|&n| n > 0)
    }

    fn accumulate(&mut self, j: usize, ftype: FieldType, raw: u64) {
        let v = Scalar::from_raw(ftype, raw);
        self.sums[j] += ftype.load_f64(raw);
        self.npoints[j] += 1;
        match &self.mins[j] {
            Some(cur) if cur.le(&v) => {}
            _ => self.mins[j] = Some(v),
        }
        match &self.maxs[j] {
            Some(cur) if v.le(cur) => {}
            _ => self.maxs[j] = Some(v),
        }
    }
}

/// The windowed aggregation operator.
#[derive(Debug)]
pub struct SumOp<'lk, 'm> {
    op: SelectOp<'lk, 'm>,
    op_index: usize,
    op_exhausted: bool,
    wq: WalQuery,
    wq_index: usize,

    window_ns: u64,
    grid_origin: u64,
    range_t0: u64,
    window: SumWindow,
    done: bool,
}

impl<'lk, 'm> SumOp<'lk, 'm> {
    /// Build the operator over `[t0, t1]` with `window_ns`-wide windows.
    pub fn new(
        lock: &'lk SeriesReadLock<'m>,
        field_names: &[String],
        t0: u64,
        t1: u64,
        window_ns: u64,
    ) -> Result<SumOp<'lk, 'm>> {
        // A zero window degenerates to per-point windows.
        let window_ns = window_ns.max(1);
        let start = (lock.time_first / window_ns * window_ns).max(t0);
        debug!(
            series = lock.series_name.as_str(),
            start, t1, window_ns, "windowed sum"
        );
        let wq = WalQuery::new(lock, start, t1)?;
        let op = SelectOp::first(lock, field_names, start, t1, u64::MAX)?;
        let nfields = op.fields().len();
        let mut sum_op = SumOp {
            op,
            op_index: 0,
            op_exhausted: false,
            wq,
            wq_index: 0,
            window_ns,
            grid_origin: start,
            range_t0: start,
            window: SumWindow::new(start, nfields),
            done: false,
        };
        if sum_op.op.npoints() == 0 && sum_op.op.is_last() {
            sum_op.op_exhausted = true;
        }
        Ok(sum_op)
    }

    /// The schema entries this operator aggregates, in yield order.
    pub fn fields(&self) -> &[tidestore_core::SchemaEntry] {
        self.op.fields()
    }

    /// Yield the next window holding at least one point, or `None` when
    /// both the chunk store and the WAL are exhausted.
    pub fn next_window(&mut self) -> Result<Option<SumWindow>> {
        if self.done {
            return Ok(None);
        }
        loop {
            let t = match self.peek_time()? {
                Some(t) => t,
                None => {
                    self.done = true;
                    if self.window.any_points() {
                        let nfields = self.window.npoints.len();
                        let finished =
                            std::mem::replace(&mut self.window, SumWindow::new(0, nfields));
                        return Ok(Some(finished));
                    }
                    return Ok(None);
                }
            };

            if t >= self.range_t0 + self.window_ns {
                // The stream moved past the current window.
                let next_start =
                    self.grid_origin + (t - self.grid_origin) / self.window_ns * self.window_ns;
                if self.window.any_points() {
                    let finished = std::mem::replace(
                        &mut self.window,
                        SumWindow::new(next_start, self.op.fields().len()),
                    );
                    self.range_t0 = next_start;
                    return Ok(Some(finished));
                }
                // Empty window: slide the grid forward without yielding.
                self.range_t0 = next_start;
                self.window.window_start = next_start;
            }

            self.consume_point()?;
        }
    }

    /// Timestamp of the next unconsumed point, select side first.
    fn peek_time(&mut self) -> Result<Option<u64>> {
        while !self.op_exhausted {
            if self.op_index < self.op.npoints() {
                return Ok(Some(self.op.timestamp(self.op_index)));
            }
            if self.op.is_last() {
                self.op_exhausted = true;
            } else {
                self.op.advance()?;
                self.op_index = 0;
            }
        }
        if self.wq_index < self.wq.nentries() {
            return Ok(Some(self.wq.entry(self.wq_index).time_ns()));
        }
        Ok(None)
    }

    fn consume_point(&mut self) -> Result<()> {
        if !self.op_exhausted {
            let i = self.op_index;
            for j in 0..self.op.fields().len() {
                if self.op.is_field_null(j, i) {
                    continue;
                }
                let ftype = self.op.fields()[j].ftype;
                let raw = self.op.field_raw_u64(j, i);
                self.window.accumulate(j, ftype, raw);
            }
            self.op_index += 1;
            return Ok(());
        }

        let entry = self.wq.entry(self.wq_index);
        for j in 0..self.op.fields().len() {
            let schema_index = self.op.fields()[j].index as usize;
            if entry.is_field_null(schema_index) {
                continue;
            }
            let ftype = self.op.fields()[j].ftype;
            let raw = entry.field_raw(schema_index);
            self.window.accumulate(j, ftype, raw);
        }
        self.wq_index += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_orderings() {
        assert!(Scalar::U64(3).le(&Scalar::U64(4)));
        assert!(!Scalar::I32(-1).le(&Scalar::I32(-2)));
        assert!(Scalar::F64(1.5).le(&Scalar::F64(1.5)));
        assert!(Scalar::from_raw(FieldType::I32, (-7i32 as u32) as u64).le(&Scalar::I32(0)));
    }

    #[test]
    fn test_window_accumulate() {
        let mut w = SumWindow::new(0, 2);
        w.accumulate(0, FieldType::U32, 5);
        w.accumulate(0, FieldType::U32, 2);
        w.accumulate(1, FieldType::F64, 1.25f64.to_bits());
        assert_eq!(w.npoints, vec![2, 1]);
        assert_eq!(w.sums[0], 7.0);
        assert_eq!(w.mins[0], Some(Scalar::U32(2)));
        assert_eq!(w.maxs[0], Some(Scalar::U32(5)));
        assert_eq!(w.sums[1], 1.25);
        assert!(w.any_points());
    }
}
