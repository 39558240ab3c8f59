//! Trapezoidal integration over a time range.
//!
//! Every non-null sample from the chunk store and the WAL contributes in
//! timestamp order; for consecutive samples at `prev_t` and `t`, each field
//! adds `0.5 · (prev_v + v) · (t − prev_t) / 1e9`.  A null anywhere makes
//! that field's result null (the flag sticks).  Zero points: every field is
//! null.  Exactly one point: the integral is defined as that sample value.
//!
//! `t0_ns`/`t1_ns` report the actual first and last integrated timestamps,
//! so callers can divide for the average over the real span.

use crate::select::SelectOp;
use crate::series::SeriesReadLock;
use crate::wal::WalQuery;
use tidestore_core::Result;
use tracing::debug;

/// The result of a trapezoidal integration.
#[derive(Debug, Clone, PartialEq)]
pub struct IntegralOp {
    /// Timestamp of the first integrated point (0 when no points).
    pub t0_ns: u64,
    /// Timestamp of the last integrated point (0 when no points).
    pub t1_ns: u64,
    /// Per-field integral, in value·seconds.
    pub integral: Vec<f64>,
    /// Per-field null flag; sticky across the whole range.
    pub is_null: Vec<bool>,
}

impl IntegralOp {
    /// Integrate the selected fields over `[t0, t1]`.
    pub fn compute(
        lock: &SeriesReadLock<'_>,
        field_names: &[String],
        t0: u64,
        t1: u64,
    ) -> Result<IntegralOp> {
        let wq = WalQuery::new(lock, t0, t1)?;
        let mut op = SelectOp::first(lock, field_names, t0, t1, u64::MAX)?;
        let nfields = op.fields().len();

        debug!(
            series = lock.series_name.as_str(),
            t0, t1, "integral"
        );

        let mut result = IntegralOp {
            t0_ns: 0,
            t1_ns: 0,
            integral: vec![0.0; nfields],
            is_null: vec![false; nfields],
        };
        let mut prev_t = 0u64;
        let mut prev_v = vec![0.0f64; nfields];

        while op.npoints() > 0 {
            for i in 0..op.npoints() {
                let t = op.timestamp(i);
                result.t1_ns = t;

                if prev_t == 0 {
                    result.t0_ns = t;
                    prev_t = t;
                    for j in 0..nfields {
                        result.is_null[j] = op.is_field_null(j, i);
                        prev_v[j] = op.field_f64(j, i);
                    }
                    continue;
                }

                let dt = (t - prev_t) as f64 / 1e9;
                for j in 0..nfields {
                    let v = op.field_f64(j, i);
                    result.integral[j] += 0.5 * (prev_v[j] + v) * dt;
                    prev_v[j] = v;
                    result.is_null[j] |= op.is_field_null(j, i);
                }
                prev_t = t;
            }
            if op.is_last() {
                break;
            }
            op.advance()?;
        }

        for entry in wq.iter() {
            let t = entry.time_ns();
            result.t1_ns = t;

            if prev_t == 0 {
                result.t0_ns = t;
                prev_t = t;
                for j in 0..nfields {
                    let schema_index = op.fields()[j].index as usize;
                    result.is_null[j] = entry.is_field_null(schema_index);
                    prev_v[j] = op.fields()[j].ftype.load_f64(entry.field_raw(schema_index));
                }
                continue;
            }

            let dt = (t - prev_t) as f64 / 1e9;
            for j in 0..nfields {
                let schema_index = op.fields()[j].index as usize;
                let v = op.fields()[j].ftype.load_f64(entry.field_raw(schema_index));
                result.integral[j] += 0.5 * (prev_v[j] + v) * dt;
                prev_v[j] = v;
                result.is_null[j] |= entry.is_field_null(schema_index);
            }
            prev_t = t;
        }

        if result.t0_ns == 0 {
            // No points at all.
            for flag in &mut result.is_null {
                *flag = true;
            }
        } else if result.t0_ns == result.t1_ns {
            // A single point: report its value even though the span is zero.
            result.integral.copy_from_slice(&prev_v);
        }
        Ok(result)
    }
}
