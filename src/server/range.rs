//! Byte-range header evaluation.
//! Lenient by design: an unparsable `Range` header degrades to full-content
//! delivery instead of failing the request; only an interval that is empty
//! after clamping is unsatisfiable.

use once_cell::sync::Lazy;
use regex::Regex;

static BYTES_RANGE: Lazy<Regex> = Lazy::new(|| Regex::new(r"bytes=(\d*)-(\d*)").unwrap());

/// Outcome of evaluating an optional `Range` header against a total size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeOutcome {
    /// No range requested, or the header did not parse: serve everything.
    Full,
    /// Serve the inclusive interval `[start, end]`.
    Slice { start: u64, end: u64 },
    /// The interval is empty after clamping (start past end-of-file).
    Unsatisfiable,
}

impl RangeOutcome {
    /// Number of body bytes a `Slice` covers.
    pub fn slice_len(start: u64, end: u64) -> u64 {
        end - start + 1
    }
}

/// Evaluate `header` (the raw `Range` value, if any) against `size` bytes.
/// Either bound may be omitted: a missing start means 0, a missing or
/// oversized end is clamped to `size - 1`.
pub fn evaluate(header: Option<&str>, size: u64) -> RangeOutcome {
    let Some(raw) = header else {
        return RangeOutcome::Full;
    };
    let Some(caps) = BYTES_RANGE.captures(raw) else {
        return RangeOutcome::Full;
    };
    // Signed arithmetic so an empty file (last = -1) makes every explicit
    // range unsatisfiable rather than wrapping.
    let last = size as i64 - 1;
    let start: i64 = if caps[1].is_empty() {
        0
    } else {
        caps[1].parse().unwrap_or(i64::MAX)
    };
    let mut end: i64 = if caps[2].is_empty() {
        last
    } else {
        caps[2].parse().unwrap_or(i64::MAX)
    };
    if end > last {
        end = last;
    }
    if start > end {
        RangeOutcome::Unsatisfiable
    } else {
        RangeOutcome::Slice {
            start: start as u64,
            end: end as u64,
        }
    }
}
