//! Typed accessors for reading buffered result rows.
//!
//! Enumerations drain their cursor into owned [`Value`] buffers while the
//! operation lock is held; the accessors here translate those buffers into
//! typed fields afterwards, distinguishing an absent row, a NULL cell, and
//! a present value.

use chrono::{Datelike, Local, NaiveDateTime, TimeZone};
use rusqlite::types::Value;
use rusqlite::{Row, Rows};

use crate::error::{CplError, Result};

/// Longest string a fetch returns; longer values are cut at a character
/// boundary.
pub(crate) const MAX_STRING: usize = 4095;

/// How a SQL NULL in the requested cell is reported.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum NullPolicy {
    /// NULL is indistinguishable from an absent row.
    NotFound,
    /// NULL is reported as `DbNull` so the caller can substitute a default.
    Null,
}

fn null_error(nulls: NullPolicy) -> CplError {
    match nulls {
        NullPolicy::NotFound => CplError::NotFound,
        NullPolicy::Null => CplError::DbNull,
    }
}

fn cell(row: &[Value], col: usize) -> Result<&Value> {
    row.get(col).ok_or_else(|| CplError::DbKeyNotFound(col.to_string()))
}

pub(crate) fn value_i64(row: &[Value], col: usize, nulls: NullPolicy) -> Result<i64> {
    match cell(row, col)? {
        Value::Null => Err(null_error(nulls)),
        Value::Integer(v) => Ok(*v),
        other => Err(CplError::DbInvalidType(format!(
            "column {col}: expected integer, found {other:?}"
        ))),
    }
}

pub(crate) fn value_u64(row: &[Value], col: usize, nulls: NullPolicy) -> Result<u64> {
    value_i64(row, col, nulls).map(|v| v as u64)
}

pub(crate) fn value_string(row: &[Value], col: usize, nulls: NullPolicy) -> Result<String> {
    match cell(row, col)? {
        Value::Null => Err(null_error(nulls)),
        Value::Text(s) => Ok(truncate_to_limit(s)),
        other => Err(CplError::DbInvalidType(format!(
            "column {col}: expected text, found {other:?}"
        ))),
    }
}

/// Read a wall-clock timestamp cell and convert it to UNIX seconds.
pub(crate) fn value_timestamp(row: &[Value], col: usize, nulls: NullPolicy) -> Result<i64> {
    match cell(row, col)? {
        Value::Null => Err(null_error(nulls)),
        Value::Text(s) => Ok(wall_clock_to_unix(parse_wall_clock(s)?)),
        other => Err(CplError::DbInvalidType(format!(
            "column {col}: expected timestamp text, found {other:?}"
        ))),
    }
}

/// Map a null-aware read into an optional value.
pub(crate) fn optional<T>(r: Result<T>) -> Result<Option<T>> {
    match r {
        Ok(v) => Ok(Some(v)),
        Err(CplError::DbNull) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Buffer the current row's first `cols` cells.
pub(crate) fn row_values(row: &Row<'_>, cols: usize) -> rusqlite::Result<Vec<Value>> {
    let mut buf = Vec::with_capacity(cols);
    for i in 0..cols {
        buf.push(row.get::<usize, Value>(i)?);
    }
    Ok(buf)
}

/// Buffer the whole result set, `cols` cells per row.
pub(crate) fn drain_rows(rows: &mut Rows<'_>, cols: usize) -> rusqlite::Result<Vec<Vec<Value>>> {
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        out.push(row_values(row, cols)?);
    }
    Ok(out)
}

fn truncate_to_limit(s: &str) -> String {
    if s.len() <= MAX_STRING {
        return s.to_owned();
    }
    let mut end = MAX_STRING;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_owned()
}

/// Parse `YYYY-MM-DD HH:MM:SS`, dropping any sub-second digits.
pub(crate) fn parse_wall_clock(text: &str) -> Result<NaiveDateTime> {
    let seconds = text.split('.').next().unwrap_or(text);
    NaiveDateTime::parse_from_str(seconds, "%Y-%m-%d %H:%M:%S")
        .map_err(|e| CplError::DbInvalidType(format!("timestamp {text:?}: {e}")))
}

/// Convert a local wall-clock timestamp to UNIX seconds.
///
/// The six fields are taken as standard local time; if the resulting
/// instant falls in daylight-saving time, one hour is subtracted. This
/// mirrors what the write side stores and keeps the on-disk format
/// compatible with deployments that record server-local timestamps.
pub(crate) fn wall_clock_to_unix(ts: NaiveDateTime) -> i64 {
    let std_offset = standard_offset(ts.year());
    let t = ts.and_utc().timestamp() - i64::from(std_offset);
    if local_offset_at(t) > std_offset {
        t - 3600
    } else {
        t
    }
}

/// The zone's offset outside daylight-saving time: the smaller of the
/// January and July offsets, which also holds south of the equator.
fn standard_offset(year: i32) -> i32 {
    let offset_at_noon = |month: u32| {
        Local
            .with_ymd_and_hms(year, month, 1, 12, 0, 0)
            .earliest()
            .map(|dt| dt.offset().local_minus_utc())
            .unwrap_or(0)
    };
    offset_at_noon(1).min(offset_at_noon(7))
}

fn local_offset_at(epoch: i64) -> i32 {
    Local
        .timestamp_opt(epoch, 0)
        .earliest()
        .map(|dt| dt.offset().local_minus_utc())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_cells() {
        let row = vec![Value::Integer(42), Value::Null];
        assert_eq!(value_i64(&row, 0, NullPolicy::NotFound).unwrap(), 42);
        assert!(matches!(
            value_i64(&row, 1, NullPolicy::NotFound),
            Err(CplError::NotFound)
        ));
        assert!(matches!(
            value_i64(&row, 1, NullPolicy::Null),
            Err(CplError::DbNull)
        ));
        assert!(matches!(
            value_i64(&row, 2, NullPolicy::NotFound),
            Err(CplError::DbKeyNotFound(_))
        ));
    }

    #[test]
    fn type_mismatch_is_reported() {
        let row = vec![Value::Text("x".into())];
        assert!(matches!(
            value_i64(&row, 0, NullPolicy::NotFound),
            Err(CplError::DbInvalidType(_))
        ));
        let row = vec![Value::Integer(7)];
        assert!(matches!(
            value_string(&row, 0, NullPolicy::NotFound),
            Err(CplError::DbInvalidType(_))
        ));
    }

    #[test]
    fn optional_maps_null_only() {
        let row = vec![Value::Null, Value::Integer(1)];
        assert_eq!(optional(value_i64(&row, 0, NullPolicy::Null)).unwrap(), None);
        assert_eq!(
            optional(value_i64(&row, 1, NullPolicy::Null)).unwrap(),
            Some(1)
        );
        assert!(optional(value_i64(&row, 5, NullPolicy::Null)).is_err());
    }

    #[test]
    fn long_strings_are_cut_at_char_boundaries() {
        let long = "é".repeat(4000); // 8000 bytes
        let row = vec![Value::Text(long)];
        let s = value_string(&row, 0, NullPolicy::NotFound).unwrap();
        assert!(s.len() <= MAX_STRING);
        assert!(s.chars().all(|c| c == 'é'));
    }

    #[test]
    fn sub_seconds_are_dropped() {
        let a = parse_wall_clock("2024-03-01 10:20:30").unwrap();
        let b = parse_wall_clock("2024-03-01 10:20:30.125").unwrap();
        assert_eq!(a, b);
        assert!(parse_wall_clock("not a timestamp").is_err());
    }

    #[test]
    fn wall_clock_round_trips_through_local_time() {
        // What the database writes with datetime('now','localtime') must
        // read back as the moment it was written.
        let now = Local::now();
        let written = now.naive_local().format("%Y-%m-%d %H:%M:%S").to_string();
        let read = wall_clock_to_unix(parse_wall_clock(&written).unwrap());
        assert_eq!(read, now.timestamp());
    }
}
