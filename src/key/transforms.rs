//! Stock argument transforms.
//!
//! Each transform coarsens a high-cardinality argument so that logically
//! equivalent calls share a cache entry, e.g. a date of service bucketed to
//! its year and month, or a zipcode cut to its first four digits.

use super::deriver::ArgTransform;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;
use std::fmt::Write;
use std::sync::Arc;

/// Formats a date-like value with a `chrono` format string.
///
/// Accepts RFC 3339 strings, `YYYY-MM-DD[THH:MM:SS[.f]]` strings and integer
/// unix seconds. Null and unparsable values pass through unchanged.
pub fn date_bucket(fmt: impl Into<String>) -> ArgTransform {
    let fmt = fmt.into();
    Arc::new(move |value: &Value| {
        let Some(dt) = parse_datetime(value) else {
            return value.clone();
        };
        // An invalid format string fails at render time; keep the raw value.
        let mut out = String::new();
        match write!(out, "{}", dt.format(&fmt)) {
            Ok(()) => Value::String(out),
            Err(_) => value.clone(),
        }
    })
}

/// `YYYYMM`.
pub fn year_month() -> ArgTransform {
    date_bucket("%Y%m")
}

/// First `n` characters of the value's string form.
///
/// Empty values (null, `""`, zero, `false`, empty arrays and objects) become
/// null, so a missing zipcode keys the same however the caller spells it.
pub fn truncate(n: usize) -> ArgTransform {
    Arc::new(move |value: &Value| {
        if is_empty_value(value) {
            return Value::Null;
        }
        let text = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        Value::String(text.chars().take(n).collect())
    })
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}

/// Replaces any value with `value`, taking the parameter out of the key.
pub fn constant(value: impl Into<Value>) -> ArgTransform {
    let value = value.into();
    Arc::new(move |_: &Value| value.clone())
}

/// Resolves a transform by its configuration name.
///
/// `year_month`, `ignore`, `truncate:N`, `date:FORMAT`.
pub fn by_name(name: &str) -> Option<ArgTransform> {
    match name {
        "year_month" => return Some(year_month()),
        "ignore" => return Some(constant(Value::Bool(true))),
        _ => {}
    }
    let (kind, arg) = name.split_once(':')?;
    match kind {
        "truncate" => arg.trim().parse().ok().map(truncate),
        "date" if !arg.is_empty() => Some(date_bucket(arg)),
        _ => None,
    }
}

fn parse_datetime(value: &Value) -> Option<NaiveDateTime> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.naive_utc());
            }
            if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
                return Some(dt);
            }
            if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
                return Some(dt);
            }
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        }
        Value::Number(n) => n
            .as_i64()
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
            .map(|dt| dt.naive_utc()),
        _ => None,
    }
}
