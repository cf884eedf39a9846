//! Projection of `DuckDB` values into JSON and display text.
//!
//! Row cells keep their primitive JSON shape (string, integer, float,
//! boolean, null); everything else — dates, timestamps, decimals, blobs,
//! nested types — is stringified before it crosses the wire.

use chrono::{NaiveTime, TimeZone, Utc};
use duckdb::types::{TimeUnit, ValueRef};
use serde_json::{Number, Value as JsonValue};

/// Convert one cell to its JSON wire shape.
pub fn json_value(value: &ValueRef) -> JsonValue {
    match value {
        ValueRef::Null => JsonValue::Null,
        ValueRef::Boolean(b) => JsonValue::Bool(*b),
        ValueRef::TinyInt(n) => JsonValue::from(i64::from(*n)),
        ValueRef::SmallInt(n) => JsonValue::from(i64::from(*n)),
        ValueRef::Int(n) => JsonValue::from(i64::from(*n)),
        ValueRef::BigInt(n) => JsonValue::from(*n),
        ValueRef::HugeInt(n) => i64::try_from(*n)
            .map_or_else(|_| JsonValue::from(n.to_string()), JsonValue::from),
        ValueRef::UTinyInt(n) => JsonValue::from(u64::from(*n)),
        ValueRef::USmallInt(n) => JsonValue::from(u64::from(*n)),
        ValueRef::UInt(n) => JsonValue::from(u64::from(*n)),
        ValueRef::UBigInt(n) => JsonValue::from(*n),
        ValueRef::Float(n) => float_json(f64::from(*n)),
        ValueRef::Double(n) => float_json(*n),
        ValueRef::Decimal(d) => JsonValue::from(d.to_string()),
        ValueRef::Text(bytes) => {
            JsonValue::from(String::from_utf8_lossy(bytes).into_owned())
        }
        ValueRef::Timestamp(unit, val) => JsonValue::from(format_timestamp(*unit, *val)),
        ValueRef::Date32(days) => JsonValue::from(format_date(*days)),
        ValueRef::Time64(unit, val) => JsonValue::from(format_time(*unit, *val)),
        ValueRef::Blob(bytes) => JsonValue::from(format!("<{} bytes>", bytes.len())),
        other => JsonValue::from(format!("{other:?}")),
    }
}

fn float_json(f: f64) -> JsonValue {
    Number::from_f64(f).map_or(JsonValue::Null, JsonValue::Number)
}

/// Render one cell as text; `None` for NULL.
pub fn display_value(value: &ValueRef) -> Option<String> {
    match json_value(value) {
        JsonValue::Null => None,
        JsonValue::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

/// Read a cell as a float when it holds any numeric storage type.
pub fn value_to_f64(value: &ValueRef) -> Option<f64> {
    match value {
        ValueRef::TinyInt(n) => Some(f64::from(*n)),
        ValueRef::SmallInt(n) => Some(f64::from(*n)),
        ValueRef::Int(n) => Some(f64::from(*n)),
        #[allow(clippy::cast_precision_loss)]
        ValueRef::BigInt(n) => Some(*n as f64),
        #[allow(clippy::cast_precision_loss)]
        ValueRef::HugeInt(n) => Some(*n as f64),
        ValueRef::UTinyInt(n) => Some(f64::from(*n)),
        ValueRef::USmallInt(n) => Some(f64::from(*n)),
        ValueRef::UInt(n) => Some(f64::from(*n)),
        #[allow(clippy::cast_precision_loss)]
        ValueRef::UBigInt(n) => Some(*n as f64),
        ValueRef::Float(n) => Some(f64::from(*n)),
        ValueRef::Double(n) => Some(*n),
        ValueRef::Decimal(d) => d.to_string().parse().ok(),
        _ => None,
    }
}

/// Format a timestamp as `YYYY-MM-DD HH:MM:SS.mmm`.
pub fn format_timestamp(unit: TimeUnit, value: i64) -> String {
    let micros = match unit {
        TimeUnit::Second => value * 1_000_000,
        TimeUnit::Millisecond => value * 1_000,
        TimeUnit::Microsecond => value,
        TimeUnit::Nanosecond => value / 1_000,
    };

    Utc.timestamp_micros(micros).single().map_or_else(
        || "INVALID_TIMESTAMP".into(),
        |dt| dt.format("%Y-%m-%d %H:%M:%S%.3f").to_string(),
    )
}

/// Format a date (days since Unix epoch) as `YYYY-MM-DD`.
pub fn format_date(days: i32) -> String {
    // Unix epoch is 1970-01-01, which is day 719,163 in the CE calendar
    chrono::NaiveDate::from_num_days_from_ce_opt(days + 719_163)
        .map_or_else(|| "INVALID_DATE".into(), |d| d.format("%Y-%m-%d").to_string())
}

/// Format a time-of-day value as `HH:MM:SS`.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn format_time(unit: TimeUnit, value: i64) -> String {
    let micros = match unit {
        TimeUnit::Second => value * 1_000_000,
        TimeUnit::Millisecond => value * 1_000,
        TimeUnit::Microsecond => value,
        TimeUnit::Nanosecond => value / 1_000,
    };
    let secs = (micros / 1_000_000).max(0) as u32;
    let nanos = ((micros % 1_000_000).max(0) as u32) * 1_000;
    NaiveTime::from_num_seconds_from_midnight_opt(secs, nanos)
        .map_or_else(|| "INVALID_TIME".into(), |t| t.format("%H:%M:%S").to_string())
}

/// Clamp a float into a JSON-safe number: NaN/Inf become null, integral
/// values inside the 2^53 window come back as integers.
#[allow(clippy::cast_possible_truncation)]
pub fn safe_number(value: f64) -> JsonValue {
    if value.is_nan() || value.is_infinite() {
        return JsonValue::Null;
    }
    if value.fract() == 0.0 && value.abs() < 9_007_199_254_740_992.0 {
        return JsonValue::from(value as i64);
    }
    float_json(value)
}

/// Round to four decimal places.
pub fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_value_primitives() {
        assert_eq!(json_value(&ValueRef::Null), JsonValue::Null);
        assert_eq!(json_value(&ValueRef::Boolean(true)), JsonValue::Bool(true));
        assert_eq!(json_value(&ValueRef::BigInt(12)), JsonValue::from(12));
        assert_eq!(
            json_value(&ValueRef::Text(b"hello")),
            JsonValue::from("hello")
        );
    }

    #[test]
    fn test_json_value_stringifies_exotics() {
        let date = json_value(&ValueRef::Date32(0));
        assert_eq!(date, JsonValue::from("1970-01-01"));

        let big = json_value(&ValueRef::HugeInt(i128::from(i64::MAX) + 1));
        assert!(big.is_string());
    }

    #[test]
    fn test_non_finite_floats_become_null() {
        assert_eq!(json_value(&ValueRef::Double(f64::NAN)), JsonValue::Null);
        assert_eq!(
            json_value(&ValueRef::Double(f64::INFINITY)),
            JsonValue::Null
        );
    }

    #[test]
    fn test_display_value() {
        assert_eq!(display_value(&ValueRef::Null), None);
        assert_eq!(
            display_value(&ValueRef::Text(b"x")),
            Some("x".to_string())
        );
        assert_eq!(
            display_value(&ValueRef::Double(1.5)),
            Some("1.5".to_string())
        );
        assert_eq!(
            display_value(&ValueRef::Boolean(false)),
            Some("false".to_string())
        );
    }

    #[test]
    fn test_format_timestamp_truncates_to_month_label() {
        let formatted = format_timestamp(TimeUnit::Second, 0);
        assert_eq!(formatted, "1970-01-01 00:00:00.000");
        assert_eq!(&formatted[..7], "1970-01");
    }

    #[test]
    fn test_safe_number() {
        assert_eq!(safe_number(4.0), JsonValue::from(4));
        assert_eq!(safe_number(4.25), JsonValue::from(4.25));
        assert_eq!(safe_number(f64::NAN), JsonValue::Null);
    }

    #[test]
    fn test_round4() {
        assert!((round4(1.234_567) - 1.2346).abs() < f64::EPSILON);
    }
}
