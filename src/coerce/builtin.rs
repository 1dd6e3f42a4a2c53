//! Built-in converters.

use super::Coercers;
use crate::error::CoercionError;
use crate::schema::TypeTag;
use crate::value::{float_json, Value};
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use rust_decimal::Decimal;
use serde_json::Value as Json;
use std::str::FromStr;

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

const TIME_FORMATS: &[&str] = &["%H:%M:%S%.f", "%H:%M"];

pub(super) fn register(c: &mut Coercers) {
    c.register_serializer("boolean", |_, _, v| match v {
        Value::Bool(b) => Ok(Json::Bool(*b)),
        other => Ok(other.to_json_lossy()),
    });
    c.register_deserializer("boolean", |_, _, j| deserialize_bool(j));

    c.register_serializer("integer", |_, _, v| match v {
        Value::Integer(n) => Ok(Json::from(*n)),
        other => Ok(other.to_json_lossy()),
    });
    c.register_deserializer("integer", |_, _, j| deserialize_integer(j));

    c.register_serializer("float", |_, _, v| match v.as_f64() {
        Some(f) => Ok(float_json(f)),
        None => Ok(v.to_json_lossy()),
    });
    c.register_deserializer("float", |_, _, j| deserialize_float(j).map(Value::Float));

    for tag in ["decimal", "numeric"] {
        c.register_serializer(tag, |_, _, v| serialize_decimal(v));
        c.register_deserializer(tag, |_, _, j| deserialize_decimal(j));
    }

    c.register_serializer("string", |_, _, v| Ok(v.to_json_lossy()));
    c.register_deserializer("string", |_, _, j| match j {
        Json::String(s) => Ok(Value::Text(s.clone())),
        Json::Number(n) => Ok(Value::Text(n.to_string())),
        Json::Bool(b) => Ok(Value::Text(b.to_string())),
        other => Err(CoercionError::mismatch("string", json_kind(other))),
    });

    c.register_serializer("uuid", |_, _, v| Ok(v.to_json_lossy()));
    c.register_deserializer("uuid", |_, _, j| {
        let s = expect_str(j, "uuid")?;
        uuid::Uuid::parse_str(s)
            .map(Value::Uuid)
            .map_err(|e| CoercionError::Invalid(format!("invalid uuid '{}': {}", s, e)))
    });

    c.register_serializer("json", |_, _, v| Ok(v.to_json_lossy()));
    c.register_deserializer("json", |_, _, j| Ok(Value::Json(j.clone())));

    c.register_serializer("datetime", |_, _, v| Ok(serialize_temporal(v)));
    c.register_serializer("datetimetz", |_, _, v| Ok(serialize_temporal(v)));
    c.register_serializer("date", |_, _, v| Ok(serialize_temporal(v)));
    c.register_serializer("time", |_, _, v| Ok(serialize_temporal(v)));
    c.register_deserializer("datetime", |_, _, j| {
        let s = expect_str(j, "datetime")?;
        parse_datetime(s).map(|d| Value::DateTime(d.naive_local()))
    });
    c.register_deserializer("datetimetz", |_, _, j| {
        let s = expect_str(j, "datetime")?;
        parse_datetime(s).map(Value::DateTimeTz)
    });
    c.register_deserializer("date", |_, _, j| {
        let s = expect_str(j, "date")?;
        match NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d") {
            Ok(d) => Ok(Value::Date(d)),
            Err(_) => parse_datetime(s).map(|d| Value::Date(d.date_naive())),
        }
    });
    c.register_deserializer("time", |_, _, j| {
        let s = expect_str(j, "time")?;
        TIME_FORMATS
            .iter()
            .find_map(|f| NaiveTime::parse_from_str(s.trim(), f).ok())
            .map(Value::Time)
            .map(Ok)
            .unwrap_or_else(|| parse_datetime(s).map(|d| Value::Time(d.time())))
    });

    c.register_serializer("interval", |_, _, v| match v {
        Value::Interval(d) => Ok(float_json(total_seconds(d))),
        other => Ok(other.to_json_lossy()),
    });
    c.register_deserializer("interval", |_, _, j| {
        let seconds = deserialize_float(j)?;
        let micros = (seconds * 1_000_000.0).round();
        if !micros.is_finite() || micros.abs() > i64::MAX as f64 {
            return Err(CoercionError::Invalid(format!("interval out of range: {}", seconds)));
        }
        Ok(Value::Interval(Duration::microseconds(micros as i64)))
    });

    c.register_serializer("array", |c, tag, v| {
        let (TypeTag::Array(item), Value::Array(items)) = (tag, v) else {
            return Ok(v.to_json_lossy());
        };
        items
            .iter()
            .map(|datum| c.serialize_value(item, datum))
            .collect::<Result<Vec<_>, _>>()
            .map(Json::Array)
    });
    c.register_deserializer("array", |c, tag, j| {
        let Json::Array(items) = j else {
            return Err(CoercionError::mismatch("array", json_kind(j)));
        };
        let item = match tag {
            TypeTag::Array(item) => item.as_ref(),
            _ => return Ok(Value::from_json_lossy(j)),
        };
        items
            .iter()
            .map(|datum| c.deserialize_value(item, datum))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array)
    });
}

fn json_kind(j: &Json) -> &'static str {
    match j {
        Json::Null => "null",
        Json::Bool(_) => "boolean",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "array",
        Json::Object(_) => "object",
    }
}

fn expect_str<'a>(j: &'a Json, expected: &str) -> Result<&'a str, CoercionError> {
    j.as_str().ok_or_else(|| CoercionError::mismatch(expected, json_kind(j)))
}

fn deserialize_bool(j: &Json) -> Result<Value, CoercionError> {
    match j {
        Json::Bool(b) => Ok(Value::Bool(*b)),
        Json::Number(n) if n.as_i64() == Some(0) => Ok(Value::Bool(false)),
        Json::Number(n) if n.as_i64() == Some(1) => Ok(Value::Bool(true)),
        Json::String(s) if s.eq_ignore_ascii_case("true") => Ok(Value::Bool(true)),
        Json::String(s) if s.eq_ignore_ascii_case("false") => Ok(Value::Bool(false)),
        other => Err(CoercionError::mismatch("boolean", json_kind(other))),
    }
}

fn deserialize_integer(j: &Json) -> Result<Value, CoercionError> {
    match j {
        Json::Number(n) => match n.as_i64() {
            Some(i) => Ok(Value::Integer(i)),
            None => {
                let f = n.as_f64().unwrap_or(f64::NAN);
                if f.is_finite() && f.abs() < i64::MAX as f64 {
                    Ok(Value::Integer(f.trunc() as i64))
                } else {
                    Err(CoercionError::Invalid(format!("integer out of range: {}", n)))
                }
            }
        },
        Json::String(s) => s
            .trim()
            .parse::<i64>()
            .map(Value::Integer)
            .map_err(|_| CoercionError::Invalid(format!("invalid literal for integer: '{}'", s))),
        Json::Bool(b) => Ok(Value::Integer(i64::from(*b))),
        other => Err(CoercionError::mismatch("integer", json_kind(other))),
    }
}

fn deserialize_float(j: &Json) -> Result<f64, CoercionError> {
    match j {
        Json::Number(n) => n
            .as_f64()
            .ok_or_else(|| CoercionError::Invalid(format!("invalid number: {}", n))),
        Json::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| CoercionError::Invalid(format!("invalid literal for number: '{}'", s))),
        other => Err(CoercionError::mismatch("number", json_kind(other))),
    }
}

fn deserialize_decimal(j: &Json) -> Result<Value, CoercionError> {
    let text = match j {
        Json::Number(n) => n.to_string(),
        Json::String(s) => s.trim().to_string(),
        other => return Err(CoercionError::mismatch("decimal", json_kind(other))),
    };
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .map(Value::Decimal)
        .map_err(|_| CoercionError::Invalid(format!("invalid literal for decimal: '{}'", text)))
}

/// Decimal goes through its text form so `2.12` lands on the nearest float, `2.12`.
fn serialize_decimal(v: &Value) -> Result<Json, CoercionError> {
    match v {
        Value::Decimal(d) => d
            .to_string()
            .parse::<f64>()
            .map(float_json)
            .map_err(|e| CoercionError::Invalid(e.to_string())),
        other => match other.as_f64() {
            Some(f) => Ok(float_json(f)),
            None => Ok(other.to_json_lossy()),
        },
    }
}

/// Microseconds first, then one division, so `7200.000012` comes back exactly.
fn total_seconds(d: &Duration) -> f64 {
    match d.num_microseconds() {
        Some(us) => us as f64 / 1_000_000.0,
        None => d.num_milliseconds() as f64 / 1_000.0,
    }
}

fn fraction_format(nanos: u32) -> &'static str {
    if nanos == 0 {
        ""
    } else {
        "%.6f"
    }
}

/// ISO-8601; fractional seconds appear only when non-zero, with microsecond precision.
fn serialize_temporal(v: &Value) -> Json {
    let text = match v {
        Value::DateTime(d) => d
            .format(&format!("%Y-%m-%dT%H:%M:%S{}", fraction_format(d.nanosecond())))
            .to_string(),
        Value::DateTimeTz(d) => d
            .format(&format!("%Y-%m-%dT%H:%M:%S{}%:z", fraction_format(d.nanosecond())))
            .to_string(),
        Value::Date(d) => d.format("%Y-%m-%d").to_string(),
        Value::Time(t) => t
            .format(&format!("%H:%M:%S{}", fraction_format(t.nanosecond())))
            .to_string(),
        other => return other.to_json_lossy(),
    };
    Json::String(text)
}

/// RFC 3339 first, then naive forms read as UTC, then a bare date at midnight.
fn parse_datetime(s: &str) -> Result<DateTime<FixedOffset>, CoercionError> {
    let s = s.trim();
    if let Ok(d) = DateTime::parse_from_rfc3339(s) {
        return Ok(d);
    }
    let utc = FixedOffset::east_opt(0).ok_or_else(|| CoercionError::Invalid("utc offset".into()))?;
    for f in DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, f) {
            return Ok(naive.and_utc().with_timezone(&utc));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return Ok(naive.and_utc().with_timezone(&utc));
        }
    }
    Err(CoercionError::Invalid(format!("unknown datetime format: '{}'", s)))
}
