//! Exasol native types to canonical types.
//!
//! DECIMAL columns with scale 0 become integers only while the precision is
//! small enough to survive a round trip through a double; wider ones stay
//! strings so no digits are lost.

use crate::error::{RunnerError, RunnerResult};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use quarry_core::{date_value, datetime_value, CanonicalType};
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

/// Smallest DECIMAL precision kept as a string.
pub const INTEGER_PRECISION_LIMIT: u32 = 16;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeType {
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub precision: Option<u32>,
    #[serde(default)]
    pub scale: Option<u32>,
}

impl NativeType {
    pub fn new(type_name: &str) -> Self {
        Self {
            type_name: type_name.to_string(),
            precision: None,
            scale: None,
        }
    }

    pub fn decimal(precision: u32, scale: u32) -> Self {
        Self {
            type_name: "DECIMAL".to_string(),
            precision: Some(precision),
            scale: Some(scale),
        }
    }
}

pub fn canonical_type(native: &NativeType) -> CanonicalType {
    match native.type_name.as_str() {
        "DECIMAL" => match (native.scale.unwrap_or(0), native.precision.unwrap_or(0)) {
            (0, p) if p < INTEGER_PRECISION_LIMIT => CanonicalType::Integer,
            (0, _) => CanonicalType::String,
            _ => CanonicalType::Float,
        },
        "DATE" => CanonicalType::Date,
        "TIMESTAMP" => CanonicalType::Datetime,
        _ => CanonicalType::String,
    }
}

/// Converts one cell into the representation of its canonical type.
pub fn map_value(value: &Value, native: &NativeType) -> RunnerResult<Value> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    match canonical_type(native) {
        CanonicalType::Integer => to_integer(value),
        CanonicalType::Float => to_float(value),
        CanonicalType::Date => Ok(date_value(parse_date(text(value)?)?)),
        CanonicalType::Datetime => Ok(datetime_value(parse_timestamp(text(value)?)?)),
        CanonicalType::String if native.type_name == "DECIMAL" => match value {
            Value::Number(n) => Ok(Value::String(n.to_string())),
            other => Ok(other.clone()),
        },
        _ => Ok(value.clone()),
    }
}

fn text(value: &Value) -> RunnerResult<&str> {
    value
        .as_str()
        .ok_or_else(|| RunnerError::Format(format!("expected a string, got {}", value)))
}

fn to_integer(value: &Value) -> RunnerResult<Value> {
    let parsed = match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    parsed
        .map(Value::from)
        .ok_or_else(|| RunnerError::Format(format!("{} is not an integer", value)))
}

fn to_float(value: &Value) -> RunnerResult<Value> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed
        .and_then(Number::from_f64)
        .map(Value::Number)
        .ok_or_else(|| RunnerError::Format(format!("{} is not a number", value)))
}

fn field(s: &str, from: usize, to: usize) -> RunnerResult<u32> {
    s.get(from..to)
        .and_then(|f| f.parse::<u32>().ok())
        .ok_or_else(|| RunnerError::Format(format!("malformed date/time value \"{}\"", s)))
}

/// `YYYY-MM-DD`, read by position.
pub fn parse_date(s: &str) -> RunnerResult<NaiveDate> {
    let (year, month, day) = (field(s, 0, 4)?, field(s, 5, 7)?, field(s, 8, 10)?);
    NaiveDate::from_ymd_opt(year as i32, month, day)
        .ok_or_else(|| RunnerError::Format(format!("invalid date \"{}\"", s)))
}

/// `YYYY-MM-DD HH:MM:SS[.ffffff]`, read by position. Fractions shorter than
/// six digits are right-padded.
pub fn parse_timestamp(s: &str) -> RunnerResult<NaiveDateTime> {
    let date = parse_date(s)?;
    let (hour, minute, second) = (field(s, 11, 13)?, field(s, 14, 16)?, field(s, 17, 19)?);
    let micros = if s.len() > 20 {
        let digits = s.get(20..s.len().min(26)).unwrap_or_default();
        format!("{:0<6}", digits)
            .parse::<u32>()
            .map_err(|_| RunnerError::Format(format!("malformed fraction in \"{}\"", s)))?
    } else {
        0
    };
    let time = NaiveTime::from_hms_micro_opt(hour, minute, second, micros)
        .ok_or_else(|| RunnerError::Format(format!("invalid timestamp \"{}\"", s)))?;
    Ok(NaiveDateTime::new(date, time))
}
