//! Flattens Prometheus vectors and matrices into canonical rows.

use crate::error::{RunnerError, RunnerResult};
use chrono::DateTime;
use quarry_core::{datetime_value, CanonicalColumn, CanonicalType, QueryData, Row};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeriesShape {
    /// Matrix: every series carries `values: [[ts, v], ...]`.
    Range,
    /// Vector: every series carries a single `value: [ts, v]`.
    Instant,
}

/// Decides the shape from the first series only.
pub fn detect_shape(first: &Value) -> RunnerResult<SeriesShape> {
    if first.get("values").is_some() {
        Ok(SeriesShape::Range)
    } else if first.get("value").is_some() {
        Ok(SeriesShape::Instant)
    } else {
        Err(RunnerError::Format("unknown Prometheus result shape".to_string()))
    }
}

pub fn to_query_data(series: &[Value]) -> RunnerResult<QueryData> {
    let first = series
        .first()
        .ok_or_else(|| RunnerError::EmptyResult("Query returned empty result.".to_string()))?;
    let shape = detect_shape(first)?;

    let mut columns = vec![
        CanonicalColumn::new("timestamp", CanonicalType::Datetime),
        CanonicalColumn::new("value", CanonicalType::String),
    ];
    if let Some(labels) = first.get("metric").and_then(Value::as_object) {
        columns.extend(
            labels
                .keys()
                .map(|name| CanonicalColumn::new(name.clone(), CanonicalType::String)),
        );
    }

    let mut rows = Vec::new();
    for metric in series {
        let labels = metric
            .get("metric")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        match shape {
            SeriesShape::Range => {
                let samples = metric
                    .get("values")
                    .and_then(Value::as_array)
                    .ok_or_else(|| RunnerError::Format("series without values".to_string()))?;
                for sample in samples {
                    rows.push(sample_row(&labels, sample)?);
                }
            }
            SeriesShape::Instant => {
                let sample = metric
                    .get("value")
                    .ok_or_else(|| RunnerError::Format("series without value".to_string()))?;
                rows.push(sample_row(&labels, sample)?);
            }
        }
    }
    Ok(QueryData::new(columns, rows))
}

fn sample_row(labels: &Row, sample: &Value) -> RunnerResult<Row> {
    let (timestamp, value) = match sample.as_array().map(Vec::as_slice) {
        Some([timestamp, value]) => (timestamp, value),
        _ => return Err(RunnerError::Format(format!("malformed sample {}", sample))),
    };
    let mut row = labels.clone();
    row.insert("timestamp".to_string(), timestamp_value(timestamp)?);
    row.insert("value".to_string(), value.clone());
    Ok(row)
}

/// Sample times are float epoch seconds; rendered in UTC.
fn timestamp_value(timestamp: &Value) -> RunnerResult<Value> {
    let seconds = timestamp
        .as_f64()
        .ok_or_else(|| RunnerError::Format(format!("bad sample time {}", timestamp)))?;
    let whole = seconds.floor();
    let nanos = ((seconds - whole) * 1e9).round() as u32;
    DateTime::from_timestamp(whole as i64, nanos.min(999_999_999))
        .map(|t| datetime_value(t.naive_utc()))
        .ok_or_else(|| RunnerError::Format(format!("sample time {} out of range", seconds)))
}
