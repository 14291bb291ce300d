use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{Display, EnumIter, EnumString};

/// Wire form of canonical `date` values.
pub const DATE_FORMAT: &str = "%Y-%m-%d";
/// Wire form of canonical `datetime` values.
pub const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

pub fn date_value(date: NaiveDate) -> Value {
    Value::String(date.format(DATE_FORMAT).to_string())
}

pub fn datetime_value(datetime: NaiveDateTime) -> Value {
    Value::String(datetime.format(DATETIME_FORMAT).to_string())
}

/// The fixed set of value types every runner maps its native types into.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CanonicalType {
    Integer,
    Float,
    String,
    Boolean,
    Date,
    Datetime,
}

impl CanonicalType {
    pub fn is_temporal(&self) -> bool {
        matches!(self, CanonicalType::Date | CanonicalType::Datetime)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, CanonicalType::Integer | CanonicalType::Float)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalColumn {
    pub name: String,
    pub friendly_name: String,
    #[serde(rename = "type")]
    pub column_type: CanonicalType,
}

impl CanonicalColumn {
    /// Column whose friendly name is its own name.
    pub fn new(name: impl Into<String>, column_type: CanonicalType) -> Self {
        let name = name.into();
        Self {
            friendly_name: name.clone(),
            name,
            column_type,
        }
    }
}

pub type Row = Map<String, Value>;

/// Canonical payload produced by a runner: `{columns, rows}`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryData {
    pub columns: Vec<CanonicalColumn>,
    pub rows: Vec<Row>,
    /// Set by time-series runners (`query` or `query_range`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_type: Option<String>,
}

impl QueryData {
    pub fn new(columns: Vec<CanonicalColumn>, rows: Vec<Row>) -> Self {
        Self {
            columns,
            rows,
            query_type: None,
        }
    }

    pub fn column(&self, name: &str) -> Option<&CanonicalColumn> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
