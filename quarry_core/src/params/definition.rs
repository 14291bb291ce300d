use super::{DropdownResolver, ParameterError};
use crate::types::QueryId;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;

const DATE_FORMAT: &str = "%Y-%m-%d";
const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M";
const DATETIME_SECONDS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A parameter declared on a query template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(flatten)]
    pub kind: ParameterKind,
}

impl ParameterDefinition {
    pub fn new(name: impl Into<String>, kind: ParameterKind) -> Self {
        Self {
            name: name.into(),
            title: None,
            kind,
        }
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, ParameterKind::Text)
    }

    pub fn number(name: impl Into<String>) -> Self {
        Self::new(name, ParameterKind::Number)
    }

    pub fn enumeration<S: Into<String>>(
        name: impl Into<String>,
        options: impl IntoIterator<Item = S>,
    ) -> Self {
        Self::new(
            name,
            ParameterKind::Enum {
                options: options.into_iter().map(Into::into).collect(),
                multi: None,
            },
        )
    }

    pub fn dropdown(name: impl Into<String>, query_id: impl Into<QueryId>) -> Self {
        Self::new(
            name,
            ParameterKind::Query {
                query_id: query_id.into(),
                multi: None,
            },
        )
    }

    pub fn date(name: impl Into<String>) -> Self {
        Self::new(name, ParameterKind::Date)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ParameterKind {
    Text,
    Number,
    Enum {
        #[serde(rename = "enumOptions")]
        options: Vec<String>,
        #[serde(default, rename = "multiValuesOptions")]
        multi: Option<MultiValueOptions>,
    },
    /// A dropdown whose options are the latest result of another query.
    Query {
        #[serde(rename = "queryId")]
        query_id: QueryId,
        #[serde(default, rename = "multiValuesOptions")]
        multi: Option<MultiValueOptions>,
    },
    Date,
    #[serde(rename = "datetime-local")]
    DateTimeLocal,
    #[serde(rename = "datetime-with-seconds")]
    DateTimeWithSeconds,
    DateRange,
}

/// How a multi-valued enum or dropdown is rendered into the query text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiValueOptions {
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub suffix: String,
    #[serde(default = "default_separator")]
    pub separator: String,
}

fn default_separator() -> String {
    ",".to_string()
}

impl Default for MultiValueOptions {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            suffix: String::new(),
            separator: default_separator(),
        }
    }
}

/// A validated value ready for substitution.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum BoundValue {
    Single(String),
    Multi(Vec<String>, MultiValueOptions),
    Range { start: String, end: String },
}

impl BoundValue {
    /// Text for a `{{ name }}` placeholder. Ranges only render through
    /// their `.start` / `.end` members.
    pub(crate) fn render(&self) -> Option<String> {
        match self {
            BoundValue::Single(value) => Some(value.clone()),
            BoundValue::Multi(values, opts) => Some(
                values
                    .iter()
                    .map(|v| format!("{}{}{}", opts.prefix, v, opts.suffix))
                    .collect::<Vec<_>>()
                    .join(&opts.separator),
            ),
            BoundValue::Range { .. } => None,
        }
    }

    pub(crate) fn member(&self, member: &str) -> Option<String> {
        match (self, member) {
            (BoundValue::Range { start, .. }, "start") => Some(start.clone()),
            (BoundValue::Range { end, .. }, "end") => Some(end.clone()),
            _ => None,
        }
    }
}

impl ParameterKind {
    /// Only query-backed dropdowns pull their value space from another
    /// trust boundary.
    pub fn is_referential(&self) -> bool {
        matches!(self, ParameterKind::Query { .. })
    }

    pub(crate) fn validate(
        &self,
        name: &str,
        value: &Value,
        resolver: Option<&dyn DropdownResolver>,
    ) -> Result<BoundValue, ParameterError> {
        match self {
            ParameterKind::Text => match value {
                Value::String(s) => Ok(BoundValue::Single(s.clone())),
                _ => Err(ParameterError::invalid(name, "expected a string")),
            },
            ParameterKind::Number => match value {
                Value::Number(n) => Ok(BoundValue::Single(n.to_string())),
                Value::String(s) if s.trim().parse::<f64>().is_ok() => {
                    Ok(BoundValue::Single(s.trim().to_string()))
                }
                _ => Err(ParameterError::invalid(name, "expected a number")),
            },
            ParameterKind::Enum { options, multi } => {
                let allowed = |v: &str| options.iter().any(|o| o == v);
                select_values(name, value, multi.as_ref(), &allowed)
            }
            ParameterKind::Query { query_id, multi } => {
                let resolver = resolver.ok_or(ParameterError::Detached {
                    query_id: *query_id,
                })?;
                let dropdown = resolver.dropdown_values(*query_id)?;
                let allowed = |v: &str| dropdown.iter().any(|o| o.value == v);
                select_values(name, value, multi.as_ref(), &allowed)
            }
            ParameterKind::Date => parse_date(name, value).map(BoundValue::Single),
            ParameterKind::DateTimeLocal => {
                parse_datetime(name, value, DATETIME_FORMAT).map(BoundValue::Single)
            }
            ParameterKind::DateTimeWithSeconds => {
                parse_datetime(name, value, DATETIME_SECONDS_FORMAT).map(BoundValue::Single)
            }
            ParameterKind::DateRange => {
                let (Some(start), Some(end)) = (value.get("start"), value.get("end")) else {
                    return Err(ParameterError::invalid(
                        name,
                        "expected an object with start and end",
                    ));
                };
                let start = parse_date(name, start)?;
                let end = parse_date(name, end)?;
                // both are zero-padded YYYY-MM-DD, so string order is date order
                if start > end {
                    return Err(ParameterError::invalid(name, "start is after end"));
                }
                Ok(BoundValue::Range { start, end })
            }
        }
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn select_values(
    name: &str,
    value: &Value,
    multi: Option<&MultiValueOptions>,
    allowed: &dyn Fn(&str) -> bool,
) -> Result<BoundValue, ParameterError> {
    match (value, multi) {
        (Value::Array(items), Some(opts)) => {
            if items.is_empty() {
                return Err(ParameterError::invalid(name, "no value selected"));
            }
            let mut selected = Vec::with_capacity(items.len());
            for item in items {
                let text = scalar_text(item)
                    .ok_or_else(|| ParameterError::invalid(name, "expected a list of strings"))?;
                if !allowed(&text) {
                    return Err(ParameterError::invalid(
                        name,
                        format!("\"{}\" is not one of the allowed values", text),
                    ));
                }
                selected.push(text);
            }
            Ok(BoundValue::Multi(selected, opts.clone()))
        }
        (Value::Array(_), None) => Err(ParameterError::invalid(
            name,
            "parameter does not accept multiple values",
        )),
        (scalar, _) => {
            let text = scalar_text(scalar)
                .ok_or_else(|| ParameterError::invalid(name, "expected a string"))?;
            if !allowed(&text) {
                return Err(ParameterError::invalid(
                    name,
                    format!("\"{}\" is not one of the allowed values", text),
                ));
            }
            Ok(BoundValue::Single(text))
        }
    }
}

fn parse_date(name: &str, value: &Value) -> Result<String, ParameterError> {
    let text = value
        .as_str()
        .ok_or_else(|| ParameterError::invalid(name, "expected a date string"))?;
    NaiveDate::parse_from_str(text, DATE_FORMAT)
        .map(|d| d.format(DATE_FORMAT).to_string())
        .map_err(|e| ParameterError::invalid(name, format!("invalid date \"{}\": {}", text, e)))
}

fn parse_datetime(name: &str, value: &Value, format: &str) -> Result<String, ParameterError> {
    let text = value
        .as_str()
        .ok_or_else(|| ParameterError::invalid(name, "expected a datetime string"))?;
    NaiveDateTime::parse_from_str(text, format)
        .map(|d| d.format(format).to_string())
        .map_err(|e| {
            ParameterError::invalid(name, format!("invalid datetime \"{}\": {}", text, e))
        })
}
