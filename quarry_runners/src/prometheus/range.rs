//! Turns the user's query string into concrete `query_range` parameters.
//!
//! Relative bounds are resolved against the clock on every call, so a stored
//! query text like `query=up&end=now` keeps meaning "up to now".

use crate::error::{RunnerError, RunnerResult};
use chrono::{DateTime, Duration, Utc};

pub const DEFAULT_WINDOW_SECS: i64 = 3600;
pub const DEFAULT_STEP: &str = "1s";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedQuery {
    pub params: Vec<(String, String)>,
    /// `query_range` when the caller asked for a step, `query` otherwise.
    pub query_type: &'static str,
}

impl ResolvedQuery {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

pub fn resolve(query: &str, now: DateTime<Utc>) -> RunnerResult<ResolvedQuery> {
    let text = if query.starts_with("query=") {
        query.to_string()
    } else {
        format!("query={}", query)
    };

    let mut params: Vec<(String, String)> = Vec::new();
    for (key, value) in url::form_urlencoded::parse(text.as_bytes()) {
        if value.is_empty() || params.iter().any(|(k, _)| *k == key) {
            continue;
        }
        params.push((key.into_owned(), value.into_owned()));
    }

    let query_type = if params.iter().any(|(k, _)| k == "step") {
        "query_range"
    } else {
        "query"
    };

    let mut resolved = ResolvedQuery { params, query_type };
    let end = match resolved.get("end") {
        None | Some("now") => now.timestamp().to_string(),
        Some(end) => resolve_time(end, now)?,
    };
    let start = match resolved.get("start") {
        None => (now - Duration::seconds(DEFAULT_WINDOW_SECS)).timestamp().to_string(),
        Some(start) => resolve_time(start, now)?,
    };
    set(&mut resolved.params, "end", end);
    set(&mut resolved.params, "start", start);
    if resolved.get("step").is_none() {
        set(&mut resolved.params, "step", DEFAULT_STEP.to_string());
    }
    Ok(resolved)
}

fn set(params: &mut Vec<(String, String)>, key: &str, value: String) {
    match params.iter_mut().find(|(k, _)| k == key) {
        Some(slot) => slot.1 = value,
        None => params.push((key.to_string(), value)),
    }
}

/// `now`, `now-<dur>` and `-<dur>` become epoch seconds. Anything else is
/// an absolute timestamp the backend understands and is passed through.
pub fn resolve_time(value: &str, now: DateTime<Utc>) -> RunnerResult<String> {
    let offset = if value == "now" {
        Some(Duration::zero())
    } else if let Some(rest) = value.strip_prefix("now-") {
        Some(parse_duration(rest)?)
    } else if let Some(rest) = value.strip_prefix('-') {
        match parse_duration(rest) {
            Ok(d) => Some(d),
            // negative epoch values
            Err(_) if rest.parse::<f64>().is_ok() => None,
            Err(e) => return Err(e),
        }
    } else {
        None
    };
    match offset {
        Some(offset) => now
            .checked_sub_signed(offset)
            .map(|t| t.timestamp().to_string())
            .ok_or_else(|| RunnerError::Format(format!("time \"{}\" is out of range", value))),
        None => Ok(value.to_string()),
    }
}

/// Prometheus style durations: `90s`, `5m`, `1h30m`, `2d`, `1w`, `1y`,
/// `250ms`.
pub fn parse_duration(text: &str) -> RunnerResult<Duration> {
    let invalid = || RunnerError::Format(format!("invalid duration \"{}\"", text));
    if text.is_empty() {
        return Err(invalid());
    }

    let mut total = Duration::zero();
    let mut rest = text;
    while !rest.is_empty() {
        let digits = rest.find(|c: char| !c.is_ascii_digit()).ok_or_else(invalid)?;
        if digits == 0 {
            return Err(invalid());
        }
        let amount: i64 = rest[..digits].parse().map_err(|_| invalid())?;
        rest = &rest[digits..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(rest.len());
        let unit = match &rest[..unit_len] {
            "ms" => Duration::milliseconds(1),
            "s" => Duration::seconds(1),
            "m" => Duration::minutes(1),
            "h" => Duration::hours(1),
            "d" => Duration::days(1),
            "w" => Duration::weeks(1),
            "y" => Duration::days(365),
            _ => return Err(invalid()),
        };
        rest = &rest[unit_len..];
        let amount = i32::try_from(amount).map_err(|_| invalid())?;
        total = unit
            .checked_mul(amount)
            .and_then(|step| total.checked_add(&step))
            .ok_or_else(invalid)?;
    }
    Ok(total)
}
