use chrono::{DateTime, Datelike, Local, TimeZone, Utc};
use serde_json::{Map, Value};
use std::fmt::Display;
use tracing::debug;

pub const MASK_LEAKAGE: &str = "maskLeakage";
pub const START_TIME: &str = "startTime";
pub const END_TIME: &str = "endTime";

/// chrono rendering of `MM-DD-YYYY, HH:MM:SS.ffffff`
pub const TIMESTAMP_FORMAT: &str = "%m-%d-%Y, %H:%M:%S%.6f";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformOptions {
    pub events_field: String,
    pub threshold: i64,
}

impl Default for TransformOptions {
    fn default() -> Self {
        TransformOptions {
            events_field: "events".to_string(),
            threshold: 40,
        }
    }
}

/// Malformed source documents. None of these are worth retrying.
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum TransformError {
    #[error("source document is not a JSON object")]
    NotAnObject,
    #[error("source document has no '{0}' list")]
    MissingList(String),
    #[error("item {index} is not a JSON object")]
    ItemNotAnObject { index: usize },
    #[error("item {index} is missing field '{field}'")]
    MissingField { index: usize, field: &'static str },
    #[error("item {index}: field '{field}' is not an integer: {value}")]
    NotAnInteger {
        index: usize,
        field: &'static str,
        value: Value,
    },
    #[error("item {index}: field '{field}' is out of range for a timestamp: {millis}")]
    TimestampOutOfRange {
        index: usize,
        field: &'static str,
        millis: i64,
    },
}

impl TransformError {
    pub fn is_permanent(&self) -> bool {
        true
    }
}

/// Keeps the items of `options.events_field` whose `maskLeakage` is strictly
/// above the threshold and rewrites their `startTime`/`endTime` as local time.
pub fn transform(document: Value, options: &TransformOptions) -> Result<Vec<Value>, TransformError> {
    transform_in(document, options, &Local)
}

pub fn transform_in<Tz>(
    document: Value,
    options: &TransformOptions,
    tz: &Tz,
) -> Result<Vec<Value>, TransformError>
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let mut document = match document {
        Value::Object(map) => map,
        _ => return Err(TransformError::NotAnObject),
    };

    let items = match document.remove(&options.events_field) {
        Some(Value::Array(items)) => items,
        _ => return Err(TransformError::MissingList(options.events_field.clone())),
    };
    let total = items.len();

    let mut kept = Vec::new();
    for (index, item) in items.into_iter().enumerate() {
        let mut item = match item {
            Value::Object(map) => map,
            _ => return Err(TransformError::ItemNotAnObject { index }),
        };

        let leakage = integer_field(&item, index, MASK_LEAKAGE)?;
        if leakage <= options.threshold {
            continue;
        }

        for field in [START_TIME, END_TIME] {
            let millis = integer_field(&item, index, field)?;
            let formatted = format_epoch_millis(millis, tz)
                .ok_or(TransformError::TimestampOutOfRange { index, field, millis })?;
            item.insert(field.to_string(), Value::String(formatted));
        }
        kept.push(Value::Object(item));
    }

    debug!("kept {} of {} items", kept.len(), total);
    Ok(kept)
}

fn integer_field(
    item: &Map<String, Value>,
    index: usize,
    field: &'static str,
) -> Result<i64, TransformError> {
    let value = item
        .get(field)
        .ok_or(TransformError::MissingField { index, field })?;
    coerce_integer(value).ok_or_else(|| TransformError::NotAnInteger {
        index,
        field,
        value: value.clone(),
    })
}

/// Permissive integer coercion: floats truncate toward zero, booleans are 0/1
/// and strings must hold a base-10 integer (surrounding whitespace allowed).
pub fn coerce_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && f.abs() < i64::MAX as f64)
                .map(|f| f.trunc() as i64)
        }),
        Value::Bool(b) => Some(*b as i64),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

pub fn format_epoch_millis<Tz>(millis: i64, tz: &Tz) -> Option<String>
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let local = DateTime::<Utc>::from_timestamp_millis(millis)?.with_timezone(tz);
    // %Y only stays four digits wide inside this range
    if !(1..=9999).contains(&local.year()) {
        return None;
    }
    Some(local.format(TIMESTAMP_FORMAT).to_string())
}
