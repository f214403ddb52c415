//! Record shapes persisted in the collection blobs.
//!
//! # Responsibility
//! - Define typed views of project and verification records.
//! - Tolerate heterogeneous records written by other app versions.
//!
//! # Invariants
//! - Unknown fields survive a read/modify/write cycle via `extra`.
//! - Absent optional fields stay absent when serialized again.

pub mod project;
pub mod verification;

use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

/// Parses a stored timestamp.
///
/// Accepts RFC 3339 date-times and bare `YYYY-MM-DD` dates (midnight UTC).
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Formats a timestamp the way records store it.
pub fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

pub(crate) fn merge_field<T>(target: &mut Option<T>, update: Option<T>) {
    if update.is_some() {
        *target = update;
    }
}

/// A record persisted as one JSON object inside a collection blob.
pub trait StoredRecord: Serialize + DeserializeOwned + Clone + Default {
    /// Fields this type does not model, kept verbatim.
    fn extra_mut(&mut self) -> &mut Map<String, Value>;

    /// Decodes `object`, never rejecting it.
    ///
    /// A field whose value does not fit its typed slot is moved into
    /// `extra` under its original key, so it is still returned and written
    /// back unchanged.
    fn from_object(object: Map<String, Value>) -> Self {
        let whole = Value::Object(object);
        if let Ok(record) = Self::deserialize(&whole) {
            return record;
        }
        let Value::Object(object) = whole else {
            return Self::default();
        };

        let mut accepted = Map::new();
        let mut rejected = Map::new();
        for (field, value) in object {
            let single = Value::Object(Map::from_iter([(field.clone(), value.clone())]));
            if Self::deserialize(&single).is_ok() {
                accepted.insert(field, value);
            } else {
                rejected.insert(field, value);
            }
        }

        let mut record = Self::deserialize(&Value::Object(accepted)).unwrap_or_default();
        record.extra_mut().extend(rejected);
        record
    }

    /// Drops `extra` entries shadowed by a typed field that now holds a
    /// value.
    fn drop_shadowed_extra(&mut self) {
        let mut typed = self.clone();
        typed.extra_mut().clear();
        if let Ok(Value::Object(fields)) = serde_json::to_value(&typed) {
            let extra = self.extra_mut();
            for key in fields.keys() {
                extra.remove(key);
            }
        }
    }
}

/// Number fields written by older front ends may be numeric strings.
///
/// Anything else is a type mismatch, so the caller keeps the raw value.
pub(crate) mod lenient {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    pub fn opt_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<Value>::deserialize(deserializer)? {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(number)) => number
                .as_f64()
                .map(Some)
                .ok_or_else(|| D::Error::custom(format!("number {number} out of range"))),
            Some(Value::String(text)) => text
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|value| value.is_finite())
                .map(Some)
                .ok_or_else(|| D::Error::custom(format!("`{text}` is not a number"))),
            Some(other) => Err(D::Error::custom(format!("expected a number, got {other}"))),
        }
    }

    pub fn opt_u64<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let count = match Option::<Value>::deserialize(deserializer)? {
            None | Some(Value::Null) => return Ok(None),
            Some(Value::Number(number)) => number.as_u64().or_else(|| {
                number
                    .as_f64()
                    .filter(|value| *value >= 0.0 && value.fract() == 0.0)
                    .map(|value| value as u64)
            }),
            Some(Value::String(text)) => text.trim().parse::<u64>().ok(),
            Some(_) => None,
        };
        count
            .map(Some)
            .ok_or_else(|| D::Error::custom("expected a non-negative integer"))
    }
}
