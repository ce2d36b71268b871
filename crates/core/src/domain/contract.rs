use crate::domain::recommendation::ValidatedRecord;
use crate::error::ValidationError;
use chrono::{DateTime, Utc};
use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A record exactly as the remote source sent it. Never persisted as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawIngestItem(pub Value);

impl From<Value> for RawIngestItem {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

/// The fields we recognize on a raw item. Anything else the source sends is ignored.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawFields {
    ticker: TextField,
    company: TextField,
    brokerage: TextField,
    action: TextField,
    rating_from: TextField,
    rating_to: TextField,
    target_from: TextField,
    target_to: TextField,
    time: TextField,
}

/// A field that should be a string. Null, numbers, objects etc. all read as empty.
#[derive(Debug, Default, Deserialize)]
#[serde(untagged)]
enum TextField {
    Text(String),
    #[default]
    Missing,
    Other(IgnoredAny),
}

impl TextField {
    fn into_raw(self) -> String {
        match self {
            TextField::Text(s) => s,
            TextField::Missing | TextField::Other(_) => String::new(),
        }
    }

    /// Trimmed, so `" ABC"` and `"ABC"` resolve to the same company.
    fn into_text(self) -> String {
        self.into_raw().trim().to_string()
    }
}

impl RawIngestItem {
    pub fn validate_and_into_record(self) -> Result<ValidatedRecord, ValidationError> {
        if !self.0.is_object() {
            return Err(ValidationError::NotAnObject);
        }
        let fields =
            RawFields::deserialize(self.0).map_err(|_| ValidationError::NotAnObject)?;

        // Parsed verbatim: surrounding whitespace is not RFC 3339.
        let raw_time = fields.time.into_raw();
        if raw_time.trim().is_empty() {
            return Err(ValidationError::MissingTime);
        }
        let time = match DateTime::parse_from_rfc3339(&raw_time) {
            Ok(t) => t.with_timezone(&Utc),
            Err(source) => {
                return Err(ValidationError::UnparseableTime {
                    raw: raw_time,
                    source,
                })
            }
        };

        Ok(ValidatedRecord {
            ticker: fields.ticker.into_text(),
            company: fields.company.into_text(),
            brokerage: fields.brokerage.into_text(),
            action: fields.action.into_text(),
            rating_from: fields.rating_from.into_text(),
            rating_to: fields.rating_to.into_text(),
            target_from: fields.target_from.into_text(),
            target_to: fields.target_to.into_text(),
            time,
        })
    }
}

/// Converts one raw item into a validated record. The event time is the only hard
/// requirement; every other field falls back to an empty string.
pub fn transform(item: RawIngestItem) -> Result<ValidatedRecord, ValidationError> {
    item.validate_and_into_record()
}
