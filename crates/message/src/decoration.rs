use std::borrow::Cow;

use chrono::{DateTime, SecondsFormat, Utc};
use common::ServiceId;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// One service's contribution to a saga.
///
/// Payload fields are kept as free-form JSON next to `service`, `timestamp`
/// and `error`, exactly as they appear on the wire. Other services write
/// `timestamp` and `error` in whatever shape they like, so both are carried
/// as raw JSON and an explicit `null` is kept distinct from an absent key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decoration {
    /// `"<name>-<version>"` of the decorating service.
    pub service: String,

    /// RFC 3339 when written here; epoch milliseconds or free text from
    /// other services.
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<Value>,

    /// Set when the saga step failed in this service.
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub error: Option<Value>,

    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Decoration {
    /// Creates a decoration for `service` stamped with the current time.
    pub fn new(service: &ServiceId) -> Self {
        Self {
            service: service.to_string(),
            timestamp: Some(Value::String(
                Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            )),
            error: None,
            fields: Map::new(),
        }
    }

    /// Creates a decoration recording a failed saga step.
    pub fn failed(service: &ServiceId, error: impl Into<String>) -> Self {
        Self {
            error: Some(Value::String(error.into())),
            ..Self::new(service)
        }
    }

    /// Adds a payload field.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Returns a payload field.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Returns the decoration time if it is RFC 3339 text or epoch
    /// milliseconds.
    pub fn timestamp_utc(&self) -> Option<DateTime<Utc>> {
        match self.timestamp.as_ref()? {
            Value::String(text) => DateTime::parse_from_rfc3339(text)
                .ok()
                .map(|time| time.with_timezone(&Utc)),
            Value::Number(millis) => millis.as_i64().and_then(DateTime::from_timestamp_millis),
            _ => None,
        }
    }

    /// Returns the error text if this decoration marks a faulted step.
    ///
    /// Falsy values (`null`, `false`, `0`, `""`) do not count as a fault.
    /// Non-string errors are rendered as JSON.
    pub fn error(&self) -> Option<Cow<'_, str>> {
        match self.error.as_ref()? {
            Value::Null | Value::Bool(false) => None,
            Value::String(text) if text.is_empty() => None,
            Value::String(text) => Some(Cow::Borrowed(text)),
            Value::Number(n) if n.as_f64() == Some(0.0) => None,
            other => Some(Cow::Owned(other.to_string())),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error().is_some()
    }

    /// Returns true if `name` is present on this decoration, either as one of
    /// the fixed fields or as a payload field. A key set to `null` is present.
    pub fn has_property(&self, name: &str) -> bool {
        match name {
            "service" => true,
            "timestamp" => self.timestamp.is_some(),
            "error" => self.error.is_some(),
            other => self.fields.contains_key(other),
        }
    }
}

/// Keeps an explicit `null` as `Some(Value::Null)`; a missing key falls back
/// to `None` through `#[serde(default)]`.
fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}
