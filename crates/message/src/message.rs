use chrono::{DateTime, Utc};
use common::{CorrelationId, ServiceId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{Decoration, MessageError, Result};

/// The unit travelling the bus: one saga, with every contribution so far.
///
/// Fields are private so the append-only rules hold: the correlation ID is
/// fixed at construction, decorations and context entries can only be added.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    correlation_id: CorrelationId,

    saga: String,

    #[serde(default)]
    context: Map<String, Value>,

    #[serde(default)]
    decorations: Vec<Decoration>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    publish_time: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_service_decoration: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_decoration_time: Option<DateTime<Utc>>,

    /// Caller-defined top-level fields, passed through untouched.
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl Message {
    /// Creates an empty message for `saga`.
    pub fn new(correlation_id: CorrelationId, saga: impl Into<String>) -> Self {
        Self {
            correlation_id,
            saga: saga.into(),
            context: Map::new(),
            decorations: Vec::new(),
            publish_time: None,
            last_service_decoration: None,
            last_decoration_time: None,
            extra: Map::new(),
        }
    }

    /// Creates a message builder for `saga`.
    pub fn builder(saga: impl Into<String>) -> MessageBuilder {
        MessageBuilder::new(saga)
    }

    /// Decodes a message from its JSON wire form.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Encodes the message to its JSON wire form.
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    pub fn saga(&self) -> &str {
        &self.saga
    }

    pub fn context(&self) -> &Map<String, Value> {
        &self.context
    }

    pub fn context_value(&self, key: &str) -> Option<&Value> {
        self.context.get(key)
    }

    pub fn has_context(&self, key: &str) -> bool {
        self.context.contains_key(key)
    }

    pub fn decorations(&self) -> &[Decoration] {
        &self.decorations
    }

    pub fn publish_time(&self) -> Option<DateTime<Utc>> {
        self.publish_time
    }

    pub fn last_service_decoration(&self) -> Option<&str> {
        self.last_service_decoration.as_deref()
    }

    pub fn last_decoration_time(&self) -> Option<DateTime<Utc>> {
        self.last_decoration_time
    }

    pub fn extra(&self) -> &Map<String, Value> {
        &self.extra
    }

    /// Returns the first decoration that marks a faulted step.
    pub fn error_decoration(&self) -> Option<&Decoration> {
        self.decorations.iter().find(|d| d.is_error())
    }

    /// Returns true if `service` already appended a decoration.
    pub fn is_decorated_by(&self, service: &str) -> bool {
        self.decorations.iter().any(|d| d.service == service)
    }

    /// Returns true if at least one decoration carries `property`.
    pub fn any_decoration_has(&self, property: &str) -> bool {
        self.decorations.iter().any(|d| d.has_property(property))
    }

    /// Appends a decoration.
    ///
    /// Each service may decorate a message at most once.
    pub fn decorate(&mut self, decoration: Decoration) -> Result<()> {
        if self.is_decorated_by(&decoration.service) {
            return Err(MessageError::AlreadyDecorated {
                service: decoration.service,
            });
        }
        self.decorations.push(decoration);
        Ok(())
    }

    /// Adds a context entry. Existing entries are never overwritten.
    pub fn insert_context(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Result<()> {
        let key = key.into();
        if self.context.contains_key(&key) {
            return Err(MessageError::ContextKeyExists { key });
        }
        self.context.insert(key, value.into());
        Ok(())
    }

    /// Records that `service` is emitting this message at `now`.
    ///
    /// `publishTime` is only set by the first publisher so end-to-end latency
    /// stays measurable across republishes.
    pub fn stamp_publication(&mut self, service: &ServiceId, now: DateTime<Utc>) {
        self.last_service_decoration = Some(service.to_string());
        self.last_decoration_time = Some(now);
        if self.publish_time.is_none() {
            self.publish_time = Some(now);
        }
    }
}

/// Builder for saga-originating messages.
#[derive(Debug)]
pub struct MessageBuilder {
    correlation_id: Option<CorrelationId>,
    saga: String,
    context: Map<String, Value>,
    decorations: Vec<Decoration>,
    extra: Map<String, Value>,
}

impl MessageBuilder {
    fn new(saga: impl Into<String>) -> Self {
        Self {
            correlation_id: None,
            saga: saga.into(),
            context: Map::new(),
            decorations: Vec::new(),
            extra: Map::new(),
        }
    }

    /// Sets the correlation ID. If not set, a new ID will be generated.
    pub fn correlation_id(mut self, id: impl Into<CorrelationId>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Adds a context entry.
    pub fn context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Appends a decoration.
    pub fn decoration(mut self, decoration: Decoration) -> Self {
        self.decorations.push(decoration);
        self
    }

    /// Adds a caller-defined top-level field.
    pub fn field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> Message {
        Message {
            correlation_id: self.correlation_id.unwrap_or_default(),
            saga: self.saga,
            context: self.context,
            decorations: self.decorations,
            publish_time: None,
            last_service_decoration: None,
            last_decoration_time: None,
            extra: self.extra,
        }
    }
}
