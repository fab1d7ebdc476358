use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier shared by every message of one saga.
///
/// Assigned once by the service that originates the saga and carried
/// unchanged through every hop. Services written in other languages may use
/// any string, so the wire form is an opaque string rather than a UUID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Creates a new random correlation ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the correlation ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for CorrelationId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for CorrelationId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<Uuid> for CorrelationId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid.to_string())
    }
}

/// Identity of a service instance group: `"<name>-<version>"`.
///
/// All replicas of one service version share this identity, and with it one
/// broker queue and one dedup set.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceId {
    name: String,
    version: String,
    qualified: String,
}

impl ServiceId {
    /// Creates a service identity from its name and version.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        let name = name.into();
        let version = version.into();
        let qualified = format!("{name}-{version}");
        Self {
            name,
            version,
            qualified,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Returns the `"<name>-<version>"` form used on the wire.
    pub fn as_str(&self) -> &str {
        &self.qualified
    }
}

impl std::fmt::Display for ServiceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.qualified)
    }
}

impl PartialEq<str> for ServiceId {
    fn eq(&self, other: &str) -> bool {
        self.qualified == other
    }
}

impl PartialEq<&str> for ServiceId {
    fn eq(&self, other: &&str) -> bool {
        self.qualified == *other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correlation_id_new_creates_unique_ids() {
        let id1 = CorrelationId::new();
        let id2 = CorrelationId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn correlation_id_accepts_foreign_strings() {
        let id = CorrelationId::from("order-42");
        assert_eq!(id.as_str(), "order-42");
        assert_eq!(id.to_string(), "order-42");
    }

    #[test]
    fn correlation_id_serializes_as_plain_string() {
        let id = CorrelationId::from("c1");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"c1\"");
    }

    #[test]
    fn service_id_joins_name_and_version() {
        let service = ServiceId::new("billing", "2");
        assert_eq!(service.as_str(), "billing-2");
        assert_eq!(service.name(), "billing");
        assert_eq!(service.version(), "2");
        assert!(service == "billing-2");
    }
}
