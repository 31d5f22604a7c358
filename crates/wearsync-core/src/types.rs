//! Core types for wearsync

pub mod forecast;
pub mod node;
pub mod snapshot;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

pub use forecast::{format_temperature, ForecastRow, TemperatureUnit};
pub use node::{NodeId, RemoteNode};
pub use snapshot::WeatherSnapshot;

/// Correlation id carried by a weather request and echoed in the response
///
/// Uses ULID so ids are unique per requester and sort by creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CorrelationId(pub Ulid);

impl CorrelationId {
    /// Create a new CorrelationId with current timestamp
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Parse from the string form used on the wire
    pub fn parse(s: &str) -> Option<Self> {
        Ulid::from_string(s).ok().map(Self)
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier returned for a published data item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemId(pub Ulid);

impl ItemId {
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for ItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "item_{}", self.0)
    }
}

/// Current wall-clock time in epoch milliseconds
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_correlation_id_string_roundtrip() {
        let id = CorrelationId::new();
        let parsed = CorrelationId::parse(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_correlation_id_rejects_garbage() {
        assert!(CorrelationId::parse("not-a-ulid").is_none());
        assert!(CorrelationId::parse("").is_none());
    }

    #[test]
    fn test_correlation_ids_unique() {
        let a = CorrelationId::new();
        let b = CorrelationId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn test_item_id_display() {
        let id = ItemId::new();
        assert!(id.to_string().starts_with("item_"));
    }
}
