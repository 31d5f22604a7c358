//! One JSON object per log event.
//!
//! Entries are self-contained so phone and watch files can be concatenated
//! and sorted by `ts` to follow a request across devices.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single line in a device's JSONL log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonLogEntry {
    /// RFC 3339 timestamp with millisecond precision
    pub ts: String,

    /// trace, debug, info, warn or error
    pub level: String,

    /// Device role or name, e.g. "phone" or "watch"
    pub device: String,

    /// Module path, e.g. "wearsync_core::sync::watch"
    pub target: String,

    pub msg: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<Value>,

    /// Enclosing spans, root first, joined with " > "
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span: Option<String>,
}

impl JsonLogEntry {
    /// Entry stamped with the current time.
    pub fn new(
        level: impl Into<String>,
        device: impl Into<String>,
        target: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self {
            ts: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            level: level.into(),
            device: device.into(),
            target: target.into(),
            msg: msg.into(),
            fields: None,
            span: None,
        }
    }

    pub fn with_fields(mut self, fields: Value) -> Self {
        self.fields = Some(fields);
        self
    }

    pub fn with_span(mut self, span: impl Into<String>) -> Self {
        self.span = Some(span.into());
        self
    }

    /// Look up a structured field as a string, e.g. `request_id`.
    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.fields.as_ref()?.get(name)?.as_str()
    }

    /// Serialize to a single JSON line (no trailing newline).
    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_entry_serialization() {
        let entry = JsonLogEntry::new("info", "watch", "wearsync_core::sync::watch", "Requested weather");

        let json = entry.to_json_line().unwrap();
        assert!(json.contains("\"level\":\"info\""));
        assert!(json.contains("\"device\":\"watch\""));
        assert!(json.contains("\"msg\":\"Requested weather\""));
        assert!(!json.contains("\"fields\""));

        let parsed = JsonLogEntry::from_json_line(&json).unwrap();
        assert_eq!(parsed.device, "watch");
        assert_eq!(parsed.msg, "Requested weather");
    }

    #[test]
    fn test_field_lookup() {
        let entry = JsonLogEntry::new("debug", "phone", "wearsync_core::sync::phone", "Weather requested")
            .with_fields(serde_json::json!({
                "request_id": "01HZX3",
                "recipients": 2
            }));

        assert_eq!(entry.field_str("request_id"), Some("01HZX3"));
        assert_eq!(entry.field_str("recipients"), None);
        assert_eq!(entry.field_str("missing"), None);
    }
}
