//! Wire protocol between phone and watch
//!
//! Both channels carry a [`DataMap`]: a flat mapping from string keys to
//! strings, integers, raw bytes, or asset references. A path string acts as
//! the verb; there is no other routing key.
//!
//! ## Routes
//!
//! ```text
//! Watch                                   Phone
//!   |                                       |
//!   |--- /request-weather {requestId} ----->|
//!   |                                       | (read store, render icon)
//!   |<-- /image {weatherIcon, time} --------|  data item
//!   |<-- /weather-update {high, low, ..} ---|  data item or message
//!   |                                       |
//! ```
//!
//! Maps are serialized with postcard.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{SyncError, SyncResult};
use crate::types::{CorrelationId, NodeId};

/// Watch asks the phone for the current weather
pub const PATH_REQUEST_WEATHER: &str = "/request-weather";
/// Phone delivers temperatures (and optionally the icon)
pub const PATH_WEATHER_UPDATE: &str = "/weather-update";
/// Phone delivers the icon on its own
pub const PATH_IMAGE: &str = "/image";

pub const KEY_HIGH_TEMPERATURE: &str = "highTemperature";
pub const KEY_LOW_TEMPERATURE: &str = "lowTemperature";
pub const KEY_WEATHER_ICON: &str = "weatherIcon";
pub const KEY_TIMESTAMP: &str = "timestamp";
/// Timestamp key used by the `/image` item
pub const KEY_TIME: &str = "time";
pub const KEY_REQUEST_ID: &str = "requestId";

/// Known routes, matched case-insensitively on receipt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncPath {
    RequestWeather,
    WeatherUpdate,
    Image,
}

impl SyncPath {
    /// Match a received path against the known routes.
    pub fn parse(path: &str) -> Option<Self> {
        [
            SyncPath::RequestWeather,
            SyncPath::WeatherUpdate,
            SyncPath::Image,
        ]
        .into_iter()
        .find(|known| known.as_str().eq_ignore_ascii_case(path))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncPath::RequestWeather => PATH_REQUEST_WEATHER,
            SyncPath::WeatherUpdate => PATH_WEATHER_UPDATE,
            SyncPath::Image => PATH_IMAGE,
        }
    }
}

impl std::fmt::Display for SyncPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to a binary blob held by the publishing device.
///
/// The receiver turns it into bytes with `Session::resolve_asset`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssetRef {
    /// BLAKE3 hash of the content, hex encoded
    pub digest: String,
    /// Node that can serve the content
    pub provider: NodeId,
}

impl AssetRef {
    /// Reference `bytes` as provided by `provider`.
    pub fn for_bytes(bytes: &[u8], provider: NodeId) -> Self {
        Self {
            digest: blake3::hash(bytes).to_hex().to_string(),
            provider,
        }
    }

    /// Check that `bytes` are the content this reference names.
    pub fn matches(&self, bytes: &[u8]) -> bool {
        blake3::hash(bytes).to_hex().as_str() == self.digest
    }
}

/// A single value in a [`DataMap`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataValue {
    String(String),
    Int(i64),
    Bytes(Vec<u8>),
    Asset(AssetRef),
}

/// Structured key/value payload carried by messages and data items
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataMap(BTreeMap<String, DataValue>);

impl DataMap {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn put_string(&mut self, key: &str, value: impl Into<String>) {
        self.0.insert(key.to_string(), DataValue::String(value.into()));
    }

    pub fn put_int(&mut self, key: &str, value: i64) {
        self.0.insert(key.to_string(), DataValue::Int(value));
    }

    pub fn put_bytes(&mut self, key: &str, value: Vec<u8>) {
        self.0.insert(key.to_string(), DataValue::Bytes(value));
    }

    pub fn put_asset(&mut self, key: &str, value: AssetRef) {
        self.0.insert(key.to_string(), DataValue::Asset(value));
    }

    pub fn get(&self, key: &str) -> Option<&DataValue> {
        self.0.get(key)
    }

    /// String value for `key`; `None` if absent or of another type.
    pub fn get_string(&self, key: &str) -> Option<&str> {
        match self.0.get(key) {
            Some(DataValue::String(s)) => Some(s),
            _ => None,
        }
    }

    /// Integer value for `key`.
    ///
    /// Also accepts a decimal string, which is how older phone builds sent
    /// the timestamp.
    pub fn get_int(&self, key: &str) -> Option<i64> {
        match self.0.get(key) {
            Some(DataValue::Int(v)) => Some(*v),
            Some(DataValue::String(s)) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn get_bytes(&self, key: &str) -> Option<&[u8]> {
        match self.0.get(key) {
            Some(DataValue::Bytes(b)) => Some(b),
            _ => None,
        }
    }

    pub fn get_asset(&self, key: &str) -> Option<&AssetRef> {
        match self.0.get(key) {
            Some(DataValue::Asset(a)) => Some(a),
            _ => None,
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Correlation id carried by this map, if well-formed.
    pub fn request_id(&self) -> Option<CorrelationId> {
        self.get_string(KEY_REQUEST_ID).and_then(CorrelationId::parse)
    }

    pub fn set_request_id(&mut self, id: CorrelationId) {
        self.put_string(KEY_REQUEST_ID, id.to_string());
    }

    /// Encode map to bytes using postcard
    pub fn to_bytes(&self) -> SyncResult<Vec<u8>> {
        postcard::to_allocvec(self)
            .map_err(|e| SyncError::Serialization(format!("Failed to encode data map: {}", e)))
    }

    /// Decode map from bytes. Empty input is an empty map.
    pub fn from_bytes(bytes: &[u8]) -> SyncResult<Self> {
        if bytes.is_empty() {
            return Ok(Self::new());
        }
        postcard::from_bytes(bytes)
            .map_err(|e| SyncError::DecodeFailed(format!("Malformed data map: {}", e)))
    }
}

/// A path plus its payload: the unit both channels transmit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMessage {
    pub path: String,
    pub payload: DataMap,
}

impl SyncMessage {
    pub fn new(path: impl Into<String>, payload: DataMap) -> Self {
        Self {
            path: path.into(),
            payload,
        }
    }

    /// A `/request-weather` message tagged with `id`.
    pub fn request_weather(id: CorrelationId) -> Self {
        let mut payload = DataMap::new();
        payload.set_request_id(id);
        Self::new(PATH_REQUEST_WEATHER, payload)
    }

    /// Route this message is addressed to, if known
    pub fn route(&self) -> Option<SyncPath> {
        SyncPath::parse(&self.path)
    }

    /// Payload bytes for the message channel (`None` for an empty map)
    pub fn payload_bytes(&self) -> SyncResult<Option<Vec<u8>>> {
        if self.payload.is_empty() {
            return Ok(None);
        }
        self.payload.to_bytes().map(Some)
    }
}
