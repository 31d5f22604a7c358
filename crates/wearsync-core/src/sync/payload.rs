//! Snapshot payload encoding and tolerant decoding
//!
//! Encoding always writes both temperature strings. Decoding never fails on
//! a well-formed map: missing or mistyped fields simply leave the matching
//! part of the [`WeatherUpdate`] empty.

use crate::error::{SyncError, SyncResult};
use crate::types::{CorrelationId, WeatherSnapshot};

use super::protocol::{
    AssetRef, DataMap, SyncPath, KEY_HIGH_TEMPERATURE, KEY_LOW_TEMPERATURE, KEY_TIME,
    KEY_TIMESTAMP, KEY_WEATHER_ICON,
};

/// How the icon travels: inline bytes (message channel) or an asset
/// reference (data-item channel)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IconPayload {
    Inline(Vec<u8>),
    Asset(AssetRef),
}

/// High/low pair; only ever present together
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Temperatures {
    pub high: String,
    pub low: String,
}

/// Receiver-side view of a decoded payload, possibly partial
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WeatherUpdate {
    pub temperatures: Option<Temperatures>,
    pub icon: Option<IconPayload>,
    pub timestamp: Option<i64>,
    pub request_id: Option<CorrelationId>,
}

impl WeatherUpdate {
    /// Nothing displayable was decoded
    pub fn is_empty(&self) -> bool {
        self.temperatures.is_none() && self.icon.is_none()
    }

    pub fn high(&self) -> Option<&str> {
        self.temperatures.as_ref().map(|t| t.high.as_str())
    }

    pub fn low(&self) -> Option<&str> {
        self.temperatures.as_ref().map(|t| t.low.as_str())
    }
}

/// Build a `/weather-update` map from a snapshot.
///
/// `icon` is written under `weatherIcon` when given; the snapshot's own
/// `icon_image` is not consulted so callers pick the transfer form.
pub fn encode_weather_update(
    snapshot: &WeatherSnapshot,
    icon: Option<IconPayload>,
    request_id: Option<CorrelationId>,
) -> DataMap {
    let mut map = DataMap::new();
    map.put_string(KEY_HIGH_TEMPERATURE, snapshot.high_temperature.clone());
    map.put_string(KEY_LOW_TEMPERATURE, snapshot.low_temperature.clone());
    map.put_int(KEY_TIMESTAMP, snapshot.timestamp);
    match icon {
        Some(IconPayload::Inline(bytes)) => map.put_bytes(KEY_WEATHER_ICON, bytes),
        Some(IconPayload::Asset(asset)) => map.put_asset(KEY_WEATHER_ICON, asset),
        None => {}
    }
    if let Some(id) = request_id {
        map.set_request_id(id);
    }
    map
}

/// Build an `/image` map carrying only the icon asset.
pub fn encode_image(asset: AssetRef, time: i64) -> DataMap {
    let mut map = DataMap::new();
    map.put_asset(KEY_WEATHER_ICON, asset);
    map.put_int(KEY_TIME, time);
    map
}

fn decode_icon(map: &DataMap) -> Option<IconPayload> {
    if let Some(asset) = map.get_asset(KEY_WEATHER_ICON) {
        return Some(IconPayload::Asset(asset.clone()));
    }
    map.get_bytes(KEY_WEATHER_ICON)
        .filter(|bytes| !bytes.is_empty())
        .map(|bytes| IconPayload::Inline(bytes.to_vec()))
}

/// Decode a `/weather-update` map.
///
/// A map with only one of the two temperatures decodes with no
/// temperatures at all.
pub fn decode_weather_update(map: &DataMap) -> WeatherUpdate {
    let temperatures = match (
        map.get_string(KEY_HIGH_TEMPERATURE),
        map.get_string(KEY_LOW_TEMPERATURE),
    ) {
        (Some(high), Some(low)) => Some(Temperatures {
            high: high.to_string(),
            low: low.to_string(),
        }),
        _ => None,
    };

    WeatherUpdate {
        temperatures,
        icon: decode_icon(map),
        timestamp: map.get_int(KEY_TIMESTAMP),
        request_id: map.request_id(),
    }
}

/// Decode an `/image` map.
pub fn decode_image(map: &DataMap) -> WeatherUpdate {
    WeatherUpdate {
        temperatures: None,
        icon: decode_icon(map),
        timestamp: map.get_int(KEY_TIME),
        request_id: map.request_id(),
    }
}

/// Decode a payload received on `path`.
///
/// Returns `DecodeFailed` for routes that carry no weather data.
pub fn decode_for_path(path: &str, map: &DataMap) -> SyncResult<WeatherUpdate> {
    match SyncPath::parse(path) {
        Some(SyncPath::WeatherUpdate) => Ok(decode_weather_update(map)),
        Some(SyncPath::Image) => Ok(decode_image(map)),
        Some(SyncPath::RequestWeather) | None => Err(SyncError::DecodeFailed(format!(
            "path {} carries no weather payload",
            path
        ))),
    }
}

/// Decode raw message-channel bytes received on `path`.
pub fn decode_message(path: &str, bytes: &[u8]) -> SyncResult<WeatherUpdate> {
    let map = DataMap::from_bytes(bytes)?;
    decode_for_path(path, &map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::protocol::{PATH_IMAGE, PATH_REQUEST_WEATHER, PATH_WEATHER_UPDATE};
    use crate::types::NodeId;

    fn snapshot(high: &str, low: &str) -> WeatherSnapshot {
        WeatherSnapshot {
            high_temperature: high.to_string(),
            low_temperature: low.to_string(),
            condition_icon_id: 800,
            icon_image: None,
            timestamp: 1_445_090_000_000,
        }
    }

    #[test]
    fn test_weather_update_without_icon() {
        let map = encode_weather_update(&snapshot("75°", "58°"), None, None);
        let update = decode_weather_update(&map);

        assert_eq!(update.high(), Some("75°"));
        assert_eq!(update.low(), Some("58°"));
        assert!(update.icon.is_none());
        assert_eq!(update.timestamp, Some(1_445_090_000_000));
        assert!(update.request_id.is_none());
    }

    #[test]
    fn test_weather_update_with_inline_icon_and_request_id() {
        let id = CorrelationId::new();
        let map = encode_weather_update(
            &snapshot("24°", "14°"),
            Some(IconPayload::Inline(vec![0x89, b'P', b'N', b'G'])),
            Some(id),
        );
        let bytes = map.to_bytes().unwrap();
        let update = decode_message(PATH_WEATHER_UPDATE, &bytes).unwrap();

        assert_eq!(update.icon, Some(IconPayload::Inline(vec![0x89, b'P', b'N', b'G'])));
        assert_eq!(update.request_id, Some(id));
    }

    #[test]
    fn test_one_temperature_counts_as_none() {
        let mut map = DataMap::new();
        map.put_string(KEY_HIGH_TEMPERATURE, "75°");
        let update = decode_weather_update(&map);
        assert!(update.temperatures.is_none());
        assert!(update.is_empty());
    }

    #[test]
    fn test_mistyped_fields_are_ignored() {
        let mut map = DataMap::new();
        map.put_int(KEY_HIGH_TEMPERATURE, 75);
        map.put_string(KEY_LOW_TEMPERATURE, "58°");
        map.put_string(KEY_WEATHER_ICON, "not bytes");
        let update = decode_weather_update(&map);
        assert!(update.temperatures.is_none());
        assert!(update.icon.is_none());
    }

    #[test]
    fn test_image_item_decodes_asset() {
        let asset = AssetRef::for_bytes(b"png", NodeId::from("phone"));
        let map = encode_image(asset.clone(), 99);
        let update = decode_for_path(PATH_IMAGE, &map).unwrap();
        assert_eq!(update.icon, Some(IconPayload::Asset(asset)));
        assert_eq!(update.timestamp, Some(99));
        assert!(update.temperatures.is_none());
    }

    #[test]
    fn test_request_path_is_not_weather() {
        let err = decode_for_path(PATH_REQUEST_WEATHER, &DataMap::new()).unwrap_err();
        assert!(matches!(err, SyncError::DecodeFailed(_)));
    }

    #[test]
    fn test_truncated_message_fails_cleanly() {
        let map = encode_weather_update(&snapshot("75°", "58°"), None, None);
        let bytes = map.to_bytes().unwrap();
        let result = decode_message(PATH_WEATHER_UPDATE, &bytes[..bytes.len() / 2]);
        assert!(matches!(result, Err(SyncError::DecodeFailed(_))));
    }
}
