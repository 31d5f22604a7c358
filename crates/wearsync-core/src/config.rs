//! Runtime configuration for both ends of the sync exchange
//!
//! Every field has a default, so an empty JSON object (or no file at all)
//! gives a working configuration:
//!
//! ```json
//! {
//!   "watch_open_timeout_ms": 500,
//!   "publish_variant": "data_item",
//!   "greyscale_icon": false
//! }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{SyncError, SyncResult};
use crate::types::TemperatureUnit;

/// Name of the configuration file inside the config directory
pub const CONFIG_FILE_NAME: &str = "config.json";

/// How the phone delivers a weather snapshot to the wearable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishVariant {
    /// `/image` item with the icon asset, then a `/weather-update` item
    #[default]
    DataItem,
    /// One `/weather-update` item carrying temperatures and the icon asset
    DataItemInline,
    /// Direct `/weather-update` message to every reachable node
    Message,
}

/// Sync configuration shared by the phone responder and watch requester.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Session open timeout on the watch → phone request path
    pub watch_open_timeout_ms: u64,
    /// Session open timeout when the phone answers a request
    pub phone_open_timeout_ms: u64,
    /// Period of the recurring weather request while the watch is visible
    pub request_period_ms: u64,
    /// Maximum number of sync cycles running at once
    pub pool_size: usize,
    /// Upper bound on a single sync cycle, end to end
    pub cycle_timeout_ms: u64,
    /// How long an outstanding request id stays valid
    pub correlation_ttl_ms: u64,
    /// Edge length of the square icon sent to the watch, in pixels
    pub icon_size: u32,
    /// Desaturate the icon before encoding
    pub greyscale_icon: bool,
    /// Delivery variant used by the phone
    pub publish_variant: PublishVariant,
    /// Unit used to format temperatures on the phone
    pub temperature_unit: TemperatureUnit,
    /// Capacity of transport and display broadcast channels
    pub event_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            watch_open_timeout_ms: 500,
            phone_open_timeout_ms: 30_000,
            request_period_ms: 30 * 60 * 1000,
            pool_size: 4,
            cycle_timeout_ms: 45_000,
            correlation_ttl_ms: 60_000,
            icon_size: 22,
            greyscale_icon: true,
            publish_variant: PublishVariant::DataItem,
            temperature_unit: TemperatureUnit::Metric,
            event_capacity: 256,
        }
    }
}

impl SyncConfig {
    /// Load configuration from a JSON file and validate it.
    pub fn load(path: &Path) -> SyncResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: SyncConfig = serde_json::from_str(&raw)
            .map_err(|e| SyncError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        debug!(path = %path.display(), "Loaded sync config");
        Ok(config)
    }

    /// Load from `path` if given, else from the default location if it
    /// exists, else fall back to defaults.
    pub fn load_or_default(path: Option<&Path>) -> SyncResult<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }
        match Self::default_path() {
            Some(default) if default.exists() => Self::load(&default),
            _ => Ok(Self::default()),
        }
    }

    /// Default config file location (`~/.wearsync/config.json`)
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".wearsync").join(CONFIG_FILE_NAME))
    }

    /// Reject values that would stall or break a sync cycle.
    pub fn validate(&self) -> SyncResult<()> {
        let checks: [(&str, bool); 8] = [
            ("watch_open_timeout_ms", self.watch_open_timeout_ms > 0),
            ("phone_open_timeout_ms", self.phone_open_timeout_ms > 0),
            ("request_period_ms", self.request_period_ms > 0),
            ("pool_size", self.pool_size > 0),
            ("cycle_timeout_ms", self.cycle_timeout_ms > 0),
            ("correlation_ttl_ms", self.correlation_ttl_ms > 0),
            ("icon_size", self.icon_size > 0),
            ("event_capacity", self.event_capacity > 0),
        ];
        for (field, ok) in checks {
            if !ok {
                return Err(SyncError::Config(format!("{} must be greater than zero", field)));
            }
        }
        Ok(())
    }

    /// Replace zero values with their defaults. Both coordinators apply
    /// this on construction.
    pub fn sanitized(mut self) -> Self {
        let defaults = Self::default();
        replace_zero(
            "watch_open_timeout_ms",
            &mut self.watch_open_timeout_ms,
            defaults.watch_open_timeout_ms,
        );
        replace_zero(
            "phone_open_timeout_ms",
            &mut self.phone_open_timeout_ms,
            defaults.phone_open_timeout_ms,
        );
        replace_zero(
            "request_period_ms",
            &mut self.request_period_ms,
            defaults.request_period_ms,
        );
        replace_zero(
            "pool_size",
            &mut self.pool_size,
            defaults.pool_size,
        );
        replace_zero(
            "cycle_timeout_ms",
            &mut self.cycle_timeout_ms,
            defaults.cycle_timeout_ms,
        );
        replace_zero(
            "correlation_ttl_ms",
            &mut self.correlation_ttl_ms,
            defaults.correlation_ttl_ms,
        );
        replace_zero(
            "icon_size",
            &mut self.icon_size,
            defaults.icon_size,
        );
        replace_zero(
            "event_capacity",
            &mut self.event_capacity,
            defaults.event_capacity,
        );
        self
    }

    pub fn with_watch_open_timeout(mut self, timeout: Duration) -> Self {
        self.watch_open_timeout_ms = millis(timeout);
        self
    }

    pub fn with_phone_open_timeout(mut self, timeout: Duration) -> Self {
        self.phone_open_timeout_ms = millis(timeout);
        self
    }

    pub fn with_request_period(mut self, period: Duration) -> Self {
        self.request_period_ms = millis(period);
        self
    }

    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.pool_size = size;
        self
    }

    pub fn with_correlation_ttl(mut self, ttl: Duration) -> Self {
        self.correlation_ttl_ms = millis(ttl);
        self
    }

    pub fn with_publish_variant(mut self, variant: PublishVariant) -> Self {
        self.publish_variant = variant;
        self
    }

    pub fn with_greyscale(mut self, greyscale: bool) -> Self {
        self.greyscale_icon = greyscale;
        self
    }

    pub fn with_temperature_unit(mut self, unit: TemperatureUnit) -> Self {
        self.temperature_unit = unit;
        self
    }

    pub fn watch_open_timeout(&self) -> Duration {
        Duration::from_millis(self.watch_open_timeout_ms)
    }

    pub fn phone_open_timeout(&self) -> Duration {
        Duration::from_millis(self.phone_open_timeout_ms)
    }

    pub fn request_period(&self) -> Duration {
        Duration::from_millis(self.request_period_ms)
    }

    pub fn cycle_timeout(&self) -> Duration {
        Duration::from_millis(self.cycle_timeout_ms)
    }

    pub fn correlation_ttl(&self) -> Duration {
        Duration::from_millis(self.correlation_ttl_ms)
    }
}

/// Whole milliseconds, saturating at `u64::MAX`
fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn replace_zero<T: Copy + Default + PartialEq>(field: &str, value: &mut T, default: T) {
    if *value == T::default() {
        warn!(field, "Zero config value replaced with default");
        *value = default;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_match_protocol_timeouts() {
        let config = SyncConfig::default();
        assert_eq!(config.watch_open_timeout(), Duration::from_millis(500));
        assert_eq!(config.phone_open_timeout(), Duration::from_secs(30));
        assert_eq!(config.request_period(), Duration::from_secs(1800));
        assert_eq!(config.icon_size, 22);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, r#"{"icon_size": 48, "publish_variant": "message"}"#).unwrap();

        let config = SyncConfig::load(&path).unwrap();
        assert_eq!(config.icon_size, 48);
        assert_eq!(config.publish_variant, PublishVariant::Message);
        assert_eq!(config.watch_open_timeout_ms, 500);
    }

    #[test]
    fn test_zero_pool_rejected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, r#"{"pool_size": 0}"#).unwrap();

        let err = SyncConfig::load(&path).unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
        assert!(err.to_string().contains("pool_size"));
    }

    #[test]
    fn test_malformed_file_is_config_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "{ not json").unwrap();

        assert!(matches!(SyncConfig::load(&path), Err(SyncError::Config(_))));
    }

    #[test]
    fn test_builders() {
        let config = SyncConfig::default()
            .with_watch_open_timeout(Duration::from_millis(250))
            .with_pool_size(2)
            .with_greyscale(false);
        assert_eq!(config.watch_open_timeout_ms, 250);
        assert_eq!(config.pool_size, 2);
        assert!(!config.greyscale_icon);
    }

    #[test]
    fn test_sub_second_period_is_kept() {
        let config = SyncConfig::default().with_request_period(Duration::from_millis(500));
        assert_eq!(config.request_period(), Duration::from_millis(500));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_correlation_ttl_rejected() {
        let err = SyncConfig::default()
            .with_correlation_ttl(Duration::ZERO)
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("correlation_ttl_ms"));
    }

    #[test]
    fn test_huge_durations_saturate() {
        let config = SyncConfig::default().with_watch_open_timeout(Duration::MAX);
        assert_eq!(config.watch_open_timeout_ms, u64::MAX);
    }

    #[test]
    fn test_sanitized_replaces_zeros() {
        let mut config = SyncConfig::default()
            .with_correlation_ttl(Duration::ZERO)
            .with_pool_size(0)
            .with_watch_open_timeout(Duration::from_millis(250));
        config.request_period_ms = 0;

        let config = config.sanitized();
        assert!(config.validate().is_ok());
        assert_eq!(config.correlation_ttl(), Duration::from_secs(60));
        assert_eq!(config.request_period(), Duration::from_secs(1800));
        assert_eq!(config.pool_size, 4);
        assert_eq!(config.watch_open_timeout_ms, 250);
    }
}
