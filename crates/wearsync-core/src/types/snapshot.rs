//! Weather snapshot built on the phone for each sync cycle

use serde::{Deserialize, Serialize};

use super::forecast::{format_temperature, ForecastRow, TemperatureUnit};

/// A point-in-time condensed forecast.
///
/// Built fresh from the snapshot store on every cycle and never persisted.
/// `condition_icon_id` stays local; only the rendered `icon_image` (PNG)
/// travels to the watch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeatherSnapshot {
    pub high_temperature: String,
    pub low_temperature: String,
    pub condition_icon_id: i32,
    pub icon_image: Option<Vec<u8>>,
    /// Epoch millis when the snapshot was produced
    pub timestamp: i64,
}

impl WeatherSnapshot {
    /// Build a text-only snapshot from a forecast row.
    pub fn from_forecast(row: &ForecastRow, unit: TemperatureUnit, timestamp: i64) -> Self {
        Self {
            high_temperature: format_temperature(row.max_temp, unit),
            low_temperature: format_temperature(row.min_temp, unit),
            condition_icon_id: row.condition_code,
            icon_image: None,
            timestamp,
        }
    }

    /// Attach rendered PNG icon bytes.
    pub fn with_icon(mut self, png: Vec<u8>) -> Self {
        self.icon_image = Some(png);
        self
    }

    pub fn has_icon(&self) -> bool {
        self.icon_image.as_ref().is_some_and(|b| !b.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_forecast_formats_temperatures() {
        let row = ForecastRow::new(23.9, 14.4, 800);
        let snapshot = WeatherSnapshot::from_forecast(&row, TemperatureUnit::Imperial, 42);
        assert_eq!(snapshot.high_temperature, "75°");
        assert_eq!(snapshot.low_temperature, "58°");
        assert_eq!(snapshot.condition_icon_id, 800);
        assert_eq!(snapshot.timestamp, 42);
        assert!(!snapshot.has_icon());
    }

    #[test]
    fn test_empty_icon_is_not_an_icon() {
        let row = ForecastRow::new(20.0, 10.0, 500);
        let snapshot = WeatherSnapshot::from_forecast(&row, TemperatureUnit::Metric, 0).with_icon(vec![]);
        assert!(!snapshot.has_icon());
    }
}
