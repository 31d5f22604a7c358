//! Forecast rows as read from the snapshot store, and temperature formatting

use serde::{Deserialize, Serialize};

/// Unit used when formatting temperatures for display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemperatureUnit {
    /// Celsius (values are stored in Celsius)
    #[default]
    Metric,
    /// Fahrenheit
    Imperial,
}

/// Current forecast as returned by the snapshot store.
///
/// Temperatures are in Celsius; `condition_code` is an OpenWeatherMap
/// condition id (e.g. 800 for clear sky).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForecastRow {
    pub max_temp: f64,
    pub min_temp: f64,
    pub condition_code: i32,
}

impl ForecastRow {
    pub fn new(max_temp: f64, min_temp: f64, condition_code: i32) -> Self {
        Self {
            max_temp,
            min_temp,
            condition_code,
        }
    }
}

/// Format a Celsius temperature as a whole-degree string, e.g. `"24°"`.
///
/// Imperial converts to Fahrenheit first. Halves round away from zero.
pub fn format_temperature(celsius: f64, unit: TemperatureUnit) -> String {
    let value = match unit {
        TemperatureUnit::Metric => celsius,
        TemperatureUnit::Imperial => celsius * 1.8 + 32.0,
    };
    let rounded = value.round() as i64;
    format!("{}\u{00B0}", rounded)
}
