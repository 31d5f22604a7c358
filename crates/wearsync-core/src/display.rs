//! Display notification on the watch
//!
//! The watch coordinator hands every applied update to a [`DisplayLayer`].
//! [`ChannelDisplay`] fans those out on a broadcast channel so any number of
//! renderers (or a CLI printing lines) can follow along.

use std::fmt;

use tokio::sync::broadcast;
use tracing::debug;

use crate::icon::DecodedIcon;

/// What the watch face currently shows
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DisplayedWeather {
    pub high: Option<String>,
    pub low: Option<String>,
    pub icon: Option<DecodedIcon>,
    /// Advisory only; never used to reject an update
    pub timestamp: Option<i64>,
}

impl DisplayedWeather {
    pub fn has_temperatures(&self) -> bool {
        self.high.is_some() && self.low.is_some()
    }

    pub fn is_empty(&self) -> bool {
        !self.has_temperatures() && self.icon.is_none()
    }
}

impl fmt::Display for DisplayedWeather {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.high, &self.low) {
            (Some(high), Some(low)) => write!(f, "high {} low {}", high, low)?,
            _ => write!(f, "no temperatures")?,
        }
        match &self.icon {
            Some(icon) => write!(f, " icon {}x{}", icon.width, icon.height),
            None => write!(f, " no icon"),
        }
    }
}

/// Receiver of decoded weather on the watch
///
/// `timestamp` is the publish time in epoch millis, when the phone sent one.
pub trait DisplayLayer: Send + Sync {
    fn on_weather_updated(
        &self,
        high: Option<&str>,
        low: Option<&str>,
        icon: Option<&DecodedIcon>,
        timestamp: Option<i64>,
    );
}

/// Broadcasts each update as a [`DisplayedWeather`]
#[derive(Debug, Clone)]
pub struct ChannelDisplay {
    tx: broadcast::Sender<DisplayedWeather>,
}

impl ChannelDisplay {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DisplayedWeather> {
        self.tx.subscribe()
    }
}

impl DisplayLayer for ChannelDisplay {
    fn on_weather_updated(
        &self,
        high: Option<&str>,
        low: Option<&str>,
        icon: Option<&DecodedIcon>,
        timestamp: Option<i64>,
    ) {
        let update = DisplayedWeather {
            high: high.map(str::to_string),
            low: low.map(str::to_string),
            icon: icon.cloned(),
            timestamp,
        };
        debug!(%update, "Display notified");
        // No subscribers is fine
        let _ = self.tx.send(update);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_display_broadcasts() {
        let display = ChannelDisplay::new(8);
        let mut rx = display.subscribe();

        display.on_weather_updated(Some("24°"), Some("14°"), None, Some(1_445_090_000_000));

        let update = rx.recv().await.unwrap();
        assert_eq!(update.high.as_deref(), Some("24°"));
        assert_eq!(update.low.as_deref(), Some("14°"));
        assert!(update.icon.is_none());
        assert_eq!(update.timestamp, Some(1_445_090_000_000));
    }

    #[test]
    fn test_send_without_subscribers_is_ok() {
        let display = ChannelDisplay::new(1);
        display.on_weather_updated(None, None, None, None);
    }

    #[test]
    fn test_displayed_weather_format() {
        let weather = DisplayedWeather {
            high: Some("75°".to_string()),
            low: Some("58°".to_string()),
            icon: Some(DecodedIcon {
                width: 22,
                height: 22,
                png: vec![],
            }),
            timestamp: None,
        };
        assert_eq!(weather.to_string(), "high 75° low 58° icon 22x22");
        assert_eq!(DisplayedWeather::default().to_string(), "no temperatures no icon");
        assert!(DisplayedWeather::default().is_empty());
    }
}
