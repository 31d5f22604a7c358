//! tracing Layer that appends events to a device's JSONL file.

use std::fmt::Write as FmtWrite;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, Layer};

use super::entry::JsonLogEntry;
use super::writer::DeviceLogWriter;

/// Writes every event it sees to `<log-dir>/raw/<date>_<device>.jsonl`
pub struct JsonlLayer {
    writer: Arc<DeviceLogWriter>,
}

impl JsonlLayer {
    pub fn new(logs_dir: impl AsRef<Path>, device: impl Into<String>) -> std::io::Result<Self> {
        let writer = DeviceLogWriter::new(logs_dir, device)?;
        Ok(Self {
            writer: Arc::new(writer),
        })
    }

    pub fn log_path(&self) -> &Path {
        self.writer.path()
    }

    pub fn device(&self) -> &str {
        self.writer.device()
    }
}

impl<S> Layer<S> for JsonlLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let level = metadata.level().as_str().to_lowercase();

        let mut visitor = JsonVisitor::default();
        event.record(&mut visitor);

        let mut entry = JsonLogEntry::new(
            level,
            self.writer.device(),
            metadata.target(),
            visitor.message.unwrap_or_default(),
        );
        if !visitor.fields.is_empty() {
            entry = entry.with_fields(serde_json::Value::Object(visitor.fields));
        }
        if let Some(scope) = ctx.event_scope(event) {
            let spans: Vec<&str> = scope.from_root().map(|span| span.name()).collect();
            if !spans.is_empty() {
                entry = entry.with_span(spans.join(" > "));
            }
        }

        // A failing log write must never take the sync cycle down with it
        let _ = self.writer.write(&entry);
    }
}

#[derive(Default)]
struct JsonVisitor {
    message: Option<String>,
    fields: serde_json::Map<String, serde_json::Value>,
}

impl JsonVisitor {
    fn insert(&mut self, field: &Field, value: serde_json::Value) {
        self.fields.insert(field.name().to_string(), value);
    }
}

impl Visit for JsonVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let mut buf = String::new();
        let _ = write!(&mut buf, "{:?}", value);
        if field.name() == "message" {
            self.message = Some(buf);
        } else {
            self.insert(field, serde_json::Value::String(buf));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.insert(field, serde_json::Value::String(value.to_string()));
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, value.into());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, value.into());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, value.into());
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        if let Some(n) = serde_json::Number::from_f64(value) {
            self.insert(field, serde_json::Value::Number(n));
        }
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.insert(field, serde_json::Value::String(value.to_string()));
    }
}

/// Installs the global subscriber for a binary.
///
/// Console output always; the JSONL file only when a log directory is set.
/// `RUST_LOG` overrides the verbosity-derived filter.
pub struct LoggingBuilder {
    device: String,
    verbosity: u8,
    logs_dir: Option<PathBuf>,
}

impl LoggingBuilder {
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            verbosity: 0,
            logs_dir: None,
        }
    }

    /// 0 = warn, 1 = info, 2 = debug, 3+ = trace
    pub fn verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    pub fn logs_dir(mut self, logs_dir: Option<PathBuf>) -> Self {
        self.logs_dir = logs_dir;
        self
    }

    /// Filter used when `RUST_LOG` is unset
    pub fn default_filter(&self) -> &'static str {
        match self.verbosity {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }

    /// Install the subscriber. Returns the JSONL path when file logging is on.
    pub fn init(self) -> std::io::Result<Option<PathBuf>> {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.default_filter()));

        let jsonl = match &self.logs_dir {
            Some(dir) => Some(JsonlLayer::new(dir, &self.device)?),
            None => None,
        };
        let path = jsonl.as_ref().map(|layer| layer.log_path().to_path_buf());

        tracing_subscriber::registry()
            .with(jsonl)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .with(filter)
            .try_init()
            .map_err(std::io::Error::other)?;

        if let Some(path) = &path {
            tracing::info!(device = %self.device, path = %path.display(), "JSONL logging enabled");
        }
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_jsonl_layer_captures_events() {
        let temp = TempDir::new().unwrap();
        let layer = JsonlLayer::new(temp.path(), "watch").unwrap();
        let log_path = layer.log_path().to_path_buf();

        let subscriber = tracing_subscriber::registry().with(layer);
        tracing::subscriber::with_default(subscriber, || {
            let span = tracing::info_span!("request_cycle");
            let _guard = span.enter();
            tracing::info!(request_id = "01HZX3", "Requested weather");
            tracing::warn!(recipients = 2u64, "Sent weather update");
        });

        let entries = crate::logging::read_all_entries(temp.path()).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(log_path.exists());

        let first = &entries[0];
        assert_eq!(first.device, "watch");
        assert_eq!(first.level, "info");
        assert_eq!(first.msg, "Requested weather");
        assert_eq!(first.field_str("request_id"), Some("01HZX3"));
        assert_eq!(first.span.as_deref(), Some("request_cycle"));
    }

    #[test]
    fn test_verbosity_maps_to_filter() {
        assert_eq!(LoggingBuilder::new("phone").default_filter(), "warn");
        assert_eq!(LoggingBuilder::new("phone").verbosity(1).default_filter(), "info");
        assert_eq!(LoggingBuilder::new("phone").verbosity(2).default_filter(), "debug");
        assert_eq!(LoggingBuilder::new("phone").verbosity(7).default_filter(), "trace");
    }
}
