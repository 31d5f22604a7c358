//! Per-device JSONL logging.
//!
//! Phone and watch usually run as separate processes. Each one writes its
//! own JSONL file so the two can be merged afterwards and a request followed
//! by its `request_id` field.
//!
//! ## Layout
//!
//! ```text
//! logs/
//! └── raw/                         # one file per device per day
//!     ├── 2026-10-19_phone.jsonl
//!     └── 2026-10-19_watch.jsonl
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use wearsync_core::logging::LoggingBuilder;
//!
//! LoggingBuilder::new("watch")
//!     .verbosity(1)
//!     .logs_dir(Some("./logs".into()))
//!     .init()?;
//! ```
//!
//! ### Querying with jq
//!
//! ```bash
//! # Everything about one request, both devices
//! cat logs/raw/*.jsonl | jq -s 'sort_by(.ts) | .[] | select(.fields.request_id == "01HZX3...")'
//! ```

pub mod entry;
pub mod layer;
pub mod writer;

pub use entry::JsonLogEntry;
pub use layer::{JsonlLayer, LoggingBuilder};
pub use writer::{read_all_entries, read_entries_for_date, DeviceLogWriter};
