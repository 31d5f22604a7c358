//! wearsync Core Library
//!
//! Weather snapshot sync between a phone and a paired wearable.
//!
//! ## Overview
//!
//! The watch requests weather over a fire-and-forget message channel. The
//! phone answers with today's forecast (high, low and a condition icon)
//! either as replicated data items or as a direct message. The watch
//! decodes whatever arrives and hands it to its display.
//!
//! ## Core Principles
//!
//! - **Short sessions**: every cycle opens its own transport session and
//!   closes it on every exit path
//! - **Off the event path**: store reads, icon rendering and asset
//!   resolution run on a bounded worker pool
//! - **Tolerant decoding**: missing fields leave parts of the display
//!   unchanged rather than failing the update
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use wearsync_core::{
//!     ChannelDisplay, ForecastRow, GeneratedIconSource, LoopbackFabric, MemorySnapshotStore,
//!     PhoneResponder, SyncConfig, WatchRequester,
//! };
//!
//! let fabric = LoopbackFabric::new();
//! let phone = PhoneResponder::new(
//!     Arc::new(fabric.join("phone")),
//!     Arc::new(MemorySnapshotStore::with_forecast(ForecastRow::new(24.0, 14.0, 800))),
//!     Arc::new(GeneratedIconSource::default()),
//!     SyncConfig::default(),
//! );
//! phone.start();
//!
//! let display = ChannelDisplay::new(16);
//! let mut shown = display.subscribe();
//! let watch = WatchRequester::new(
//!     Arc::new(fabric.join("watch")),
//!     Arc::new(display),
//!     SyncConfig::default(),
//! );
//! watch.start();
//! watch.on_visibility_changed(true);
//!
//! println!("{}", shown.recv().await?);
//! ```

pub mod blobs;
pub mod config;
pub mod display;
pub mod error;
pub mod icon;
pub mod logging;
pub mod pairing;
pub mod store;
pub mod sync;
pub mod transport;
pub mod types;

// Re-exports
pub use blobs::BlobManager;
pub use config::{PublishVariant, SyncConfig};
pub use display::{ChannelDisplay, DisplayLayer, DisplayedWeather};
pub use error::{SyncError, SyncResult};
pub use icon::{
    decode_icon, DecodedIcon, DirectoryIconSource, GeneratedIconSource, IconKind, IconRenderer,
    IconSource,
};
pub use pairing::{NodeAddrBytes, PairingCode};
pub use store::{JsonFileSnapshotStore, MemorySnapshotStore, SnapshotStore};
pub use sync::{
    CycleOutcome, CycleState, PhoneResponder, SkipReason, SyncEvent, TransportEvent,
    WatchRequester,
};
pub use transport::{
    IrohConfig, IrohTransport, LoopbackFabric, LoopbackTransport, Session, Transport,
};
pub use types::*;
