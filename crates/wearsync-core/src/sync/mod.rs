//! Weather snapshot sync between a phone and its watch
//!
//! ## Overview
//!
//! The watch asks, the phone answers. Both sides run a coordinator on top
//! of a [`Transport`](crate::transport::Transport) and do their blocking
//! work on a bounded [`WorkerPool`].
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────┐                ┌───────────────────────────┐
//! │  WatchRequester           │ /request-weather│  PhoneResponder           │
//! │  ├── triggers (visible,   │ ──────────────► │  ├── listener             │
//! │  │   ambient, timer)      │  {requestId}    │  └── cycle on pool:       │
//! │  ├── NodeCache            │                 │      store ─► icon ─►     │
//! │  ├── PendingRequests      │ ◄────────────── │      publish              │
//! │  └── DisplayLayer         │ /weather-update │                           │
//! └───────────────────────────┘  (+ /image)     └───────────────────────────┘
//! ```
//!
//! ## Protocol
//!
//! Three paths, matched case-insensitively:
//!
//! - **/request-weather**: watch to phone, optional `requestId`
//! - **/weather-update**: temperatures, timestamp, optional icon, echoed id
//! - **/image**: icon asset plus a `time` field (data-item variant only)

pub mod events;
pub mod node_cache;
pub mod payload;
pub mod pending;
pub mod phone;
pub mod pool;
pub mod protocol;
pub mod watch;

pub use events::{
    CycleState, DataEvent, MessageEvent, SkipReason, SyncEvent, TransportEvent,
};
pub use node_cache::NodeCache;
pub use payload::{
    decode_for_path, decode_image, decode_message, decode_weather_update, encode_image,
    encode_weather_update, IconPayload, Temperatures, WeatherUpdate,
};
pub use pending::{Admission, PendingRequests};
pub use phone::{CycleOutcome, PhoneResponder};
pub use pool::WorkerPool;
pub use protocol::{
    AssetRef, DataMap, DataValue, SyncMessage, SyncPath, PATH_IMAGE, PATH_REQUEST_WEATHER,
    PATH_WEATHER_UPDATE,
};
pub use watch::WatchRequester;
