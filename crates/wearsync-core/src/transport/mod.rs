//! Transport abstraction between paired devices
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Transport (one per device, long-lived)                       │
//! │  ├── subscribe() ──► broadcast::Receiver<TransportEvent>     │
//! │  └── open(timeout) ──► Session (one per sync cycle)          │
//! │                         ├── list_nodes()                     │
//! │                         ├── send_message(node, path, bytes)  │
//! │                         ├── put_data_item(path, fields)      │
//! │                         ├── create_asset / resolve_asset     │
//! │                         └── close()  (idempotent)            │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Implementations:
//! - [`loopback::LoopbackFabric`]: in-process devices with reachability and
//!   latency knobs
//! - [`p2p::IrohTransport`]: QUIC endpoints, a gossip topic per pairing,
//!   and content-addressed blobs for assets

pub mod gossip;
pub mod loopback;
pub mod p2p;

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::{SyncError, SyncResult};
use crate::sync::events::TransportEvent;
use crate::sync::protocol::{AssetRef, DataMap};
use crate::types::{ItemId, NodeId, RemoteNode};

pub use loopback::{LoopbackFabric, LoopbackTransport};
pub use p2p::{IrohConfig, IrohTransport};

/// A device's connection to its companion-device service
#[async_trait]
pub trait Transport: Send + Sync {
    /// Identifier other devices see for this one
    fn local_node(&self) -> NodeId;

    /// Inbound messages and data-item changes.
    ///
    /// Events are delivered whether or not a session is open.
    fn subscribe(&self) -> broadcast::Receiver<TransportEvent>;

    /// Establish a session, giving up after `timeout`.
    async fn open(&self, timeout: Duration) -> SyncResult<Box<dyn Session>>;
}

/// A short-lived session owned by exactly one sync cycle
#[async_trait]
pub trait Session: Send + Sync {
    /// Companion nodes reachable right now. Empty is not an error.
    async fn list_nodes(&self) -> SyncResult<BTreeSet<RemoteNode>>;

    /// Fire-and-forget message to one node.
    ///
    /// `Ok` only means the local stack accepted it.
    async fn send_message(&self, node: &NodeId, path: &str, data: Option<Vec<u8>>)
        -> SyncResult<()>;

    /// Publish a data item. A later put on the same path replaces it.
    async fn put_data_item(&self, path: &str, fields: DataMap) -> SyncResult<ItemId>;

    /// Make `bytes` resolvable by peers.
    async fn create_asset(&self, bytes: Vec<u8>) -> SyncResult<AssetRef>;

    /// Fetch the content behind an asset reference.
    async fn resolve_asset(&self, asset: &AssetRef) -> SyncResult<Vec<u8>>;

    /// Release the session. Calling it again does nothing.
    async fn close(&self);

    fn is_closed(&self) -> bool;
}

/// Open/closed flag shared by session implementations
#[derive(Debug, Default)]
pub(crate) struct SessionFlag {
    closed: AtomicBool,
}

impl SessionFlag {
    /// `SessionClosed` once [`close`](Self::close) has run
    pub(crate) fn ensure_open(&self) -> SyncResult<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(SyncError::SessionClosed)
        } else {
            Ok(())
        }
    }

    /// Mark closed. Returns true only for the first call.
    pub(crate) fn close(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
