//! Transport over iroh: a gossip topic per pairing plus iroh-blobs assets
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────── phone ────────────┐        ┌──────────── watch ────────────┐
//! │ IrohTransport::host()         │        │ IrohTransport::join(code)     │
//! │   GossipNode                  │◄──────►│   GossipNode                  │
//! │    ├── gossip topic ──────────┼─frames─┼──► listener task              │
//! │    └── blobs (icon assets) ───┼──QUIC──┼──► resolve_asset()            │
//! └───────────────────────────────┘        └───────────────────────────────┘
//! ```
//!
//! Everything on the topic is a postcard-encoded [`GossipFrame`]. Messages
//! name their recipient and are ignored by everyone else. Data items carry a
//! ULID; a device keeps only the newest item per path and drops stale ones.
//!
//! A session opens once at least one neighbor is up on the topic.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use iroh::{PublicKey, SecretKey};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::blobs::BlobManager;
use crate::error::{SyncError, SyncResult};
use crate::pairing::{topic_for_secret, NodeAddrBytes, PairingCode};
use crate::sync::events::{DataEvent, MessageEvent, TransportEvent};
use crate::sync::protocol::{AssetRef, DataMap};
use crate::types::{ItemId, NodeId, RemoteNode};

use super::gossip::{GossipNode, TopicEvent, TopicReceiver, TopicSender};
use super::{Session, SessionFlag, Transport};

/// Settings for binding an iroh transport
#[derive(Clone, Default)]
pub struct IrohConfig {
    /// Stable identity; a fresh key is generated when unset
    pub secret_key: Option<SecretKey>,
    /// Persist assets under this directory instead of memory
    pub blob_dir: Option<PathBuf>,
    /// Event channel capacity (0 means 256)
    pub event_capacity: usize,
}

impl std::fmt::Debug for IrohConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IrohConfig")
            .field("secret_key", &self.secret_key.as_ref().map(|_| "<redacted>"))
            .field("blob_dir", &self.blob_dir)
            .field("event_capacity", &self.event_capacity)
            .finish()
    }
}

impl IrohConfig {
    pub fn with_secret_key(mut self, key: SecretKey) -> Self {
        self.secret_key = Some(key);
        self
    }

    pub fn with_blob_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.blob_dir = Some(dir.into());
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    fn capacity(&self) -> usize {
        if self.event_capacity == 0 {
            256
        } else {
            self.event_capacity
        }
    }

    async fn blob_manager(&self) -> SyncResult<BlobManager> {
        match &self.blob_dir {
            Some(dir) => BlobManager::new_persistent(dir).await,
            None => Ok(BlobManager::new_memory()),
        }
    }
}

/// Wire frame on the pairing topic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GossipFrame {
    Message {
        from: NodeId,
        to: NodeId,
        path: String,
        data: Vec<u8>,
    },
    DataItem {
        origin: NodeId,
        item_id: ItemId,
        path: String,
        fields: DataMap,
    },
}

impl GossipFrame {
    pub fn to_bytes(&self) -> SyncResult<Vec<u8>> {
        postcard::to_allocvec(self)
            .map_err(|e| SyncError::Serialization(format!("Failed to encode frame: {}", e)))
    }

    pub fn from_bytes(bytes: &[u8]) -> SyncResult<Self> {
        postcard::from_bytes(bytes)
            .map_err(|e| SyncError::DecodeFailed(format!("Malformed gossip frame: {}", e)))
    }
}

/// Node id for an endpoint key: lowercase hex of the 32 key bytes
pub fn node_id_for(key: &PublicKey) -> NodeId {
    NodeId::new(hex::encode(key.as_bytes()))
}

/// Inverse of [`node_id_for`]
pub fn public_key_for(node: &NodeId) -> SyncResult<PublicKey> {
    let bytes = hex::decode(node.as_str())
        .map_err(|e| SyncError::Network(format!("Node id {} is not hex: {}", node.short(), e)))?;
    let arr: [u8; 32] = bytes
        .try_into()
        .map_err(|_| SyncError::Network(format!("Node id {} has wrong length", node.short())))?;
    PublicKey::from_bytes(&arr)
        .map_err(|e| SyncError::Network(format!("Node id {} is not a key: {}", node.short(), e)))
}

struct Shared {
    node: GossipNode,
    sender: TopicSender,
    local: NodeId,
    secret: [u8; 32],
    neighbors: RwLock<BTreeMap<NodeId, PublicKey>>,
    neighbor_count: watch::Sender<usize>,
    events: broadcast::Sender<TransportEvent>,
    /// Newest item id seen per path, ours or received
    items: RwLock<HashMap<String, ItemId>>,
}

impl Shared {
    fn neighbor_up(&self, key: PublicKey) {
        let mut neighbors = self.neighbors.write();
        neighbors.insert(node_id_for(&key), key);
        self.neighbor_count.send_replace(neighbors.len());
    }

    fn neighbor_down(&self, key: PublicKey) {
        let mut neighbors = self.neighbors.write();
        neighbors.remove(&node_id_for(&key));
        self.neighbor_count.send_replace(neighbors.len());
    }

    /// Record `id` for `path` if it is newer than what we hold.
    fn accept_item(&self, path: &str, id: ItemId) -> bool {
        let mut items = self.items.write();
        match items.get(path) {
            Some(current) if current.0 >= id.0 => false,
            _ => {
                items.insert(path.to_string(), id);
                true
            }
        }
    }

    fn handle_frame(&self, frame: GossipFrame) {
        match frame {
            GossipFrame::Message {
                from,
                to,
                path,
                data,
            } => {
                if to != self.local {
                    trace!(to = %to.short(), "Message for another node");
                    return;
                }
                debug!(from = %from.short(), path, "Message received");
                let _ = self
                    .events
                    .send(TransportEvent::Message(MessageEvent { from, path, data }));
            }
            GossipFrame::DataItem {
                origin,
                item_id,
                path,
                fields,
            } => {
                if origin == self.local {
                    return;
                }
                if !self.accept_item(&path, item_id) {
                    debug!(path, %item_id, "Dropping stale data item");
                    return;
                }
                debug!(origin = %origin.short(), path, %item_id, "Data item changed");
                let _ = self.events.send(TransportEvent::DataChanged(DataEvent {
                    origin,
                    item_id,
                    path,
                    fields,
                }));
            }
        }
    }
}

/// Device transport backed by an iroh endpoint
#[derive(Clone)]
pub struct IrohTransport {
    shared: Arc<Shared>,
    listener: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl std::fmt::Debug for IrohTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IrohTransport")
            .field("local", &self.shared.local)
            .field("neighbors", &self.shared.neighbors.read().len())
            .finish()
    }
}

impl IrohTransport {
    /// Bind as the phone: a fresh pairing secret, no bootstrap peers.
    ///
    /// Share [`pairing_code`](Self::pairing_code) with the watch.
    pub async fn host(config: IrohConfig) -> SyncResult<Self> {
        let mut secret = [0u8; 32];
        rand::RngCore::fill_bytes(&mut rand::rng(), &mut secret);
        Self::start(config, secret, None).await
    }

    /// Bind as the phone, reusing a known pairing secret.
    pub async fn host_with_secret(config: IrohConfig, secret: [u8; 32]) -> SyncResult<Self> {
        Self::start(config, secret, None).await
    }

    /// Bind as the watch and join the phone named in `code`.
    pub async fn join(config: IrohConfig, code: &PairingCode) -> SyncResult<Self> {
        Self::start(config, code.secret, Some(&code.phone)).await
    }

    async fn start(
        config: IrohConfig,
        secret: [u8; 32],
        bootstrap: Option<&NodeAddrBytes>,
    ) -> SyncResult<Self> {
        let blobs = config.blob_manager().await?;
        let node = GossipNode::spawn(config.secret_key.clone(), blobs).await?;

        let mut bootstrap_ids = Vec::new();
        if let Some(phone) = bootstrap {
            let addr = phone.to_endpoint_addr()?;
            bootstrap_ids.push(addr.id);
            node.add_peer_addr(addr);
        }

        let (sender, receiver) = node.subscribe(topic_for_secret(&secret), bootstrap_ids).await?;
        let local = node_id_for(&node.endpoint_id());
        let (events, _) = broadcast::channel(config.capacity());
        let (neighbor_count, _) = watch::channel(0usize);

        info!(node = %local.short(), "Iroh transport started");
        let shared = Arc::new(Shared {
            node,
            sender,
            local,
            secret,
            neighbors: RwLock::new(BTreeMap::new()),
            neighbor_count,
            events,
            items: RwLock::new(HashMap::new()),
        });

        let listener = tokio::spawn(Self::listen(shared.clone(), receiver));
        Ok(Self {
            shared,
            listener: Arc::new(Mutex::new(Some(listener))),
        })
    }

    async fn listen(shared: Arc<Shared>, mut receiver: TopicReceiver) {
        while let Some(event) = receiver.recv_event().await {
            match event {
                TopicEvent::NeighborUp(key) => shared.neighbor_up(key),
                TopicEvent::NeighborDown(key) => shared.neighbor_down(key),
                TopicEvent::Message { from, content } => match GossipFrame::from_bytes(&content) {
                    Ok(frame) => shared.handle_frame(frame),
                    Err(e) => warn!(from = %from, error = %e, "Ignoring undecodable frame"),
                },
            }
        }
        debug!("Topic listener exited");
    }

    /// Code the watch needs to pair with this device
    pub fn pairing_code(&self) -> PairingCode {
        PairingCode::with_secret(
            self.shared.secret,
            NodeAddrBytes::from_endpoint_addr(&self.shared.node.endpoint_addr()),
        )
    }

    /// Number of devices currently joined to the topic
    pub fn neighbor_count(&self) -> usize {
        *self.shared.neighbor_count.borrow()
    }

    /// Stop the listener and close the endpoint.
    pub async fn shutdown(&self) -> SyncResult<()> {
        if let Some(handle) = self.listener.lock().take() {
            handle.abort();
        }
        self.shared.node.shutdown().await
    }
}

#[async_trait]
impl Transport for IrohTransport {
    fn local_node(&self) -> NodeId {
        self.shared.local.clone()
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.shared.events.subscribe()
    }

    async fn open(&self, timeout: Duration) -> SyncResult<Box<dyn Session>> {
        let mut count = self.shared.neighbor_count.subscribe();
        let joined = tokio::time::timeout(timeout, async {
            count.wait_for(|n| *n > 0).await.map(|_| ())
        })
        .await;

        match joined {
            Ok(Ok(())) => Ok(Box::new(IrohSession {
                shared: self.shared.clone(),
                flag: SessionFlag::default(),
            })),
            Ok(Err(_)) => Err(SyncError::Network("transport shut down".to_string())),
            Err(_) => {
                debug!(?timeout, "No neighbor joined in time");
                Err(SyncError::ConnectionTimeout(timeout))
            }
        }
    }
}

struct IrohSession {
    shared: Arc<Shared>,
    flag: SessionFlag,
}

#[async_trait]
impl Session for IrohSession {
    async fn list_nodes(&self) -> SyncResult<BTreeSet<RemoteNode>> {
        self.flag.ensure_open()?;
        Ok(self
            .shared
            .neighbors
            .read()
            .keys()
            .cloned()
            .map(RemoteNode::new)
            .collect())
    }

    async fn send_message(
        &self,
        node: &NodeId,
        path: &str,
        data: Option<Vec<u8>>,
    ) -> SyncResult<()> {
        self.flag.ensure_open()?;
        if !self.shared.neighbors.read().contains_key(node) {
            return Err(SyncError::SendFailed(format!(
                "{} is not joined to the topic",
                node.short()
            )));
        }

        let frame = GossipFrame::Message {
            from: self.shared.local.clone(),
            to: node.clone(),
            path: path.to_string(),
            data: data.unwrap_or_default(),
        };
        self.shared.sender.broadcast(frame.to_bytes()?).await
    }

    async fn put_data_item(&self, path: &str, fields: DataMap) -> SyncResult<ItemId> {
        self.flag.ensure_open()?;
        let item_id = ItemId::new();
        self.shared.accept_item(path, item_id);

        let frame = GossipFrame::DataItem {
            origin: self.shared.local.clone(),
            item_id,
            path: path.to_string(),
            fields,
        };
        self.shared.sender.broadcast(frame.to_bytes()?).await?;
        Ok(item_id)
    }

    async fn create_asset(&self, bytes: Vec<u8>) -> SyncResult<AssetRef> {
        self.flag.ensure_open()?;
        let hash = self.shared.node.blobs().import_asset(bytes).await?;
        Ok(AssetRef {
            digest: BlobManager::hash_to_hex(&hash),
            provider: self.shared.local.clone(),
        })
    }

    async fn resolve_asset(&self, asset: &AssetRef) -> SyncResult<Vec<u8>> {
        self.flag.ensure_open()?;
        let resolve_err = |e: SyncError| SyncError::AssetResolveFailed(e.to_string());

        let hash = BlobManager::parse_hash(&asset.digest).map_err(resolve_err)?;
        let blobs = self.shared.node.blobs();

        if !blobs.has_blob(&hash).await.map_err(resolve_err)? {
            let provider = public_key_for(&asset.provider).map_err(resolve_err)?;
            blobs
                .download_from(hash, provider, self.shared.node.endpoint())
                .await
                .map_err(resolve_err)?;
        }

        let bytes = blobs
            .get_bytes(&hash)
            .await
            .map_err(resolve_err)?
            .ok_or_else(|| {
                SyncError::AssetResolveFailed(format!("{} not available", asset.digest))
            })?;
        Ok(bytes.to_vec())
    }

    async fn close(&self) {
        if self.flag.close() {
            trace!("Iroh session closed");
        }
    }

    fn is_closed(&self) -> bool {
        self.flag.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::protocol::KEY_HIGH_TEMPERATURE;

    #[test]
    fn test_frame_roundtrip() {
        let mut fields = DataMap::new();
        fields.put_string(KEY_HIGH_TEMPERATURE, "24°");
        let frame = GossipFrame::DataItem {
            origin: NodeId::from("phone"),
            item_id: ItemId::new(),
            path: "/weather-update".to_string(),
            fields,
        };
        let decoded = GossipFrame::from_bytes(&frame.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_garbage_frame_is_decode_failed() {
        assert!(matches!(
            GossipFrame::from_bytes(&[0xFF; 3]),
            Err(SyncError::DecodeFailed(_))
        ));
    }

    #[test]
    fn test_node_id_key_roundtrip() {
        let key = SecretKey::generate(&mut rand::rng()).public();
        let node = node_id_for(&key);
        assert_eq!(node.as_str().len(), 64);
        assert_eq!(public_key_for(&node).unwrap(), key);
        assert!(public_key_for(&NodeId::from("watch")).is_err());
    }

    #[tokio::test]
    async fn test_open_without_companion_times_out() {
        let phone = IrohTransport::host(IrohConfig::default()).await.unwrap();
        let result = phone.open(Duration::from_millis(200)).await;
        assert!(matches!(result, Err(SyncError::ConnectionTimeout(_))));
        phone.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_pairing_code_carries_topic_secret() {
        let phone = IrohTransport::host(IrohConfig::default()).await.unwrap();
        let code = phone.pairing_code();
        let decoded = PairingCode::decode(&code.encode().unwrap()).unwrap();
        assert_eq!(decoded.topic_id(), code.topic_id());
        assert_eq!(
            decoded.phone.node_id,
            *public_key_for(&phone.local_node()).unwrap().as_bytes()
        );
        phone.shutdown().await.unwrap();
    }
}
