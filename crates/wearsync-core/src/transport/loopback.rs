//! In-process transport fabric
//!
//! Any number of devices join one [`LoopbackFabric`]. Messages and data-item
//! changes are delivered through each device's broadcast channel, assets are
//! kept per device and fetched from their provider.
//!
//! Knobs:
//! - `set_reachable(node, false)` takes a device off the air. Its own
//!   sessions time out on open, and nobody can reach it.
//! - `set_latency(d)` delays session open, message delivery and asset
//!   fetches by `d`.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, info, trace};

use crate::error::{SyncError, SyncResult};
use crate::sync::events::{DataEvent, MessageEvent, TransportEvent};
use crate::sync::protocol::{AssetRef, DataMap};
use crate::types::{ItemId, NodeId, RemoteNode};

use super::{Session, SessionFlag, Transport};

/// Default capacity for each device's event channel
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug)]
struct Device {
    name: String,
    reachable: bool,
    events: broadcast::Sender<TransportEvent>,
    assets: HashMap<String, Vec<u8>>,
}

#[derive(Debug, Clone)]
struct StoredItem {
    id: ItemId,
    origin: NodeId,
    fields: DataMap,
}

#[derive(Debug, Default)]
struct FabricState {
    devices: BTreeMap<NodeId, Device>,
    items: HashMap<String, StoredItem>,
    latency: Duration,
}

/// Shared medium linking in-process devices
#[derive(Debug, Clone)]
pub struct LoopbackFabric {
    state: Arc<RwLock<FabricState>>,
    capacity: usize,
}

impl Default for LoopbackFabric {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackFabric {
    pub fn new() -> Self {
        Self::with_capacity(EVENT_CHANNEL_CAPACITY)
    }

    /// Fabric whose per-device event channels hold `capacity` events
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            state: Arc::new(RwLock::new(FabricState::default())),
            capacity: capacity.max(1),
        }
    }

    /// Add a device named `name`, or return the existing one.
    pub fn join(&self, name: &str) -> LoopbackTransport {
        let node = NodeId::new(name);
        let mut state = self.state.write();
        state.devices.entry(node.clone()).or_insert_with(|| {
            info!(device = name, "Device joined loopback fabric");
            let (events, _) = broadcast::channel(self.capacity);
            Device {
                name: name.to_string(),
                reachable: true,
                events,
                assets: HashMap::new(),
            }
        });
        LoopbackTransport {
            fabric: self.clone(),
            node,
        }
    }

    pub fn set_reachable(&self, node: &NodeId, reachable: bool) {
        if let Some(device) = self.state.write().devices.get_mut(node) {
            debug!(%node, reachable, "Reachability changed");
            device.reachable = reachable;
        }
    }

    pub fn set_latency(&self, latency: Duration) {
        self.state.write().latency = latency;
    }

    /// Current fields of the data item at `path`, if any
    pub fn item(&self, path: &str) -> Option<DataMap> {
        self.state.read().items.get(path).map(|item| item.fields.clone())
    }

    /// Publisher of the data item at `path`, if any
    pub fn item_origin(&self, path: &str) -> Option<NodeId> {
        self.state.read().items.get(path).map(|item| item.origin.clone())
    }

    fn latency(&self) -> Duration {
        self.state.read().latency
    }

    fn is_reachable(&self, node: &NodeId) -> bool {
        self.state
            .read()
            .devices
            .get(node)
            .map(|d| d.reachable)
            .unwrap_or(false)
    }
}

/// One device's handle on a [`LoopbackFabric`]
#[derive(Debug, Clone)]
pub struct LoopbackTransport {
    fabric: LoopbackFabric,
    node: NodeId,
}

impl LoopbackTransport {
    pub fn fabric(&self) -> &LoopbackFabric {
        &self.fabric
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    fn local_node(&self) -> NodeId {
        self.node.clone()
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        let mut state = self.fabric.state.write();
        match state.devices.get(&self.node) {
            Some(device) => device.events.subscribe(),
            // Only reachable if the fabric was rebuilt under us
            None => {
                let (events, rx) = broadcast::channel(self.fabric.capacity);
                state.devices.insert(
                    self.node.clone(),
                    Device {
                        name: self.node.to_string(),
                        reachable: true,
                        events,
                        assets: HashMap::new(),
                    },
                );
                rx
            }
        }
    }

    async fn open(&self, timeout: Duration) -> SyncResult<Box<dyn Session>> {
        if !self.fabric.is_reachable(&self.node) {
            // Nothing answers an off-air device; the caller waits it out
            tokio::time::sleep(timeout).await;
            debug!(node = %self.node, ?timeout, "Open timed out");
            return Err(SyncError::ConnectionTimeout(timeout));
        }

        let latency = self.fabric.latency();
        if latency >= timeout {
            tokio::time::sleep(timeout).await;
            return Err(SyncError::ConnectionTimeout(timeout));
        }
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        trace!(node = %self.node, "Session opened");
        Ok(Box::new(LoopbackSession {
            fabric: self.fabric.clone(),
            local: self.node.clone(),
            flag: SessionFlag::default(),
        }))
    }
}

struct LoopbackSession {
    fabric: LoopbackFabric,
    local: NodeId,
    flag: SessionFlag,
}

impl LoopbackSession {
    fn deliver(&self, sender: broadcast::Sender<TransportEvent>, event: TransportEvent) {
        let latency = self.fabric.latency();
        if latency.is_zero() {
            let _ = sender.send(event);
        } else {
            tokio::spawn(async move {
                tokio::time::sleep(latency).await;
                let _ = sender.send(event);
            });
        }
    }
}

#[async_trait]
impl Session for LoopbackSession {
    async fn list_nodes(&self) -> SyncResult<BTreeSet<RemoteNode>> {
        self.flag.ensure_open()?;
        let state = self.fabric.state.read();
        Ok(state
            .devices
            .iter()
            .filter(|(id, device)| **id != self.local && device.reachable)
            .map(|(id, device)| RemoteNode::new(id.clone()).with_display_name(&device.name))
            .collect())
    }

    async fn send_message(
        &self,
        node: &NodeId,
        path: &str,
        data: Option<Vec<u8>>,
    ) -> SyncResult<()> {
        self.flag.ensure_open()?;
        let sender = {
            let state = self.fabric.state.read();
            let local_up = state
                .devices
                .get(&self.local)
                .map(|d| d.reachable)
                .unwrap_or(false);
            match state.devices.get(node) {
                Some(target) if target.reachable && local_up => target.events.clone(),
                Some(_) => {
                    return Err(SyncError::SendFailed(format!("{} is unreachable", node)))
                }
                None => return Err(SyncError::SendFailed(format!("unknown node {}", node))),
            }
        };

        debug!(from = %self.local, to = %node, path, "Sending message");
        let event = TransportEvent::Message(MessageEvent {
            from: self.local.clone(),
            path: path.to_string(),
            data: data.unwrap_or_default(),
        });
        self.deliver(sender, event);
        Ok(())
    }

    async fn put_data_item(&self, path: &str, fields: DataMap) -> SyncResult<ItemId> {
        self.flag.ensure_open()?;
        let id = ItemId::new();
        let recipients: Vec<_> = {
            let mut state = self.fabric.state.write();
            state.items.insert(
                path.to_string(),
                StoredItem {
                    id,
                    origin: self.local.clone(),
                    fields: fields.clone(),
                },
            );
            state
                .devices
                .iter()
                .filter(|(node, device)| **node != self.local && device.reachable)
                .map(|(_, device)| device.events.clone())
                .collect()
        };

        debug!(origin = %self.local, path, %id, peers = recipients.len(), "Put data item");
        for sender in recipients {
            let event = TransportEvent::DataChanged(DataEvent {
                origin: self.local.clone(),
                item_id: id,
                path: path.to_string(),
                fields: fields.clone(),
            });
            self.deliver(sender, event);
        }
        Ok(id)
    }

    async fn create_asset(&self, bytes: Vec<u8>) -> SyncResult<AssetRef> {
        self.flag.ensure_open()?;
        let asset = AssetRef::for_bytes(&bytes, self.local.clone());
        let mut state = self.fabric.state.write();
        let device = state
            .devices
            .get_mut(&self.local)
            .ok_or_else(|| SyncError::Blob(format!("{} left the fabric", self.local)))?;
        trace!(digest = %asset.digest, len = bytes.len(), "Registered asset");
        device.assets.insert(asset.digest.clone(), bytes);
        Ok(asset)
    }

    async fn resolve_asset(&self, asset: &AssetRef) -> SyncResult<Vec<u8>> {
        self.flag.ensure_open()?;

        let local_copy = self
            .fabric
            .state
            .read()
            .devices
            .get(&self.local)
            .and_then(|d| d.assets.get(&asset.digest).cloned());
        if let Some(bytes) = local_copy {
            return Ok(bytes);
        }

        let latency = self.fabric.latency();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let state = self.fabric.state.read();
        let provider = state
            .devices
            .get(&asset.provider)
            .filter(|d| d.reachable)
            .ok_or_else(|| {
                SyncError::AssetResolveFailed(format!("provider {} unreachable", asset.provider))
            })?;
        let bytes = provider.assets.get(&asset.digest).ok_or_else(|| {
            SyncError::AssetResolveFailed(format!("{} has no asset {}", asset.provider, asset.digest))
        })?;
        if !asset.matches(bytes) {
            return Err(SyncError::AssetResolveFailed(format!(
                "digest mismatch for {}",
                asset.digest
            )));
        }
        Ok(bytes.clone())
    }

    async fn close(&self) {
        if self.flag.close() {
            trace!(node = %self.local, "Session closed");
        }
    }

    fn is_closed(&self) -> bool {
        self.flag.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::protocol::{KEY_HIGH_TEMPERATURE, PATH_WEATHER_UPDATE};

    #[tokio::test]
    async fn test_list_nodes_excludes_self_and_unreachable() {
        let fabric = LoopbackFabric::new();
        let phone = fabric.join("phone");
        fabric.join("watch");
        fabric.join("tablet");
        fabric.set_reachable(&NodeId::from("tablet"), false);

        let session = phone.open(Duration::from_millis(500)).await.unwrap();
        let nodes = session.list_nodes().await.unwrap();
        let ids: Vec<_> = nodes.iter().map(|n| n.id.as_str().to_string()).collect();
        assert_eq!(ids, vec!["watch".to_string()]);
    }

    #[tokio::test]
    async fn test_message_delivered_to_target() {
        let fabric = LoopbackFabric::new();
        let phone = fabric.join("phone");
        let watch = fabric.join("watch");
        let mut rx = phone.subscribe();

        let session = watch.open(Duration::from_millis(500)).await.unwrap();
        session
            .send_message(&NodeId::from("phone"), "/request-weather", None)
            .await
            .unwrap();

        match rx.recv().await.unwrap() {
            TransportEvent::Message(msg) => {
                assert_eq!(msg.from, NodeId::from("watch"));
                assert_eq!(msg.path, "/request-weather");
                assert!(msg.data.is_empty());
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_send_to_unknown_node_fails() {
        let fabric = LoopbackFabric::new();
        let watch = fabric.join("watch");
        let session = watch.open(Duration::from_millis(500)).await.unwrap();
        let err = session
            .send_message(&NodeId::from("ghost"), "/request-weather", None)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::SendFailed(_)));
    }

    #[tokio::test]
    async fn test_put_same_path_is_last_write_wins() {
        let fabric = LoopbackFabric::new();
        let phone = fabric.join("phone");
        let watch = fabric.join("watch");
        let mut rx = watch.subscribe();

        let session = phone.open(Duration::from_millis(500)).await.unwrap();
        let mut first = DataMap::new();
        first.put_string(KEY_HIGH_TEMPERATURE, "70°");
        first.put_string("extra", "only in first");
        session.put_data_item(PATH_WEATHER_UPDATE, first).await.unwrap();

        let mut second = DataMap::new();
        second.put_string(KEY_HIGH_TEMPERATURE, "75°");
        session.put_data_item(PATH_WEATHER_UPDATE, second.clone()).await.unwrap();

        assert_eq!(fabric.item(PATH_WEATHER_UPDATE), Some(second));
        assert_eq!(fabric.item_origin(PATH_WEATHER_UPDATE), Some(NodeId::from("phone")));

        // Both changes reach the watch; the publisher hears nothing
        assert!(matches!(rx.recv().await.unwrap(), TransportEvent::DataChanged(_)));
        assert!(matches!(rx.recv().await.unwrap(), TransportEvent::DataChanged(_)));
    }

    #[tokio::test]
    async fn test_asset_resolves_from_provider() {
        let fabric = LoopbackFabric::new();
        let phone = fabric.join("phone");
        let watch = fabric.join("watch");

        let phone_session = phone.open(Duration::from_millis(500)).await.unwrap();
        let asset = phone_session.create_asset(b"png bytes".to_vec()).await.unwrap();
        assert_eq!(asset.provider, NodeId::from("phone"));

        let watch_session = watch.open(Duration::from_millis(500)).await.unwrap();
        let bytes = watch_session.resolve_asset(&asset).await.unwrap();
        assert_eq!(bytes, b"png bytes");

        fabric.set_reachable(&NodeId::from("phone"), false);
        let err = watch_session.resolve_asset(&asset).await.unwrap_err();
        assert!(matches!(err, SyncError::AssetResolveFailed(_)));
    }

    #[tokio::test]
    async fn test_unknown_asset_fails() {
        let fabric = LoopbackFabric::new();
        fabric.join("phone");
        let watch = fabric.join("watch");
        let session = watch.open(Duration::from_millis(500)).await.unwrap();
        let asset = AssetRef::for_bytes(b"never stored", NodeId::from("phone"));
        assert!(matches!(
            session.resolve_asset(&asset).await,
            Err(SyncError::AssetResolveFailed(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_off_air_device_times_out() {
        let fabric = LoopbackFabric::new();
        let watch = fabric.join("watch");
        fabric.set_reachable(&NodeId::from("watch"), false);

        let started = tokio::time::Instant::now();
        let result = watch.open(Duration::from_millis(500)).await;
        assert!(matches!(result, Err(SyncError::ConnectionTimeout(_))));
        assert_eq!(started.elapsed(), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_closed_session_rejects_operations() {
        let fabric = LoopbackFabric::new();
        let watch = fabric.join("watch");
        let session = watch.open(Duration::from_millis(500)).await.unwrap();
        session.close().await;
        session.close().await;
        assert!(session.is_closed());
        assert!(matches!(
            session.list_nodes().await,
            Err(SyncError::SessionClosed)
        ));
    }
}
