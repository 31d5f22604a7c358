//! iroh endpoint with gossip and blobs protocols mounted
//!
//! One [`GossipNode`] per device. It owns the QUIC endpoint, the gossip
//! instance and the router that serves our assets to the companion.

use std::sync::Arc;

use iroh::discovery::static_provider::StaticProvider;
use iroh::protocol::Router;
use iroh::{Endpoint, EndpointAddr, EndpointId, PublicKey, SecretKey};
use iroh_gossip::net::{Gossip, GOSSIP_ALPN};
use iroh_gossip::proto::TopicId;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::blobs::BlobManager;
use crate::error::{SyncError, SyncResult};

/// Gossip frames stay small; icons travel as blobs.
const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Event from a gossip topic
#[derive(Debug)]
pub enum TopicEvent {
    Message { from: PublicKey, content: Vec<u8> },
    NeighborUp(PublicKey),
    NeighborDown(PublicKey),
}

/// Sending half of a topic subscription, cheap to clone
#[derive(Clone)]
pub struct TopicSender {
    sender: Arc<Mutex<iroh_gossip::api::GossipSender>>,
    topic_id: TopicId,
}

impl TopicSender {
    /// Broadcast a message to all peers on this topic
    pub async fn broadcast(&self, msg: impl Into<Vec<u8>>) -> SyncResult<()> {
        let data: Vec<u8> = msg.into();
        debug!(topic = ?self.topic_id, len = data.len(), "Broadcasting frame");

        self.sender
            .lock()
            .await
            .broadcast(data.into())
            .await
            .map_err(|e| SyncError::SendFailed(format!("Failed to broadcast: {}", e)))
    }
}

/// Receiving half, polled by a single listener task
pub struct TopicReceiver {
    receiver: iroh_gossip::api::GossipReceiver,
    topic_id: TopicId,
}

impl TopicReceiver {
    /// Next message or neighbor change. `None` once the subscription ends.
    pub async fn recv_event(&mut self) -> Option<TopicEvent> {
        use iroh_gossip::api::Event;
        use n0_future::StreamExt;

        loop {
            match self.receiver.try_next().await {
                Ok(Some(Event::Received(msg))) => {
                    return Some(TopicEvent::Message {
                        from: msg.delivered_from,
                        content: msg.content.to_vec(),
                    });
                }
                Ok(Some(Event::NeighborUp(peer))) => {
                    info!(topic = ?self.topic_id, %peer, "Neighbor joined");
                    return Some(TopicEvent::NeighborUp(peer));
                }
                Ok(Some(Event::NeighborDown(peer))) => {
                    info!(topic = ?self.topic_id, %peer, "Neighbor left");
                    return Some(TopicEvent::NeighborDown(peer));
                }
                Ok(Some(Event::Lagged)) => {
                    warn!(topic = ?self.topic_id, "Lagged behind on topic");
                }
                Ok(None) => {
                    debug!(topic = ?self.topic_id, "Topic subscription closed");
                    return None;
                }
                Err(e) => {
                    warn!(topic = ?self.topic_id, error = ?e, "Error receiving from topic");
                    return None;
                }
            }
        }
    }
}

/// Endpoint, gossip and router for one device
#[derive(Debug)]
pub struct GossipNode {
    endpoint: Endpoint,
    gossip: Gossip,
    router: Router,
    static_provider: StaticProvider,
    blobs: BlobManager,
}

impl GossipNode {
    /// Bind an endpoint that speaks gossip and serves `blobs`.
    pub async fn spawn(secret_key: Option<SecretKey>, blobs: BlobManager) -> SyncResult<Self> {
        let secret_key = secret_key.unwrap_or_else(|| SecretKey::generate(&mut rand::rng()));
        let static_provider = StaticProvider::new();

        let endpoint = Endpoint::builder()
            .secret_key(secret_key)
            .alpns(vec![GOSSIP_ALPN.to_vec(), iroh_blobs::ALPN.to_vec()])
            .discovery(static_provider.clone())
            .bind()
            .await
            .map_err(|e| SyncError::Network(format!("Failed to bind endpoint: {}", e)))?;

        let endpoint_id = endpoint.id();
        info!(%endpoint_id, "Endpoint bound");

        let gossip = Gossip::builder()
            .max_message_size(MAX_MESSAGE_SIZE)
            .spawn(endpoint.clone());

        let router = Router::builder(endpoint.clone())
            .accept(GOSSIP_ALPN, gossip.clone())
            .accept(iroh_blobs::ALPN, blobs.protocol())
            .spawn();
        debug!("Router spawned with gossip and blobs");

        Ok(Self {
            endpoint,
            gossip,
            router,
            static_provider,
            blobs,
        })
    }

    pub fn endpoint_id(&self) -> EndpointId {
        self.endpoint.id()
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Full address (relay and direct addresses) for a pairing code
    pub fn endpoint_addr(&self) -> EndpointAddr {
        self.endpoint.addr()
    }

    pub fn blobs(&self) -> &BlobManager {
        &self.blobs
    }

    /// Make a peer's address known without waiting for discovery.
    pub fn add_peer_addr(&self, endpoint_addr: EndpointAddr) {
        debug!(peer = %endpoint_addr.id, "Adding peer address to static discovery");
        self.static_provider.add_endpoint_info(endpoint_addr);
    }

    /// Subscribe to `topic_id`, bootstrapping from `bootstrap_peers`.
    pub async fn subscribe(
        &self,
        topic_id: TopicId,
        bootstrap_peers: Vec<EndpointId>,
    ) -> SyncResult<(TopicSender, TopicReceiver)> {
        info!(?topic_id, peer_count = bootstrap_peers.len(), "Subscribing to topic");

        let topic = self
            .gossip
            .subscribe(topic_id, bootstrap_peers)
            .await
            .map_err(|e| SyncError::Network(format!("Failed to subscribe: {}", e)))?;
        let (sender, receiver) = topic.split();

        Ok((
            TopicSender {
                sender: Arc::new(Mutex::new(sender)),
                topic_id,
            },
            TopicReceiver { receiver, topic_id },
        ))
    }

    /// Stop serving and close the endpoint.
    pub async fn shutdown(&self) -> SyncResult<()> {
        if let Err(e) = self.router.shutdown().await {
            warn!(error = ?e, "Failed to shutdown router cleanly");
        }
        self.endpoint.close().await;
        info!("Gossip node shut down");
        Ok(())
    }
}
