//! Phone-side coordinator: answers weather requests from the watch
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  PhoneResponder                                                 │
//! │  ├── listener task: TransportEvent ──► /request-weather?        │
//! │  │                                         │                    │
//! │  │                               pool.spawn(cycle)              │
//! │  │                                         ▼                    │
//! │  └── cycle: open ─► query store ─► render icon ─► publish ─► close
//! │             Idle ──► Building ───────────────► Publishing ─► Idle
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A cycle returns to Idle whatever happens. Failures are logged and
//! reported as [`SyncEvent::CycleSkipped`]; the watch asks again later.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{PublishVariant, SyncConfig};
use crate::error::{SyncError, SyncResult};
use crate::icon::{IconRenderer, IconSource};
use crate::store::SnapshotStore;
use crate::transport::{Session, Transport};
use crate::types::{now_millis, CorrelationId, WeatherSnapshot};

use super::events::{CycleState, SkipReason, SyncEvent, TransportEvent};
use super::payload::{encode_image, encode_weather_update, IconPayload};
use super::pool::WorkerPool;
use super::protocol::{AssetRef, DataMap, SyncPath, PATH_IMAGE, PATH_WEATHER_UPDATE};

/// What a completed responder cycle did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The store had nothing to send
    NoData,
    /// Payload handed to the transport
    Published {
        /// Paths written, in order
        paths: Vec<String>,
        /// Nodes that accepted a message (message variant only)
        recipients: usize,
        with_icon: bool,
    },
}

struct Responder {
    transport: Arc<dyn Transport>,
    store: Arc<dyn SnapshotStore>,
    icons: Arc<dyn IconSource>,
    renderer: IconRenderer,
    config: SyncConfig,
    pool: WorkerPool,
    event_tx: broadcast::Sender<SyncEvent>,
}

/// Answers `/request-weather` with the current snapshot
pub struct PhoneResponder {
    inner: Arc<Responder>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl PhoneResponder {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn SnapshotStore>,
        icons: Arc<dyn IconSource>,
        config: SyncConfig,
    ) -> Self {
        let config = config.sanitized();
        let (event_tx, _) = broadcast::channel(config.event_capacity.max(1));
        let pool = WorkerPool::new(config.pool_size, config.cycle_timeout());
        let renderer = IconRenderer::new(config.icon_size, config.greyscale_icon);
        Self {
            inner: Arc::new(Responder {
                transport,
                store,
                icons,
                renderer,
                config,
                pool,
                event_tx,
            }),
            listener: Mutex::new(None),
        }
    }

    /// Coordinator activity
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.event_tx.subscribe()
    }

    /// Start answering requests. Returns false if already running.
    pub fn start(&self) -> bool {
        let mut listener = self.listener.lock();
        if listener.is_some() {
            debug!("Responder already running");
            return false;
        }

        // Subscribe before spawning so no request slips past
        let events = self.inner.transport.subscribe();
        let inner = self.inner.clone();
        *listener = Some(tokio::spawn(async move {
            inner.listen(events).await;
        }));
        info!(node = %self.inner.transport.local_node().short(), "Phone responder started");
        true
    }

    /// Run one responder cycle on the pool, answering `request_id`.
    pub fn respond(
        &self,
        request_id: Option<CorrelationId>,
    ) -> JoinHandle<SyncResult<CycleOutcome>> {
        self.inner.clone().spawn_cycle(request_id)
    }

    /// Stop listening and refuse new cycles.
    pub fn shutdown(&self) {
        if let Some(handle) = self.listener.lock().take() {
            handle.abort();
        }
        self.inner.pool.close();
        info!("Phone responder stopped");
    }
}

impl Drop for PhoneResponder {
    fn drop(&mut self) {
        if let Some(handle) = self.listener.get_mut().take() {
            handle.abort();
        }
    }
}

impl Responder {
    fn emit(&self, event: SyncEvent) {
        let _ = self.event_tx.send(event);
    }

    async fn listen(self: Arc<Self>, mut events: broadcast::Receiver<TransportEvent>) {
        loop {
            match events.recv().await {
                Ok(TransportEvent::Message(msg)) => match SyncPath::parse(&msg.path) {
                    Some(SyncPath::RequestWeather) => {
                        // Requests from older watches carry no payload at all
                        let request_id = DataMap::from_bytes(&msg.data)
                            .ok()
                            .and_then(|map| map.request_id());
                        info!(from = %msg.from.short(), request_id = ?request_id, "Weather requested");
                        drop(self.clone().spawn_cycle(request_id));
                    }
                    Some(_) => debug!(path = %msg.path, "Ignoring response path on phone"),
                    None => debug!(path = %msg.path, "Ignoring unknown path"),
                },
                Ok(TransportEvent::DataChanged(item)) => {
                    debug!(path = %item.path, "Ignoring data item on phone");
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Responder lagged behind transport events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Transport event channel closed");
                    break;
                }
            }
        }
    }

    fn spawn_cycle(
        self: Arc<Self>,
        request_id: Option<CorrelationId>,
    ) -> JoinHandle<SyncResult<CycleOutcome>> {
        let pool = self.pool.clone();
        pool.spawn("phone-cycle", async move { self.cycle(request_id).await })
    }

    async fn cycle(&self, request_id: Option<CorrelationId>) -> SyncResult<CycleOutcome> {
        self.emit(SyncEvent::StateChanged {
            state: CycleState::Building,
        });

        let result = match self
            .transport
            .open(self.config.phone_open_timeout())
            .await
        {
            Ok(session) => {
                let result = self.build_and_publish(session.as_ref(), request_id).await;
                session.close().await;
                result
            }
            Err(e) => Err(e),
        };

        match &result {
            Ok(CycleOutcome::NoData) => {
                self.emit(SyncEvent::CycleSkipped {
                    reason: SkipReason::NoWeatherData,
                });
            }
            Ok(CycleOutcome::Published { paths, .. }) => {
                debug!(?paths, "Cycle published");
            }
            Err(SyncError::ConnectionTimeout(timeout)) => {
                warn!(?timeout, "Could not open session to answer request");
                self.emit(SyncEvent::CycleSkipped {
                    reason: SkipReason::ConnectionTimeout,
                });
            }
            Err(e) => {
                warn!(error = %e, "Responder cycle failed");
                self.emit(SyncEvent::CycleSkipped {
                    reason: SkipReason::Failed(e.to_string()),
                });
            }
        }

        self.emit(SyncEvent::StateChanged {
            state: CycleState::Idle,
        });
        result
    }

    async fn build_and_publish(
        &self,
        session: &dyn Session,
        request_id: Option<CorrelationId>,
    ) -> SyncResult<CycleOutcome> {
        let Some(row) = self.store.query()? else {
            info!("No weather data");
            return Ok(CycleOutcome::NoData);
        };

        let mut snapshot =
            WeatherSnapshot::from_forecast(&row, self.config.temperature_unit, now_millis());
        match self.renderer.render(self.icons.as_ref(), row.condition_code) {
            Ok(Some(png)) => snapshot = snapshot.with_icon(png),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Icon unavailable, sending temperatures only"),
        }

        self.emit(SyncEvent::StateChanged {
            state: CycleState::Publishing,
        });

        match self.config.publish_variant {
            PublishVariant::DataItem => self.publish_items(session, &snapshot, request_id).await,
            PublishVariant::DataItemInline => {
                self.publish_inline_item(session, &snapshot, request_id).await
            }
            PublishVariant::Message => self.publish_messages(session, &snapshot, request_id).await,
        }
    }

    /// Register the icon as an asset; failure degrades to no icon.
    async fn icon_asset(
        &self,
        session: &dyn Session,
        snapshot: &WeatherSnapshot,
    ) -> Option<AssetRef> {
        let png = snapshot.icon_image.clone().filter(|b| !b.is_empty())?;
        match session.create_asset(png).await {
            Ok(asset) => Some(asset),
            Err(e) => {
                warn!(error = %e, "Could not register icon asset");
                None
            }
        }
    }

    /// `/image` then `/weather-update`, as two data items
    async fn publish_items(
        &self,
        session: &dyn Session,
        snapshot: &WeatherSnapshot,
        request_id: Option<CorrelationId>,
    ) -> SyncResult<CycleOutcome> {
        let mut paths = Vec::new();
        let mut with_icon = false;

        if let Some(asset) = self.icon_asset(session, snapshot).await {
            let item = session
                .put_data_item(PATH_IMAGE, encode_image(asset, snapshot.timestamp))
                .await?;
            debug!(%item, "Published icon item");
            self.emit(SyncEvent::Published {
                path: PATH_IMAGE.to_string(),
                request_id: None,
            });
            paths.push(PATH_IMAGE.to_string());
            with_icon = true;
        }

        let fields = encode_weather_update(snapshot, None, request_id);
        let item = session.put_data_item(PATH_WEATHER_UPDATE, fields).await?;
        info!(%item, high = %snapshot.high_temperature, low = %snapshot.low_temperature, "Published weather item");
        self.emit(SyncEvent::Published {
            path: PATH_WEATHER_UPDATE.to_string(),
            request_id,
        });
        paths.push(PATH_WEATHER_UPDATE.to_string());

        Ok(CycleOutcome::Published {
            paths,
            recipients: 0,
            with_icon,
        })
    }

    /// A single `/weather-update` item carrying the icon asset
    async fn publish_inline_item(
        &self,
        session: &dyn Session,
        snapshot: &WeatherSnapshot,
        request_id: Option<CorrelationId>,
    ) -> SyncResult<CycleOutcome> {
        let icon = self
            .icon_asset(session, snapshot)
            .await
            .map(IconPayload::Asset);
        let with_icon = icon.is_some();

        let fields = encode_weather_update(snapshot, icon, request_id);
        let item = session.put_data_item(PATH_WEATHER_UPDATE, fields).await?;
        info!(%item, with_icon, "Published weather item");
        self.emit(SyncEvent::Published {
            path: PATH_WEATHER_UPDATE.to_string(),
            request_id,
        });

        Ok(CycleOutcome::Published {
            paths: vec![PATH_WEATHER_UPDATE.to_string()],
            recipients: 0,
            with_icon,
        })
    }

    /// Encoded `/weather-update` sent to every reachable node
    async fn publish_messages(
        &self,
        session: &dyn Session,
        snapshot: &WeatherSnapshot,
        request_id: Option<CorrelationId>,
    ) -> SyncResult<CycleOutcome> {
        let nodes = session.list_nodes().await?;
        if nodes.is_empty() {
            debug!("No connected nodes, nothing to send");
            return Ok(CycleOutcome::Published {
                paths: Vec::new(),
                recipients: 0,
                with_icon: false,
            });
        }

        let icon = snapshot
            .icon_image
            .clone()
            .filter(|b| !b.is_empty())
            .map(IconPayload::Inline);
        let with_icon = icon.is_some();
        let bytes = encode_weather_update(snapshot, icon, request_id).to_bytes()?;

        let mut recipients = 0;
        for node in &nodes {
            match session
                .send_message(&node.id, PATH_WEATHER_UPDATE, Some(bytes.clone()))
                .await
            {
                Ok(()) => recipients += 1,
                Err(e) => warn!(node = %node.id.short(), error = %e, "Failed to send weather update"),
            }
        }

        if recipients == 0 {
            return Err(SyncError::SendFailed(format!(
                "no node accepted the update ({} tried)",
                nodes.len()
            )));
        }

        info!(recipients, with_icon, "Sent weather update");
        self.emit(SyncEvent::Published {
            path: PATH_WEATHER_UPDATE.to_string(),
            request_id,
        });
        Ok(CycleOutcome::Published {
            paths: vec![PATH_WEATHER_UPDATE.to_string()],
            recipients,
            with_icon,
        })
    }
}
