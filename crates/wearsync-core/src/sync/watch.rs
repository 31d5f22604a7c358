//! Watch-side coordinator: asks for weather and shows what comes back
//!
//! ## Triggers
//!
//! - the watch face becomes visible (and a periodic timer while it stays so)
//! - ambient mode toggles while nothing has been received yet
//! - an explicit [`WatchRequester::request_weather`]
//!
//! ## Request cycle
//!
//! ```text
//! open(500 ms) ─► cached node? ──yes──► send /request-weather {requestId}
//!                      │no                        │ SendFailed
//!                 list_nodes ─► first node        ▼
//!                      │empty               invalidate cache
//!                 skip, no error
//! ```
//!
//! ## Responses
//!
//! Both channels feed the same path: decode, check the request id, merge
//! into the cached snapshot, then notify the [`DisplayLayer`].
//!
//! Temperatures apply in arrival order. An icon asset resolves later on the
//! worker pool and is merged on its own, unless an icon from a newer update
//! has been claimed in the meantime.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::config::SyncConfig;
use crate::display::{DisplayLayer, DisplayedWeather};
use crate::error::{SyncError, SyncResult};
use crate::icon::{decode_icon, DecodedIcon};
use crate::transport::{Session, Transport};
use crate::types::{CorrelationId, NodeId};

use super::events::{SkipReason, SyncEvent, TransportEvent};
use super::node_cache::NodeCache;
use super::payload::{decode_for_path, decode_message, IconPayload, Temperatures, WeatherUpdate};
use super::pending::{Admission, PendingRequests};
use super::pool::WorkerPool;
use super::protocol::{AssetRef, SyncMessage, SyncPath, PATH_REQUEST_WEATHER};

/// Cached display state plus the newest icon claim
#[derive(Default)]
struct Shown {
    weather: DisplayedWeather,
    icon_generation: u64,
}

struct Requester {
    transport: Arc<dyn Transport>,
    display: Arc<dyn DisplayLayer>,
    config: SyncConfig,
    pool: WorkerPool,
    nodes: NodeCache,
    pending: PendingRequests,
    shown: RwLock<Shown>,
    visible: AtomicBool,
    ambient: AtomicBool,
    event_tx: broadcast::Sender<SyncEvent>,
}

/// Sends weather requests and applies responses to the display
pub struct WatchRequester {
    inner: Arc<Requester>,
    listener: Mutex<Option<JoinHandle<()>>>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl WatchRequester {
    pub fn new(
        transport: Arc<dyn Transport>,
        display: Arc<dyn DisplayLayer>,
        config: SyncConfig,
    ) -> Self {
        let config = config.sanitized();
        let (event_tx, _) = broadcast::channel(config.event_capacity.max(1));
        let pool = WorkerPool::new(config.pool_size, config.cycle_timeout());
        let pending = PendingRequests::new(config.correlation_ttl());
        Self {
            inner: Arc::new(Requester {
                transport,
                display,
                config,
                pool,
                nodes: NodeCache::new(),
                pending,
                shown: RwLock::new(Shown::default()),
                visible: AtomicBool::new(false),
                ambient: AtomicBool::new(false),
                event_tx,
            }),
            listener: Mutex::new(None),
            timer: Mutex::new(None),
        }
    }

    /// Coordinator activity
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.event_tx.subscribe()
    }

    /// Start listening for responses. Returns false if already running.
    pub fn start(&self) -> bool {
        let mut listener = self.listener.lock();
        if listener.is_some() {
            return false;
        }
        let events = self.inner.transport.subscribe();
        let inner = self.inner.clone();
        *listener = Some(tokio::spawn(async move {
            inner.listen(events).await;
        }));
        info!(node = %self.inner.transport.local_node().short(), "Watch requester started");
        true
    }

    /// Send one weather request on the worker pool.
    ///
    /// Resolves to the request id, or `None` when no companion was found.
    pub fn request_weather(&self) -> JoinHandle<SyncResult<Option<CorrelationId>>> {
        self.inner.clone().spawn_request()
    }

    /// Watch face shown or hidden.
    ///
    /// Becoming visible requests weather immediately and starts the
    /// periodic timer; hiding stops the timer.
    pub fn on_visibility_changed(&self, visible: bool) {
        let was = self.inner.visible.swap(visible, Ordering::AcqRel);
        debug!(visible, "Visibility changed");
        if visible && !was {
            drop(self.inner.clone().spawn_request());
            self.start_timer();
        } else if !visible {
            self.stop_timer();
        }
    }

    /// Ambient mode toggled. Requests only while nothing is cached yet.
    pub fn on_ambient_changed(&self, ambient: bool) {
        self.inner.ambient.store(ambient, Ordering::Release);
        if self.inner.shown.read().weather.has_temperatures() {
            trace!(ambient, "Ambient change with cached weather, no request");
            return;
        }
        debug!(ambient, "Ambient change without cached weather, requesting");
        drop(self.inner.clone().spawn_request());
    }

    pub fn is_visible(&self) -> bool {
        self.inner.visible.load(Ordering::Acquire)
    }

    pub fn is_ambient(&self) -> bool {
        self.inner.ambient.load(Ordering::Acquire)
    }

    /// What the display currently shows
    pub fn snapshot(&self) -> DisplayedWeather {
        self.inner.shown.read().weather.clone()
    }

    /// Companion node the next request goes to, if cached
    pub fn cached_node(&self) -> Option<NodeId> {
        self.inner.nodes.get()
    }

    /// Requests still waiting for a response
    pub fn outstanding_requests(&self) -> usize {
        self.inner.pending.purge_expired();
        self.inner.pending.len()
    }

    /// Stop listening, stop the timer and refuse new cycles.
    pub fn shutdown(&self) {
        self.stop_timer();
        if let Some(handle) = self.listener.lock().take() {
            handle.abort();
        }
        self.inner.pool.close();
        info!("Watch requester stopped");
    }

    fn start_timer(&self) {
        let mut timer = self.timer.lock();
        if timer.is_some() {
            return;
        }
        let inner = self.inner.clone();
        let period = inner.config.request_period();
        *timer = Some(tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                ticker.tick().await;
                if !inner.visible.load(Ordering::Acquire) {
                    break;
                }
                // Ticks must not queue up behind a stalled transport
                if inner.pool.available() == 0 {
                    debug!("Worker pool busy, skipping periodic request");
                    inner.emit(SyncEvent::CycleSkipped {
                        reason: SkipReason::PoolSaturated,
                    });
                    continue;
                }
                trace!("Periodic weather request");
                drop(inner.clone().spawn_request());
            }
        }));
    }

    fn stop_timer(&self) {
        if let Some(handle) = self.timer.lock().take() {
            handle.abort();
        }
    }
}

impl Drop for WatchRequester {
    fn drop(&mut self) {
        if let Some(handle) = self.timer.get_mut().take() {
            handle.abort();
        }
        if let Some(handle) = self.listener.get_mut().take() {
            handle.abort();
        }
    }
}

impl Requester {
    fn emit(&self, event: SyncEvent) {
        let _ = self.event_tx.send(event);
    }

    fn spawn_request(self: Arc<Self>) -> JoinHandle<SyncResult<Option<CorrelationId>>> {
        let pool = self.pool.clone();
        pool.spawn("watch-request", async move { self.request_cycle().await })
    }

    async fn request_cycle(&self) -> SyncResult<Option<CorrelationId>> {
        let session = match self.transport.open(self.config.watch_open_timeout()).await {
            Ok(session) => session,
            Err(e) => {
                debug!(error = %e, "Could not open session for request");
                self.emit(SyncEvent::CycleSkipped {
                    reason: match e {
                        SyncError::ConnectionTimeout(_) => SkipReason::ConnectionTimeout,
                        ref other => SkipReason::Failed(other.to_string()),
                    },
                });
                return Err(e);
            }
        };

        let result = self.send_request(session.as_ref()).await;
        session.close().await;

        match result {
            Ok(id) => Ok(Some(id)),
            Err(SyncError::NoPeerReachable) => {
                debug!("No companion node reachable");
                self.emit(SyncEvent::CycleSkipped {
                    reason: SkipReason::NoPeerReachable,
                });
                Ok(None)
            }
            Err(e) => {
                warn!(error = %e, "Weather request failed");
                self.emit(SyncEvent::CycleSkipped {
                    reason: SkipReason::Failed(e.to_string()),
                });
                Err(e)
            }
        }
    }

    async fn send_request(&self, session: &dyn Session) -> SyncResult<CorrelationId> {
        let node = match self.nodes.get() {
            Some(node) => node,
            None => {
                let first = session
                    .list_nodes()
                    .await?
                    .into_iter()
                    .next()
                    .ok_or(SyncError::NoPeerReachable)?;
                self.nodes.set(first.id.clone());
                first.id
            }
        };

        let id = CorrelationId::new();
        let message = SyncMessage::request_weather(id);
        let payload = message.payload_bytes()?;
        self.pending.register(id);

        if let Err(e) = session
            .send_message(&node, PATH_REQUEST_WEATHER, payload)
            .await
        {
            self.pending.cancel(&id);
            if e.invalidates_peer() {
                self.nodes.invalidate(&node);
            }
            return Err(e);
        }

        info!(node = %node.short(), request_id = %id, "Requested weather");
        self.emit(SyncEvent::RequestSent {
            node,
            request_id: id,
        });
        Ok(id)
    }

    async fn listen(self: Arc<Self>, mut events: broadcast::Receiver<TransportEvent>) {
        loop {
            match events.recv().await {
                Ok(event) => self.clone().on_transport_event(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Requester lagged behind transport events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Transport event channel closed");
                    break;
                }
            }
        }
    }

    fn on_transport_event(self: Arc<Self>, event: TransportEvent) {
        let path = event.path().to_string();
        match SyncPath::parse(&path) {
            Some(SyncPath::WeatherUpdate) | Some(SyncPath::Image) => {}
            Some(SyncPath::RequestWeather) => {
                trace!("Ignoring request on watch");
                return;
            }
            None => {
                debug!(path, "Ignoring unknown path");
                return;
            }
        }

        let decoded = match &event {
            TransportEvent::Message(msg) => decode_message(&path, &msg.data),
            TransportEvent::DataChanged(item) => decode_for_path(&path, &item.fields),
        };
        match decoded {
            Ok(update) => self.accept(update),
            Err(e) => warn!(path, error = %e, "Dropping undecodable payload"),
        }
    }

    fn accept(self: Arc<Self>, update: WeatherUpdate) {
        match self.pending.admit(update.request_id) {
            Admission::Unknown(id) | Admission::Expired(id) => {
                info!(request_id = %id, "Discarding response to unknown request");
                self.emit(SyncEvent::ResponseDiscarded { request_id: id });
                return;
            }
            Admission::Matched(_) | Admission::Uncorrelated => {}
        }

        if update.is_empty() {
            debug!("Response carried nothing to display");
            return;
        }

        let WeatherUpdate {
            temperatures,
            icon,
            timestamp,
            request_id,
        } = update;

        match icon {
            Some(IconPayload::Asset(asset)) => {
                let generation = self.claim_icon();
                self.apply(temperatures, None, timestamp, request_id);

                // Resolving blocks on the transport; keep it off the listener
                let pool = self.pool.clone();
                drop(pool.spawn("resolve-icon", async move {
                    if let Some(icon) = self.resolve_icon(&asset).await {
                        self.apply(None, Some((generation, icon)), None, request_id);
                    }
                    Ok(())
                }));
            }
            Some(IconPayload::Inline(bytes)) => {
                let icon = match decode_icon(&bytes) {
                    Ok(icon) => Some((self.claim_icon(), icon)),
                    Err(e) => {
                        warn!(error = %e, "Inline icon did not decode");
                        None
                    }
                };
                self.apply(temperatures, icon, timestamp, request_id);
            }
            None => self.apply(temperatures, None, timestamp, request_id),
        }
    }

    /// Reserve the next icon generation. Icons from older claims are dropped.
    fn claim_icon(&self) -> u64 {
        let mut shown = self.shown.write();
        shown.icon_generation += 1;
        shown.icon_generation
    }

    /// Fetch and decode an icon asset. Failure leaves the icon out.
    async fn resolve_icon(&self, asset: &AssetRef) -> Option<DecodedIcon> {
        let session = match self.transport.open(self.config.watch_open_timeout()).await {
            Ok(session) => session,
            Err(e) => {
                warn!(error = %e, "No session to resolve icon");
                return None;
            }
        };
        let bytes = session.resolve_asset(asset).await;
        session.close().await;

        match bytes.and_then(|bytes| decode_icon(&bytes)) {
            Ok(icon) => Some(icon),
            Err(e) => {
                warn!(digest = %asset.digest, error = %e, "Icon asset unavailable");
                None
            }
        }
    }

    fn apply(
        &self,
        temperatures: Option<Temperatures>,
        icon: Option<(u64, DecodedIcon)>,
        timestamp: Option<i64>,
        request_id: Option<CorrelationId>,
    ) {
        let merged = {
            let mut shown = self.shown.write();
            let mut changed = false;
            if let Some(t) = temperatures {
                shown.weather.high = Some(t.high);
                shown.weather.low = Some(t.low);
                changed = true;
            }
            if let Some((generation, icon)) = icon {
                if generation == shown.icon_generation {
                    shown.weather.icon = Some(icon);
                    changed = true;
                } else {
                    debug!(
                        generation,
                        newest = shown.icon_generation,
                        "Dropping superseded icon"
                    );
                }
            }
            if !changed {
                return;
            }
            if timestamp.is_some() {
                shown.weather.timestamp = timestamp;
            }
            shown.weather.clone()
        };

        info!(%merged, "Weather updated");
        self.display.on_weather_updated(
            merged.high.as_deref(),
            merged.low.as_deref(),
            merged.icon.as_ref(),
            merged.timestamp,
        );
        self.emit(SyncEvent::UpdateApplied { request_id });
    }
}
