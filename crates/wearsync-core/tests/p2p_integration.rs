//! P2P Integration Tests
//!
//! A phone and a watch paired over real iroh endpoints on localhost.
//!
//! - Pairing: the watch joins the phone's topic from a pairing code
//! - Round trip: a request reaches the phone and the update reaches the watch
//! - Assets: the icon travels as an iroh-blobs asset

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use wearsync_core::{
    ChannelDisplay, DisplayedWeather, ForecastRow, GeneratedIconSource, IrohConfig,
    IrohTransport, MemorySnapshotStore, PairingCode, PhoneResponder, PublishVariant, SyncConfig,
    Transport, WatchRequester,
};

// ============================================================================
// Test Utilities
// ============================================================================

/// Bind the phone, then join the watch through an encoded pairing code.
async fn paired() -> (IrohTransport, IrohTransport) {
    let phone = IrohTransport::host(IrohConfig::default())
        .await
        .expect("Failed to host phone");
    let code = PairingCode::decode(&phone.pairing_code().encode().unwrap()).unwrap();
    let watch = IrohTransport::join(IrohConfig::default(), &code)
        .await
        .expect("Failed to join watch");
    (phone, watch)
}

/// Wait until both sides see each other on the topic.
async fn wait_joined(phone: &IrohTransport, watch: &IrohTransport) {
    let (a, b) = futures::future::join(
        phone.open(Duration::from_secs(20)),
        watch.open(Duration::from_secs(20)),
    )
    .await;
    let (a, b) = (a.expect("phone never saw the watch"), b.expect("watch never saw the phone"));
    futures::future::join(a.close(), b.close()).await;
}

fn config(variant: PublishVariant) -> SyncConfig {
    SyncConfig::default()
        .with_watch_open_timeout(Duration::from_secs(10))
        .with_phone_open_timeout(Duration::from_secs(10))
        .with_publish_variant(variant)
}

async fn until_complete(shown: &mut broadcast::Receiver<DisplayedWeather>) -> DisplayedWeather {
    tokio::time::timeout(Duration::from_secs(30), async {
        loop {
            let update = shown.recv().await.expect("display channel closed");
            if update.has_temperatures() && update.icon.is_some() {
                return update;
            }
        }
    })
    .await
    .expect("display never completed")
}

// ============================================================================
// Pairing
// ============================================================================

#[tokio::test]
async fn test_watch_joins_phone_topic() {
    let (phone, watch) = paired().await;
    wait_joined(&phone, &watch).await;

    assert_eq!(phone.neighbor_count(), 1);
    assert_eq!(watch.neighbor_count(), 1);

    let session = watch.open(Duration::from_secs(5)).await.unwrap();
    let nodes = session.list_nodes().await.unwrap();
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes.iter().next().unwrap().id, phone.local_node());
    session.close().await;

    futures::future::try_join(phone.shutdown(), watch.shutdown())
        .await
        .unwrap();
}

// ============================================================================
// Round trip
// ============================================================================

async fn assert_round_trip(variant: PublishVariant) {
    let (phone_transport, watch_transport) = paired().await;
    wait_joined(&phone_transport, &watch_transport).await;

    let store = MemorySnapshotStore::with_forecast(ForecastRow::new(24.0, 14.0, 800));
    let phone = PhoneResponder::new(
        Arc::new(phone_transport.clone()),
        Arc::new(store),
        Arc::new(GeneratedIconSource::default()),
        config(variant),
    );
    let display = ChannelDisplay::new(16);
    let mut shown = display.subscribe();
    let watch = WatchRequester::new(
        Arc::new(watch_transport.clone()),
        Arc::new(display),
        config(variant),
    );
    phone.start();
    watch.start();

    watch.request_weather().await.unwrap().unwrap();
    let update = until_complete(&mut shown).await;
    assert_eq!(update.high.as_deref(), Some("24°"));
    assert_eq!(update.low.as_deref(), Some("14°"));
    let icon = update.icon.unwrap();
    assert_eq!((icon.width, icon.height), (22, 22));

    watch.shutdown();
    phone.shutdown();
    futures::future::try_join(phone_transport.shutdown(), watch_transport.shutdown())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_round_trip_with_blob_asset() {
    assert_round_trip(PublishVariant::DataItem).await;
}

#[tokio::test]
async fn test_round_trip_with_direct_message() {
    assert_round_trip(PublishVariant::Message).await;
}
