mod common;

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;

use common::*;
use ovr_core::{
    config::DetectorConfig,
    dispatch::{DispatchStats, Dispatcher},
    domain::Jid,
    errors::Error,
    messaging::{
        port::MediaSource,
        types::{ChunkStream, EnvelopeDownload, InboundEvent, MediaDescriptor, MediaKind},
    },
    pipeline::ReplyDetector,
    toggle::ToggleState,
    utils::KIB,
    Result,
};

/// Answers the envelope download only once the event queue has no consumer, like a bridge
/// reader parked on a full queue.
struct QueueBoundSource {
    events: mpsc::Sender<InboundEvent>,
    started: Notify,
}

#[async_trait]
impl MediaSource for QueueBoundSource {
    async fn download_message(&self, _req: &EnvelopeDownload) -> Result<Vec<u8>> {
        self.started.notify_one();
        self.events.closed().await;
        Ok(vec![0xAB; 40 * KIB])
    }

    async fn download_content(
        &self,
        _descriptor: &MediaDescriptor,
        _kind: MediaKind,
    ) -> Result<ChunkStream> {
        Err(Error::Transport("not used".to_string()))
    }
}

#[tokio::test]
async fn events_are_triaged_in_arrival_order() {
    let messenger = Arc::new(FakeMessenger::default());
    let source = Arc::new(FakeSource::primary(40 * KIB));
    let detector = Arc::new(detector(messenger.clone(), source));
    let dispatcher = Dispatcher::new(detector.clone());

    let (tx, rx) = mpsc::channel(8);
    // The reply before `.onov` is ignored; the one after it is captured.
    tx.send(reply(view_once_image(), true)).await.unwrap();
    tx.send(text(".onov", true)).await.unwrap();
    tx.send(reply(view_once_image(), true)).await.unwrap();
    tx.send(text(".offov", true)).await.unwrap();
    tx.send(reply(view_once_image(), true)).await.unwrap();
    drop(tx);

    let stats = dispatcher.run(rx, CancellationToken::new()).await;
    assert_eq!(
        stats,
        DispatchStats {
            received: 5,
            commands: 2,
            captures: 1,
            delivered: 1,
            failed_tasks: 0,
        }
    );
    assert_eq!(messenger.media().len(), 1);
    assert_eq!(messenger.texts().len(), 2);
    assert!(!detector.toggle().is_active());
}

#[tokio::test]
async fn a_panicking_event_does_not_stop_the_loop() {
    let messenger = Arc::new(FakeMessenger {
        panic_on_text: true,
        ..FakeMessenger::default()
    });
    let source = Arc::new(FakeSource::primary(40 * KIB));
    let dispatcher = Dispatcher::new(Arc::new(detector(messenger.clone(), source)));

    let (tx, rx) = mpsc::channel(8);
    tx.send(text(".onov", true)).await.unwrap();
    tx.send(reply(view_once_image(), true)).await.unwrap();
    drop(tx);

    let stats = dispatcher.run(rx, CancellationToken::new()).await;
    assert_eq!(stats.failed_tasks, 1);
    assert_eq!(stats.delivered, 1);
    assert_eq!(messenger.media().len(), 1);
}

#[tokio::test]
async fn cancellation_stops_intake() {
    let messenger = Arc::new(FakeMessenger::default());
    let dispatcher = Dispatcher::new(Arc::new(detector(
        messenger.clone(),
        Arc::new(FakeSource::default()),
    )));

    let (tx, rx) = mpsc::channel(8);
    tx.send(text(".onov", true)).await.unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let stats = dispatcher.run(rx, cancel).await;
    assert_eq!(stats, DispatchStats::default());
    assert!(messenger.texts().is_empty());
    drop(tx);
}

#[tokio::test]
async fn cancellation_releases_producers_before_draining() {
    let (tx, rx) = mpsc::channel(1);
    let messenger = Arc::new(FakeMessenger::default());
    let source = Arc::new(QueueBoundSource {
        events: tx.clone(),
        started: Notify::new(),
    });
    let detector = ReplyDetector::new(
        Jid::new(OWNER),
        &DetectorConfig::default(),
        Arc::new(ToggleState::new()),
        messenger.clone(),
        source.clone(),
    );
    let dispatcher = Dispatcher::new(Arc::new(detector));
    let cancel = CancellationToken::new();

    let run = tokio::spawn({
        let cancel = cancel.clone();
        async move { dispatcher.run(rx, cancel).await }
    });

    tx.send(text(".onov", true)).await.unwrap();
    tx.send(reply(view_once_image(), true)).await.unwrap();
    source.started.notified().await;

    cancel.cancel();
    // Keeps pushing into a one-slot queue; must be turned away rather than parked.
    let producer = tokio::spawn(async move {
        while tx.send(text("late", false)).await.is_ok() {}
    });

    let stats = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("dispatcher drained")
        .unwrap();
    tokio::time::timeout(Duration::from_secs(5), producer)
        .await
        .expect("producer released")
        .unwrap();

    assert_eq!(stats.commands, 1);
    assert_eq!(stats.captures, 1);
    assert_eq!(stats.delivered, 1);
    assert_eq!(messenger.media().len(), 1);
}
