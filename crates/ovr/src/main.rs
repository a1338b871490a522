use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use ovr_core::{
    config::Config, dispatch::Dispatcher, messaging::port::MessagingPort, pipeline::ReplyDetector,
    toggle::ToggleState,
};
use ovr_sidecar::SidecarBridge;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    ovr_core::logging::init("ovr")?;

    let cfg = Config::load()?;
    info!(owner = cfg.owner.user(), "ovr starting (console only)");

    let (events_tx, events_rx) = mpsc::channel(cfg.queue_capacity);
    let bridge = SidecarBridge::spawn(&cfg.sidecar, events_tx).await?;

    // Capture always starts disabled; the operator turns it on from their own chat.
    let toggle = Arc::new(ToggleState::new());
    let messenger: Arc<dyn MessagingPort> = bridge.clone();
    let detector = Arc::new(ReplyDetector::new(
        cfg.owner.clone(),
        &cfg.detector,
        toggle,
        messenger,
        bridge.clone(),
    ));
    info!(
        "capture is OFF; send {}{} in any chat to enable it",
        cfg.detector.command_prefix,
        cfg.detector
            .enable_commands
            .first()
            .map(String::as_str)
            .unwrap_or_default()
    );

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for ctrl-c");
                return;
            }
            info!("shutting down");
            cancel.cancel();
        });
    }

    let stats = Dispatcher::new(detector).run(events_rx, cancel.clone()).await;
    if !cancel.is_cancelled() {
        warn!("bridge event stream ended");
    }
    info!(
        received = stats.received,
        captured = stats.delivered,
        "dispatcher stopped"
    );

    if let Err(e) = bridge.shutdown().await {
        warn!(error = %e, "failed to stop bridge");
    }
    Ok(())
}
