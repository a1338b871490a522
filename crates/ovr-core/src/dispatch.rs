//! Sequential event intake.
//!
//! Events are dequeued one at a time in arrival order. The synchronous triage (commands,
//! toggle gate, location) runs inline before the next dequeue; the I/O-bound remainder of each
//! event runs as its own task so a slow download never blocks later events.

use std::sync::Arc;

use tokio::{sync::mpsc, task::JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::{
    messaging::types::InboundEvent,
    pipeline::{Outcome, ReplyDetector, Triage},
    redelivery::Delivery,
};

/// Counters for one dispatcher run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub received: usize,
    pub commands: usize,
    pub captures: usize,
    pub delivered: usize,
    pub failed_tasks: usize,
}

pub struct Dispatcher {
    detector: Arc<ReplyDetector>,
}

impl Dispatcher {
    pub fn new(detector: Arc<ReplyDetector>) -> Self {
        Self { detector }
    }

    /// Consume events until the channel closes or `cancel` fires, then wait for in-flight work.
    pub async fn run(
        &self,
        mut rx: mpsc::Receiver<InboundEvent>,
        cancel: CancellationToken,
    ) -> DispatchStats {
        let mut stats = DispatchStats::default();
        let mut tasks: JoinSet<Outcome> = JoinSet::new();

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("dispatcher cancelled");
                    break;
                }
                Some(done) = tasks.join_next(), if !tasks.is_empty() => {
                    reap(done, &mut stats);
                }
                ev = rx.recv() => {
                    let Some(ev) = ev else {
                        debug!("event source closed");
                        break;
                    };
                    stats.received += 1;
                    self.dispatch(ev, &mut tasks, &mut stats);
                }
            }
        }

        // Producers must not park on a queue nobody reads while in-flight work still needs them.
        rx.close();
        while let Some(done) = tasks.join_next().await {
            reap(done, &mut stats);
        }
        stats
    }

    fn dispatch(&self, ev: InboundEvent, tasks: &mut JoinSet<Outcome>, stats: &mut DispatchStats) {
        let triage = self.detector.triage(&ev);
        match &triage {
            Triage::Command { .. } => stats.commands += 1,
            Triage::Capture(_) => stats.captures += 1,
            Triage::Skip(_) => return,
        }
        let detector = self.detector.clone();
        tasks.spawn(async move { detector.complete(triage).await });
    }
}

fn reap(done: Result<Outcome, tokio::task::JoinError>, stats: &mut DispatchStats) {
    match done {
        Ok(Outcome::Delivered(d @ (Delivery::Native | Delivery::Document))) => {
            stats.delivered += 1;
            debug!(delivery = ?d, "event finished");
        }
        Ok(outcome) => debug!(?outcome, "event finished"),
        Err(e) => {
            stats.failed_tasks += 1;
            if e.is_panic() {
                error!(error = %e, "event task panicked");
            } else {
                error!(error = %e, "event task aborted");
            }
        }
    }
}
