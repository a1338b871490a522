//! The reply detector: commands, gating, and the capture pipeline
//! `locate -> acquire -> size check -> redeliver`.
//!
//! Every branch except a delivery ends in a silent halt. Nothing is ever sent to the chat the
//! event came from; the only outbound traffic goes to the operator's own destination.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::{
    acquisition::{acquire, AcquisitionPolicy, AcquisitionRequest},
    config::DetectorConfig,
    domain::Jid,
    filter::{Rejection, SizePolicy},
    locator::{locate, MediaReference},
    messaging::{
        port::{MediaSource, MessagingPort},
        types::{InboundEvent, QuotedContext},
    },
    redelivery::{redeliver, Delivery},
    toggle::{CommandSet, ToggleCommand, ToggleState},
    utils::{format_file_size, now_millis},
    Result,
};

/// Why an event was not processed further.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Skip {
    Inactive,
    NotSelf,
    NoQuote,
    NoMedia,
}

/// Work left after the synchronous part of the pipeline.
#[derive(Clone, Debug)]
pub struct CaptureJob {
    pub chat: Jid,
    pub quoted: QuotedContext,
    pub reference: MediaReference,
}

/// Result of the synchronous triage step. Commands have already been applied.
#[derive(Clone, Debug)]
pub enum Triage {
    Command { cmd: ToggleCommand, active: bool },
    Skip(Skip),
    Capture(CaptureJob),
}

/// Terminal state of one event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Command(ToggleCommand),
    Skipped(Skip),
    AcquisitionFailed,
    Rejected(Rejection),
    Delivered(Delivery),
}

pub struct ReplyDetector {
    owner: Jid,
    commands: CommandSet,
    toggle: Arc<ToggleState>,
    size_policy: SizePolicy,
    acquisition: AcquisitionPolicy,
    messenger: Arc<dyn MessagingPort>,
    media: Arc<dyn MediaSource>,
}

impl ReplyDetector {
    pub fn new(
        owner: Jid,
        cfg: &DetectorConfig,
        toggle: Arc<ToggleState>,
        messenger: Arc<dyn MessagingPort>,
        media: Arc<dyn MediaSource>,
    ) -> Self {
        Self {
            owner,
            commands: CommandSet::new(cfg),
            toggle,
            size_policy: SizePolicy::from(cfg),
            acquisition: AcquisitionPolicy::from(cfg),
            messenger,
            media,
        }
    }

    pub fn toggle(&self) -> &ToggleState {
        &self.toggle
    }

    /// Run one event through the whole pipeline.
    pub async fn handle(&self, event: &InboundEvent) -> Outcome {
        let triage = self.triage(event);
        self.complete(triage).await
    }

    /// Asynchronous remainder of a triaged event: confirmations and captures.
    pub async fn complete(&self, triage: Triage) -> Outcome {
        match triage {
            Triage::Command { cmd, active } => {
                if let Err(e) = self.confirm(cmd, active).await {
                    warn!(error = %e, "failed to send command confirmation");
                }
                Outcome::Command(cmd)
            }
            Triage::Skip(reason) => Outcome::Skipped(reason),
            Triage::Capture(job) => self.capture(&job).await,
        }
    }

    /// Synchronous part: operator commands, the toggle gate, reply filtering and media location.
    ///
    /// Has no suspension points, so toggle writes are ordered with event arrival.
    pub fn triage(&self, event: &InboundEvent) -> Triage {
        if event.sender_is_self() {
            if let Some(cmd) = event.body.as_deref().and_then(|b| self.commands.parse(b)) {
                let active = cmd.apply(&self.toggle);
                info!(command = ?cmd, active, "operator command");
                return Triage::Command { cmd, active };
            }
        }

        if !self.toggle.is_active() {
            return Triage::Skip(Skip::Inactive);
        }
        if !event.sender_is_self() {
            return Triage::Skip(Skip::NotSelf);
        }
        let Some(quoted) = &event.quoted else {
            return Triage::Skip(Skip::NoQuote);
        };

        let Some(reference) = locate(&quoted.payload) else {
            debug!(
                shape = quoted.payload.label(),
                message_id = %event.message_id(),
                "quoted message has no capturable media"
            );
            return Triage::Skip(Skip::NoMedia);
        };

        info!(
            kind = reference.kind.as_str(),
            shape = ?reference.shape,
            "reply to media detected"
        );
        Triage::Capture(CaptureJob {
            chat: event.chat_id().clone(),
            quoted: quoted.clone(),
            reference,
        })
    }

    /// Confirmation goes to the operator's own destination, never the triggering chat.
    pub async fn confirm(&self, cmd: ToggleCommand, active: bool) -> Result<()> {
        let text = self.commands.confirmation(cmd, active);
        self.messenger.send_text(&self.owner, &text).await
    }

    pub async fn capture(&self, job: &CaptureJob) -> Outcome {
        let req = AcquisitionRequest {
            chat: &job.chat,
            quoted: &job.quoted,
            reference: &job.reference,
        };
        let media = match acquire(self.media.as_ref(), req, self.acquisition).await {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "media download failed");
                return Outcome::AcquisitionFailed;
            }
        };

        if let Err(r) = self.size_policy.check(media.byte_length(), job.reference.kind) {
            info!(reason = %r, "payload too small, probably a thumbnail");
            return Outcome::Rejected(r);
        }

        debug!(
            size = %format_file_size(media.byte_length()),
            path = ?media.path,
            "forwarding to operator"
        );
        let delivery = redeliver(
            self.messenger.as_ref(),
            &self.owner,
            &media,
            &job.reference,
            now_millis(),
        )
        .await;
        Outcome::Delivered(delivery)
    }
}
