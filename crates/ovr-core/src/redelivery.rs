use tracing::{info, warn};

use crate::{
    acquisition::AcquiredMedia,
    domain::Jid,
    locator::MediaReference,
    messaging::{port::MessagingPort, types::OutgoingMedia},
    utils::{document_file_name, format_file_size},
};

pub const GENERIC_MIMETYPE: &str = "application/octet-stream";

/// Terminal state of a redelivery attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    Native,
    Document,
    Dropped,
}

/// Re-send captured media to `to`: natively first, then once as a plain document.
///
/// Never carries a caption. Failures are logged and end in `Dropped`; nothing is retried.
pub async fn redeliver(
    messenger: &dyn MessagingPort,
    to: &Jid,
    media: &AcquiredMedia,
    reference: &MediaReference,
    ts_millis: i64,
) -> Delivery {
    let kind = reference.kind;
    let native = OutgoingMedia::Native {
        kind,
        data: &media.bytes,
        mimetype: reference.descriptor.mimetype_or_default(kind),
    };

    let native_err = match messenger.send_media(to, native).await {
        Ok(()) => {
            info!(
                kind = kind.as_str(),
                size = %format_file_size(media.byte_length()),
                "media forwarded"
            );
            return Delivery::Native;
        }
        Err(e) => e,
    };
    warn!(error = %native_err, kind = kind.as_str(), "native send failed, retrying as document");

    let file_name = document_file_name(kind, ts_millis);
    let document = OutgoingMedia::Document {
        data: &media.bytes,
        mimetype: reference
            .descriptor
            .mimetype
            .as_deref()
            .unwrap_or(GENERIC_MIMETYPE),
        file_name: &file_name,
    };

    match messenger.send_media(to, document).await {
        Ok(()) => {
            info!(file_name = %file_name, "media forwarded as document");
            Delivery::Document
        }
        Err(e) => {
            warn!(error = %e, "document send failed, dropping media");
            Delivery::Dropped
        }
    }
}
