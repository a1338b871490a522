use async_trait::async_trait;

use crate::{
    domain::Jid,
    messaging::types::{ChunkStream, EnvelopeDownload, MediaDescriptor, MediaKind, OutgoingMedia},
    Result,
};

/// Outbound half of the messaging client.
#[async_trait]
pub trait MessagingPort: Send + Sync {
    async fn send_text(&self, to: &Jid, text: &str) -> Result<()>;

    /// Send a media item. The payload shape carries no caption field on purpose.
    async fn send_media(&self, to: &Jid, media: OutgoingMedia<'_>) -> Result<()>;
}

/// Media download capabilities of the messaging client.
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Decrypted download resolved through a message envelope (key + message body).
    ///
    /// Implementations should re-request the upload when the transport reports stale media
    /// and `req.reupload` is set.
    async fn download_message(&self, req: &EnvelopeDownload) -> Result<Vec<u8>>;

    /// Stream-decrypt directly from a media descriptor, independent of any envelope lookup.
    async fn download_content(
        &self,
        descriptor: &MediaDescriptor,
        kind: MediaKind,
    ) -> Result<ChunkStream>;
}
