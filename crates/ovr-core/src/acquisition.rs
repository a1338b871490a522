//! Two-path media download.
//!
//! The primary path asks the transport to resolve the media through the *original* message
//! envelope (decryption keys are bound to it, not to the reply). If that fails, times out, or
//! yields a stub, the fallback stream-decrypts straight from the media descriptor.

use std::time::Duration;

use tracing::debug;

use crate::{
    config::DetectorConfig,
    domain::{Jid, MessageKey},
    locator::MediaReference,
    messaging::{
        port::MediaSource,
        types::{EnvelopeDownload, QuotedContext},
    },
    utils::{format_file_size, MIB},
};

/// Which path produced the bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquisitionPath {
    Primary,
    Fallback,
}

/// Downloaded media, owned by one pipeline run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AcquiredMedia {
    pub bytes: Vec<u8>,
    pub path: AcquisitionPath,
}

impl AcquiredMedia {
    pub fn byte_length(&self) -> usize {
        self.bytes.len()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AcquisitionError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport: {0}")]
    Transport(#[from] crate::Error),

    #[error("stub payload ({len} bytes, floor {floor})")]
    TooSmall { len: usize, floor: usize },

    #[error("stream exceeded {limit} bytes ({len} received)")]
    Oversized { len: usize, limit: usize },
}

/// Ceiling for a streamed download, whatever the descriptor claims.
pub const MAX_STREAM_BYTES: usize = 256 * MIB;

/// Both paths failed.
#[derive(Debug, thiserror::Error)]
#[error("primary: {primary}; fallback: {fallback}")]
pub struct AcquisitionFailure {
    pub primary: AcquisitionError,
    pub fallback: AcquisitionError,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AcquisitionPolicy {
    /// Bound on the primary path; the fallback is not time-limited here.
    pub timeout: Duration,
    pub sanity_floor: usize,
}

impl From<&DetectorConfig> for AcquisitionPolicy {
    fn from(cfg: &DetectorConfig) -> Self {
        Self {
            timeout: cfg.download_timeout,
            sanity_floor: cfg.min_media_bytes,
        }
    }
}

/// Everything the two paths need about the quoted message.
#[derive(Clone, Copy, Debug)]
pub struct AcquisitionRequest<'a> {
    pub chat: &'a Jid,
    pub quoted: &'a QuotedContext,
    pub reference: &'a MediaReference,
}

pub async fn acquire(
    source: &dyn MediaSource,
    req: AcquisitionRequest<'_>,
    policy: AcquisitionPolicy,
) -> Result<AcquiredMedia, AcquisitionFailure> {
    let primary_err = match primary(source, req, policy).await {
        Ok(bytes) => {
            debug!(size = %format_file_size(bytes.len()), "primary download ok");
            return Ok(AcquiredMedia {
                bytes,
                path: AcquisitionPath::Primary,
            });
        }
        Err(e) => e,
    };

    debug!(error = %primary_err, "primary download failed, trying stream fallback");

    match fallback(source, req.reference, policy).await {
        Ok(bytes) => {
            debug!(size = %format_file_size(bytes.len()), "fallback download ok");
            Ok(AcquiredMedia {
                bytes,
                path: AcquisitionPath::Fallback,
            })
        }
        Err(fallback) => Err(AcquisitionFailure {
            primary: primary_err,
            fallback,
        }),
    }
}

/// Envelope download under the original sender/message identity.
///
/// Success requires strictly more than `sanity_floor` bytes; anything at or below it is a
/// placeholder.
pub async fn primary(
    source: &dyn MediaSource,
    req: AcquisitionRequest<'_>,
    policy: AcquisitionPolicy,
) -> Result<Vec<u8>, AcquisitionError> {
    let envelope = EnvelopeDownload {
        key: MessageKey {
            remote_jid: req.chat.clone(),
            from_me: false,
            id: req.quoted.original_message_id.clone(),
            participant: req.quoted.original_sender.clone(),
        },
        message: req.quoted.raw.clone(),
        reupload: true,
        timeout: policy.timeout,
    };

    let bytes = tokio::time::timeout(policy.timeout, source.download_message(&envelope))
        .await
        .map_err(|_| AcquisitionError::Timeout(policy.timeout))??;

    if bytes.len() <= policy.sanity_floor {
        return Err(AcquisitionError::TooSmall {
            len: bytes.len(),
            floor: policy.sanity_floor,
        });
    }
    Ok(bytes)
}

/// Stream download straight from the descriptor, concatenated into one buffer.
pub async fn fallback(
    source: &dyn MediaSource,
    reference: &MediaReference,
    policy: AcquisitionPolicy,
) -> Result<Vec<u8>, AcquisitionError> {
    let mut stream = source
        .download_content(&reference.descriptor, reference.kind)
        .await?;

    // Size hints come from the sender; cap the pre-allocation.
    let declared = reference
        .descriptor
        .file_length
        .and_then(|n| usize::try_from(n).ok());
    let mut buf = Vec::with_capacity(declared.unwrap_or(0).min(64 * MIB));
    let limit = stream_limit(declared);

    while let Some(chunk) = stream.recv().await {
        let chunk = chunk?;
        let len = buf.len() + chunk.len();
        if len > limit {
            return Err(AcquisitionError::Oversized { len, limit });
        }
        buf.extend_from_slice(&chunk);
    }

    if buf.len() < policy.sanity_floor {
        return Err(AcquisitionError::TooSmall {
            len: buf.len(),
            floor: policy.sanity_floor,
        });
    }
    Ok(buf)
}

// Allow slack over the declared length (padding, re-encodes), never more than the ceiling.
fn stream_limit(declared: Option<usize>) -> usize {
    match declared {
        Some(n) => n.saturating_mul(2).clamp(MIB, MAX_STREAM_BYTES),
        None => MAX_STREAM_BYTES,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::MessageId,
        errors::Error,
        locator::Shape,
        messaging::types::{ChunkStream, MediaDescriptor, MediaKind, QuotedPayload},
        utils::KIB,
        Result,
    };
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    enum Primary {
        Bytes(usize),
        Fail,
        Hang,
    }

    struct FakeSource {
        primary: Primary,
        chunks: Option<Vec<usize>>,
        envelopes: Mutex<Vec<EnvelopeDownload>>,
        content_calls: Mutex<usize>,
    }

    impl FakeSource {
        fn new(primary: Primary, chunks: Option<Vec<usize>>) -> Self {
            Self {
                primary,
                chunks,
                envelopes: Mutex::new(Vec::new()),
                content_calls: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl MediaSource for FakeSource {
        async fn download_message(&self, req: &EnvelopeDownload) -> Result<Vec<u8>> {
            self.envelopes.lock().unwrap().push(req.clone());
            match self.primary {
                Primary::Bytes(n) => Ok(vec![1; n]),
                Primary::Fail => Err(Error::Transport("media gone".to_string())),
                Primary::Hang => std::future::pending().await,
            }
        }

        async fn download_content(
            &self,
            _descriptor: &MediaDescriptor,
            _kind: MediaKind,
        ) -> Result<ChunkStream> {
            *self.content_calls.lock().unwrap() += 1;
            let Some(chunks) = self.chunks.clone() else {
                return Err(Error::Transport("no media key".to_string()));
            };
            let (tx, rx) = mpsc::channel(chunks.len().max(1));
            for n in chunks {
                tx.send(Ok(vec![2; n])).await.unwrap();
            }
            Ok(rx)
        }
    }

    fn quoted() -> (Jid, QuotedContext, MediaReference) {
        let descriptor = MediaDescriptor::from_raw(json!({ "mimetype": "image/jpeg" }));
        let ctx = QuotedContext {
            original_message_id: MessageId("ORIG".to_string()),
            original_sender: Some(Jid::new("777@s.whatsapp.net")),
            payload: QuotedPayload::Image(descriptor.clone()),
            raw: json!({ "imageMessage": { "mimetype": "image/jpeg" } }),
        };
        let reference = MediaReference {
            kind: MediaKind::Image,
            descriptor,
            shape: Shape::Direct,
        };
        (Jid::new("555@s.whatsapp.net"), ctx, reference)
    }

    fn policy() -> AcquisitionPolicy {
        AcquisitionPolicy::from(&DetectorConfig::default())
    }

    #[tokio::test]
    async fn primary_uses_original_message_identity() {
        let (chat, ctx, reference) = quoted();
        let source = FakeSource::new(Primary::Bytes(50 * KIB), None);
        let req = AcquisitionRequest {
            chat: &chat,
            quoted: &ctx,
            reference: &reference,
        };

        let got = acquire(&source, req, policy()).await.unwrap();
        assert_eq!(got.path, AcquisitionPath::Primary);
        assert_eq!(got.byte_length(), 50 * KIB);
        assert_eq!(*source.content_calls.lock().unwrap(), 0);

        let env = source.envelopes.lock().unwrap()[0].clone();
        assert_eq!(env.key.remote_jid, chat);
        assert_eq!(env.key.id, MessageId("ORIG".to_string()));
        assert_eq!(env.key.participant, Some(Jid::new("777@s.whatsapp.net")));
        assert!(!env.key.from_me);
        assert!(env.reupload);
        assert_eq!(env.message, ctx.raw);
    }

    #[tokio::test]
    async fn stub_primary_buffer_triggers_fallback() {
        let (chat, ctx, reference) = quoted();
        let req = AcquisitionRequest {
            chat: &chat,
            quoted: &ctx,
            reference: &reference,
        };

        for stub in [0, 10, KIB - 1, KIB] {
            let source = FakeSource::new(Primary::Bytes(stub), Some(vec![16 * KIB, 16 * KIB]));
            let got = acquire(&source, req, policy()).await.unwrap();
            assert_eq!(got.path, AcquisitionPath::Fallback, "stub of {stub} bytes");
            assert_eq!(got.byte_length(), 32 * KIB);
            assert_eq!(*source.content_calls.lock().unwrap(), 1);
        }
    }

    #[tokio::test]
    async fn primary_error_triggers_fallback() {
        let (chat, ctx, reference) = quoted();
        let source = FakeSource::new(Primary::Fail, Some(vec![30 * KIB]));
        let req = AcquisitionRequest {
            chat: &chat,
            quoted: &ctx,
            reference: &reference,
        };
        let got = acquire(&source, req, policy()).await.unwrap();
        assert_eq!(got.path, AcquisitionPath::Fallback);
    }

    #[tokio::test(start_paused = true)]
    async fn primary_timeout_triggers_fallback() {
        let (chat, ctx, reference) = quoted();
        let source = FakeSource::new(Primary::Hang, Some(vec![30 * KIB]));
        let req = AcquisitionRequest {
            chat: &chat,
            quoted: &ctx,
            reference: &reference,
        };

        let err = primary(&source, req, policy()).await.unwrap_err();
        assert!(matches!(err, AcquisitionError::Timeout(d) if d == Duration::from_secs(15)));

        let got = acquire(&source, req, policy()).await.unwrap();
        assert_eq!(got.path, AcquisitionPath::Fallback);
    }

    #[tokio::test]
    async fn both_paths_failing_reports_each_cause() {
        let (chat, ctx, reference) = quoted();
        let req = AcquisitionRequest {
            chat: &chat,
            quoted: &ctx,
            reference: &reference,
        };

        let source = FakeSource::new(Primary::Bytes(100), Some(vec![200, 300]));
        let failure = acquire(&source, req, policy()).await.unwrap_err();
        assert!(matches!(
            failure.primary,
            AcquisitionError::TooSmall { len: 100, .. }
        ));
        assert!(matches!(
            failure.fallback,
            AcquisitionError::TooSmall { len: 500, .. }
        ));

        let source = FakeSource::new(Primary::Fail, None);
        let failure = acquire(&source, req, policy()).await.unwrap_err();
        assert!(matches!(failure.primary, AcquisitionError::Transport(_)));
        assert!(matches!(failure.fallback, AcquisitionError::Transport(_)));
    }

    #[tokio::test]
    async fn stream_errors_abort_the_fallback() {
        struct Broken;

        #[async_trait]
        impl MediaSource for Broken {
            async fn download_message(&self, _req: &EnvelopeDownload) -> Result<Vec<u8>> {
                Err(Error::Transport("stale".to_string()))
            }

            async fn download_content(
                &self,
                _descriptor: &MediaDescriptor,
                _kind: MediaKind,
            ) -> Result<ChunkStream> {
                let (tx, rx) = mpsc::channel(2);
                tx.send(Ok(vec![0; 40 * KIB])).await.unwrap();
                tx.send(Err(Error::Transport("hmac mismatch".to_string())))
                    .await
                    .unwrap();
                Ok(rx)
            }
        }

        let (_, _, reference) = quoted();
        let err = fallback(&Broken, &reference, policy()).await.unwrap_err();
        assert!(err.to_string().contains("hmac mismatch"));
    }

    #[tokio::test]
    async fn stream_far_beyond_declared_length_is_refused() {
        let descriptor = MediaDescriptor::from_raw(json!({ "fileLength": 300 * KIB }));
        let reference = MediaReference {
            kind: MediaKind::Image,
            descriptor,
            shape: Shape::Direct,
        };

        let source = FakeSource::new(Primary::Fail, Some(vec![512 * KIB, 512 * KIB]));
        let got = fallback(&source, &reference, policy()).await.unwrap();
        assert_eq!(got.len(), 1024 * KIB);

        let source = FakeSource::new(Primary::Fail, Some(vec![512 * KIB; 3]));
        let err = fallback(&source, &reference, policy()).await.unwrap_err();
        assert!(matches!(
            err,
            AcquisitionError::Oversized { len, limit } if len == 1536 * KIB && limit == MIB
        ));
    }

    #[test]
    fn stream_limit_scales_with_declared_length() {
        assert_eq!(stream_limit(None), MAX_STREAM_BYTES);
        assert_eq!(stream_limit(Some(10)), MIB);
        assert_eq!(stream_limit(Some(5 * MIB)), 10 * MIB);
        assert_eq!(stream_limit(Some(usize::MAX)), MAX_STREAM_BYTES);
    }
}
