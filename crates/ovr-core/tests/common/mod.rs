#![allow(dead_code)]

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use ovr_core::{
    config::DetectorConfig,
    domain::Jid,
    errors::Error,
    messaging::{
        port::{MediaSource, MessagingPort},
        types::{
            ChunkStream, EnvelopeDownload, InboundEvent, MediaDescriptor, MediaKind, OutgoingMedia,
        },
    },
    pipeline::ReplyDetector,
    toggle::ToggleState,
    wire::WireEvent,
    Result,
};

pub const OWNER: &str = "owner@s.whatsapp.net";
pub const CHAT: &str = "555@s.whatsapp.net";

#[derive(Clone, Debug, PartialEq)]
pub enum SentMedia {
    Native {
        to: Jid,
        kind: MediaKind,
        len: usize,
        mimetype: String,
    },
    Document {
        to: Jid,
        len: usize,
        mimetype: String,
        file_name: String,
    },
}

#[derive(Default)]
pub struct FakeMessenger {
    pub fail_native: bool,
    pub fail_text: bool,
    pub panic_on_text: bool,
    pub texts: Mutex<Vec<(Jid, String)>>,
    pub media: Mutex<Vec<SentMedia>>,
    pub media_attempts: AtomicUsize,
}

impl FakeMessenger {
    pub fn texts(&self) -> Vec<(Jid, String)> {
        self.texts.lock().unwrap().clone()
    }

    pub fn media(&self) -> Vec<SentMedia> {
        self.media.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessagingPort for FakeMessenger {
    async fn send_text(&self, to: &Jid, text: &str) -> Result<()> {
        if self.panic_on_text {
            panic!("messenger exploded");
        }
        if self.fail_text {
            return Err(Error::Transport("not connected".to_string()));
        }
        self.texts.lock().unwrap().push((to.clone(), text.to_string()));
        Ok(())
    }

    async fn send_media(&self, to: &Jid, media: OutgoingMedia<'_>) -> Result<()> {
        self.media_attempts.fetch_add(1, Ordering::SeqCst);
        let sent = match media {
            OutgoingMedia::Native { .. } if self.fail_native => {
                return Err(Error::Transport("unsupported media".to_string()));
            }
            OutgoingMedia::Native {
                kind,
                data,
                mimetype,
            } => SentMedia::Native {
                to: to.clone(),
                kind,
                len: data.len(),
                mimetype: mimetype.to_string(),
            },
            OutgoingMedia::Document {
                data,
                mimetype,
                file_name,
            } => SentMedia::Document {
                to: to.clone(),
                len: data.len(),
                mimetype: mimetype.to_string(),
                file_name: file_name.to_string(),
            },
        };
        self.media.lock().unwrap().push(sent);
        Ok(())
    }
}

/// `primary`: bytes returned by the envelope path (`None` = transport error).
/// `stream`: chunk sizes of the descriptor path (`None` = transport error).
#[derive(Default)]
pub struct FakeSource {
    pub primary: Option<usize>,
    pub stream: Option<Vec<usize>>,
    pub primary_calls: AtomicUsize,
    pub content_calls: AtomicUsize,
}

impl FakeSource {
    pub fn primary(bytes: usize) -> Self {
        Self {
            primary: Some(bytes),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.primary_calls.load(Ordering::SeqCst) + self.content_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaSource for FakeSource {
    async fn download_message(&self, _req: &EnvelopeDownload) -> Result<Vec<u8>> {
        self.primary_calls.fetch_add(1, Ordering::SeqCst);
        self.primary
            .map(|n| vec![0xAB; n])
            .ok_or_else(|| Error::Transport("no session for media".to_string()))
    }

    async fn download_content(
        &self,
        _descriptor: &MediaDescriptor,
        _kind: MediaKind,
    ) -> Result<ChunkStream> {
        self.content_calls.fetch_add(1, Ordering::SeqCst);
        let chunks = self
            .stream
            .clone()
            .ok_or_else(|| Error::Transport("missing media key".to_string()))?;
        let (tx, rx) = mpsc::channel(chunks.len().max(1));
        for n in chunks {
            tx.send(Ok(vec![0xCD; n])).await.unwrap();
        }
        Ok(rx)
    }
}

pub fn detector(messenger: Arc<FakeMessenger>, source: Arc<FakeSource>) -> ReplyDetector {
    ReplyDetector::new(
        Jid::new(OWNER),
        &DetectorConfig::default(),
        Arc::new(ToggleState::new()),
        messenger,
        source,
    )
}

fn event(v: Value) -> InboundEvent {
    serde_json::from_value::<WireEvent>(v)
        .unwrap()
        .into_inbound()
        .unwrap()
}

/// Plain text message in `CHAT`.
pub fn text(body: &str, from_me: bool) -> InboundEvent {
    event(json!({
        "key": { "remoteJid": CHAT, "fromMe": from_me, "id": "TXT" },
        "message": { "conversation": body }
    }))
}

/// Reply in `CHAT` quoting `quoted`.
pub fn reply(quoted: Value, from_me: bool) -> InboundEvent {
    event(json!({
        "key": { "remoteJid": CHAT, "fromMe": from_me, "id": "REPLY" },
        "message": { "extendedTextMessage": {
            "text": "👀",
            "contextInfo": {
                "stanzaId": "ORIGINAL",
                "participant": "777@s.whatsapp.net",
                "quotedMessage": quoted
            }
        } }
    }))
}

pub fn view_once_image() -> Value {
    json!({ "viewOnceMessage": { "message": { "imageMessage": {
        "mimetype": "image/jpeg",
        "caption": "for your eyes only",
        "mediaKey": "a2V5",
        "directPath": "/v/t62.7118-24/1"
    } } } })
}

pub fn view_once_video() -> Value {
    json!({ "ephemeralMessage": { "message": { "viewOnceMessageV2": { "message": {
        "videoMessage": { "mimetype": "video/mp4", "mediaKey": "a2V5" }
    } } } } })
}
