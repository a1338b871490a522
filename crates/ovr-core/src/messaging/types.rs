use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::{
    domain::{Jid, MessageId, MessageKey},
    Result,
};

/// Chunks of a streamed download, in order. The stream ends when the sender is dropped.
pub type ChunkStream = mpsc::Receiver<Result<Vec<u8>>>;

/// Media kinds eligible for capture.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
        }
    }

    pub fn default_mimetype(self) -> &'static str {
        match self {
            MediaKind::Image => "image/jpeg",
            MediaKind::Video => "video/mp4",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            MediaKind::Image => "jpg",
            MediaKind::Video => "mp4",
        }
    }
}

/// Metadata of one media attachment (mimetype, size hints, decryption parameters).
///
/// The full transport object is kept in `raw` so it can be handed back to the transport
/// untouched; the typed fields are read-only projections of it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "Value", into = "Value")]
pub struct MediaDescriptor {
    pub mimetype: Option<String>,
    pub file_length: Option<u64>,
    raw: Value,
}

impl MediaDescriptor {
    pub fn from_raw(raw: Value) -> Self {
        let mimetype = raw
            .get("mimetype")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        let file_length = raw.get("fileLength").and_then(parse_length);

        Self {
            mimetype,
            file_length,
            raw,
        }
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }

    pub fn mimetype_or_default(&self, kind: MediaKind) -> &str {
        self.mimetype.as_deref().unwrap_or(kind.default_mimetype())
    }
}

impl From<Value> for MediaDescriptor {
    fn from(raw: Value) -> Self {
        Self::from_raw(raw)
    }
}

impl From<MediaDescriptor> for Value {
    fn from(d: MediaDescriptor) -> Self {
        d.raw
    }
}

// Lengths arrive as numbers, decimal strings, or protobuf `Long` objects.
fn parse_length(v: &Value) -> Option<u64> {
    match v {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Object(o) => {
            let low = o.get("low")?.as_i64()? as u32;
            let high = o.get("high")?.as_i64()? as u32;
            Some((u64::from(high) << 32) | u64::from(low))
        }
        _ => None,
    }
}

/// The shapes a quoted message can take, as far as capture is concerned.
#[derive(Clone, Debug, PartialEq)]
pub enum QuotedPayload {
    Image(MediaDescriptor),
    Video(MediaDescriptor),
    Ephemeral(Box<QuotedPayload>),
    ViewOnce(Box<QuotedPayload>),
    /// Anything else (text, audio, sticker, document...), labelled by its envelope field.
    Other(String),
}

impl QuotedPayload {
    pub fn label(&self) -> &str {
        match self {
            QuotedPayload::Image(_) => "image",
            QuotedPayload::Video(_) => "video",
            QuotedPayload::Ephemeral(_) => "ephemeral",
            QuotedPayload::ViewOnce(_) => "view-once",
            QuotedPayload::Other(label) => label,
        }
    }
}

/// The message a reply points at. Lives only for one dispatch.
#[derive(Clone, Debug)]
pub struct QuotedContext {
    pub original_message_id: MessageId,
    pub original_sender: Option<Jid>,
    pub payload: QuotedPayload,
    /// Untyped quoted message as received; needed by the envelope download path.
    pub raw: Value,
}

/// One inbound message, already admitted by the batch filter.
#[derive(Clone, Debug)]
pub struct InboundEvent {
    pub key: MessageKey,
    pub body: Option<String>,
    pub quoted: Option<QuotedContext>,
}

impl InboundEvent {
    pub fn sender_is_self(&self) -> bool {
        self.key.from_me
    }

    pub fn chat_id(&self) -> &Jid {
        &self.key.remote_jid
    }

    pub fn message_id(&self) -> &MessageId {
        &self.key.id
    }
}

/// Request for the envelope-based (primary) download path.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeDownload {
    pub key: MessageKey,
    pub message: Value,
    pub reupload: bool,
    #[serde(rename = "timeoutMs", serialize_with = "as_millis")]
    pub timeout: Duration,
}

fn as_millis<S: serde::Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

/// Outbound media payload. There is deliberately no caption.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutgoingMedia<'a> {
    Native {
        kind: MediaKind,
        data: &'a [u8],
        mimetype: &'a str,
    },
    Document {
        data: &'a [u8],
        mimetype: &'a str,
        file_name: &'a str,
    },
}

impl OutgoingMedia<'_> {
    pub fn data(&self) -> &[u8] {
        match self {
            OutgoingMedia::Native { data, .. } | OutgoingMedia::Document { data, .. } => data,
        }
    }

    pub fn mimetype(&self) -> &str {
        match self {
            OutgoingMedia::Native { mimetype, .. } | OutgoingMedia::Document { mimetype, .. } => {
                mimetype
            }
        }
    }
}
