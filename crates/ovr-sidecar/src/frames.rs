//! JSON-lines frames exchanged with the bridge process.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use ovr_core::{
    domain::Jid,
    errors::Error,
    messaging::types::{EnvelopeDownload, MediaDescriptor, MediaKind, OutgoingMedia},
    wire::UpsertBatch,
    Result,
};

/// Bridge -> relay.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "frame", rename_all = "snake_case")]
pub enum Frame {
    /// A batch of message events (`{"frame":"upsert","type":"notify","messages":[...]}`).
    Upsert(UpsertBatch),
    Response {
        id: u64,
        ok: bool,
        #[serde(default)]
        data: Option<Value>,
        #[serde(default)]
        error: Option<String>,
    },
    Chunk {
        id: u64,
        data: String,
    },
    End {
        id: u64,
    },
    Connection {
        state: String,
        #[serde(default)]
        detail: Option<String>,
    },
}

/// Relay -> bridge.
#[derive(Debug, Serialize)]
pub struct Request<'a> {
    pub id: u64,
    #[serde(flatten)]
    pub op: Op<'a>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Op<'a> {
    SendText {
        to: &'a Jid,
        text: &'a str,
    },
    SendMedia {
        to: &'a Jid,
        media: Value,
    },
    DownloadMessage(&'a EnvelopeDownload),
    DownloadContent {
        kind: MediaKind,
        descriptor: &'a MediaDescriptor,
    },
}

/// `{ image|video: <b64>, mimetype }` or `{ document: <b64>, mimetype, fileName }`.
pub fn media_payload(media: OutgoingMedia<'_>) -> Value {
    let mut payload = json!({ "mimetype": media.mimetype() });
    let encoded = Value::String(STANDARD.encode(media.data()));
    match media {
        OutgoingMedia::Native { kind, .. } => {
            payload[kind.as_str()] = encoded;
        }
        OutgoingMedia::Document { file_name, .. } => {
            payload["document"] = encoded;
            payload["fileName"] = Value::String(file_name.to_string());
        }
    }
    payload
}

pub fn decode_bytes(data: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(data.trim())
        .map_err(|e| Error::Transport(format!("invalid base64 payload: {e}")))
}
