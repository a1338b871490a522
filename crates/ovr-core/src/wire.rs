//! Wire model of the messaging client's message events.
//!
//! The transport delivers nested JSON envelopes; they are parsed into typed shapes once, here,
//! so nothing downstream has to dig through optional fields.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::{
    domain::{Jid, MessageId, MessageKey},
    messaging::types::{InboundEvent, MediaDescriptor, QuotedContext, QuotedPayload},
};

/// Delivery-type discriminator of an upsert batch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpsertKind {
    /// Live messages.
    Notify,
    /// History sync / backfill.
    Append,
    #[serde(other)]
    Unknown,
}

#[derive(Clone, Debug, Deserialize)]
pub struct UpsertBatch {
    #[serde(rename = "type")]
    pub kind: UpsertKind,
    /// Items are parsed one by one in [`UpsertBatch::admitted_events`], so a malformed
    /// protocol stub never takes its siblings down with it.
    #[serde(default)]
    pub messages: Vec<Value>,
}

impl UpsertBatch {
    /// Events that should reach the detector: live batches only, no empty envelopes,
    /// nothing from status/broadcast chats.
    pub fn admitted_events(self) -> Vec<InboundEvent> {
        if self.kind != UpsertKind::Notify {
            return Vec::new();
        }
        self.messages
            .into_iter()
            .filter_map(|item| match WireEvent::deserialize(&item) {
                Ok(ev) => Some(ev),
                Err(e) => {
                    tracing::debug!(error = %e, "skipping unparseable message event");
                    None
                }
            })
            .filter(|ev| !ev.key.remote_jid.is_broadcast())
            .filter_map(WireEvent::into_inbound)
            .collect()
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct WireEvent {
    pub key: MessageKey,
    #[serde(default)]
    pub message: Option<WireMessage>,
}

impl WireEvent {
    /// Returns `None` for events without a message body (receipts, protocol stubs).
    pub fn into_inbound(self) -> Option<InboundEvent> {
        let msg = self.message?;

        let body = msg
            .conversation
            .as_deref()
            .or_else(|| {
                msg.extended_text_message
                    .as_ref()
                    .and_then(|e| e.text.as_deref())
            })
            .map(|t| t.trim().to_string());

        let quoted = msg
            .extended_text_message
            .and_then(|e| e.context_info)
            .and_then(|ctx| quoted_context(ctx, &self.key.id));

        Some(InboundEvent {
            key: self.key,
            body,
            quoted,
        })
    }
}

fn quoted_context(ctx: ContextInfo, reply_id: &MessageId) -> Option<QuotedContext> {
    let raw = ctx.quoted_message.filter(|v| !v.is_null())?;

    let payload = match WireMessage::deserialize(&raw) {
        Ok(m) => QuotedPayload::from(&m),
        Err(e) => {
            tracing::debug!(error = %e, "unparseable quoted message");
            QuotedPayload::Other("malformed".to_string())
        }
    };

    let original_message_id = ctx
        .stanza_id
        .filter(|s| !s.is_empty())
        .map(MessageId)
        .unwrap_or_else(|| reply_id.clone());

    Some(QuotedContext {
        original_message_id,
        original_sender: ctx.participant.filter(|s| !s.is_empty()).map(Jid),
        payload,
        raw,
    })
}

/// Protocol message envelope. Only the fields capture cares about are typed.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    #[serde(default)]
    conversation: Option<String>,
    #[serde(default)]
    extended_text_message: Option<ExtendedText>,
    #[serde(default)]
    image_message: Option<Value>,
    #[serde(default)]
    video_message: Option<Value>,
    #[serde(default)]
    ephemeral_message: Option<Wrapper>,
    #[serde(default)]
    view_once_message: Option<Wrapper>,
    #[serde(default)]
    view_once_message_v2: Option<Wrapper>,
    #[serde(default)]
    view_once_message_v2_extension: Option<Wrapper>,
    #[serde(flatten)]
    rest: Map<String, Value>,
}

impl WireMessage {
    fn view_once(&self) -> Option<&WireMessage> {
        [
            &self.view_once_message,
            &self.view_once_message_v2,
            &self.view_once_message_v2_extension,
        ]
        .into_iter()
        .find_map(|w| w.as_ref().and_then(|w| w.message.as_deref()))
    }

    fn other_label(&self) -> String {
        if self.conversation.is_some() || self.extended_text_message.is_some() {
            return "text".to_string();
        }
        self.rest
            .iter()
            .find(|(k, v)| !v.is_null() && k.as_str() != "messageContextInfo")
            .map(|(k, _)| k.clone())
            .unwrap_or_else(|| "empty".to_string())
    }
}

impl From<&WireMessage> for QuotedPayload {
    fn from(m: &WireMessage) -> Self {
        if let Some(v) = m.image_message.as_ref().filter(|v| !v.is_null()) {
            return QuotedPayload::Image(MediaDescriptor::from_raw(v.clone()));
        }
        if let Some(v) = m.video_message.as_ref().filter(|v| !v.is_null()) {
            return QuotedPayload::Video(MediaDescriptor::from_raw(v.clone()));
        }
        if let Some(inner) = m
            .ephemeral_message
            .as_ref()
            .and_then(|w| w.message.as_deref())
        {
            return QuotedPayload::Ephemeral(Box::new(inner.into()));
        }
        if let Some(inner) = m.view_once() {
            return QuotedPayload::ViewOnce(Box::new(inner.into()));
        }
        QuotedPayload::Other(m.other_label())
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExtendedText {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    context_info: Option<ContextInfo>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContextInfo {
    #[serde(default)]
    stanza_id: Option<String>,
    #[serde(default)]
    participant: Option<String>,
    #[serde(default)]
    quoted_message: Option<Value>,
}

/// `{ message: { ... } }` wrappers (ephemeral, view-once).
#[derive(Clone, Debug, Default, Deserialize)]
struct Wrapper {
    #[serde(default)]
    message: Option<Box<WireMessage>>,
}
