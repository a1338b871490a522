use std::fmt;

use serde::{Deserialize, Serialize};

/// Messaging-client identity of a chat or user (e.g. `1234@s.whatsapp.net`).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Jid(pub String);

impl Jid {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Local part before the `@`, used for console output.
    pub fn user(&self) -> &str {
        self.0.split('@').next().unwrap_or_default()
    }

    /// Status updates and broadcast lists are never processed.
    pub fn is_broadcast(&self) -> bool {
        self.0 == "status@broadcast" || self.0.contains("broadcast")
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Message id as assigned by the transport (opaque string).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Addressing information for a single message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageKey {
    pub remote_jid: Jid,
    pub from_me: bool,
    pub id: MessageId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participant: Option<Jid>,
}
