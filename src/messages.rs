//! Wire types exchanged between the widget and its host.
//!
//! Outbound messages are produced by this crate and therefore typed.
//! Inbound traffic arrives as an [`Envelope`] holding raw JSON; it only
//! becomes typed after passing [`crate::schema::validate_inbound`].

use serde::{Deserialize, Serialize};

pub const REQUEST_TOKEN: &str = "REQUEST_TOKEN";
pub const REFRESH_TOKEN: &str = "REFRESH_TOKEN";
pub const AUTH_TOKEN: &str = "AUTH_TOKEN";
pub const AUTH_ERROR: &str = "AUTH_ERROR";
pub const HEARTBEAT: &str = "HEARTBEAT";
pub const REQUEST_FILE_CONTENT: &str = "REQUEST_FILE_CONTENT";
pub const FILE_CONTENT: &str = "FILE_CONTENT";
pub const FILE_CONTENT_ERROR: &str = "FILE_CONTENT_ERROR";

/// Messages posted from the widget to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboundMessage {
    RequestToken {
        timestamp: i64,
        nonce: String,
    },
    RefreshToken {
        timestamp: i64,
        nonce: String,
    },
    Heartbeat {
        timestamp: i64,
    },
    #[serde(rename_all = "camelCase")]
    RequestFileContent {
        file_path: String,
        nonce: String,
    },
}

impl OutboundMessage {
    /// Discriminator as it appears on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundMessage::RequestToken { .. } => REQUEST_TOKEN,
            OutboundMessage::RefreshToken { .. } => REFRESH_TOKEN,
            OutboundMessage::Heartbeat { .. } => HEARTBEAT,
            OutboundMessage::RequestFileContent { .. } => REQUEST_FILE_CONTENT,
        }
    }

    /// Correlation nonce, for messages that expect an answer.
    pub fn nonce(&self) -> Option<&str> {
        match self {
            OutboundMessage::RequestToken { nonce, .. }
            | OutboundMessage::RefreshToken { nonce, .. }
            | OutboundMessage::RequestFileContent { nonce, .. } => Some(nonce),
            OutboundMessage::Heartbeat { .. } => None,
        }
    }
}

/// An untrusted inbound message tagged with the sender's origin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub origin: String,
    pub data: serde_json::Value,
}

impl Envelope {
    pub fn new(origin: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            origin: origin.into(),
            data,
        }
    }

    /// The `type` field, if present. Still untrusted.
    pub fn kind(&self) -> Option<&str> {
        self.data.get("type").and_then(|v| v.as_str())
    }
}

/// Current time as Unix milliseconds, the unit of every wire timestamp.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
