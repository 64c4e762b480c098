//! Wire messages.
//!
//! Outbound traffic is a single envelope type. Inbound traffic is loosely
//! shaped JSON, so frames are kept as raw values until `decode` classifies them.

use crate::Role;
use serde::{Deserialize, Serialize};

/// Message sent from client to backend for every user turn.
///
/// The backend is stateless across requests, so the whole prior conversation
/// travels with each envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundEnvelope {
    pub user_input: String,
    #[serde(default)]
    pub title_context: String,
    #[serde(default)]
    pub abstract_context: String,
    #[serde(default)]
    pub conversation_history: Vec<HistoryEntry>,
}

/// One prior turn as the backend sees it (no completeness flag).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
}

/// A payload received from the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// The payload parsed as JSON.
    Structured(serde_json::Value),
    /// The payload did not parse; kept verbatim.
    Raw(String),
    /// A binary payload that is not UTF-8; kept byte for byte.
    Binary(Vec<u8>),
}

impl InboundFrame {
    /// Parse a text payload, falling back to `Raw` instead of failing.
    pub fn parse(payload: &str) -> Self {
        match serde_json::from_str(payload) {
            Ok(value) => Self::Structured(value),
            Err(_) => Self::Raw(payload.to_string()),
        }
    }

    /// Classify a binary payload. UTF-8 data is treated like text.
    pub fn from_bytes(data: Vec<u8>) -> Self {
        match String::from_utf8(data) {
            Ok(text) => Self::parse(&text),
            Err(e) => {
                tracing::debug!(len = e.as_bytes().len(), "binary frame is not UTF-8");
                Self::Binary(e.into_bytes())
            }
        }
    }
}

/// A recognized inbound event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolEvent {
    /// A chunk of assistant text to append.
    Token(String),
    /// The current assistant turn is finished.
    Done,
    /// The backend failed; terminates the current turn.
    Error(String),
}

#[derive(Deserialize)]
struct FrameShape {
    token: Option<String>,
    done: Option<bool>,
    error: Option<String>,
}

/// Classify a frame. Returns `None` for shapes this client does not know.
///
/// When a frame carries several keys, `error` wins over `token`, which wins
/// over `done`.
pub fn decode(frame: &InboundFrame) -> Option<ProtocolEvent> {
    let InboundFrame::Structured(value) = frame else {
        tracing::debug!("ignoring unstructured frame");
        return None;
    };

    let shape = match FrameShape::deserialize(value) {
        Ok(shape) => shape,
        Err(e) => {
            tracing::debug!(error = %e, "ignoring frame with unexpected shape");
            return None;
        }
    };

    if let Some(message) = shape.error {
        return Some(ProtocolEvent::Error(message));
    }
    if let Some(text) = shape.token {
        return Some(ProtocolEvent::Token(text));
    }
    if shape.done == Some(true) {
        return Some(ProtocolEvent::Done);
    }

    tracing::debug!(frame = %value, "ignoring unrecognized frame");
    None
}
