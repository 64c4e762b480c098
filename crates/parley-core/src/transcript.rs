//! The conversation transcript and the fold that builds it from events.

use crate::{HistoryEntry, OutboundEnvelope, ProtocolEvent};
use serde::{Deserialize, Serialize};

/// Who authored a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// One message in the transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    /// False only while an assistant reply is still streaming.
    pub complete: bool,
}

impl Turn {
    /// A finished user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            complete: true,
        }
    }

    /// An assistant message that is still receiving tokens.
    pub fn streaming(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            complete: false,
        }
    }

    /// A finished assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            complete: true,
        }
    }
}

/// Context fields forwarded to the backend with every message.
///
/// Opaque to this crate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationContext {
    pub title: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
}

/// Text shown in place of a reply that failed.
pub fn error_text(message: &str) -> String {
    format!("Error: {message}")
}

/// Error from transcript operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    #[error("an assistant response is still streaming")]
    ResponseInFlight,
}

/// Ordered conversation history.
///
/// At most the last turn is incomplete, and only assistant turns can be.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transcript {
    turns: Vec<Turn>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// True while the tail turn is still being built.
    ///
    /// Callers use this to refuse new sends until the reply settles.
    pub fn is_streaming(&self) -> bool {
        self.turns.last().is_some_and(|turn| !turn.complete)
    }

    fn streaming_tail(&mut self) -> Option<&mut Turn> {
        self.turns
            .last_mut()
            .filter(|turn| turn.role == Role::Assistant && !turn.complete)
    }

    /// Fold one event into the transcript.
    pub fn apply(&mut self, event: ProtocolEvent) {
        match event {
            ProtocolEvent::Token(text) => match self.streaming_tail() {
                Some(turn) => turn.content.push_str(&text),
                None => self.turns.push(Turn::streaming(text)),
            },
            ProtocolEvent::Done => match self.streaming_tail() {
                Some(turn) => turn.complete = true,
                None => tracing::debug!("done without a streaming turn"),
            },
            ProtocolEvent::Error(message) => {
                tracing::warn!(%message, "backend reported an error");
                let content = error_text(&message);
                match self.streaming_tail() {
                    Some(turn) => {
                        turn.content = content;
                        turn.complete = true;
                    }
                    None => self.turns.push(Turn::assistant(content)),
                }
            }
        }
    }

    /// Consume `event` and return the updated transcript.
    pub fn applied(mut self, event: ProtocolEvent) -> Self {
        self.apply(event);
        self
    }

    /// Append a finished user turn.
    ///
    /// Refused while a reply is streaming, so the incomplete turn stays last.
    pub fn append_user_turn(&mut self, text: impl Into<String>) -> Result<(), CoreError> {
        if self.is_streaming() {
            return Err(CoreError::ResponseInFlight);
        }
        self.turns.push(Turn::user(text));
        Ok(())
    }

    /// The transcript reduced to role/content pairs.
    pub fn history(&self) -> Vec<HistoryEntry> {
        self.turns
            .iter()
            .map(|turn| HistoryEntry {
                role: turn.role,
                content: turn.content.clone(),
            })
            .collect()
    }

    /// Build the payload for sending `text` after the current transcript.
    pub fn to_outbound_envelope(
        &self,
        text: impl Into<String>,
        context: &ConversationContext,
    ) -> OutboundEnvelope {
        OutboundEnvelope {
            user_input: text.into(),
            title_context: context.title.clone(),
            abstract_context: context.abstract_text.clone(),
            conversation_history: self.history(),
        }
    }
}
