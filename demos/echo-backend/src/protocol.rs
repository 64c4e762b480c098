//! Frames the backend sends and the reply it composes.

use parley_core::OutboundEnvelope;
use serde::Serialize;

/// Backend -> client frames.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ServerFrame {
    Token { token: String },
    Done { done: bool },
    Error { error: String },
}

impl ServerFrame {
    pub fn token(text: impl Into<String>) -> Self {
        Self::Token { token: text.into() }
    }

    pub fn done() -> Self {
        Self::Done { done: true }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            error: message.into(),
        }
    }
}

/// Build the reply for one envelope.
pub fn compose_reply(envelope: &OutboundEnvelope) -> String {
    let mut reply = format!("You said: {}.", envelope.user_input.trim());
    if !envelope.title_context.is_empty() {
        reply.push_str(&format!(" We are talking about {}.", envelope.title_context));
    }
    match envelope.conversation_history.len() {
        0 => reply.push_str(" This is the start of our conversation."),
        n => reply.push_str(&format!(" I remember {n} earlier messages.")),
    }
    reply
}

/// Split a reply into the chunks streamed as tokens.
pub fn tokenize(reply: &str) -> impl Iterator<Item = &str> {
    reply.split_inclusive(' ')
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::{HistoryEntry, Role};

    fn envelope(history: usize) -> OutboundEnvelope {
        OutboundEnvelope {
            user_input: "hello ".into(),
            title_context: "coffee carts".into(),
            abstract_context: String::new(),
            conversation_history: (0..history)
                .map(|i| HistoryEntry {
                    role: if i % 2 == 0 { Role::User } else { Role::Assistant },
                    content: format!("message {i}"),
                })
                .collect(),
        }
    }

    #[test]
    fn frames_match_wire_shapes() {
        let encode = |f: ServerFrame| serde_json::to_string(&f).unwrap();
        assert_eq!(encode(ServerFrame::token("Hi")), r#"{"token":"Hi"}"#);
        assert_eq!(encode(ServerFrame::done()), r#"{"done":true}"#);
        assert_eq!(encode(ServerFrame::error("boom")), r#"{"error":"boom"}"#);
    }

    #[test]
    fn reply_mentions_context_and_history() {
        assert_eq!(
            compose_reply(&envelope(0)),
            "You said: hello. We are talking about coffee carts. This is the start of our conversation."
        );
        assert!(compose_reply(&envelope(4)).ends_with("I remember 4 earlier messages."));
    }

    #[test]
    fn tokens_reassemble_reply() {
        let reply = compose_reply(&envelope(2));
        assert_eq!(tokenize(&reply).collect::<String>(), reply);
        assert!(tokenize(&reply).count() > 1);
    }
}
