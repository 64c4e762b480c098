//! Core types for Parley.
//!
//! This crate provides the protocol primitives and the transcript fold. It does
//! no I/O; the client crate owns the connection and feeds frames in here.

mod message;
mod transcript;

pub use message::{HistoryEntry, InboundFrame, OutboundEnvelope, ProtocolEvent, decode};
pub use transcript::{ConversationContext, CoreError, Role, Transcript, Turn, error_text};

use serde::{Deserialize, Serialize};

/// Connection lifecycle state as seen by consumers.
///
/// Only the supervisor writes this; everything else reads the latest value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    /// A transport is open and frames can be sent.
    pub connected: bool,
    /// A connection attempt is in flight.
    pub connecting: bool,
    /// Most recent failure, or the terminal message once retries are exhausted.
    pub last_error: Option<String>,
    /// Automatic reconnect attempts made since the last successful connection.
    pub attempts: u32,
}

impl ConnectionStatus {
    /// Neither connected nor connecting.
    pub fn is_disconnected(&self) -> bool {
        !self.connected && !self.connecting
    }
}
