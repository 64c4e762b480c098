//! Client-side implementation of the Parley protocol.
//!
//! [`Supervisor`] keeps one WebSocket connection alive with capped exponential
//! backoff and forwards raw frames. [`ChatSession`] folds those frames into a
//! [`Transcript`](parley_core::Transcript) and gates outbound messages.

mod backoff;
mod config;
mod error;
mod session;
mod supervisor;
mod transport;

#[cfg(test)]
mod mock;

pub use backoff::{ReconnectPolicy, ReconnectState};
pub use config::{ClientConfig, ConfigError};
pub use error::ClientError;
pub use session::{CONNECTION_LOST, ChatSession, SendError};
pub use supervisor::{Supervisor, SupervisorEvent};
pub use transport::{
    CloseInfo, Connector, EventStream, FrameSink, Transport, TransportEvent, WsConnector,
};
