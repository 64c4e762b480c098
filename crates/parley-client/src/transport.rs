//! The transport seam between the supervisor and the network.

use crate::ClientError;
use futures_util::future::{self, BoxFuture};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::pin::Pin;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

/// Outgoing half of a transport.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = ClientError> + Send>>;

/// Incoming half of a transport. Ends when the connection is gone.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<TransportEvent, ClientError>> + Send>>;

/// Something the transport delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A text payload.
    Text(String),
    /// A binary payload, untouched.
    Binary(Vec<u8>),
    /// The peer closed the connection.
    Closed(CloseInfo),
}

/// Details of a peer-initiated close.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    /// The peer closed with a normal status.
    pub clean: bool,
    pub reason: Option<String>,
}

/// An open connection.
pub struct Transport {
    pub sink: FrameSink,
    pub events: EventStream,
}

/// Opens transports. The supervisor calls this once per connection attempt.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self, url: &str) -> BoxFuture<'static, Result<Transport, ClientError>>;
}

/// WebSocket connector backed by tokio-tungstenite.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl Connector for WsConnector {
    fn connect(&self, url: &str) -> BoxFuture<'static, Result<Transport, ClientError>> {
        let url = url.to_string();
        Box::pin(async move {
            let (ws, _) = tokio_tungstenite::connect_async(url).await?;
            let (sink, stream) = ws.split();

            let sink = sink.with(|text: String| {
                future::ready(Ok::<_, ClientError>(Message::Text(text.into())))
            });
            let events = stream.filter_map(|msg| future::ready(translate(msg)));

            Ok(Transport {
                sink: Box::pin(sink),
                events: Box::pin(events),
            })
        })
    }
}

fn translate(
    msg: Result<Message, tokio_tungstenite::tungstenite::Error>,
) -> Option<Result<TransportEvent, ClientError>> {
    match msg {
        Ok(Message::Text(text)) => Some(Ok(TransportEvent::Text(text.as_str().to_owned()))),
        Ok(Message::Binary(data)) => Some(Ok(TransportEvent::Binary(data.to_vec()))),
        Ok(Message::Close(frame)) => {
            let info = match frame {
                Some(frame) => CloseInfo {
                    clean: frame.code == CloseCode::Normal,
                    reason: Some(frame.reason.as_str())
                        .filter(|r| !r.is_empty())
                        .map(str::to_owned),
                },
                None => CloseInfo {
                    clean: true,
                    reason: None,
                },
            };
            Some(Ok(TransportEvent::Closed(info)))
        }
        // tungstenite answers pings itself.
        Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => None,
        Err(e) => Some(Err(e.into())),
    }
}
