//! Echo backend server implementation.

use crate::protocol::{ServerFrame, compose_reply, tokenize};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use parley_core::OutboundEnvelope;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;

pub async fn run(addr: SocketAddr, delay: Duration) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Listening on ws://{}", addr);

    loop {
        let (stream, client_addr) = listener.accept().await?;

        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, client_addr, delay).await {
                tracing::warn!("Connection error from {}: {}", client_addr, e);
            }
        });
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    delay: Duration,
) -> anyhow::Result<()> {
    let ws = tokio_tungstenite::accept_async(stream).await?;
    let (mut sink, mut stream) = ws.split();

    tracing::info!("Client connected: {}", addr);

    while let Some(msg) = stream.next().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(e) => {
                tracing::debug!("WebSocket error: {}", e);
                break;
            }
        };

        let text = match msg {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };

        let envelope: OutboundEnvelope = match serde_json::from_str(text.as_str()) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!("Invalid message: {}", e);
                send(&mut sink, &ServerFrame::error(e.to_string())).await?;
                send(&mut sink, &ServerFrame::done()).await?;
                continue;
            }
        };

        tracing::info!(
            history = envelope.conversation_history.len(),
            "Message from {}",
            addr
        );
        stream_reply(&mut sink, &envelope, delay).await?;
    }

    tracing::info!("Client disconnected: {}", addr);
    Ok(())
}

async fn stream_reply(
    sink: &mut WsSink,
    envelope: &OutboundEnvelope,
    delay: Duration,
) -> anyhow::Result<()> {
    let failing = envelope.user_input.trim_start().starts_with("!fail");
    let reply = compose_reply(envelope);

    for (i, chunk) in tokenize(&reply).enumerate() {
        if failing && i == 3 {
            tracing::info!("Simulating backend failure");
            send(sink, &ServerFrame::error("simulated backend failure")).await?;
            break;
        }
        send(sink, &ServerFrame::token(chunk)).await?;
        tokio::time::sleep(delay).await;
    }

    send(sink, &ServerFrame::done()).await
}

async fn send(sink: &mut WsSink, frame: &ServerFrame) -> anyhow::Result<()> {
    sink.send(Message::Text(serde_json::to_string(frame)?.into()))
        .await?;
    Ok(())
}
