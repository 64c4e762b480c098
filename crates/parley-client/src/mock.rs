//! In-memory connector for driving the supervisor in tests.

use crate::ClientError;
use crate::transport::{CloseInfo, Connector, Transport, TransportEvent};
use futures_util::future::{self, BoxFuture};
use futures_util::{sink, stream};
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite;

enum Outcome {
    Accept,
    Refuse,
}

#[derive(Default)]
struct Script {
    outcomes: VecDeque<Outcome>,
    attempts: Vec<Instant>,
}

/// Connector whose attempts follow a script. Unscripted attempts are refused.
pub(crate) struct MockConnector {
    script: Arc<Mutex<Script>>,
    servers: mpsc::UnboundedSender<MockServer>,
}

/// Test-side controls for a [`MockConnector`].
pub(crate) struct MockHandle {
    script: Arc<Mutex<Script>>,
    servers: mpsc::UnboundedReceiver<MockServer>,
}

/// The far end of an accepted connection.
pub(crate) struct MockServer {
    from_client: mpsc::UnboundedReceiver<String>,
    to_client: mpsc::UnboundedSender<Result<TransportEvent, ClientError>>,
}

impl MockConnector {
    pub(crate) fn new() -> (Self, MockHandle) {
        let script = Arc::new(Mutex::new(Script::default()));
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Self {
            script: script.clone(),
            servers: tx,
        };
        let handle = MockHandle {
            script,
            servers: rx,
        };
        (connector, handle)
    }
}

impl Connector for MockConnector {
    fn connect(&self, _url: &str) -> BoxFuture<'static, Result<Transport, ClientError>> {
        let outcome = {
            let mut script = self.script.lock().unwrap();
            script.attempts.push(Instant::now());
            script.outcomes.pop_front().unwrap_or(Outcome::Refuse)
        };

        match outcome {
            Outcome::Refuse => {
                let e = io::Error::from(io::ErrorKind::ConnectionRefused);
                let err = ClientError::from(tungstenite::Error::Io(e));
                Box::pin(future::ready(Err::<Transport, _>(err)))
            }
            Outcome::Accept => {
                let (out_tx, out_rx) = mpsc::unbounded_channel::<String>();
                let (in_tx, in_rx) = mpsc::unbounded_channel();
                let _ = self.servers.send(MockServer {
                    from_client: out_rx,
                    to_client: in_tx,
                });

                let sink = sink::unfold(out_tx, |tx, text: String| async move {
                    tx.send(text).map_err(|_| ClientError::ConnectionClosed)?;
                    Ok::<_, ClientError>(tx)
                });
                let events = stream::unfold(in_rx, |mut rx| async move {
                    rx.recv().await.map(|event| (event, rx))
                });
                let transport = Transport {
                    sink: Box::pin(sink),
                    events: Box::pin(events),
                };
                Box::pin(future::ready(Ok::<_, ClientError>(transport)))
            }
        }
    }
}

impl MockHandle {
    pub(crate) fn accept_next(&self) {
        self.script.lock().unwrap().outcomes.push_back(Outcome::Accept);
    }

    pub(crate) fn refuse_next(&self) {
        self.script.lock().unwrap().outcomes.push_back(Outcome::Refuse);
    }

    /// When each connection attempt was made.
    pub(crate) fn attempts(&self) -> Vec<Instant> {
        self.script.lock().unwrap().attempts.clone()
    }

    /// Wait for the next accepted connection.
    pub(crate) async fn server(&mut self) -> MockServer {
        self.servers.recv().await.unwrap()
    }
}

impl MockServer {
    pub(crate) fn text(&self, payload: &str) {
        let _ = self
            .to_client
            .send(Ok(TransportEvent::Text(payload.to_string())));
    }

    pub(crate) fn binary(&self, payload: &[u8]) {
        let _ = self
            .to_client
            .send(Ok(TransportEvent::Binary(payload.to_vec())));
    }

    pub(crate) fn close(&self, clean: bool, reason: Option<&str>) {
        let _ = self.to_client.send(Ok(TransportEvent::Closed(CloseInfo {
            clean,
            reason: reason.map(str::to_string),
        })));
    }

    /// Next payload the client sent, or `None` once the client closed.
    pub(crate) async fn recv(&mut self) -> Option<String> {
        self.from_client.recv().await
    }
}
