//! Connection supervisor.
//!
//! A single task owns the transport, the reconnect counter and the retry
//! timer. The [`Supervisor`] handle talks to it over a command channel and
//! reads its state from a watch channel, so every call returns immediately.
//! Inbound frames and connection losses share one ordered channel.

use crate::transport::{Connector, Transport, TransportEvent};
use crate::{ClientError, ReconnectPolicy, ReconnectState};
use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use parley_core::{ConnectionStatus, InboundFrame};
use std::future::pending;
use std::pin::Pin;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Sleep;

/// Something the supervisor reports, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum SupervisorEvent {
    /// A payload from the live transport.
    Frame(InboundFrame),
    /// The live transport went away. Nothing more arrives from it, so a reply
    /// in progress will never finish.
    ConnectionLost,
}

#[derive(Debug)]
enum Command {
    Connect,
    Reconnect,
    Send(String),
    Close,
}

/// Handle to a running connection supervisor.
///
/// Dropping the handle tears the connection down.
pub struct Supervisor {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<ConnectionStatus>,
    task: Option<JoinHandle<()>>,
}

impl Supervisor {
    /// Start a supervisor for `url`. Nothing is opened until [`connect`](Self::connect).
    ///
    /// Returns the handle and the receiver for inbound events.
    pub fn spawn<C: Connector>(
        connector: C,
        url: impl Into<String>,
        policy: ReconnectPolicy,
    ) -> (Self, mpsc::UnboundedReceiver<SupervisorEvent>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::default());

        let actor = Actor {
            connector,
            url: url.into(),
            backoff: ReconnectState::new(policy),
            status: status_tx,
            events: frame_tx,
            opening: None,
            live: None,
            retry: None,
        };
        let task = tokio::spawn(actor.run(command_rx));

        let supervisor = Self {
            commands: command_tx,
            status: status_rx,
            task: Some(task),
        };
        (supervisor, frame_rx)
    }

    /// Open a fresh connection, closing the current one first.
    pub fn connect(&self) {
        self.command(Command::Connect);
    }

    /// Reset the attempt counter and connect. Use after retries are exhausted.
    pub fn reconnect(&self) {
        self.command(Command::Reconnect);
    }

    /// Transmit `payload` if connected. Returns false without queueing otherwise.
    ///
    /// `true` means the payload was accepted while connected. If the
    /// connection drops before it is written, the payload is lost and a
    /// [`SupervisorEvent::ConnectionLost`] follows on the event channel.
    pub fn send(&self, payload: impl Into<String>) -> bool {
        if !self.status.borrow().connected {
            tracing::debug!("not connected; dropping outbound message");
            return false;
        }
        self.commands.send(Command::Send(payload.into())).is_ok()
    }

    /// Latest connection status.
    pub fn status(&self) -> ConnectionStatus {
        self.status.borrow().clone()
    }

    /// Receiver that is notified on every status change.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    /// Tear down and wait for the supervisor task to finish.
    pub async fn close(mut self) {
        self.command(Command::Close);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "supervisor task failed");
            }
        }
    }

    fn command(&self, command: Command) {
        if self.commands.send(command).is_err() {
            tracing::debug!("supervisor already stopped");
        }
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Close);
    }
}

struct Actor<C> {
    connector: C,
    url: String,
    backoff: ReconnectState,
    status: watch::Sender<ConnectionStatus>,
    events: mpsc::UnboundedSender<SupervisorEvent>,
    opening: Option<BoxFuture<'static, Result<Transport, ClientError>>>,
    live: Option<Transport>,
    retry: Option<Pin<Box<Sleep>>>,
}

impl<C: Connector> Actor<C> {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Connect) => self.connect(),
                    Some(Command::Reconnect) => self.reconnect(),
                    Some(Command::Send(payload)) => self.transmit(payload).await,
                    Some(Command::Close) | None => break,
                },
                result = opened(&mut self.opening) => self.on_opened(result),
                event = next_event(&mut self.live) => self.on_event(event),
                () = elapsed(&mut self.retry) => {
                    self.retry = None;
                    tracing::debug!(attempt = self.backoff.attempts(), "reconnect timer fired");
                    self.connect();
                }
            }
        }
        self.teardown();
    }

    fn connect(&mut self) {
        self.retry = None;
        if self.opening.take().is_some() {
            tracing::debug!("superseding in-flight connection attempt");
        }
        // Once taken, the old transport's close never reaches on_event.
        let superseded = self.live.take();

        tracing::info!(url = %self.url, "connecting");
        self.opening = Some(self.connector.connect(&self.url));
        let attempts = self.backoff.attempts();
        self.status.send_modify(|s| {
            s.connected = false;
            s.connecting = true;
            s.attempts = attempts;
        });

        if let Some(old) = superseded {
            tracing::debug!("closed current connection before reconnecting");
            close_quietly(old);
            self.emit(SupervisorEvent::ConnectionLost);
        }
    }

    fn reconnect(&mut self) {
        tracing::info!("manual reconnect requested");
        self.backoff.reset();
        self.connect();
    }

    fn on_opened(&mut self, result: Result<Transport, ClientError>) {
        self.opening = None;
        match result {
            Ok(transport) => {
                tracing::info!(url = %self.url, "connected");
                self.backoff.reset();
                self.retry = None;
                self.live = Some(transport);
                self.status.send_replace(ConnectionStatus {
                    connected: true,
                    connecting: false,
                    last_error: None,
                    attempts: 0,
                });
            }
            Err(e) => {
                tracing::warn!(url = %self.url, error = %e, "connection attempt failed");
                self.status.send_modify(|s| {
                    s.connected = false;
                    s.connecting = false;
                    s.last_error = Some(format!("Connection failed: {e}"));
                });
                self.schedule_retry();
            }
        }
    }

    fn on_event(&mut self, event: Option<Result<TransportEvent, ClientError>>) {
        match event {
            Some(Ok(TransportEvent::Text(payload))) => {
                self.emit(SupervisorEvent::Frame(InboundFrame::parse(&payload)));
            }
            Some(Ok(TransportEvent::Binary(data))) => {
                self.emit(SupervisorEvent::Frame(InboundFrame::from_bytes(data)));
            }
            Some(Ok(TransportEvent::Closed(close))) => {
                let message = match (close.clean, close.reason) {
                    (true, None) => None,
                    (true, Some(reason)) => Some(format!("Disconnected: {reason}")),
                    (false, Some(reason)) => Some(format!("Connection lost: {reason}")),
                    (false, None) => Some("Connection lost unexpectedly".to_string()),
                };
                tracing::info!(clean = close.clean, "server closed the connection");
                self.on_dropped(message);
            }
            Some(Err(e)) => {
                tracing::warn!(error = %e, "transport error");
                self.on_dropped(Some(format!("Connection lost: {e}")));
            }
            None => {
                tracing::warn!("connection ended without a close frame");
                self.on_dropped(Some("Connection lost unexpectedly".to_string()));
            }
        }
    }

    fn on_dropped(&mut self, message: Option<String>) {
        self.live = None;
        self.status.send_modify(|s| {
            s.connected = false;
            s.connecting = false;
            s.last_error = message;
        });
        self.emit(SupervisorEvent::ConnectionLost);
        self.schedule_retry();
    }

    // Status is always updated before a loss is emitted, so a consumer that has
    // seen the loss also sees the disconnected status.
    fn emit(&self, event: SupervisorEvent) {
        if self.events.send(event).is_err() {
            tracing::debug!("event receiver dropped");
        }
    }

    fn schedule_retry(&mut self) {
        match self.backoff.schedule_if_eligible() {
            Some(delay) => {
                let attempts = self.backoff.attempts();
                tracing::info!(
                    attempt = attempts,
                    delay_ms = delay.as_millis() as u64,
                    "scheduling reconnect"
                );
                self.retry = Some(Box::pin(tokio::time::sleep(delay)));
                self.status.send_modify(|s| s.attempts = attempts);
            }
            None => {
                let max = self.backoff.policy().max_attempts;
                tracing::warn!(attempts = max, "giving up on automatic reconnection");
                self.status.send_modify(|s| {
                    s.last_error = Some(format!(
                        "Unable to reconnect after {max} attempts. Reconnect manually or restart the client."
                    ));
                });
            }
        }
    }

    async fn transmit(&mut self, payload: String) {
        let Some(live) = self.live.as_mut() else {
            // The loss that cleared `live` was already emitted.
            tracing::warn!("connection went away before send; message dropped");
            return;
        };
        let result = live.sink.send(payload).await;
        if let Err(e) = result {
            tracing::warn!(error = %e, "send failed");
            self.on_dropped(Some(format!("Connection lost: {e}")));
        }
    }

    fn teardown(&mut self) {
        self.retry = None;
        self.opening = None;
        if let Some(live) = self.live.take() {
            close_quietly(live);
        }
        tracing::debug!("supervisor stopped");
    }
}

fn close_quietly(transport: Transport) {
    let Transport { mut sink, events } = transport;
    drop(events);
    tokio::spawn(async move {
        if let Err(e) = sink.close().await {
            tracing::debug!(error = %e, "error while closing transport");
        }
    });
}

async fn opened(
    opening: &mut Option<BoxFuture<'static, Result<Transport, ClientError>>>,
) -> Result<Transport, ClientError> {
    match opening {
        Some(fut) => fut.await,
        None => pending().await,
    }
}

async fn next_event(
    live: &mut Option<Transport>,
) -> Option<Result<TransportEvent, ClientError>> {
    match live {
        Some(transport) => transport.events.next().await,
        None => pending().await,
    }
}

async fn elapsed(retry: &mut Option<Pin<Box<Sleep>>>) {
    match retry {
        Some(sleep) => sleep.as_mut().await,
        None => pending().await,
    }
}
