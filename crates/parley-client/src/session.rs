//! Chat session: the boundary handed to a presentation layer.

use crate::supervisor::SupervisorEvent;
use crate::transport::{Connector, WsConnector};
use crate::{ClientConfig, Supervisor};
use parley_core::{
    ConnectionStatus, ConversationContext, CoreError, ProtocolEvent, Role, Transcript, decode,
};
use tokio::sync::{mpsc, watch};

/// Why a message was not sent.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("message is empty")]
    Empty,
    #[error("wait for the current response to finish")]
    ResponseInFlight,
    #[error("not connected")]
    Disconnected,
    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Error text recorded when the connection drops before a reply finished.
pub const CONNECTION_LOST: &str = "connection lost";

impl From<CoreError> for SendError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::ResponseInFlight => Self::ResponseInFlight,
        }
    }
}

/// A supervised connection plus the transcript built from it.
///
/// The session is the only writer of the transcript. Readers either borrow it
/// through [`transcript`](Self::transcript) or watch
/// [`subscribe_transcript`](Self::subscribe_transcript).
pub struct ChatSession {
    supervisor: Supervisor,
    events: mpsc::UnboundedReceiver<SupervisorEvent>,
    transcript: Transcript,
    published: watch::Sender<Transcript>,
    context: ConversationContext,
}

impl ChatSession {
    /// Connect to `config.url` over WebSocket.
    pub fn connect(config: &ClientConfig) -> Self {
        Self::with_connector(WsConnector, config)
    }

    /// Connect using a custom transport.
    pub fn with_connector<C: Connector>(connector: C, config: &ClientConfig) -> Self {
        let (supervisor, events) =
            Supervisor::spawn(connector, config.url.clone(), config.reconnect);
        supervisor.connect();
        let (published, _) = watch::channel(Transcript::new());
        Self {
            supervisor,
            events,
            transcript: Transcript::new(),
            published,
            context: config.context.clone(),
        }
    }

    /// Send a user message.
    ///
    /// The prior transcript goes out as history; the user turn is only
    /// recorded once the supervisor accepted the payload.
    pub fn send(&mut self, text: &str) -> Result<(), SendError> {
        if text.trim().is_empty() {
            return Err(SendError::Empty);
        }
        if self.transcript.is_streaming() {
            return Err(SendError::ResponseInFlight);
        }

        let envelope = self.transcript.to_outbound_envelope(text, &self.context);
        let payload = serde_json::to_string(&envelope)?;
        if !self.supervisor.send(payload) {
            return Err(SendError::Disconnected);
        }

        self.transcript.append_user_turn(text)?;
        self.publish();
        Ok(())
    }

    /// Wait for the next recognized event and fold it into the transcript.
    ///
    /// Unrecognized frames are skipped. A dropped connection ends any reply
    /// still owed with an `Error` event, since the backend never resumes it.
    /// Returns `None` once the supervisor has stopped.
    pub async fn next_event(&mut self) -> Option<ProtocolEvent> {
        loop {
            let event = match self.events.recv().await? {
                SupervisorEvent::Frame(frame) => decode(&frame),
                SupervisorEvent::ConnectionLost if self.awaiting_reply() => {
                    tracing::info!("connection dropped before the reply finished");
                    Some(ProtocolEvent::Error(CONNECTION_LOST.to_string()))
                }
                SupervisorEvent::ConnectionLost => None,
            };
            if let Some(event) = event {
                self.transcript.apply(event.clone());
                self.publish();
                return Some(event);
            }
        }
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn is_streaming(&self) -> bool {
        self.transcript.is_streaming()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.supervisor.status()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.supervisor.subscribe()
    }

    pub fn subscribe_transcript(&self) -> watch::Receiver<Transcript> {
        self.published.subscribe()
    }

    pub fn context(&self) -> &ConversationContext {
        &self.context
    }

    /// Replace the context sent with subsequent messages.
    pub fn set_context(&mut self, context: ConversationContext) {
        self.context = context;
    }

    /// Manual reconnect, resetting the retry budget.
    pub fn reconnect(&self) {
        self.supervisor.reconnect();
    }

    /// Close the connection and stop the supervisor.
    pub async fn close(self) {
        self.supervisor.close().await;
    }

    // A user turn at the tail has not been answered yet.
    fn awaiting_reply(&self) -> bool {
        self.transcript
            .last()
            .is_some_and(|turn| turn.role == Role::User || !turn.complete)
    }

    fn publish(&self) {
        self.published.send_replace(self.transcript.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockConnector, MockHandle, MockServer};
    use parley_core::{OutboundEnvelope, Turn};

    fn config() -> ClientConfig {
        let mut config = ClientConfig::default();
        config.context.title = "Coffee carts".into();
        config.context.abstract_text = "Espresso at festivals".into();
        config
    }

    async fn connected() -> (ChatSession, MockHandle, MockServer) {
        let (connector, mut handle) = MockConnector::new();
        handle.accept_next();
        let session = ChatSession::with_connector(connector, &config());
        let server = handle.server().await;
        session
            .subscribe_status()
            .wait_for(|s| s.connected)
            .await
            .unwrap();
        (session, handle, server)
    }

    async fn envelope(server: &mut MockServer) -> OutboundEnvelope {
        let payload = server.recv().await.unwrap();
        serde_json::from_str(&payload).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn send_while_disconnected_leaves_transcript() {
        let (connector, _handle) = MockConnector::new();
        let mut session = ChatSession::with_connector(connector, &config());

        assert!(matches!(session.send("Hello"), Err(SendError::Disconnected)));
        assert!(session.transcript().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn streams_reply_into_transcript() {
        let (mut session, _handle, mut server) = connected().await;

        session.send("Hello").unwrap();
        let sent = envelope(&mut server).await;
        assert_eq!(sent.user_input, "Hello");
        assert_eq!(sent.title_context, "Coffee carts");
        assert_eq!(sent.abstract_context, "Espresso at festivals");
        assert!(sent.conversation_history.is_empty());
        assert_eq!(session.transcript().turns(), &[Turn::user("Hello")]);

        server.text(r#"{"token":"Hi"}"#);
        server.text(r#"{"token":" there"}"#);
        server.text(r#"{"done":true}"#);

        assert_eq!(
            session.next_event().await,
            Some(ProtocolEvent::Token("Hi".into()))
        );
        assert!(session.is_streaming());
        session.next_event().await;
        assert_eq!(session.next_event().await, Some(ProtocolEvent::Done));

        assert_eq!(session.transcript().last(), Some(&Turn::assistant("Hi there")));
        assert!(!session.is_streaming());

        session.send("Tell me more").unwrap();
        let sent = envelope(&mut server).await;
        let roles: Vec<Role> = sent.conversation_history.iter().map(|h| h.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant]);
        assert_eq!(sent.conversation_history[1].content, "Hi there");
    }

    #[tokio::test(start_paused = true)]
    async fn rejects_send_while_streaming() {
        let (mut session, _handle, mut server) = connected().await;
        session.send("Hello").unwrap();
        envelope(&mut server).await;

        server.text(r#"{"token":"Hi"}"#);
        session.next_event().await;

        assert!(matches!(
            session.send("again"),
            Err(SendError::ResponseInFlight)
        ));
        assert!(matches!(session.send("   "), Err(SendError::Empty)));
        assert_eq!(session.transcript().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn backend_error_ends_stream() {
        let (mut session, _handle, mut server) = connected().await;
        session.send("Hello").unwrap();
        envelope(&mut server).await;

        server.text(r#"{"token":"Hal"}"#);
        server.text(r#"{"error":"backend crashed"}"#);
        server.text(r#"{"done":true}"#);
        session.next_event().await;
        assert_eq!(
            session.next_event().await,
            Some(ProtocolEvent::Error("backend crashed".into()))
        );

        let settled = session.transcript().clone();
        assert_eq!(
            settled.last(),
            Some(&Turn::assistant("Error: backend crashed"))
        );
        assert!(!session.is_streaming());

        assert_eq!(session.next_event().await, Some(ProtocolEvent::Done));
        assert_eq!(session.transcript(), &settled);
    }

    #[tokio::test(start_paused = true)]
    async fn skips_unrecognized_frames() {
        let (mut session, _handle, server) = connected().await;

        server.text("plain text");
        server.text(r#"{"typing":true}"#);
        server.text(r#"{"token":"x"}"#);

        assert_eq!(
            session.next_event().await,
            Some(ProtocolEvent::Token("x".into()))
        );
        assert_eq!(session.transcript().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn publishes_transcript_updates() {
        let (mut session, _handle, mut server) = connected().await;
        let mut updates = session.subscribe_transcript();

        session.send("Hello").unwrap();
        envelope(&mut server).await;
        assert!(updates.has_changed().unwrap());
        assert_eq!(updates.borrow_and_update().len(), 1);

        server.text(r#"{"token":"Hi"}"#);
        session.next_event().await;
        assert_eq!(
            updates.borrow_and_update().last(),
            Some(&Turn::streaming("Hi"))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn drop_mid_reply_reopens_send() {
        let (connector, mut handle) = MockConnector::new();
        handle.accept_next();
        handle.accept_next();
        let mut session = ChatSession::with_connector(connector, &config());
        let mut status = session.subscribe_status();
        let mut server = handle.server().await;
        status.wait_for(|s| s.connected).await.unwrap();

        session.send("Hello").unwrap();
        envelope(&mut server).await;
        server.text(r#"{"token":"Hal"}"#);
        session.next_event().await;
        assert!(session.is_streaming());

        drop(server);
        assert_eq!(
            session.next_event().await,
            Some(ProtocolEvent::Error(CONNECTION_LOST.into()))
        );
        assert!(!session.is_streaming());
        assert_eq!(
            session.transcript().last(),
            Some(&Turn::assistant("Error: connection lost"))
        );

        let mut server = handle.server().await;
        status.wait_for(|s| s.connected).await.unwrap();
        session.send("Hello again").unwrap();
        let sent = envelope(&mut server).await;
        assert_eq!(sent.user_input, "Hello again");
        assert_eq!(sent.conversation_history.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn drop_before_first_token_answers_with_error() {
        let (mut session, _handle, mut server) = connected().await;
        session.send("Hello").unwrap();
        envelope(&mut server).await;

        server.close(false, None);
        assert_eq!(
            session.next_event().await,
            Some(ProtocolEvent::Error(CONNECTION_LOST.into()))
        );
        let roles: Vec<Role> = session.transcript().turns().iter().map(|t| t.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant]);
    }

    #[tokio::test(start_paused = true)]
    async fn send_racing_a_drop_is_answered() {
        let (mut session, _handle, server) = connected().await;

        // The supervisor has not seen the drop yet, so the send is accepted.
        drop(server);
        session.send("Hello").unwrap();

        assert_eq!(
            session.next_event().await,
            Some(ProtocolEvent::Error(CONNECTION_LOST.into()))
        );
        assert_eq!(
            session.transcript().last(),
            Some(&Turn::assistant("Error: connection lost"))
        );
        assert!(!session.status().connected);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_drop_leaves_transcript() {
        let (mut session, mut handle, server) = connected().await;
        handle.accept_next();

        drop(server);
        let server = handle.server().await;
        server.text(r#"{"token":"x"}"#);

        assert_eq!(
            session.next_event().await,
            Some(ProtocolEvent::Token("x".into()))
        );
        assert_eq!(session.transcript().turns(), &[Turn::streaming("x")]);
    }
}
