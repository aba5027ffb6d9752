//! Upstream realtime connection manager.
//!
//! One provider socket per session: `connecting -> open -> closed`, with
//! `closed` terminal. A dropped socket is reported to the client and the
//! session is left for the client (or the disconnect path) to end; there is
//! no automatic reconnection.
//!
//! Each connection runs as one task with an inbound socket stream and one
//! outbound mpsc channel, so ordering and backpressure are explicit. Audio
//! deltas are relayed in arrival order, including trailing deltas after a
//! cancel.

use std::sync::Arc;

use dashmap::DashMap;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{Sink, SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace, warn};

use crate::config::Environment;
use crate::errors::{AppError, AppResult};
use crate::handlers::voice::messages::VoiceEvent;
use crate::session::{ContextManager, MessageRole, UpstreamState};
use crate::tools::ToolRouter;

use super::instructions;
use super::messages::{ClientEvent, ConversationItem, ServerEvent, REALTIME_URL};

/// Outbound channel capacity per connection.
const CHANNEL_CAPACITY: usize = 256;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

struct ConnectionHandle {
    tx: mpsc::Sender<ClientEvent>,
    task: JoinHandle<()>,
}

/// Shared state handed to each connection task.
struct ConnectionContext {
    session_id: String,
    environment: Environment,
    context: Arc<ContextManager>,
    tools: ToolRouter,
    events: mpsc::Sender<VoiceEvent>,
    connections: Arc<DashMap<String, ConnectionHandle>>,
}

/// Manages the live set of per-session provider connections.
pub struct UpstreamClient {
    api_key: String,
    model: String,
    environment: Environment,
    context: Arc<ContextManager>,
    tools: ToolRouter,
    connections: Arc<DashMap<String, ConnectionHandle>>,
}

fn handshake_request(api_key: &str, model: &str) -> AppResult<http::Request<()>> {
    let endpoint = format!("{REALTIME_URL}?model={model}");
    let parsed = url::Url::parse(&endpoint)
        .map_err(|e| AppError::Upstream(format!("Invalid upstream endpoint: {e}")))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| AppError::Upstream("Upstream endpoint has no host".to_string()))?
        .to_string();

    http::Request::builder()
        .uri(&endpoint)
        .header("Authorization", format!("Bearer {api_key}"))
        .header("OpenAI-Beta", "realtime=v1")
        .header("Sec-WebSocket-Protocol", "realtime")
        .header(
            "Sec-WebSocket-Key",
            tungstenite::handshake::client::generate_key(),
        )
        .header("Sec-WebSocket-Version", "13")
        .header("Connection", "Upgrade")
        .header("Upgrade", "websocket")
        .header("Host", host)
        .body(())
        .map_err(|e| AppError::Upstream(e.to_string()))
}

impl UpstreamClient {
    pub fn new(
        api_key: String,
        model: String,
        environment: Environment,
        context: Arc<ContextManager>,
    ) -> Self {
        let tools = ToolRouter::new(context.clone());
        Self {
            api_key,
            model,
            environment,
            context,
            tools,
            connections: Arc::new(DashMap::new()),
        }
    }

    pub fn is_connected(&self, session_id: &str) -> bool {
        self.connections.contains_key(session_id)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Open the provider socket for a session and send its initial
    /// configuration. At most one connection exists per session id; a second
    /// call while one is live is a no-op.
    pub async fn open(
        &self,
        session_id: &str,
        events: mpsc::Sender<VoiceEvent>,
    ) -> AppResult<()> {
        if self.connections.contains_key(session_id) {
            debug!(session_id, "Upstream connection already open");
            return Ok(());
        }
        let snapshot = self
            .context
            .registry()
            .snapshot(session_id)
            .ok_or_else(|| AppError::Session(format!("Unknown session: {session_id}")))?;

        let request = handshake_request(&self.api_key, &self.model)?;
        let (socket, _) = match connect_async(request).await {
            Ok(pair) => pair,
            Err(e) => {
                self.context
                    .registry()
                    .update(session_id, |s| s.upstream_state = UpstreamState::Closed);
                return Err(AppError::Upstream(format!("Upstream connect failed: {e}")));
            }
        };
        info!(session_id, "Upstream connection established");

        let (mut sink, stream) = socket.split();

        // Initial full configuration, before any other traffic
        let config = instructions::session_config(&snapshot);
        if let Err(e) = send_event(&mut sink, &ClientEvent::SessionUpdate { session: config }).await
        {
            self.context
                .registry()
                .update(session_id, |s| s.upstream_state = UpstreamState::Closed);
            return Err(e);
        }

        self.context
            .registry()
            .update(session_id, |s| s.upstream_state = UpstreamState::Open);

        let (tx, rx) = mpsc::channel::<ClientEvent>(CHANNEL_CAPACITY);
        let ctx = ConnectionContext {
            session_id: session_id.to_string(),
            environment: self.environment,
            context: self.context.clone(),
            tools: self.tools.clone(),
            events,
            connections: self.connections.clone(),
        };
        let task = tokio::spawn(run_connection(ctx, sink, stream, rx));
        self.connections
            .insert(session_id.to_string(), ConnectionHandle { tx, task });
        Ok(())
    }

    /// Queue an event toward the provider. Unknown session ids are no-ops.
    pub async fn send(&self, session_id: &str, event: ClientEvent) {
        let tx = self.connections.get(session_id).map(|h| h.tx.clone());
        if let Some(tx) = tx {
            if tx.send(event).await.is_err() {
                warn!(session_id, "Upstream channel closed, dropping event");
            }
        }
    }

    /// Re-send full configuration from current session state. Used after a
    /// persona/language change.
    pub async fn reconfigure(&self, session_id: &str) {
        if let Some(session) = self.context.registry().snapshot(session_id) {
            self.send(
                session_id,
                ClientEvent::SessionUpdate {
                    session: instructions::session_config(&session),
                },
            )
            .await;
        }
    }

    /// Close a session's provider socket and drop it from the live set.
    /// Idempotent; safe for session ids that never connected.
    pub fn close(&self, session_id: &str) {
        if let Some((_, handle)) = self.connections.remove(session_id) {
            handle.task.abort();
            self.context
                .registry()
                .update(session_id, |s| s.upstream_state = UpstreamState::Closed);
            info!(session_id, "Upstream connection closed");
        }
    }
}

async fn send_event<S>(sink: &mut S, event: &ClientEvent) -> AppResult<()>
where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    let json = serde_json::to_string(event)?;
    sink.send(Message::Text(json.into()))
        .await
        .map_err(|e| AppError::Upstream(format!("Upstream send failed: {e}")))
}

async fn run_connection(
    ctx: ConnectionContext,
    mut sink: WsSink,
    mut stream: WsStream,
    mut rx: mpsc::Receiver<ClientEvent>,
) {
    // Greeting fires once per session, a fixed delay after the first
    // configuration ack; later acks must not re-arm it.
    let mut greeted = false;
    let mut greeting_deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            Some(event) = rx.recv() => {
                if let Err(e) = send_event(&mut sink, &event).await {
                    warn!(session_id = %ctx.session_id, error = %e, "Dropping upstream connection");
                    break;
                }
            }

            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let keep_going = handle_provider_frame(
                            &text,
                            &mut sink,
                            &ctx,
                            &mut greeted,
                            &mut greeting_deadline,
                        )
                        .await;
                        if !keep_going {
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sink.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!(session_id = %ctx.session_id, "Upstream socket closed");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(session_id = %ctx.session_id, error = %e, "Upstream socket error");
                        let _ = ctx.events.send(VoiceEvent::Error {
                            message: "Voice service connection lost".to_string(),
                        }).await;
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }

            _ = tokio::time::sleep_until(greeting_deadline.unwrap_or_else(Instant::now)),
                if greeting_deadline.is_some() =>
            {
                greeting_deadline = None;
                if let Some(session) = ctx.context.registry().snapshot(&ctx.session_id) {
                    let greeting = instructions::greeting_instructions(&session);
                    if send_event(&mut sink, &ClientEvent::transient_response(greeting))
                        .await
                        .is_err()
                    {
                        break;
                    }
                    debug!(session_id = %ctx.session_id, "Greeting requested");
                }
            }
        }
    }

    // Socket gone: terminal state, report, drop from the live set.
    ctx.context
        .registry()
        .update(&ctx.session_id, |s| s.upstream_state = UpstreamState::Closed);
    let _ = ctx.events.send(VoiceEvent::SessionClosed).await;
    ctx.connections.remove(&ctx.session_id);
    info!(session_id = %ctx.session_id, "Upstream connection task ended");
}

/// Translate one provider frame. Returns `false` when the connection should
/// be torn down. Generic over the sink so translation is testable without a
/// live socket.
async fn handle_provider_frame<S>(
    text: &str,
    sink: &mut S,
    ctx: &ConnectionContext,
    greeted: &mut bool,
    greeting_deadline: &mut Option<Instant>,
) -> bool
where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    let value: serde_json::Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => {
            warn!(session_id = %ctx.session_id, error = %e, "Malformed upstream frame");
            return true;
        }
    };

    let event: ServerEvent = match serde_json::from_value(value.clone()) {
        Ok(event) => event,
        Err(_) => {
            // Outside the consumed vocabulary: diagnostics passthrough in
            // non-production, dropped otherwise.
            if ctx.environment.is_production() {
                trace!(session_id = %ctx.session_id, "Dropping unrecognized upstream event");
            } else {
                let _ = ctx.events.send(VoiceEvent::DebugEvent { event: value }).await;
            }
            return true;
        }
    };

    match event {
        ServerEvent::SessionUpdated => {
            if !*greeted {
                *greeted = true;
                *greeting_deadline = Some(Instant::now() + instructions::GREETING_DELAY);
            }
        }

        ServerEvent::AudioDelta { delta } => {
            let _ = ctx.events.send(VoiceEvent::AudioDelta { audio: delta }).await;
        }

        ServerEvent::AudioDone => {
            let _ = ctx.events.send(VoiceEvent::AudioDone).await;
        }

        ServerEvent::TranscriptDelta { delta } => {
            let _ = ctx
                .events
                .send(VoiceEvent::TranscriptDelta {
                    role: MessageRole::Assistant.as_str().to_string(),
                    delta,
                })
                .await;
        }

        ServerEvent::TranscriptDone { transcript } => {
            ctx.context
                .append_message(&ctx.session_id, MessageRole::Assistant, &transcript)
                .await;
            let _ = ctx
                .events
                .send(VoiceEvent::TranscriptDone {
                    role: MessageRole::Assistant.as_str().to_string(),
                    transcript,
                })
                .await;
        }

        ServerEvent::UserTranscriptCompleted { transcript } => {
            ctx.context
                .append_message(&ctx.session_id, MessageRole::User, &transcript)
                .await;
            let _ = ctx
                .events
                .send(VoiceEvent::UserTranscript {
                    role: MessageRole::User.as_str().to_string(),
                    transcript,
                })
                .await;
        }

        ServerEvent::SpeechStarted => {
            let _ = ctx.events.send(VoiceEvent::SpeechStarted).await;
        }

        ServerEvent::SpeechStopped => {
            let _ = ctx.events.send(VoiceEvent::SpeechStopped).await;
        }

        ServerEvent::FunctionCallDone {
            call_id,
            name,
            arguments,
        } => {
            let outcome = ctx.tools.dispatch(&ctx.session_id, &name, &arguments).await;

            // Language switches reconfigure the session before the model
            // resumes, so the re-greeting already speaks the new language.
            if let Some((language, persona)) = outcome.language_changed {
                if let Some(session) = ctx.context.registry().snapshot(&ctx.session_id) {
                    let update = ClientEvent::SessionUpdate {
                        session: instructions::session_config(&session),
                    };
                    if send_event(sink, &update).await.is_err() {
                        return false;
                    }
                }
                let _ = ctx
                    .events
                    .send(VoiceEvent::LanguageUpdated {
                        language,
                        agent_name: persona.name,
                    })
                    .await;
            }

            let item = ConversationItem::function_output(&call_id, outcome.result.to_string());
            if send_event(sink, &ClientEvent::ItemCreate { item }).await.is_err() {
                return false;
            }
            if send_event(sink, &ClientEvent::ResponseCreate { response: None })
                .await
                .is_err()
            {
                return false;
            }
        }

        ServerEvent::ResponseDone { response } => {
            let _ = ctx.events.send(VoiceEvent::ResponseDone { response }).await;
        }

        ServerEvent::Error { error } => {
            warn!(
                session_id = %ctx.session_id,
                kind = %error.kind,
                "Upstream error: {}",
                error.message
            );
            let _ = ctx
                .events
                .send(VoiceEvent::Error {
                    message: error.message,
                })
                .await;
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionRegistry;
    use crate::store::{MemoryProfileStore, ProfileStore};
    use crate::summary::NoopSummarizer;

    fn client() -> UpstreamClient {
        let registry = Arc::new(SessionRegistry::new());
        let store = Arc::new(MemoryProfileStore::with_default_agents());
        let context = Arc::new(ContextManager::new(
            registry,
            store as Arc<dyn ProfileStore>,
            Arc::new(NoopSummarizer),
        ));
        UpstreamClient::new(
            "test-key".to_string(),
            "gpt-4o-realtime-preview".to_string(),
            Environment::Development,
            context,
        )
    }

    #[test]
    fn test_handshake_request_headers() {
        let request = handshake_request("sk-test", "gpt-4o-realtime-preview").unwrap();
        assert!(request.uri().to_string().contains("model=gpt-4o-realtime-preview"));
        assert_eq!(
            request.headers().get("Authorization").unwrap(),
            "Bearer sk-test"
        );
        assert_eq!(request.headers().get("OpenAI-Beta").unwrap(), "realtime=v1");
        assert_eq!(request.headers().get("Host").unwrap(), "api.openai.com");
    }

    #[tokio::test]
    async fn test_open_unknown_session_fails() {
        let client = client();
        let (tx, _rx) = mpsc::channel(8);
        let result = client.open("missing", tx).await;
        assert!(matches!(result, Err(AppError::Session(_))));
        assert_eq!(client.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let client = client();
        client.close("never-connected");
        client.close("never-connected");
        assert!(!client.is_connected("never-connected"));
    }

    #[tokio::test]
    async fn test_send_to_unknown_session_is_a_noop() {
        let client = client();
        client.send("missing", ClientEvent::AudioCommit).await;
        client.reconfigure("missing").await;
    }

    /// Sink that records sent frames instead of writing to a socket.
    #[derive(Default)]
    struct RecordingSink {
        sent: Vec<Message>,
    }

    impl Sink<Message> for RecordingSink {
        type Error = std::convert::Infallible;

        fn poll_ready(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<Result<(), Self::Error>> {
            std::task::Poll::Ready(Ok(()))
        }

        fn start_send(self: std::pin::Pin<&mut Self>, item: Message) -> Result<(), Self::Error> {
            self.get_mut().sent.push(item);
            Ok(())
        }

        fn poll_flush(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<Result<(), Self::Error>> {
            std::task::Poll::Ready(Ok(()))
        }

        fn poll_close(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<Result<(), Self::Error>> {
            std::task::Poll::Ready(Ok(()))
        }
    }

    async fn connection_ctx() -> (ConnectionContext, mpsc::Receiver<VoiceEvent>, String) {
        let registry = Arc::new(SessionRegistry::new());
        let store = Arc::new(MemoryProfileStore::with_default_agents());
        let context = Arc::new(ContextManager::new(
            registry,
            store as Arc<dyn ProfileStore>,
            Arc::new(NoopSummarizer),
        ));
        let session = context.create_session("conn-1", "en").await.unwrap();
        let (events, rx) = mpsc::channel(32);
        let session_id = session.id.clone();
        let ctx = ConnectionContext {
            session_id: session.id,
            environment: Environment::Development,
            context: context.clone(),
            tools: ToolRouter::new(context),
            events,
            connections: Arc::new(DashMap::new()),
        };
        (ctx, rx, session_id)
    }

    #[tokio::test]
    async fn test_greeting_armed_once_across_repeated_acks() {
        let (ctx, _rx, _) = connection_ctx().await;
        let mut sink = RecordingSink::default();
        let mut greeted = false;
        let mut deadline: Option<Instant> = None;

        let ack = r#"{"type":"session.updated","session":{}}"#;
        assert!(
            handle_provider_frame(ack, &mut sink, &ctx, &mut greeted, &mut deadline).await
        );
        assert!(greeted);
        assert!(deadline.is_some());

        // Once the greeting has fired the deadline is cleared; further acks
        // (every reconfiguration produces one) must not re-arm it
        deadline = None;
        assert!(
            handle_provider_frame(ack, &mut sink, &ctx, &mut greeted, &mut deadline).await
        );
        assert!(
            handle_provider_frame(ack, &mut sink, &ctx, &mut greeted, &mut deadline).await
        );
        assert!(deadline.is_none());
    }

    #[tokio::test]
    async fn test_malformed_frame_keeps_connection_alive() {
        let (ctx, mut rx, session_id) = connection_ctx().await;
        let mut sink = RecordingSink::default();
        let mut greeted = false;
        let mut deadline: Option<Instant> = None;

        assert!(
            handle_provider_frame(
                "{definitely not json",
                &mut sink,
                &ctx,
                &mut greeted,
                &mut deadline,
            )
            .await
        );
        assert!(ctx.context.registry().contains(&session_id));

        // The next valid frame is translated normally
        let frame = r#"{"type":"response.audio.delta","delta":"AAAA"}"#;
        assert!(
            handle_provider_frame(frame, &mut sink, &ctx, &mut greeted, &mut deadline).await
        );
        match rx.recv().await {
            Some(VoiceEvent::AudioDelta { audio }) => assert_eq!(audio, "AAAA"),
            other => panic!("unexpected event: {other:?}"),
        }
        // Pure relay: nothing was written back toward the provider
        assert!(sink.sent.is_empty());
    }

    #[tokio::test]
    async fn test_trailing_deltas_forwarded_in_arrival_order() {
        let (ctx, mut rx, _) = connection_ctx().await;
        let mut sink = RecordingSink::default();
        let mut greeted = false;
        let mut deadline: Option<Instant> = None;

        // Deltas still in flight after a cancel keep arriving; each one is
        // relayed as-is, in the order the provider sent it
        for chunk in ["one", "two", "three"] {
            let frame =
                format!(r#"{{"type":"response.audio.delta","delta":"{chunk}"}}"#);
            assert!(
                handle_provider_frame(&frame, &mut sink, &ctx, &mut greeted, &mut deadline)
                    .await
            );
        }
        let done = r#"{"type":"response.audio.done"}"#;
        assert!(
            handle_provider_frame(done, &mut sink, &ctx, &mut greeted, &mut deadline).await
        );

        for expected in ["one", "two", "three"] {
            match rx.recv().await {
                Some(VoiceEvent::AudioDelta { audio }) => assert_eq!(audio, expected),
                other => panic!("unexpected event: {other:?}"),
            }
        }
        assert!(matches!(rx.recv().await, Some(VoiceEvent::AudioDone)));
    }
}
