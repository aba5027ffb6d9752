//! Voice session WebSocket gateway.
//!
//! One client connection binds at most one session at a time. Until a
//! `start_conversation` arrives the connection is only a routing key;
//! commands that reference no bound session are silently dropped. Disconnect
//! cleanup is a hard obligation: the session is ended and the upstream
//! socket closed even when the client is already gone.

use std::time::{Duration, SystemTime};

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use tokio::select;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::state::AppState;
use crate::upstream::messages::ClientEvent as UpstreamEvent;
use crate::upstream::instructions::DEFAULT_LANGUAGE;

use super::messages::{ClientCommand, VoiceEvent};

/// Outbound event channel capacity per connection.
const CHANNEL_BUFFER_SIZE: usize = 256;

/// Maximum WebSocket frame/message size (10 MB).
const MAX_WS_FRAME_SIZE: usize = 10 * 1024 * 1024;
const MAX_WS_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

/// How often the loop wakes to check for staleness.
const IDLE_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Base idle limit before a stale connection is closed; jittered so herds
/// of idle connections don't all close on the same tick.
const IDLE_TIMEOUT_SECS: u64 = 300;
const IDLE_JITTER_SECS: u64 = 30;

fn jittered_idle_timeout() -> Duration {
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    let jitter = (nanos % (IDLE_JITTER_SECS * 2)) as i64 - IDLE_JITTER_SECS as i64;
    Duration::from_secs((IDLE_TIMEOUT_SECS as i64 + jitter).max(1) as u64)
}

/// Upgrade handler for `/voice`.
pub async fn voice_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    info!("Voice WebSocket upgrade requested");
    ws.max_frame_size(MAX_WS_FRAME_SIZE)
        .max_message_size(MAX_WS_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_voice_socket(socket, state))
}

async fn handle_voice_socket(socket: WebSocket, state: AppState) {
    let connection_id = Uuid::new_v4().to_string();
    info!(connection_id = %connection_id, "Voice connection established");

    let (mut sender, mut receiver) = socket.split();
    let (events_tx, mut events_rx) = mpsc::channel::<VoiceEvent>(CHANNEL_BUFFER_SIZE);

    // Single consumer for all outbound events keeps their order explicit.
    let sender_task = tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(e) => {
                    error!("Failed to serialize outbound event: {e}");
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    let mut session_id: Option<String> = None;
    let idle_timeout = jittered_idle_timeout();
    let mut last_activity = std::time::Instant::now();

    loop {
        select! {
            msg = receiver.next() => {
                last_activity = std::time::Instant::now();
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        handle_text_frame(
                            &text,
                            &mut session_id,
                            &connection_id,
                            &state,
                            &events_tx,
                        )
                        .await;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!(connection_id = %connection_id, "Voice connection closed by client");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(connection_id = %connection_id, error = %e, "Voice socket error");
                        break;
                    }
                }
            }
            _ = tokio::time::sleep(IDLE_CHECK_INTERVAL) => {
                if last_activity.elapsed() > idle_timeout {
                    warn!(
                        connection_id = %connection_id,
                        "Closing voice connection idle for {}s",
                        last_activity.elapsed().as_secs()
                    );
                    let _ = events_tx
                        .send(VoiceEvent::Error {
                            message: "Connection closed due to inactivity".to_string(),
                        })
                        .await;
                    break;
                }
            }
        }
    }

    // Disconnect cleanup: may race an in-progress start, so every lookup
    // below tolerates an already-gone session.
    if let Some(id) = session_id.take() {
        state.upstream.close(&id);
        if let Some(ended) = state.context.end_session(&id, None).await {
            debug!(
                session_id = %id,
                score = ended.lead.score,
                "Session ended on disconnect"
            );
        }
    }

    sender_task.abort();
    info!(connection_id = %connection_id, "Voice connection terminated");
}

async fn handle_text_frame(
    text: &str,
    session_id: &mut Option<String>,
    connection_id: &str,
    state: &AppState,
    events: &mpsc::Sender<VoiceEvent>,
) {
    let command: ClientCommand = match serde_json::from_str(text) {
        Ok(command) => command,
        Err(e) => {
            warn!(connection_id, error = %e, "Malformed client command");
            let _ = events
                .send(VoiceEvent::Error {
                    message: format!("Invalid command: {e}"),
                })
                .await;
            return;
        }
    };

    if let Err(e) = command.validate_size() {
        warn!(connection_id, error = %e, "Oversized client payload");
        let _ = events
            .send(VoiceEvent::Error {
                message: e.to_string(),
            })
            .await;
        return;
    }

    handle_command(command, session_id, connection_id, state, events).await;
}

async fn handle_command(
    command: ClientCommand,
    session_id: &mut Option<String>,
    connection_id: &str,
    state: &AppState,
    events: &mpsc::Sender<VoiceEvent>,
) {
    match command {
        ClientCommand::StartConversation { language } => {
            if session_id.is_some() {
                warn!(connection_id, "Conversation already started on this connection");
                return;
            }
            let language = language.unwrap_or_else(|| DEFAULT_LANGUAGE.to_string());

            let session = match state.context.create_session(connection_id, &language).await {
                Ok(session) => session,
                Err(e) => {
                    error!(connection_id, error = %e, "Failed to create session");
                    let _ = events
                        .send(VoiceEvent::Error {
                            message: "Could not start the conversation".to_string(),
                        })
                        .await;
                    return;
                }
            };
            *session_id = Some(session.id.clone());

            let _ = events
                .send(VoiceEvent::ConversationStarted {
                    conversation_id: session.id.clone(),
                    agent_name: session.persona.name.clone(),
                    language: session.language.clone(),
                })
                .await;

            if let Err(e) = state.upstream.open(&session.id, events.clone()).await {
                warn!(session_id = %session.id, error = %e, "Upstream open failed");
                let _ = events
                    .send(VoiceEvent::Error {
                        message: "Voice service is unavailable".to_string(),
                    })
                    .await;
            }
        }

        ClientCommand::AudioData { audio } => {
            if let Some(id) = session_id {
                state
                    .upstream
                    .send(id, UpstreamEvent::AudioAppend { audio })
                    .await;
            }
        }

        ClientCommand::AudioCommit => {
            if let Some(id) = session_id {
                state.upstream.send(id, UpstreamEvent::AudioCommit).await;
            }
        }

        ClientCommand::Interrupt => {
            // Stops further generation; deltas already in flight still
            // arrive and are forwarded in order.
            if let Some(id) = session_id {
                state.upstream.send(id, UpstreamEvent::ResponseCancel).await;
            }
        }

        ClientCommand::UpdateLanguage { language } => {
            let Some(id) = session_id.as_deref() else {
                return;
            };
            match state.context.update_language(id, &language).await {
                Ok(Some(persona)) => {
                    state.upstream.reconfigure(id).await;
                    let _ = events
                        .send(VoiceEvent::LanguageUpdated {
                            language,
                            agent_name: persona.name,
                        })
                        .await;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(session_id = %id, error = %e, "Language update failed");
                }
            }
        }

        ClientCommand::EndConversation => {
            if let Some(id) = session_id.take() {
                state.upstream.close(&id);
                if state.context.end_session(&id, None).await.is_some() {
                    let _ = events
                        .send(VoiceEvent::ConversationEnded {
                            conversation_id: id,
                        })
                        .await;
                }
            }
        }
    }
}
