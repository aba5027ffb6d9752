//! Client-facing voice protocol.
//!
//! Commands arrive from the end-user client as JSON text frames with a
//! `type` discriminator; events flow back out the same way. Audio travels
//! as base64 PCM16 in both directions and is relayed untouched.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{AppError, AppResult};

/// Largest accepted base64 audio payload in one command (4 MB).
const MAX_AUDIO_PAYLOAD_BYTES: usize = 4 * 1024 * 1024;

/// Commands from the client.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    StartConversation {
        #[serde(default)]
        language: Option<String>,
    },
    AudioData {
        /// Base64-encoded PCM16 frame
        audio: String,
    },
    AudioCommit,
    Interrupt,
    EndConversation,
    UpdateLanguage {
        language: String,
    },
}

impl ClientCommand {
    /// Per-command payload validation, applied after parsing.
    pub fn validate_size(&self) -> AppResult<()> {
        if let ClientCommand::AudioData { audio } = self {
            if audio.len() > MAX_AUDIO_PAYLOAD_BYTES {
                return Err(AppError::Session(format!(
                    "Audio payload too large: {} bytes (max {})",
                    audio.len(),
                    MAX_AUDIO_PAYLOAD_BYTES
                )));
            }
        }
        Ok(())
    }
}

/// Events to the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VoiceEvent {
    ConversationStarted {
        conversation_id: String,
        agent_name: String,
        language: String,
    },
    /// Base64 audio chunk; ordering is playback order and must be preserved
    AudioDelta {
        audio: String,
    },
    AudioDone,
    TranscriptDelta {
        role: String,
        delta: String,
    },
    TranscriptDone {
        role: String,
        transcript: String,
    },
    UserTranscript {
        role: String,
        transcript: String,
    },
    SpeechStarted,
    SpeechStopped,
    ResponseDone {
        response: Value,
    },
    Error {
        message: String,
    },
    SessionClosed,
    LanguageUpdated {
        language: String,
        agent_name: String,
    },
    ConversationEnded {
        conversation_id: String,
    },
    /// Raw provider event, forwarded only outside production
    DebugEvent {
        event: Value,
    },
}
