//! Upstream realtime wire protocol.
//!
//! JSON events with a `type` discriminator, exchanged over the provider's
//! persistent WebSocket. Only the subset this gateway actually sends and
//! consumes is modeled; anything else arriving from the provider fails to
//! parse here and is handled by the translator as an unrecognized event.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Provider realtime endpoint; the model is appended as a query parameter.
pub const REALTIME_URL: &str = "wss://api.openai.com/v1/realtime";

// =============================================================================
// Session configuration
// =============================================================================

/// Full session configuration sent with `session.update`.
///
/// The gateway always sends a complete configuration, both at connection
/// open and on every persona/language reconfiguration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub modalities: Vec<String>,
    pub instructions: String,
    pub voice: String,
    pub input_audio_format: String,
    pub output_audio_format: String,
    pub input_audio_transcription: TranscriptionConfig,
    pub turn_detection: TurnDetection,
    pub tools: Vec<ToolDef>,
    pub tool_choice: String,
}

/// Input transcription settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    pub model: String,
    /// ISO 639-1 code steering the transcription model
    pub language: String,
}

/// Voice-activity turn detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TurnDetection {
    #[serde(rename = "server_vad")]
    ServerVad {
        threshold: f32,
        prefix_padding_ms: u32,
        silence_duration_ms: u32,
    },
}

/// Callable tool declaration advertised to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDef {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolDef {
    pub fn function(name: &str, description: &str, parameters: Value) -> Self {
        Self {
            kind: "function".to_string(),
            name: name.to_string(),
            description: description.to_string(),
            parameters,
        }
    }
}

// =============================================================================
// Conversation items / response directives
// =============================================================================

/// Item for `conversation.item.create`. Only function-result delivery is
/// needed by this gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationItem {
    #[serde(rename = "type")]
    pub kind: String,
    pub call_id: String,
    pub output: String,
}

impl ConversationItem {
    /// Function result addressed to the originating call id.
    pub fn function_output(call_id: &str, output: String) -> Self {
        Self {
            kind: "function_call_output".to_string(),
            call_id: call_id.to_string(),
            output,
        }
    }
}

/// Per-response overrides for `response.create`. Used for the one-off
/// greeting with transient instructions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseDirective {
    pub modalities: Vec<String>,
    pub instructions: String,
}

// =============================================================================
// Client events (gateway -> provider)
// =============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionConfig },

    /// Base64 audio frame, relayed from the client untouched
    #[serde(rename = "input_audio_buffer.append")]
    AudioAppend { audio: String },

    #[serde(rename = "input_audio_buffer.commit")]
    AudioCommit,

    #[serde(rename = "conversation.item.create")]
    ItemCreate { item: ConversationItem },

    #[serde(rename = "response.create")]
    ResponseCreate {
        #[serde(skip_serializing_if = "Option::is_none")]
        response: Option<ResponseDirective>,
    },

    #[serde(rename = "response.cancel")]
    ResponseCancel,
}

impl ClientEvent {
    /// Generation request with transient instructions (not persisted into
    /// the provider-side session configuration).
    pub fn transient_response(instructions: String) -> Self {
        ClientEvent::ResponseCreate {
            response: Some(ResponseDirective {
                modalities: vec!["text".to_string(), "audio".to_string()],
                instructions,
            }),
        }
    }
}

// =============================================================================
// Server events (provider -> gateway), consumed subset
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// Configuration acknowledgment; first one per session arms the greeting
    #[serde(rename = "session.updated")]
    SessionUpdated,

    #[serde(rename = "response.audio.delta")]
    AudioDelta { delta: String },

    #[serde(rename = "response.audio.done")]
    AudioDone,

    #[serde(rename = "response.audio_transcript.delta")]
    TranscriptDelta { delta: String },

    #[serde(rename = "response.audio_transcript.done")]
    TranscriptDone { transcript: String },

    /// Finalized transcript of the user's own speech
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    UserTranscriptCompleted { transcript: String },

    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted,

    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped,

    #[serde(rename = "response.function_call_arguments.done")]
    FunctionCallDone {
        call_id: String,
        #[serde(default)]
        name: String,
        arguments: String,
    },

    #[serde(rename = "response.done")]
    ResponseDone { response: Value },

    #[serde(rename = "error")]
    Error { error: ApiError },
}

/// Provider error payload.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiError {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_event_tags() {
        let json = serde_json::to_string(&ClientEvent::AudioCommit).unwrap();
        assert!(json.contains("input_audio_buffer.commit"));

        let json = serde_json::to_string(&ClientEvent::ResponseCancel).unwrap();
        assert!(json.contains("response.cancel"));
    }

    #[test]
    fn test_audio_append_passthrough() {
        let event = ClientEvent::AudioAppend {
            audio: "AAAA".to_string(),
        };
        let value: Value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "input_audio_buffer.append");
        assert_eq!(value["audio"], "AAAA");
    }

    #[test]
    fn test_function_output_item() {
        let event = ClientEvent::ItemCreate {
            item: ConversationItem::function_output("call_1", "{\"success\":true}".to_string()),
        };
        let value: Value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "conversation.item.create");
        assert_eq!(value["item"]["type"], "function_call_output");
        assert_eq!(value["item"]["call_id"], "call_1");
    }

    #[test]
    fn test_transient_response_carries_instructions() {
        let event = ClientEvent::transient_response("greet warmly".to_string());
        let value: Value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "response.create");
        assert_eq!(value["response"]["instructions"], "greet warmly");
    }

    #[test]
    fn test_server_event_parsing() {
        let event: ServerEvent = serde_json::from_value(json!({
            "type": "response.audio.delta",
            "response_id": "r1",
            "item_id": "i1",
            "output_index": 0,
            "content_index": 0,
            "delta": "UklGRg=="
        }))
        .unwrap();
        match event {
            ServerEvent::AudioDelta { delta } => assert_eq!(delta, "UklGRg=="),
            other => panic!("unexpected event: {other:?}"),
        }

        let event: ServerEvent = serde_json::from_value(json!({
            "type": "conversation.item.input_audio_transcription.completed",
            "item_id": "i1",
            "content_index": 0,
            "transcript": "hello there"
        }))
        .unwrap();
        match event {
            ServerEvent::UserTranscriptCompleted { transcript } => {
                assert_eq!(transcript, "hello there")
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_function_call_done_without_name() {
        let event: ServerEvent = serde_json::from_value(json!({
            "type": "response.function_call_arguments.done",
            "call_id": "call_9",
            "arguments": "{\"language\":\"tr\"}"
        }))
        .unwrap();
        match event {
            ServerEvent::FunctionCallDone { call_id, name, arguments } => {
                assert_eq!(call_id, "call_9");
                assert!(name.is_empty());
                assert!(arguments.contains("tr"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_event_type_is_a_parse_error() {
        let result: Result<ServerEvent, _> = serde_json::from_value(json!({
            "type": "rate_limits.updated",
            "rate_limits": []
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_session_update_shape() {
        let event = ClientEvent::SessionUpdate {
            session: SessionConfig {
                modalities: vec!["text".to_string(), "audio".to_string()],
                instructions: "be brief".to_string(),
                voice: "shimmer".to_string(),
                input_audio_format: "pcm16".to_string(),
                output_audio_format: "pcm16".to_string(),
                input_audio_transcription: TranscriptionConfig {
                    model: "whisper-1".to_string(),
                    language: "en".to_string(),
                },
                turn_detection: TurnDetection::ServerVad {
                    threshold: 0.5,
                    prefix_padding_ms: 300,
                    silence_duration_ms: 500,
                },
                tools: vec![],
                tool_choice: "auto".to_string(),
            },
        };
        let value: Value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "session.update");
        assert_eq!(value["session"]["voice"], "shimmer");
        assert_eq!(value["session"]["turn_detection"]["type"], "server_vad");
        assert_eq!(value["session"]["input_audio_transcription"]["language"], "en");
    }
}
