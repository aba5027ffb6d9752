//! Session instruction and configuration builders.
//!
//! Everything the provider needs to behave as the session's persona is
//! assembled here: the instruction text, the voice, the transcription
//! language and the tool declarations. The gender-to-voice and
//! language-to-code mappings are static tables so new languages are data
//! changes, not control-flow changes.

use std::collections::HashMap;
use std::time::Duration;

use once_cell::sync::Lazy;
use serde_json::json;

use crate::session::{AgentGender, ConversationSession};

use super::messages::{SessionConfig, ToolDef, TranscriptionConfig, TurnDetection};

/// Turns of history included when (re)building instructions.
pub const RECENT_HISTORY_TURNS: usize = 10;

/// Delay between the first configuration ack and the greeting request.
pub const GREETING_DELAY: Duration = Duration::from_millis(500);

const VAD_THRESHOLD: f32 = 0.5;
const VAD_PREFIX_PADDING_MS: u32 = 300;
const VAD_SILENCE_DURATION_MS: u32 = 500;

const AUDIO_FORMAT: &str = "pcm16";
const TRANSCRIPTION_MODEL: &str = "whisper-1";

pub const DEFAULT_LANGUAGE: &str = "en";

/// Spoken-language code to display name, for instruction text. Codes listed
/// here are also valid transcription-language codes.
static LANGUAGES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("en", "English"),
        ("tr", "Turkish"),
        ("de", "German"),
        ("ru", "Russian"),
        ("ar", "Arabic"),
        ("fr", "French"),
        ("es", "Spanish"),
    ])
});

/// Voice identifier for a persona gender.
pub fn voice_for(gender: AgentGender) -> &'static str {
    match gender {
        AgentGender::Female => "shimmer",
        AgentGender::Male => "echo",
    }
}

/// Transcription-language code for a spoken-language code, defaulting to
/// English when unmapped.
pub fn transcription_language(code: &str) -> &'static str {
    LANGUAGES
        .get_key_value(code)
        .map(|(k, _)| *k)
        .unwrap_or(DEFAULT_LANGUAGE)
}

/// Display name of a spoken-language code, defaulting to English.
pub fn language_name(code: &str) -> &'static str {
    LANGUAGES.get(code).copied().unwrap_or("English")
}

/// Instruction text for the session's current persona, language, collected
/// profile and a bounded window of recent history.
pub fn build_instructions(session: &ConversationSession) -> String {
    let mut text = format!(
        "You are {name}, a warm and professional patient consultant for an \
         international medical travel clinic. Speak only {language}. Keep \
         replies short and conversational; this is a live phone call.\n\
         Help the caller with treatment questions, and naturally learn their \
         name, phone number and which treatments interest them. Whenever the \
         caller shares personal or contact details, record them with the \
         update_patient_info tool. If the caller speaks a different language, \
         call the detect_language tool with that language's code.",
        name = session.persona.name,
        language = language_name(&session.language),
    );

    if !session.patient_info.is_empty() {
        text.push_str("\n\nKnown caller details:");
        let info = &session.patient_info;
        if let Some(name) = &info.full_name {
            text.push_str(&format!("\n- Name: {name}"));
        }
        if let Some(phone) = &info.phone {
            text.push_str(&format!("\n- Phone: {phone}"));
        }
        if let Some(email) = &info.email {
            text.push_str(&format!("\n- Email: {email}"));
        }
        if let Some(country) = &info.country {
            text.push_str(&format!("\n- Country: {country}"));
        }
        if let Some(city) = &info.city {
            text.push_str(&format!("\n- City: {city}"));
        }
        if let Some(age) = info.age {
            text.push_str(&format!("\n- Age: {age}"));
        }
        if !info.interested_treatments.is_empty() {
            text.push_str(&format!(
                "\n- Interested in: {}",
                info.interested_treatments.join(", ")
            ));
        }
        if let Some(notes) = &info.notes {
            text.push_str(&format!("\n- Notes: {notes}"));
        }
    }

    let recent = session.recent_history(RECENT_HISTORY_TURNS);
    if !recent.is_empty() {
        text.push_str("\n\nConversation so far:");
        for turn in recent {
            text.push_str(&format!("\n{}: {}", turn.role.as_str(), turn.content));
        }
    }

    text
}

/// Transient greeting instructions, localized to the session's language.
/// Sent with a one-off generation request; never persisted.
pub fn greeting_instructions(session: &ConversationSession) -> String {
    format!(
        "Greet the caller in {language}: introduce yourself as {name} from the \
         clinic and ask how you can help with their treatment plans. One or \
         two sentences, warm and natural.",
        language = language_name(&session.language),
        name = session.persona.name,
    )
}

/// Tool declarations advertised in every session configuration.
pub fn tool_declarations() -> Vec<ToolDef> {
    vec![
        ToolDef::function(
            "update_patient_info",
            "Record personal or contact details the caller has shared. \
             Send only the fields that were mentioned.",
            json!({
                "type": "object",
                "properties": {
                    "full_name": { "type": "string" },
                    "phone": { "type": "string" },
                    "email": { "type": "string" },
                    "country": { "type": "string" },
                    "city": { "type": "string" },
                    "age": { "type": "integer" },
                    "gender": { "type": "string" },
                    "interested_treatments": {
                        "type": "array",
                        "items": { "type": "string" }
                    },
                    "notes": { "type": "string" }
                }
            }),
        ),
        ToolDef::function(
            "detect_language",
            "Report the language the caller is actually speaking, as an \
             ISO 639-1 code, when it differs from the conversation language.",
            json!({
                "type": "object",
                "properties": {
                    "language": {
                        "type": "string",
                        "description": "ISO 639-1 code, e.g. 'en' or 'tr'"
                    }
                },
                "required": ["language"]
            }),
        ),
    ]
}

/// Full session configuration for the current session state. Used for the
/// initial `session.update` and for every reconfiguration.
pub fn session_config(session: &ConversationSession) -> SessionConfig {
    SessionConfig {
        modalities: vec!["text".to_string(), "audio".to_string()],
        instructions: build_instructions(session),
        voice: voice_for(session.persona.gender).to_string(),
        input_audio_format: AUDIO_FORMAT.to_string(),
        output_audio_format: AUDIO_FORMAT.to_string(),
        input_audio_transcription: TranscriptionConfig {
            model: TRANSCRIPTION_MODEL.to_string(),
            language: transcription_language(&session.language).to_string(),
        },
        turn_detection: TurnDetection::ServerVad {
            threshold: VAD_THRESHOLD,
            prefix_padding_ms: VAD_PREFIX_PADDING_MS,
            silence_duration_ms: VAD_SILENCE_DURATION_MS,
        },
        tools: tool_declarations(),
        tool_choice: "auto".to_string(),
    }
}
