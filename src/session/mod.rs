//! Conversation session types.
//!
//! A [`ConversationSession`] pairs one client connection with one upstream
//! provider connection and the profile/history state collected during the
//! call. Sessions are owned by the registry; the gateway and the upstream
//! client only ever hold the session id.

pub mod manager;
pub mod registry;
pub mod scoring;

use serde::{Deserialize, Serialize};

pub use manager::{ContextManager, EndedSession};
pub use registry::SessionRegistry;
pub use scoring::{LeadScore, LeadStatus};

/// Presented gender of the assistant persona.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentGender {
    #[default]
    Female,
    Male,
}

impl AgentGender {
    /// Parse a stored gender string, defaulting to female on anything
    /// unrecognized.
    pub fn from_str_or_default(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "male" | "m" => AgentGender::Male,
            _ => AgentGender::Female,
        }
    }
}

/// Name/gender pair presented to the caller, drawn from a language-scoped
/// pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Persona {
    pub name: String,
    pub gender: AgentGender,
}

/// Fallback persona when the pool for a language is empty or the store
/// lookup fails.
pub fn default_persona() -> Persona {
    Persona {
        name: "Selin".to_string(),
        gender: AgentGender::Female,
    }
}

/// Role of a recorded conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl MessageRole {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
        }
    }
}

/// One turn of the conversation transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageTurn {
    pub role: MessageRole,
    pub content: String,
}

/// Progressively-filled patient profile draft.
///
/// Fields are merged last-write-wins per field; treatment interests are
/// unioned. The draft is never wholesale-replaced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatientInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interested_treatments: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl PatientInfo {
    /// Merge a partial update into this draft. Scalar fields are
    /// last-write-wins when present in the update; treatment interests are
    /// appended without duplicates.
    pub fn merge(&mut self, partial: PatientInfo) {
        if partial.full_name.is_some() {
            self.full_name = partial.full_name;
        }
        if partial.phone.is_some() {
            self.phone = partial.phone;
        }
        if partial.email.is_some() {
            self.email = partial.email;
        }
        if partial.country.is_some() {
            self.country = partial.country;
        }
        if partial.city.is_some() {
            self.city = partial.city;
        }
        if partial.age.is_some() {
            self.age = partial.age;
        }
        if partial.gender.is_some() {
            self.gender = partial.gender;
        }
        for treatment in partial.interested_treatments {
            if !self
                .interested_treatments
                .iter()
                .any(|t| t.eq_ignore_ascii_case(&treatment))
            {
                self.interested_treatments.push(treatment);
            }
        }
        if partial.notes.is_some() {
            self.notes = partial.notes;
        }
    }

    /// Whether enough contact data exists to upsert a patient record.
    pub fn has_contact(&self) -> bool {
        self.full_name.is_some() || self.phone.is_some()
    }

    /// Whether the draft is completely empty.
    pub fn is_empty(&self) -> bool {
        *self == PatientInfo::default()
    }
}

/// Lifecycle state of the per-session upstream connection.
///
/// `Closed` is terminal; a new connection requires a new session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpstreamState {
    #[default]
    Connecting,
    Open,
    Closed,
}

/// The central per-conversation entity.
///
/// At most one session exists per id and at most one upstream connection
/// per session. `history` is append-only; it is never reordered and only
/// read back through a bounded most-recent window.
#[derive(Debug, Clone)]
pub struct ConversationSession {
    /// Opaque unique identifier, stable for the session's lifetime
    pub id: String,
    /// Routing key of the client transport connection (not ownership)
    pub client_connection_id: String,
    pub persona: Persona,
    /// Current spoken-language code
    pub language: String,
    pub patient_info: PatientInfo,
    /// Set once the draft is first persisted as a patient record
    pub patient_record_id: Option<String>,
    pub history: Vec<MessageTurn>,
    pub upstream_state: UpstreamState,
}

impl ConversationSession {
    pub fn new(
        id: String,
        client_connection_id: String,
        persona: Persona,
        language: String,
    ) -> Self {
        Self {
            id,
            client_connection_id,
            persona,
            language,
            patient_info: PatientInfo::default(),
            patient_record_id: None,
            history: Vec::new(),
            upstream_state: UpstreamState::Connecting,
        }
    }

    /// Append one turn. FIFO per session.
    pub fn push_turn(&mut self, role: MessageRole, content: String) {
        self.history.push(MessageTurn { role, content });
    }

    /// Most recent `limit` turns, oldest first.
    pub fn recent_history(&self, limit: usize) -> &[MessageTurn] {
        let start = self.history.len().saturating_sub(limit);
        &self.history[start..]
    }

    /// Number of user-role turns recorded so far.
    pub fn user_message_count(&self) -> usize {
        self.history
            .iter()
            .filter(|t| t.role == MessageRole::User)
            .count()
    }
}
