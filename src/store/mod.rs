//! Profile store boundary.
//!
//! Durable storage for conversation and patient records lives behind this
//! trait; the gateway only consumes it as opaque async operations that may
//! fail. The CRUD surface, schema and pagination of the store service are
//! not this crate's concern.

pub mod http;
pub mod memory;

use async_trait::async_trait;

use crate::errors::AppResult;
use crate::session::{LeadScore, MessageRole, PatientInfo, Persona};

pub use http::HttpProfileStore;
pub use memory::MemoryProfileStore;

/// Fields persisted when a conversation record is created.
#[derive(Debug, Clone)]
pub struct NewConversation {
    pub id: String,
    pub language: String,
    pub agent_name: String,
}

/// Final fields persisted when a conversation ends.
#[derive(Debug, Clone)]
pub struct ConversationOutcome {
    pub summary: Option<String>,
    pub lead: LeadScore,
    /// Unix timestamp (seconds) of session end
    pub ended_at: u64,
}

/// Durable record operations consumed by the context manager.
///
/// Creation failure during session start is fatal for that session;
/// everything else is best-effort at the call site.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Persist a new conversation record.
    async fn create_conversation(&self, record: NewConversation) -> AppResult<()>;

    /// Persist an in-session language/persona change.
    async fn set_conversation_language(
        &self,
        conversation_id: &str,
        language: &str,
        agent_name: &str,
    ) -> AppResult<()>;

    /// Link a persisted patient record to a conversation.
    async fn link_patient(
        &self,
        conversation_id: &str,
        patient_record_id: &str,
    ) -> AppResult<()>;

    /// Persist final status, summary and lead score.
    async fn close_conversation(
        &self,
        conversation_id: &str,
        outcome: ConversationOutcome,
    ) -> AppResult<()>;

    /// Append one transcript turn.
    async fn append_message(
        &self,
        conversation_id: &str,
        role: MessageRole,
        content: &str,
    ) -> AppResult<()>;

    /// Create a patient record from the current draft; returns the record id.
    async fn create_patient(&self, info: &PatientInfo) -> AppResult<String>;

    /// Update an existing patient record with the current draft.
    async fn update_patient(&self, patient_record_id: &str, info: &PatientInfo) -> AppResult<()>;

    /// Uniform random persona from the language-scoped pool.
    /// `Ok(None)` means the pool is empty; callers fall back to the default
    /// persona on `None` or error.
    async fn random_agent(&self, language: &str) -> AppResult<Option<Persona>>;
}
