//! In-process profile store.
//!
//! Backs local development and the test suite. State is lost on shutdown.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::errors::AppResult;
use crate::session::{AgentGender, MessageRole, PatientInfo, Persona};

use super::{ConversationOutcome, NewConversation, ProfileStore};

/// Stored conversation row.
#[derive(Debug, Clone)]
pub struct ConversationRow {
    pub id: String,
    pub language: String,
    pub agent_name: String,
    pub patient_record_id: Option<String>,
    pub outcome: Option<ConversationOutcome>,
}

/// In-memory implementation of [`ProfileStore`].
#[derive(Debug, Default)]
pub struct MemoryProfileStore {
    conversations: DashMap<String, ConversationRow>,
    messages: DashMap<String, Vec<(MessageRole, String)>>,
    patients: DashMap<String, PatientInfo>,
    /// Persona pools keyed by language code
    agents: DashMap<String, Vec<Persona>>,
    next_patient_id: AtomicU64,
}

impl MemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with small English and Turkish persona pools.
    pub fn with_default_agents() -> Self {
        let store = Self::new();
        store.seed_agents(
            "en",
            &[
                ("Emma", AgentGender::Female),
                ("Sophie", AgentGender::Female),
                ("James", AgentGender::Male),
            ],
        );
        store.seed_agents(
            "tr",
            &[
                ("Elif", AgentGender::Female),
                ("Zeynep", AgentGender::Female),
                ("Mert", AgentGender::Male),
            ],
        );
        store
    }

    /// Add personas to a language pool.
    pub fn seed_agents(&self, language: &str, personas: &[(&str, AgentGender)]) {
        let mut pool = self.agents.entry(language.to_string()).or_default();
        for (name, gender) in personas {
            pool.push(Persona {
                name: name.to_string(),
                gender: *gender,
            });
        }
    }

    /// Test access to a conversation row.
    pub fn conversation(&self, id: &str) -> Option<ConversationRow> {
        self.conversations.get(id).map(|r| r.clone())
    }

    /// Test access to a conversation's persisted messages.
    pub fn messages(&self, conversation_id: &str) -> Vec<(MessageRole, String)> {
        self.messages
            .get(conversation_id)
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    /// Test access to a patient record.
    pub fn patient(&self, patient_record_id: &str) -> Option<PatientInfo> {
        self.patients.get(patient_record_id).map(|p| p.clone())
    }

    pub fn patient_count(&self) -> usize {
        self.patients.len()
    }

    /// Names in a language pool, for assertions about persona scoping.
    pub fn pool_names(&self, language: &str) -> Vec<String> {
        self.agents
            .get(language)
            .map(|pool| pool.iter().map(|p| p.name.clone()).collect())
            .unwrap_or_default()
    }
}

/// Index pick without pulling in a RNG crate; uniform enough for
/// round-robin-ish persona selection.
fn pick_index(len: usize) -> usize {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    (nanos.wrapping_mul(1103515245).wrapping_add(12345) % len as u64) as usize
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
    async fn create_conversation(&self, record: NewConversation) -> AppResult<()> {
        self.conversations.insert(
            record.id.clone(),
            ConversationRow {
                id: record.id,
                language: record.language,
                agent_name: record.agent_name,
                patient_record_id: None,
                outcome: None,
            },
        );
        Ok(())
    }

    async fn set_conversation_language(
        &self,
        conversation_id: &str,
        language: &str,
        agent_name: &str,
    ) -> AppResult<()> {
        if let Some(mut row) = self.conversations.get_mut(conversation_id) {
            row.language = language.to_string();
            row.agent_name = agent_name.to_string();
        }
        Ok(())
    }

    async fn link_patient(
        &self,
        conversation_id: &str,
        patient_record_id: &str,
    ) -> AppResult<()> {
        if let Some(mut row) = self.conversations.get_mut(conversation_id) {
            row.patient_record_id = Some(patient_record_id.to_string());
        }
        Ok(())
    }

    async fn close_conversation(
        &self,
        conversation_id: &str,
        outcome: ConversationOutcome,
    ) -> AppResult<()> {
        if let Some(mut row) = self.conversations.get_mut(conversation_id) {
            row.outcome = Some(outcome);
        }
        Ok(())
    }

    async fn append_message(
        &self,
        conversation_id: &str,
        role: MessageRole,
        content: &str,
    ) -> AppResult<()> {
        self.messages
            .entry(conversation_id.to_string())
            .or_default()
            .push((role, content.to_string()));
        Ok(())
    }

    async fn create_patient(&self, info: &PatientInfo) -> AppResult<String> {
        let id = format!(
            "patient-{}",
            self.next_patient_id.fetch_add(1, Ordering::Relaxed) + 1
        );
        self.patients.insert(id.clone(), info.clone());
        Ok(id)
    }

    async fn update_patient(&self, patient_record_id: &str, info: &PatientInfo) -> AppResult<()> {
        self.patients
            .insert(patient_record_id.to_string(), info.clone());
        Ok(())
    }

    async fn random_agent(&self, language: &str) -> AppResult<Option<Persona>> {
        let pool = match self.agents.get(language) {
            Some(pool) if !pool.is_empty() => pool,
            _ => return Ok(None),
        };
        let idx = pick_index(pool.len());
        Ok(pool.get(idx).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::LeadStatus;

    #[tokio::test]
    async fn test_conversation_roundtrip() {
        let store = MemoryProfileStore::new();
        store
            .create_conversation(NewConversation {
                id: "c1".to_string(),
                language: "en".to_string(),
                agent_name: "Emma".to_string(),
            })
            .await
            .unwrap();

        store
            .append_message("c1", MessageRole::User, "hello")
            .await
            .unwrap();
        store
            .close_conversation(
                "c1",
                ConversationOutcome {
                    summary: Some("short call".to_string()),
                    lead: crate::session::LeadScore {
                        score: 15,
                        status: LeadStatus::Cold,
                    },
                    ended_at: 1_700_000_000,
                },
            )
            .await
            .unwrap();

        let row = store.conversation("c1").unwrap();
        assert_eq!(row.agent_name, "Emma");
        assert!(row.outcome.is_some());
        assert_eq!(store.messages("c1").len(), 1);
    }

    #[tokio::test]
    async fn test_patient_create_then_update() {
        let store = MemoryProfileStore::new();
        let id = store
            .create_patient(&PatientInfo {
                full_name: Some("Jane".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

        store
            .update_patient(
                &id,
                &PatientInfo {
                    full_name: Some("Jane Doe".to_string()),
                    phone: Some("+1".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(store.patient_count(), 1);
        assert_eq!(
            store.patient(&id).unwrap().full_name.as_deref(),
            Some("Jane Doe")
        );
    }

    #[tokio::test]
    async fn test_random_agent_scoped_to_language() {
        let store = MemoryProfileStore::with_default_agents();

        for _ in 0..10 {
            let persona = store.random_agent("tr").await.unwrap().unwrap();
            assert!(store.pool_names("tr").contains(&persona.name));
        }
    }

    #[tokio::test]
    async fn test_random_agent_empty_pool() {
        let store = MemoryProfileStore::new();
        assert!(store.random_agent("en").await.unwrap().is_none());
    }
}
