//! Conversation context manager.
//!
//! Owns session lifecycle: creation, language changes, transcript appends,
//! profile merging and end-of-session derivation. All registry mutation goes
//! through here; persistence calls never run while a registry shard guard is
//! held.

use std::sync::Arc;
use std::time::SystemTime;

use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::AppResult;
use crate::store::{ConversationOutcome, NewConversation, ProfileStore};
use crate::summary::Summarizer;

use super::registry::SessionRegistry;
use super::scoring::{score_lead, LeadScore};
use super::{default_persona, ConversationSession, MessageRole, PatientInfo, Persona};

/// A session removed from the registry with its derived end-of-call data.
#[derive(Debug)]
pub struct EndedSession {
    pub session: ConversationSession,
    pub lead: LeadScore,
    pub summary: Option<String>,
}

/// Orchestrates session state against the registry, the profile store and
/// the summarizer.
pub struct ContextManager {
    registry: Arc<SessionRegistry>,
    store: Arc<dyn ProfileStore>,
    summarizer: Arc<dyn Summarizer>,
}

impl ContextManager {
    pub fn new(
        registry: Arc<SessionRegistry>,
        store: Arc<dyn ProfileStore>,
        summarizer: Arc<dyn Summarizer>,
    ) -> Self {
        Self {
            registry,
            store,
            summarizer,
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    async fn pick_persona(&self, language: &str) -> Persona {
        match self.store.random_agent(language).await {
            Ok(Some(persona)) => persona,
            Ok(None) => {
                info!(language, "Empty persona pool, using default persona");
                default_persona()
            }
            Err(e) => {
                warn!(language, error = %e, "Persona lookup failed, using default persona");
                default_persona()
            }
        }
    }

    /// Create and register a new session.
    ///
    /// Record creation failure propagates and the session is not registered.
    pub async fn create_session(
        &self,
        client_connection_id: &str,
        language: &str,
    ) -> AppResult<ConversationSession> {
        let persona = self.pick_persona(language).await;
        let id = Uuid::new_v4().to_string();

        self.store
            .create_conversation(NewConversation {
                id: id.clone(),
                language: language.to_string(),
                agent_name: persona.name.clone(),
            })
            .await?;

        let session = ConversationSession::new(
            id.clone(),
            client_connection_id.to_string(),
            persona,
            language.to_string(),
        );
        self.registry.insert(session.clone());

        info!(session_id = %id, language, agent = %session.persona.name, "Session created");
        Ok(session)
    }

    /// Switch the session language, re-rolling the persona from the new
    /// language's pool. Returns the new persona, or `None` when the language
    /// is unchanged, the session is unknown, or a concurrent switch landed
    /// first. The caller reconfigures the upstream connection after a `Some`.
    pub async fn update_language(
        &self,
        session_id: &str,
        language: &str,
    ) -> AppResult<Option<Persona>> {
        let current = match self.registry.with_session(session_id, |s| s.language.clone()) {
            Some(lang) => lang,
            None => return Ok(None),
        };
        if current == language {
            return Ok(None);
        }

        let persona = self.pick_persona(language).await;
        // Re-check under the shard lock: the session may have ended, or a
        // concurrent switch may have won while the persona lookup was in
        // flight. Only the first writer lands; losers report no change.
        let updated = self.registry.update(session_id, |s| {
            if s.language != current {
                return false;
            }
            s.language = language.to_string();
            s.persona = persona.clone();
            true
        });
        if updated != Some(true) {
            return Ok(None);
        }

        if let Err(e) = self
            .store
            .set_conversation_language(session_id, language, &persona.name)
            .await
        {
            warn!(session_id, error = %e, "Failed to persist language change");
        }

        info!(session_id, language, agent = %persona.name, "Session language updated");
        Ok(Some(persona))
    }

    /// Append one transcript turn and persist it. Unknown session ids are
    /// no-ops. Persistence failure is logged and swallowed.
    pub async fn append_message(&self, session_id: &str, role: MessageRole, content: &str) {
        let appended = self
            .registry
            .update(session_id, |s| s.push_turn(role, content.to_string()));
        if appended.is_none() {
            return;
        }

        if let Err(e) = self.store.append_message(session_id, role, content).await {
            warn!(session_id, error = %e, "Failed to persist message");
        }
    }

    /// Merge partial fields into the patient draft; once name or phone is
    /// present the draft is upserted as a patient record and linked to the
    /// conversation. All persistence failures here are non-fatal.
    pub async fn update_patient_info(&self, session_id: &str, partial: PatientInfo) {
        let merged = self.registry.update(session_id, |s| {
            s.patient_info.merge(partial);
            (s.patient_info.clone(), s.patient_record_id.clone())
        });
        let (draft, record_id) = match merged {
            Some(state) => state,
            None => return,
        };

        if !draft.has_contact() {
            return;
        }

        match record_id {
            Some(record_id) => {
                if let Err(e) = self.store.update_patient(&record_id, &draft).await {
                    warn!(session_id, error = %e, "Failed to update patient record");
                }
            }
            None => match self.store.create_patient(&draft).await {
                Ok(record_id) => {
                    self.registry.update(session_id, |s| {
                        s.patient_record_id = Some(record_id.clone());
                    });
                    if let Err(e) = self.store.link_patient(session_id, &record_id).await {
                        warn!(session_id, error = %e, "Failed to link patient record");
                    }
                }
                Err(e) => {
                    warn!(session_id, error = %e, "Failed to create patient record");
                }
            },
        }
    }

    /// End a session: remove it from the registry, derive summary and lead
    /// score, and persist the outcome. Returns `None` for unknown ids (the
    /// disconnect path may race session creation).
    pub async fn end_session(
        &self,
        session_id: &str,
        explicit_summary: Option<String>,
    ) -> Option<EndedSession> {
        let session = self.registry.remove(session_id)?;

        let summary = match explicit_summary {
            Some(summary) => Some(summary),
            None if !session.history.is_empty() => {
                match self.summarizer.summarize(&session.history).await {
                    Ok(summary) => Some(summary),
                    Err(e) => {
                        warn!(session_id, error = %e, "Summary generation failed, omitting");
                        None
                    }
                }
            }
            None => None,
        };

        let lead = score_lead(&session.patient_info, session.user_message_count());
        let ended_at = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        if let Err(e) = self
            .store
            .close_conversation(
                session_id,
                ConversationOutcome {
                    summary: summary.clone(),
                    lead,
                    ended_at,
                },
            )
            .await
        {
            warn!(session_id, error = %e, "Failed to persist conversation outcome");
        }

        info!(
            session_id,
            score = lead.score,
            status = lead.status.as_str(),
            "Session ended"
        );
        Some(EndedSession {
            session,
            lead,
            summary,
        })
    }
}

impl std::fmt::Debug for ContextManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextManager")
            .field("sessions", &self.registry.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::LeadStatus;
    use crate::store::MemoryProfileStore;
    use crate::summary::NoopSummarizer;

    fn manager_with_store() -> (ContextManager, Arc<MemoryProfileStore>) {
        let registry = Arc::new(SessionRegistry::new());
        let store = Arc::new(MemoryProfileStore::with_default_agents());
        let manager = ContextManager::new(
            registry,
            store.clone() as Arc<dyn ProfileStore>,
            Arc::new(NoopSummarizer),
        );
        (manager, store)
    }

    #[tokio::test]
    async fn test_create_session_registers_and_persists() {
        let (manager, store) = manager_with_store();
        let session = manager.create_session("conn-1", "en").await.unwrap();

        assert!(manager.registry().contains(&session.id));
        assert!(store.pool_names("en").contains(&session.persona.name));
        let row = store.conversation(&session.id).unwrap();
        assert_eq!(row.language, "en");
        assert_eq!(row.agent_name, session.persona.name);
    }

    #[tokio::test]
    async fn test_create_session_falls_back_to_default_persona() {
        let registry = Arc::new(SessionRegistry::new());
        // Store with no pools at all
        let store = Arc::new(MemoryProfileStore::new());
        let manager =
            ContextManager::new(registry, store, Arc::new(NoopSummarizer));

        let session = manager.create_session("conn-1", "xx").await.unwrap();
        assert_eq!(session.persona, default_persona());
    }

    #[tokio::test]
    async fn test_update_language_same_is_noop() {
        let (manager, _) = manager_with_store();
        let session = manager.create_session("conn-1", "en").await.unwrap();

        let result = manager.update_language(&session.id, "en").await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_update_language_rerolls_persona() {
        let (manager, store) = manager_with_store();
        let session = manager.create_session("conn-1", "en").await.unwrap();

        let persona = manager
            .update_language(&session.id, "tr")
            .await
            .unwrap()
            .expect("language change should reassign persona");
        assert!(store.pool_names("tr").contains(&persona.name));

        let language = manager
            .registry()
            .with_session(&session.id, |s| s.language.clone())
            .unwrap();
        assert_eq!(language, "tr");
        assert_eq!(store.conversation(&session.id).unwrap().language, "tr");
    }

    /// Store whose persona lookup yields, so two in-flight language
    /// switches interleave between their read and their write.
    struct YieldingStore(MemoryProfileStore);

    #[async_trait::async_trait]
    impl ProfileStore for YieldingStore {
        async fn create_conversation(
            &self,
            record: crate::store::NewConversation,
        ) -> AppResult<()> {
            self.0.create_conversation(record).await
        }

        async fn set_conversation_language(
            &self,
            conversation_id: &str,
            language: &str,
            agent_name: &str,
        ) -> AppResult<()> {
            self.0
                .set_conversation_language(conversation_id, language, agent_name)
                .await
        }

        async fn link_patient(
            &self,
            conversation_id: &str,
            patient_record_id: &str,
        ) -> AppResult<()> {
            self.0.link_patient(conversation_id, patient_record_id).await
        }

        async fn close_conversation(
            &self,
            conversation_id: &str,
            outcome: ConversationOutcome,
        ) -> AppResult<()> {
            self.0.close_conversation(conversation_id, outcome).await
        }

        async fn append_message(
            &self,
            conversation_id: &str,
            role: MessageRole,
            content: &str,
        ) -> AppResult<()> {
            self.0.append_message(conversation_id, role, content).await
        }

        async fn create_patient(&self, info: &PatientInfo) -> AppResult<String> {
            self.0.create_patient(info).await
        }

        async fn update_patient(
            &self,
            patient_record_id: &str,
            info: &PatientInfo,
        ) -> AppResult<()> {
            self.0.update_patient(patient_record_id, info).await
        }

        async fn random_agent(&self, language: &str) -> AppResult<Option<Persona>> {
            tokio::task::yield_now().await;
            self.0.random_agent(language).await
        }
    }

    #[tokio::test]
    async fn test_concurrent_language_switches_have_one_winner() {
        let registry = Arc::new(SessionRegistry::new());
        let store = Arc::new(YieldingStore(MemoryProfileStore::with_default_agents()));
        let manager = ContextManager::new(registry, store, Arc::new(NoopSummarizer));
        let session = manager.create_session("conn-1", "en").await.unwrap();

        // Both switches read "en" before either writes; only the first
        // write lands, the loser reports no change
        let (a, b) = tokio::join!(
            manager.update_language(&session.id, "tr"),
            manager.update_language(&session.id, "de"),
        );
        let a = a.unwrap();
        let b = b.unwrap();
        assert!(a.is_some() != b.is_some());

        let winner = if a.is_some() { "tr" } else { "de" };
        let language = manager
            .registry()
            .with_session(&session.id, |s| s.language.clone())
            .unwrap();
        assert_eq!(language, winner);
    }

    #[tokio::test]
    async fn test_update_language_unknown_session() {
        let (manager, _) = manager_with_store();
        let result = manager.update_language("missing", "tr").await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_append_message_fifo_and_persisted() {
        let (manager, store) = manager_with_store();
        let session = manager.create_session("conn-1", "en").await.unwrap();

        manager
            .append_message(&session.id, MessageRole::User, "hello")
            .await;
        manager
            .append_message(&session.id, MessageRole::Assistant, "hi there")
            .await;

        let history = manager
            .registry()
            .with_session(&session.id, |s| s.history.clone())
            .unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "hello");
        assert_eq!(history[1].content, "hi there");
        assert_eq!(store.messages(&session.id).len(), 2);

        // Unknown session: nothing persisted, nothing panics
        manager
            .append_message("missing", MessageRole::User, "void")
            .await;
        assert!(store.messages("missing").is_empty());
    }

    #[tokio::test]
    async fn test_patient_upsert_links_once() {
        let (manager, store) = manager_with_store();
        let session = manager.create_session("conn-1", "en").await.unwrap();

        // No contact fields yet: no record created
        manager
            .update_patient_info(
                &session.id,
                PatientInfo {
                    age: Some(40),
                    ..Default::default()
                },
            )
            .await;
        assert_eq!(store.patient_count(), 0);

        manager
            .update_patient_info(
                &session.id,
                PatientInfo {
                    full_name: Some("Jane".to_string()),
                    ..Default::default()
                },
            )
            .await;
        assert_eq!(store.patient_count(), 1);

        let record_id = manager
            .registry()
            .with_session(&session.id, |s| s.patient_record_id.clone())
            .unwrap()
            .expect("record id should be linked");
        assert_eq!(
            store.conversation(&session.id).unwrap().patient_record_id,
            Some(record_id.clone())
        );

        // Second update reuses the same record
        manager
            .update_patient_info(
                &session.id,
                PatientInfo {
                    phone: Some("+90".to_string()),
                    ..Default::default()
                },
            )
            .await;
        assert_eq!(store.patient_count(), 1);
        let stored = store.patient(&record_id).unwrap();
        assert_eq!(stored.full_name.as_deref(), Some("Jane"));
        assert_eq!(stored.phone.as_deref(), Some("+90"));
        assert_eq!(stored.age, Some(40));
    }

    #[tokio::test]
    async fn test_end_session_unregisters_and_scores() {
        let (manager, store) = manager_with_store();
        let session = manager.create_session("conn-1", "en").await.unwrap();
        manager
            .append_message(&session.id, MessageRole::User, "hi")
            .await;

        let ended = manager.end_session(&session.id, None).await.unwrap();
        assert!(!manager.registry().contains(&session.id));
        // 1 user message, empty profile
        assert_eq!(ended.lead.score, 5);
        assert_eq!(ended.lead.status, LeadStatus::Cold);
        // Noop summarizer fails, so the summary is omitted
        assert!(ended.summary.is_none());

        let row = store.conversation(&session.id).unwrap();
        assert_eq!(row.outcome.as_ref().unwrap().lead.score, 5);

        // Ending twice is a no-op
        assert!(manager.end_session(&session.id, None).await.is_none());
    }

    #[tokio::test]
    async fn test_end_session_explicit_summary_skips_derivation() {
        let (manager, store) = manager_with_store();
        let session = manager.create_session("conn-1", "en").await.unwrap();
        manager
            .append_message(&session.id, MessageRole::User, "hi")
            .await;

        let ended = manager
            .end_session(&session.id, Some("caller hung up".to_string()))
            .await
            .unwrap();
        assert_eq!(ended.summary.as_deref(), Some("caller hung up"));
        assert_eq!(
            store
                .conversation(&session.id)
                .unwrap()
                .outcome
                .unwrap()
                .summary
                .as_deref(),
            Some("caller hung up")
        );
    }
}
