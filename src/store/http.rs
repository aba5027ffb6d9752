//! HTTP profile store client.
//!
//! Thin reqwest client against the record store service. Every method maps a
//! non-2xx response or transport failure to `AppError::Persistence`; the
//! caller decides whether that is fatal.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::errors::{AppError, AppResult};
use crate::session::{AgentGender, MessageRole, PatientInfo, Persona};

use super::{ConversationOutcome, NewConversation, ProfileStore};

/// Profile store backed by the record service's REST API.
#[derive(Debug, Clone)]
pub struct HttpProfileStore {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PatientCreated {
    id: String,
}

#[derive(Debug, Deserialize)]
struct AgentRow {
    name: String,
    gender: String,
}

impl HttpProfileStore {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        builder
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> AppResult<reqwest::Response> {
        let response = builder
            .send()
            .await
            .map_err(|e| AppError::Persistence(e.to_string()))?;
        response
            .error_for_status()
            .map_err(|e| AppError::Persistence(e.to_string()))
    }
}

#[async_trait]
impl ProfileStore for HttpProfileStore {
    async fn create_conversation(&self, record: NewConversation) -> AppResult<()> {
        let body = json!({
            "id": record.id,
            "language": record.language,
            "agent_name": record.agent_name,
        });
        self.send(self.request(reqwest::Method::POST, "/conversations").json(&body))
            .await?;
        Ok(())
    }

    async fn set_conversation_language(
        &self,
        conversation_id: &str,
        language: &str,
        agent_name: &str,
    ) -> AppResult<()> {
        let body = json!({ "language": language, "agent_name": agent_name });
        let path = format!("/conversations/{conversation_id}");
        self.send(self.request(reqwest::Method::PATCH, &path).json(&body))
            .await?;
        Ok(())
    }

    async fn link_patient(
        &self,
        conversation_id: &str,
        patient_record_id: &str,
    ) -> AppResult<()> {
        let body = json!({ "patient_id": patient_record_id });
        let path = format!("/conversations/{conversation_id}");
        self.send(self.request(reqwest::Method::PATCH, &path).json(&body))
            .await?;
        Ok(())
    }

    async fn close_conversation(
        &self,
        conversation_id: &str,
        outcome: ConversationOutcome,
    ) -> AppResult<()> {
        let body = json!({
            "status": "completed",
            "summary": outcome.summary,
            "lead_score": outcome.lead.score,
            "lead_status": outcome.lead.status.as_str(),
            "ended_at": outcome.ended_at,
        });
        let path = format!("/conversations/{conversation_id}");
        self.send(self.request(reqwest::Method::PATCH, &path).json(&body))
            .await?;
        Ok(())
    }

    async fn append_message(
        &self,
        conversation_id: &str,
        role: MessageRole,
        content: &str,
    ) -> AppResult<()> {
        let body = json!({ "role": role.as_str(), "content": content });
        let path = format!("/conversations/{conversation_id}/messages");
        self.send(self.request(reqwest::Method::POST, &path).json(&body))
            .await?;
        Ok(())
    }

    async fn create_patient(&self, info: &PatientInfo) -> AppResult<String> {
        let response = self
            .send(self.request(reqwest::Method::POST, "/patients").json(info))
            .await?;
        let created: PatientCreated = response
            .json()
            .await
            .map_err(|e| AppError::Persistence(e.to_string()))?;
        Ok(created.id)
    }

    async fn update_patient(&self, patient_record_id: &str, info: &PatientInfo) -> AppResult<()> {
        let path = format!("/patients/{patient_record_id}");
        self.send(self.request(reqwest::Method::PATCH, &path).json(info))
            .await?;
        Ok(())
    }

    async fn random_agent(&self, language: &str) -> AppResult<Option<Persona>> {
        let path = format!("/agents/random?language={language}");
        let response = self.send(self.request(reqwest::Method::GET, &path)).await?;
        if response.status() == reqwest::StatusCode::NO_CONTENT {
            return Ok(None);
        }
        let row: AgentRow = response
            .json()
            .await
            .map_err(|e| AppError::Persistence(e.to_string()))?;
        Ok(Some(Persona {
            name: row.name,
            gender: AgentGender::from_str_or_default(&row.gender),
        }))
    }
}
