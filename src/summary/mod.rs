//! End-of-session summarization.
//!
//! Best-effort external call: when it fails the session still closes, just
//! without a summary.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::errors::{AppError, AppResult};
use crate::session::MessageTurn;

/// OpenAI chat completions endpoint used for summaries.
const CHAT_COMPLETIONS_URL: &str = "https://api.openai.com/v1/chat/completions";

/// How many transcript turns are included in the summary prompt.
const SUMMARY_HISTORY_LIMIT: usize = 40;

/// Derives a short free-text summary from a transcript.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, history: &[MessageTurn]) -> AppResult<String>;
}

/// Summarizer backed by the OpenAI chat completions API.
#[derive(Debug, Clone)]
pub struct OpenAiSummarizer {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

impl OpenAiSummarizer {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    fn build_prompt(history: &[MessageTurn]) -> String {
        let start = history.len().saturating_sub(SUMMARY_HISTORY_LIMIT);
        let mut prompt = String::from(
            "Summarize this clinic consultation call in 2-3 sentences. \
             Mention the caller's treatment interest and any contact details shared.\n\n",
        );
        for turn in &history[start..] {
            prompt.push_str(turn.role.as_str());
            prompt.push_str(": ");
            prompt.push_str(&turn.content);
            prompt.push('\n');
        }
        prompt
    }
}

#[async_trait]
impl Summarizer for OpenAiSummarizer {
    async fn summarize(&self, history: &[MessageTurn]) -> AppResult<String> {
        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "user", "content": Self::build_prompt(history) }
            ],
            "max_tokens": 200,
        });

        let response = self
            .client
            .post(CHAT_COMPLETIONS_URL)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::Upstream(e.to_string()))?
            .error_for_status()
            .map_err(|e| AppError::Upstream(e.to_string()))?;

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| AppError::Upstream(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.trim().to_string())
            .ok_or_else(|| AppError::Upstream("summary response had no choices".to_string()))
    }
}

/// Summarizer that always fails. Used when no provider key is configured;
/// the manager logs and omits the summary.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSummarizer;

#[async_trait]
impl Summarizer for NoopSummarizer {
    async fn summarize(&self, _history: &[MessageTurn]) -> AppResult<String> {
        Err(AppError::Config("no summarizer configured".to_string()))
    }
}
