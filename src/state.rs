//! Shared application state.

use std::sync::Arc;

use tracing::warn;

use crate::config::{ServerConfig, StoreBackend};
use crate::session::{ContextManager, SessionRegistry};
use crate::store::{HttpProfileStore, MemoryProfileStore, ProfileStore};
use crate::summary::{NoopSummarizer, OpenAiSummarizer, Summarizer};
use crate::upstream::UpstreamClient;

/// Everything the handlers need, assembled once at startup. All session
/// state is reachable only through the injected registry inside the context
/// manager; there are no process globals.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub context: Arc<ContextManager>,
    pub upstream: Arc<UpstreamClient>,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        let registry = Arc::new(SessionRegistry::new());

        let store: Arc<dyn ProfileStore> = match config.store.backend {
            StoreBackend::Http => Arc::new(HttpProfileStore::new(
                config.store.base_url.clone().unwrap_or_default(),
                config.store.api_key.clone(),
            )),
            StoreBackend::Memory => Arc::new(MemoryProfileStore::with_default_agents()),
        };

        let summarizer: Arc<dyn Summarizer> = match &config.openai_api_key {
            Some(key) => Arc::new(OpenAiSummarizer::new(
                key.clone(),
                config.summary_model.clone(),
            )),
            None => {
                warn!("OPENAI_API_KEY not set; session summaries disabled");
                Arc::new(NoopSummarizer)
            }
        };

        let context = Arc::new(ContextManager::new(registry, store, summarizer));
        let upstream = Arc::new(UpstreamClient::new(
            config.openai_api_key.clone().unwrap_or_default(),
            config.realtime_model.clone(),
            config.environment,
            context.clone(),
        ));

        Self {
            config: Arc::new(config),
            context,
            upstream,
        }
    }
}
