//! Configuration module for the MedVoice gateway.
//!
//! Configuration is loaded from environment variables (optionally seeded from
//! a `.env` file) with an optional YAML file on top.
//! Priority: YAML > ENV vars > defaults.
//!
//! # Example
//! ```rust,no_run
//! use medvoice_gateway::config::ServerConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ServerConfig::from_env()?;
//!
//! // Load from YAML file with environment variable fallback
//! let config = ServerConfig::from_file(&PathBuf::from("config.yaml"))?;
//!
//! println!("Server listening on {}", config.address());
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;

use serde::Deserialize;

use crate::errors::{AppError, AppResult};

/// Deployment environment.
///
/// Gates the diagnostics-only `debug_event` passthrough: unrecognized
/// provider events are dropped in production and forwarded verbatim to the
/// client everywhere else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    /// Production deployment - diagnostics suppressed
    Production,
    /// Local or staging deployment - diagnostics forwarded
    #[default]
    Development,
}

impl Environment {
    fn parse(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "production" | "prod" => Environment::Production,
            _ => Environment::Development,
        }
    }

    /// Whether this is a production deployment.
    pub fn is_production(self) -> bool {
        matches!(self, Environment::Production)
    }
}

/// Which profile store backing to use.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StoreBackend {
    /// In-process store, state lost on shutdown. Local development only.
    #[default]
    Memory,
    /// HTTP profile store service
    Http,
}

/// Profile store connection settings.
#[derive(Debug, Clone, Default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Base URL of the profile store service (required for the HTTP backend)
    pub base_url: Option<String>,
    /// Bearer token for the profile store service
    pub api_key: Option<String>,
}

/// Server configuration.
///
/// Contains everything needed to run the gateway: bind address, deployment
/// environment, upstream provider credentials, profile store settings and
/// CORS origins.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    // Server settings
    pub host: String,
    pub port: u16,
    pub environment: Environment,

    // Upstream realtime provider
    pub openai_api_key: Option<String>,
    pub realtime_model: String,
    /// Chat model used for end-of-session summaries
    pub summary_model: String,

    // Profile store
    pub store: StoreConfig,

    // Security settings
    pub cors_allowed_origins: Option<String>,
}

/// Default realtime model when none is configured.
const DEFAULT_REALTIME_MODEL: &str = "gpt-4o-realtime-preview";

/// Default summarization model when none is configured.
const DEFAULT_SUMMARY_MODEL: &str = "gpt-4o-mini";

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            environment: Environment::default(),
            openai_api_key: None,
            realtime_model: DEFAULT_REALTIME_MODEL.to_string(),
            summary_model: DEFAULT_SUMMARY_MODEL.to_string(),
            store: StoreConfig::default(),
            cors_allowed_origins: None,
        }
    }
}

/// YAML representation of the configuration file.
///
/// Every field is optional; missing fields fall back to the environment.
#[derive(Debug, Default, Deserialize)]
struct YamlConfig {
    host: Option<String>,
    port: Option<u16>,
    environment: Option<String>,
    openai_api_key: Option<String>,
    realtime_model: Option<String>,
    summary_model: Option<String>,
    store: Option<YamlStoreConfig>,
    cors_allowed_origins: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct YamlStoreConfig {
    backend: Option<String>,
    base_url: Option<String>,
    api_key: Option<String>,
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

impl ServerConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> AppResult<Self> {
        let defaults = Self::default();

        let port = match env_var("PORT") {
            Some(raw) => raw
                .parse::<u16>()
                .map_err(|e| AppError::Config(format!("Invalid PORT '{raw}': {e}")))?,
            None => defaults.port,
        };

        let backend = match env_var("PROFILE_STORE_BACKEND").as_deref() {
            Some("http") => StoreBackend::Http,
            Some("memory") | None => StoreBackend::Memory,
            Some(other) => {
                return Err(AppError::Config(format!(
                    "Unknown PROFILE_STORE_BACKEND '{other}' (expected 'http' or 'memory')"
                )));
            }
        };

        let config = Self {
            host: env_var("HOST").unwrap_or(defaults.host),
            port,
            environment: env_var("ENVIRONMENT")
                .map(|v| Environment::parse(&v))
                .unwrap_or_default(),
            openai_api_key: env_var("OPENAI_API_KEY"),
            realtime_model: env_var("REALTIME_MODEL").unwrap_or(defaults.realtime_model),
            summary_model: env_var("SUMMARY_MODEL").unwrap_or(defaults.summary_model),
            store: StoreConfig {
                backend,
                base_url: env_var("PROFILE_STORE_URL"),
                api_key: env_var("PROFILE_STORE_API_KEY"),
            },
            cors_allowed_origins: env_var("CORS_ALLOWED_ORIGINS"),
        };

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file, falling back to environment
    /// variables for anything the file leaves unset.
    pub fn from_file(path: &PathBuf) -> AppResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("Failed to read config {}: {e}", path.display()))
        })?;
        let yaml: YamlConfig = serde_yaml::from_str(&raw).map_err(|e| {
            AppError::Config(format!("Failed to parse config {}: {e}", path.display()))
        })?;

        let mut config = Self::from_env()?;

        if let Some(host) = yaml.host {
            config.host = host;
        }
        if let Some(port) = yaml.port {
            config.port = port;
        }
        if let Some(environment) = yaml.environment {
            config.environment = Environment::parse(&environment);
        }
        if let Some(key) = yaml.openai_api_key {
            config.openai_api_key = Some(key);
        }
        if let Some(model) = yaml.realtime_model {
            config.realtime_model = model;
        }
        if let Some(model) = yaml.summary_model {
            config.summary_model = model;
        }
        if let Some(store) = yaml.store {
            if let Some(backend) = store.backend {
                config.store.backend = match backend.as_str() {
                    "http" => StoreBackend::Http,
                    "memory" => StoreBackend::Memory,
                    other => {
                        return Err(AppError::Config(format!(
                            "Unknown store backend '{other}' (expected 'http' or 'memory')"
                        )));
                    }
                };
            }
            if let Some(url) = store.base_url {
                config.store.base_url = Some(url);
            }
            if let Some(key) = store.api_key {
                config.store.api_key = Some(key);
            }
        }
        if let Some(origins) = yaml.cors_allowed_origins {
            config.cors_allowed_origins = Some(origins);
        }

        config.validate()?;
        Ok(config)
    }

    /// Bind address in `host:port` form.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn validate(&self) -> AppResult<()> {
        if self.store.backend == StoreBackend::Http && self.store.base_url.is_none() {
            return Err(AppError::Config(
                "PROFILE_STORE_URL is required when PROFILE_STORE_BACKEND=http".to_string(),
            ));
        }
        Ok(())
    }
}
