//! Application error types.
//!
//! One taxonomy for the whole gateway. Persistence failures are only fatal
//! during session creation; everywhere else callers log and continue.

use thiserror::Error;

/// Errors that can occur while running the gateway.
#[derive(Debug, Error)]
pub enum AppError {
    /// Configuration is missing or invalid
    #[error("Configuration error: {0}")]
    Config(String),

    /// Profile store operation failed
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Upstream realtime connection failed or dropped
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Session lookup or lifecycle violation
    #[error("Session error: {0}")]
    Session(String),

    /// Serialization of a wire message failed
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type for gateway operations.
pub type AppResult<T> = Result<T, AppError>;

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(e: reqwest::Error) -> Self {
        AppError::Persistence(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AppError::Persistence("row insert failed".to_string());
        assert!(err.to_string().contains("Persistence error"));

        let err = AppError::Session("unknown id".to_string());
        assert_eq!(err.to_string(), "Session error: unknown id");
    }

    #[test]
    fn test_from_serde_json() {
        let bad: Result<serde_json::Value, _> = serde_json::from_str("{not json");
        let err: AppError = bad.unwrap_err().into();
        assert!(matches!(err, AppError::Serialization(_)));
    }
}
