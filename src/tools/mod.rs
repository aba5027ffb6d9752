//! Model-invoked tool dispatch.
//!
//! Tool calls are inbound remote procedure calls from the model. Each tool
//! maps (session id, JSON arguments) to a result envelope; a result is
//! always produced, never an error, because the model must receive an
//! answer for every call id regardless of outcome. Transport framing (how
//! the result travels back upstream) is the connection task's concern.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::session::{ContextManager, PatientInfo, Persona};

pub const TOOL_UPDATE_PATIENT_INFO: &str = "update_patient_info";
pub const TOOL_DETECT_LANGUAGE: &str = "detect_language";

/// Result of one tool invocation.
#[derive(Debug)]
pub struct ToolOutcome {
    /// `{success, message?, ...}` envelope returned to the model
    pub result: Value,
    /// Set when the tool switched the session language; the connection task
    /// reconfigures upstream and notifies the client.
    pub language_changed: Option<(String, Persona)>,
}

impl ToolOutcome {
    fn ok(result: Value) -> Self {
        Self {
            result,
            language_changed: None,
        }
    }

    fn failure(message: String) -> Self {
        Self {
            result: json!({ "success": false, "message": message }),
            language_changed: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct DetectLanguageArgs {
    language: String,
}

/// Dispatches tool calls by name against the context manager.
#[derive(Clone)]
pub struct ToolRouter {
    context: Arc<ContextManager>,
}

impl ToolRouter {
    pub fn new(context: Arc<ContextManager>) -> Self {
        Self { context }
    }

    pub async fn dispatch(&self, session_id: &str, name: &str, arguments: &str) -> ToolOutcome {
        info!(session_id, tool = name, "Tool call");
        match name {
            TOOL_UPDATE_PATIENT_INFO => self.update_patient_info(session_id, arguments).await,
            TOOL_DETECT_LANGUAGE => self.detect_language(session_id, arguments).await,
            _ => {
                warn!(session_id, tool = name, "Unknown tool requested");
                ToolOutcome::failure(format!("Unknown tool: {name}"))
            }
        }
    }

    async fn update_patient_info(&self, session_id: &str, arguments: &str) -> ToolOutcome {
        let partial: PatientInfo = match serde_json::from_str(arguments) {
            Ok(partial) => partial,
            Err(e) => {
                warn!(session_id, error = %e, "Malformed update_patient_info arguments");
                return ToolOutcome::failure(format!("Invalid arguments: {e}"));
            }
        };

        self.context.update_patient_info(session_id, partial).await;
        ToolOutcome::ok(json!({
            "success": true,
            "message": "Patient information recorded."
        }))
    }

    async fn detect_language(&self, session_id: &str, arguments: &str) -> ToolOutcome {
        let args: DetectLanguageArgs = match serde_json::from_str(arguments) {
            Ok(args) => args,
            Err(e) => {
                warn!(session_id, error = %e, "Malformed detect_language arguments");
                return ToolOutcome::failure(format!("Invalid arguments: {e}"));
            }
        };

        let current = self
            .context
            .registry()
            .with_session(session_id, |s| s.language.clone());
        let current = match current {
            Some(language) => language,
            None => return ToolOutcome::failure("Session not found.".to_string()),
        };

        if current == args.language {
            return ToolOutcome::ok(json!({
                "success": true,
                "message": "Language unchanged, continue the conversation as before."
            }));
        }

        match self.context.update_language(session_id, &args.language).await {
            Ok(Some(persona)) => ToolOutcome {
                result: json!({
                    "success": true,
                    "agent_name": persona.name,
                    "message": format!(
                        "Language switched to {}. You are now {}; greet the caller \
                         again briefly in the new language and continue.",
                        args.language, persona.name
                    ),
                }),
                language_changed: Some((args.language, persona)),
            },
            Ok(None) => ToolOutcome::failure("Session not found.".to_string()),
            Err(e) => {
                warn!(session_id, error = %e, "Language switch failed");
                ToolOutcome::failure(format!("Could not switch language: {e}"))
            }
        }
    }
}
