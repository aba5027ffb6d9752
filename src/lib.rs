//! MedVoice Gateway - realtime voice consultation relay.
//!
//! Relays live voice conversations between end-user clients and the
//! upstream realtime AI provider while maintaining per-conversation state:
//! persona, language, collected patient profile and transcript. Tool calls
//! from the model (profile capture, language detection) are executed against
//! that state and answered in-band.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod routes;
pub mod session;
pub mod state;
pub mod store;
pub mod summary;
pub mod tools;
pub mod upstream;

// Re-export commonly used items for convenience
pub use config::ServerConfig;
pub use errors::app_error::{AppError, AppResult};
pub use session::ContextManager;
pub use state::AppState;
