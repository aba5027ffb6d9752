//! Client-facing voice session gateway.

pub mod handler;
pub mod messages;

pub use handler::voice_handler;
