//! Upstream realtime provider integration.
//!
//! [`messages`] models the provider wire protocol, [`instructions`] builds
//! session configuration from conversation state, and [`client`] owns the
//! per-session socket tasks and the translation to the client-facing event
//! vocabulary.

pub mod client;
pub mod instructions;
pub mod messages;

pub use client::UpstreamClient;
pub use messages::{ClientEvent, ServerEvent};
