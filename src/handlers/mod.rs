//! HTTP/WebSocket request handlers.

pub mod voice;
