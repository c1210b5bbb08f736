//! The inbound HTTP surface: OpenAI-compatible chat completions, `/health`,
//! and the admin session-management wrappers.

pub mod admin;
pub mod chat;
pub mod errors;
pub mod health;
