//! # API module
//!
//! Entry point for all API version modules. Currently exposes the
//! OpenAI-compatible chat-completions types under [`v1`].

pub mod v1;
