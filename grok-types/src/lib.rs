#![deny(missing_docs)]
//! Shared types for `grok-proxy`.
//!
//! This crate groups together the strongly-typed values passed between the
//! HTTP surface, the persistence gateway, and the core reverse-proxy
//! subsystems (session pool, upstream client, resilience coordinator). It
//! provides:
//!
//! * The [`session`] model: a cookie-backed credential entity and its status
//!   lifecycle.
//! * The [`generation`] and [`token_usage`] models: durable records of one
//!   inbound request and its billing-relevant token accounting.
//! * [`outcome`]: the attempt-outcome classification shared by the upstream
//!   client, the session pool, and the telemetry sink.
//! * OpenAI-compatible request/response types under [`api::v1`].
//!
//! No I/O lives in this crate; it only defines data.

pub mod api;
pub mod error;
pub mod generation;
pub mod outcome;
pub mod session;
pub mod token_usage;

pub use error::ProxyErrorKind;
pub use generation::Generation;
pub use outcome::AttemptOutcome;
pub use session::{Session, SessionStatus};
pub use token_usage::TokenUsage;
