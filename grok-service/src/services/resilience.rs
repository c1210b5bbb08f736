//! The resilience layer: circuit breaker plus the per-request coordinator
//! state machine built on top of it.

pub mod circuit_breaker;
pub mod coordinator;
