//! Shared test scaffolding for `grok-proxy`: an in-memory
//! [`PersistenceGateway`](grok_service::services::persistence::PersistenceGateway)
//! fake, a `wiremock`-backed fake upstream, and builders for the session/
//! request fixtures the end-to-end scenarios exercise.
//!
//! A separate crate so `grok-service`'s own `dev-dependencies` and its
//! downstream integration tests share one set of fakes instead of each
//! reimplementing them.

pub mod fake_persistence;
pub mod fake_upstream;
pub mod fixtures;
pub mod polling;

#[cfg(feature = "postgres-test-container")]
pub mod postgres_container;

pub use fake_persistence::FakePersistenceGateway;
pub use fixtures::{config_builder, session_builder, test_config};

/// Default timeout used by the polling helpers in [`polling`].
pub const TEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);
