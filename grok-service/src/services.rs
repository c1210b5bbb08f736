//! Internal services composed by [`crate::ProxyServiceBuilder`].

pub mod health_loop;
pub mod persistence;
pub mod resilience;
pub mod session_pool;
pub mod telemetry;
pub mod upstream_client;
