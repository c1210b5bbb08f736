use std::sync::Arc;

use axum_test::TestServer;
use grok_service::ProxyServiceBuilder;
use grok_service::services::persistence::PersistenceGateway;
use grok_test_utils::fake_persistence::FakePersistenceGateway;
use grok_test_utils::fixtures::ConfigBuilder;
use grok_test_utils::{fake_upstream, fixtures};
use grok_types::Session;
use tokio_util::sync::CancellationToken;
use wiremock::MockServer;

/// A running proxy over fakes: an in-memory persistence gateway, a
/// `wiremock` upstream, and an `axum-test` client talking to the real
/// router.
pub struct TestProxy {
    pub server: TestServer,
    pub persistence: FakePersistenceGateway,
    pub upstream: MockServer,
    cancellation_token: CancellationToken,
}

impl TestProxy {
    /// Starts a fresh upstream and proxy, seeding `sessions` into the
    /// persistence gateway before the pool's initial reload, and applying
    /// `configure` over the test defaults.
    pub async fn start(sessions: Vec<Session>, configure: impl FnOnce(ConfigBuilder) -> ConfigBuilder) -> Self {
        let upstream = fake_upstream::start().await;
        let persistence = FakePersistenceGateway::new();
        for session in sessions {
            persistence.seed(session);
        }

        let config = configure(fixtures::config_builder(upstream.uri())).build();
        let persistence_gateway: Arc<dyn PersistenceGateway> = Arc::new(persistence.clone());
        let service = ProxyServiceBuilder::new(config).build(persistence_gateway).await.expect("service builds");
        let server = TestServer::builder().http_transport().build(service.router).expect("test server builds");

        TestProxy { server, persistence, upstream, cancellation_token: service.cancellation_token }
    }

    /// The bearer token accepted by [`fixtures::config_builder`]'s default
    /// `api_keys`.
    pub const API_KEY: &'static str = "test-api-key";
}

impl Drop for TestProxy {
    fn drop(&mut self) {
        self.cancellation_token.cancel();
    }
}
