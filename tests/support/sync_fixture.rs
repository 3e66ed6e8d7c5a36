#![cfg(feature = "test-utils")]

use listen_sync::credentials::{AuthenticatedUser, BearerToken, SessionHandle};
use listen_sync::protocol::PlaybackSnapshot;
use listen_sync::test_support::{settle, MockLink, MockPlayback, MockServer, MockTransport};
use listen_sync::{Config, Session, SyncHandle, SyncService};
use std::sync::Arc;
use tracing::info;

use super::tracing_init;

/// A sync service wired to a mock player and a mock transport
pub struct SyncFixture {
    pub player: Arc<MockPlayback>,
    pub transport: Arc<MockTransport>,
    pub server: MockServer,
    pub session: SessionHandle,
    pub handle: Option<SyncHandle>,
}

impl SyncFixture {
    /// Start the service with a signed-out session
    pub fn start(config: Config) -> Self {
        tracing_init();

        let player = Arc::new(MockPlayback::new());
        let (transport, server) = MockTransport::new();
        let session = SessionHandle::new(Session::default());

        let handle = SyncService::start(
            config,
            transport.clone(),
            player.clone(),
            session.subscribe(),
        );

        Self {
            player,
            transport,
            server,
            session,
            handle: Some(handle),
        }
    }

    pub fn login(&self) {
        info!("Fixture: logging in");
        self.session.set_token(BearerToken::new("test-token").unwrap());
        self.session.login(AuthenticatedUser {
            user_id: "listener".to_string(),
        });
    }

    /// Log in, accept the link the client opens and report it connected
    pub async fn connect(&mut self) -> MockLink {
        self.login();
        let mut link = self.server.accept().await;
        link.connect();
        settle().await;
        link
    }

    pub fn status(&self) -> listen_sync::ConnectionStatus {
        self.handle.as_ref().expect("service already shut down").status()
    }

    pub async fn shutdown(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.shutdown().await;
        }
    }
}

pub fn snapshot(track_id: &str, position: Option<f64>, paused: Option<bool>) -> PlaybackSnapshot {
    PlaybackSnapshot {
        track_id: track_id.to_string(),
        position_seconds: position,
        is_paused: paused,
    }
}
