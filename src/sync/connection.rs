use super::session::{ConnectionStatus, Session};
use crate::config::Config;
use crate::credentials::Credential;
use crate::playback::PlaybackAdapter;
use crate::transport::Transport;
use std::sync::Arc;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

struct ActiveConnection {
    credential: Credential,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Owns the single sync connection of an authenticated session
pub struct ConnectionManager {
    config: Config,
    transport: Arc<dyn Transport>,
    player: Arc<dyn PlaybackAdapter>,
    status: Arc<watch::Sender<ConnectionStatus>>,
    active: Option<ActiveConnection>,
}

impl ConnectionManager {
    pub fn new(
        config: Config,
        transport: Arc<dyn Transport>,
        player: Arc<dyn PlaybackAdapter>,
    ) -> Self {
        let (status, _rx) = watch::channel(ConnectionStatus::default());
        Self {
            config,
            transport,
            player,
            status: Arc::new(status),
            active: None,
        }
    }

    /// Open the connection for `credential`.
    ///
    /// A no-op when already running with the same credential; a different
    /// credential, or a session that has ended on its own, is replaced.
    /// Failures are logged and leave the manager inactive.
    pub async fn start(&mut self, credential: Credential) {
        if let Some(active) = &self.active {
            if active.task.is_finished() {
                info!("Previous sync session has ended, reconnecting");
                self.stop().await;
            } else if active.credential == credential {
                return;
            } else {
                info!("Credential changed, restarting sync connection");
                self.stop().await;
            }
        }

        let link = match self.transport.connect(&credential).await {
            Ok(link) => link,
            Err(e) => {
                warn!("Sync connection could not be opened: {}", e);
                return;
            }
        };

        info!("Starting sync connection for user {}", credential.user.user_id);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let session = Session::new(
            &self.config,
            link,
            self.player.clone(),
            shutdown_rx,
            self.status.clone(),
        );
        let task = tokio::spawn(session.run());

        self.active = Some(ActiveConnection {
            credential,
            shutdown: shutdown_tx,
            task,
        });
    }

    /// Tear the connection down; nothing runs on its behalf once this returns
    pub async fn stop(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };

        let _ = active.shutdown.send(());
        if let Err(e) = active.task.await {
            warn!("Sync session ended abnormally: {}", e);
        }
        self.status.send_replace(ConnectionStatus::default());
        info!("Sync connection stopped");
    }

    /// True while a session task is running for the current credential
    pub fn is_active(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| !active.task.is_finished())
    }

    pub fn is_connected(&self) -> bool {
        self.status.borrow().connected
    }

    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        // Cannot await here; the session tears itself down on the signal
        if let Some(active) = self.active.take() {
            let _ = active.shutdown.send(());
        }
    }
}
