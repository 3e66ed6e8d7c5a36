//! Playback-position synchronization.
//!
//! [`SyncService`] follows the host session: a complete credential starts the
//! [`ConnectionManager`], losing it stops the manager. Each running connection
//! is served by one session task that resumes from the backend snapshot once
//! per epoch and publishes the local position at a bounded rate.

pub mod connection;
pub mod resume;
pub mod scheduler;
mod session;

pub use connection::ConnectionManager;
pub use resume::{ResumeApplier, ResumeOutcome, ResumeState};
pub use scheduler::SyncScheduler;
pub use session::ConnectionStatus;

use crate::config::Config;
use crate::credentials::Session;
use crate::playback::PlaybackAdapter;
use crate::transport::Transport;
use std::sync::Arc;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Handle to the running sync service
pub struct SyncHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
    status: watch::Receiver<ConnectionStatus>,
}

impl SyncHandle {
    pub fn status(&self) -> ConnectionStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    /// Host teardown: stops the connection and waits until all sync work has ended
    pub async fn shutdown(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Sync service ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for SyncHandle {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

/// Drives the connection manager from session changes
pub struct SyncService {
    manager: ConnectionManager,
    sessions: watch::Receiver<Session>,
    shutdown: oneshot::Receiver<()>,
}

impl SyncService {
    pub fn start(
        config: Config,
        transport: Arc<dyn Transport>,
        player: Arc<dyn PlaybackAdapter>,
        sessions: watch::Receiver<Session>,
    ) -> SyncHandle {
        let manager = ConnectionManager::new(config, transport, player);
        let status = manager.status();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let service = SyncService {
            manager,
            sessions,
            shutdown: shutdown_rx,
        };
        let task = tokio::spawn(service.run());

        SyncHandle {
            shutdown: Some(shutdown_tx),
            task: Some(task),
            status,
        }
    }

    async fn run(mut self) {
        info!("SyncService started");
        self.reconcile().await;

        loop {
            tokio::select! {
                _ = &mut self.shutdown => break,
                changed = self.sessions.changed() => {
                    if changed.is_err() {
                        info!("Session source closed");
                        break;
                    }
                    self.reconcile().await;
                }
            }
        }

        self.manager.stop().await;
        info!("SyncService stopped");
    }

    async fn reconcile(&mut self) {
        let credential = self.sessions.borrow_and_update().credential();
        match credential {
            Some(credential) => self.manager.start(credential).await,
            None => {
                if self.manager.is_active() {
                    info!("Credential lost, stopping sync");
                }
                self.manager.stop().await;
            }
        }
    }
}
