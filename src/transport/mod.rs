//! Persistent bidirectional connection to the playback-state backend.
//!
//! A [`Transport`] opens a [`TransportLink`]. The link owns its own
//! reconnection policy: every successful (re)establishment is reported as
//! [`TransportEvent::Connected`] and every loss as
//! [`TransportEvent::Disconnected`], so the consumer never retries itself.

pub mod websocket;

use crate::credentials::Credential;
use crate::protocol::{Inbound, Outbound};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

pub use websocket::WsTransport;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Invalid credential header: {0}")]
    InvalidCredential(String),
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

/// One connect-to-disconnect cycle of a transport link, numbered from 1
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionEpoch(u64);

impl ConnectionEpoch {
    pub fn first() -> Self {
        ConnectionEpoch(1)
    }

    pub fn next(self) -> Self {
        ConnectionEpoch(self.0 + 1)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ConnectionEpoch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What the transport reports to its consumer
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A link is (re)established and `epoch` starts
    Connected { epoch: ConnectionEpoch },
    Message(Inbound),
    Disconnected { reason: String },
    /// Transport-level fault such as a failed connect attempt
    Error(String),
}

/// One live transport: inbound events, outbound queue and its teardown
pub struct TransportLink {
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
    outbound: mpsc::UnboundedSender<(ConnectionEpoch, Outbound)>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl TransportLink {
    pub fn new(
        events: mpsc::UnboundedReceiver<TransportEvent>,
        outbound: mpsc::UnboundedSender<(ConnectionEpoch, Outbound)>,
        shutdown: oneshot::Sender<()>,
        task: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            events,
            outbound,
            shutdown: Some(shutdown),
            task,
        }
    }

    /// Queue a message for `epoch`; the transport drops it if that epoch is over.
    /// Delivery is best effort and never acknowledged.
    pub fn send(&self, epoch: ConnectionEpoch, message: Outbound) -> bool {
        self.outbound.send((epoch, message)).is_ok()
    }

    /// Close the connection and wait for the transport task to finish
    pub async fn close(self) {
        let TransportLink {
            mut events,
            outbound,
            shutdown,
            task,
        } = self;

        events.close();
        drop(outbound);
        if let Some(shutdown) = shutdown {
            let _ = shutdown.send(());
        }
        if let Some(task) = task {
            if let Err(e) = task.await {
                debug!("Transport task ended abnormally: {}", e);
            }
        }
    }
}

/// Factory for transport links (allows mocking for tests)
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Start connecting with `credential`; connection progress arrives as events
    async fn connect(&self, credential: &Credential) -> Result<TransportLink, TransportError>;
}
