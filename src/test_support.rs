// Test support utilities for both unit and integration tests

use crate::credentials::Credential;
use crate::playback::{PlaybackAdapter, PlaybackError, PlaybackObservation};
use crate::protocol::{Inbound, Outbound, PlaybackSnapshot};
use crate::transport::{ConnectionEpoch, Transport, TransportError, TransportEvent, TransportLink};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;

/// A call made on [`MockPlayback`]
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackCall {
    Start { track_id: String, autoplay: bool },
    Seek(f64),
    TogglePlayPause,
}

/// In-memory player that records every control call.
///
/// `start` selects the track and rewinds it but only touches the playing
/// flag when `autoplay` is set, like an engine whose transport keeps running
/// across track loads.
pub struct MockPlayback {
    calls: Mutex<Vec<PlaybackCall>>,
    state: watch::Sender<PlaybackObservation>,
    start_error: Mutex<Option<PlaybackError>>,
    load_before_failing: AtomicBool,
}

impl Default for MockPlayback {
    fn default() -> Self {
        let (state, _rx) = watch::channel(PlaybackObservation::default());
        MockPlayback {
            calls: Mutex::new(Vec::new()),
            state,
            start_error: Mutex::new(None),
            load_before_failing: AtomicBool::new(false),
        }
    }
}

impl MockPlayback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<PlaybackCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    /// Make every following `start` fail with `error`
    pub fn fail_start(&self, error: PlaybackError) {
        *self.start_error.lock().unwrap() = Some(error);
    }

    /// Like [`fail_start`](Self::fail_start), but the track is selected
    /// before the error is returned, as an engine that fails mid-load does
    pub fn fail_start_after_load(&self, error: PlaybackError) {
        self.load_before_failing.store(true, Ordering::SeqCst);
        self.fail_start(error);
    }

    /// Simulate the user picking a track (no call is recorded)
    pub fn select_track(&self, track_id: Option<&str>) {
        self.state.send_modify(|state| {
            state.track_id = track_id.map(str::to_string);
            state.time_seconds = 0.0;
        });
    }

    pub fn set_time(&self, seconds: f64) {
        self.state.send_modify(|state| state.time_seconds = seconds);
    }

    pub fn set_playing(&self, playing: bool) {
        self.state.send_modify(|state| state.is_playing = playing);
    }

    fn record(&self, call: PlaybackCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait::async_trait]
impl PlaybackAdapter for MockPlayback {
    async fn start(&self, track_id: &str, autoplay: bool) -> Result<(), PlaybackError> {
        self.record(PlaybackCall::Start {
            track_id: track_id.to_string(),
            autoplay,
        });
        let error = self.start_error.lock().unwrap().clone();
        if let Some(error) = &error {
            if !self.load_before_failing.load(Ordering::SeqCst) {
                return Err(error.clone());
            }
        }

        self.state.send_modify(|state| {
            state.track_id = Some(track_id.to_string());
            state.time_seconds = 0.0;
            if autoplay {
                state.is_playing = true;
            }
        });
        match error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn seek(&self, seconds: f64) -> Result<(), PlaybackError> {
        self.record(PlaybackCall::Seek(seconds));
        self.set_time(seconds);
        Ok(())
    }

    async fn toggle_play_pause(&self) -> Result<(), PlaybackError> {
        self.record(PlaybackCall::TogglePlayPause);
        self.state.send_modify(|state| state.is_playing = !state.is_playing);
        Ok(())
    }

    fn current(&self) -> PlaybackObservation {
        self.state.borrow().clone()
    }

    fn watch(&self) -> watch::Receiver<PlaybackObservation> {
        self.state.subscribe()
    }
}

/// A message the client handed to a [`MockLink`]
#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub at: Instant,
    pub epoch: ConnectionEpoch,
    pub message: Outbound,
}

/// Transport whose links are driven by the test through [`MockLink`]
pub struct MockTransport {
    links_tx: mpsc::UnboundedSender<MockLink>,
    connects: AtomicUsize,
    connect_error: Mutex<Option<String>>,
}

/// Test side of [`MockTransport`]: hands out the links the client opened
pub struct MockServer {
    links_rx: mpsc::UnboundedReceiver<MockLink>,
}

impl MockTransport {
    pub fn new() -> (Arc<Self>, MockServer) {
        let (links_tx, links_rx) = mpsc::unbounded_channel();
        let transport = MockTransport {
            links_tx,
            connects: AtomicUsize::new(0),
            connect_error: Mutex::new(None),
        };
        (Arc::new(transport), MockServer { links_rx })
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Make every following `connect` fail
    pub fn fail_connect(&self, reason: &str) {
        *self.connect_error.lock().unwrap() = Some(reason.to_string());
    }
}

#[async_trait::async_trait]
impl Transport for MockTransport {
    async fn connect(&self, credential: &Credential) -> Result<TransportLink, TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = self.connect_error.lock().unwrap().clone() {
            return Err(TransportError::InvalidEndpoint(reason));
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        // Timestamp messages as they are queued so tests can check spacing
        let sent = Arc::new(Mutex::new(Vec::new()));
        let sent_by_forwarder = sent.clone();
        tokio::spawn(async move {
            while let Some((epoch, message)) = outbound_rx.recv().await {
                sent_by_forwarder.lock().unwrap().push(SentMessage {
                    at: Instant::now(),
                    epoch,
                    message,
                });
            }
        });

        let link = MockLink {
            credential: credential.clone(),
            events: events_tx,
            sent,
            shutdown: shutdown_rx,
            epoch: None,
        };
        let _ = self.links_tx.send(link);

        Ok(TransportLink::new(events_rx, outbound_tx, shutdown_tx, None))
    }
}

impl MockServer {
    /// Wait for the client to open its next link
    pub async fn accept(&mut self) -> MockLink {
        self.links_rx
            .recv()
            .await
            .expect("mock transport dropped")
    }

    pub fn try_accept(&mut self) -> Option<MockLink> {
        self.links_rx.try_recv().ok()
    }
}

/// Server end of one link opened through [`MockTransport`]
pub struct MockLink {
    pub credential: Credential,
    events: mpsc::UnboundedSender<TransportEvent>,
    sent: Arc<Mutex<Vec<SentMessage>>>,
    shutdown: oneshot::Receiver<()>,
    epoch: Option<ConnectionEpoch>,
}

impl MockLink {
    /// Report an established connection, starting the next epoch
    pub fn connect(&mut self) -> ConnectionEpoch {
        let epoch = self
            .epoch
            .map_or_else(ConnectionEpoch::first, ConnectionEpoch::next);
        self.epoch = Some(epoch);
        let _ = self.events.send(TransportEvent::Connected { epoch });
        epoch
    }

    pub fn disconnect(&self, reason: &str) {
        let _ = self.events.send(TransportEvent::Disconnected {
            reason: reason.to_string(),
        });
    }

    pub fn transport_error(&self, message: &str) {
        let _ = self.events.send(TransportEvent::Error(message.to_string()));
    }

    pub fn send_state(&self, snapshot: PlaybackSnapshot) {
        let _ = self
            .events
            .send(TransportEvent::Message(Inbound::State(snapshot)));
    }

    pub fn send_error(&self, message: &str) {
        let _ = self.events.send(TransportEvent::Message(Inbound::Error {
            message: message.to_string(),
        }));
    }

    /// Every message the client queued so far, in order
    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_messages(&self) -> Vec<Outbound> {
        self.sent().into_iter().map(|sent| sent.message).collect()
    }

    pub fn sync_count(&self) -> usize {
        self.sent_messages()
            .iter()
            .filter(|message| matches!(message, Outbound::Sync(_)))
            .count()
    }

    /// True once the client asked to close this link
    pub fn is_closed(&mut self) -> bool {
        !matches!(
            self.shutdown.try_recv(),
            Err(oneshot::error::TryRecvError::Empty)
        )
    }
}

/// Let every task woken so far run to completion.
/// Under a paused clock this does not move time forward noticeably.
pub async fn settle() {
    tokio::time::sleep(std::time::Duration::from_millis(1)).await;
}
