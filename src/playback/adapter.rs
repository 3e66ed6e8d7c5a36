use thiserror::Error;
use tokio::sync::watch;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlaybackError {
    #[error("Playback engine unavailable")]
    EngineUnavailable,
    #[error("Track could not be started: {0}")]
    StartFailed(String),
    #[error("Invalid seek position: {0}")]
    InvalidPosition(f64),
    #[error("Playback engine rejected command: {0}")]
    Rejected(String),
}

/// What the local player is doing right now
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaybackObservation {
    /// Locally selected track, if any
    pub track_id: Option<String>,
    /// Elapsed time in the selected track
    pub time_seconds: f64,
    pub is_playing: bool,
}

/// Control and observation surface of the local audio engine (allows mocking for tests)
#[async_trait::async_trait]
pub trait PlaybackAdapter: Send + Sync {
    /// Load `track_id`; with `autoplay` false the track is left paused at 0
    async fn start(&self, track_id: &str, autoplay: bool) -> Result<(), PlaybackError>;
    async fn seek(&self, seconds: f64) -> Result<(), PlaybackError>;
    async fn toggle_play_pause(&self) -> Result<(), PlaybackError>;

    fn current(&self) -> PlaybackObservation;

    /// Receiver that is notified on every observable change
    fn watch(&self) -> watch::Receiver<PlaybackObservation>;
}
