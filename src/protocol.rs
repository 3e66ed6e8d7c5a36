//! Wire messages exchanged with the playback-state backend.
//!
//! Every frame is a JSON text message of the form
//! `{"event": "<name>", "data": <payload>}`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Backend's last known playback state for the session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackSnapshot {
    pub track_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position_seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_paused: Option<bool>,
}

impl PlaybackSnapshot {
    /// Position to seek to, clamped to be non-negative and finite
    pub fn seek_position(&self) -> Option<f64> {
        self.position_seconds
            .map(|seconds| if seconds.is_finite() { seconds.max(0.0) } else { 0.0 })
    }
}

/// Local playback state published to the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncEvent {
    pub track_id: String,
    pub position_seconds: u64,
    pub is_paused: bool,
}

impl SyncEvent {
    /// Build an event from an elapsed time, flooring it to whole seconds
    pub fn new(track_id: impl Into<String>, elapsed_seconds: f64, is_paused: bool) -> Self {
        Self {
            track_id: track_id.into(),
            position_seconds: whole_seconds(elapsed_seconds),
            is_paused,
        }
    }
}

fn whole_seconds(elapsed: f64) -> u64 {
    if elapsed.is_finite() && elapsed > 0.0 {
        elapsed.floor() as u64
    } else {
        0
    }
}

/// Messages sent to the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum Outbound {
    RequestState,
    Sync(SyncEvent),
}

/// Messages received from the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum Inbound {
    State(PlaybackSnapshot),
    Error { message: String },
}

impl Outbound {
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

impl Inbound {
    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }
}
