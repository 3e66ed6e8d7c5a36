pub mod handle;

use crate::playback::adapter::PlaybackObservation;
pub use handle::PlaybackProgressHandle;
use std::time::Duration;

/// Engine-side playback state
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackState {
    Stopped,
    Loading { track_id: String },
    Playing { track_id: String, position: Duration },
    Paused { track_id: String, position: Duration },
}

/// Progress updates reported by the audio engine
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackProgress {
    StateChanged { state: PlaybackState },
    PositionUpdate { position: Duration, track_id: String },
    TrackCompleted { track_id: String },
}

impl PlaybackProgress {
    /// Fold this update into the observation the sync client reads
    pub fn apply_to(&self, observation: &mut PlaybackObservation) {
        match self {
            PlaybackProgress::StateChanged { state } => match state {
                PlaybackState::Stopped => *observation = PlaybackObservation::default(),
                PlaybackState::Loading { track_id } => {
                    *observation = PlaybackObservation {
                        track_id: Some(track_id.clone()),
                        time_seconds: 0.0,
                        is_playing: false,
                    };
                }
                PlaybackState::Playing { track_id, position } => {
                    *observation = PlaybackObservation {
                        track_id: Some(track_id.clone()),
                        time_seconds: position.as_secs_f64(),
                        is_playing: true,
                    };
                }
                PlaybackState::Paused { track_id, position } => {
                    *observation = PlaybackObservation {
                        track_id: Some(track_id.clone()),
                        time_seconds: position.as_secs_f64(),
                        is_playing: false,
                    };
                }
            },
            PlaybackProgress::PositionUpdate { position, track_id } => {
                // Late updates from a previous track are dropped
                if observation.track_id.as_deref() == Some(track_id.as_str()) {
                    observation.time_seconds = position.as_secs_f64();
                }
            }
            PlaybackProgress::TrackCompleted { track_id } => {
                if observation.track_id.as_deref() == Some(track_id.as_str()) {
                    observation.is_playing = false;
                }
            }
        }
    }
}
