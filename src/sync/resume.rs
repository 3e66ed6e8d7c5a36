use crate::config::ResumeRearm;
use crate::playback::{PlaybackAdapter, PlaybackError};
use crate::protocol::PlaybackSnapshot;
use crate::transport::ConnectionEpoch;
use tracing::{debug, error, info};

/// Resume progress within the current epoch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResumeState {
    #[default]
    Idle,
    Applying,
    Applied,
}

/// Result of offering a snapshot to the applier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeOutcome {
    /// Every adapter call succeeded
    Applied,
    /// An adapter call failed; the epoch's resume is still consumed
    Degraded,
    /// Resume was already consumed, nothing was called
    Ignored,
}

/// Applies at most one remote snapshot to the local player per epoch
pub struct ResumeApplier {
    state: ResumeState,
    rearm: ResumeRearm,
    epoch: Option<ConnectionEpoch>,
    /// Track identity the applier last saw selected locally
    local_track: Option<String>,
    /// Track the consumed resume asked the player to load
    resumed_track: Option<String>,
}

impl ResumeApplier {
    pub fn new(rearm: ResumeRearm, local_track: Option<String>) -> Self {
        Self {
            state: ResumeState::Idle,
            rearm,
            epoch: None,
            local_track,
            resumed_track: None,
        }
    }

    pub fn state(&self) -> ResumeState {
        self.state
    }

    pub fn begin_epoch(&mut self, epoch: ConnectionEpoch) {
        self.epoch = Some(epoch);
        if self.rearm == ResumeRearm::OnReconnect {
            self.rearm_now();
        }
    }

    pub fn end_epoch(&mut self) {
        self.epoch = None;
    }

    /// Re-arm when the locally selected track changes. Returns true on a change.
    pub fn observe_track(&mut self, track_id: Option<&str>) -> bool {
        if self.local_track.as_deref() == track_id {
            return false;
        }

        self.local_track = track_id.map(str::to_string);
        if self.resumed_track.is_some() && self.resumed_track.as_deref() == track_id {
            // Late report of the load this resume caused itself
            return false;
        }

        if self.state != ResumeState::Idle {
            debug!("Resume re-armed by local track change to {:?}", track_id);
        }
        self.rearm_now();
        true
    }

    fn rearm_now(&mut self) {
        self.state = ResumeState::Idle;
        self.resumed_track = None;
    }

    /// Offer a snapshot. Only the first offer while `Idle` reaches the player.
    pub async fn apply(
        &mut self,
        snapshot: &PlaybackSnapshot,
        player: &dyn PlaybackAdapter,
    ) -> ResumeOutcome {
        if self.state != ResumeState::Idle {
            debug!(
                "Ignoring snapshot for {} (resume {:?} in epoch {:?})",
                snapshot.track_id, self.state, self.epoch
            );
            return ResumeOutcome::Ignored;
        }

        self.state = ResumeState::Applying;
        self.resumed_track = Some(snapshot.track_id.clone());
        info!(
            "Resuming {} at {:?}s (paused: {:?})",
            snapshot.track_id, snapshot.position_seconds, snapshot.is_paused
        );

        let outcome = match self.drive(snapshot, player).await {
            Ok(()) => ResumeOutcome::Applied,
            Err(e) => {
                error!("Resume of {} failed: {}", snapshot.track_id, e);
                ResumeOutcome::Degraded
            }
        };

        // Whatever the player ended up on is not a user track change,
        // whether or not every call succeeded
        self.local_track = player.current().track_id;
        self.state = ResumeState::Applied;
        outcome
    }

    async fn drive(
        &self,
        snapshot: &PlaybackSnapshot,
        player: &dyn PlaybackAdapter,
    ) -> Result<(), PlaybackError> {
        player.start(&snapshot.track_id, false).await?;

        if let Some(position) = snapshot.seek_position() {
            player.seek(position).await?;
        }

        if snapshot.is_paused == Some(true) && player.current().is_playing {
            player.toggle_play_pause().await?;
        }

        Ok(())
    }
}
