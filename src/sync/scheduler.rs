use crate::playback::PlaybackObservation;
use crate::protocol::SyncEvent;
use std::time::Duration;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, trace};

/// Rate-limited, periodic publication of the local playback state
pub struct SyncScheduler {
    min_interval: Duration,
    cadence: Duration,
    last_emitted: Option<Instant>,
    ticker: Option<Interval>,
}

impl SyncScheduler {
    pub fn new(min_interval: Duration, cadence: Duration) -> Self {
        Self {
            min_interval,
            cadence,
            last_emitted: None,
            ticker: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.ticker.is_some()
    }

    /// Build a fresh recurring schedule, cancelling any previous one first
    pub fn activate(&mut self) {
        self.deactivate();

        let mut ticker = interval_at(Instant::now() + self.cadence, self.cadence);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.ticker = Some(ticker);
        debug!("Sync schedule active every {:?}", self.cadence);
    }

    pub fn deactivate(&mut self) {
        if self.ticker.take().is_some() {
            debug!("Sync schedule cancelled");
        }
    }

    /// Resolves on the next recurring tick; never resolves while inactive
    pub async fn tick(&mut self) {
        match self.ticker.as_mut() {
            Some(ticker) => {
                ticker.tick().await;
            }
            None => std::future::pending::<()>().await,
        }
    }

    /// Build the next event if the schedule is active and the rate limit allows it
    pub fn try_emit(&mut self, observation: &PlaybackObservation) -> Option<SyncEvent> {
        if !self.is_active() {
            return None;
        }
        let track_id = observation.track_id.as_ref()?;

        let now = Instant::now();
        if let Some(last) = self.last_emitted {
            if now.duration_since(last) < self.min_interval {
                trace!("Sync suppressed by rate limit");
                return None;
            }
        }

        self.last_emitted = Some(now);
        Some(SyncEvent::new(
            track_id.clone(),
            observation.time_seconds,
            !observation.is_playing,
        ))
    }
}
