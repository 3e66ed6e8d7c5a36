// # Sync Session
//
// One task per active connection. It owns the transport link, the resume
// applier and the sync scheduler, and handles every event in sequence, so
// two snapshot handlers can never interleave.

use super::resume::{ResumeApplier, ResumeOutcome, ResumeState};
use super::scheduler::SyncScheduler;
use crate::config::Config;
use crate::playback::{PlaybackAdapter, PlaybackObservation};
use crate::protocol::{Inbound, Outbound, PlaybackSnapshot};
use crate::transport::{ConnectionEpoch, TransportEvent, TransportLink};
use std::sync::Arc;
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

/// Connection state visible to the host
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub epoch: Option<ConnectionEpoch>,
    pub resume: ResumeState,
}

enum Flow {
    Continue,
    Shutdown,
}

pub(crate) struct Session {
    link: TransportLink,
    player: Arc<dyn PlaybackAdapter>,
    observations: watch::Receiver<PlaybackObservation>,
    observing: bool,
    shutdown: oneshot::Receiver<()>,
    status: Arc<watch::Sender<ConnectionStatus>>,
    resume: ResumeApplier,
    scheduler: SyncScheduler,
    epoch: Option<ConnectionEpoch>,
    observed_track: Option<String>,
}

impl Session {
    pub(crate) fn new(
        config: &Config,
        link: TransportLink,
        player: Arc<dyn PlaybackAdapter>,
        shutdown: oneshot::Receiver<()>,
        status: Arc<watch::Sender<ConnectionStatus>>,
    ) -> Self {
        let observations = player.watch();
        let observed_track = player.current().track_id;

        Self {
            link,
            observations,
            observing: true,
            shutdown,
            status,
            resume: ResumeApplier::new(config.resume_rearm, observed_track.clone()),
            scheduler: SyncScheduler::new(config.min_interval, config.cadence),
            epoch: None,
            observed_track,
            player,
        }
    }

    pub(crate) async fn run(mut self) {
        loop {
            let flow = tokio::select! {
                _ = &mut self.shutdown => Flow::Shutdown,
                event = self.link.events.recv() => match event {
                    Some(event) => self.on_transport_event(event).await,
                    None => {
                        warn!("Transport ended, sync session stopping");
                        Flow::Shutdown
                    }
                },
                changed = self.observations.changed(), if self.observing => {
                    match changed {
                        Ok(()) => self.on_playback_changed(),
                        Err(_) => {
                            warn!("Playback observations closed");
                            self.observing = false;
                        }
                    }
                    Flow::Continue
                }
                _ = self.scheduler.tick() => {
                    let observation = self.player.current();
                    self.attempt_sync(&observation);
                    Flow::Continue
                }
            };

            if let Flow::Shutdown = flow {
                break;
            }
        }

        self.teardown().await;
    }

    async fn on_transport_event(&mut self, event: TransportEvent) -> Flow {
        match event {
            TransportEvent::Connected { epoch } => self.on_connected(epoch),
            TransportEvent::Disconnected { reason } => {
                warn!("Sync connection lost: {}", reason);
                self.end_epoch();
            }
            TransportEvent::Error(message) => {
                warn!("Sync transport error: {}", message);
            }
            TransportEvent::Message(Inbound::State(snapshot)) => {
                return self.on_snapshot(snapshot).await;
            }
            TransportEvent::Message(Inbound::Error { message }) => {
                warn!("Sync server reported: {}", message);
            }
        }
        Flow::Continue
    }

    fn on_connected(&mut self, epoch: ConnectionEpoch) {
        info!("Sync connected, epoch {}", epoch);
        self.epoch = Some(epoch);
        self.resume.begin_epoch(epoch);
        self.publish_status();

        // First message of every epoch
        self.link.send(epoch, Outbound::RequestState);

        let observation = self.player.current();
        self.observed_track = observation.track_id.clone();
        self.rebuild_schedule(&observation);
    }

    fn end_epoch(&mut self) {
        self.scheduler.deactivate();
        self.epoch = None;
        self.resume.end_epoch();
        self.publish_status();
    }

    async fn on_snapshot(&mut self, snapshot: PlaybackSnapshot) -> Flow {
        if self.epoch.is_none() {
            debug!("Ignoring snapshot outside of a connection epoch");
            return Flow::Continue;
        }

        let outcome = tokio::select! {
            outcome = self.resume.apply(&snapshot, self.player.as_ref()) => outcome,
            _ = &mut self.shutdown => return Flow::Shutdown,
        };
        if outcome != ResumeOutcome::Ignored {
            debug!("Resume outcome for {}: {:?}", snapshot.track_id, outcome);
        }
        self.publish_status();
        Flow::Continue
    }

    fn on_playback_changed(&mut self) {
        let observation = self.observations.borrow_and_update().clone();

        if self.resume.observe_track(observation.track_id.as_deref()) {
            self.publish_status();
        }

        if observation.track_id != self.observed_track {
            self.observed_track = observation.track_id.clone();
            self.rebuild_schedule(&observation);
        } else {
            self.attempt_sync(&observation);
        }
    }

    /// Tear the schedule down and build a new one if a track is selected while connected
    fn rebuild_schedule(&mut self, observation: &PlaybackObservation) {
        self.scheduler.deactivate();
        if self.epoch.is_some() && observation.track_id.is_some() {
            self.scheduler.activate();
            self.attempt_sync(observation);
        }
    }

    fn attempt_sync(&mut self, observation: &PlaybackObservation) {
        let Some(epoch) = self.epoch else {
            return;
        };
        if let Some(event) = self.scheduler.try_emit(observation) {
            debug!(
                "Publishing {} at {}s (paused: {})",
                event.track_id, event.position_seconds, event.is_paused
            );
            self.link.send(epoch, Outbound::Sync(event));
        }
    }

    fn publish_status(&self) {
        let status = ConnectionStatus {
            connected: self.epoch.is_some(),
            epoch: self.epoch,
            resume: self.resume.state(),
        };
        self.status.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }

    /// Single teardown path: timers first, then handlers, then the connection
    async fn teardown(self) {
        let Session {
            link,
            mut scheduler,
            observations,
            status,
            ..
        } = self;

        scheduler.deactivate();
        drop(observations);
        status.send_replace(ConnectionStatus::default());
        link.close().await;
        info!("Sync session closed");
    }
}
