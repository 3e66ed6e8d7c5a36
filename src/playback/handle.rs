use crate::playback::adapter::{PlaybackAdapter, PlaybackError, PlaybackObservation};
use crate::playback::progress::{PlaybackProgress, PlaybackProgressHandle};
use std::time::Duration;
use tokio::sync::{mpsc as tokio_mpsc, oneshot, watch};
use tracing::debug;

/// Playback commands sent to the audio engine
#[derive(Debug)]
pub enum PlaybackCommand {
    Start {
        track_id: String,
        autoplay: bool,
        /// Engine replies once the track is loaded and can be seeked
        reply: oneshot::Sender<Result<(), PlaybackError>>,
    },
    Seek(Duration),
    TogglePlayPause,
}

/// Engine end of the playback channels
pub struct EngineChannels {
    pub commands: tokio_mpsc::UnboundedReceiver<PlaybackCommand>,
    pub progress: tokio_mpsc::UnboundedSender<PlaybackProgress>,
}

/// Handle to an audio engine running on its own thread or task
#[derive(Clone)]
pub struct PlaybackHandle {
    command_tx: tokio_mpsc::UnboundedSender<PlaybackCommand>,
    progress_handle: PlaybackProgressHandle,
}

impl PlaybackHandle {
    /// Create the handle together with the channels the engine must serve
    pub fn new(runtime_handle: tokio::runtime::Handle) -> (Self, EngineChannels) {
        let (command_tx, command_rx) = tokio_mpsc::unbounded_channel();
        let (progress_tx, progress_rx) = tokio_mpsc::unbounded_channel();

        let progress_handle = PlaybackProgressHandle::new(progress_rx, runtime_handle);

        let handle = PlaybackHandle {
            command_tx,
            progress_handle,
        };
        let engine = EngineChannels {
            commands: command_rx,
            progress: progress_tx,
        };

        (handle, engine)
    }

    pub fn subscribe_progress(&self) -> tokio_mpsc::UnboundedReceiver<PlaybackProgress> {
        self.progress_handle.subscribe_all()
    }

    fn send(&self, command: PlaybackCommand) -> Result<(), PlaybackError> {
        self.command_tx
            .send(command)
            .map_err(|_| PlaybackError::EngineUnavailable)
    }
}

#[async_trait::async_trait]
impl PlaybackAdapter for PlaybackHandle {
    async fn start(&self, track_id: &str, autoplay: bool) -> Result<(), PlaybackError> {
        debug!("Playback: start {} (autoplay={})", track_id, autoplay);
        let (reply, reply_rx) = oneshot::channel();
        self.send(PlaybackCommand::Start {
            track_id: track_id.to_string(),
            autoplay,
            reply,
        })?;

        let result = reply_rx.await.map_err(|_| PlaybackError::EngineUnavailable)?;

        // Callers read `current()` right after start, so the engine's load
        // updates must be folded in before returning, even on failure
        self.progress_handle.flush().await;
        result
    }

    async fn seek(&self, seconds: f64) -> Result<(), PlaybackError> {
        if !seconds.is_finite() || seconds < 0.0 {
            return Err(PlaybackError::InvalidPosition(seconds));
        }
        self.send(PlaybackCommand::Seek(Duration::from_secs_f64(seconds)))
    }

    async fn toggle_play_pause(&self) -> Result<(), PlaybackError> {
        self.send(PlaybackCommand::TogglePlayPause)
    }

    fn current(&self) -> PlaybackObservation {
        self.progress_handle.observation()
    }

    fn watch(&self) -> watch::Receiver<PlaybackObservation> {
        self.progress_handle.watch_observation()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::progress::PlaybackState;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_start_waits_for_engine_reply() {
        let (handle, mut engine) = PlaybackHandle::new(tokio::runtime::Handle::current());

        let engine_task = tokio::spawn(async move {
            match engine.commands.recv().await {
                Some(PlaybackCommand::Start {
                    track_id,
                    autoplay,
                    reply,
                }) => {
                    assert!(!autoplay);
                    let _ = engine.progress.send(PlaybackProgress::StateChanged {
                        state: PlaybackState::Paused {
                            track_id: track_id.clone(),
                            position: Duration::ZERO,
                        },
                    });
                    let _ = reply.send(Ok(()));
                }
                other => panic!("unexpected command: {:?}", other),
            }
            engine
        });

        let mut watch = handle.watch();
        handle.start("t1", false).await.unwrap();
        let _engine = engine_task.await.unwrap();

        timeout(Duration::from_secs(1), watch.changed())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(handle.current().track_id.as_deref(), Some("t1"));
        assert!(!handle.current().is_playing);
    }

    #[tokio::test]
    async fn test_start_returns_with_engine_state_applied() {
        let (handle, mut engine) = PlaybackHandle::new(tokio::runtime::Handle::current());

        let engine_task = tokio::spawn(async move {
            let mut loads = Vec::new();
            while let Some(command) = engine.commands.recv().await {
                if let PlaybackCommand::Start {
                    track_id, reply, ..
                } = command
                {
                    let _ = engine.progress.send(PlaybackProgress::StateChanged {
                        state: PlaybackState::Loading {
                            track_id: track_id.clone(),
                        },
                    });
                    let _ = engine.progress.send(PlaybackProgress::StateChanged {
                        state: PlaybackState::Playing {
                            track_id: track_id.clone(),
                            position: Duration::ZERO,
                        },
                    });
                    let result = if track_id == "broken" {
                        Err(PlaybackError::StartFailed("decoder missing".to_string()))
                    } else {
                        Ok(())
                    };
                    loads.push(track_id);
                    let _ = reply.send(result);
                }
            }
            loads
        });

        handle.start("t1", false).await.unwrap();
        assert_eq!(handle.current().track_id.as_deref(), Some("t1"));
        assert!(handle.current().is_playing);

        // A failed start still reports what the engine loaded
        assert_eq!(
            handle.start("broken", false).await,
            Err(PlaybackError::StartFailed("decoder missing".to_string()))
        );
        assert_eq!(handle.current().track_id.as_deref(), Some("broken"));

        drop(handle);
        assert_eq!(engine_task.await.unwrap(), vec!["t1", "broken"]);
    }

    #[tokio::test]
    async fn test_commands_fail_when_engine_is_gone() {
        let (handle, engine) = PlaybackHandle::new(tokio::runtime::Handle::current());
        drop(engine);

        assert_eq!(
            handle.start("t1", false).await,
            Err(PlaybackError::EngineUnavailable)
        );
        assert_eq!(
            handle.toggle_play_pause().await,
            Err(PlaybackError::EngineUnavailable)
        );
    }

    #[tokio::test]
    async fn test_seek_rejects_invalid_positions() {
        let (handle, mut engine) = PlaybackHandle::new(tokio::runtime::Handle::current());

        assert_eq!(
            handle.seek(-1.0).await,
            Err(PlaybackError::InvalidPosition(-1.0))
        );
        handle.seek(42.0).await.unwrap();

        match engine.commands.recv().await {
            Some(PlaybackCommand::Seek(position)) => {
                assert_eq!(position, Duration::from_secs(42))
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
