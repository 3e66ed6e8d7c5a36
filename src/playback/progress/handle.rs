use super::PlaybackProgress;
use crate::playback::adapter::PlaybackObservation;
use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex,
};
use tokio::sync::{mpsc as tokio_mpsc, oneshot, watch};
use tracing::info;

type SubscriptionId = u64;

struct Subscription {
    tx: tokio_mpsc::UnboundedSender<PlaybackProgress>,
}

/// Handle for subscribing to playback progress updates
#[derive(Clone)]
pub struct PlaybackProgressHandle {
    subscriptions: Arc<Mutex<HashMap<SubscriptionId, Subscription>>>,
    next_id: Arc<AtomicU64>,
    observation_rx: watch::Receiver<PlaybackObservation>,
    flush_tx: tokio_mpsc::UnboundedSender<oneshot::Sender<()>>,
}

impl PlaybackProgressHandle {
    /// Create a new progress handle and spawn background task to process progress updates
    pub fn new(
        mut progress_rx: tokio_mpsc::UnboundedReceiver<PlaybackProgress>,
        runtime_handle: tokio::runtime::Handle,
    ) -> Self {
        let subscriptions: Arc<Mutex<HashMap<SubscriptionId, Subscription>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let subscriptions_clone = subscriptions.clone();
        let (observation_tx, observation_rx) = watch::channel(PlaybackObservation::default());

        let (flush_tx, mut flush_rx) = tokio_mpsc::unbounded_channel::<oneshot::Sender<()>>();

        runtime_handle.spawn(async move {
            let publish = |progress: PlaybackProgress| {
                observation_tx.send_if_modified(|observation| {
                    let before = observation.clone();
                    progress.apply_to(observation);
                    *observation != before
                });

                let mut subs = subscriptions_clone.lock().unwrap();
                // If send fails, receiver was dropped
                subs.retain(|_, subscription| subscription.tx.send(progress.clone()).is_ok());
            };

            loop {
                tokio::select! {
                    progress = progress_rx.recv() => match progress {
                        Some(progress) => publish(progress),
                        None => break,
                    },
                    Some(ack) = flush_rx.recv() => {
                        // Everything the engine queued before the request is folded first
                        while let Ok(progress) = progress_rx.try_recv() {
                            publish(progress);
                        }
                        let _ = ack.send(());
                    }
                }
            }
            info!("Playback progress channel closed, exiting");
        });

        Self {
            subscriptions,
            next_id: Arc::new(AtomicU64::new(1)),
            observation_rx,
            flush_tx,
        }
    }

    /// Subscribe to all playback progress updates
    /// Subscription is automatically removed when receiver is dropped
    pub fn subscribe_all(&self) -> tokio_mpsc::UnboundedReceiver<PlaybackProgress> {
        let (tx, rx) = tokio_mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        self.subscriptions
            .lock()
            .unwrap()
            .insert(id, Subscription { tx });
        rx
    }

    /// Wait until every update the engine sent before this call is reflected
    /// in [`observation`](Self::observation)
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.flush_tx.send(ack).is_ok() {
            let _ = done.await;
        }
    }

    pub fn observation(&self) -> PlaybackObservation {
        self.observation_rx.borrow().clone()
    }

    /// Receiver that only reports changes made after this call
    pub fn watch_observation(&self) -> watch::Receiver<PlaybackObservation> {
        let mut rx = self.observation_rx.clone();
        rx.borrow_and_update();
        rx
    }
}
