use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::config::PollConfig;
use crate::error::PollError;
use crate::models::Publication;
use crate::pipeline::Pipeline;

#[derive(Debug, Clone)]
pub enum Event {
    NewItem(Publication),
}

pub struct PollerHandle {
    cancel_tx: broadcast::Sender<()>,
    join: JoinHandle<()>,
}

impl PollerHandle {
    /// Stops the poller once the run in progress, if any, has finished.
    pub async fn stop(self) -> Result<(), PollError> {
        let _ = self.cancel_tx.send(());
        self.join.await.map_err(PollError::from)
    }
}

pub fn spawn_poller(
    pipeline: Arc<Pipeline>,
    config: PollConfig,
    event_tx: mpsc::Sender<Event>,
) -> PollerHandle {
    let (cancel_tx, mut cancel_rx) = broadcast::channel(1);
    let join = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel_rx.recv() => {
                    info!("poller shutdown requested");
                    break;
                }
                _ = ticker.tick() => {
                    if let Some(event) = poll_once(&pipeline).await {
                        if event_tx.send(event).await.is_err() {
                            warn!("event receiver dropped, stopping poller");
                            break;
                        }
                    }
                }
            }
        }
    });

    PollerHandle { cancel_tx, join }
}

/// Runs one check; failures are logged and yield no event.
pub async fn poll_once(pipeline: &Pipeline) -> Option<Event> {
    match pipeline.check_for_new_item().await {
        Ok(publication) => publication.map(Event::NewItem),
        Err(err) => {
            warn!(
                source = %pipeline.source(),
                stage = err.stage(),
                error = %err,
                "feed check failed"
            );
            None
        }
    }
}
