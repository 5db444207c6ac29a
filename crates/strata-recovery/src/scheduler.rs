use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::service::CheckpointService;

/// Description recorded on scheduler-created snapshots.
pub const SCHEDULED_DESCRIPTION: &str = "scheduled checkpoint";

/// The one background task: periodic `create_checkpoint` calls.
///
/// The first checkpoint is taken one full interval after spawning. Each
/// checkpoint runs on the blocking pool since tier writes are synchronous.
/// Dropping the scheduler without calling [`shutdown`](Self::shutdown)
/// also stops the task after its current tick.
#[derive(Debug)]
pub struct CheckpointScheduler {
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<u64>,
}

impl CheckpointScheduler {
    /// Spawn the scheduler on the current tokio runtime.
    pub fn spawn(service: Arc<CheckpointService>, interval: Duration) -> Self {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately.
            ticker.tick().await;
            info!(interval_ms = interval.as_millis() as u64, "checkpoint scheduler started");

            let mut taken = 0u64;
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {}
                }
                let service = service.clone();
                let result = tokio::task::spawn_blocking(move || {
                    service.create_checkpoint(SCHEDULED_DESCRIPTION)
                })
                .await;
                match result {
                    Ok(Ok(receipt)) => {
                        taken += 1;
                        debug!(id = %receipt.id().short_hex(), "scheduled checkpoint taken");
                    }
                    Ok(Err(e)) => error!(error = %e, code = e.code(), "scheduled checkpoint failed"),
                    Err(e) => error!(error = %e, "scheduled checkpoint task panicked"),
                }
            }
            info!(taken, "checkpoint scheduler stopped");
            taken
        });
        Self {
            shutdown: Some(shutdown_tx),
            handle,
        }
    }

    /// Spawn only if `config.checkpoint_interval_secs` is non-zero.
    pub fn spawn_configured(service: Arc<CheckpointService>) -> Option<Self> {
        let interval = service.config().checkpoint_interval()?;
        Some(Self::spawn(service, interval))
    }

    /// Stop the scheduler, returning how many checkpoints it took. A
    /// checkpoint already in progress completes first.
    pub async fn shutdown(mut self) -> u64 {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.handle.await {
            Ok(taken) => taken,
            Err(e) => {
                error!(error = %e, "checkpoint scheduler task failed");
                0
            }
        }
    }
}
