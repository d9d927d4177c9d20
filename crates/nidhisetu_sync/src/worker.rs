use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::coordinator::{SyncCoordinator, SyncOutcome};

#[derive(Debug)]
pub struct AutoSyncHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl AutoSyncHandle {
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.task.await {
            error!(error = %err, "auto-sync task ended abnormally");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Also runs one pass at start-up when already online.
pub fn spawn_auto_sync(coordinator: Arc<SyncCoordinator>) -> AutoSyncHandle {
    let (shutdown, mut shutdown_rx) = watch::channel(false);
    let mut connectivity = coordinator.network().subscribe();

    let task = tokio::spawn(async move {
        let mut was_online = connectivity.current();
        if was_online {
            run_pass(&coordinator, "startup").await;
        }

        loop {
            tokio::select! {
                changed = connectivity.changed() => {
                    let Some(online) = changed else {
                        debug!("network observer dropped; auto-sync stopping");
                        break;
                    };
                    if online && !was_online {
                        run_pass(&coordinator, "reconnect").await;
                    }
                    was_online = online;
                }
                _ = shutdown_rx.changed() => break,
            }
        }

        info!(beneficiary_id = %coordinator.beneficiary_id(), "auto-sync stopped");
    });

    AutoSyncHandle { shutdown, task }
}

async fn run_pass(coordinator: &SyncCoordinator, trigger: &'static str) {
    match coordinator.sync_pending().await {
        Ok(SyncOutcome::Skipped { reason }) => debug!(
            beneficiary_id = %coordinator.beneficiary_id(),
            trigger,
            reason = ?reason,
            "auto-sync skipped"
        ),
        Ok(SyncOutcome::Completed(report)) => info!(
            beneficiary_id = %coordinator.beneficiary_id(),
            trigger,
            synced = report.synced.len(),
            "auto-sync completed"
        ),
        Ok(SyncOutcome::CompletedWithErrors(aggregate)) => info!(
            beneficiary_id = %coordinator.beneficiary_id(),
            trigger,
            failed = aggregate.failures.len(),
            summary = %aggregate.summary,
            "auto-sync completed with failures"
        ),
        Err(err) => error!(
            beneficiary_id = %coordinator.beneficiary_id(),
            trigger,
            error = %err,
            "auto-sync pass failed"
        ),
    }
}
