use std::sync::Arc;

use chrono::{DateTime, Utc};
use nidhisetu_contract::{
    DraftInput, PendingSubmission, SkipReason, SubmissionId, SyncEvent, SyncState, SyncStatus,
    SyncStatusView,
};
use nidhisetu_remote::{SubmissionReceipt, SubmissionService};
use nidhisetu_storage::DraftError;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::OwnedMutexGuard;
use tracing::{error, info, warn};

use crate::network::NetworkObserver;
use crate::session::SyncSession;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DraftFailure {
    pub submission_id: SubmissionId,
    pub asset_name: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SyncReport {
    pub synced: Vec<SubmissionReceipt>,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Error, Serialize, PartialEq, Eq)]
#[error("{summary}")]
pub struct AggregateSyncError {
    pub summary: String,
    pub synced: Vec<SubmissionReceipt>,
    pub failures: Vec<DraftFailure>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SyncOutcome {
    Skipped { reason: SkipReason },
    Completed(SyncReport),
    CompletedWithErrors(AggregateSyncError),
}

impl SyncOutcome {
    pub fn is_skipped(&self) -> bool {
        matches!(self, SyncOutcome::Skipped { .. })
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Storage(#[from] DraftError),
}

/// At most one pass runs per session. A request that arrives while a pass is
/// in flight is dropped, not queued.
pub struct SyncCoordinator {
    session: Arc<SyncSession>,
    service: Arc<dyn SubmissionService>,
    network: NetworkObserver,
}

impl SyncCoordinator {
    pub fn new(
        session: Arc<SyncSession>,
        service: Arc<dyn SubmissionService>,
        network: NetworkObserver,
    ) -> Self {
        Self {
            session,
            service,
            network,
        }
    }

    pub fn session(&self) -> &Arc<SyncSession> {
        &self.session
    }

    pub fn network(&self) -> &NetworkObserver {
        &self.network
    }

    pub fn beneficiary_id(&self) -> &str {
        self.session.beneficiary_id()
    }

    pub async fn enqueue(&self, input: DraftInput) -> Result<PendingSubmission, DraftError> {
        let submission = self.session.drafts.lock().await.enqueue(input).await?;
        self.session
            .events()
            .emit(SyncEvent::Enqueued {
                submission_id: submission.id.clone(),
                asset_name: submission.asset_name.clone(),
            })
            .await;
        Ok(submission)
    }

    pub async fn list(&self) -> Vec<PendingSubmission> {
        self.session.drafts.lock().await.list()
    }

    pub async fn state(&self) -> SyncState {
        self.session.state().await
    }

    pub async fn status(&self) -> SyncStatusView {
        let state = self.session.state.read().await;
        let drafts = self.session.drafts.lock().await;
        let online = self.network.is_online();
        let total_drafts = drafts.list().len();

        SyncStatusView {
            beneficiary_id: self.beneficiary_id().to_string(),
            online,
            sync_status: state.sync_status,
            error: state.error.clone(),
            last_synced_at: state.last_synced_at,
            pending_count: drafts.pending_count(),
            failed_count: drafts.failed_count(),
            total_drafts,
            can_sync: online && total_drafts > 0 && state.sync_status != SyncStatus::Syncing,
        }
    }

    pub async fn retry(&self) -> Result<SyncOutcome, SyncError> {
        info!(beneficiary_id = %self.beneficiary_id(), "retry requested");
        self.sync_pending().await
    }

    pub async fn sync_pending(&self) -> Result<SyncOutcome, SyncError> {
        let (snapshot, _pass) = match self.begin_pass().await {
            Ok(begun) => begun,
            Err(reason) => {
                info!(
                    beneficiary_id = %self.beneficiary_id(),
                    reason = ?reason,
                    "sync request ignored"
                );
                self.session
                    .events()
                    .emit(SyncEvent::SyncSkipped { reason })
                    .await;
                return Ok(SyncOutcome::Skipped { reason });
            }
        };

        let total = snapshot.len();
        info!(beneficiary_id = %self.beneficiary_id(), drafts = total, "sync pass started");
        self.session
            .events()
            .emit(SyncEvent::SyncStarted { draft_count: total })
            .await;

        match self.run_pass(snapshot).await {
            Ok((synced, failures)) => Ok(self.finish_pass(total, synced, failures).await),
            Err(err) => {
                self.abort_pass(&err).await;
                Err(err.into())
            }
        }
    }

    async fn begin_pass(
        &self,
    ) -> Result<(Vec<PendingSubmission>, OwnedMutexGuard<()>), SkipReason> {
        let mut state = self.session.state.write().await;
        let snapshot: Vec<PendingSubmission> = self
            .session
            .drafts
            .lock()
            .await
            .list()
            .into_iter()
            .filter(PendingSubmission::is_retryable)
            .collect();

        if snapshot.is_empty() {
            return Err(SkipReason::NoDrafts);
        }
        if state.sync_status == SyncStatus::Syncing {
            return Err(SkipReason::AlreadySyncing);
        }
        if !self.network.is_online() {
            return Err(SkipReason::Offline);
        }
        // Busy while a reset is waiting on it.
        let pass = self
            .session
            .try_begin_pass()
            .ok_or(SkipReason::AlreadySyncing)?;

        state.sync_status = SyncStatus::Syncing;
        Ok((snapshot, pass))
    }

    async fn run_pass(
        &self,
        snapshot: Vec<PendingSubmission>,
    ) -> Result<(Vec<SubmissionReceipt>, Vec<DraftFailure>), DraftError> {
        let beneficiary_id = self.beneficiary_id().to_string();
        let mut synced = Vec::new();
        let mut failures = Vec::new();

        for draft in snapshot {
            let current = match self.session.drafts.lock().await.mark_syncing(&draft.id).await {
                Ok(current) => current,
                Err(DraftError::NotFound(id)) => {
                    warn!(submission_id = %id, "draft left the store before upload");
                    continue;
                }
                Err(DraftError::InvalidTransition { id, from, .. }) => {
                    warn!(submission_id = %id, status = %from, "draft claimed by another pass");
                    continue;
                }
                Err(err) => return Err(err),
            };

            // Drafts lock is not held across the upload.
            match self.service.upload(&beneficiary_id, &current).await {
                Ok(receipt) => {
                    {
                        let mut drafts = self.session.drafts.lock().await;
                        drafts.mark_synced(&current.id).await?;
                        drafts.remove(&current.id).await?;
                    }
                    self.session
                        .events()
                        .emit(SyncEvent::ItemSynced {
                            submission_id: current.id.clone(),
                            remote_id: receipt.remote_id.clone(),
                        })
                        .await;
                    synced.push(receipt);
                }
                Err(upload_error) => {
                    let reason = upload_error.to_string();
                    self.session
                        .drafts
                        .lock()
                        .await
                        .mark_failed(&current.id, &reason)
                        .await?;
                    self.session
                        .events()
                        .emit(SyncEvent::ItemFailed {
                            submission_id: current.id.clone(),
                            reason: reason.clone(),
                        })
                        .await;
                    failures.push(DraftFailure {
                        submission_id: current.id,
                        asset_name: current.asset_name,
                        reason,
                    });
                }
            }
        }

        Ok((synced, failures))
    }

    async fn finish_pass(
        &self,
        total: usize,
        synced: Vec<SubmissionReceipt>,
        failures: Vec<DraftFailure>,
    ) -> SyncOutcome {
        let now = Utc::now();
        let synced_count = synced.len();
        let failed_count = failures.len();

        let outcome = {
            let mut state = self.session.state.write().await;
            if failures.is_empty() {
                state.sync_status = SyncStatus::Idle;
                state.error = None;
                state.last_synced_at = Some(now);
                SyncOutcome::Completed(SyncReport {
                    synced,
                    completed_at: now,
                })
            } else {
                let summary = format!(
                    "{} of {} drafts failed to sync: {}",
                    failed_count, total, failures[0].reason
                );
                state.sync_status = SyncStatus::Error;
                state.error = Some(summary.clone());
                SyncOutcome::CompletedWithErrors(AggregateSyncError {
                    summary,
                    synced,
                    failures,
                })
            }
        };

        let status = if failed_count == 0 {
            SyncStatus::Idle
        } else {
            SyncStatus::Error
        };
        info!(
            beneficiary_id = %self.beneficiary_id(),
            synced = synced_count,
            failed = failed_count,
            status = status.as_str(),
            "sync pass finished"
        );
        self.session
            .events()
            .emit(SyncEvent::SyncCompleted {
                synced: synced_count,
                failed: failed_count,
                status,
            })
            .await;
        outcome
    }

    async fn abort_pass(&self, err: &DraftError) {
        error!(
            beneficiary_id = %self.beneficiary_id(),
            error = %err,
            "sync pass aborted"
        );
        {
            let mut state = self.session.state.write().await;
            state.sync_status = SyncStatus::Error;
            state.error = Some(err.to_string());
        }
        self.session
            .events()
            .emit(SyncEvent::SyncCompleted {
                synced: 0,
                failed: 0,
                status: SyncStatus::Error,
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::event_bus;
    use crate::session::SharedDrafts;
    use nidhisetu_contract::{GeoPoint, MediaType, SubmissionStatus};
    use nidhisetu_remote::InMemorySubmissionService;
    use async_trait::async_trait;
    use nidhisetu_storage::{DraftPersistence, DraftStore, InMemoryPersistence};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct BrokenDisk {
        inner: InMemoryPersistence,
        fail_writes: AtomicBool,
    }

    #[async_trait]
    impl DraftPersistence for BrokenDisk {
        async fn load(&self, beneficiary_id: &str) -> anyhow::Result<Vec<PendingSubmission>> {
            self.inner.load(beneficiary_id).await
        }

        async fn save(
            &self,
            beneficiary_id: &str,
            drafts: &[PendingSubmission],
        ) -> anyhow::Result<()> {
            if self.fail_writes.load(Ordering::SeqCst) {
                anyhow::bail!("disk full");
            }
            self.inner.save(beneficiary_id, drafts).await
        }
    }

    struct Harness {
        coordinator: Arc<SyncCoordinator>,
        service: Arc<InMemorySubmissionService>,
        network: NetworkObserver,
    }

    async fn harness(online: bool, service: InMemorySubmissionService) -> Harness {
        let session = SyncSession::open("ben-1", Arc::new(InMemoryPersistence::new()), event_bus())
            .await
            .expect("open session");
        let service = Arc::new(service);
        let network = NetworkObserver::new(online);
        let coordinator = Arc::new(SyncCoordinator::new(
            Arc::new(session),
            service.clone(),
            network.clone(),
        ));
        Harness {
            coordinator,
            service,
            network,
        }
    }

    fn draft(name: &str) -> DraftInput {
        DraftInput::new(
            name,
            GeoPoint::new(18.52, 73.85),
            MediaType::Photo,
            format!("file:///evidence/{name}.jpg"),
        )
    }

    #[tokio::test]
    async fn offline_capture_then_online_sync_empties_queue() {
        let h = harness(false, InMemorySubmissionService::new()).await;
        let a = h
            .coordinator
            .enqueue(draft("Pump invoice"))
            .await
            .expect("enqueue");

        let listed = h.coordinator.list().await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, a.id);
        assert_eq!(listed[0].status, SubmissionStatus::Pending);
        assert_eq!(listed[0].location, GeoPoint::new(18.52, 73.85));

        h.network.set_online(true);
        let outcome = h.coordinator.sync_pending().await.expect("sync");
        assert!(matches!(outcome, SyncOutcome::Completed(ref report) if report.synced.len() == 1));

        assert!(h.coordinator.list().await.is_empty());
        let state = h.coordinator.state().await;
        assert_eq!(state.sync_status, SyncStatus::Idle);
        assert!(state.last_synced_at.is_some());
        assert!(state.error.is_none());
    }

    #[tokio::test]
    async fn sync_while_offline_makes_no_calls() {
        let h = harness(false, InMemorySubmissionService::new()).await;
        h.coordinator.enqueue(draft("Pump invoice")).await.expect("enqueue");

        for _ in 0..2 {
            let outcome = h.coordinator.sync_pending().await.expect("sync");
            assert_eq!(
                outcome,
                SyncOutcome::Skipped {
                    reason: SkipReason::Offline
                }
            );
        }

        assert_eq!(h.service.attempt_count(), 0);
        assert_eq!(h.coordinator.state().await, SyncState::default());
        assert!(h
            .coordinator
            .list()
            .await
            .iter()
            .all(|d| d.status == SubmissionStatus::Pending));
    }

    #[tokio::test]
    async fn empty_queue_sync_is_a_noop() {
        let h = harness(true, InMemorySubmissionService::new()).await;
        let before = h.coordinator.state().await;

        let outcome = h.coordinator.sync_pending().await.expect("sync");
        assert_eq!(
            outcome,
            SyncOutcome::Skipped {
                reason: SkipReason::NoDrafts
            }
        );
        assert_eq!(h.coordinator.state().await, before);
        assert_eq!(h.service.attempt_count(), 0);
    }

    #[tokio::test]
    async fn partial_failure_keeps_only_failed_draft() {
        let service = InMemorySubmissionService::new();
        service.reject_asset("Tractor photo").await;
        let h = harness(true, service).await;

        let first = h.coordinator.enqueue(draft("Pump invoice")).await.expect("enqueue");
        let second = h.coordinator.enqueue(draft("Tractor photo")).await.expect("enqueue");
        let third = h.coordinator.enqueue(draft("Shed video")).await.expect("enqueue");

        let outcome = h.coordinator.sync_pending().await.expect("sync");
        let aggregate = match outcome {
            SyncOutcome::CompletedWithErrors(aggregate) => aggregate,
            other => panic!("expected partial failure, got {other:?}"),
        };
        assert_eq!(aggregate.synced.len(), 2);
        assert_eq!(aggregate.failures.len(), 1);
        assert_eq!(aggregate.failures[0].submission_id, second.id);
        assert!(aggregate.summary.starts_with("1 of 3 drafts failed to sync"));

        let remaining = h.coordinator.list().await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, second.id);
        assert_eq!(remaining[0].status, SubmissionStatus::Failed);
        assert!(remaining[0]
            .failure_reason
            .as_deref()
            .is_some_and(|reason| !reason.is_empty()));

        let accepted: Vec<String> = h
            .service
            .accepted()
            .await
            .into_iter()
            .map(|upload| upload.submission.id)
            .collect();
        assert_eq!(accepted, vec![first.id, third.id]);

        let state = h.coordinator.state().await;
        assert_eq!(state.sync_status, SyncStatus::Error);
        assert!(state.error.is_some());
        assert!(state.last_synced_at.is_none());

        let status = h.coordinator.status().await;
        assert_eq!(status.failed_count, 1);
        assert_eq!(status.pending_count, 0);
        assert!(status.can_sync);
    }

    #[tokio::test]
    async fn retry_after_error_clears_state() {
        let service = InMemorySubmissionService::new();
        service.set_available(false);
        let h = harness(true, service).await;
        h.coordinator.enqueue(draft("Pump invoice")).await.expect("enqueue");

        let outcome = h.coordinator.sync_pending().await.expect("first pass");
        assert!(matches!(outcome, SyncOutcome::CompletedWithErrors(_)));
        assert_eq!(h.coordinator.state().await.sync_status, SyncStatus::Error);

        h.service.set_available(true);
        let outcome = h.coordinator.retry().await.expect("retry");
        assert!(matches!(outcome, SyncOutcome::Completed(_)));

        let state = h.coordinator.state().await;
        assert_eq!(state.sync_status, SyncStatus::Idle);
        assert!(state.error.is_none());
        assert!(state.last_synced_at.is_some());
        assert!(h.coordinator.list().await.is_empty());
        assert_eq!(h.service.accepted().await[0].submission.attempts, 2);
    }

    #[tokio::test]
    async fn second_request_during_pass_is_dropped() {
        let h = harness(
            true,
            InMemorySubmissionService::new().with_latency(Duration::from_millis(200)),
        )
        .await;
        h.coordinator.enqueue(draft("Pump invoice")).await.expect("enqueue");
        h.coordinator.enqueue(draft("Shed video")).await.expect("enqueue");

        let background = {
            let coordinator = h.coordinator.clone();
            tokio::spawn(async move { coordinator.sync_pending().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(h.coordinator.state().await.sync_status, SyncStatus::Syncing);
        let outcome = h.coordinator.sync_pending().await.expect("second request");
        assert_eq!(
            outcome,
            SyncOutcome::Skipped {
                reason: SkipReason::AlreadySyncing
            }
        );
        assert_eq!(h.coordinator.list().await.len(), 2);

        let first = background.await.expect("join").expect("first pass");
        assert!(matches!(first, SyncOutcome::Completed(_)));
        assert_eq!(h.service.attempt_count(), 2);
    }

    #[tokio::test]
    async fn drafts_added_mid_pass_wait_for_next_pass() {
        let h = harness(
            true,
            InMemorySubmissionService::new().with_latency(Duration::from_millis(150)),
        )
        .await;
        h.coordinator.enqueue(draft("Pump invoice")).await.expect("enqueue");

        let background = {
            let coordinator = h.coordinator.clone();
            tokio::spawn(async move { coordinator.sync_pending().await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        let late = h.coordinator.enqueue(draft("Late photo")).await.expect("enqueue");

        background.await.expect("join").expect("pass");
        let remaining = h.coordinator.list().await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, late.id);
        assert_eq!(remaining[0].status, SubmissionStatus::Pending);

        h.coordinator.sync_pending().await.expect("second pass");
        assert!(h.coordinator.list().await.is_empty());
    }

    #[tokio::test]
    async fn pass_emits_events_in_order() {
        let service = InMemorySubmissionService::new();
        service.reject_asset("Tractor photo").await;
        let h = harness(true, service).await;
        h.coordinator.enqueue(draft("Pump invoice")).await.expect("enqueue");
        h.coordinator.enqueue(draft("Tractor photo")).await.expect("enqueue");

        h.coordinator.sync_pending().await.expect("sync");

        let names: Vec<&'static str> = h
            .coordinator
            .session()
            .events()
            .since(0, 100)
            .await
            .iter()
            .map(|record| record.event.name())
            .collect();
        assert_eq!(
            names,
            vec![
                "enqueued",
                "enqueued",
                "sync_started",
                "item_synced",
                "item_failed",
                "sync_completed"
            ]
        );
    }

    #[tokio::test]
    async fn every_draft_moves_through_syncing() {
        let h = harness(true, InMemorySubmissionService::new()).await;
        h.coordinator.enqueue(draft("Pump invoice")).await.expect("enqueue");

        h.coordinator.sync_pending().await.expect("sync");

        let uploaded = h.service.accepted().await;
        assert_eq!(uploaded.len(), 1);
        assert_eq!(uploaded[0].submission.status, SubmissionStatus::Syncing);
        assert_eq!(uploaded[0].submission.attempts, 1);
    }

    #[tokio::test]
    async fn storage_failure_aborts_pass_and_releases_guard() {
        let disk = Arc::new(BrokenDisk::default());
        let session = SyncSession::open("ben-1", disk.clone(), event_bus())
            .await
            .expect("open session");
        let coordinator = SyncCoordinator::new(
            Arc::new(session),
            Arc::new(InMemorySubmissionService::new()),
            NetworkObserver::new(true),
        );
        coordinator.enqueue(draft("Pump invoice")).await.expect("enqueue");

        disk.fail_writes.store(true, Ordering::SeqCst);
        let err = coordinator.sync_pending().await.expect_err("disk full");
        assert!(matches!(err, SyncError::Storage(DraftError::Storage(_))));

        let state = coordinator.state().await;
        assert_eq!(state.sync_status, SyncStatus::Error);
        assert!(state.error.is_some_and(|e| e.contains("disk full")));
        assert_eq!(coordinator.list().await[0].status, SubmissionStatus::Pending);

        disk.fail_writes.store(false, Ordering::SeqCst);
        let outcome = coordinator.sync_pending().await.expect("second pass");
        assert!(matches!(outcome, SyncOutcome::Completed(_)));
        assert!(disk.load("ben-1").await.expect("load").is_empty());
    }

    #[tokio::test]
    async fn sessions_sharing_a_store_never_upload_twice() {
        let persistence = Arc::new(InMemoryPersistence::new());
        let store = DraftStore::open("ben-1", persistence.clone())
            .await
            .expect("open store");
        let drafts = Arc::new(Mutex::new(store));
        let service =
            Arc::new(InMemorySubmissionService::new().with_latency(Duration::from_millis(100)));
        let network = NetworkObserver::new(true);
        let session_for = |drafts: SharedDrafts| {
            Arc::new(SyncCoordinator::new(
                Arc::new(SyncSession::with_drafts("ben-1", drafts, event_bus())),
                service.clone(),
                network.clone(),
            ))
        };
        let first = session_for(drafts.clone());
        let second = session_for(drafts);

        first.enqueue(draft("Pump invoice")).await.expect("enqueue");
        first.enqueue(draft("Shed video")).await.expect("enqueue");

        let background = {
            let first = first.clone();
            tokio::spawn(async move { first.sync_pending().await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        let late = second.enqueue(draft("Late photo")).await.expect("enqueue");
        second.sync_pending().await.expect("second session pass");
        background.await.expect("join").expect("first session pass");

        assert_eq!(service.attempt_count(), 3);
        assert!(first.list().await.is_empty());
        assert!(persistence.load("ben-1").await.expect("load").is_empty());

        let mut ids: Vec<String> = service
            .accepted()
            .await
            .into_iter()
            .map(|upload| upload.submission.id)
            .collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 3);
        assert!(ids.contains(&late.id));
    }
}
