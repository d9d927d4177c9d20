use std::sync::Arc;

use chrono::Utc;
use nidhisetu_contract::{
    BeneficiaryId, DraftInput, PendingSubmission, SubmissionId, SubmissionStatus, ValidationError,
};
use thiserror::Error;
use tracing::{info, warn};

use crate::persistence::DraftPersistence;

pub const INTERRUPTED_REASON: &str = "interrupted before acknowledgement";

#[derive(Debug, Error)]
pub enum DraftError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("draft {0} not found")]
    NotFound(SubmissionId),
    #[error("draft {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: SubmissionId,
        from: SubmissionStatus,
        to: SubmissionStatus,
    },
    #[error("draft storage failure: {0:#}")]
    Storage(anyhow::Error),
}

/// Mutations are written through before they return. A failed write rolls
/// the in-memory list back.
pub struct DraftStore {
    beneficiary_id: BeneficiaryId,
    drafts: Vec<PendingSubmission>,
    persistence: Arc<dyn DraftPersistence>,
}

impl std::fmt::Debug for DraftStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DraftStore")
            .field("beneficiary_id", &self.beneficiary_id)
            .field("drafts", &self.drafts.len())
            .finish()
    }
}

impl DraftStore {
    pub async fn open(
        beneficiary_id: impl Into<BeneficiaryId>,
        persistence: Arc<dyn DraftPersistence>,
    ) -> Result<Self, DraftError> {
        let beneficiary_id = beneficiary_id.into();
        let loaded = persistence
            .load(&beneficiary_id)
            .await
            .map_err(DraftError::Storage)?;

        let loaded_len = loaded.len();
        let mut recovered = 0usize;
        let now = Utc::now();
        let drafts: Vec<PendingSubmission> = loaded
            .into_iter()
            .filter(|draft| draft.status != SubmissionStatus::Synced)
            .map(|mut draft| {
                // A pass died between upload and acknowledgement.
                if draft.status == SubmissionStatus::Syncing {
                    draft.status = SubmissionStatus::Failed;
                    draft.failure_reason = Some(INTERRUPTED_REASON.to_string());
                    draft.updated_at = now;
                    recovered += 1;
                }
                draft
            })
            .collect();

        let store = Self {
            beneficiary_id,
            drafts,
            persistence,
        };

        if recovered > 0 || store.drafts.len() != loaded_len {
            warn!(
                beneficiary_id = %store.beneficiary_id,
                recovered,
                dropped = loaded_len - store.drafts.len(),
                "draft store recovered from interrupted sync"
            );
            store.persist().await?;
        }

        info!(
            beneficiary_id = %store.beneficiary_id,
            drafts = store.drafts.len(),
            "draft store opened"
        );
        Ok(store)
    }

    pub fn beneficiary_id(&self) -> &str {
        &self.beneficiary_id
    }

    pub async fn enqueue(&mut self, input: DraftInput) -> Result<PendingSubmission, DraftError> {
        let submission = input.into_submission(Utc::now())?;
        self.drafts.push(submission.clone());

        if let Err(err) = self.persist().await {
            self.drafts.pop();
            return Err(err);
        }

        info!(
            beneficiary_id = %self.beneficiary_id,
            submission_id = %submission.id,
            asset_name = %submission.asset_name,
            "draft enqueued"
        );
        Ok(submission)
    }

    pub fn list(&self) -> Vec<PendingSubmission> {
        self.drafts
            .iter()
            .filter(|draft| draft.status != SubmissionStatus::Synced)
            .cloned()
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<&PendingSubmission> {
        self.drafts.iter().find(|draft| draft.id == id)
    }

    pub fn len(&self) -> usize {
        self.drafts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drafts.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.count_with(SubmissionStatus::Pending)
    }

    pub fn failed_count(&self) -> usize {
        self.count_with(SubmissionStatus::Failed)
    }

    pub async fn mark_syncing(&mut self, id: &str) -> Result<PendingSubmission, DraftError> {
        self.transition(id, SubmissionStatus::Syncing, None).await
    }

    pub async fn mark_synced(&mut self, id: &str) -> Result<PendingSubmission, DraftError> {
        self.transition(id, SubmissionStatus::Synced, None).await
    }

    pub async fn mark_failed(
        &mut self,
        id: &str,
        reason: &str,
    ) -> Result<PendingSubmission, DraftError> {
        self.transition(id, SubmissionStatus::Failed, Some(reason))
            .await
    }

    pub async fn remove(&mut self, id: &str) -> Result<PendingSubmission, DraftError> {
        let index = self.index_of(id)?;
        let removed = self.drafts.remove(index);

        if let Err(err) = self.persist().await {
            self.drafts.insert(index, removed);
            return Err(err);
        }

        info!(
            beneficiary_id = %self.beneficiary_id,
            submission_id = %removed.id,
            "draft removed"
        );
        Ok(removed)
    }

    async fn transition(
        &mut self,
        id: &str,
        to: SubmissionStatus,
        reason: Option<&str>,
    ) -> Result<PendingSubmission, DraftError> {
        let index = self.index_of(id)?;
        let previous = self.drafts[index].clone();

        if !previous.status.can_transition_to(to) {
            return Err(DraftError::InvalidTransition {
                id: previous.id,
                from: previous.status,
                to,
            });
        }

        {
            let draft = &mut self.drafts[index];
            draft.status = to;
            draft.updated_at = Utc::now();
            match to {
                SubmissionStatus::Syncing => {
                    draft.attempts = draft.attempts.saturating_add(1);
                    draft.failure_reason = None;
                }
                SubmissionStatus::Failed => {
                    draft.failure_reason = reason.map(str::to_string);
                }
                _ => draft.failure_reason = None,
            }
        }

        if let Err(err) = self.persist().await {
            self.drafts[index] = previous;
            return Err(err);
        }

        Ok(self.drafts[index].clone())
    }

    fn index_of(&self, id: &str) -> Result<usize, DraftError> {
        self.drafts
            .iter()
            .position(|draft| draft.id == id)
            .ok_or_else(|| DraftError::NotFound(id.to_string()))
    }

    fn count_with(&self, status: SubmissionStatus) -> usize {
        self.drafts
            .iter()
            .filter(|draft| draft.status == status)
            .count()
    }

    async fn persist(&self) -> Result<(), DraftError> {
        self.persistence
            .save(&self.beneficiary_id, &self.drafts)
            .await
            .map_err(DraftError::Storage)
    }
}
