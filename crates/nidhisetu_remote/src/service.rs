use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nidhisetu_contract::{PendingSubmission, SubmissionId};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionReceipt {
    pub submission_id: SubmissionId,
    pub remote_id: String,
    pub accepted_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("submission service unavailable")]
    Unavailable,
    #[error("network failure: {0}")]
    Network(String),
    #[error("remote rejected submission ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("serialization failure: {0}")]
    Serialization(String),
    #[error("invalid remote url: {0}")]
    InvalidUrl(String),
}

/// The draft id is stable across retries and serves as the idempotency key.
#[async_trait]
pub trait SubmissionService: Send + Sync {
    async fn upload(
        &self,
        beneficiary_id: &str,
        submission: &PendingSubmission,
    ) -> Result<SubmissionReceipt, RemoteError>;
}

#[derive(Debug, Clone)]
pub struct AcceptedUpload {
    pub beneficiary_id: String,
    pub submission: PendingSubmission,
    pub receipt: SubmissionReceipt,
}

#[derive(Debug)]
pub struct InMemorySubmissionService {
    available: AtomicBool,
    attempts: AtomicUsize,
    latency: Option<Duration>,
    rejected_assets: RwLock<HashSet<String>>,
    accepted: RwLock<Vec<AcceptedUpload>>,
}

impl Default for InMemorySubmissionService {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemorySubmissionService {
    pub fn new() -> Self {
        Self {
            available: AtomicBool::new(true),
            attempts: AtomicUsize::new(0),
            latency: None,
            rejected_assets: RwLock::new(HashSet::new()),
            accepted: RwLock::new(Vec::new()),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub async fn reject_asset(&self, asset_name: &str) {
        self.rejected_assets
            .write()
            .await
            .insert(asset_name.to_string());
    }

    pub async fn accept_asset(&self, asset_name: &str) {
        self.rejected_assets.write().await.remove(asset_name);
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub async fn accepted(&self) -> Vec<AcceptedUpload> {
        self.accepted.read().await.clone()
    }
}

#[async_trait]
impl SubmissionService for InMemorySubmissionService {
    async fn upload(
        &self,
        beneficiary_id: &str,
        submission: &PendingSubmission,
    ) -> Result<SubmissionReceipt, RemoteError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        if !self.available.load(Ordering::SeqCst) {
            return Err(RemoteError::Unavailable);
        }

        if self
            .rejected_assets
            .read()
            .await
            .contains(&submission.asset_name)
        {
            return Err(RemoteError::Rejected {
                status: 422,
                message: format!("evidence '{}' rejected", submission.asset_name),
            });
        }

        let mut accepted = self.accepted.write().await;
        if let Some(existing) = accepted
            .iter()
            .find(|upload| upload.submission.id == submission.id)
        {
            return Ok(existing.receipt.clone());
        }

        let receipt = SubmissionReceipt {
            submission_id: submission.id.clone(),
            remote_id: Uuid::now_v7().to_string(),
            accepted_at: Utc::now(),
        };
        info!(
            beneficiary_id = %beneficiary_id,
            submission_id = %submission.id,
            remote_id = %receipt.remote_id,
            "submission accepted"
        );
        accepted.push(AcceptedUpload {
            beneficiary_id: beneficiary_id.to_string(),
            submission: submission.clone(),
            receipt: receipt.clone(),
        });
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nidhisetu_contract::{DraftInput, GeoPoint, MediaType};

    fn submission(name: &str) -> PendingSubmission {
        DraftInput::new(
            name,
            GeoPoint::new(18.52, 73.85),
            MediaType::Photo,
            "file:///evidence/item.jpg",
        )
        .into_submission(Utc::now())
        .expect("valid draft")
    }

    #[tokio::test]
    async fn duplicate_upload_returns_original_receipt() {
        let service = InMemorySubmissionService::new();
        let draft = submission("Pump invoice");

        let first = service.upload("ben-1", &draft).await.expect("first");
        let second = service.upload("ben-1", &draft).await.expect("second");

        assert_eq!(first, second);
        assert_eq!(service.accepted().await.len(), 1);
        assert_eq!(service.attempt_count(), 2);
    }

    #[tokio::test]
    async fn scripted_rejection_and_outage() {
        let service = InMemorySubmissionService::new();
        service.reject_asset("Blurry photo").await;

        let err = service
            .upload("ben-1", &submission("Blurry photo"))
            .await
            .expect_err("rejected");
        assert!(matches!(err, RemoteError::Rejected { status: 422, .. }));

        service.set_available(false);
        let err = service
            .upload("ben-1", &submission("Pump invoice"))
            .await
            .expect_err("offline");
        assert!(matches!(err, RemoteError::Unavailable));
        assert!(service.accepted().await.is_empty());
    }
}
