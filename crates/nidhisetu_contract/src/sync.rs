use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::submission::{BeneficiaryId, SubmissionId};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    #[default]
    Idle,
    Syncing,
    Error,
}

impl SyncStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncStatus::Idle => "idle",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncState {
    pub sync_status: SyncStatus,
    pub error: Option<String>,
    pub last_synced_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncStatusView {
    pub beneficiary_id: BeneficiaryId,
    pub online: bool,
    pub sync_status: SyncStatus,
    pub error: Option<String>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub pending_count: usize,
    pub failed_count: usize,
    pub total_drafts: usize,
    pub can_sync: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Offline,
    NoDrafts,
    AlreadySyncing,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
    Enqueued {
        submission_id: SubmissionId,
        asset_name: String,
    },
    SyncStarted {
        draft_count: usize,
    },
    ItemSynced {
        submission_id: SubmissionId,
        remote_id: String,
    },
    ItemFailed {
        submission_id: SubmissionId,
        reason: String,
    },
    SyncCompleted {
        synced: usize,
        failed: usize,
        status: SyncStatus,
    },
    SyncSkipped {
        reason: SkipReason,
    },
    SessionReset,
}

impl SyncEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SyncEvent::Enqueued { .. } => "enqueued",
            SyncEvent::SyncStarted { .. } => "sync_started",
            SyncEvent::ItemSynced { .. } => "item_synced",
            SyncEvent::ItemFailed { .. } => "item_failed",
            SyncEvent::SyncCompleted { .. } => "sync_completed",
            SyncEvent::SyncSkipped { .. } => "sync_skipped",
            SyncEvent::SessionReset => "session_reset",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncEventRecord {
    pub sequence: u64,
    pub beneficiary_id: BeneficiaryId,
    pub emitted_at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: SyncEvent,
}
