use std::sync::Arc;

use nidhisetu_contract::{BeneficiaryId, SyncEvent, SyncEventRecord, SyncState};
use nidhisetu_storage::{DraftError, DraftPersistence, DraftStore};
use tokio::sync::{broadcast, Mutex, OwnedMutexGuard, RwLock};
use tracing::info;

use crate::events::EventLog;

pub type SharedDrafts = Arc<Mutex<DraftStore>>;

/// Lock order is `state` before `drafts`. The draft store may be shared with
/// later sessions of the same beneficiary.
#[derive(Debug)]
pub struct SyncSession {
    beneficiary_id: BeneficiaryId,
    pub(crate) drafts: SharedDrafts,
    pub(crate) state: RwLock<SyncState>,
    pass: Arc<Mutex<()>>,
    events: EventLog,
}

impl SyncSession {
    pub async fn open(
        beneficiary_id: impl Into<BeneficiaryId>,
        persistence: Arc<dyn DraftPersistence>,
        bus: broadcast::Sender<SyncEventRecord>,
    ) -> Result<Self, DraftError> {
        let beneficiary_id = beneficiary_id.into();
        let drafts = DraftStore::open(beneficiary_id.clone(), persistence).await?;
        Ok(Self::with_drafts(beneficiary_id, Arc::new(Mutex::new(drafts)), bus))
    }

    pub fn with_drafts(
        beneficiary_id: impl Into<BeneficiaryId>,
        drafts: SharedDrafts,
        bus: broadcast::Sender<SyncEventRecord>,
    ) -> Self {
        let beneficiary_id = beneficiary_id.into();
        info!(beneficiary_id = %beneficiary_id, "sync session opened");

        Self {
            events: EventLog::new(beneficiary_id.clone(), bus),
            beneficiary_id,
            drafts,
            state: RwLock::new(SyncState::default()),
            pass: Arc::new(Mutex::new(())),
        }
    }

    pub fn beneficiary_id(&self) -> &str {
        &self.beneficiary_id
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn drafts(&self) -> &SharedDrafts {
        &self.drafts
    }

    pub async fn state(&self) -> SyncState {
        self.state.read().await.clone()
    }

    // Held for the whole of a pass. Callers hold the state write lock.
    pub(crate) fn try_begin_pass(&self) -> Option<OwnedMutexGuard<()>> {
        self.pass.clone().try_lock_owned().ok()
    }

    /// Waits for an in-flight pass to finish first.
    pub async fn reset(&self) {
        let _pass = self.pass.lock().await;
        *self.state.write().await = SyncState::default();
        self.events.emit(SyncEvent::SessionReset).await;
        info!(beneficiary_id = %self.beneficiary_id, "sync session reset");
    }
}
