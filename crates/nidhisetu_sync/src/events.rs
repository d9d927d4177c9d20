use std::collections::VecDeque;
use std::sync::Arc;

use chrono::Utc;
use nidhisetu_contract::{BeneficiaryId, SyncEvent, SyncEventRecord};
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{debug, info, warn};

pub const EVENT_LOG_CAPACITY: usize = 500;
const BUS_CAPACITY: usize = 256;

pub trait SyncObserver: Send + Sync {
    fn on_event(&self, record: &SyncEventRecord);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl SyncObserver for TracingObserver {
    fn on_event(&self, record: &SyncEventRecord) {
        match &record.event {
            SyncEvent::ItemFailed {
                submission_id,
                reason,
            } => warn!(
                beneficiary_id = %record.beneficiary_id,
                sequence = record.sequence,
                submission_id = %submission_id,
                reason = %reason,
                "draft failed to sync"
            ),
            event => info!(
                beneficiary_id = %record.beneficiary_id,
                sequence = record.sequence,
                event = event.name(),
                "sync event"
            ),
        }
    }
}

pub fn event_bus() -> broadcast::Sender<SyncEventRecord> {
    let (sender, _) = broadcast::channel(BUS_CAPACITY);
    sender
}

struct LogState {
    next_sequence: u64,
    entries: VecDeque<SyncEventRecord>,
}

pub struct EventLog {
    beneficiary_id: BeneficiaryId,
    state: Mutex<LogState>,
    observers: RwLock<Vec<Arc<dyn SyncObserver>>>,
    bus: broadcast::Sender<SyncEventRecord>,
}

impl std::fmt::Debug for EventLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLog")
            .field("beneficiary_id", &self.beneficiary_id)
            .finish_non_exhaustive()
    }
}

impl EventLog {
    pub fn new(
        beneficiary_id: impl Into<BeneficiaryId>,
        bus: broadcast::Sender<SyncEventRecord>,
    ) -> Self {
        Self {
            beneficiary_id: beneficiary_id.into(),
            state: Mutex::new(LogState {
                next_sequence: 1,
                entries: VecDeque::new(),
            }),
            observers: RwLock::new(Vec::new()),
            bus,
        }
    }

    pub async fn register(&self, observer: Arc<dyn SyncObserver>) {
        self.observers.write().await.push(observer);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEventRecord> {
        self.bus.subscribe()
    }

    pub async fn emit(&self, event: SyncEvent) -> SyncEventRecord {
        let record = {
            let mut state = self.state.lock().await;
            let record = SyncEventRecord {
                sequence: state.next_sequence,
                beneficiary_id: self.beneficiary_id.clone(),
                emitted_at: Utc::now(),
                event,
            };
            state.next_sequence += 1;
            state.entries.push_back(record.clone());
            while state.entries.len() > EVENT_LOG_CAPACITY {
                state.entries.pop_front();
            }
            record
        };

        for observer in self.observers.read().await.iter() {
            observer.on_event(&record);
        }

        if self.bus.send(record.clone()).is_err() {
            debug!(sequence = record.sequence, "no stream subscribers for sync event");
        }
        record
    }

    pub async fn since(&self, after: u64, limit: usize) -> Vec<SyncEventRecord> {
        let state = self.state.lock().await;
        state
            .entries
            .iter()
            .filter(|record| record.sequence > after)
            .take(limit)
            .cloned()
            .collect()
    }

    pub async fn last_sequence(&self) -> u64 {
        self.state.lock().await.next_sequence - 1
    }
}
