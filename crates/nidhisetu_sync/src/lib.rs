pub mod coordinator;
pub mod events;
pub mod network;
pub mod probe;
pub mod session;
pub mod worker;

pub use coordinator::{
    AggregateSyncError, DraftFailure, SyncCoordinator, SyncError, SyncOutcome, SyncReport,
};
pub use events::{event_bus, EventLog, SyncObserver, TracingObserver, EVENT_LOG_CAPACITY};
pub use network::{NetworkObserver, NetworkSubscription};
pub use probe::{spawn_probe_loop, ConnectivityProbe, HttpConnectivityProbe};
pub use session::{SharedDrafts, SyncSession};
pub use worker::{spawn_auto_sync, AutoSyncHandle};
