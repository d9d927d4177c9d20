pub mod submission;
pub mod sync;

pub use submission::{
    BeneficiaryId, DraftInput, GeoPoint, MediaType, PendingSubmission, SubmissionId,
    SubmissionStatus, ValidationError,
};
pub use sync::{
    SkipReason, SyncEvent, SyncEventRecord, SyncState, SyncStatus, SyncStatusView,
};
