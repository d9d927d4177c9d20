pub mod http;
pub mod service;

pub use http::{HttpSubmissionService, RemoteConfig};
pub use service::{
    AcceptedUpload, InMemorySubmissionService, RemoteError, SubmissionReceipt, SubmissionService,
};
