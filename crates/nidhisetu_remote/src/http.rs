use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nidhisetu_contract::{GeoPoint, MediaType, PendingSubmission};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::service::{RemoteError, SubmissionReceipt, SubmissionService};

const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RemoteConfig {
    pub base_url: String,
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Serialize)]
struct UploadRequest<'a> {
    submission_id: &'a str,
    asset_name: &'a str,
    captured_at: DateTime<Utc>,
    location: GeoPoint,
    media_type: MediaType,
    media_ref: &'a str,
    attempt: u32,
}

#[derive(Debug, Default, Deserialize)]
struct UploadResponse {
    #[serde(default)]
    remote_id: Option<String>,
    #[serde(default)]
    accepted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct HttpSubmissionService {
    client: reqwest::Client,
    base_url: Url,
    auth_token: Option<String>,
}

impl HttpSubmissionService {
    pub fn new(config: &RemoteConfig) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RemoteError::Network(e.to_string()))?;
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| RemoteError::InvalidUrl(format!("{}: {e}", config.base_url)))?;
        if base_url.cannot_be_a_base() {
            return Err(RemoteError::InvalidUrl(config.base_url.clone()));
        }

        Ok(Self {
            client,
            base_url,
            auth_token: config.auth_token.clone(),
        })
    }

    // The id is a single escaped path segment.
    fn submissions_url(&self, beneficiary_id: &str) -> Result<Url, RemoteError> {
        if beneficiary_id.is_empty() || matches!(beneficiary_id, "." | "..") {
            return Err(RemoteError::InvalidUrl(format!(
                "beneficiary id {beneficiary_id:?} is not a path segment"
            )));
        }

        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| RemoteError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(["v1", "beneficiaries", beneficiary_id, "submissions"]);
        Ok(url)
    }
}

#[async_trait]
impl SubmissionService for HttpSubmissionService {
    async fn upload(
        &self,
        beneficiary_id: &str,
        submission: &PendingSubmission,
    ) -> Result<SubmissionReceipt, RemoteError> {
        let body = UploadRequest {
            submission_id: &submission.id,
            asset_name: &submission.asset_name,
            captured_at: submission.captured_at,
            location: submission.location,
            media_type: submission.media_type,
            media_ref: &submission.media_ref,
            attempt: submission.attempts,
        };

        let mut request = self
            .client
            .post(self.submissions_url(beneficiary_id)?)
            .header("Idempotency-Key", submission.id.as_str())
            .json(&body);
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| RemoteError::Network(e.to_string()))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| RemoteError::Network(e.to_string()))?;

        if !status.is_success() {
            warn!(
                submission_id = %submission.id,
                status = status.as_u16(),
                "remote rejected submission"
            );
            return Err(RemoteError::Rejected {
                status: status.as_u16(),
                message: truncate(&text, MAX_ERROR_BODY),
            });
        }

        let parsed = if text.trim().is_empty() {
            UploadResponse::default()
        } else {
            serde_json::from_str::<UploadResponse>(&text)
                .map_err(|e| RemoteError::Serialization(e.to_string()))?
        };

        debug!(submission_id = %submission.id, "remote acknowledged submission");
        Ok(SubmissionReceipt {
            submission_id: submission.id.clone(),
            remote_id: parsed.remote_id.unwrap_or_else(|| submission.id.clone()),
            accepted_at: parsed.accepted_at.unwrap_or_else(Utc::now),
        })
    }
}

fn truncate(text: &str, max: usize) -> String {
    let trimmed = text.trim();
    if trimmed.len() <= max {
        return trimmed.to_string();
    }
    let mut end = max;
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &trimmed[..end])
}
