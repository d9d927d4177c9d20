use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub type SubmissionId = String;
pub type BeneficiaryId = String;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    #[default]
    Photo,
    Video,
}

impl MediaType {
    pub fn as_str(self) -> &'static str {
        match self {
            MediaType::Photo => "photo",
            MediaType::Video => "video",
        }
    }
}

/// `Pending -> Syncing -> {Synced | Failed}`, and `Failed -> Syncing` on retry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    Pending,
    Syncing,
    Synced,
    Failed,
}

impl SubmissionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SubmissionStatus::Pending => "pending",
            SubmissionStatus::Syncing => "syncing",
            SubmissionStatus::Synced => "synced",
            SubmissionStatus::Failed => "failed",
        }
    }

    pub fn can_transition_to(self, next: SubmissionStatus) -> bool {
        matches!(
            (self, next),
            (SubmissionStatus::Pending, SubmissionStatus::Syncing)
                | (SubmissionStatus::Failed, SubmissionStatus::Syncing)
                | (SubmissionStatus::Syncing, SubmissionStatus::Synced)
                | (SubmissionStatus::Syncing, SubmissionStatus::Failed)
        )
    }
}

impl std::fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingSubmission {
    pub id: SubmissionId,
    pub asset_name: String,
    pub captured_at: DateTime<Utc>,
    pub location: GeoPoint,
    pub media_type: MediaType,
    pub media_ref: String,
    pub status: SubmissionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    #[serde(default)]
    pub attempts: u32,
    pub updated_at: DateTime<Utc>,
}

impl PendingSubmission {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.status,
            SubmissionStatus::Pending | SubmissionStatus::Failed
        )
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DraftInput {
    #[serde(default)]
    pub asset_name: Option<String>,
    #[serde(default)]
    pub location: Option<GeoPoint>,
    #[serde(default)]
    pub media_type: MediaType,
    #[serde(default)]
    pub media_ref: Option<String>,
    #[serde(default)]
    pub captured_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid draft: {}", .problems.join("; "))]
pub struct ValidationError {
    pub problems: Vec<String>,
}

impl DraftInput {
    pub fn new(
        asset_name: impl Into<String>,
        location: GeoPoint,
        media_type: MediaType,
        media_ref: impl Into<String>,
    ) -> Self {
        Self {
            asset_name: Some(asset_name.into()),
            location: Some(location),
            media_type,
            media_ref: Some(media_ref.into()),
            captured_at: None,
        }
    }

    pub fn into_submission(self, now: DateTime<Utc>) -> Result<PendingSubmission, ValidationError> {
        let mut problems = Vec::new();

        let asset_name = match self.asset_name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            Some(_) => {
                problems.push("asset_name cannot be blank".to_string());
                String::new()
            }
            None => {
                problems.push("asset_name is required".to_string());
                String::new()
            }
        };

        let media_ref = match self.media_ref.as_deref().map(str::trim) {
            Some(media_ref) if !media_ref.is_empty() => media_ref.to_string(),
            Some(_) => {
                problems.push("media_ref cannot be blank".to_string());
                String::new()
            }
            None => {
                problems.push("media_ref is required".to_string());
                String::new()
            }
        };

        let location = match self.location {
            Some(point) if point.is_valid() => Some(point),
            Some(point) => {
                problems.push(format!(
                    "location ({}, {}) is out of range",
                    point.latitude, point.longitude
                ));
                None
            }
            None => {
                problems.push("location is required".to_string());
                None
            }
        };

        match location {
            Some(location) if problems.is_empty() => Ok(PendingSubmission {
                id: Uuid::now_v7().to_string(),
                asset_name,
                captured_at: self.captured_at.unwrap_or(now),
                location,
                media_type: self.media_type,
                media_ref,
                status: SubmissionStatus::Pending,
                failure_reason: None,
                attempts: 0,
                updated_at: now,
            }),
            _ => Err(ValidationError { problems }),
        }
    }
}
