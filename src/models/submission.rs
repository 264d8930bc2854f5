use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Lifecycle state of a scan submission. Transitions are forward-only:
/// pending -> processing -> complete | failed.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SubmissionStatus {
    Pending,
    Processing,
    Complete,
    Failed,
}

impl SubmissionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, SubmissionStatus::Complete | SubmissionStatus::Failed)
    }
}

/// One user-initiated request to analyze a medical scan.
///
/// `result` is present only when complete, `error` only when failed; the two
/// are mutually exclusive (also enforced by a table CHECK constraint).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub id: Uuid,
    pub image_key: String,
    pub image_url: String,
    pub scan_name: String,
    pub modality: String,
    pub age: i32,
    pub sex: String,
    pub status: SubmissionStatus,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Aggregate submission counts by status.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct StatusCounts {
    pub total: i64,
    pub pending: i64,
    pub processing: i64,
    pub complete: i64,
    pub failed: i64,
}
