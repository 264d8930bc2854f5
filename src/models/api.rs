use garde::Validate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::submission::SubmissionStatus;

/// Request for a signed upload URL.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UploadUrlRequest {
    #[garde(length(min = 1, max = 255))]
    pub filename: String,

    #[garde(length(min = 1, max = 100))]
    pub content_type: String,
}

/// Response carrying the signed URL plus the reference the client must echo
/// back on submit.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadUrlResponse {
    pub signed_url: String,
    pub object_reference: String,
    pub public_url: String,
}

/// Scan order metadata recorded on submit and fed into the analysis prompt.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ScanMetadata {
    #[garde(length(min = 1, max = 255))]
    pub scan_name: String,

    #[garde(length(min = 1, max = 50))]
    pub modality: String,

    #[garde(range(min = 0, max = 130))]
    pub age: i32,

    #[garde(length(min = 1, max = 10))]
    pub sex: String,
}

/// Request to submit an uploaded scan for analysis.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SubmitScanRequest {
    #[garde(length(min = 1, max = 512))]
    pub object_reference: String,

    #[garde(dive)]
    pub metadata: ScanMetadata,
}

/// Response after submitting a scan.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitScanResponse {
    pub submission_id: Uuid,
    pub status: SubmissionStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata() -> ScanMetadata {
        ScanMetadata {
            scan_name: "CT Head".to_string(),
            modality: "CT".to_string(),
            age: 45,
            sex: "M".to_string(),
        }
    }

    #[test]
    fn valid_submit_request_passes() {
        let req = SubmitScanRequest {
            object_reference: "uploads/2026/08/23/abc_scan.png".to_string(),
            metadata: metadata(),
        };
        assert!(req.validate().is_ok());
    }

    #[test]
    fn empty_object_reference_is_rejected() {
        let req = SubmitScanRequest {
            object_reference: String::new(),
            metadata: metadata(),
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn out_of_range_age_is_rejected() {
        let mut md = metadata();
        md.age = 200;
        let req = SubmitScanRequest {
            object_reference: "uploads/x.png".to_string(),
            metadata: md,
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn empty_filename_is_rejected() {
        let req = UploadUrlRequest {
            filename: String::new(),
            content_type: "image/png".to_string(),
        };
        assert!(req.validate().is_err());
    }
}
