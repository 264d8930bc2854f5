use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::db::queries;
use crate::error::AppError;
use crate::models::api::{SubmitScanRequest, UploadUrlRequest, UploadUrlResponse};
use crate::models::submission::{StatusCounts, Submission};
use crate::services::model::{AnalysisModel, ANALYSIS_PROMPT};
use crate::services::queue::{AnalysisJob, JobQueue};
use crate::services::storage::StorageClient;

/// Upper bound on the submission listing, newest first.
const LIST_LIMIT: i64 = 100;

/// The submission workflow: the only component with sequencing logic.
/// All external clients are injected at construction; no globals.
pub struct Workflow {
    pub db: PgPool,
    pub storage: Arc<StorageClient>,
    pub queue: Arc<JobQueue>,
    pub model: Arc<dyn AnalysisModel>,
    pub upload_url_ttl_secs: u32,
    pub model_timeout: Duration,
}

impl Workflow {
    pub fn new(
        db: PgPool,
        storage: Arc<StorageClient>,
        queue: Arc<JobQueue>,
        model: Arc<dyn AnalysisModel>,
        upload_url_ttl_secs: u32,
        model_timeout: Duration,
    ) -> Self {
        Self {
            db,
            storage,
            queue,
            model,
            upload_url_ttl_secs,
            model_timeout,
        }
    }

    /// Issue a time-limited signed PUT URL scoped to a fresh object key.
    /// The client uploads directly to the bucket and echoes the reference
    /// back on submit.
    pub async fn request_upload_url(
        &self,
        req: &UploadUrlRequest,
    ) -> Result<UploadUrlResponse, AppError> {
        let key = StorageClient::object_key(&req.filename);
        let signed_url = self
            .storage
            .create_upload_url(&key, &req.content_type, self.upload_url_ttl_secs)
            .await?;
        let public_url = self.storage.public_url(&key);

        metrics::counter!("upload_urls_issued_total").increment(1);
        tracing::debug!(key = %key, content_type = %req.content_type, "issued upload URL");

        Ok(UploadUrlResponse {
            signed_url,
            object_reference: key,
            public_url,
        })
    }

    /// Create a pending submission and enqueue its analysis job. Returns
    /// immediately; the worker performs the analysis.
    pub async fn submit_scan(&self, req: &SubmitScanRequest) -> Result<Submission, AppError> {
        validate_object_reference(&req.object_reference)?;

        let image_url = self.storage.public_url(&req.object_reference);
        let submission =
            queries::create_submission(&self.db, &req.object_reference, &image_url, &req.metadata)
                .await?;

        self.queue
            .enqueue(&AnalysisJob {
                submission_id: submission.id,
            })
            .await?;

        metrics::counter!("scan_submissions_total").increment(1);
        tracing::info!(submission_id = %submission.id, scan_name = %req.metadata.scan_name, "scan submitted");

        Ok(submission)
    }

    /// Worker entry point for one submission. Marks it processing, calls the
    /// model (fixed timeout, single retry), then performs exactly one
    /// terminal write. Model failures never propagate; only database errors
    /// bubble up to the worker loop.
    pub async fn run_analysis(&self, submission_id: Uuid) -> Result<(), AppError> {
        let Some(submission) = queries::get_submission(&self.db, submission_id).await? else {
            tracing::warn!(%submission_id, "analysis job references unknown submission");
            return Ok(());
        };

        // Duplicate queue delivery after a terminal write is a no-op.
        if submission.status.is_terminal() {
            tracing::debug!(%submission_id, status = %submission.status, "submission already terminal");
            return Ok(());
        }

        if !queries::mark_processing(&self.db, submission_id).await? {
            return Ok(());
        }

        let prompt = build_prompt(&submission);
        let started = std::time::Instant::now();
        let outcome = call_model_with_retry(
            self.model.as_ref(),
            &submission.image_url,
            &prompt,
            self.model_timeout,
        )
        .await;
        metrics::histogram!("analysis_processing_seconds").record(started.elapsed().as_secs_f64());

        match outcome {
            Ok(text) => {
                let result = parse_analysis_text(&text);
                queries::complete_submission(&self.db, submission_id, &result).await?;
                metrics::counter!("analysis_completed_total").increment(1);
                tracing::info!(%submission_id, model = self.model.name(), "analysis complete");
            }
            Err(message) => {
                queries::fail_submission(&self.db, submission_id, &message).await?;
                metrics::counter!("analysis_failed_total").increment(1);
                tracing::warn!(%submission_id, error = %message, "analysis failed");
            }
        }

        Ok(())
    }

    /// Read the current record for a submission.
    pub async fn get_result(&self, submission_id: Uuid) -> Result<Submission, AppError> {
        queries::get_submission(&self.db, submission_id)
            .await?
            .ok_or(AppError::NotFound)
    }

    /// Read-only reporting query: submissions, newest first.
    pub async fn list_submissions(&self) -> Result<Vec<Submission>, AppError> {
        Ok(queries::list_submissions(&self.db, LIST_LIMIT).await?)
    }

    /// Read-only reporting query: aggregate counts by status.
    pub async fn get_stats(&self) -> Result<StatusCounts, AppError> {
        Ok(queries::count_by_status(&self.db).await?)
    }
}

/// An object reference must be a plain bucket key: non-empty, bounded, no
/// path traversal, no whitespace or control characters.
fn validate_object_reference(reference: &str) -> Result<(), AppError> {
    if reference.is_empty() {
        return Err(AppError::InvalidInput("object reference is empty".into()));
    }
    if reference.len() > 512 {
        return Err(AppError::InvalidInput("object reference too long".into()));
    }
    if reference.starts_with('/')
        || reference.contains("..")
        || reference.contains('\\')
        || reference.chars().any(|c| c.is_whitespace() || c.is_control())
    {
        return Err(AppError::InvalidInput(
            "object reference is not a valid storage key".into(),
        ));
    }
    Ok(())
}

/// Append the ordered-scan metadata to the fixed analysis prompt.
fn build_prompt(submission: &Submission) -> String {
    let ordered_scan = serde_json::json!({
        "scan_name": submission.scan_name,
        "modality": submission.modality,
        "age": submission.age,
        "sex": submission.sex,
    });
    format!("{ANALYSIS_PROMPT}\n\nordered_scan: {ordered_scan}")
}

/// Models are asked for strict JSON but frequently wrap it in markdown
/// fences or fail to produce JSON at all. Store structured output when we
/// can parse it, raw text otherwise.
fn parse_analysis_text(text: &str) -> serde_json::Value {
    let stripped = strip_code_fences(text);
    serde_json::from_str(stripped)
        .unwrap_or_else(|_| serde_json::json!({ "analysis": text.trim() }))
}

fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the opening fence line (which may carry a language tag) and the
    // closing fence.
    let body = rest.split_once('\n').map(|(_, b)| b).unwrap_or(rest);
    body.trim().trim_end_matches("```").trim()
}

/// One model call with a fixed timeout and exactly one retry. Returns the
/// raw text, or the last error message once both attempts are exhausted.
async fn call_model_with_retry(
    model: &dyn AnalysisModel,
    image_url: &str,
    prompt: &str,
    timeout: Duration,
) -> Result<String, String> {
    let mut last_error = String::new();

    for attempt in 0..2 {
        match tokio::time::timeout(timeout, model.analyze(image_url, prompt)).await {
            Ok(Ok(text)) if !text.trim().is_empty() => return Ok(text),
            Ok(Ok(_)) => last_error = "model returned an empty analysis".to_string(),
            Ok(Err(e)) => last_error = e.to_string(),
            Err(_) => {
                last_error = format!("model call timed out after {}s", timeout.as_secs());
            }
        }

        if attempt == 0 {
            tracing::warn!(error = %last_error, "model call failed, retrying once");
        }
    }

    Err(last_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::model::ModelError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyModel {
        failures_before_success: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl AnalysisModel for FlakyModel {
        async fn analyze(&self, _image_url: &str, _prompt: &str) -> Result<String, ModelError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures_before_success {
                Err(ModelError::EmptyResponse)
            } else {
                Ok("normal".to_string())
            }
        }

        fn name(&self) -> &'static str {
            "flaky"
        }
    }

    struct HungModel;

    #[async_trait]
    impl AnalysisModel for HungModel {
        async fn analyze(&self, _image_url: &str, _prompt: &str) -> Result<String, ModelError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok("never".to_string())
        }

        fn name(&self) -> &'static str {
            "hung"
        }
    }

    #[test]
    fn object_reference_validation() {
        assert!(validate_object_reference("uploads/2026/08/23/abc_scan.png").is_ok());
        assert!(validate_object_reference("").is_err());
        assert!(validate_object_reference("/absolute/key").is_err());
        assert!(validate_object_reference("uploads/../secrets").is_err());
        assert!(validate_object_reference("uploads/with space.png").is_err());
        assert!(validate_object_reference("uploads\\windows.png").is_err());
        assert!(validate_object_reference(&"a".repeat(513)).is_err());
    }

    #[test]
    fn parses_fenced_json_output() {
        let text = "```json\n{\"quality\": \"Optimal\", \"scan_match\": true}\n```";
        let value = parse_analysis_text(text);
        assert_eq!(value["quality"], "Optimal");
        assert_eq!(value["scan_match"], true);
    }

    #[test]
    fn parses_bare_json_output() {
        let value = parse_analysis_text("{\"diagnosis\": \"no acute findings\"}");
        assert_eq!(value["diagnosis"], "no acute findings");
    }

    #[test]
    fn wraps_non_json_output_as_text() {
        let value = parse_analysis_text("The scan appears normal.");
        assert_eq!(value["analysis"], "The scan appears normal.");
    }

    #[test]
    fn prompt_carries_scan_metadata() {
        let submission = Submission {
            id: Uuid::new_v4(),
            image_key: "uploads/x.png".into(),
            image_url: "https://storage.example.com/scans/uploads/x.png".into(),
            scan_name: "CT Head".into(),
            modality: "CT".into(),
            age: 45,
            sex: "M".into(),
            status: crate::models::submission::SubmissionStatus::Pending,
            result: None,
            error: None,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        };
        let prompt = build_prompt(&submission);
        assert!(prompt.contains("CT Head"));
        assert!(prompt.contains("\"modality\":\"CT\""));
        assert!(prompt.starts_with(ANALYSIS_PROMPT));
    }

    #[tokio::test]
    async fn retry_recovers_from_one_failure() {
        let model = FlakyModel {
            failures_before_success: 1,
            calls: AtomicU32::new(0),
        };
        let out =
            call_model_with_retry(&model, "https://x/scan.png", "p", Duration::from_secs(5)).await;
        assert_eq!(out.unwrap(), "normal");
        assert_eq!(model.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn two_failures_are_terminal() {
        let model = FlakyModel {
            failures_before_success: 5,
            calls: AtomicU32::new(0),
        };
        let out =
            call_model_with_retry(&model, "https://x/scan.png", "p", Duration::from_secs(5)).await;
        let err = out.unwrap_err();
        assert!(!err.is_empty());
        // One initial attempt plus exactly one retry.
        assert_eq!(model.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_model_times_out_instead_of_hanging() {
        let out =
            call_model_with_retry(&HungModel, "https://x/scan.png", "p", Duration::from_secs(60))
                .await;
        let err = out.unwrap_err();
        assert!(err.contains("timed out"));
    }
}
