use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::str::FromStr;
use uuid::Uuid;

use crate::models::api::ScanMetadata;
use crate::models::submission::{StatusCounts, Submission, SubmissionStatus};

const SUBMISSION_COLUMNS: &str = "id, image_key, image_url, scan_name, modality, age, sex, \
     status, result, error, created_at, updated_at";

fn submission_from_row(row: &PgRow) -> Result<Submission, sqlx::Error> {
    let status_str: String = row.try_get("status")?;
    // Unknown values fall back to pending, matching the column default.
    let status = SubmissionStatus::from_str(&status_str).unwrap_or(SubmissionStatus::Pending);

    Ok(Submission {
        id: row.try_get("id")?,
        image_key: row.try_get("image_key")?,
        image_url: row.try_get("image_url")?,
        scan_name: row.try_get("scan_name")?,
        modality: row.try_get("modality")?,
        age: row.try_get("age")?,
        sex: row.try_get("sex")?,
        status,
        result: row.try_get("result")?,
        error: row.try_get("error")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Insert a new submission in pending state
pub async fn create_submission(
    pool: &PgPool,
    image_key: &str,
    image_url: &str,
    metadata: &ScanMetadata,
) -> Result<Submission, sqlx::Error> {
    let sql = format!(
        r#"
        INSERT INTO submissions (image_key, image_url, scan_name, modality, age, sex, status)
        VALUES ($1, $2, $3, $4, $5, $6, 'pending')
        RETURNING {SUBMISSION_COLUMNS}
        "#,
    );
    let row = sqlx::query(&sql)
        .bind(image_key)
        .bind(image_url)
        .bind(&metadata.scan_name)
        .bind(&metadata.modality)
        .bind(metadata.age)
        .bind(&metadata.sex)
        .fetch_one(pool)
        .await?;

    submission_from_row(&row)
}

/// Get a submission by ID
pub async fn get_submission(
    pool: &PgPool,
    id: Uuid,
) -> Result<Option<Submission>, sqlx::Error> {
    let sql = format!("SELECT {SUBMISSION_COLUMNS} FROM submissions WHERE id = $1");
    let row = sqlx::query(&sql).bind(id).fetch_optional(pool).await?;

    row.as_ref().map(submission_from_row).transpose()
}

/// List submissions, newest first
pub async fn list_submissions(
    pool: &PgPool,
    limit: i64,
) -> Result<Vec<Submission>, sqlx::Error> {
    let sql =
        format!("SELECT {SUBMISSION_COLUMNS} FROM submissions ORDER BY created_at DESC LIMIT $1");
    let rows = sqlx::query(&sql).bind(limit).fetch_all(pool).await?;

    rows.iter().map(submission_from_row).collect()
}

/// Move a submission from pending to processing. The status predicate keeps
/// terminal rows terminal: a stray processing write can never resurrect a
/// completed or failed submission.
pub async fn mark_processing(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE submissions
        SET status = 'processing', updated_at = NOW()
        WHERE id = $1 AND status IN ('pending', 'processing')
        "#,
    )
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Terminal write: record the analysis result and mark complete.
pub async fn complete_submission(
    pool: &PgPool,
    id: Uuid,
    result: &serde_json::Value,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE submissions
        SET status = 'complete', result = $2, error = NULL, updated_at = NOW()
        WHERE id = $1 AND status = 'processing'
        "#,
    )
    .bind(id)
    .bind(result)
    .execute(pool)
    .await?;

    Ok(())
}

/// Terminal write: record the failure reason and mark failed.
pub async fn fail_submission(pool: &PgPool, id: Uuid, error: &str) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE submissions
        SET status = 'failed', error = $2, result = NULL, updated_at = NOW()
        WHERE id = $1 AND status IN ('pending', 'processing')
        "#,
    )
    .bind(id)
    .bind(error)
    .execute(pool)
    .await?;

    Ok(())
}

/// Aggregate submission counts by status in a single round trip
pub async fn count_by_status(pool: &PgPool) -> Result<StatusCounts, sqlx::Error> {
    let rows = sqlx::query("SELECT status, COUNT(*) AS count FROM submissions GROUP BY status")
        .fetch_all(pool)
        .await?;

    let mut counts = StatusCounts::default();
    for row in rows {
        let status: String = row.try_get("status")?;
        let count: i64 = row.try_get("count")?;
        counts.total += count;
        match SubmissionStatus::from_str(&status) {
            Ok(SubmissionStatus::Pending) => counts.pending += count,
            Ok(SubmissionStatus::Processing) => counts.processing += count,
            Ok(SubmissionStatus::Complete) => counts.complete += count,
            Ok(SubmissionStatus::Failed) => counts.failed += count,
            Err(_) => {}
        }
    }

    Ok(counts)
}
