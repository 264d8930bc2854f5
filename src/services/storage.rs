use chrono::Utc;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderValue};
use s3::creds::Credentials;
use s3::{Bucket, Region};
use uuid::Uuid;

/// Client for S3-compatible object storage. Issues time-limited presigned
/// upload URLs so image bytes never pass through the API server.
pub struct StorageClient {
    bucket: Box<Bucket>,
    public_base: String,
}

impl StorageClient {
    pub fn new(
        bucket_name: &str,
        endpoint: &str,
        region: &str,
        access_key: &str,
        secret_key: &str,
        public_base: Option<&str>,
    ) -> Result<Self, StorageError> {
        let region = Region::Custom {
            region: region.to_string(),
            endpoint: endpoint.to_string(),
        };

        let credentials = Credentials::new(Some(access_key), Some(secret_key), None, None, None)
            .map_err(|e| StorageError::Config(e.to_string()))?;

        let bucket = Bucket::new(bucket_name, region, credentials)
            .map_err(|e| StorageError::Config(e.to_string()))?;

        let public_base = public_base
            .map(|b| b.trim_end_matches('/').to_string())
            .unwrap_or_else(|| format!("{}/{}", endpoint.trim_end_matches('/'), bucket_name));

        Ok(Self {
            bucket,
            public_base,
        })
    }

    /// Build a fresh object key for an upload: date-partitioned, prefixed
    /// with a UUID so concurrent uploads of the same filename never collide.
    pub fn object_key(filename: &str) -> String {
        let sanitized: String = filename
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                    c
                } else {
                    '_'
                }
            })
            .collect();

        format!(
            "uploads/{}/{}_{}",
            Utc::now().format("%Y/%m/%d"),
            Uuid::new_v4(),
            sanitized
        )
    }

    /// Presign a PUT URL for direct client upload, valid for `ttl_secs`.
    /// The declared content type is signed into the URL, so the bucket
    /// rejects uploads that present a different Content-Type.
    pub async fn create_upload_url(
        &self,
        key: &str,
        content_type: &str,
        ttl_secs: u32,
    ) -> Result<String, StorageError> {
        let value = HeaderValue::from_str(content_type)
            .map_err(|_| StorageError::InvalidContentType(content_type.to_string()))?;
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, value);

        self.bucket
            .presign_put(key, ttl_secs, Some(headers), None)
            .await
            .map_err(StorageError::S3)
    }

    /// Public retrieval URL for a stored object.
    pub fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.public_base, key)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("S3 operation failed: {0}")]
    S3(#[from] s3::error::S3Error),

    #[error("Storage configuration error: {0}")]
    Config(String),

    #[error("invalid content type: {0}")]
    InvalidContentType(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> StorageClient {
        StorageClient::new(
            "scans",
            "https://storage.example.com",
            "auto",
            "test-access-key",
            "test-secret-key",
            None,
        )
        .expect("client construction is offline")
    }

    #[test]
    fn object_keys_are_date_partitioned_and_unique() {
        let a = StorageClient::object_key("chest xray.png");
        let b = StorageClient::object_key("chest xray.png");

        assert!(a.starts_with("uploads/"));
        assert!(a.ends_with("chest_xray.png"));
        assert!(!a.contains(' '));
        assert_ne!(a, b);
    }

    #[test]
    fn public_url_joins_base_and_key() {
        let c = client();
        assert_eq!(
            c.public_url("uploads/2026/08/23/abc.png"),
            "https://storage.example.com/scans/uploads/2026/08/23/abc.png"
        );
    }

    #[test]
    fn explicit_public_base_overrides_endpoint() {
        let c = StorageClient::new(
            "scans",
            "https://storage.example.com",
            "auto",
            "k",
            "s",
            Some("https://cdn.example.com/"),
        )
        .unwrap();
        assert_eq!(c.public_url("a/b.png"), "https://cdn.example.com/a/b.png");
    }

    // Presigning is pure computation over the credentials; no network involved.
    #[tokio::test]
    async fn presigned_url_references_key_and_signature() {
        let c = client();
        let url = c
            .create_upload_url("uploads/2026/08/23/abc.png", "image/png", 3600)
            .await
            .expect("presign should not fail");

        assert!(url.contains("uploads/2026/08/23/abc.png"));
        assert!(url.contains("X-Amz-Signature"));
    }

    // The declared content type must be covered by the signature, not merely
    // echoed back: a URL signed over host alone would accept any upload type.
    #[tokio::test]
    async fn presigned_url_signs_the_content_type() {
        let c = client();
        let url = c
            .create_upload_url("uploads/2026/08/23/abc.png", "image/png", 3600)
            .await
            .expect("presign should not fail");

        let lowered = url.to_lowercase();
        assert!(lowered.contains("content-type"));
    }

    #[tokio::test]
    async fn content_type_with_header_injection_is_rejected() {
        let c = client();
        let err = c
            .create_upload_url("uploads/abc.png", "image/png\r\nx-evil: 1", 3600)
            .await
            .unwrap_err();

        assert!(matches!(err, StorageError::InvalidContentType(_)));
    }
}
