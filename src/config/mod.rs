use serde::Deserialize;

/// Which hosted inference backend performs scan analysis.
/// Selected once at startup; never switched per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelBackend {
    Gemini,
    HuggingFace,
}

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Optional for worker processes.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string
    pub database_url: String,

    /// Redis connection string for the analysis job queue
    pub redis_url: String,

    /// Object storage bucket name
    pub storage_bucket: String,

    /// S3-compatible endpoint URL
    pub storage_endpoint: String,

    /// Storage region (S3-compatible endpoints usually accept "auto")
    #[serde(default = "default_storage_region")]
    pub storage_region: String,

    /// Storage access key ID
    pub storage_access_key: String,

    /// Storage secret access key
    pub storage_secret_key: String,

    /// Base URL for public object retrieval. Defaults to
    /// "{storage_endpoint}/{storage_bucket}" when unset.
    pub storage_public_base: Option<String>,

    /// Lifetime of signed upload URLs, in seconds
    #[serde(default = "default_upload_url_ttl")]
    pub upload_url_ttl_secs: u32,

    /// Inference backend selection: "gemini" or "huggingface"
    pub model_backend: ModelBackend,

    /// Gemini API key (required when model_backend = gemini)
    pub gemini_api_key: Option<String>,

    /// Gemini model identifier
    #[serde(default = "default_gemini_model")]
    pub gemini_model: String,

    /// Hugging Face API token (required when model_backend = huggingface)
    pub hf_api_token: Option<String>,

    /// Hugging Face model identifier
    #[serde(default = "default_hf_model")]
    pub hf_model: String,

    /// Per-call timeout for model inference, in seconds
    #[serde(default = "default_model_timeout")]
    pub model_timeout_secs: u64,

    /// Bind address for the worker's Prometheus scrape listener
    #[serde(default = "default_worker_metrics_addr")]
    pub worker_metrics_addr: String,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_storage_region() -> String {
    "auto".to_string()
}

fn default_upload_url_ttl() -> u32 {
    3600
}

fn default_gemini_model() -> String {
    "gemini-2.5-flash".to_string()
}

fn default_hf_model() -> String {
    "google/medgemma-4b-it".to_string()
}

fn default_model_timeout() -> u64 {
    60
}

fn default_worker_metrics_addr() -> String {
    "0.0.0.0:9464".to_string()
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    #[test]
    fn default_bind_addresses_parse() {
        assert!(default_bind_addr().parse::<SocketAddr>().is_ok());
        assert!(default_worker_metrics_addr().parse::<SocketAddr>().is_ok());
    }
}
