use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;

use crate::config::{AppConfig, ModelBackend};

/// Fixed analysis prompt sent with every scan. The metadata block is appended
/// by the workflow before dispatch.
pub const ANALYSIS_PROMPT: &str = r#"You are a radiology AI. Analyze the provided medical scan image and return a structured report based on its content.

The user provides the ordered scan details: scan_name, modality, age, sex.

Tasks:
1. Compare the body part visible in the image against the ordered scan_name;
   set scan_match to true only if they agree.
2. Assess image quality as one of "Optimal", "Sub-optimal", or "Bad".
3. Write a diagnosis describing only what is visible in the image, covering
   normal and abnormal findings. Do not mention age, sex, image quality, or
   clinical history in the diagnosis field.

Output format (strict JSON, no surrounding prose):
{
  "scan_name": "...",
  "modality": "...",
  "scan_match": true,
  "quality": "Optimal",
  "diagnosis": "..."
}"#;

/// Abstraction over a hosted vision inference endpoint. One implementation
/// per provider, selected at startup from configuration.
#[async_trait]
pub trait AnalysisModel: Send + Sync {
    /// Analyze the image behind `image_url` and return the model's raw text.
    async fn analyze(&self, image_url: &str, prompt: &str) -> Result<String, ModelError>;

    /// Provider name for logging.
    fn name(&self) -> &'static str;
}

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("inference API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("inference API returned no text")]
    EmptyResponse,

    #[error("missing credential: {0}")]
    MissingCredentials(&'static str),
}

/// Build the configured backend. Fails fast at startup when the selected
/// provider's credential is absent.
pub fn from_config(config: &AppConfig) -> Result<Arc<dyn AnalysisModel>, ModelError> {
    match config.model_backend {
        ModelBackend::Gemini => {
            let api_key = config
                .gemini_api_key
                .clone()
                .ok_or(ModelError::MissingCredentials("GEMINI_API_KEY"))?;
            Ok(Arc::new(GeminiClient::new(api_key, config.gemini_model.clone())))
        }
        ModelBackend::HuggingFace => {
            let api_token = config
                .hf_api_token
                .clone()
                .ok_or(ModelError::MissingCredentials("HF_API_TOKEN"))?;
            Ok(Arc::new(HuggingFaceClient::new(
                api_token,
                config.hf_model.clone(),
            )))
        }
    }
}

fn mime_type_for(image_url: &str) -> &'static str {
    let path = image_url.split('?').next().unwrap_or(image_url);
    match path.rsplit('.').next().map(str::to_ascii_lowercase).as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        _ => "image/png",
    }
}

// ── Gemini backend ───────────────────────────────────────────────────

/// Client for the Gemini generateContent API. Gemini cannot fetch remote
/// images itself, so the image is downloaded and inlined as base64.
pub struct GeminiClient {
    http: Client,
    api_key: String,
    model: String,
}

#[derive(Deserialize)]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Deserialize)]
struct GeminiContent {
    parts: Option<Vec<GeminiPart>>,
}

#[derive(Deserialize)]
struct GeminiPart {
    text: Option<String>,
}

impl GeminiClient {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            http: Client::new(),
            api_key,
            model,
        }
    }
}

#[async_trait]
impl AnalysisModel for GeminiClient {
    async fn analyze(&self, image_url: &str, prompt: &str) -> Result<String, ModelError> {
        let image_response = self.http.get(image_url).send().await?;
        if !image_response.status().is_success() {
            return Err(ModelError::Api {
                status: image_response.status().as_u16(),
                body: format!("failed to fetch image {image_url}"),
            });
        }
        let image_bytes = image_response.bytes().await?;

        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent?key={}",
            self.model, self.api_key
        );

        let request_body = serde_json::json!({
            "contents": [{
                "parts": [
                    { "text": prompt },
                    {
                        "inline_data": {
                            "mime_type": mime_type_for(image_url),
                            "data": base64::engine::general_purpose::STANDARD.encode(&image_bytes),
                        }
                    }
                ]
            }]
        });

        let response = self.http.post(&url).json(&request_body).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Api { status, body });
        }

        let parsed: GeminiResponse = response.json().await?;
        parsed
            .candidates
            .into_iter()
            .flatten()
            .filter_map(|c| c.content)
            .filter_map(|c| c.parts)
            .flatten()
            .filter_map(|p| p.text)
            .next()
            .ok_or(ModelError::EmptyResponse)
    }

    fn name(&self) -> &'static str {
        "gemini"
    }
}

// ── Hugging Face backend ─────────────────────────────────────────────

/// Client for Hugging Face's OpenAI-compatible chat completions router.
/// The image is passed by URL; the provider fetches it server-side.
pub struct HuggingFaceClient {
    http: Client,
    api_token: String,
    model: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

impl HuggingFaceClient {
    pub fn new(api_token: String, model: String) -> Self {
        Self {
            http: Client::new(),
            api_token,
            model,
        }
    }
}

#[async_trait]
impl AnalysisModel for HuggingFaceClient {
    async fn analyze(&self, image_url: &str, prompt: &str) -> Result<String, ModelError> {
        let request_body = serde_json::json!({
            "model": self.model,
            "max_tokens": 1024,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": prompt },
                    { "type": "image_url", "image_url": { "url": image_url } }
                ]
            }]
        });

        let response = self
            .http
            .post("https://router.huggingface.co/v1/chat/completions")
            .bearer_auth(&self.api_token)
            .json(&request_body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Api { status, body });
        }

        let parsed: ChatResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .filter_map(|c| c.message.content)
            .find(|c| !c.is_empty())
            .ok_or(ModelError::EmptyResponse)
    }

    fn name(&self) -> &'static str {
        "huggingface"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mime_type_from_extension() {
        assert_eq!(mime_type_for("https://x/scan.jpg"), "image/jpeg");
        assert_eq!(mime_type_for("https://x/scan.JPEG?sig=abc"), "image/jpeg");
        assert_eq!(mime_type_for("https://x/scan.webp"), "image/webp");
        assert_eq!(mime_type_for("https://x/scan.png"), "image/png");
        assert_eq!(mime_type_for("https://x/scan"), "image/png");
    }

    #[test]
    fn gemini_response_text_extraction() {
        let raw = r#"{"candidates":[{"content":{"parts":[{"text":"report"}]}}]}"#;
        let parsed: GeminiResponse = serde_json::from_str(raw).unwrap();
        let text = parsed
            .candidates
            .into_iter()
            .flatten()
            .filter_map(|c| c.content)
            .filter_map(|c| c.parts)
            .flatten()
            .filter_map(|p| p.text)
            .next();
        assert_eq!(text.as_deref(), Some("report"));
    }

    #[test]
    fn chat_response_skips_empty_content() {
        let raw = r#"{"choices":[{"message":{"content":""}},{"message":{"content":"report"}}]}"#;
        let parsed: ChatResponse = serde_json::from_str(raw).unwrap();
        let text = parsed
            .choices
            .into_iter()
            .filter_map(|c| c.message.content)
            .find(|c| !c.is_empty());
        assert_eq!(text.as_deref(), Some("report"));
    }
}
