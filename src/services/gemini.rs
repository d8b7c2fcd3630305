//! Gemini `generateContent` client used for describe and follow-up exchange

use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::credentials::ApiKey;
use super::{AudioBytes, Describer, ImageBytes};
use crate::task::TaskError;

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
const NO_DESCRIPTION: &str = "No description returned.";

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
}

#[derive(Debug, Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part {
    Text { text: String },
    Inline { inline_data: Blob },
}

#[derive(Debug, Serialize)]
struct Blob {
    mime_type: String,
    data: String,
}

impl Part {
    fn inline(mime_type: &str, bytes: &[u8]) -> Self {
        Part::Inline {
            inline_data: Blob {
                mime_type: mime_type.to_string(),
                data: BASE64.encode(bytes),
            },
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

impl GenerateResponse {
    /// Concatenated text of the first candidate
    fn text(&self) -> String {
        let text: String = self
            .candidates
            .first()
            .and_then(|candidate| candidate.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|part| part.text.as_deref())
                    .collect()
            })
            .unwrap_or_default();
        let text = text.trim();
        if text.is_empty() {
            NO_DESCRIPTION.to_string()
        } else {
            text.to_string()
        }
    }
}

/// Describer backed by the Gemini REST API
pub struct GeminiClient {
    http: reqwest::Client,
    model: String,
    api_key: ApiKey,
}

impl GeminiClient {
    pub fn new(model: impl Into<String>, api_key: ApiKey) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            model: model.into(),
            api_key,
        })
    }

    async fn generate(&self, parts: Vec<Part>) -> Result<String, TaskError> {
        let key = self.api_key.get().ok_or_else(|| {
            TaskError::DescribeFailed(
                "the API key is not configured. Press control alt K after adding it".to_string(),
            )
        })?;

        let url = format!("{}/{}:generateContent", API_BASE, self.model);
        let body = GenerateRequest {
            contents: vec![Content { parts }],
        };

        debug!(model = %self.model, "sending generateContent request");
        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", key)
            .json(&body)
            .send()
            .await
            .map_err(|e| TaskError::DescribeFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            let detail: String = detail.chars().take(200).collect();
            return Err(TaskError::DescribeFailed(format!("{}: {}", status, detail)));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| TaskError::DescribeFailed(format!("unreadable response: {}", e)))?;

        let text = parsed.text();
        info!(chars = text.len(), "model response received");
        Ok(text)
    }
}

#[async_trait]
impl Describer for GeminiClient {
    async fn describe(&self, image: &ImageBytes, prompt: &str) -> Result<String, TaskError> {
        self.generate(vec![
            Part::Text {
                text: prompt.to_string(),
            },
            Part::inline("image/png", &image.0),
        ])
        .await
    }

    async fn exchange(
        &self,
        audio: &AudioBytes,
        image: &ImageBytes,
        prompt: &str,
    ) -> Result<String, TaskError> {
        self.generate(vec![
            Part::Text {
                text: prompt.to_string(),
            },
            Part::inline("image/png", &image.0),
            Part::inline("audio/wav", &audio.0),
        ])
        .await
    }
}
