use anyhow::{anyhow, Context};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::{
    error::{AppError, AppResult},
    server_config::cfg,
    HttpClient,
};

const GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// One generation call: an optional system instruction plus the user
/// content.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub system: Option<String>,
    pub user: String,
    pub temperature: f64,
}

#[async_trait]
pub trait ClassificationProvider: Send + Sync {
    async fn generate(&self, request: GenerateRequest) -> AppResult<String>;
}

pub struct GeminiProvider {
    http_client: HttpClient,
    api_key: String,
}

impl GeminiProvider {
    pub fn from_env(http_client: HttpClient) -> AppResult<Self> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .map_err(|_| AppError::Internal(anyhow!("GEMINI_API_KEY is not set")))?;

        Ok(GeminiProvider {
            http_client,
            api_key,
        })
    }
}

#[derive(Debug, Deserialize)]
struct GeminiPart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    parts: Option<Vec<GeminiPart>>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
}

#[async_trait]
impl ClassificationProvider for GeminiProvider {
    async fn generate(&self, request: GenerateRequest) -> AppResult<String> {
        let url = format!(
            "{}/{}:generateContent",
            GEMINI_ENDPOINT, cfg.classifier.model
        );

        let mut body = json!({
            "contents": [{
                "role": "user",
                "parts": [{ "text": request.user }]
            }],
            "generationConfig": { "temperature": request.temperature }
        });
        if let Some(system) = request.system {
            body["systemInstruction"] = json!({ "parts": [{ "text": system }] });
        }

        let resp = self
            .http_client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let detail = resp.text().await.unwrap_or_default();
            return Err(AppError::Internal(anyhow!(
                "Gemini API error {}: {}",
                status,
                detail
            )));
        }

        let parsed = resp.json::<GeminiResponse>().await?;

        let text = parsed
            .candidates
            .and_then(|mut c| c.first_mut().and_then(|c| c.content.take()))
            .and_then(|c| c.parts)
            .and_then(|mut p| p.first_mut().and_then(|p| p.text.take()))
            .context("No text in Gemini response")?;

        Ok(text)
    }
}

/// Canned provider for tests. A request with a system instruction is a
/// classification call and is answered by the first canned response whose
/// key appears in the user content; anything else is treated as a draft
/// request.
#[cfg(any(test, feature = "mock"))]
pub struct StubProvider {
    pub classify_responses: Vec<(String, String)>,
    pub draft_reply: String,
}

#[cfg(any(test, feature = "mock"))]
#[async_trait]
impl ClassificationProvider for StubProvider {
    async fn generate(&self, request: GenerateRequest) -> AppResult<String> {
        if request.system.is_some() {
            let matched = self
                .classify_responses
                .iter()
                .find(|(needle, _)| request.user.contains(needle))
                .map(|(_, resp)| resp.clone());

            return Ok(matched.unwrap_or_else(|| "no canned response".to_string()));
        }

        Ok(self.draft_reply.clone())
    }
}
