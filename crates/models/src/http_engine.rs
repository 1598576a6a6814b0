//! Engines served over an OpenAI-compatible HTTP API.
//!
//! Works with llama.cpp `server`, vLLM, Ollama and anything else exposing
//! `/v1/chat/completions`. The weights live with the server process; the
//! loader checks the endpoint is up and hands back a thin client.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use switchyard_core::engine::{EngineLoader, Generation, InferenceEngine};
use switchyard_core::error::EngineError;
use switchyard_core::model::ModelDescriptor;
use tracing::{debug, info, warn};

/// A model behind an OpenAI-compatible endpoint.
pub struct HttpEngine {
    model: String,
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpEngine {
    pub fn new(
        client: reqwest::Client,
        model: impl Into<String>,
        base_url: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            model: model.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            client,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request_body<'a>(&'a self, prompt: &'a str, max_tokens: u32) -> ApiRequest<'a> {
        ApiRequest {
            model: &self.model,
            messages: vec![ApiMessage {
                role: "user",
                content: prompt,
            }],
            max_tokens,
            stream: false,
        }
    }
}

/// Extract text and token usage from a completion response.
fn parse_completion(response: ApiResponse) -> Result<Generation, EngineError> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| EngineError::GenerationFailed("No choices in response".into()))?;

    let text = choice.message.content.unwrap_or_default();
    let tokens_used = match response.usage {
        Some(usage) => usage.completion_tokens,
        // Servers that omit usage: ~4 characters per token
        None => text.len().div_ceil(4) as u32,
    };

    Ok(Generation { text, tokens_used })
}

#[async_trait]
impl InferenceEngine for HttpEngine {
    async fn generate(&self, prompt: &str, max_tokens: u32) -> Result<Generation, EngineError> {
        let url = format!("{}/chat/completions", self.base_url);
        debug!(model = %self.model, max_tokens, "Sending completion request");

        let mut request = self
            .client
            .post(&url)
            .json(&self.request_body(prompt, max_tokens));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| EngineError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        if status != 200 {
            let body = response.text().await.unwrap_or_default();
            warn!(status, body = %body, model = %self.model, "Engine returned error");
            return Err(EngineError::ApiError {
                status_code: status,
                message: body,
            });
        }

        let parsed: ApiResponse = response.json().await.map_err(|e| EngineError::ApiError {
            status_code: 200,
            message: format!("Failed to parse response: {e}"),
        })?;
        parse_completion(parsed)
    }
}

/// Loader for [`HttpEngine`]s. Each descriptor must carry an `endpoint`.
pub struct HttpEngineLoader {
    client: reqwest::Client,
    api_key: Option<String>,
}

impl HttpEngineLoader {
    pub fn new(api_key: Option<String>) -> Result<Self, EngineError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| EngineError::Unavailable(format!("HTTP client: {e}")))?;
        Ok(Self { client, api_key })
    }
}

#[async_trait]
impl EngineLoader for HttpEngineLoader {
    async fn load(
        &self,
        descriptor: &ModelDescriptor,
    ) -> Result<Arc<dyn InferenceEngine>, EngineError> {
        let endpoint = descriptor.endpoint.as_deref().ok_or_else(|| {
            EngineError::Unavailable(format!("model '{}' has no endpoint", descriptor.id))
        })?;
        let engine = HttpEngine::new(
            self.client.clone(),
            &descriptor.id,
            endpoint,
            self.api_key.clone(),
        );

        // Health check: the server must answer before we call it loaded.
        let url = format!("{}/models", engine.base_url());
        let mut request = self.client.get(&url);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request
            .send()
            .await
            .map_err(|e| EngineError::Network(e.to_string()))?;
        if !response.status().is_success() {
            return Err(EngineError::Unavailable(format!(
                "{url} answered {}",
                response.status()
            )));
        }

        info!(model = %descriptor.id, endpoint, "Engine endpoint ready");
        Ok(Arc::new(engine))
    }
}

// ── OpenAI API wire types ─────────────────────────────────────────────

#[derive(Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    messages: Vec<ApiMessage<'a>>,
    max_tokens: u32,
    stream: bool,
}

#[derive(Serialize)]
struct ApiMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Deserialize)]
struct ApiChoice {
    message: ApiResponseMessage,
}

#[derive(Deserialize)]
struct ApiResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ApiUsage {
    completion_tokens: u32,
}
