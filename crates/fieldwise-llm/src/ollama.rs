//! Ollama Provider Implementation
//!
//! Provides integration with Ollama's local LLM API.
//!
//! # Features
//!
//! - Async HTTP communication with the `/api/generate` endpoint
//! - Configurable endpoint and model
//! - Per-request timeout and sampling temperature
//! - Error classification into the retryable / terminal classes the
//!   dispatcher understands
//!
//! Retries are not performed here; the pipeline's dispatcher owns them.
//!
//! # Examples
//!
//! ```no_run
//! use fieldwise_llm::OllamaProvider;
//!
//! let provider = OllamaProvider::new("http://localhost:11434").unwrap();
//! ```

use fieldwise_domain::{
    InferenceError, InferenceProvider, InferenceRequest, InferenceResponse, TokenUsage,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Default Ollama API endpoint
pub const DEFAULT_ENDPOINT: &str = "http://localhost:11434";

/// Connect timeout for the underlying HTTP client (10 seconds)
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Ollama API provider for local LLM inference
pub struct OllamaProvider {
    endpoint: String,
    client: reqwest::Client,
    json_mode: bool,
}

/// Request body for Ollama generate API
#[derive(Serialize)]
struct OllamaGenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'a str>,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f64,
}

/// Response from Ollama generate API
#[derive(Deserialize)]
struct OllamaGenerateResponse {
    response: String,
    #[serde(default)]
    prompt_eval_count: u64,
    #[serde(default)]
    eval_count: u64,
}

impl OllamaProvider {
    /// Create a new Ollama provider
    ///
    /// # Parameters
    ///
    /// - `endpoint`: Ollama API endpoint (e.g., "http://localhost:11434")
    ///
    /// # Errors
    ///
    /// Returns `InferenceError::Other` if the HTTP client cannot be built.
    pub fn new(endpoint: impl Into<String>) -> Result<Self, InferenceError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| InferenceError::Other(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            client,
            json_mode: true,
        })
    }

    /// Create a provider for `http://localhost:11434`
    pub fn default_endpoint() -> Result<Self, InferenceError> {
        Self::new(DEFAULT_ENDPOINT)
    }

    /// Toggle Ollama's constrained JSON output mode (on by default)
    pub fn with_json_mode(mut self, enabled: bool) -> Self {
        self.json_mode = enabled;
        self
    }

    /// Endpoint this provider talks to
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn generate(&self, request: &InferenceRequest) -> Result<InferenceResponse, InferenceError> {
        let url = format!("{}/api/generate", self.endpoint);

        let body = OllamaGenerateRequest {
            model: &request.model_name,
            prompt: &request.prompt,
            stream: false,
            format: self.json_mode.then_some("json"),
            options: OllamaOptions {
                temperature: request.temperature,
            },
        };

        debug!(model = %request.model_name, prompt_len = request.prompt.len(), "Calling Ollama");

        let response = self
            .client
            .post(&url)
            .timeout(Duration::from_millis(request.timeout_ms))
            .json(&body)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(InferenceError::Other(format!(
                "Model not available: {}",
                request.model_name
            )));
        }
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            let message = format!("HTTP {}: {}", status, error_text);
            return Err(if is_transient_status(status) {
                InferenceError::ConnectionFailure(message)
            } else {
                InferenceError::Other(message)
            });
        }

        let parsed: OllamaGenerateResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                InferenceError::Timeout
            } else {
                InferenceError::Other(format!("Failed to parse response: {}", e))
            }
        })?;

        Ok(InferenceResponse {
            text: parsed.response,
            token_usage: TokenUsage {
                prompt_tokens: parsed.prompt_eval_count,
                completion_tokens: parsed.eval_count,
            },
        })
    }
}

impl InferenceProvider for OllamaProvider {
    async fn invoke(&self, request: InferenceRequest) -> Result<InferenceResponse, InferenceError> {
        self.generate(&request).await
    }
}

fn classify_transport_error(e: reqwest::Error) -> InferenceError {
    if e.is_timeout() {
        InferenceError::Timeout
    } else if e.is_connect() || e.is_request() {
        InferenceError::ConnectionFailure(format!("Request failed: {}", e))
    } else {
        InferenceError::Other(format!("Request failed: {}", e))
    }
}

/// Gateway errors and overload responses are worth another attempt
fn is_transient_status(status: reqwest::StatusCode) -> bool {
    matches!(status.as_u16(), 429 | 502 | 503 | 504)
}
