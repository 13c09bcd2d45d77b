//! Trait definitions for external interactions
//!
//! These traits define the boundaries between pipeline logic and
//! infrastructure. Implementations live in other crates.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::ops::AddAssign;
use thiserror::Error;

/// Errors reported by an inference backend
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InferenceError {
    /// The call did not complete within its deadline
    #[error("inference timed out")]
    Timeout,

    /// The backend could not be reached or dropped the connection
    #[error("connection failure: {0}")]
    ConnectionFailure(String),

    /// Any other failure (bad request, unknown model, malformed envelope)
    #[error("inference error: {0}")]
    Other(String),
}

impl InferenceError {
    /// Whether a fresh attempt may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, InferenceError::Timeout | InferenceError::ConnectionFailure(_))
    }
}

/// Token accounting reported by the backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Tokens consumed by the prompt
    pub prompt_tokens: u64,
    /// Tokens produced in the completion
    pub completion_tokens: u64,
}

impl TokenUsage {
    /// Prompt plus completion tokens
    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

impl AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: Self) {
        self.prompt_tokens += rhs.prompt_tokens;
        self.completion_tokens += rhs.completion_tokens;
    }
}

/// A single completion request
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceRequest {
    /// Full prompt text
    pub prompt: String,
    /// Backend model identifier
    pub model_name: String,
    /// Sampling temperature (0.0 for deterministic decoding)
    pub temperature: f64,
    /// Per-call deadline in milliseconds
    pub timeout_ms: u64,
}

/// A completion returned by the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InferenceResponse {
    /// Raw generated text
    pub text: String,
    /// Token accounting, zero when the backend does not report it
    pub token_usage: TokenUsage,
}

impl InferenceResponse {
    /// Response with no token accounting
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            token_usage: TokenUsage::default(),
        }
    }
}

/// Trait for inference backends
///
/// Implemented by the infrastructure layer (fieldwise-llm). The pipeline owns
/// only the request/response contract, not the transport.
pub trait InferenceProvider: Send + Sync {
    /// Run one completion
    fn invoke(
        &self,
        request: InferenceRequest,
    ) -> impl Future<Output = Result<InferenceResponse, InferenceError>> + Send;
}

/// Measures text size in whatever unit the chunk budget is expressed in
///
/// Implementations must be monotone: a prefix never measures larger than the
/// text it was taken from.
pub trait SizeEstimator: Send + Sync {
    /// Size of `text`
    fn estimate(&self, text: &str) -> usize;
}
