//! Fieldwise LLM Provider Layer
//!
//! Implementations of the `InferenceProvider` trait from `fieldwise-domain`.
//!
//! # Providers
//!
//! - `MockProvider`: Deterministic scripted provider for testing
//! - `OllamaProvider`: Local Ollama API integration
//!
//! # Examples
//!
//! ```
//! use fieldwise_llm::MockProvider;
//! use fieldwise_domain::{InferenceProvider, InferenceRequest};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let provider = MockProvider::new(r#"{"name": "Ada"}"#);
//! let request = InferenceRequest {
//!     prompt: "Extract the name".to_string(),
//!     model_name: "mock".to_string(),
//!     temperature: 0.0,
//!     timeout_ms: 1_000,
//! };
//! let response = provider.invoke(request).await.unwrap();
//! assert_eq!(response.text, r#"{"name": "Ada"}"#);
//! # }
//! ```

#![warn(missing_docs)]

pub mod mock;
pub mod ollama;

pub use mock::MockProvider;
pub use ollama::OllamaProvider;
