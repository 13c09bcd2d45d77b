//! Error types for the CLI application.

use thiserror::Error;

/// Result type alias for CLI operations.
pub type Result<T> = std::result::Result<T, CliError>;

/// CLI-specific errors.
#[derive(Debug, Error)]
pub enum CliError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Field catalog could not be used
    #[error("Catalog error: {0}")]
    Catalog(String),

    /// Pipeline error
    #[error(transparent)]
    Pipeline(#[from] fieldwise_extractor::PipelineError),

    /// Chunking error
    #[error(transparent)]
    Chunking(#[from] fieldwise_extractor::ChunkingError),

    /// Inference backend error
    #[error(transparent)]
    Inference(#[from] fieldwise_domain::InferenceError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
