//! Error types for the extraction pipeline
//!
//! Only `PipelineError` crosses the public `extract` boundary. The other
//! types describe per-chunk failures that the pipeline absorbs into warnings.

use fieldwise_domain::InferenceError;
use thiserror::Error;

/// The document cannot be split within the configured constraints
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChunkingError {
    /// Chunk budget is zero or fully consumed by the overlap
    #[error("Chunk budget too small: max_size {max_size}, overlap {overlap}")]
    BudgetTooSmall {
        /// Configured maximum chunk size
        max_size: usize,
        /// Configured overlap size
        overlap: usize,
    },

    /// A single character measures larger than the budget
    #[error("Text at byte {offset} cannot fit in a chunk of size {budget}")]
    Unsplittable {
        /// Byte offset of the offending character
        offset: usize,
        /// Budget available for the chunk's own region
        budget: usize,
    },
}

/// The model's output did not contain a usable structured value
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Could not parse model output: {reason}")]
pub struct ParseError {
    /// What went wrong
    pub reason: String,
    /// The raw model output, untouched
    pub raw: String,
}

impl ParseError {
    /// Create a parse error for `raw`
    pub fn new(reason: impl Into<String>, raw: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            raw: raw.into(),
        }
    }
}

/// A single attempt at processing a chunk failed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// The inference backend failed
    #[error(transparent)]
    Inference(#[from] InferenceError),

    /// The backend answered but the answer was unusable
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// The run was cancelled before this chunk finished
    #[error("Cancelled")]
    Cancelled,

    /// Every permitted attempt failed
    #[error("Failed after {attempts} attempt(s): {last}")]
    Exhausted {
        /// Attempts made
        attempts: u32,
        /// Error from the final attempt
        last: Box<DispatchError>,
    },
}

impl DispatchError {
    /// Whether another attempt may succeed
    ///
    /// Parse failures are retried: a fresh sample can come back well formed.
    pub fn is_retryable(&self) -> bool {
        match self {
            DispatchError::Inference(e) => e.is_retryable(),
            DispatchError::Parse(_) => true,
            DispatchError::Cancelled | DispatchError::Exhausted { .. } => false,
        }
    }
}

/// Errors returned to the caller of `extract`
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The document could not be chunked
    #[error("Chunking failed: {0}")]
    Chunking(#[from] ChunkingError),

    /// Every chunk failed
    #[error("No chunks succeeded ({} failed)", failures.len())]
    NoChunksSucceeded {
        /// Failure summary per chunk, in chunk order
        failures: Vec<(usize, String)>,
    },

    /// The document deadline expired and partial results were not requested
    #[error("Extraction timeout after {0} ms")]
    Timeout(u64),

    /// The options failed validation
    #[error("Configuration error: {0}")]
    Config(String),

    /// A field spec is inconsistent or its pattern does not compile
    #[error("Invalid field spec '{field}': {reason}")]
    InvalidFieldSpec {
        /// Offending field
        field: String,
        /// Why it was rejected
        reason: String,
    },
}
