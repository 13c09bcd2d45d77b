//! Fieldwise Extractor
//!
//! Turns a long unstructured document into one structured record by asking a
//! language model to fill in a declared set of fields, chunk by chunk.
//!
//! # Overview
//!
//! Documents larger than a model's context are split into bounded,
//! overlapping chunks. Each chunk is sent to the model independently and in
//! parallel; per-chunk answers are parsed, validated against the field
//! declarations, normalized (dates become ISO 8601), and merged into a single
//! record with provenance, confidence and conflicts for every field.
//!
//! # Architecture
//!
//! ```text
//! Document → Chunker → Dispatcher ─┬─ Prompt → Model → Parser → Validator ─┐
//!                                  └──────────── (per chunk, K at once) ───┘
//!                                          → Normalizer → Merger → Record
//! ```
//!
//! # Key Features
//!
//! - **Boundary-aware chunking**: headings, paragraphs, sentences, then fixed windows
//! - **Bounded concurrency**: at most `max_concurrency` model calls in flight
//! - **Retries with backoff**: transient failures are retried, the rest fail fast
//! - **Partial success**: failed chunks become warnings, not a failed run
//! - **Timelines**: dated events from all chunks merged in chronological order
//!
//! # Example Usage
//!
//! ```no_run
//! use fieldwise_domain::{FieldSpec, FieldType};
//! use fieldwise_extractor::{Extractor, PipelineOptions};
//! use fieldwise_llm::MockProvider;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let llm = MockProvider::new(r#"{"name": "John Doe", "dob": "05/15/1980"}"#);
//! let extractor = Extractor::new(llm, PipelineOptions::default());
//!
//! let fields = vec![
//!     FieldSpec::new("name", "Patient's full name", FieldType::String).unique(),
//!     FieldSpec::new("dob", "Date of birth", FieldType::Date).unique(),
//! ];
//!
//! let outcome = extractor.extract("Patient: John Doe. DOB: 05/15/1980", &fields).await?;
//!
//! println!("name: {:?}", outcome.record.get("name"));
//! println!("dob: {:?}", outcome.record.get("dob"));
//! println!("warnings: {}", outcome.warnings.len());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

mod chunking;
mod config;
mod dispatcher;
mod error;
mod extractor;
mod merger;
mod parser;
mod progress;
mod prompt;
pub mod temporal;
mod types;
mod validation;


pub use chunking::{chunk, ApproxTokenEstimator, CharCountEstimator, TextChunker};
pub use config::{ChunkStrategy, FieldCatalog, PipelineOptions};
pub use dispatcher::{backoff_delay, ChunkFailure, ChunkSuccess, DispatchReport, Dispatcher};
pub use error::{ChunkingError, DispatchError, ParseError, PipelineError};
pub use extractor::Extractor;
pub use merger::Merger;
pub use parser::parse_response;
pub use progress::{ChunkStatus, ProgressSnapshot, ProgressTracker};
pub use prompt::{PromptBuilder, MAX_EXAMPLES};
pub use temporal::normalize_date;
pub use types::{
    ChunkOutcome, Conflict, ExtractedFields, ExtractionMetadata, ExtractionOutcome,
    FewShotExample, IssueKind, MergedRecord, NormalizedFields, PipelineWarning, TimelineEntry,
    ValidationIssue,
};
pub use validation::FieldValidator;
