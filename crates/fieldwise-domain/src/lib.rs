//! Fieldwise Domain Layer
//!
//! Core data model for the document-to-record extraction pipeline. This crate
//! performs no I/O: it defines the value objects every other layer exchanges
//! and the trait seams through which infrastructure is injected.
//!
//! ## Key Concepts
//!
//! - **Chunk**: a bounded, possibly overlapping slice of a source document
//! - **FieldSpec**: declarative description of a target field
//! - **Confidence**: a tie-break weight in [0, 1] attached to each observation
//! - **RunId**: identifier of one pipeline run, used for log correlation
//!
//! ## Architecture
//!
//! - Pure data and validation logic only
//! - The inference backend and the size estimator are traits implemented
//!   elsewhere (`fieldwise-llm`, `fieldwise-extractor`)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod chunk;
pub mod confidence;
pub mod field_spec;
pub mod run;
pub mod traits;

// Re-exports for convenience
pub use chunk::{BoundaryType, Chunk};
pub use confidence::Confidence;
pub use field_spec::{FieldSpec, FieldType};
pub use run::RunId;
pub use traits::{
    InferenceError, InferenceProvider, InferenceRequest, InferenceResponse, SizeEstimator,
    TokenUsage,
};
