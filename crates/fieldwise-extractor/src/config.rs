//! Configuration for the extraction pipeline

use crate::types::FewShotExample;
use fieldwise_domain::FieldSpec;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Text chunking strategy for large documents
///
/// Each strategy names the coarsest boundary the chunker tries first; finer
/// boundaries are always used as fallbacks for oversized segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStrategy {
    /// Headings, then paragraphs, then sentences, then fixed windows
    #[default]
    Auto,
    /// Headings, then fixed windows
    BySection,
    /// Paragraphs, then sentences, then fixed windows
    ByParagraph,
    /// Sentences, then fixed windows
    BySentence,
    /// Fixed windows only
    FixedWindow,
}

/// Configuration for one pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineOptions {
    /// Maximum chunk size, in size-estimator units, overlap included
    pub max_chunk_size: usize,

    /// Size of the tail of each chunk repeated at the front of the next
    pub overlap_size: usize,

    /// Text chunking strategy
    pub chunk_strategy: ChunkStrategy,

    /// Maximum chunk operations in flight at once
    pub max_concurrency: usize,

    /// Attempts per chunk, first attempt included
    pub retry_attempts: u32,

    /// Backoff before the second attempt; doubles for each later attempt
    pub retry_base_delay_ms: u64,

    /// Deadline for the whole document, if any
    pub timeout_ms: Option<u64>,

    /// On document timeout, merge whatever finished instead of failing
    pub partial_on_timeout: bool,

    /// Backend model identifier
    pub model_name: String,

    /// Sampling temperature; 0.0 keeps runs reproducible
    pub temperature: f64,

    /// Deadline for a single inference call
    pub request_timeout_ms: u64,

    /// Sort timelines oldest-first
    pub ascending_timeline: bool,

    /// Place timeline entries whose date could not be normalized at the end
    pub segregate_unparsed_dates: bool,
}

impl PipelineOptions {
    /// Whole-document deadline as a Duration
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Per-call deadline as a Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Base retry delay as a Duration
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.max_chunk_size == 0 {
            return Err("max_chunk_size must be greater than 0".to_string());
        }
        if self.overlap_size >= self.max_chunk_size {
            return Err("overlap_size must be smaller than max_chunk_size".to_string());
        }
        if self.max_concurrency == 0 {
            return Err("max_concurrency must be greater than 0".to_string());
        }
        if self.retry_attempts == 0 {
            return Err("retry_attempts must be at least 1".to_string());
        }
        if self.request_timeout_ms == 0 {
            return Err("request_timeout_ms must be greater than 0".to_string());
        }
        if self.timeout_ms == Some(0) {
            return Err("timeout_ms must be greater than 0 when set".to_string());
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(format!("temperature {} out of range [0.0, 2.0]", self.temperature));
        }
        if self.model_name.trim().is_empty() {
            return Err("model_name must not be empty".to_string());
        }
        Ok(())
    }
}

impl Default for PipelineOptions {
    /// Default configuration with balanced settings
    fn default() -> Self {
        Self {
            max_chunk_size: 4_000,
            overlap_size: 200,
            chunk_strategy: ChunkStrategy::Auto,
            max_concurrency: 20,
            retry_attempts: 3,
            retry_base_delay_ms: 500,
            timeout_ms: None,
            partial_on_timeout: false,
            model_name: "llama3".to_string(),
            temperature: 0.0,
            request_timeout_ms: 60_000,
            ascending_timeline: true,
            segregate_unparsed_dates: true,
        }
    }
}

impl PipelineOptions {
    /// Aggressive preset: small chunks, high fan-out, short deadlines
    pub fn aggressive() -> Self {
        Self {
            max_chunk_size: 2_000,
            overlap_size: 100,
            max_concurrency: 32,
            retry_attempts: 2,
            retry_base_delay_ms: 250,
            request_timeout_ms: 30_000,
            ..Self::default()
        }
    }

    /// Lenient preset: larger chunks, gentle fan-out, patient retries
    pub fn lenient() -> Self {
        Self {
            max_chunk_size: 8_000,
            overlap_size: 400,
            max_concurrency: 4,
            retry_attempts: 5,
            retry_base_delay_ms: 1_000,
            request_timeout_ms: 180_000,
            ..Self::default()
        }
    }

    /// Load configuration from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self, String> {
        toml::from_str(toml_str).map_err(|e| format!("Failed to parse TOML: {}", e))
    }

    /// Serialize configuration to TOML string
    pub fn to_toml(&self) -> Result<String, String> {
        toml::to_string_pretty(self).map_err(|e| format!("Failed to serialize to TOML: {}", e))
    }
}

/// A domain's set of target fields, plus optional few-shot examples
///
/// ```toml
/// [[fields]]
/// name = "patient_name"
/// description = "Full name of the patient"
/// type = "string"
/// unique = true
///
/// [[examples]]
/// text = "Patient: Jane Roe"
/// output = '{"patient_name": "Jane Roe"}'
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldCatalog {
    /// Target fields
    #[serde(default)]
    pub fields: Vec<FieldSpec>,

    /// Few-shot examples embedded in every prompt
    #[serde(default)]
    pub examples: Vec<FewShotExample>,
}

impl FieldCatalog {
    /// Load a catalog from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self, String> {
        toml::from_str(toml_str).map_err(|e| format!("Failed to parse catalog: {}", e))
    }

    /// Check every spec and reject duplicate names
    pub fn validate(&self) -> Result<(), String> {
        if self.fields.is_empty() {
            return Err("catalog defines no fields".to_string());
        }
        let mut seen = std::collections::HashSet::new();
        for spec in &self.fields {
            spec.validate()?;
            if !seen.insert(spec.name.as_str()) {
                return Err(format!("duplicate field name '{}'", spec.name));
            }
        }
        Ok(())
    }
}
