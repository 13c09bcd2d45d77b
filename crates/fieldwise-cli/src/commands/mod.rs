//! Command implementations.

pub mod chunk;
pub mod config;
pub mod extract;

pub use self::chunk::execute_chunk;
pub use self::config::execute_config;
pub use self::extract::execute_extract;

use crate::cli::ChunkingArgs;
use crate::error::Result;
use fieldwise_domain::SizeEstimator;
use fieldwise_extractor::{ApproxTokenEstimator, CharCountEstimator, PipelineOptions};
use std::fs;
use std::io::{self, Read};
use std::sync::Arc;

/// Read a document from a path, or from stdin when the path is "-".
pub(crate) fn read_document(path: &str) -> Result<String> {
    if path == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        return Ok(buffer);
    }
    Ok(fs::read_to_string(path)?)
}

/// Apply command-line chunking overrides.
pub(crate) fn apply_chunking(options: &mut PipelineOptions, args: &ChunkingArgs) {
    if let Some(strategy) = args.strategy {
        options.chunk_strategy = strategy.into();
    }
    if let Some(size) = args.max_chunk_size {
        options.max_chunk_size = size;
    }
    if let Some(overlap) = args.overlap {
        options.overlap_size = overlap;
    }
}

/// Size estimator selected by `--tokens`.
pub(crate) fn estimator(args: &ChunkingArgs) -> Arc<dyn SizeEstimator> {
    if args.tokens {
        Arc::new(ApproxTokenEstimator)
    } else {
        Arc::new(CharCountEstimator)
    }
}
