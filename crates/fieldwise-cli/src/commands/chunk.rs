//! Chunk command implementation.

use super::{apply_chunking, estimator, read_document};
use crate::cli::ChunkArgs;
use crate::config::Config;
use crate::error::{CliError, Result};
use crate::output::Formatter;
use fieldwise_domain::Chunk;
use fieldwise_extractor::TextChunker;

/// Execute the chunk command.
pub fn execute_chunk(args: ChunkArgs, config: &Config, formatter: &Formatter) -> Result<()> {
    let document = read_document(&args.document)?;
    let chunks = chunk_document(&document, &args, config)?;
    println!("{}", formatter.format_chunks(&chunks)?);
    Ok(())
}

fn chunk_document(document: &str, args: &ChunkArgs, config: &Config) -> Result<Vec<Chunk>> {
    let mut options = config.pipeline.clone();
    apply_chunking(&mut options, &args.chunking);
    options.validate().map_err(CliError::Config)?;

    let chunker = TextChunker::new(options.chunk_strategy, options.max_chunk_size, options.overlap_size)
        .with_estimator(estimator(&args.chunking));
    Ok(chunker.chunk(document)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::ChunkingArgs;

    fn args(max: usize, overlap: usize) -> ChunkArgs {
        ChunkArgs {
            document: "-".to_string(),
            chunking: ChunkingArgs {
                strategy: None,
                max_chunk_size: Some(max),
                overlap: Some(overlap),
                tokens: false,
            },
        }
    }

    #[test]
    fn test_chunks_cover_document() {
        let document = "First paragraph here.\n\nSecond paragraph here.\n\nThird one.";
        let chunks = chunk_document(document, &args(30, 5), &Config::default()).unwrap();

        assert!(chunks.len() > 1);
        assert_eq!(chunks[0].start, 0);
        assert_eq!(chunks.last().unwrap().end, document.len());
    }

    #[test]
    fn test_short_document_single_chunk() {
        let chunks = chunk_document("tiny", &args(100, 10), &Config::default()).unwrap();
        assert_eq!(chunks.len(), 1);
    }
}
