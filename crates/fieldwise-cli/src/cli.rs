//! CLI command definitions and argument parsing.

use clap::{Parser, Subcommand};
use fieldwise_extractor::ChunkStrategy;
use std::path::PathBuf;

/// Fieldwise CLI - Extract structured records from long documents.
#[derive(Debug, Parser)]
#[command(name = "fieldwise")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output format
    #[arg(short, long, value_enum, global = true)]
    pub format: Option<CliFormat>,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Configuration file path
    #[arg(short, long, global = true, env = "FIELDWISE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Output format options.
#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum CliFormat {
    /// Table format (default)
    Table,
    /// JSON format
    Json,
}

/// CLI commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Extract fields from a document
    Extract(ExtractArgs),

    /// Show how a document would be chunked
    Chunk(ChunkArgs),

    /// Manage the configuration file
    Config(ConfigArgs),
}

/// Arguments for the extract command.
#[derive(Debug, Parser)]
pub struct ExtractArgs {
    /// Document to read ("-" for stdin)
    pub document: String,

    /// Field catalog (TOML)
    #[arg(short = 'F', long)]
    pub catalog: PathBuf,

    /// Model name
    #[arg(short, long)]
    pub model: Option<String>,

    /// Ollama endpoint
    #[arg(short, long, env = "FIELDWISE_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Maximum simultaneous model calls
    #[arg(short = 'j', long)]
    pub concurrency: Option<usize>,

    /// Whole-document timeout in milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Return finished chunks when the timeout expires
    #[arg(long)]
    pub partial: bool,

    #[command(flatten)]
    pub chunking: ChunkingArgs,

    /// Answer every prompt with this JSON instead of calling a model
    #[arg(long, value_name = "JSON")]
    pub mock: Option<String>,
}

/// Arguments for the chunk command.
#[derive(Debug, Parser)]
pub struct ChunkArgs {
    /// Document to read ("-" for stdin)
    pub document: String,

    #[command(flatten)]
    pub chunking: ChunkingArgs,
}

/// Chunking overrides shared by extract and chunk.
#[derive(Debug, Clone, clap::Args)]
pub struct ChunkingArgs {
    /// Chunking strategy
    #[arg(short, long, value_enum)]
    pub strategy: Option<StrategyArg>,

    /// Chunk size budget
    #[arg(long)]
    pub max_chunk_size: Option<usize>,

    /// Overlap carried into each following chunk
    #[arg(long)]
    pub overlap: Option<usize>,

    /// Measure sizes in approximate tokens instead of characters
    #[arg(long)]
    pub tokens: bool,
}

/// Arguments for configuration management.
#[derive(Debug, Parser)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

/// Configuration actions.
#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Print the effective configuration
    Show,

    /// Print the configuration file path
    Path,

    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Chunking strategy argument.
#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum StrategyArg {
    /// Headings, then paragraphs, then sentences, then fixed windows
    Auto,
    /// Headings, then fixed windows
    Section,
    /// Paragraphs, then sentences, then fixed windows
    Paragraph,
    /// Sentences, then fixed windows
    Sentence,
    /// Fixed windows only
    Fixed,
}

impl From<CliFormat> for crate::config::OutputFormat {
    fn from(format: CliFormat) -> Self {
        match format {
            CliFormat::Table => crate::config::OutputFormat::Table,
            CliFormat::Json => crate::config::OutputFormat::Json,
        }
    }
}

impl From<StrategyArg> for ChunkStrategy {
    fn from(strategy: StrategyArg) -> Self {
        match strategy {
            StrategyArg::Auto => ChunkStrategy::Auto,
            StrategyArg::Section => ChunkStrategy::BySection,
            StrategyArg::Paragraph => ChunkStrategy::ByParagraph,
            StrategyArg::Sentence => ChunkStrategy::BySentence,
            StrategyArg::Fixed => ChunkStrategy::FixedWindow,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_command() {
        let cli = Cli::parse_from([
            "fieldwise",
            "extract",
            "notes.txt",
            "--catalog",
            "fields.toml",
            "-j",
            "4",
            "--strategy",
            "paragraph",
        ]);
        match cli.command {
            Command::Extract(args) => {
                assert_eq!(args.document, "notes.txt");
                assert_eq!(args.catalog, PathBuf::from("fields.toml"));
                assert_eq!(args.concurrency, Some(4));
                assert!(matches!(args.chunking.strategy, Some(StrategyArg::Paragraph)));
                assert!(!args.partial);
            }
            _ => panic!("Expected Extract command"),
        }
    }

    #[test]
    fn test_extract_requires_catalog() {
        assert!(Cli::try_parse_from(["fieldwise", "extract", "notes.txt"]).is_err());
    }

    #[test]
    fn test_global_flags() {
        let cli = Cli::parse_from(["fieldwise", "chunk", "-", "-vv", "--format", "json"]);
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.format, Some(CliFormat::Json)));
        assert!(matches!(cli.command, Command::Chunk(_)));
    }

    #[test]
    fn test_strategy_conversion() {
        let strategy: ChunkStrategy = StrategyArg::Section.into();
        assert_eq!(strategy, ChunkStrategy::BySection);
    }
}
