//! Extract command implementation.

use super::{apply_chunking, estimator, read_document};
use crate::cli::ExtractArgs;
use crate::config::Config;
use crate::error::{CliError, Result};
use crate::output::Formatter;
use fieldwise_domain::InferenceProvider;
use fieldwise_extractor::{
    ExtractionOutcome, Extractor, FieldCatalog, PipelineOptions, ProgressTracker,
};
use fieldwise_llm::{MockProvider, OllamaProvider};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// Execute the extract command.
pub async fn execute_extract(args: ExtractArgs, config: &Config, formatter: &Formatter) -> Result<()> {
    let document = read_document(&args.document)?;
    let catalog = load_catalog(&args.catalog)?;
    let options = pipeline_options(&args, config)?;

    info!(
        catalog = %args.catalog.display(),
        fields = catalog.fields.len(),
        model = %options.model_name,
        "Loaded catalog"
    );

    let outcome = match &args.mock {
        Some(response) => run(MockProvider::new(response.clone()), options, &catalog, &document, &args).await?,
        None => {
            let endpoint = args.endpoint.clone().unwrap_or_else(|| config.endpoint.clone());
            run(OllamaProvider::new(endpoint)?, options, &catalog, &document, &args).await?
        }
    };

    println!("{}", formatter.format_outcome(&outcome)?);
    Ok(())
}

async fn run<L>(
    provider: L,
    options: PipelineOptions,
    catalog: &FieldCatalog,
    document: &str,
    args: &ExtractArgs,
) -> Result<ExtractionOutcome>
where
    L: InferenceProvider + 'static,
{
    let extractor = Extractor::new(provider, options)
        .with_examples(catalog.examples.clone())
        .with_size_estimator(estimator(&args.chunking));

    let progress = ProgressTracker::new();
    let mut updates = progress.subscribe();
    let reporter = tokio::spawn(async move {
        while updates.changed().await.is_ok() {
            let snap = *updates.borrow_and_update();
            debug!(
                completed = snap.completed,
                failed = snap.failed,
                in_progress = snap.in_progress,
                total = snap.total_chunks,
                "Progress"
            );
        }
    });

    let result = extractor
        .extract_with_progress(document, &catalog.fields, &progress)
        .await;
    reporter.abort();

    Ok(result?)
}

/// Load and check a field catalog.
fn load_catalog(path: &Path) -> Result<FieldCatalog> {
    let contents = fs::read_to_string(path)?;
    let catalog = FieldCatalog::from_toml(&contents).map_err(CliError::Catalog)?;
    catalog.validate().map_err(CliError::Catalog)?;
    Ok(catalog)
}

/// Configured pipeline options with command-line overrides applied.
fn pipeline_options(args: &ExtractArgs, config: &Config) -> Result<PipelineOptions> {
    let mut options = config.pipeline.clone();
    if let Some(model) = &args.model {
        options.model_name = model.clone();
    }
    if let Some(concurrency) = args.concurrency {
        options.max_concurrency = concurrency;
    }
    if let Some(timeout) = args.timeout_ms {
        options.timeout_ms = Some(timeout);
    }
    if args.partial {
        options.partial_on_timeout = true;
    }
    apply_chunking(&mut options, &args.chunking);
    options.validate().map_err(CliError::Config)?;
    Ok(options)
}
