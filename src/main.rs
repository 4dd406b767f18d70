//! # Vector Ingest CLI (`vingest`)
//!
//! ## Usage
//!
//! ```bash
//! vingest --config ./config/vingest.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `vingest serve` | Start the HTTP job server |
//! | `vingest ingest <paths>...` | Run one ingestion job in the foreground |
//! | `vingest sync` | Ingest the configured source root in the foreground |
//! | `vingest models` | Print the embedding model catalog |
//!
//! Logs go to stderr (`RUST_LOG` overrides the default `info` filter);
//! stdout carries only command results.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use vector_ingest::config::load_config;
use vector_ingest::core::job::{Job, JobStatus};
use vector_ingest::embedding::MODEL_CATALOG;
use vector_ingest::progress::{watch_job, ProgressMode};
use vector_ingest::server::run_server;
use vector_ingest::service::IngestService;

#[derive(Parser)]
#[command(
    name = "vingest",
    about = "Asynchronous document ingestion jobs for vector databases",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/vingest.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server.
    Serve,

    /// Ingest local files or directories into a collection and wait for the job.
    Ingest {
        /// Files or directories. Directories contribute every supported file under them.
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Target collection.
        #[arg(long)]
        collection: String,

        /// Embedding model override.
        #[arg(long)]
        model: Option<String>,

        #[arg(long)]
        chunk_size: Option<usize>,

        #[arg(long)]
        overlap: Option<usize>,

        /// Scale embeddings to unit length.
        #[arg(long)]
        normalize: bool,

        /// OCR image inputs with tesseract.
        #[arg(long)]
        ocr: bool,

        #[arg(long)]
        no_language_detect: bool,

        #[arg(long)]
        no_dedupe: bool,

        /// Emit progress as JSON lines on stderr.
        #[arg(long)]
        json: bool,
    },

    /// Ingest the configured `[sync]` source root and wait for every job.
    Sync {
        /// Emit progress as JSON lines on stderr.
        #[arg(long)]
        json: bool,
    },

    /// List the built-in embedding model catalog.
    Models,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn progress_mode(json: bool) -> ProgressMode {
    if json {
        ProgressMode::Json
    } else {
        ProgressMode::default_for_tty()
    }
}

fn print_outcome(job: &Job) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(job)?);
    if job.status == JobStatus::Error {
        let message = job
            .error
            .as_ref()
            .map(|e| format!("{} (stage {})", e.message, e.stage))
            .unwrap_or_default();
        bail!("job {} failed: {}", job.id, message);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging();

    match cli.command {
        Commands::Models => {
            println!("{:<48} {:>6}  {}", "MODEL", "DIMS", "DESCRIPTION");
            for spec in MODEL_CATALOG {
                println!("{:<48} {:>6}  {}", spec.id, spec.dims, spec.label);
            }
        }
        Commands::Serve => run_server(load_config(&cli.config)?).await?,
        Commands::Ingest {
            paths,
            collection,
            model,
            chunk_size,
            overlap,
            normalize,
            ocr,
            no_language_detect,
            no_dedupe,
            json,
        } => {
            let config = load_config(&cli.config)?;
            let mut options = config.ingest.options_for(&collection);
            options.model = model;
            if let Some(size) = chunk_size {
                options.chunk_size = size;
            }
            if let Some(overlap) = overlap {
                options.overlap = overlap;
            }
            options.normalize |= normalize;
            options.ocr |= ocr;
            options.language_detect &= !no_language_detect;
            options.dedupe &= !no_dedupe;

            let service = IngestService::from_config(config)?;
            let (job, batch) = service.prepare_local(options, &paths).await?;
            service.pipeline().spawn(job.id.clone(), batch);

            let reporter = progress_mode(json).reporter();
            let done = watch_job(service.registry(), &job.id, reporter.as_ref())
                .await
                .context("job disappeared from the registry")?;
            print_outcome(&done)?;
        }
        Commands::Sync { json } => {
            let config = load_config(&cli.config)?;
            let service = IngestService::from_config(config)?;
            let jobs = service.submit_sync(false).await?;
            let reporter = progress_mode(json).reporter();
            let mut failed = 0usize;
            for job in &jobs {
                let done = watch_job(service.registry(), &job.id, reporter.as_ref())
                    .await
                    .context("job disappeared from the registry")?;
                if let Err(e) = print_outcome(&done) {
                    tracing::error!("{:#}", e);
                    failed += 1;
                }
            }
            if failed > 0 {
                bail!("{} of {} sync jobs failed", failed, jobs.len());
            }
        }
    }

    Ok(())
}
