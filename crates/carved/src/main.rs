//! `carved` — the carve command line tool.
//!
//! Splits files into fixed-size chunks, distributes the chunks across the
//! configured storage backends, and reconstructs files from them later.
//!
//! # Usage
//!
//! ```text
//! carved split big.iso photos.tar           # chunk and distribute files
//! carved split -c carve.toml big.iso        # with a config file
//! carved restore 3 -o ./restored            # rebuild file record 3
//! carved status                             # list all file records
//! carved status 3                           # one file with its chunks
//! carved cleanup                            # empty all active backends
//! ```

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use carve_meta::MetaStore;
use carve_pipeline::{FileProcessor, Orchestrator, ProcessorConfig};
use carve_store::{BackendRegistry, FsStore, RecordStore, StorageBackend};
use carve_types::FileId;
use clap::{Parser, Subcommand};
use tracing::info;

use config::CliConfig;

// -----------------------------------------------------------------------
// CLI definition
// -----------------------------------------------------------------------

#[derive(Parser)]
#[command(
    name = "carved",
    version,
    about = "Split files into distributed chunks and restore them"
)]
struct Cli {
    /// Path to TOML config file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Split files into chunks and distribute them to the active backends.
    Split {
        /// Source files to process.
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Reconstruct a file from its distributed chunks and verify it.
    Restore {
        /// File record id (see `carved status`).
        file_id: u64,

        /// Directory to write the reconstructed file into.
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
    },

    /// Show file records and their chunk states.
    Status {
        /// Show chunk details for one file record.
        file_id: Option<u64>,
    },

    /// Empty every active backend and the local staging area.
    Cleanup,
}

// -----------------------------------------------------------------------
// Entrypoint
// -----------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = CliConfig::load(cli.config.as_deref()).context("failed to load config")?;

    setup_tracing(&config.log.level);

    match cli.command {
        Commands::Split { paths } => cmd_split(&config, paths).await,
        Commands::Restore { file_id, output } => cmd_restore(&config, file_id, output).await,
        Commands::Status { file_id } => cmd_status(&config, file_id),
        Commands::Cleanup => cmd_cleanup(&config).await,
    }
}

/// Initialize the `tracing` subscriber with the given level filter.
///
/// Respects `RUST_LOG` env var if set, otherwise uses the config value.
fn setup_tracing(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

// -----------------------------------------------------------------------
// Pipeline wiring
// -----------------------------------------------------------------------

struct Pipeline {
    orchestrator: Arc<Orchestrator>,
    registry: Arc<BackendRegistry>,
}

fn open_meta(config: &CliConfig) -> Result<Arc<MetaStore>> {
    let meta_path = config.node.data_dir.join("meta");
    let meta =
        MetaStore::open(&meta_path).context("failed to open metadata store")?;
    Ok(Arc::new(meta))
}

/// Build the backend registry from the configured active tags.
fn build_registry(config: &CliConfig, meta: &Arc<MetaStore>) -> Result<Arc<BackendRegistry>> {
    let mut registry = BackendRegistry::new();
    for tag in &config.storage.active {
        let backend: Arc<dyn StorageBackend> = match tag.as_str() {
            "fs" => {
                let dir = config.node.data_dir.join("chunks");
                Arc::new(FsStore::new("fs", &dir).context("failed to initialize fs backend")?)
            }
            "db" => Arc::new(RecordStore::new("db", meta.clone())),
            other => anyhow::bail!("unknown backend tag in storage.active: {other}"),
        };
        registry.register(backend);
    }
    Ok(Arc::new(registry))
}

fn build_pipeline(config: &CliConfig) -> Result<Pipeline> {
    std::fs::create_dir_all(&config.node.data_dir)
        .context("failed to create data directory")?;

    let meta = open_meta(config)?;
    let registry = build_registry(config, &meta)?;

    let processor = Arc::new(FileProcessor::new(
        ProcessorConfig {
            staging_root: config.node.data_dir.join("staging"),
            max_chunk_bytes: config.max_chunk_bytes(),
            checksum_algorithm: config.checksum_algorithm()?,
            max_concurrent_splits: config.max_concurrent_splits(),
        },
        registry.clone(),
    )?);

    let orchestrator = Arc::new(Orchestrator::new(
        processor,
        meta.clone(),
        config.max_concurrent_files(),
    ));

    Ok(Pipeline {
        orchestrator,
        registry,
    })
}

// -----------------------------------------------------------------------
// carved split
// -----------------------------------------------------------------------

async fn cmd_split(config: &CliConfig, paths: Vec<PathBuf>) -> Result<()> {
    let pipeline = build_pipeline(config)?;
    info!(
        files = paths.len(),
        max_chunk_bytes = config.max_chunk_bytes(),
        backends = ?config.storage.active,
        "starting batch"
    );

    let mut outcomes = pipeline.orchestrator.clone().process_batch(paths).await;
    outcomes.sort_by(|a, b| a.path.cmp(&b.path));

    let mut failures = 0usize;
    for outcome in &outcomes {
        match &outcome.result {
            Ok((file_id, status)) => {
                println!("{}: file {file_id} {status}", outcome.path.display());
                if *status != carve_types::ProcessingStatus::Completed {
                    failures += 1;
                }
            }
            Err(e) => {
                println!("{}: error: {e}", outcome.path.display());
                failures += 1;
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{failures} of {} files failed", outcomes.len());
    }
    Ok(())
}

// -----------------------------------------------------------------------
// carved restore
// -----------------------------------------------------------------------

async fn cmd_restore(config: &CliConfig, file_id: u64, output: PathBuf) -> Result<()> {
    let pipeline = build_pipeline(config)?;
    std::fs::create_dir_all(&output).context("failed to create output directory")?;

    let path = pipeline
        .orchestrator
        .restore(FileId::from(file_id), &output)
        .await?;
    println!("restored and verified: {}", path.display());
    Ok(())
}

// -----------------------------------------------------------------------
// carved status
// -----------------------------------------------------------------------

fn cmd_status(config: &CliConfig, file_id: Option<u64>) -> Result<()> {
    let meta = open_meta(config)?;

    match file_id {
        Some(id) => {
            let id = FileId::from(id);
            let file = meta
                .get_file(id)?
                .with_context(|| format!("no file record with id {id}"))?;
            println!(
                "file {} {} size={} chunks={} checksum={}:{} status={}",
                file.id,
                file.file_name,
                file.file_size,
                file.chunk_count,
                file.checksum_algorithm,
                file.checksum,
                file.status,
            );
            for chunk in meta.chunks_for_file(id)? {
                let reason = if chunk.error_reason.is_empty() {
                    String::new()
                } else {
                    format!(" reason={}", chunk.error_reason)
                };
                println!(
                    "  chunk {} index={} backend={} size={} status={}{reason}",
                    chunk.id, chunk.index, chunk.backend, chunk.size, chunk.status,
                );
            }
        }
        None => {
            let files = meta.list_files()?;
            println!("File records: {}", files.len());
            for file in &files {
                println!(
                    "  {} {} size={} chunks={} status={}",
                    file.id, file.file_name, file.file_size, file.chunk_count, file.status,
                );
            }
        }
    }
    Ok(())
}

// -----------------------------------------------------------------------
// carved cleanup
// -----------------------------------------------------------------------

async fn cmd_cleanup(config: &CliConfig) -> Result<()> {
    let pipeline = build_pipeline(config)?;

    for backend in pipeline.registry.all() {
        backend.clean_up().await?;
        println!("backend {} emptied", backend.tag());
    }

    let staging = config.node.data_dir.join("staging");
    if staging.exists() {
        std::fs::remove_dir_all(&staging).context("failed to clear staging area")?;
        println!("staging area cleared");
    }

    Ok(())
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------
