//! feedsync-ingest - product feed ingestion tool

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use feedsync_common::logging::{init_logging, LogConfig, LogLevel};
use feedsync_ingest::pipeline::{self, Pipeline};
use feedsync_ingest::{
    BulkUpsertSink, DocumentStore, IngestConfig, MemoryDocumentStore, PgDocumentStore,
    UpsertReport,
};
use std::io::Write;
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "feedsync-ingest")]
#[command(author, version, about = "Normalize product feeds and upsert them by id")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Parse feed files and upsert their records into the document store
    Ingest {
        /// Feed format tag (see `formats`)
        #[arg(short, long)]
        format: String,

        /// Feed files, all in the same format; `.gz` files are decompressed
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Database URL, overrides DATABASE_URL
        #[arg(long)]
        database_url: Option<String>,

        /// Target collection, overrides FEEDSYNC_COLLECTION
        #[arg(short, long)]
        collection: Option<String>,

        /// Upserts per group, overrides FEEDSYNC_BATCH_SIZE
        #[arg(short, long)]
        batch_size: Option<usize>,

        /// Store into memory and only report counts
        #[arg(long)]
        dry_run: bool,
    },

    /// List registered feed formats
    Formats,

    /// Print canonical records as JSON lines without storing them
    Preview {
        #[arg(short, long)]
        format: String,

        path: PathBuf,

        /// Stop after this many records
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Environment variables take precedence over flags
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("feedsync-ingest")
        .build()
        .merge_env()?;
    let _guard = init_logging(&log_config)?;

    match cli.command {
        Command::Ingest {
            format,
            paths,
            database_url,
            collection,
            batch_size,
            dry_run,
        } => {
            let mut config = IngestConfig::from_env().context("Invalid configuration")?;
            if let Some(url) = database_url {
                config.database.url = url;
            }
            if let Some(collection) = collection {
                config.collection = collection;
            }
            if let Some(batch_size) = batch_size {
                config.batch_size = batch_size;
            }
            config.validate()?;

            // Resolve the format before touching storage
            let pipeline = Pipeline::with_options(&format, config.parser_options())?;

            let report = if dry_run {
                info!(collection = %config.collection, "Dry run, storing into memory");
                let store = MemoryDocumentStore::new(config.collection.clone());
                ingest(&config, store, &pipeline, &paths).await?
            } else {
                let store = PgDocumentStore::connect(&config.database, &config.collection)
                    .await
                    .context("Failed to connect to document store")?;
                ingest(&config, store, &pipeline, &paths).await?
            };

            println!(
                "submitted={} inserted={} replaced={} collapsed={} failed={}",
                report.submitted,
                report.inserted,
                report.replaced,
                report.collapsed,
                report.failed()
            );

            if !report.is_complete() {
                for failure in &report.failures {
                    error!(key = ?failure.key, reason = %failure.reason, "Document not stored");
                }
                bail!("{} record(s) were not stored", report.failed());
            }
        },
        Command::Formats => {
            for tag in pipeline::registered_formats() {
                println!("{}", tag);
            }
        },
        Command::Preview {
            format,
            path,
            limit,
        } => {
            let pipeline = Pipeline::new(&format)?;
            let stdout = std::io::stdout();
            let mut out = stdout.lock();

            for record in pipeline.parse(&path)?.take(limit) {
                let line = serde_json::to_string(&record?)?;
                writeln!(out, "{}", line)?;
            }
        },
    }

    Ok(())
}

async fn ingest<S: DocumentStore>(
    config: &IngestConfig,
    store: S,
    pipeline: &Pipeline,
    paths: &[PathBuf],
) -> Result<UpsertReport> {
    let sink = BulkUpsertSink::connect(store, config.batch_size).await?;

    let mut total = UpsertReport::default();
    for path in paths {
        let records = pipeline.parse(path)?;
        let report = sink
            .store(records)
            .await
            .with_context(|| format!("Failed to ingest {}", path.display()))?;

        total.submitted += report.submitted;
        total.inserted += report.inserted;
        total.replaced += report.replaced;
        total.collapsed += report.collapsed;
        total.failures.extend(report.failures);
    }

    info!(
        files = paths.len(),
        submitted = total.submitted,
        inserted = total.inserted,
        replaced = total.replaced,
        failed = total.failed(),
        "Ingestion complete"
    );
    Ok(total)
}
