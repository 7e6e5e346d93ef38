//! Tabledoc CLI: bulk CSV ingestion and document inspection
//!
//! Run with: cargo run -p tabledoc -- ingest --owner <uuid> data/*.csv

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tabledoc::{IngestPipeline, RecordDb, RowFields, TabledocConfig, UploadBatch, UploadFile};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "tabledoc", version, about = "Bulk CSV ingestion into a document store")]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// SQLite database path (overrides configuration)
    #[arg(long, global = true)]
    database: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest CSV files concurrently
    Ingest {
        /// Owning user UUID
        #[arg(long)]
        owner: Uuid,
        /// Title for each file, in order (defaults to the file names)
        #[arg(long = "title")]
        titles: Vec<String>,
        /// CSV files to ingest
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// List a user's documents
    List {
        /// Owning user UUID
        #[arg(long)]
        owner: Uuid,
    },
    /// Show a document with headers and rows
    Show {
        /// Document UUID
        id: Uuid,
        /// Owning user UUID
        #[arg(long)]
        owner: Uuid,
    },
    /// List a document's rows
    Rows {
        /// Document UUID
        id: Uuid,
        /// Owning user UUID
        #[arg(long)]
        owner: Uuid,
    },
    /// Find rows whose column equals a value
    Search {
        /// Document UUID
        id: Uuid,
        /// Owning user UUID
        #[arg(long)]
        owner: Uuid,
        #[arg(long)]
        column: String,
        #[arg(long)]
        value: String,
    },
    /// Delete a document with its rows and headers
    Delete {
        /// Document UUID
        id: Uuid,
        /// Owning user UUID
        #[arg(long)]
        owner: Uuid,
    },
    /// Single row operations
    Row {
        /// Owning user UUID of the document
        #[arg(long, global = true)]
        owner: Option<Uuid>,
        #[command(subcommand)]
        sub: RowCommands,
    },
}

#[derive(Subcommand)]
enum RowCommands {
    /// Append a row to a document
    Create {
        document: Uuid,
        /// Field as column=value, repeatable
        #[arg(long = "field", required = true)]
        fields: Vec<String>,
    },
    /// Get one row
    Get { document: Uuid, row: i64 },
    /// Replace a row's fields
    Update {
        document: Uuid,
        row: i64,
        /// Field as column=value, repeatable
        #[arg(long = "field", required = true)]
        fields: Vec<String>,
    },
    /// Delete one row
    Delete { document: Uuid, row: i64 },
}

impl RowCommands {
    fn document(&self) -> Uuid {
        match self {
            RowCommands::Create { document, .. }
            | RowCommands::Get { document, .. }
            | RowCommands::Update { document, .. }
            | RowCommands::Delete { document, .. } => *document,
        }
    }
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    let out = serde_json::to_string_pretty(value).context("Serialize output")?;
    println!("{}", out);
    Ok(())
}

fn parse_fields(pairs: &[String]) -> anyhow::Result<RowFields> {
    pairs
        .iter()
        .map(|pair| {
            pair.split_once('=')
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .with_context(|| format!("Expected column=value, got '{}'", pair))
        })
        .collect()
}

fn load_config(cli: &Cli) -> anyhow::Result<TabledocConfig> {
    let mut config = match &cli.config {
        Some(path) => TabledocConfig::from_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => TabledocConfig::from_env(),
    };
    if let Some(path) = &cli.database {
        config.storage.database_path = path.clone();
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tabledoc=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    let db_path = config.storage.database_path.clone();
    let db = RecordDb::new(&db_path)
        .inspect_err(|e| tracing::error!("Cannot open record store at {}: {}", db_path.display(), e))
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;

    match cli.command {
        Commands::Ingest { owner, titles, files } => {
            let files: Vec<UploadFile> = files.into_iter().map(UploadFile::from_path).collect();
            let batch = if titles.is_empty() {
                UploadBatch::titled_by_filename(owner, files)
            } else {
                UploadBatch::new(owner, files, titles)
            };

            let pipeline = IngestPipeline::new(Arc::new(db), config).context("Invalid configuration")?;

            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("Interrupted, cancelling batch");
                    on_signal.cancel();
                }
            });

            let outcome = pipeline.ingest(batch, cancel).await?;
            print_json(&outcome)?;

            if !outcome.is_complete_success() {
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::List { owner } => {
            print_json(&db.list_documents(owner)?)?;
        }
        Commands::Show { id, owner } => {
            db.ensure_owner(id, owner)?;
            print_json(&db.get_document(id)?)?;
        }
        Commands::Rows { id, owner } => {
            db.ensure_owner(id, owner)?;
            print_json(&db.list_rows(id)?)?;
        }
        Commands::Search { id, owner, column, value } => {
            db.ensure_owner(id, owner)?;
            print_json(&db.search_rows(id, &column, &value)?)?;
        }
        Commands::Delete { id, owner } => {
            db.ensure_owner(id, owner)?;
            let rows = db.delete_document(id)?;
            print_json(&serde_json::json!({ "deleted": id, "rows_removed": rows }))?;
        }
        Commands::Row { owner, sub } => {
            let owner = owner.context("--owner is required for row commands")?;
            db.ensure_owner(sub.document(), owner)?;

            match sub {
                RowCommands::Create { document, fields } => {
                    let fields = parse_fields(&fields)?;
                    print_json(&db.insert_row(document, &fields)?)?;
                }
                RowCommands::Get { document, row } => {
                    print_json(&db.get_row(document, row)?)?;
                }
                RowCommands::Update { document, row, fields } => {
                    let fields = parse_fields(&fields)?;
                    print_json(&db.update_row(document, row, &fields)?)?;
                }
                RowCommands::Delete { document, row } => {
                    db.delete_row(document, row)?;
                    print_json(&serde_json::json!({ "deleted": row, "document": document }))?;
                }
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}
