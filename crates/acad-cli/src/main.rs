use std::path::PathBuf;

use acad_core::{InsertStrategy, MergedRecord, MutationAction, MutationPayload, RawRow, SourceDescriptor};
use acad_sync::{upsert, CallbackObserver, SyncConfig, SyncPipeline};
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "acad-cli")]
#[command(about = "Academic roster sync command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one load cycle over the partitions in sources.yaml.
    Load {
        /// Write merged records to this JSON file.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Reconstruct a student roster from a PDF path or link.
    Pdf { location: String },
    /// Student rows from a roster tab.
    CsvRoster { document_id: String, sheet_id: String },
    /// Submit one mutation; updates of missing rows fall back to add.
    Submit {
        #[arg(value_enum)]
        action: ActionArg,
        table: String,
        /// Record as a JSON object of column to value.
        #[arg(long)]
        record: String,
        #[arg(long)]
        key_column: Option<String>,
        #[arg(long)]
        key_value: Option<String>,
        /// Place added rows in the first empty row instead of appending.
        #[arg(long)]
        first_empty: bool,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ActionArg {
    Add,
    Update,
    Delete,
}

impl From<ActionArg> for MutationAction {
    fn from(arg: ActionArg) -> Self {
        match arg {
            ActionArg::Add => MutationAction::Add,
            ActionArg::Update => MutationAction::Update,
            ActionArg::Delete => MutationAction::Delete,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let pipeline = SyncPipeline::new(SyncConfig::from_env())?;

    match cli.command.unwrap_or(Commands::Load { out: None }) {
        Commands::Load { out } => {
            let observer = CallbackObserver::new(
                |status: &str| eprintln!("{status}"),
                |batch: &[MergedRecord]| eprintln!("  received {} records", batch.len()),
            );
            let (summary, records) = pipeline.run_once(&observer).await?;
            if let Some(path) = out {
                let json = serde_json::to_vec_pretty(&records)?;
                tokio::fs::write(&path, json)
                    .await
                    .with_context(|| format!("writing {}", path.display()))?;
                info!(path = %path.display(), "wrote merged records");
            }
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Pdf { location } => {
            let rows = pipeline.pdf_roster(&location).await?;
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        Commands::CsvRoster {
            document_id,
            sheet_id,
        } => {
            let rows = pipeline
                .csv_roster(&SourceDescriptor::new(document_id, sheet_id))
                .await?;
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        Commands::Submit {
            action,
            table,
            record,
            key_column,
            key_value,
            first_empty,
        } => {
            let record: RawRow = serde_json::from_str(&record).context("parsing --record as a JSON object")?;
            let mut payload = MutationPayload::new(action.into(), table, record);
            if let (Some(column), Some(value)) = (key_column, key_value) {
                payload = payload.keyed(column, value);
            }
            if first_empty {
                payload = payload.with_insert_strategy(InsertStrategy::FirstEmpty);
            }

            let gateway = pipeline.mutation_gateway()?;
            let resp = upsert(&gateway, &payload).await?;
            println!("{}", serde_json::to_string_pretty(&resp)?);
            if !resp.is_success() {
                bail!(
                    "mutation rejected: {}",
                    resp.message.as_deref().unwrap_or("no message")
                );
            }
        }
    }

    Ok(())
}
