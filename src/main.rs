use clap::{Parser, Subcommand};
use receipt_ingest::config::VisionBackend;
use receipt_ingest::ingest::{IngestReport, UploadOutcome};
use receipt_ingest::receipt_db::{StoredHeader, StoredItem, StoredReceipt};
use receipt_ingest::{Config, IngestionCoordinator, ReceiptStore, VisionClient};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "receipt-ingest", version, about = "Ingest receipt images into a reconciled SQLite store")]
struct Cli {
    /// Path to the TOML config; defaults apply when it does not exist.
    #[arg(long, global = true, default_value = "receipt_ingest.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the storage directories and the database schema.
    Init,
    /// Register receipt images (deduplicated by file name).
    Upload {
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },
    /// Run the vision model on a registered receipt and store the result.
    Ingest { file_name: String },
    /// Store the result of model output already saved to a text file.
    IngestText { file_name: String, text_file: PathBuf },
    /// List registered receipts.
    List,
    /// Print the stored data of one receipt as JSON.
    Show { file_name: String },
    /// Delete a receipt, its data, its image and its JSON artifact.
    Delete { file_name: String },
    /// Row counts per table.
    Stats,
}

#[derive(Serialize)]
struct ReceiptView<'a> {
    file_path: &'a str,
    extracted_data: Option<StoredHeader>,
    items: Vec<StoredItem>,
}

fn open(cfg: &Config) -> Result<IngestionCoordinator, Box<dyn std::error::Error>> {
    if let Some(parent) = cfg.storage.db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let store = ReceiptStore::open(&cfg.storage.db_path)?;
    let coordinator = IngestionCoordinator::new(cfg, store);
    coordinator.artifacts().ensure_dirs()?;
    Ok(coordinator)
}

fn print_report(report: &IngestReport) {
    println!("{}: {}", report.file_name, report.status);
    for w in &report.warnings {
        println!("  warning: {w}");
    }
    if let Some(artifact) = &report.artifact {
        println!("  artifact: {}", artifact.path().display());
    }
    if report.items > 0 {
        println!("  items stored: {}", report.items);
    }
}

fn finish(report: IngestReport) -> Result<(), Box<dyn std::error::Error>> {
    print_report(&report);
    if report.status.is_failure() {
        return Err(format!("ingestion of {} failed: {}", report.file_name, report.status).into());
    }
    Ok(())
}

fn file_name_of(path: &Path) -> Result<&str, Box<dyn std::error::Error>> {
    path.file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| format!("not a file path: {}", path.display()).into())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // init tracing
    tracing_subscriber::fmt()
        .with_target(true)
        .with_level(true)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let cfg = Config::load_or_default(&cli.config)?;
    let coordinator = open(&cfg)?;

    match cli.command {
        Command::Init => {
            info!(db = %cfg.storage.db_path.display(), "Storage ready");
        }
        Command::Upload { images } => {
            for path in &images {
                let name = file_name_of(path)?;
                let bytes = fs::read(path)?;
                match coordinator.upload(name, &bytes)? {
                    UploadOutcome::Saved { receipt_id } => println!("{name}: saved (id {receipt_id})"),
                    UploadOutcome::AlreadyExists => println!("{name}: already registered, skipped"),
                }
            }
        }
        Command::Ingest { file_name } => {
            let client = VisionClient::from_config(&cfg.vision)?;
            if cfg.vision.backend == VisionBackend::Ollama && !client.check_health().await {
                return Err(format!(
                    "Ollama is not running at {}. Start it with: ollama serve",
                    client.endpoint().base_url
                )
                .into());
            }
            finish(coordinator.ingest(&file_name, &client).await)?;
        }
        Command::IngestText { file_name, text_file } => {
            let raw = fs::read_to_string(&text_file)?;
            finish(coordinator.ingest_text(&file_name, &raw))?;
        }
        Command::List => {
            let receipts: Vec<StoredReceipt> = coordinator.store().list_receipts()?;
            for r in &receipts {
                let mark = if r.extracted { "extracted" } else { "pending" };
                println!("{:>5}  {}  {:<10} {}", r.id, r.upload_date, mark, r.file_path);
            }
        }
        Command::Show { file_name } => {
            let store = coordinator.store();
            let receipt_id = store
                .receipt_id(&file_name)?
                .ok_or_else(|| format!("no receipt named {file_name}"))?;
            let extracted_data = store.extracted_data(receipt_id)?;
            let items = match &extracted_data {
                Some(h) => store.items(h.id)?,
                None => Vec::new(),
            };
            let view = ReceiptView {
                file_path: &file_name,
                extracted_data,
                items,
            };
            println!("{}", serde_json::to_string_pretty(&view)?);
        }
        Command::Delete { file_name } => {
            let report = coordinator.remove(&file_name)?;
            println!(
                "{file_name}: row {}, image {}, artifact {}",
                if report.row_deleted { "deleted" } else { "absent" },
                if report.image_deleted { "deleted" } else { "absent" },
                if report.artifact_deleted { "deleted" } else { "absent" },
            );
        }
        Command::Stats => {
            let counts = coordinator.store().counts()?;
            info!(
                receipts = counts.receipts,
                extracted = counts.extracted,
                items = counts.items,
                "Database statistics"
            );
            println!("{}", serde_json::to_string_pretty(&counts)?);
        }
    }

    Ok(())
}
