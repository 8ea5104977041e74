mod config;
mod contract;
mod convert;
mod error;
mod fetch;
mod invoice;
mod llm;
mod reconcile;
mod records;
mod sniff;
mod store;
mod validate;

use clap::{Parser, Subcommand};
use contract::ContractProcessor;
use convert::{Converted, FileConverter};
use fetch::DocumentFetcher;
use invoice::InvoiceProcessor;
use llm::ExtractionClient;
use reconcile::{Flow, ReconciliationDriver};
use std::path::{Path, PathBuf};
use std::time::Duration;
use store::sqlite::SqliteStore;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use validate::contract::ContractValidator;

#[derive(Parser)]
#[command(name = "zatca_reconcile", about = "Extract, validate and reconcile ZATCA invoices and contracts")]
struct Cli {
    /// Configuration file
    #[arg(long, default_value = config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log filter, e.g. "debug" or "zatca_reconcile=debug" (default: RUST_LOG, then info)
    #[arg(long)]
    log: Option<String>,

    /// Pause between projects, overriding pipeline.project_delay_secs
    #[arg(long)]
    delay_secs: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Reconcile invoices of all unverified projects
    Invoices,
    /// Reconcile contracts of all unverified projects
    Contracts,
    /// Extract and validate invoices from one file or URL, printing JSON
    ExtractInvoice {
        source: String,
        /// Send the whole document to the provider instead of page images
        #[arg(long)]
        document: bool,
        /// Print incomplete invoices too
        #[arg(long, conflicts_with = "document")]
        all: bool,
    },
    /// Extract one contract from a file or URL, printing JSON
    ExtractContract { source: String },
    /// Load project rows from a JSON array into the SQLite store
    ImportProjects { file: PathBuf },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // init tracing
    let filter = match &cli.log {
        Some(directives) => EnvFilter::new(directives),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt()
        .with_target(true)
        .with_level(true)
        .with_env_filter(filter)
        .init();

    let mut cfg = config::Config::load_or_default(&cli.config)?;
    if let Some(secs) = cli.delay_secs {
        cfg.pipeline.project_delay_secs = secs;
    }

    match cli.command {
        Command::Invoices => run_batch(&cfg, Flow::Invoice).await?,
        Command::Contracts => run_batch(&cfg, Flow::Contract).await?,
        Command::ExtractInvoice {
            source,
            document,
            all,
        } => extract_invoice(&cfg, &source, document, all).await?,
        Command::ExtractContract { source } => extract_contract(&cfg, &source).await?,
        Command::ImportProjects { file } => import_projects(&cfg, &file)?,
    }

    Ok(())
}

async fn run_batch(cfg: &config::Config, flow: Flow) -> Result<(), Box<dyn std::error::Error>> {
    let store = store::build_store(cfg)?;
    let client = ExtractionClient::new(llm::build_oracle(&cfg.llm)?);
    let driver = ReconciliationDriver::new(
        store,
        DocumentFetcher::new(cfg.pipeline.download_timeout_secs)?,
        FileConverter::from_config(&cfg.pipeline),
        client,
        ContractValidator::from_config(&cfg.pipeline),
        cfg.pipeline.invoice_total_tolerance,
        Duration::from_secs(cfg.pipeline.project_delay_secs),
    );

    let summary = driver.run_batch(flow).await?;
    if summary.write_errors > 0 {
        warn!(write_errors = summary.write_errors, "Some verdicts were not written back");
    }
    Ok(())
}

async fn extract_invoice(
    cfg: &config::Config,
    source: &str,
    document: bool,
    all: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let client = ExtractionClient::new(llm::build_oracle(&cfg.llm)?);
    let processor = InvoiceProcessor::new(&client);

    if document && fetch::is_remote(source) {
        let invoices = processor.process_invoice_uri(source).await?;
        println!("{}", serde_json::to_string_pretty(&invoices)?);
        return Ok(());
    }

    let bytes = DocumentFetcher::new(cfg.pipeline.download_timeout_secs)?
        .load(source)
        .await?;

    if document {
        let invoices = processor.process_invoice_pdf(&bytes).await?;
        println!("{}", serde_json::to_string_pretty(&invoices)?);
        return Ok(());
    }

    let pages = match FileConverter::from_config(&cfg.pipeline).convert(&bytes)? {
        Converted::Pages(pages) => pages,
        Converted::Unsupported => {
            warn!(source = %source, "Unsupported file type, skipping");
            return Ok(());
        }
    };

    if let Some(first) = pages.first() {
        match client.classify_document(first).await {
            Ok(Some(class)) if !class.is_invoice => {
                warn!(contract_info = class.is_contract_information, "First page does not look like an invoice");
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Classification failed"),
        }
    }

    let invoices = if all {
        let extracted = processor.extract_pages(&pages).await;
        for inv in &extracted {
            info!(page = ?inv.page_number, complete = validate::invoice::is_complete(inv), "Extracted page");
        }
        extracted
    } else {
        processor.process_invoice_base64_images(&pages).await
    };
    info!(
        pages = pages.len(),
        invoices = invoices.len(),
        total = ?invoice::total_including_vat(&invoices),
        "Invoice extraction finished"
    );
    println!("{}", serde_json::to_string_pretty(&invoices)?);
    Ok(())
}

async fn extract_contract(cfg: &config::Config, source: &str) -> Result<(), Box<dyn std::error::Error>> {
    let client = ExtractionClient::new(llm::build_oracle(&cfg.llm)?);
    let converter = FileConverter::from_config(&cfg.pipeline);
    let validator = ContractValidator::from_config(&cfg.pipeline);
    let bytes = DocumentFetcher::new(cfg.pipeline.download_timeout_secs)?
        .load(source)
        .await?;

    let processor = ContractProcessor::new(&client, &converter, validator);
    let Some(contract) = processor.extract_contract(&bytes).await? else {
        warn!(source = %source, "No contract data extracted");
        return Ok(());
    };

    if validator.is_complete_contract_data(&contract) {
        info!(amount_sar = ?validator.amount_in_sar(&contract), "Contract data is complete");
    } else {
        warn!(missing = ?validator.missing_fields(&contract), "Contract data is incomplete");
    }
    println!("{}", serde_json::to_string_pretty(&contract)?);
    Ok(())
}

fn import_projects(cfg: &config::Config, file: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let rows: Vec<serde_json::Value> = serde_json::from_str(&std::fs::read_to_string(file)?)?;
    let projects = store::parse_project_rows(rows);
    let db = SqliteStore::open(&cfg.store.sqlite_path)?;
    for project in &projects {
        db.upsert_project(project)?;
    }
    info!(count = projects.len(), path = %cfg.store.sqlite_path, "Projects imported");
    Ok(())
}
