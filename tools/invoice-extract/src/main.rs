//! `invoice-extract`: run the convert/classify/extract stages against
//! local files, without a bus or object store deployment.
//!
//! Exit codes: 0 valid extraction, 2 validation failure, 3 provider
//! exhaustion, 1 anything else.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use converter_rs::tiff_to_pngs;
use event_bus::retry::RetryConfig;
use extractor_rs::{handle_invoice_classified, ExtractionOutcome, ExtractorContext};
use invoice_contracts::{
    validate_invoice, Invoice, InvoiceClassified, InvoiceConverted, VendorType,
};
use llm_gateway::{GeminiClient, LlmExtractor, OpenRouterClient};
use object_store::{InMemoryStore, ObjectStore};
use observer::NoopObserver;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

const EXIT_OK: i32 = 0;
const EXIT_VALIDATION: i32 = 2;
const EXIT_EXHAUSTED: i32 = 3;

#[derive(Parser)]
#[command(
    name = "invoice-extract",
    about = "Extract structured invoices from scanned TIFFs"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Extract one TIFF and write the result as JSON
    Extract {
        /// Path to the TIFF file
        file: PathBuf,
        /// Vendor override; inferred from the filename when omitted
        #[arg(long)]
        vendor: Option<String>,
        /// Directory for the output JSON
        #[arg(long, default_value = ".")]
        output_dir: PathBuf,
    },
    /// Extract every TIFF in a directory and print a summary
    Batch {
        /// Directory containing TIFF files
        dir: PathBuf,
    },
    /// Validate an extracted invoice JSON against schema and business rules
    Validate {
        /// Path to the invoice JSON
        json: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {:#}", e);
            1
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Extract {
            file,
            vendor,
            output_dir,
        } => {
            let ctx = build_context().await?;
            extract_one(&ctx, &file, vendor.as_deref(), &output_dir).await
        }
        Command::Batch { dir } => {
            let ctx = build_context().await?;
            batch(&ctx, &dir).await
        }
        Command::Validate { json } => validate_file(&json),
    }
}

/// The extractor context over in-memory adapters; only the LLM clients
/// are real.
struct CliContext {
    store: Arc<InMemoryStore>,
    extractor: ExtractorContext,
}

async fn build_context() -> Result<CliContext> {
    let gemini_key = std::env::var("GEMINI_API_KEY")
        .context("GEMINI_API_KEY must be set (see also OPENROUTER_API_KEY)")?;
    let openrouter_key =
        std::env::var("OPENROUTER_API_KEY").context("OPENROUTER_API_KEY must be set")?;

    let primary_model =
        std::env::var("LLM_PRIMARY_MODEL").unwrap_or_else(|_| "gemini-2.0-flash".to_string());
    let fallback_model =
        std::env::var("LLM_FALLBACK_MODEL").unwrap_or_else(|_| "openai/gpt-4o-mini".to_string());
    let timeout_ms: u64 = env_or("EXTRACT_TIMEOUT_MS", 30_000)?;
    let max_attempts: u32 = env_or("EXTRACT_MAX_ATTEMPTS", 3)?;
    let backoff_base_ms: u64 = env_or("BACKOFF_BASE_MS", 500)?;
    let backoff_cap_ms: u64 = env_or("BACKOFF_CAP_MS", 8_000)?;

    let timeout = Duration::from_millis(timeout_ms);
    let primary: Arc<dyn LlmExtractor> = Arc::new(
        GeminiClient::new(primary_model, gemini_key, timeout)
            .context("failed to build Gemini client")?,
    );
    let fallback: Arc<dyn LlmExtractor> = Arc::new(
        OpenRouterClient::new(fallback_model, openrouter_key, timeout)
            .context("failed to build OpenRouter client")?,
    );

    let store = Arc::new(InMemoryStore::new());
    let bus = Arc::new(event_bus::InMemoryBus::new());

    let extractor = ExtractorContext {
        store: store.clone(),
        bus,
        observer: Arc::new(NoopObserver::new()),
        primary,
        fallback,
        failed_bucket: "failed".to_string(),
        extracted_topic: "invoices.extracted".to_string(),
        attempt_timeout: timeout,
        max_attempts,
        backoff: RetryConfig::new(max_attempts, backoff_base_ms, backoff_cap_ms),
    };

    Ok(CliContext { store, extractor })
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| anyhow::anyhow!("{} is not a valid value for {}", raw, name)),
        Err(_) => Ok(default),
    }
}

async fn extract_one(
    ctx: &CliContext,
    file: &Path,
    vendor_override: Option<&str>,
    output_dir: &Path,
) -> Result<i32> {
    let file_name = file
        .file_name()
        .and_then(|n| n.to_str())
        .context("input path has no file name")?
        .to_string();
    let stem = file
        .file_stem()
        .and_then(|n| n.to_str())
        .unwrap_or("invoice")
        .to_string();

    let bytes = tokio::fs::read(file)
        .await
        .with_context(|| format!("failed to read {}", file.display()))?;

    // Stage 1 in-process.
    let pages = match tiff_to_pngs(&bytes) {
        Ok(pages) => pages,
        Err(e) => {
            eprintln!("{}: invalid image: {}", file_name, e);
            return Ok(EXIT_VALIDATION);
        }
    };

    // Stage 2 in-process.
    let vendor = match vendor_override {
        Some(raw) => VendorType::parse(raw)
            .with_context(|| format!("unknown vendor '{}'", raw))?,
        None => classifier_rs::vendor_from_object_name(&file_name),
    };
    let quality = classifier_rs::quality_score(&pages[0]).unwrap_or(0.0);

    // Stage the pages where the extractor expects them.
    let mut page_uris = Vec::with_capacity(pages.len());
    for (index, png) in pages.into_iter().enumerate() {
        let key = format!("{}_page{}.png", stem, index + 1);
        let uri = ctx
            .store
            .write("processed", &key, png, "image/png")
            .await
            .map_err(|e| anyhow::anyhow!("staging page: {}", e))?;
        page_uris.push(uri);
    }
    ctx.store
        .write("landing", &file_name, bytes, "image/tiff")
        .await
        .map_err(|e| anyhow::anyhow!("staging source: {}", e))?;

    let converted = InvoiceConverted::new(format!("s3://landing/{}", file_name), page_uris);
    // No archive bucket in CLI mode; the source doubles as the archive.
    let archived_uri = converted.source_uri.clone();
    let classified = InvoiceClassified::from_converted(&converted, vendor, quality, archived_uri);

    // Stage 3.
    match handle_invoice_classified(&ctx.extractor, &classified)
        .await
        .map_err(|e| anyhow::anyhow!("extraction infrastructure: {}", e))?
    {
        ExtractionOutcome::Published(extracted) => {
            let out_path = output_dir.join(format!("{}.json", stem));
            let body = serde_json::to_vec_pretty(&extracted.extracted)?;
            tokio::fs::write(&out_path, body)
                .await
                .with_context(|| format!("failed to write {}", out_path.display()))?;

            println!(
                "{}: ok, invoice {} ({}), confidence {:.2}, written to {}",
                file_name,
                extracted.extracted.invoice_id,
                extracted.provider,
                extracted.confidence,
                out_path.display()
            );
            Ok(EXIT_OK)
        }
        ExtractionOutcome::Failed {
            attempts,
            last_error,
        } => {
            eprintln!(
                "{}: extraction failed after {} attempts: {}",
                file_name, attempts, last_error
            );
            Ok(exhaustion_exit_code(&last_error))
        }
    }
}

/// Distinguish provider exhaustion from model-output rejection for the
/// exit code contract.
fn exhaustion_exit_code(last_error: &str) -> i32 {
    let lowered = last_error.to_lowercase();
    if lowered.contains("rate limited")
        || lowered.contains("transient")
        || lowered.contains("timed out")
        || lowered.contains("empty response")
    {
        EXIT_EXHAUSTED
    } else {
        EXIT_VALIDATION
    }
}

async fn batch(ctx: &CliContext, dir: &Path) -> Result<i32> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("failed to read directory {}", dir.display()))?;

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_tiff = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("tiff") || e.eq_ignore_ascii_case("tif"));
        if is_tiff {
            files.push(path);
        }
    }
    files.sort();

    if files.is_empty() {
        eprintln!("no TIFF files found in {}", dir.display());
        return Ok(1);
    }

    let mut ok = 0usize;
    let mut rejected = 0usize;
    let mut exhausted = 0usize;
    for file in &files {
        match extract_one(ctx, file, None, dir).await? {
            EXIT_OK => ok += 1,
            EXIT_EXHAUSTED => exhausted += 1,
            _ => rejected += 1,
        }
    }

    println!(
        "batch complete: {} ok, {} validation failures, {} exhausted ({} files)",
        ok,
        rejected,
        exhausted,
        files.len()
    );

    if exhausted > 0 {
        Ok(EXIT_EXHAUSTED)
    } else if rejected > 0 {
        Ok(EXIT_VALIDATION)
    } else {
        Ok(EXIT_OK)
    }
}

fn validate_file(path: &Path) -> Result<i32> {
    let body = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;

    let invoice: Invoice = match serde_json::from_str(&body) {
        Ok(invoice) => invoice,
        Err(e) => {
            eprintln!("{}: schema failure: {}", path.display(), e);
            return Ok(EXIT_VALIDATION);
        }
    };

    match validate_invoice(&invoice, None) {
        Ok(()) => {
            println!(
                "{}: valid, invoice {} ({})",
                path.display(),
                invoice.invoice_id,
                invoice.vendor_type
            );
            Ok(EXIT_OK)
        }
        Err(e) => {
            eprintln!("{}: validation failure: {}", path.display(), e);
            Ok(EXIT_VALIDATION)
        }
    }
}
