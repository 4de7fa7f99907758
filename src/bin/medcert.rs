//! CLI binary for medcert-extract.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `ExtractionConfig`, runs the batch, and prints the JSON summary.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use medcert_extract::{process_batch, BatchSummary, DocumentJob, ExtractionConfig};
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Process one certificate (summary JSON on stdout)
  medcert 0912345678_perez.pdf

  # Process a whole directory's worth of uploads
  medcert scans/*.pdf -o resultados.json

  # Use a specific model, skip the registry lookup
  medcert --model gpt-4o --no-registry certificado.pdf

  # Four documents in flight at once, 5-minute batch deadline
  medcert --concurrency 4 --deadline 300 scans/*.pdf

OUTPUT SHAPE:
  {"success": bool, "procesados": N, "errores": N,
   "data": [record…], "errores_detalle": [{"archivo", "error"}] | null}

  Each record carries fileName, cedula, nombre, apellido and the ten
  extraction fields; unread fields hold "No especificado".

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Path to an existing libpdfium — skips auto-download

SETUP:
  1. Set API key:     export OPENAI_API_KEY=sk-...
  2. Process:         medcert certificado.pdf -o resultado.json

  PDFium (~30 MB) is downloaded automatically on first run and cached.
"#;

/// Extract structured records from scanned medical-certificate PDFs.
#[derive(Parser, Debug)]
#[command(
    name = "medcert",
    version,
    about = "Extract structured records from scanned occupational medical certificates",
    long_about = "Process scanned occupational medical-certificate PDFs into structured JSON \
records (fitness verdict, diagnoses, ICD-10 codes, findings) using Vision Language Models. \
Supports OpenAI, Anthropic, Google Gemini, Azure OpenAI, and any OpenAI-compatible endpoint.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// PDF files to process (one document job per file).
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Write the JSON summary to this file instead of stdout.
    #[arg(short, long, env = "MEDCERT_OUTPUT")]
    output: Option<PathBuf>,

    /// LLM model ID (e.g. gpt-4o, claude-sonnet-4-20250514).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(
        long,
        env = "EDGEQUAKE_PROVIDER",
        long_help = "LLM provider. Auto-detected from API key env vars if not set."
    )]
    provider: Option<String>,

    /// Rendering DPI (72–600).
    #[arg(long, env = "MEDCERT_DPI", default_value_t = 200,
          value_parser = clap::value_parser!(u32).range(72..=600))]
    dpi: u32,

    /// Maximum pages rasterised per document.
    #[arg(long, env = "MEDCERT_MAX_PAGES", default_value_t = 5,
          value_parser = clap::value_parser!(usize))]
    max_pages: usize,

    /// Max LLM output tokens per document.
    #[arg(long, env = "MEDCERT_MAX_TOKENS", default_value_t = 2500)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "MEDCERT_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Retries per document on a transient model failure.
    #[arg(long, env = "MEDCERT_MAX_RETRIES", default_value_t = 2)]
    max_retries: u32,

    /// Per-model-call timeout in seconds.
    #[arg(long, env = "MEDCERT_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,

    /// Civil-registry endpoint URL.
    #[arg(long, env = "MEDCERT_REGISTRY_URL")]
    registry_url: Option<String>,

    /// Civil-registry lookup timeout in seconds.
    #[arg(long, env = "MEDCERT_REGISTRY_TIMEOUT", default_value_t = 10)]
    registry_timeout: u64,

    /// Skip the identity-enrichment lookup entirely.
    #[arg(long, env = "MEDCERT_NO_REGISTRY")]
    no_registry: bool,

    /// Number of documents processed concurrently.
    #[arg(short, long, env = "MEDCERT_CONCURRENCY", default_value_t = 1)]
    concurrency: usize,

    /// Whole-batch deadline in seconds; jobs not started in time fail.
    #[arg(long, env = "MEDCERT_DEADLINE")]
    deadline: Option<u64>,

    /// Pretty-print the JSON summary.
    #[arg(long, env = "MEDCERT_PRETTY")]
    pretty: bool,

    /// Disable the progress spinner.
    #[arg(long, env = "MEDCERT_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "MEDCERT_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors and the JSON summary.
    #[arg(short, long, env = "MEDCERT_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Ensure the PDFium engine is available ────────────────────────────
    // First run downloads ~30 MB from bblanchon/pdfium-binaries into the
    // cache directory; subsequent startups are an instant path check.
    if !pdfium_auto::is_pdfium_cached() && !cli.quiet {
        let dl_bar = ProgressBar::new(0);
        dl_bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {bytes}/{total_bytes}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        dl_bar.set_prefix("PDF engine");
        dl_bar.enable_steady_tick(Duration::from_millis(80));

        let bar = dl_bar.clone();
        tokio::task::block_in_place(|| {
            pdfium_auto::ensure_pdfium_library(Some(&|downloaded, total| {
                if let Some(t) = total {
                    if bar.length().unwrap_or(0) != t {
                        bar.set_length(t);
                    }
                }
                bar.set_position(downloaded);
            }))
        })
        .context("Failed to download PDFium engine")?;

        dl_bar.finish_with_message("ready ✓");
    } else if !pdfium_auto::is_pdfium_cached() {
        tokio::task::block_in_place(|| pdfium_auto::ensure_pdfium_library(None))
            .context("Failed to download PDFium engine")?;
    }

    // ── Read inputs into jobs ────────────────────────────────────────────
    let mut jobs = Vec::with_capacity(cli.inputs.len());
    for path in &cli.inputs {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        jobs.push(DocumentJob::new(file_name, bytes));
    }

    let config = build_config(&cli)?;

    // ── Run the batch ────────────────────────────────────────────────────
    let show_progress = !cli.quiet && !cli.no_progress;
    let spinner = if show_progress {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.set_prefix("Processing");
        bar.set_message(format!("{} document(s)…", jobs.len()));
        bar.enable_steady_tick(Duration::from_millis(80));
        Some(bar)
    } else {
        None
    };

    let summary = process_batch(jobs, &config).await;

    if let Some(bar) = spinner {
        bar.finish_and_clear();
    }

    // ── Report & emit ────────────────────────────────────────────────────
    if !cli.quiet {
        print_report(&summary);
    }

    let json = if cli.pretty {
        serde_json::to_string_pretty(&summary)
    } else {
        serde_json::to_string(&summary)
    }
    .context("Failed to serialize batch summary")?;

    if let Some(ref output_path) = cli.output {
        tokio::fs::write(output_path, &json)
            .await
            .with_context(|| format!("Failed to write {}", output_path.display()))?;
        if !cli.quiet {
            eprintln!("   {}", dim(&format!("→ {}", output_path.display())));
        }
    } else {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        handle
            .write_all(json.as_bytes())
            .context("Failed to write to stdout")?;
        handle.write_all(b"\n").ok();
    }

    if !summary.success {
        std::process::exit(1);
    }
    Ok(())
}

/// Per-file ✓/✗ lines plus a totals line, on stderr.
fn print_report(summary: &BatchSummary) {
    for record in &summary.data {
        eprintln!(
            "  {} {}  {}",
            green("✓"),
            record.file_name,
            dim(&format!(
                "{} — {} {}",
                record.fields.aptitud_medica, record.nombre, record.apellido
            )),
        );
    }
    if let Some(ref failures) = summary.errores_detalle {
        for failure in failures {
            eprintln!("  {} {}  {}", red("✗"), failure.archivo, red(&failure.error));
        }
    }
    if let Some(ref mensaje) = summary.mensaje {
        eprintln!("  {} {}", red("✗"), red(mensaje));
    }
    eprintln!(
        "{} {} procesados, {} errores",
        if summary.success { green("✔") } else { red("✘") },
        bold(&summary.procesados.to_string()),
        if summary.errores > 0 {
            red(&summary.errores.to_string())
        } else {
            summary.errores.to_string()
        },
    );
}

/// Map CLI args to `ExtractionConfig`.
fn build_config(cli: &Cli) -> Result<ExtractionConfig> {
    let mut builder = ExtractionConfig::builder()
        .dpi(cli.dpi)
        .max_pages(cli.max_pages)
        .max_tokens(cli.max_tokens)
        .temperature(cli.temperature)
        .max_retries(cli.max_retries)
        .api_timeout_secs(cli.api_timeout)
        .registry_timeout_secs(cli.registry_timeout)
        .registry_enabled(!cli.no_registry)
        .concurrency(cli.concurrency);

    if let Some(ref url) = cli.registry_url {
        builder = builder.registry_url(url.clone());
    }
    if let Some(secs) = cli.deadline {
        builder = builder.batch_deadline(Duration::from_secs(secs));
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider.clone());
    }

    builder.build().context("Invalid configuration")
}
