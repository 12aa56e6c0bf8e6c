//! CLI binary for survey-extract.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `ExtractionConfig`, runs the batch, and prints a summary.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use survey_extract::pipeline::batch::is_batch_file;
use survey_extract::{
    process_batch, read_sources, DocumentReport, ExtractionConfig, ExtractionProgressCallback,
    ExtractionSchema, ProcessMode, ProgressCallback, Source, SourceColumns,
};
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
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress: one bar over the documents of the batch, with a log
/// line per identified section and per extracted page.
struct CliProgressCallback {
    bar: ProgressBar,
    page_started: Mutex<HashMap<usize, Instant>>,
    failures: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} documents  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        bar.set_style(style);
        bar.set_prefix("Extracting");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            page_started: Mutex::new(HashMap::new()),
            failures: AtomicUsize::new(0),
        })
    }

    fn elapsed_secs(&self, page_num: usize) -> f64 {
        self.page_started
            .lock()
            .map(|mut m| m.remove(&page_num))
            .ok()
            .flatten()
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl ExtractionProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total_documents: usize) {
        self.bar.set_length(total_documents as u64);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Processing {total_documents} document(s)…"))
        ));
    }

    fn on_document_start(&self, source: &str) {
        self.bar.set_message(short(source, 60));
    }

    fn on_pages_identified(&self, doc_id: &str, total_pages: usize, selected: &[usize]) {
        self.bar.println(format!(
            "  {} {}  {}",
            cyan("◇"),
            bold(doc_id),
            dim(&format!("{} of {} page(s) selected: {:?}", selected.len(), total_pages, selected)),
        ));
    }

    fn on_page_start(&self, _doc_id: &str, page_num: usize) {
        if let Ok(mut m) = self.page_started.lock() {
            m.insert(page_num, Instant::now());
        }
    }

    fn on_page_extracted(&self, _doc_id: &str, page_num: usize) {
        let secs = self.elapsed_secs(page_num);
        self.bar.println(format!(
            "    {} Page {:>3}  {}",
            green("✓"),
            page_num,
            dim(&format!("{secs:.1}s")),
        ));
    }

    fn on_document_complete(&self, source: &str, error: Option<&str>) {
        if let Some(error) = error {
            self.failures.fetch_add(1, Ordering::SeqCst);
            self.bar.println(format!(
                "  {} {}  {}",
                red("✗"),
                short(source, 60),
                red(&short(error.lines().next().unwrap_or(error), 100)),
            ));
        }
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, total_documents: usize, success_count: usize) {
        self.bar.finish_and_clear();
        let failed = total_documents.saturating_sub(success_count);
        if failed == 0 {
            eprintln!(
                "{} {} document(s) processed successfully",
                green("✔"),
                bold(&success_count.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} document(s) processed  ({} failed)",
                if failed == total_documents {
                    red("✘")
                } else {
                    cyan("⚠")
                },
                bold(&success_count.to_string()),
                total_documents,
                red(&failed.to_string()),
            );
        }
    }
}

fn short(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", &s[..idx]),
        None => s.to_string(),
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # One local report
  survey-extract LEADER-1.pdf

  # One report by URL, naming the output explicitly
  survey-extract --id "LEADER 1" "https://bucket.s3.amazonaws.com/LEADER1.pdf?X-Amz-Signature=..."

  # Every vessel in a spreadsheet (columns vesselName / linkForSyia)
  survey-extract NK.xlsx

  # CSV with different column names
  survey-extract --id-column ship --url-column report list.csv

  # Only find and save the section pages
  survey-extract --identify-only NK.xlsx

  # Only download the reports
  survey-extract --download-only NK.xlsx

  # Continue from the downloaded folder without fetching again
  survey-extract --identify-only downloaded_pdfs/

  # Extract from the pages saved by --identify-only
  survey-extract --from-images downloaded_pdfs/

  # Custom section and schema, JSON report on stdout
  survey-extract --section-prompt hull.txt --schema hull_schema.json --json report.pdf

OUTPUT:
  downloaded_pdfs/<id>.pdf           downloaded sources (--download-dir)
  images/<id>/page_NNN.png           clean section pages (--images-dir)
  final_json_output/<id>.json        one record per section page (--output-dir)

ENVIRONMENT VARIABLES:
  GEMINI_API_KEY          Google Gemini API key (default model gemini-2.0-flash)
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (gemini, openai, anthropic, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Path to an existing libpdfium; skips the download
  RUST_LOG                Log filter, e.g. survey_extract=debug
"#;

/// Extract Planned Machinery Survey tables from survey-status PDFs.
#[derive(Parser, Debug)]
#[command(
    name = "survey-extract",
    version,
    about = "Extract Planned Machinery Survey tables from survey-status PDFs using Vision LLMs",
    long_about = "Locate the ClassNK 'Planned Machinery Survey' section in survey-status PDF \
reports with a Vision Language Model, save the section pages as images, and extract their \
tables into JSON. Accepts a PDF path, a URL, a directory of PDFs, or a batch file \
(.xlsx/.xls/.ods/.csv/.txt).",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// PDF path, HTTP/HTTPS URL, directory of PDFs, or batch file
    /// (.xlsx, .xls, .ods, .csv, .txt).
    input: String,

    /// Treat the input as a plain-text list even without a .txt extension.
    #[arg(long)]
    batch: bool,

    /// Identifier for a single PDF/URL input; names the output files.
    #[arg(long)]
    id: Option<String>,

    /// Identifier column in spreadsheet/CSV input.
    #[arg(long, env = "SURVEY_ID_COLUMN", default_value = "vesselName")]
    id_column: String,

    /// URL column in spreadsheet/CSV input.
    #[arg(long, env = "SURVEY_URL_COLUMN", default_value = "linkForSyia")]
    url_column: String,

    /// Identify and save the section pages only; skip extraction.
    #[arg(long, conflicts_with = "download_only")]
    identify_only: bool,

    /// Download the sources only.
    #[arg(long)]
    download_only: bool,

    /// Extract from page images saved by an earlier --identify-only run.
    #[arg(long, conflicts_with_all = ["identify_only", "download_only"])]
    from_images: bool,

    /// LLM model ID (e.g. gemini-2.0-flash, gpt-4.1-mini).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: gemini, openai, anthropic, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// DPI of the numbered renders used for identification (72–400).
    #[arg(long, env = "SURVEY_IDENTIFY_DPI", default_value_t = 200,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    identify_dpi: u32,

    /// DPI of the saved section pages (72–400).
    #[arg(long, env = "SURVEY_RENDER_DPI", default_value_t = 200,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    render_dpi: u32,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "SURVEY_PASSWORD")]
    password: Option<String>,

    /// Text file with a custom section-identification instruction.
    #[arg(long, env = "SURVEY_SECTION_PROMPT")]
    section_prompt: Option<PathBuf>,

    /// JSON file with a custom extraction schema.
    #[arg(long, env = "SURVEY_SCHEMA")]
    schema: Option<PathBuf>,

    /// Directory for the JSON output.
    #[arg(long, env = "SURVEY_OUTPUT_DIR", default_value = "final_json_output")]
    output_dir: PathBuf,

    /// Directory for the section page images.
    #[arg(long, env = "SURVEY_IMAGES_DIR", default_value = "images")]
    images_dir: PathBuf,

    /// Directory for downloaded PDFs.
    #[arg(long, env = "SURVEY_DOWNLOAD_DIR", default_value = "downloaded_pdfs")]
    download_dir: PathBuf,

    /// Max LLM output tokens per call.
    #[arg(long, env = "SURVEY_MAX_TOKENS", default_value_t = 8192)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "SURVEY_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Retries per LLM call on transport failure.
    #[arg(long, env = "SURVEY_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "SURVEY_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Per LLM call timeout in seconds.
    #[arg(long, env = "SURVEY_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,

    /// Print the per-document reports as JSON on stdout.
    #[arg(long, env = "SURVEY_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "SURVEY_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "SURVEY_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "SURVEY_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs; --verbose always wins.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
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

    // ── Sources ──────────────────────────────────────────────────────────
    let sources = collect_sources(&cli)?;
    if sources.is_empty() {
        anyhow::bail!("No valid sources found in '{}'", cli.input);
    }

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn ExtractionProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb).await?;

    let mode = if cli.download_only {
        ProcessMode::DownloadOnly
    } else if cli.identify_only {
        ProcessMode::IdentifyOnly
    } else if cli.from_images {
        ProcessMode::ExtractSaved
    } else {
        ProcessMode::Extract
    };

    // ── PDF engine ───────────────────────────────────────────────────────
    // Fetch libpdfium up front so the download shows its own progress bar
    // instead of stalling the first document.
    if matches!(mode, ProcessMode::Extract | ProcessMode::IdentifyOnly)
        && !pdfium_auto::is_pdfium_cached()
    {
        ensure_pdf_engine(cli.quiet)?;
    }

    // ── Run ──────────────────────────────────────────────────────────────
    let reports = process_batch(&sources, &config, mode).await;

    if cli.json {
        let json = serde_json::to_string_pretty(&reports).context("Failed to serialise reports")?;
        println!("{json}");
    } else if !cli.quiet && !show_progress {
        print_summary(&reports);
    }

    let failed = reports.iter().filter(|r| !r.is_success()).count();
    if failed == reports.len() {
        let first = reports
            .iter()
            .find_map(|r| r.error.as_ref())
            .map(|e| e.message.clone())
            .unwrap_or_else(|| "Unknown error".to_string());
        anyhow::bail!("All {} document(s) failed. First error: {}", failed, first);
    }
    Ok(())
}

fn ensure_pdf_engine(quiet: bool) -> Result<()> {
    if quiet {
        tokio::task::block_in_place(|| pdfium_auto::ensure_pdfium_library(None))
            .context("Failed to download PDFium engine")?;
        return Ok(());
    }

    let dl_bar = ProgressBar::new(0);
    dl_bar.set_style(
        ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {bytes}/{total_bytes}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS),
    );
    dl_bar.set_prefix("PDF engine");
    dl_bar.set_message("Connecting…");
    dl_bar.enable_steady_tick(Duration::from_millis(80));

    let bar = dl_bar.clone();
    // block_in_place: the progress closure borrows `bar`, so no 'static task.
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
    Ok(())
}

fn collect_sources(cli: &Cli) -> Result<Vec<Source>> {
    let input = std::path::Path::new(&cli.input);
    if cli.batch || input.is_dir() || is_batch_file(&cli.input) {
        let columns = SourceColumns {
            id_column: cli.id_column.clone(),
            url_column: cli.url_column.clone(),
        };
        return read_sources(input, &columns)
            .context("Failed to read batch input");
    }

    let mut source = Source::new(&cli.input);
    if let Some(ref id) = cli.id {
        source = source.with_id(id);
    }
    Ok(vec![source])
}

/// Map CLI args to `ExtractionConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ExtractionConfig> {
    let mut builder = ExtractionConfig::builder()
        .identify_dpi(cli.identify_dpi)
        .render_dpi(cli.render_dpi)
        .max_tokens(cli.max_tokens)
        .temperature(cli.temperature)
        .max_retries(cli.max_retries)
        .output_dir(&cli.output_dir)
        .images_dir(&cli.images_dir)
        .download_dir(&cli.download_dir)
        .download_timeout_secs(cli.download_timeout)
        .api_timeout_secs(cli.api_timeout);

    if let Some(ref path) = cli.section_prompt {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read section prompt from {:?}", path))?;
        builder = builder.section_prompt(prompt);
    }
    if let Some(ref path) = cli.schema {
        let schema = ExtractionSchema::from_file(path)
            .with_context(|| format!("Failed to load schema from {:?}", path))?;
        builder = builder.schema(schema);
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model);
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(ref password) = cli.password {
        builder = builder.password(password);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

fn print_summary(reports: &[DocumentReport]) {
    for r in reports {
        let name = r.id.as_deref().unwrap_or(&r.source);
        match (&r.error, &r.output_path) {
            (Some(e), _) => eprintln!("{} {}  {}", red("✗"), name, red(&e.message)),
            (None, Some(path)) => eprintln!(
                "{} {}  pages {:?}  {}ms  →  {}",
                green("✔"),
                name,
                r.selected_pages,
                r.duration_ms,
                bold(&path.display().to_string())
            ),
            (None, None) => eprintln!(
                "{} {}  pages {:?}  {} image(s)  {}ms",
                green("✔"),
                name,
                r.selected_pages,
                r.images.len(),
                r.duration_ms
            ),
        }
    }
}
