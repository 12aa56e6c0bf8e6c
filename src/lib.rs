//! # survey-extract
//!
//! Pull the "Planned Machinery Survey" tables out of ClassNK survey-status
//! PDF reports using a hosted Vision Language Model (VLM).
//!
//! A survey-status report runs to dozens of pages of which only a handful
//! hold the Continuous Machinery Survey tables. This crate asks the VLM to
//! locate those pages first, then extracts each of them into JSON shaped by
//! an [`ExtractionSchema`], and writes one file per report.
//!
//! ## Pipeline Overview
//!
//! ```text
//! URL / path / spreadsheet
//!  │
//!  ├─ 1. Acquire   download to download_dir (or validate a local file)
//!  ├─ 2. Identify  render all pages, stamp "Page N", one VLM call
//!  ├─ 3. Render    re-render the selected pages → images/<id>/page_NNN.png
//!  ├─ 4. Extract   one VLM call per page, answer pinned to the schema
//!  └─ 5. Aggregate ordered JSON array → final_json_output/<id>.json
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use survey_extract::{process_document, ExtractionConfig, Source};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from GEMINI_API_KEY / OPENAI_API_KEY / ANTHROPIC_API_KEY
//!     let config = ExtractionConfig::default();
//!     let report = process_document(&Source::new("LEADER-1.pdf"), &config).await;
//!     match report.error {
//!         None => println!("pages {:?} → {:?}", report.selected_pages, report.output_path),
//!         Some(e) => eprintln!("failed: {}", e.message),
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `survey-extract` binary (clap + anyhow + indicatif + tracing-subscriber) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod aggregate;
pub mod config;
pub mod error;
pub mod extract;
pub mod identify;
pub mod output;
pub mod pipeline;
pub mod process;
pub mod progress;
pub mod prompts;
pub mod schema;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use aggregate::{aggregate, write_result};
pub use config::{ExtractionConfig, ExtractionConfigBuilder};
pub use error::{ErrorKind, ServiceStage, SurveyError};
pub use extract::extract;
pub use identify::identify_pages;
pub use output::{
    AggregatedResult, Document, DocumentReport, ExtractedRecord, PageImage, PageSelection,
    PageVariant, ReportedError,
};
pub use pipeline::batch::{read_sources, Source, SourceColumns};
pub use pipeline::llm::{LlmVisionModel, VisionModel};
pub use pipeline::render::{render_pages, PdfiumRasterizer, Rasterizer};
pub use process::{
    download_batch, extract_saved_document, identify_document, process_batch, process_document,
    process_document_sync, resolve_vision_model, ProcessMode,
};
pub use progress::{ExtractionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use schema::{ExtractionSchema, FieldKind, SchemaField};
