//! Orchestration: drive documents through
//! acquisition → identification → rendering → extraction → aggregation.
//!
//! The stages can also be run in two halves: [`ProcessMode::IdentifyOnly`]
//! stops once the section pages are saved, and [`ProcessMode::ExtractSaved`]
//! later picks those saved pages up without touching the PDF again.
//!
//! Documents run one at a time and pages are extracted one at a time in
//! page order. A failure ends that document only: the reports returned by
//! [`process_batch`] carry one entry per source, failed or not.

use crate::aggregate::{aggregate, output_path_for, write_result};
use crate::config::ExtractionConfig;
use crate::error::{ErrorKind, SurveyError};
use crate::extract::extract;
use crate::identify::identify_pages;
use crate::output::{Document, DocumentReport, PageImage, ReportedError};
use crate::pipeline::batch::Source;
use crate::pipeline::input::{acquire, document_id};
use crate::pipeline::llm::{LlmVisionModel, VisionModel};
use crate::pipeline::render::{document_images_dir, rasterizer_for, render_pages, saved_pages};
use edgequake_llm::{LLMProvider, ProviderFactory};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// How far each document is taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcessMode {
    /// Full pipeline, writing one JSON file per document.
    #[default]
    Extract,
    /// Identify and render the section pages; no extraction, no JSON.
    IdentifyOnly,
    /// Fetch and validate the PDFs only.
    DownloadOnly,
    /// Extract from the page images an earlier [`ProcessMode::IdentifyOnly`]
    /// run saved under `<images_dir>/<id>/`; the PDF is not opened and the
    /// section is not identified again.
    ExtractSaved,
}

/// Run the full pipeline for one source.
///
/// Failures are recorded in the returned report's `error`.
pub async fn process_document(source: &Source, config: &ExtractionConfig) -> DocumentReport {
    run_single(source, config, ProcessMode::Extract).await
}

/// Identify and render the section pages of one source, without extraction.
pub async fn identify_document(source: &Source, config: &ExtractionConfig) -> DocumentReport {
    run_single(source, config, ProcessMode::IdentifyOnly).await
}

/// Extract one document from its previously saved page images.
pub async fn extract_saved_document(source: &Source, config: &ExtractionConfig) -> DocumentReport {
    run_single(source, config, ProcessMode::ExtractSaved).await
}

/// Synchronous wrapper around [`process_document`].
///
/// Creates a temporary tokio runtime internally.
pub fn process_document_sync(
    source: &Source,
    config: &ExtractionConfig,
) -> Result<DocumentReport, SurveyError> {
    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| SurveyError::Internal(format!("Failed to create tokio runtime: {}", e)))?;
    Ok(runtime.block_on(process_document(source, config)))
}

/// Fetch every source into the download directory.
pub async fn download_batch(sources: &[Source], config: &ExtractionConfig) -> Vec<DocumentReport> {
    process_batch(sources, config, ProcessMode::DownloadOnly).await
}

/// Process `sources` sequentially in the given mode.
///
/// The model is resolved once for the whole batch. If that fails, every
/// report carries the resolution error.
pub async fn process_batch(
    sources: &[Source],
    config: &ExtractionConfig,
    mode: ProcessMode,
) -> Vec<DocumentReport> {
    if let Some(ref cb) = config.progress_callback {
        cb.on_batch_start(sources.len());
    }

    let model = match mode {
        ProcessMode::DownloadOnly => Ok(None),
        _ => resolve_vision_model(config).await.map(Some),
    };

    let mut reports = Vec::with_capacity(sources.len());
    for source in sources {
        let report = match &model {
            Ok(model) => run_document(source, model.as_deref(), config, mode).await,
            Err(e) => failed_report(source, e, config),
        };
        reports.push(report);
    }

    let success = reports.iter().filter(|r| r.is_success()).count();
    info!(
        "Batch complete: {}/{} document(s) succeeded",
        success,
        reports.len()
    );
    if let Some(ref cb) = config.progress_callback {
        cb.on_batch_complete(reports.len(), success);
    }
    reports
}

async fn run_single(source: &Source, config: &ExtractionConfig, mode: ProcessMode) -> DocumentReport {
    match resolve_vision_model(config).await {
        Ok(model) => run_document(source, Some(model.as_ref()), config, mode).await,
        Err(e) => failed_report(source, &e, config),
    }
}

fn failed_report(source: &Source, e: &SurveyError, config: &ExtractionConfig) -> DocumentReport {
    if let Some(ref cb) = config.progress_callback {
        cb.on_document_start(&source.location);
    }
    let mut report = DocumentReport::new(&source.location);
    report.error = Some(ReportedError::from(e));
    if let Some(ref cb) = config.progress_callback {
        cb.on_document_complete(&source.location, Some(&e.to_string()));
    }
    report
}

/// Run one document, turning any error into the report's `error` field.
async fn run_document(
    source: &Source,
    model: Option<&dyn VisionModel>,
    config: &ExtractionConfig,
    mode: ProcessMode,
) -> DocumentReport {
    let start = Instant::now();
    if let Some(ref cb) = config.progress_callback {
        cb.on_document_start(&source.location);
    }
    info!("Starting: {}", source.location);

    let mut report = DocumentReport::new(&source.location);
    let outcome = run_stages(source, model, config, mode, &mut report).await;
    report.duration_ms = start.elapsed().as_millis() as u64;

    let message = match outcome {
        Ok(()) => {
            info!("Finished {} in {}ms", source.location, report.duration_ms);
            None
        }
        Err(e) => {
            match e.kind() {
                ErrorKind::Acquisition => warn!("Skipping {}: {}", source.location, e),
                _ => error!("{} failed: {}", source.location, e),
            }
            let message = e.to_string();
            report.error = Some(ReportedError::from(&e));
            Some(message)
        }
    };

    if let Some(ref cb) = config.progress_callback {
        cb.on_document_complete(&source.location, message.as_deref());
    }
    report
}

async fn run_stages(
    source: &Source,
    model: Option<&dyn VisionModel>,
    config: &ExtractionConfig,
    mode: ProcessMode,
    report: &mut DocumentReport,
) -> Result<(), SurveyError> {
    if mode == ProcessMode::ExtractSaved {
        let Some(model) = model else {
            return Err(SurveyError::Internal("no vision model resolved".into()));
        };
        let id = document_id(source);
        report.id = Some(id.clone());
        let images = saved_pages(&document_images_dir(config, &id))?;
        report.selected_pages = images.iter().map(|i| i.page_num).collect();
        report.images = images.iter().filter_map(|i| i.path.clone()).collect();
        info!("{}: {} saved page image(s)", id, images.len());
        return extract_and_write(&id, &images, model, config, report).await;
    }

    // ── Step 1: Acquire ──────────────────────────────────────────────────
    let acquired = acquire(source, &config.download_dir, config.download_timeout_secs).await?;
    report.id = Some(acquired.id.clone());
    if mode == ProcessMode::DownloadOnly {
        return Ok(());
    }
    let Some(model) = model else {
        return Err(SurveyError::Internal("no vision model resolved".into()));
    };

    // ── Step 2: Open ─────────────────────────────────────────────────────
    let page_count = rasterizer_for(config)
        .page_count(&acquired.path, config.password.as_deref())
        .await?;
    report.page_count = Some(page_count);
    let document = Document {
        id: acquired.id,
        source: source.location.clone(),
        path: acquired.path,
        page_count,
    };
    info!("{}: {} page(s)", document.id, page_count);

    // ── Step 3: Identify ─────────────────────────────────────────────────
    let selection = identify_pages(&document, model, config).await?;
    report.selected_pages = selection.pages().to_vec();
    if let Some(ref cb) = config.progress_callback {
        cb.on_pages_identified(&document.id, page_count, selection.pages());
    }

    // ── Step 4: Render ───────────────────────────────────────────────────
    let images = render_pages(&document, selection.pages(), config).await?;
    report.images = images.iter().filter_map(|i| i.path.clone()).collect();
    if mode == ProcessMode::IdentifyOnly {
        return Ok(());
    }

    extract_and_write(&document.id, &images, model, config, report).await
}

/// Steps 5 and 6: extract every page in order, then aggregate and persist.
async fn extract_and_write(
    id: &str,
    images: &[PageImage],
    model: &dyn VisionModel,
    config: &ExtractionConfig,
    report: &mut DocumentReport,
) -> Result<(), SurveyError> {
    // ── Step 5: Extract ──────────────────────────────────────────────────
    let mut records = Vec::with_capacity(images.len());
    for image in images {
        if let Some(ref cb) = config.progress_callback {
            cb.on_page_start(id, image.page_num);
        }
        let record = extract(model, image, &config.schema).await?;
        if let Some(ref cb) = config.progress_callback {
            cb.on_page_extracted(id, image.page_num);
        }
        records.push((image.page_num, record));
    }

    // ── Step 6: Aggregate ────────────────────────────────────────────────
    let result = aggregate(records);
    let path = output_path_for(config, id);
    write_result(&result, &path).await?;
    report.output_path = Some(path);
    Ok(())
}

// ── Model resolution ─────────────────────────────────────────────────────

/// The configured [`VisionModel`], or one built from the resolved provider.
pub async fn resolve_vision_model(
    config: &ExtractionConfig,
) -> Result<Arc<dyn VisionModel>, SurveyError> {
    if let Some(ref model) = config.vision_model {
        return Ok(Arc::clone(model));
    }
    let provider = resolve_provider(config).await?;
    Ok(Arc::new(LlmVisionModel::new(provider, config)))
}

/// Model used when only a provider name is known.
fn default_model_for(provider: &str) -> &'static str {
    match provider {
        "gemini" | "google" => "gemini-2.0-flash",
        "anthropic" => "claude-sonnet-4-20250514",
        _ => "gpt-4.1-mini",
    }
}

fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, SurveyError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        SurveyError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific.
///
/// 1. **Pre-built provider** (`config.provider`), used as-is.
/// 2. **Named provider** (`config.provider_name`) with `config.model` or the
///    provider's default model.
/// 3. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`).
/// 4. **Known API key**: `GEMINI_API_KEY`, then `OPENAI_API_KEY`.
/// 5. **Full auto-detection** (`ProviderFactory::from_env`).
async fn resolve_provider(config: &ExtractionConfig) -> Result<Arc<dyn LLMProvider>, SurveyError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(default_model_for(name));
        return create_vision_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_vision_provider(&prov, &model);
        }
    }

    for (key, provider) in [("GEMINI_API_KEY", "gemini"), ("OPENAI_API_KEY", "openai")] {
        if std::env::var(key).map(|v| !v.is_empty()).unwrap_or(false) {
            let model = config.model.as_deref().unwrap_or(default_model_for(provider));
            return create_vision_provider(provider, model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| SurveyError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set GEMINI_API_KEY, OPENAI_API_KEY, or ANTHROPIC_API_KEY, or pass --provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}
