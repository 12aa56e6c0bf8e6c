//! Error types for the survey-extract library.
//!
//! Every failure surfaces as a [`SurveyError`]. Callers that need to decide
//! whether to skip a source, abort a document, or stop the whole run use
//! [`SurveyError::kind`], which collapses the variants into the three
//! categories the pipeline reasons about:
//!
//! * [`ErrorKind::Acquisition`] — one source could not be fetched or opened.
//!   The batch logs it and moves on to the next source.
//! * [`ErrorKind::InvalidPage`] — a page number fell outside the document.
//!   Fatal for that document.
//! * [`ErrorKind::ExtractionService`] — the hosted model failed or answered
//!   with something that could not be parsed. Fatal for that document.
//!
//! A service failure is never turned into an empty result: "no pages
//! matched" is `Ok(empty)`, "the service failed" is `Err(..)`.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// All errors returned by the survey-extract library.
#[derive(Debug, Error)]
pub enum SurveyError {
    // ── Acquisition errors ────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    /// No saved page images exist for a document whose extraction was asked
    /// to resume from an earlier identification run.
    #[error("No saved page images at '{dir}'\nRun with --identify-only first.")]
    NoSavedPages { dir: PathBuf },

    /// A batch input (spreadsheet, CSV, list, directory) could not be read.
    #[error("Cannot read batch input '{path}': {detail}")]
    BatchInput { path: PathBuf, detail: String },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{path}' is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired { path: PathBuf },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{path}'")]
    WrongPassword { path: PathBuf },

    /// A requested page number is outside `1..=total`.
    #[error("Page {page} is out of range (document has {total} pages)")]
    InvalidPage { page: usize, total: usize },

    /// pdfium-render returned an error for a specific page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    // ── Hosted model errors ───────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// The hosted model call failed, timed out, or returned content that
    /// could not be parsed.
    #[error("{stage} failed: {detail}")]
    ExtractionService { stage: ServiceStage, detail: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write an output JSON file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Could not write a rendered page image.
    #[error("Failed to write page image '{path}': {detail}")]
    ImageWriteFailed { path: PathBuf, detail: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The extraction schema file is malformed.
    #[error("Invalid extraction schema: {0}")]
    InvalidSchema(String),

    // ── Pdfium binding errors ─────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
The library is downloaded to the pdfium-auto cache on first use.\n\
Offline? Set PDFIUM_LIB_PATH=/path/to/libpdfium instead.\n"
    )]
    PdfiumBindingFailed(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Which of the two hosted-model calls failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStage {
    /// The page-identification call.
    Identification,
    /// A per-page structured-extraction call.
    Extraction { page: usize },
}

impl std::fmt::Display for ServiceStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceStage::Identification => write!(f, "Page identification"),
            ServiceStage::Extraction { page } => write!(f, "Extraction of page {page}"),
        }
    }
}

/// Coarse classification of a [`SurveyError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Acquisition,
    InvalidPage,
    ExtractionService,
    Other,
}

impl SurveyError {
    /// Classify this error for batch-level reporting.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SurveyError::FileNotFound { .. }
            | SurveyError::PermissionDenied { .. }
            | SurveyError::InvalidInput { .. }
            | SurveyError::DownloadFailed { .. }
            | SurveyError::DownloadTimeout { .. }
            | SurveyError::NotAPdf { .. }
            | SurveyError::NoSavedPages { .. }
            | SurveyError::BatchInput { .. } => ErrorKind::Acquisition,
            SurveyError::InvalidPage { .. } => ErrorKind::InvalidPage,
            SurveyError::ExtractionService { .. } | SurveyError::ProviderNotConfigured { .. } => {
                ErrorKind::ExtractionService
            }
            _ => ErrorKind::Other,
        }
    }

    pub(crate) fn service(stage: ServiceStage, detail: impl Into<String>) -> Self {
        SurveyError::ExtractionService {
            stage,
            detail: detail.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_page_display() {
        let e = SurveyError::InvalidPage { page: 11, total: 10 };
        let msg = e.to_string();
        assert!(msg.contains("Page 11"), "got: {msg}");
        assert!(msg.contains("10 pages"), "got: {msg}");
    }

    #[test]
    fn service_error_names_stage() {
        let e = SurveyError::service(ServiceStage::Extraction { page: 7 }, "HTTP 503");
        assert_eq!(e.to_string(), "Extraction of page 7 failed: HTTP 503");
        assert_eq!(e.kind(), ErrorKind::ExtractionService);

        let e = SurveyError::service(ServiceStage::Identification, "bad json");
        assert!(e.to_string().starts_with("Page identification failed"));
    }

    #[test]
    fn download_errors_are_acquisition() {
        let e = SurveyError::DownloadFailed {
            url: "https://example.com/a.pdf".into(),
            reason: "HTTP 404".into(),
        };
        assert_eq!(e.kind(), ErrorKind::Acquisition);
        let e = SurveyError::NotAPdf {
            path: "x.pdf".into(),
            magic: *b"<htm",
        };
        assert_eq!(e.kind(), ErrorKind::Acquisition);
        let e = SurveyError::InvalidInput {
            input: "ftp://example.com/a.pdf".into(),
        };
        assert_eq!(e.kind(), ErrorKind::Acquisition);
        let e = SurveyError::NoSavedPages {
            dir: "images/LEADER-1".into(),
        };
        assert_eq!(e.kind(), ErrorKind::Acquisition);
        assert!(e.to_string().contains("--identify-only"));
    }

    #[test]
    fn render_errors_are_other() {
        let e = SurveyError::RasterisationFailed {
            page: 2,
            detail: "oom".into(),
        };
        assert_eq!(e.kind(), ErrorKind::Other);
        assert_eq!(
            SurveyError::InvalidPage { page: 0, total: 3 }.kind(),
            ErrorKind::InvalidPage
        );
    }
}
