//! Data carried between pipeline stages and returned to callers.

use crate::error::{ErrorKind, SurveyError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;

/// One source PDF, resolved to a local file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Filesystem-safe identifier; names the output JSON and image folder.
    pub id: String,
    /// The URL or path the document came from.
    pub source: String,
    /// Local path of the PDF.
    pub path: PathBuf,
    /// Total number of pages.
    pub page_count: usize,
}

impl Document {
    /// `true` when `page` (1-based) exists in this document.
    pub fn contains_page(&self, page: usize) -> bool {
        page >= 1 && page <= self.page_count
    }
}

/// Whether a rendered page carries the page-number stamp.
///
/// The pipeline itself only ever produces [`PageVariant::Clean`] page images.
/// Identification renders are stamped, encoded and sent straight to the
/// model as [`crate::pipeline::encode::EncodedPage`]s; they are never written
/// to disk and never become a [`PageImage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageVariant {
    /// Stamped with "Page N". Exists only in memory during identification;
    /// [`crate::extract::extract`] rejects a `PageImage` of this variant or
    /// without a `path`.
    Numbered,
    /// Untouched render; persisted and used for extraction.
    Clean,
}

/// One rendered page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageImage {
    /// 1-based page number.
    pub page_num: usize,
    pub variant: PageVariant,
    pub width: u32,
    pub height: u32,
    /// Where the image was written. `None` for in-memory numbered renders.
    pub path: Option<PathBuf>,
}

/// Ordered, de-duplicated 1-based page numbers of the target section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageSelection(Vec<usize>);

impl PageSelection {
    /// Sort, de-duplicate, and keep only pages in `1..=total_pages`.
    ///
    /// Returns the selection and the discarded out-of-range numbers.
    pub fn within(pages: impl IntoIterator<Item = usize>, total_pages: usize) -> (Self, Vec<usize>) {
        let (mut keep, mut dropped): (Vec<usize>, Vec<usize>) = pages
            .into_iter()
            .partition(|&p| p >= 1 && p <= total_pages);
        keep.sort_unstable();
        keep.dedup();
        dropped.sort_unstable();
        dropped.dedup();
        (Self(keep), dropped)
    }

    pub fn pages(&self) -> &[usize] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Structured data extracted from one page: schema field name → value.
pub type ExtractedRecord = Map<String, Value>;

/// Per-page records of one document, in ascending page order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AggregatedResult(Vec<ExtractedRecord>);

impl AggregatedResult {
    pub fn new(records: Vec<ExtractedRecord>) -> Self {
        Self(records)
    }

    pub fn records(&self) -> &[ExtractedRecord] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Outcome of one document in a batch run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentReport {
    /// URL or path as given.
    pub source: String,
    /// Document identifier, when acquisition got far enough to assign one.
    pub id: Option<String>,
    pub page_count: Option<usize>,
    /// Pages identified as belonging to the target section.
    pub selected_pages: Vec<usize>,
    /// Clean page images written for the selection.
    pub images: Vec<PathBuf>,
    /// Aggregated JSON file, when extraction ran.
    pub output_path: Option<PathBuf>,
    pub duration_ms: u64,
    pub error: Option<ReportedError>,
}

/// Serialisable summary of a [`SurveyError`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportedError {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&SurveyError> for ReportedError {
    fn from(e: &SurveyError) -> Self {
        Self {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

impl DocumentReport {
    pub(crate) fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            id: None,
            page_count: None,
            selected_pages: Vec::new(),
            images: Vec::new(),
            output_path: None,
            duration_ms: 0,
            error: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}
