//! Progress-callback trait for per-document and per-page pipeline events.
//!
//! Inject an [`Arc<dyn ExtractionProgressCallback>`] via
//! [`crate::config::ExtractionConfigBuilder::progress_callback`] to follow a
//! batch as it runs. All methods default to no-ops so implementations only
//! override what they care about.
//!
//! # Example
//!
//! ```rust
//! use survey_extract::{ExtractionConfig, ExtractionProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct PageCounter(AtomicUsize);
//!
//! impl ExtractionProgressCallback for PageCounter {
//!     fn on_page_extracted(&self, _doc: &str, page_num: usize) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("page {page_num} done");
//!     }
//! }
//!
//! let config = ExtractionConfig::builder()
//!     .progress_callback(Arc::new(PageCounter(AtomicUsize::new(0))))
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the pipeline as it processes each document.
///
/// Documents and pages are processed sequentially, so methods are never
/// called concurrently by the pipeline itself; the `Send + Sync` bound lets
/// the callback live inside a shared [`crate::ExtractionConfig`].
pub trait ExtractionProgressCallback: Send + Sync {
    /// Called once before the first document of a batch.
    fn on_batch_start(&self, total_documents: usize) {
        let _ = total_documents;
    }

    /// Called when a document starts acquisition.
    fn on_document_start(&self, source: &str) {
        let _ = source;
    }

    /// Called after the identification call returned.
    ///
    /// `selected` holds the 1-based page numbers of the target section.
    fn on_pages_identified(&self, doc_id: &str, total_pages: usize, selected: &[usize]) {
        let _ = (doc_id, total_pages, selected);
    }

    /// Called just before the extraction request for one page is sent.
    fn on_page_start(&self, doc_id: &str, page_num: usize) {
        let _ = (doc_id, page_num);
    }

    /// Called when one page has been extracted.
    fn on_page_extracted(&self, doc_id: &str, page_num: usize) {
        let _ = (doc_id, page_num);
    }

    /// Called when a document finished, successfully or not.
    ///
    /// `error` is `None` on success.
    fn on_document_complete(&self, source: &str, error: Option<&str>) {
        let _ = (source, error);
    }

    /// Called once after every document in the batch has been attempted.
    fn on_batch_complete(&self, total_documents: usize, success_count: usize) {
        let _ = (total_documents, success_count);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ExtractionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ExtractionConfig`].
pub type ProgressCallback = Arc<dyn ExtractionProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl ExtractionProgressCallback for Recorder {
        fn on_pages_identified(&self, doc_id: &str, total_pages: usize, selected: &[usize]) {
            self.events
                .lock()
                .unwrap()
                .push(format!("{doc_id}:{total_pages}:{selected:?}"));
        }

        fn on_document_complete(&self, source: &str, error: Option<&str>) {
            self.events
                .lock()
                .unwrap()
                .push(format!("{source}:{}", error.unwrap_or("ok")));
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_batch_start(2);
        cb.on_document_start("a.pdf");
        cb.on_pages_identified("a", 10, &[3, 7]);
        cb.on_page_start("a", 3);
        cb.on_page_extracted("a", 3);
        cb.on_document_complete("a.pdf", Some("boom"));
        cb.on_batch_complete(2, 1);
    }

    #[test]
    fn overridden_methods_receive_events() {
        let rec = Recorder::default();
        rec.on_pages_identified("LEADER-1", 12, &[4, 5]);
        rec.on_page_start("LEADER-1", 4);
        rec.on_document_complete("LEADER-1.pdf", None);
        let events = rec.events.lock().unwrap();
        assert_eq!(
            *events,
            vec!["LEADER-1:12:[4, 5]".to_string(), "LEADER-1.pdf:ok".to_string()]
        );
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_document_start("x");
    }
}
