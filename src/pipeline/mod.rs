//! Pipeline stages for survey-page extraction.
//!
//! Each submodule implements exactly one step, so backends (rasteriser,
//! hosted model) can be swapped or stubbed without touching the others.
//!
//! ## Data Flow
//!
//! ```text
//! input/batch ──▶ render ──▶ overlay ──▶ encode ──▶ llm ──▶ postprocess
//! (URL/path/xlsx)  (pdfium)  ("Page N")  (base64)   (VLM)   (JSON parse)
//! ```
//!
//! 1. [`input`]  — canonicalise a path or URL to a local PDF in the download dir
//! 2. [`batch`]  — read source lists from spreadsheets, CSV, or plain text
//! 3. [`render`] — rasterise pages; pdfium runs in `spawn_blocking`
//! 4. [`overlay`] — stamp the page number on identification renders
//! 5. [`encode`] — PNG-encode and base64-wrap images for the request body
//! 6. [`llm`]    — the [`llm::VisionModel`] seam and its provider-backed
//!    implementation; the only stage with model network I/O
//! 7. [`postprocess`] — turn raw model text into JSON values

pub mod batch;
pub mod encode;
pub mod input;
pub mod llm;
pub mod overlay;
pub mod postprocess;
pub mod render;
