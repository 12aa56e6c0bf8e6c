//! PDF rasterisation: the [`Rasterizer`] seam, its pdfium implementation,
//! and [`render_pages`], which persists the clean page images.
//!
//! ## Why spawn_blocking?
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which is CPU-bound
//! and not async-aware. `tokio::task::spawn_blocking` moves the work onto the
//! blocking pool so Tokio worker threads never stall during rendering.
//!
//! ## Why cap pixels as well as DPI?
//!
//! Survey reports are usually A4, but scanned annexes can be A3 or larger.
//! `max_rendered_pixels` caps the longest edge regardless of physical size,
//! keeping memory and request size bounded.

use crate::config::ExtractionConfig;
use crate::error::SurveyError;
use crate::output::{Document, PageImage, PageVariant};
use crate::pipeline::encode::png_bytes;
use async_trait::async_trait;
use image::DynamicImage;
use pdfium_render::prelude::*;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Turns PDF pages into images.
#[async_trait]
pub trait Rasterizer: Send + Sync {
    /// Number of pages in the PDF at `path`.
    async fn page_count(&self, path: &Path, password: Option<&str>) -> Result<usize, SurveyError>;

    /// Render the given 0-based page indices, in the given order.
    ///
    /// Returns `(page_index_0based, image)` pairs.
    async fn render(
        &self,
        path: &Path,
        indices: &[usize],
        dpi: u32,
        max_pixels: u32,
        password: Option<&str>,
    ) -> Result<Vec<(usize, DynamicImage)>, SurveyError>;
}

/// [`Rasterizer`] backed by the pdfium library.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfiumRasterizer;

#[async_trait]
impl Rasterizer for PdfiumRasterizer {
    async fn page_count(&self, path: &Path, password: Option<&str>) -> Result<usize, SurveyError> {
        let path = path.to_path_buf();
        let pwd = password.map(|s| s.to_string());

        tokio::task::spawn_blocking(move || -> Result<usize, SurveyError> {
            let pdfium = bind_pdfium()?;
            let document = load_document(&pdfium, &path, pwd.as_deref())?;
            Ok(document.pages().len() as usize)
        })
        .await
        .map_err(|e| SurveyError::Internal(format!("Page-count task panicked: {}", e)))?
    }

    async fn render(
        &self,
        path: &Path,
        indices: &[usize],
        dpi: u32,
        max_pixels: u32,
        password: Option<&str>,
    ) -> Result<Vec<(usize, DynamicImage)>, SurveyError> {
        let path = path.to_path_buf();
        let pwd = password.map(|s| s.to_string());
        let indices = indices.to_vec();

        tokio::task::spawn_blocking(move || {
            render_blocking(&path, &indices, dpi, max_pixels, pwd.as_deref())
        })
        .await
        .map_err(|e| SurveyError::Internal(format!("Render task panicked: {}", e)))?
    }
}

/// Bind to the pdfium shared library.
///
/// `PDFIUM_LIB_PATH` wins when it points at an existing file; otherwise the
/// platform library is taken from the pdfium-auto cache, downloading it on
/// first use.
pub fn bind_pdfium() -> Result<Pdfium, SurveyError> {
    pdfium_auto::bind_pdfium_silent().map_err(binding_error)
}

fn binding_error(e: pdfium_auto::PdfiumAutoError) -> SurveyError {
    SurveyError::PdfiumBindingFailed(e.to_string())
}

fn load_document<'a>(
    pdfium: &'a Pdfium,
    pdf_path: &Path,
    password: Option<&'a str>,
) -> Result<PdfDocument<'a>, SurveyError> {
    pdfium.load_pdf_from_file(pdf_path, password).map_err(|e| {
        let err_str = format!("{:?}", e);
        if err_str.contains("Password") || err_str.contains("password") {
            if password.is_some() {
                SurveyError::WrongPassword {
                    path: pdf_path.to_path_buf(),
                }
            } else {
                SurveyError::PasswordRequired {
                    path: pdf_path.to_path_buf(),
                }
            }
        } else {
            SurveyError::CorruptPdf {
                path: pdf_path.to_path_buf(),
                detail: err_str,
            }
        }
    })
}

fn render_blocking(
    pdf_path: &Path,
    indices: &[usize],
    dpi: u32,
    max_pixels: u32,
    password: Option<&str>,
) -> Result<Vec<(usize, DynamicImage)>, SurveyError> {
    let pdfium = bind_pdfium()?;
    let document = load_document(&pdfium, pdf_path, password)?;
    let pages = document.pages();
    let total_pages = pages.len() as usize;

    let render_config = PdfRenderConfig::new()
        .scale_page_by_factor(dpi as f32 / 72.0)
        .set_maximum_width(max_pixels as i32)
        .set_maximum_height(max_pixels as i32);

    let mut results = Vec::with_capacity(indices.len());
    for &idx in indices {
        if idx >= total_pages {
            return Err(SurveyError::InvalidPage {
                page: idx + 1,
                total: total_pages,
            });
        }

        let page = pages
            .get(idx as u16)
            .map_err(|e| SurveyError::RasterisationFailed {
                page: idx + 1,
                detail: format!("{:?}", e),
            })?;

        let bitmap = page.render_with_config(&render_config).map_err(|e| {
            SurveyError::RasterisationFailed {
                page: idx + 1,
                detail: format!("{:?}", e),
            }
        })?;

        let image = bitmap.as_image();
        debug!(
            "Rendered page {} → {}x{} px",
            idx + 1,
            image.width(),
            image.height()
        );
        results.push((idx, image));
    }

    Ok(results)
}

/// The configured rasteriser, or pdfium.
pub fn rasterizer_for(config: &ExtractionConfig) -> Arc<dyn Rasterizer> {
    match &config.rasterizer {
        Some(r) => Arc::clone(r),
        None => Arc::new(PdfiumRasterizer),
    }
}

/// File name of the clean image for a 1-based page number.
pub fn page_file_name(page_num: usize) -> String {
    format!("page_{:03}.png", page_num)
}

/// Directory holding the clean images of the document named `id`.
pub fn document_images_dir(config: &ExtractionConfig, id: &str) -> PathBuf {
    config.images_dir.join(id)
}

/// Render `page_numbers` (1-based) of `document` without overlay and write
/// one PNG per page to `<images_dir>/<id>/page_NNN.png`.
///
/// All page numbers are checked before anything is rendered, so an
/// out-of-range request produces no files. Output order equals request
/// order. Existing files are overwritten, and page images left over from an
/// earlier run with a different selection are removed, so the folder always
/// holds exactly the current selection (possibly nothing).
pub async fn render_pages(
    document: &Document,
    page_numbers: &[usize],
    config: &ExtractionConfig,
) -> Result<Vec<PageImage>, SurveyError> {
    if let Some(&bad) = page_numbers.iter().find(|&&p| !document.contains_page(p)) {
        return Err(SurveyError::InvalidPage {
            page: bad,
            total: document.page_count,
        });
    }

    let rendered = if page_numbers.is_empty() {
        Vec::new()
    } else {
        let indices: Vec<usize> = page_numbers.iter().map(|p| p - 1).collect();
        rasterizer_for(config)
            .render(
                &document.path,
                &indices,
                config.render_dpi,
                config.max_rendered_pixels,
                config.password.as_deref(),
            )
            .await?
    };

    let dir = document_images_dir(config, &document.id);
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|e| SurveyError::ImageWriteFailed {
            path: dir.clone(),
            detail: e.to_string(),
        })?;
    remove_stale_pages(&dir, page_numbers);

    let mut images = Vec::with_capacity(rendered.len());
    for (idx, image) in rendered {
        let page_num = idx + 1;
        let path = dir.join(page_file_name(page_num));
        let bytes = png_bytes(&image).map_err(|e| SurveyError::ImageWriteFailed {
            path: path.clone(),
            detail: e.to_string(),
        })?;
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|e| SurveyError::ImageWriteFailed {
                path: path.clone(),
                detail: e.to_string(),
            })?;

        images.push(PageImage {
            page_num,
            variant: PageVariant::Clean,
            width: image.width(),
            height: image.height(),
            path: Some(path),
        });
    }

    info!(
        "{}: wrote {} page image(s) to {}",
        document.id,
        images.len(),
        dir.display()
    );
    Ok(images)
}

static RE_PAGE_FILE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^page_(\d+)\.png$").unwrap());

/// `(page_num, path)` of every `page_NNN.png` directly inside `dir`, in
/// ascending page order. A missing directory yields nothing.
fn page_files(dir: &Path) -> Vec<(usize, PathBuf)> {
    let pattern = format!("{}/page_*.png", glob::Pattern::escape(&dir.to_string_lossy()));
    let Ok(entries) = glob::glob(&pattern) else {
        return Vec::new();
    };

    let mut pages: Vec<(usize, PathBuf)> = entries
        .filter_map(Result::ok)
        .filter_map(|path| {
            let name = path.file_name()?.to_str()?;
            let page = RE_PAGE_FILE.captures(name)?[1].parse().ok()?;
            Some((page, path))
        })
        .collect();
    pages.sort_by_key(|(page, _)| *page);
    pages
}

fn remove_stale_pages(dir: &Path, keep: &[usize]) {
    for (page, path) in page_files(dir) {
        if keep.contains(&page) {
            continue;
        }
        match std::fs::remove_file(&path) {
            Ok(()) => debug!("Removed stale page image {}", path.display()),
            Err(e) => warn!("Could not remove stale page image {}: {}", path.display(), e),
        }
    }
}

/// Clean page images saved by an earlier identification run, in page order.
///
/// Fails with [`SurveyError::NoSavedPages`] when `dir` does not exist; an
/// existing but empty folder means the section was not found and yields an
/// empty list.
pub fn saved_pages(dir: &Path) -> Result<Vec<PageImage>, SurveyError> {
    if !dir.is_dir() {
        return Err(SurveyError::NoSavedPages {
            dir: dir.to_path_buf(),
        });
    }

    page_files(dir)
        .into_iter()
        .map(|(page_num, path)| {
            let (width, height) =
                image::image_dimensions(&path).map_err(|e| SurveyError::ImageWriteFailed {
                    path: path.clone(),
                    detail: format!("cannot read back: {e}"),
                })?;
            Ok(PageImage {
                page_num,
                variant: PageVariant::Clean,
                width,
                height,
                path: Some(path),
            })
        })
        .collect()
}
