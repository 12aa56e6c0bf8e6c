//! Page identification: find the pages of the target section.
//!
//! Every page is rendered, stamped with "Page N", and sent in one request
//! together with the section instruction. The numbered renders stay in
//! memory and are dropped when this returns.

use crate::config::ExtractionConfig;
use crate::error::SurveyError;
use crate::output::{Document, PageSelection};
use crate::pipeline::encode::{encode_numbered, EncodedPage};
use crate::pipeline::llm::VisionModel;
use crate::pipeline::overlay::stamp_page_number;
use crate::pipeline::render::rasterizer_for;
use crate::prompts::identification_prompt;
use tracing::{debug, info, warn};

/// DPI at which the overlay constants are specified.
const OVERLAY_REFERENCE_DPI: f32 = 200.0;

/// Ask `model` which pages of `document` belong to the target section.
///
/// The answer is sorted, de-duplicated, and clipped to the document; page
/// numbers outside it are logged and dropped. A model failure is an error,
/// never an empty selection.
pub async fn identify_pages(
    document: &Document,
    model: &dyn VisionModel,
    config: &ExtractionConfig,
) -> Result<PageSelection, SurveyError> {
    if document.page_count == 0 {
        warn!("{}: document has no pages", document.id);
        return Ok(PageSelection::default());
    }

    let numbered = render_numbered(document, config).await?;
    let instruction = identification_prompt(config.section_prompt.as_deref(), document.page_count);
    debug!(
        "{}: sending {} numbered page(s) for identification",
        document.id,
        numbered.len()
    );

    let reported = model.identify_pages(&numbered, &instruction).await?;
    let (selection, dropped) = PageSelection::within(reported, document.page_count);
    if !dropped.is_empty() {
        warn!(
            "{}: ignoring page number(s) {:?} outside 1..={}",
            document.id, dropped, document.page_count
        );
    }

    info!(
        "{}: {} of {} page(s) selected: {:?}",
        document.id,
        selection.len(),
        document.page_count,
        selection.pages()
    );
    Ok(selection)
}

/// Render every page at the identification DPI with its number stamped on.
async fn render_numbered(
    document: &Document,
    config: &ExtractionConfig,
) -> Result<Vec<EncodedPage>, SurveyError> {
    let indices: Vec<usize> = (0..document.page_count).collect();
    let rendered = rasterizer_for(config)
        .render(
            &document.path,
            &indices,
            config.identify_dpi,
            config.max_rendered_pixels,
            config.password.as_deref(),
        )
        .await?;

    let scale = config.identify_dpi as f32 / OVERLAY_REFERENCE_DPI;
    rendered
        .iter()
        .map(|(idx, img)| {
            let page_num = idx + 1;
            let stamped = stamp_page_number(img, page_num, scale);
            encode_numbered(page_num, &stamped).map_err(|e| SurveyError::RasterisationFailed {
                page: page_num,
                detail: format!("Image encoding failed: {}", e),
            })
        })
        .collect()
}
