//! Structured extraction of one clean page image.

use crate::error::{ServiceStage, SurveyError};
use crate::output::{ExtractedRecord, PageImage, PageVariant};
use crate::pipeline::encode::{encode_png_bytes, EncodedPage};
use crate::pipeline::llm::VisionModel;
use crate::schema::ExtractionSchema;
use tracing::debug;

/// Extract `image` into a record whose keys are exactly the schema's
/// top-level fields.
///
/// The persisted PNG is what gets sent, so the record always corresponds to
/// the file on disk. Stamped pages are refused: the "Page N" box would be
/// read as table content.
pub async fn extract(
    model: &dyn VisionModel,
    image: &PageImage,
    schema: &ExtractionSchema,
) -> Result<ExtractedRecord, SurveyError> {
    if image.variant != PageVariant::Clean {
        return Err(SurveyError::Internal(format!(
            "page {} is a numbered render; extraction needs the clean image",
            image.page_num
        )));
    }
    let path = image.path.as_ref().ok_or_else(|| {
        SurveyError::Internal(format!("page {} has no image file", image.page_num))
    })?;
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| SurveyError::ImageWriteFailed {
            path: path.clone(),
            detail: format!("cannot read back: {e}"),
        })?;

    let page = EncodedPage {
        page_num: image.page_num,
        image: encode_png_bytes(&bytes),
    };
    let answer = model.extract_structured(&page, schema).await?;

    let record = schema.conform(answer).ok_or_else(|| {
        SurveyError::service(
            ServiceStage::Extraction {
                page: image.page_num,
            },
            "answer is not a JSON object",
        )
    })?;
    debug!(
        "Page {}: extracted {} field(s) for schema '{}'",
        image.page_num,
        record.len(),
        schema.name
    );
    Ok(record)
}
