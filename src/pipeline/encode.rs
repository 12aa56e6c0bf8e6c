//! Image encoding: `DynamicImage` → base64 PNG wrapped in `ImageData`.
//!
//! PNG keeps table rules and small digits crisp; JPEG artefacts around
//! survey codes are a common source of misread values.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// A page image ready to attach to a model request.
#[derive(Debug, Clone)]
pub struct EncodedPage {
    /// 1-based page number.
    pub page_num: usize,
    pub image: ImageData,
}

/// Encode a rasterised page as a base64 PNG ready for the VLM API.
///
/// `detail: "high"` keeps providers that tile images from downscaling the
/// page to a single overview tile.
pub fn encode_page(img: &DynamicImage) -> Result<ImageData, image::ImageError> {
    let buf = png_bytes(img)?;
    let b64 = STANDARD.encode(&buf);
    debug!("Encoded image → {} bytes base64", b64.len());

    Ok(ImageData::new(b64, "image/png").with_detail("high"))
}

/// Wrap PNG bytes already on disk, without decoding them.
pub fn encode_png_bytes(bytes: &[u8]) -> ImageData {
    ImageData::new(STANDARD.encode(bytes), "image/png").with_detail("high")
}

/// Encode a page and tag it with its page number.
pub fn encode_numbered(page_num: usize, img: &DynamicImage) -> Result<EncodedPage, image::ImageError> {
    Ok(EncodedPage {
        page_num,
        image: encode_page(img)?,
    })
}

/// Serialise an image as PNG bytes.
pub fn png_bytes(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn encode_small_image() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 10, Rgba([255, 0, 0, 255])));
        let data = encode_page(&img).expect("encode should succeed");
        assert_eq!(data.mime_type, "image/png");
        let decoded = STANDARD.decode(&data.data).expect("valid base64");
        assert_eq!(&decoded[1..4], b"PNG");
    }

    #[test]
    fn png_bytes_wrap_without_reencoding() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(3, 3, Rgba([9, 9, 9, 255])));
        let bytes = png_bytes(&img).unwrap();
        let data = encode_png_bytes(&bytes);
        assert_eq!(STANDARD.decode(&data.data).unwrap(), bytes);
    }

    #[test]
    fn numbered_page_keeps_number() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(4, 4, Rgba([0, 0, 0, 255])));
        let page = encode_numbered(7, &img).unwrap();
        assert_eq!(page.page_num, 7);
    }
}
