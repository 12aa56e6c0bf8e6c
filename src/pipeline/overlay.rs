//! Page-number stamp for identification renders.
//!
//! The identification call sends every page of a report in one request and
//! asks the model to answer with page numbers. Printed report pages carry
//! their own (often different) numbering, so each render gets an explicit
//! "Page N" label in a white, black-bordered box in the top-right corner.
//!
//! Text is drawn with the first TrueType font found on the system (or in
//! `SURVEY_OVERLAY_FONT`). Hosts without fonts get a built-in 5×7 bitmap
//! face covering exactly the characters the label needs.

use ab_glyph::{FontVec, PxScale};
use image::{DynamicImage, Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use once_cell::sync::Lazy;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Label height in pixels at 200 DPI.
const FONT_PX: f32 = 40.0;
const MARGIN: f32 = 20.0;
const PADDING: f32 = 10.0;
const BORDER: i32 = 2;

const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);
const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);

const FONT_CANDIDATES: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "/Library/Fonts/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

static SYSTEM_FONT: Lazy<Option<FontVec>> = Lazy::new(load_system_font);

fn load_system_font() -> Option<FontVec> {
    let override_path = std::env::var("SURVEY_OVERLAY_FONT").ok().map(PathBuf::from);
    let candidates = override_path
        .into_iter()
        .chain(FONT_CANDIDATES.iter().map(PathBuf::from));

    for path in candidates {
        let Ok(bytes) = std::fs::read(&path) else {
            continue;
        };
        match FontVec::try_from_vec(bytes) {
            Ok(font) => {
                debug!("Overlay font: {}", path.display());
                return Some(font);
            }
            Err(e) => warn!("Ignoring unreadable font {}: {}", path.display(), e),
        }
    }
    debug!("No TrueType font found; using built-in bitmap digits");
    None
}

/// Return a copy of `img` with "Page {page_num}" stamped in the top-right corner.
///
/// `scale` is `dpi / 200`, so the label keeps the same physical size at any
/// render resolution.
pub fn stamp_page_number(img: &DynamicImage, page_num: usize, scale: f32) -> DynamicImage {
    let label = format!("Page {page_num}");
    let mut canvas = img.to_rgba8();
    match SYSTEM_FONT.as_ref() {
        Some(font) => stamp_with_font(&mut canvas, &label, font, scale),
        None => stamp_with_bitmap(&mut canvas, &label, scale),
    }
    DynamicImage::ImageRgba8(canvas)
}

fn stamp_with_font(canvas: &mut RgbaImage, label: &str, font: &FontVec, scale: f32) {
    let px = PxScale::from(FONT_PX * scale);
    let (text_w, text_h) = text_size(px, font, label);
    let (x, y) = draw_label_box(canvas, text_w, text_h, scale);
    draw_text_mut(canvas, BLACK, x, y, px, font, label);
}

fn stamp_with_bitmap(canvas: &mut RgbaImage, label: &str, scale: f32) {
    let cell = ((FONT_PX * scale) / GLYPH_ROWS as f32).round().max(1.0) as u32;
    let advance = (GLYPH_COLS + 1) * cell;
    let text_w = advance * label.chars().count() as u32 - cell;
    let text_h = GLYPH_ROWS * cell;
    let (x, y) = draw_label_box(canvas, text_w, text_h, scale);

    for (i, ch) in label.chars().enumerate() {
        let rows = glyph(ch);
        let gx = x + (i as u32 * advance) as i32;
        for (row, bits) in rows.iter().enumerate() {
            for col in 0..GLYPH_COLS {
                if bits & (1 << (GLYPH_COLS - 1 - col)) != 0 {
                    let rect = Rect::at(gx + (col * cell) as i32, y + (row as u32 * cell) as i32)
                        .of_size(cell, cell);
                    draw_filled_rect_mut(canvas, rect, BLACK);
                }
            }
        }
    }
}

/// Draw the white, black-bordered box and return the text origin.
fn draw_label_box(canvas: &mut RgbaImage, text_w: u32, text_h: u32, scale: f32) -> (i32, i32) {
    let margin = (MARGIN * scale).round() as i32;
    let padding = (PADDING * scale).round() as i32;
    let x = canvas.width() as i32 - text_w as i32 - margin - padding;
    let y = margin;

    let box_rect = Rect::at(x - padding, y - padding)
        .of_size(text_w + 2 * padding as u32, text_h + 2 * padding as u32);
    draw_filled_rect_mut(canvas, box_rect, WHITE);
    for inset in 0..BORDER {
        let w = box_rect.width().saturating_sub(2 * inset as u32);
        let h = box_rect.height().saturating_sub(2 * inset as u32);
        if w > 0 && h > 0 {
            let r = Rect::at(box_rect.left() + inset, box_rect.top() + inset).of_size(w, h);
            draw_hollow_rect_mut(canvas, r, BLACK);
        }
    }
    (x, y)
}

const GLYPH_COLS: u32 = 5;
const GLYPH_ROWS: u32 = 7;

fn glyph(ch: char) -> [u8; 7] {
    match ch {
        '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
        '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
        '2' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
        '3' => [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E],
        '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
        '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
        '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
        '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
        '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
        'P' => [0x1E, 0x11, 0x11, 0x1E, 0x10, 0x10, 0x10],
        'a' => [0x00, 0x00, 0x0E, 0x01, 0x0F, 0x11, 0x0F],
        'g' => [0x00, 0x0F, 0x11, 0x11, 0x0F, 0x01, 0x0E],
        'e' => [0x00, 0x00, 0x0E, 0x11, 0x1F, 0x10, 0x0E],
        _ => [0; 7],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn white_page(w: u32, h: u32) -> RgbaImage {
        RgbaImage::from_pixel(w, h, WHITE)
    }

    fn dark_pixels(img: &RgbaImage, xs: std::ops::Range<u32>, ys: std::ops::Range<u32>) -> usize {
        ys.flat_map(|y| xs.clone().map(move |x| (x, y)))
            .filter(|&(x, y)| img.get_pixel(x, y).0[0] < 128)
            .count()
    }

    #[test]
    fn bitmap_stamp_lands_top_right() {
        let mut img = white_page(800, 1000);
        stamp_with_bitmap(&mut img, "Page 12", 1.0);

        assert!(dark_pixels(&img, 400..800, 0..150) > 0, "label missing");
        assert_eq!(dark_pixels(&img, 0..400, 0..1000), 0, "ink on the left half");
        assert_eq!(dark_pixels(&img, 400..800, 200..1000), 0, "ink below the label");
    }

    #[test]
    fn bitmap_glyphs_cover_label_characters() {
        for ch in "Page 0123456789".chars().filter(|c| *c != ' ') {
            assert!(glyph(ch).iter().any(|row| *row != 0), "no glyph for {ch:?}");
        }
    }

    #[test]
    fn stamp_keeps_dimensions_and_source() {
        let src = DynamicImage::ImageRgba8(white_page(600, 800));
        let stamped = stamp_page_number(&src, 3, 1.0);
        assert_eq!((stamped.width(), stamped.height()), (600, 800));
        assert_eq!(dark_pixels(&src.to_rgba8(), 0..600, 0..800), 0);
        assert!(dark_pixels(&stamped.to_rgba8(), 300..600, 0..200) > 0);
    }

    #[test]
    fn tiny_image_does_not_panic() {
        let src = DynamicImage::ImageRgba8(white_page(8, 8));
        let stamped = stamp_page_number(&src, 100, 0.5);
        assert_eq!(stamped.width(), 8);
    }
}
