//! Cell image preprocessing for OCR
//!
//! Normalizes a cropped cell before it reaches an OCR backend: dark ink on a
//! light background, full contrast range, a minimum size and a white border.

use image::imageops::{self, FilterType};
use image::{GrayImage, Luma};
use imageproc::contrast::otsu_level;
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Images with a smaller luma range than this are treated as blank
const MIN_CONTRAST: u8 = 32;

/// Preprocessing settings, `[classification.preprocessing]` in the config file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CellPreprocessing {
    /// Invert cells that show light text on a dark background
    pub auto_invert: bool,
    /// Stretch the luma range to 0-255
    pub stretch_contrast: bool,
    /// Upscale so the smaller side is at least this many pixels (0 = never)
    pub min_dimension: u32,
    /// White border added around the cell, in pixels
    pub padding: u32,
}

impl Default for CellPreprocessing {
    fn default() -> Self {
        Self {
            auto_invert: true,
            stretch_contrast: true,
            // Tesseract needs ~40+ pixel glyphs for reliable single characters
            min_dimension: 48,
            padding: 8,
        }
    }
}

/// Apply preprocessing to a cell image
pub fn prepare_cell(cell: &GrayImage, settings: &CellPreprocessing) -> GrayImage {
    let mut result = cell.clone();

    if settings.auto_invert && is_light_on_dark(&result) {
        trace!("Inverting light-on-dark cell");
        imageops::invert(&mut result);
    }

    if settings.stretch_contrast {
        stretch_contrast(&mut result);
    }

    if settings.min_dimension > 0 {
        result = upscale_to(&result, settings.min_dimension);
    }

    if settings.padding > 0 {
        result = pad(&result, settings.padding, 255);
    }

    result
}

/// Luma threshold separating ink from background, `None` for blank images.
/// Pixels at or below the level are ink once the image is dark-on-light.
pub fn ink_level(image: &GrayImage) -> Option<u8> {
    let (min, max) = luma_range(image)?;
    if max - min < MIN_CONTRAST {
        return None;
    }
    Some(otsu_level(image))
}

/// Boolean ink mask (row-major). Ink is the darker class unless that class
/// covers most of the image, in which case the lighter class is ink.
pub fn ink_mask(image: &GrayImage) -> Option<Vec<bool>> {
    let level = ink_level(image)?;
    let mut mask: Vec<bool> = image.pixels().map(|p| p.0[0] <= level).collect();
    let dark = mask.iter().filter(|&&ink| ink).count();
    if dark * 2 > mask.len() {
        mask.iter_mut().for_each(|ink| *ink = !*ink);
    }
    Some(mask)
}

/// Bounding box (x, y, width, height) of the ink in a mask
pub fn ink_bounds(mask: &[bool], width: u32) -> Option<(u32, u32, u32, u32)> {
    let mut min_x = u32::MAX;
    let mut min_y = u32::MAX;
    let mut max_x = 0;
    let mut max_y = 0;

    for (i, _) in mask.iter().enumerate().filter(|&(_, &ink)| ink) {
        let x = i as u32 % width;
        let y = i as u32 / width;
        min_x = min_x.min(x);
        min_y = min_y.min(y);
        max_x = max_x.max(x);
        max_y = max_y.max(y);
    }

    (min_x != u32::MAX).then(|| (min_x, min_y, max_x - min_x + 1, max_y - min_y + 1))
}

/// Light text on a dark background (mean luma below mid-grey)
fn is_light_on_dark(image: &GrayImage) -> bool {
    let count = image.pixels().len();
    if count == 0 {
        return false;
    }
    let sum: u64 = image.pixels().map(|p| p.0[0] as u64).sum();
    sum / (count as u64) < 128
}

/// Linear stretch of the luma range to 0-255
fn stretch_contrast(image: &mut GrayImage) {
    let Some((min, max)) = luma_range(image) else {
        return;
    };
    if max == min {
        return;
    }
    let range = (max - min) as f32;
    for pixel in image.pixels_mut() {
        let value = (pixel.0[0] - min) as f32 * 255.0 / range;
        pixel.0[0] = value.round().clamp(0.0, 255.0) as u8;
    }
}

/// Upscale so that the smaller side reaches `min_dimension`, keeping aspect ratio
fn upscale_to(image: &GrayImage, min_dimension: u32) -> GrayImage {
    let (w, h) = image.dimensions();
    let smaller = w.min(h);
    if smaller == 0 || smaller >= min_dimension {
        return image.clone();
    }
    let scale = min_dimension as f32 / smaller as f32;
    let new_w = ((w as f32) * scale).round() as u32;
    let new_h = ((h as f32) * scale).round() as u32;
    imageops::resize(image, new_w, new_h, FilterType::Triangle)
}

/// Surround the image with a uniform border
fn pad(image: &GrayImage, padding: u32, value: u8) -> GrayImage {
    let (w, h) = image.dimensions();
    let mut padded = GrayImage::from_pixel(w + 2 * padding, h + 2 * padding, Luma([value]));
    imageops::replace(&mut padded, image, padding as i64, padding as i64);
    padded
}

fn luma_range(image: &GrayImage) -> Option<(u8, u8)> {
    image.pixels().fold(None, |acc, p| {
        let v = p.0[0];
        Some(match acc {
            None => (v, v),
            Some((lo, hi)) => (lo.min(v), hi.max(v)),
        })
    })
}
