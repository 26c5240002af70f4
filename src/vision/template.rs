//! Glyph template recognizer
//!
//! Matches a cell against one template per letter using zero-mean normalized
//! cross-correlation. Both sides are normalized the same way first: binarized,
//! cropped to the ink, centred on a square canvas and resized.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use image::imageops::{self, FilterType};
use image::{GrayImage, Luma};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use super::classifier::{LetterRecognizer, RawGuess, RecognizerError};
use super::preprocess::{ink_bounds, ink_mask};

/// Side of the normalized glyph square
const GLYPH_SIZE: u32 = 24;

/// 5x7 block capitals, one byte per row, most significant of the 5 bits on the left
const BLOCK_FONT: [(char, [u8; 7]); 26] = [
    ('A', [0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001]),
    ('B', [0b11110, 0b10001, 0b10001, 0b11110, 0b10001, 0b10001, 0b11110]),
    ('C', [0b01110, 0b10001, 0b10000, 0b10000, 0b10000, 0b10001, 0b01110]),
    ('D', [0b11110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b11110]),
    ('E', [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b11111]),
    ('F', [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000]),
    ('G', [0b01110, 0b10001, 0b10000, 0b10111, 0b10001, 0b10001, 0b01111]),
    ('H', [0b10001, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001]),
    ('I', [0b01110, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110]),
    ('J', [0b00111, 0b00010, 0b00010, 0b00010, 0b00010, 0b10010, 0b01100]),
    ('K', [0b10001, 0b10010, 0b10100, 0b11000, 0b10100, 0b10010, 0b10001]),
    ('L', [0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b11111]),
    ('M', [0b10001, 0b11011, 0b10101, 0b10101, 0b10001, 0b10001, 0b10001]),
    ('N', [0b10001, 0b10001, 0b11001, 0b10101, 0b10011, 0b10001, 0b10001]),
    ('O', [0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110]),
    ('P', [0b11110, 0b10001, 0b10001, 0b11110, 0b10000, 0b10000, 0b10000]),
    ('Q', [0b01110, 0b10001, 0b10001, 0b10001, 0b10101, 0b10010, 0b01101]),
    ('R', [0b11110, 0b10001, 0b10001, 0b11110, 0b10100, 0b10010, 0b10001]),
    ('S', [0b01111, 0b10000, 0b10000, 0b01110, 0b00001, 0b00001, 0b11110]),
    ('T', [0b11111, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100]),
    ('U', [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110]),
    ('V', [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01010, 0b00100]),
    ('W', [0b10001, 0b10001, 0b10001, 0b10101, 0b10101, 0b10101, 0b01010]),
    ('X', [0b10001, 0b10001, 0b01010, 0b00100, 0b01010, 0b10001, 0b10001]),
    ('Y', [0b10001, 0b10001, 0b01010, 0b00100, 0b00100, 0b00100, 0b00100]),
    ('Z', [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b10000, 0b11111]),
];

/// A reference image for one letter
#[derive(Debug, Clone)]
pub struct GlyphTemplate {
    letter: char,
    glyph: GrayImage,
}

impl GlyphTemplate {
    /// Build a template from a rendering of `letter`
    pub fn new(letter: char, image: &GrayImage) -> Result<Self, RecognizerError> {
        let letter = letter.to_ascii_uppercase();
        if !letter.is_ascii_uppercase() {
            return Err(RecognizerError::Failed(format!("{letter:?} is not a letter")));
        }
        let glyph = normalize_glyph(image)
            .ok_or_else(|| RecognizerError::Failed(format!("template for {letter} has no ink")))?;
        Ok(Self { letter, glyph })
    }

    /// Load a template image from disk
    pub fn from_file(letter: char, path: &Path) -> Result<Self> {
        let image = image::open(path)
            .with_context(|| format!("Failed to load template image: {:?}", path))?
            .to_luma8();
        Ok(Self::new(letter, &image)?)
    }

    pub fn letter(&self) -> char {
        self.letter
    }
}

/// Letter recognizer backed by glyph templates.
///
/// Scoring is CPU-bound, so `recognize` runs it on the blocking pool.
#[derive(Debug, Clone)]
pub struct TemplateRecognizer {
    templates: Arc<[GlyphTemplate]>,
    max_candidates: usize,
}

impl TemplateRecognizer {
    pub fn new(templates: Vec<GlyphTemplate>) -> Self {
        Self {
            templates: templates.into(),
            max_candidates: 5,
        }
    }

    /// Templates rendered from the built-in 5x7 block font
    pub fn builtin() -> Self {
        let templates = BLOCK_FONT
            .iter()
            .filter_map(|&(letter, _)| {
                let image = render_block_letter(letter, 4)?;
                GlyphTemplate::new(letter, &image).ok()
            })
            .collect();
        Self::new(templates)
    }

    /// Load `A.png` .. `Z.png` from a directory; missing letters are skipped
    pub fn from_dir(dir: &Path) -> Result<Self> {
        if !dir.is_dir() {
            bail!("Template directory not found: {:?}", dir);
        }

        let mut templates = Vec::new();
        for letter in 'A'..='Z' {
            let path = dir.join(format!("{letter}.png"));
            if path.exists() {
                templates.push(GlyphTemplate::from_file(letter, &path)?);
            }
        }

        if templates.is_empty() {
            bail!("No letter templates (A.png .. Z.png) in {:?}", dir);
        }
        info!("Loaded {} letter templates from {:?}", templates.len(), dir);
        Ok(Self::new(templates))
    }

    pub fn with_max_candidates(mut self, max_candidates: usize) -> Self {
        self.max_candidates = max_candidates;
        self
    }

    pub fn template_count(&self) -> usize {
        self.templates.len()
    }

    /// Score a cell against every template, best first
    pub fn score(&self, cell: &GrayImage) -> Vec<RawGuess> {
        score_glyph(&self.templates, self.max_candidates, cell)
    }
}

fn score_glyph(templates: &[GlyphTemplate], max_candidates: usize, cell: &GrayImage) -> Vec<RawGuess> {
    let Some(glyph) = normalize_glyph(cell) else {
        debug!("Blank cell, no template scored");
        return Vec::new();
    };

    let mut scores: Vec<RawGuess> = templates
        .iter()
        .map(|t| RawGuess::new(t.letter.to_string(), normalized_cross_correlation(&glyph, &t.glyph)))
        .filter(|g| g.confidence > 0.0)
        .collect();

    scores.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    if max_candidates > 0 {
        scores.truncate(max_candidates);
    }
    scores
}

#[async_trait]
impl LetterRecognizer for TemplateRecognizer {
    fn name(&self) -> &str {
        "template"
    }

    async fn is_available(&self) -> bool {
        !self.templates.is_empty()
    }

    async fn recognize(&self, cell: &GrayImage) -> Result<Vec<RawGuess>, RecognizerError> {
        let templates = Arc::clone(&self.templates);
        let max_candidates = self.max_candidates;
        let cell = cell.clone();
        tokio::task::spawn_blocking(move || score_glyph(&templates, max_candidates, &cell))
            .await
            .map_err(|e| RecognizerError::Failed(format!("template scoring task failed: {}", e)))
    }
}

/// Binarize, crop to the ink and centre on a white square of `GLYPH_SIZE`
fn normalize_glyph(image: &GrayImage) -> Option<GrayImage> {
    let mask = ink_mask(image)?;
    let (x, y, w, h) = ink_bounds(&mask, image.width())?;

    let side = w.max(h) + w.max(h) / 8 + 2;
    let offset_x = (side - w) / 2;
    let offset_y = (side - h) / 2;
    let mut canvas = GrayImage::from_pixel(side, side, Luma([255]));
    for dy in 0..h {
        for dx in 0..w {
            let i = ((y + dy) * image.width() + x + dx) as usize;
            if mask[i] {
                canvas.put_pixel(offset_x + dx, offset_y + dy, Luma([0]));
            }
        }
    }

    Some(imageops::resize(&canvas, GLYPH_SIZE, GLYPH_SIZE, FilterType::Triangle))
}

/// Zero-mean normalized cross-correlation of two equally sized images,
/// clamped to [0, 1]
fn normalized_cross_correlation(image: &GrayImage, template: &GrayImage) -> f32 {
    let mut sum_it = 0.0f64;
    let mut sum_i2 = 0.0f64;
    let mut sum_t2 = 0.0f64;
    let mut sum_i = 0.0f64;
    let mut sum_t = 0.0f64;
    let mut count = 0.0f64;

    for (i, t) in image.pixels().zip(template.pixels()) {
        let i = i.0[0] as f64;
        let t = t.0[0] as f64;
        sum_it += i * t;
        sum_i2 += i * i;
        sum_t2 += t * t;
        sum_i += i;
        sum_t += t;
        count += 1.0;
    }

    if count == 0.0 {
        return 0.0;
    }

    let mean_i = sum_i / count;
    let mean_t = sum_t / count;
    let numerator = sum_it - count * mean_i * mean_t;
    let denominator = (sum_i2 - count * mean_i * mean_i).sqrt() * (sum_t2 - count * mean_t * mean_t).sqrt();

    if denominator < 1e-10 {
        return 0.0;
    }

    (numerator / denominator).clamp(0.0, 1.0) as f32
}

/// Render a block-font capital, black on white with a one-dot border.
/// `scale` is the size of one font dot in pixels.
pub fn render_block_letter(letter: char, scale: u32) -> Option<GrayImage> {
    let (_, rows) = BLOCK_FONT.iter().find(|(c, _)| *c == letter.to_ascii_uppercase())?;
    let scale = scale.max(1);
    Some(GrayImage::from_fn(7 * scale, 9 * scale, |x, y| {
        let (col, row) = (x / scale, y / scale);
        let lit = (1..=5).contains(&col)
            && (1..=7).contains(&row)
            && rows[(row - 1) as usize] & (1 << (5 - col)) != 0;
        if lit {
            Luma([0])
        } else {
            Luma([255])
        }
    }))
}
