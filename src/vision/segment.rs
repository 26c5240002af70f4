//! Grid cell segmentation
//!
//! Splits a puzzle image into one sub-image per cell, either along detected
//! grid lines or, for borderless puzzles, uniformly over the inked area.

use image::{imageops, GrayImage, Luma};
use imageproc::region_labelling::{connected_components, Connectivity};
use std::fmt;
use tracing::debug;

use super::preprocess::{ink_bounds, ink_mask};
use crate::config::SegmentationSettings;
use crate::puzzle::Position;

/// A cropped cell, row-major position in the grid
#[derive(Debug, Clone)]
pub struct CellImage {
    pub position: Position,
    pub image: GrayImage,
}

/// How the cell boundaries were found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentationMethod {
    GridLines,
    Uniform,
}

/// Segmenter output
#[derive(Debug, Clone)]
pub struct Segmentation {
    pub rows: usize,
    pub cols: usize,
    pub method: SegmentationMethod,
    /// rows x cols cells in row-major order
    pub cells: Vec<CellImage>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Horizontal,
    Vertical,
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Axis::Horizontal => f.write_str("horizontal"),
            Axis::Vertical => f.write_str("vertical"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SegmentationError {
    #[error("the image is empty")]
    EmptyImage,

    #[error("grid dimensions must be at least 1x1")]
    InvalidDimensions,

    #[error(
        "could not detect grid lines ({horizontal} horizontal, {vertical} vertical); \
         give the grid size explicitly"
    )]
    AmbiguousDimensions { horizontal: usize, vertical: usize },

    #[error(
        "a {expected_rows}x{expected_cols} grid needs {} horizontal and {} vertical lines, \
         found {horizontal} and {vertical}",
        expected_rows + 1,
        expected_cols + 1
    )]
    LineCountMismatch {
        expected_rows: usize,
        expected_cols: usize,
        horizontal: usize,
        vertical: usize,
    },

    #[error("a {rows}x{cols} grid exceeds the {max}x{max} limit")]
    GridTooLarge { rows: usize, cols: usize, max: usize },

    #[error("{axis} grid lines are unevenly spaced")]
    IrregularSpacing { axis: Axis },

    #[error("cells of a {rows}x{cols} grid would have aspect ratio {aspect:.2}")]
    IncompatibleAspect { rows: usize, cols: usize, aspect: f32 },

    #[error("expected {expected} cell images, got {found}")]
    CellCountMismatch { expected: usize, found: usize },
}

/// A run of consecutive line pixels (inclusive bounds)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Line {
    start: u32,
    end: u32,
}

impl Line {
    fn center(&self) -> f32 {
        (self.start + self.end) as f32 / 2.0
    }
}

/// Half-open pixel range of one cell along an axis
type Span = (u32, u32);

/// Split `image` into cells
pub fn segment(
    image: &GrayImage,
    dimensions: Option<(usize, usize)>,
    settings: &SegmentationSettings,
) -> Result<Segmentation, SegmentationError> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(SegmentationError::EmptyImage);
    }
    if let Some((rows, cols)) = dimensions {
        if rows == 0 || cols == 0 {
            return Err(SegmentationError::InvalidDimensions);
        }
        check_size(rows, cols, settings.max_grid_size)?;
    }

    let mask = ink_mask(image);
    let (h_lines, v_lines) = match &mask {
        Some(mask) => {
            let (rows_profile, cols_profile) = ink_profiles(mask, width, height);
            (
                detect_lines(&rows_profile, settings.line_fill_ratio),
                detect_lines(&cols_profile, settings.line_fill_ratio),
            )
        }
        None => (Vec::new(), Vec::new()),
    };
    let (horizontal, vertical) = (h_lines.len(), v_lines.len());
    debug!(
        "Segmenting {}x{} image: {} horizontal, {} vertical lines",
        width, height, horizontal, vertical
    );

    let (method, row_spans, col_spans) = match dimensions {
        Some((rows, cols)) if horizontal == rows + 1 && vertical == cols + 1 => {
            line_layout(&h_lines, &v_lines, settings)?
        }
        Some((rows, cols)) if horizontal < 2 && vertical < 2 => {
            let bounds = mask
                .as_deref()
                .and_then(|m| ink_bounds(m, width))
                .unwrap_or((0, 0, width, height));
            uniform_layout(bounds, rows, cols)?
        }
        // Outer frame only: spread the cells over its interior
        Some((rows, cols)) if horizontal == 2 && vertical == 2 => {
            let (_, row_spans, col_spans) = line_layout(&h_lines, &v_lines, settings)?;
            let (y0, y1) = row_spans[0];
            let (x0, x1) = col_spans[0];
            uniform_layout((x0, y0, x1 - x0, y1 - y0), rows, cols)?
        }
        Some((rows, cols)) => {
            return Err(SegmentationError::LineCountMismatch {
                expected_rows: rows,
                expected_cols: cols,
                horizontal,
                vertical,
            })
        }
        None if horizontal == 2 && vertical == 2 => {
            let layout = line_layout(&h_lines, &v_lines, settings)?;
            let blobs = mask
                .as_deref()
                .map(|m| interior_blobs(m, width, layout.1[0], layout.2[0], settings.cell_margin))
                .unwrap_or(0);
            if blobs > 1 {
                debug!("Outer frame holds {} separate marks, not a single cell", blobs);
                return Err(SegmentationError::AmbiguousDimensions { horizontal, vertical });
            }
            layout
        }
        None if horizontal >= 2 && vertical >= 2 => {
            check_size(horizontal - 1, vertical - 1, settings.max_grid_size)?;
            line_layout(&h_lines, &v_lines, settings)?
        }
        None => return Err(SegmentationError::AmbiguousDimensions { horizontal, vertical }),
    };

    let rows = row_spans.len();
    let cols = col_spans.len();
    check_aspect(&row_spans, &col_spans, settings.max_cell_aspect)?;

    let mut cells = Vec::with_capacity(rows * cols);
    for (r, &(y0, y1)) in row_spans.iter().enumerate() {
        for (c, &(x0, x1)) in col_spans.iter().enumerate() {
            let (x, w) = shrink(x0, x1, settings.cell_margin);
            let (y, h) = shrink(y0, y1, settings.cell_margin);
            cells.push(CellImage {
                position: Position::new(r, c),
                image: imageops::crop_imm(image, x, y, w, h).to_image(),
            });
        }
    }

    Ok(Segmentation {
        rows,
        cols,
        method,
        cells,
    })
}

/// Pair up pre-cropped cell images with their positions
pub fn cells_from_images(
    rows: usize,
    cols: usize,
    images: Vec<GrayImage>,
    settings: &SegmentationSettings,
) -> Result<Vec<CellImage>, SegmentationError> {
    if rows == 0 || cols == 0 {
        return Err(SegmentationError::InvalidDimensions);
    }
    check_size(rows, cols, settings.max_grid_size)?;
    if images.len() != rows * cols {
        return Err(SegmentationError::CellCountMismatch {
            expected: rows * cols,
            found: images.len(),
        });
    }
    if images.iter().any(|img| img.width() == 0 || img.height() == 0) {
        return Err(SegmentationError::EmptyImage);
    }

    Ok(images
        .into_iter()
        .enumerate()
        .map(|(i, image)| CellImage {
            position: Position::new(i / cols, i % cols),
            image,
        })
        .collect())
}

fn check_size(rows: usize, cols: usize, max: usize) -> Result<(), SegmentationError> {
    if rows > max || cols > max {
        return Err(SegmentationError::GridTooLarge { rows, cols, max });
    }
    Ok(())
}

/// Fraction of ink per pixel row and per pixel column
fn ink_profiles(mask: &[bool], width: u32, height: u32) -> (Vec<f32>, Vec<f32>) {
    let mut row_counts = vec![0u32; height as usize];
    let mut col_counts = vec![0u32; width as usize];
    for (i, _) in mask.iter().enumerate().filter(|&(_, &ink)| ink) {
        row_counts[i / width as usize] += 1;
        col_counts[i % width as usize] += 1;
    }
    let rows = row_counts.iter().map(|&n| n as f32 / width as f32).collect();
    let cols = col_counts.iter().map(|&n| n as f32 / height as f32).collect();
    (rows, cols)
}

fn detect_lines(profile: &[f32], fill_ratio: f32) -> Vec<Line> {
    let mut lines: Vec<Line> = Vec::new();
    for (i, &fill) in profile.iter().enumerate() {
        if fill < fill_ratio {
            continue;
        }
        let i = i as u32;
        match lines.last_mut() {
            Some(line) if line.end + 1 == i => line.end = i,
            _ => lines.push(Line { start: i, end: i }),
        }
    }
    lines
}

fn line_layout(
    h_lines: &[Line],
    v_lines: &[Line],
    settings: &SegmentationSettings,
) -> Result<(SegmentationMethod, Vec<Span>, Vec<Span>), SegmentationError> {
    check_spacing(h_lines, Axis::Horizontal, settings.spacing_tolerance)?;
    check_spacing(v_lines, Axis::Vertical, settings.spacing_tolerance)?;
    Ok((
        SegmentationMethod::GridLines,
        interiors(h_lines, Axis::Horizontal)?,
        interiors(v_lines, Axis::Vertical)?,
    ))
}

/// Every gap between line centres must be within `tolerance` of the median gap
fn check_spacing(lines: &[Line], axis: Axis, tolerance: f32) -> Result<(), SegmentationError> {
    let mut gaps: Vec<f32> = lines.windows(2).map(|w| w[1].center() - w[0].center()).collect();
    if gaps.len() < 2 {
        return Ok(());
    }
    let original = gaps.clone();
    gaps.sort_by(f32::total_cmp);
    let median = gaps[gaps.len() / 2];

    if original.iter().any(|g| (g - median).abs() > tolerance * median) {
        return Err(SegmentationError::IrregularSpacing { axis });
    }
    Ok(())
}

fn interiors(lines: &[Line], axis: Axis) -> Result<Vec<Span>, SegmentationError> {
    lines
        .windows(2)
        .map(|w| {
            let span = (w[0].end + 1, w[1].start);
            if span.1 <= span.0 {
                Err(SegmentationError::IrregularSpacing { axis })
            } else {
                Ok(span)
            }
        })
        .collect()
}

/// `rows` x `cols` equal cells over the `(x, y, w, h)` box
fn uniform_layout(
    (x, y, w, h): (u32, u32, u32, u32),
    rows: usize,
    cols: usize,
) -> Result<(SegmentationMethod, Vec<Span>, Vec<Span>), SegmentationError> {
    let row_spans = uniform_spans(y, h, rows);
    let col_spans = uniform_spans(x, w, cols);
    if row_spans.iter().chain(&col_spans).any(|(a, b)| b <= a) {
        return Err(SegmentationError::IncompatibleAspect {
            rows,
            cols,
            aspect: w as f32 * rows as f32 / (h as f32 * cols as f32),
        });
    }
    Ok((SegmentationMethod::Uniform, row_spans, col_spans))
}

/// Separate ink components inside the box spanned by `rows` x `cols`,
/// after trimming `margin` off each side
fn interior_blobs(mask: &[bool], width: u32, rows: Span, cols: Span, margin: f32) -> u32 {
    let (y, h) = shrink(rows.0, rows.1, margin);
    let (x, w) = shrink(cols.0, cols.1, margin);
    let interior = GrayImage::from_fn(w, h, |dx, dy| {
        let i = ((y + dy) * width + x + dx) as usize;
        Luma([if mask[i] { 255 } else { 0 }])
    });
    connected_components(&interior, Connectivity::Eight, Luma([0u8]))
        .pixels()
        .map(|p| p.0[0])
        .max()
        .unwrap_or(0)
}

fn uniform_spans(origin: u32, length: u32, count: usize) -> Vec<Span> {
    let length = length as u64;
    let count = count as u64;
    (0..count)
        .map(|i| {
            let a = origin + (i * length / count) as u32;
            let b = origin + ((i + 1) * length / count) as u32;
            (a, b)
        })
        .collect()
}

fn check_aspect(row_spans: &[Span], col_spans: &[Span], max_aspect: f32) -> Result<(), SegmentationError> {
    let mean = |spans: &[Span]| spans.iter().map(|(a, b)| (b - a) as f32).sum::<f32>() / spans.len() as f32;
    let aspect = mean(col_spans) / mean(row_spans);
    if aspect > max_aspect || aspect < 1.0 / max_aspect {
        return Err(SegmentationError::IncompatibleAspect {
            rows: row_spans.len(),
            cols: col_spans.len(),
            aspect,
        });
    }
    Ok(())
}

/// Crop a span inward by `margin` on both sides, keeping at least one pixel
fn shrink(start: u32, end: u32, margin: f32) -> (u32, u32) {
    let len = end - start;
    let inset = ((len as f32 * margin).floor() as u32).min((len - 1) / 2);
    (start + inset, len - 2 * inset)
}
