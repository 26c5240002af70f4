//! Vision/OCR Layer
//!
//! Turns a puzzle image into per-cell letter candidates.
//! Supports multiple OCR backends:
//! - Glyph templates (built-in block font or a directory of letter images)
//! - Tesseract CLI in single-character mode

pub mod classifier;
pub mod preprocess;
pub mod segment;
pub mod template;
pub mod tesseract;

pub use classifier::{
    normalize_guesses, CellOutcome, ClassifiedCell, ClassifiedGrid, ClassifierAdapter, LetterRecognizer, RawGuess,
    RecognizerError,
};
pub use preprocess::{prepare_cell, CellPreprocessing};
pub use segment::{cells_from_images, segment, Axis, CellImage, Segmentation, SegmentationError, SegmentationMethod};
pub use template::{render_block_letter, GlyphTemplate, TemplateRecognizer};
pub use tesseract::TesseractRecognizer;

use anyhow::Result;
use image::GrayImage;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::{ClassificationSettings, RecognizerBackend, SegmentationSettings};
use crate::error::SolveError;

/// Decode image bytes (any format the `image` crate reads) to grayscale
pub fn decode_image(bytes: &[u8]) -> Result<GrayImage, SolveError> {
    image::load_from_memory(bytes)
        .map(|img| img.to_luma8())
        .map_err(|e| SolveError::ImageDecode(e.to_string()))
}

/// Create the recognizer selected by the classification settings
pub fn build_recognizer(settings: &ClassificationSettings) -> Result<Arc<dyn LetterRecognizer>> {
    match settings.backend {
        RecognizerBackend::Template => {
            let recognizer = match &settings.template_dir {
                Some(dir) => {
                    info!("Initializing template recognizer from {:?}", dir);
                    TemplateRecognizer::from_dir(dir)?
                }
                None => {
                    info!("Initializing template recognizer with the built-in block font");
                    TemplateRecognizer::builtin()
                }
            };
            Ok(Arc::new(recognizer.with_max_candidates(settings.max_candidates)))
        }
        RecognizerBackend::Tesseract => {
            info!(
                "Initializing Tesseract recognizer ({:?}, language {})",
                settings.tesseract_path, settings.language
            );
            Ok(Arc::new(TesseractRecognizer::from_settings(settings)))
        }
    }
}

/// Image to candidate grid: segmentation followed by classification
pub struct VisionPipeline {
    adapter: ClassifierAdapter,
    segmentation: SegmentationSettings,
}

impl VisionPipeline {
    pub fn new(
        recognizer: Arc<dyn LetterRecognizer>,
        segmentation: &SegmentationSettings,
        classification: &ClassificationSettings,
    ) -> Self {
        Self {
            adapter: ClassifierAdapter::new(recognizer, classification),
            segmentation: segmentation.clone(),
        }
    }

    /// Segment a full puzzle image and classify every cell
    pub async fn process_image(
        &self,
        bytes: &[u8],
        dimensions: Option<(usize, usize)>,
        cancel: &CancellationToken,
    ) -> Result<ClassifiedGrid, SolveError> {
        let start = Instant::now();
        let image = decode_image(bytes)?;
        let segmentation = segment(&image, dimensions, &self.segmentation)?;
        debug!(
            "Segmented {}x{} image into a {}x{} grid ({:?}) in {:?}",
            image.width(),
            image.height(),
            segmentation.rows,
            segmentation.cols,
            segmentation.method,
            start.elapsed()
        );

        self.classify(segmentation.rows, segmentation.cols, segmentation.cells, cancel)
            .await
    }

    /// Classify pre-cropped cell images, row-major
    pub async fn process_cells(
        &self,
        rows: usize,
        cols: usize,
        images: Vec<GrayImage>,
        cancel: &CancellationToken,
    ) -> Result<ClassifiedGrid, SolveError> {
        let cells = cells_from_images(rows, cols, images, &self.segmentation)?;
        self.classify(rows, cols, cells, cancel).await
    }

    async fn classify(
        &self,
        rows: usize,
        cols: usize,
        cells: Vec<CellImage>,
        cancel: &CancellationToken,
    ) -> Result<ClassifiedGrid, SolveError> {
        let start = Instant::now();
        let classified = self.adapter.classify_grid(rows, cols, cells, cancel).await?;
        debug!(
            "Vision processing ({}) complete in {:?}: {} cells, {} fallback",
            self.adapter.recognizer_name(),
            start.elapsed(),
            rows * cols,
            classified.fallback_cells
        );
        Ok(classified)
    }
}
