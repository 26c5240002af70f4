//! Solve pipeline
//!
//! Ties the layers together: word validation, OCR (for image input), grid
//! reconstruction, search and aggregation. A `Solver` only holds immutable
//! shared state, so one instance can serve concurrent requests.

use anyhow::Result;
use image::GrayImage;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, Instrument};
use uuid::Uuid;

use crate::config::{ReconstructionSettings, SearchSettings, SolverConfig};
use crate::error::SolveError;
use crate::puzzle::{self, reconstruct, Grid, LetterModel, SolveReport, SolveStats, WordIndex};
use crate::vision::{build_recognizer, LetterRecognizer, VisionPipeline};

/// The puzzle to solve
#[derive(Debug, Clone)]
pub enum PuzzleInput {
    /// Encoded image (PNG, JPEG, ...) of the letter grid. Without dimensions
    /// the grid size comes from the detected grid lines.
    Image {
        bytes: Vec<u8>,
        dimensions: Option<(usize, usize)>,
    },
    /// Pre-cropped cell images in row-major order
    Cells {
        rows: usize,
        cols: usize,
        images: Vec<GrayImage>,
    },
    /// Typed grid, one row per line, `?` for unknown cells
    Text(String),
}

/// Per-request overrides of the configured search policy and thresholds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolveOptions {
    pub allow_diagonal: bool,
    pub allow_reversed: bool,
    pub return_all_occurrences: bool,
    pub low_confidence_threshold: f32,
    pub min_confidence_floor: f32,
}

impl Default for SolveOptions {
    fn default() -> Self {
        Self {
            allow_diagonal: true,
            allow_reversed: true,
            return_all_occurrences: true,
            low_confidence_threshold: 0.6,
            min_confidence_floor: 0.15,
        }
    }
}

impl SolveOptions {
    /// Options matching a configuration
    pub fn from_config(config: &SolverConfig) -> Self {
        Self {
            allow_diagonal: config.search.allow_diagonal,
            allow_reversed: config.search.allow_reversed,
            return_all_occurrences: config.search.return_all_occurrences,
            low_confidence_threshold: config.reconstruction.low_confidence_threshold,
            min_confidence_floor: config.reconstruction.min_confidence_floor,
        }
    }

    pub fn validate(&self) -> Result<(), SolveError> {
        let unit = 0.0..=1.0;
        if !unit.contains(&self.low_confidence_threshold) {
            return Err(SolveError::InvalidOptions(format!(
                "low_confidence_threshold must be in [0, 1], got {}",
                self.low_confidence_threshold
            )));
        }
        if !unit.contains(&self.min_confidence_floor) {
            return Err(SolveError::InvalidOptions(format!(
                "min_confidence_floor must be in [0, 1], got {}",
                self.min_confidence_floor
            )));
        }
        if self.min_confidence_floor > self.low_confidence_threshold {
            return Err(SolveError::InvalidOptions(
                "min_confidence_floor must not exceed low_confidence_threshold".to_string(),
            ));
        }
        Ok(())
    }

    /// Configured settings with these options applied
    fn apply(&self, config: &SolverConfig) -> (SearchSettings, ReconstructionSettings) {
        let search = SearchSettings {
            allow_diagonal: self.allow_diagonal,
            allow_reversed: self.allow_reversed,
            return_all_occurrences: self.return_all_occurrences,
            ..config.search.clone()
        };
        let reconstruction = ReconstructionSettings {
            low_confidence_threshold: self.low_confidence_threshold,
            min_confidence_floor: self.min_confidence_floor,
            ..config.reconstruction.clone()
        };
        (search, reconstruction)
    }
}

/// Word-search solver
pub struct Solver {
    config: SolverConfig,
    recognizer: Option<Arc<dyn LetterRecognizer>>,
    model: Arc<LetterModel>,
}

impl Solver {
    /// Solver for typed grids only; image input needs a recognizer
    pub fn new(config: SolverConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            recognizer: None,
            model: Arc::new(LetterModel::english()),
        })
    }

    /// Build the configured recognizer and letter model
    pub fn from_config(config: SolverConfig) -> Result<Self> {
        config.validate()?;
        let recognizer = build_recognizer(&config.classification)?;
        let model = match &config.reconstruction.letter_corpus {
            Some(path) => LetterModel::load(path)?,
            None => LetterModel::english(),
        };

        Ok(Self {
            config,
            recognizer: Some(recognizer),
            model: Arc::new(model),
        })
    }

    pub fn with_recognizer(mut self, recognizer: Arc<dyn LetterRecognizer>) -> Self {
        self.recognizer = Some(recognizer);
        self
    }

    pub fn with_model(mut self, model: Arc<LetterModel>) -> Self {
        self.model = model;
        self
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    /// Options taken from the configuration
    pub fn default_options(&self) -> SolveOptions {
        SolveOptions::from_config(&self.config)
    }

    /// Solve one puzzle
    pub async fn solve<S: AsRef<str>>(
        &self,
        input: PuzzleInput,
        words: &[S],
        options: &SolveOptions,
        cancel: &CancellationToken,
    ) -> Result<SolveReport, SolveError> {
        let span = info_span!("solve", id = %Uuid::new_v4());
        self.run(input, words, options, cancel).instrument(span).await
    }

    /// Solve an already resolved grid
    pub fn solve_grid<S: AsRef<str>>(
        &self,
        grid: &Grid,
        words: &[S],
        options: &SolveOptions,
    ) -> Result<SolveReport, SolveError> {
        options.validate()?;
        let index = WordIndex::new(words)?;
        let (search, _) = options.apply(&self.config);
        let stats = SolveStats {
            cells: grid.len(),
            unresolved_cells: grid.unresolved_count(),
            ..Default::default()
        };
        Ok(puzzle::solve_grid(grid, &index, &search, stats))
    }

    async fn run<S: AsRef<str>>(
        &self,
        input: PuzzleInput,
        words: &[S],
        options: &SolveOptions,
        cancel: &CancellationToken,
    ) -> Result<SolveReport, SolveError> {
        let start = Instant::now();

        // Input problems are reported before any OCR work
        options.validate()?;
        let index = WordIndex::new(words)?;
        let (search, reconstruction) = options.apply(&self.config);
        info!("Solving for {} words", index.len());

        if cancel.is_cancelled() {
            return Err(SolveError::Cancelled);
        }

        let (grid, stats) = match input {
            PuzzleInput::Text(text) => {
                let grid = Grid::parse(&text)?;
                let stats = SolveStats {
                    cells: grid.len(),
                    unresolved_cells: grid.unresolved_count(),
                    ..Default::default()
                };
                (grid, stats)
            }
            PuzzleInput::Image { bytes, dimensions } => {
                let pipeline = self.pipeline()?;
                let classified = pipeline.process_image(&bytes, dimensions, cancel).await?;
                self.resolve(&classified, &reconstruction)?
            }
            PuzzleInput::Cells { rows, cols, images } => {
                let pipeline = self.pipeline()?;
                let classified = pipeline.process_cells(rows, cols, images, cancel).await?;
                self.resolve(&classified, &reconstruction)?
            }
        };

        debug!("Resolved grid:\n{}", grid);
        let report = puzzle::solve_grid(&grid, &index, &search, stats);
        info!(
            "Solved {}x{} grid in {:?}: {} matches, {} of {} words not found",
            grid.rows(),
            grid.cols(),
            start.elapsed(),
            report.found().len(),
            report.not_found().len(),
            index.len()
        );
        Ok(report)
    }

    fn pipeline(&self) -> Result<VisionPipeline, SolveError> {
        let recognizer = self
            .recognizer
            .clone()
            .ok_or_else(|| SolveError::OcrUnavailable("no letter recognizer is configured".to_string()))?;
        Ok(VisionPipeline::new(
            recognizer,
            &self.config.segmentation,
            &self.config.classification,
        ))
    }

    fn resolve(
        &self,
        classified: &crate::vision::ClassifiedGrid,
        settings: &ReconstructionSettings,
    ) -> Result<(Grid, SolveStats), SolveError> {
        let rebuilt = reconstruct(&classified.candidates, &self.model, settings)?;
        let stats = SolveStats {
            cells: rebuilt.grid.len(),
            fallback_cells: classified.fallback_cells,
            unresolved_cells: rebuilt.unresolved_cells,
            corrected_cells: rebuilt.corrected_cells,
        };
        Ok((rebuilt.grid, stats))
    }
}
