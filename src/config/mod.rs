//! Solver Configuration
//!
//! Thresholds, search policy and OCR backend settings stored in TOML format.
//! A configuration value is passed explicitly into every solve.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::vision::CellPreprocessing;

/// Solver settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Word search policy
    pub search: SearchSettings,
    /// Grid reconstruction thresholds
    pub reconstruction: ReconstructionSettings,
    /// Image segmentation settings
    pub segmentation: SegmentationSettings,
    /// OCR backend settings
    pub classification: ClassificationSettings,
}

impl SolverConfig {
    /// Check that every value is inside its valid range
    pub fn validate(&self) -> Result<()> {
        let r = &self.reconstruction;
        check_unit("reconstruction.low_confidence_threshold", r.low_confidence_threshold)?;
        check_unit("reconstruction.min_confidence_floor", r.min_confidence_floor)?;
        if r.min_confidence_floor > r.low_confidence_threshold {
            bail!(
                "reconstruction.min_confidence_floor ({}) must not exceed low_confidence_threshold ({})",
                r.min_confidence_floor,
                r.low_confidence_threshold
            );
        }
        if !(r.context_weight >= 0.0 && r.context_weight.is_finite()) {
            bail!("reconstruction.context_weight must be a non-negative number");
        }

        check_unit("search.unresolved_penalty", self.search.unresolved_penalty)?;

        let s = &self.segmentation;
        if s.max_grid_size == 0 {
            bail!("segmentation.max_grid_size must be at least 1");
        }
        if !(0.0..0.5).contains(&s.cell_margin) {
            bail!("segmentation.cell_margin must be in [0, 0.5)");
        }
        if !(s.line_fill_ratio > 0.0 && s.line_fill_ratio <= 1.0) {
            bail!("segmentation.line_fill_ratio must be in (0, 1]");
        }
        check_unit("segmentation.spacing_tolerance", s.spacing_tolerance)?;
        if s.max_cell_aspect < 1.0 {
            bail!("segmentation.max_cell_aspect must be at least 1");
        }

        let c = &self.classification;
        check_unit("classification.max_fallback_fraction", c.max_fallback_fraction)?;
        if c.per_cell_timeout_ms == 0 {
            bail!("classification.per_cell_timeout_ms must be positive");
        }
        if c.max_candidates == 0 {
            bail!("classification.max_candidates must be at least 1");
        }
        if !c.fallback_letter.is_ascii_uppercase() {
            bail!("classification.fallback_letter must be an uppercase letter A-Z");
        }
        Ok(())
    }
}

/// Search engine and result policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    /// Search the four diagonal directions
    pub allow_diagonal: bool,
    /// Search right-to-left, bottom-to-top and the reversed diagonals
    pub allow_reversed: bool,
    /// Report every occurrence of a word instead of the first one in scan order
    pub return_all_occurrences: bool,
    /// How path cell confidences combine into a match confidence
    pub confidence_mode: ConfidenceMode,
    /// Factor applied to a match confidence per unresolved cell on its path
    pub unresolved_penalty: f32,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            allow_diagonal: true,
            allow_reversed: true,
            return_all_occurrences: true,
            confidence_mode: ConfidenceMode::Minimum,
            unresolved_penalty: 0.5,
        }
    }
}

/// Combination rule for path confidences
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceMode {
    /// Weakest cell on the path
    #[default]
    Minimum,
    /// Product of all cells on the path
    Product,
}

/// Grid reconstruction thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconstructionSettings {
    /// Cells whose top candidate is below this are re-ranked using context (0.0 - 1.0)
    pub low_confidence_threshold: f32,
    /// Cells with every candidate below this become unresolved (0.0 - 1.0)
    pub min_confidence_floor: f32,
    /// Weight of the neighbour-context bonus added to candidate confidence
    pub context_weight: f32,
    /// Optional corpus file for the letter model (built-in English list when unset)
    pub letter_corpus: Option<PathBuf>,
}

impl Default for ReconstructionSettings {
    fn default() -> Self {
        Self {
            low_confidence_threshold: 0.6,
            min_confidence_floor: 0.15,
            context_weight: 0.5,
            letter_corpus: None,
        }
    }
}

/// Cell segmentation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentationSettings {
    /// Largest accepted number of rows or columns
    pub max_grid_size: usize,
    /// Fraction of the cell size trimmed from each side of a cell crop
    pub cell_margin: f32,
    /// Minimum ink fraction for a pixel row/column to count as a grid line
    pub line_fill_ratio: f32,
    /// Allowed relative deviation of a line gap from the median gap
    pub spacing_tolerance: f32,
    /// Largest accepted cell width/height (or height/width) ratio
    pub max_cell_aspect: f32,
}

impl Default for SegmentationSettings {
    fn default() -> Self {
        Self {
            max_grid_size: 40,
            cell_margin: 0.12,
            line_fill_ratio: 0.6,
            spacing_tolerance: 0.35,
            max_cell_aspect: 3.0,
        }
    }
}

/// OCR backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecognizerBackend {
    /// Glyph template matching
    #[default]
    Template,
    /// Tesseract command-line OCR
    Tesseract,
}

/// Letter classification settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassificationSettings {
    /// OCR backend to use
    pub backend: RecognizerBackend,
    /// Directory holding `A.png` .. `Z.png` glyph templates (template backend)
    pub template_dir: Option<PathBuf>,
    /// Tesseract executable (tesseract backend)
    pub tesseract_path: PathBuf,
    /// Tesseract language
    pub language: String,
    /// Time allowed for a single cell before it falls back to the placeholder
    pub per_cell_timeout_ms: u64,
    /// Concurrent cell classifications (0 = available parallelism)
    pub max_concurrency: usize,
    /// Fraction of fallback cells above which the solve fails
    pub max_fallback_fraction: f32,
    /// Candidates kept per cell
    pub max_candidates: usize,
    /// Letter used for the zero-confidence placeholder candidate
    pub fallback_letter: char,
    /// Cell cleanup before the image is handed to Tesseract
    pub preprocessing: CellPreprocessing,
}

impl Default for ClassificationSettings {
    fn default() -> Self {
        Self {
            backend: RecognizerBackend::Template,
            template_dir: None,
            tesseract_path: PathBuf::from("tesseract"),
            language: "eng".to_string(),
            per_cell_timeout_ms: 2000,
            max_concurrency: 0,
            max_fallback_fraction: 0.2,
            max_candidates: 5,
            fallback_letter: 'X',
            preprocessing: CellPreprocessing::default(),
        }
    }
}

impl ClassificationSettings {
    /// Effective concurrency limit
    pub fn concurrency(&self) -> usize {
        if self.max_concurrency > 0 {
            self.max_concurrency
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        }
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<SolverConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;
    let config: SolverConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;
    config.validate()?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &SolverConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Default configuration file location
pub fn default_config_path() -> Result<PathBuf> {
    let proj_dirs = directories::ProjectDirs::from("com", "wordpuzzlesolver", "WordPuzzleSolver")
        .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;

    Ok(proj_dirs.config_dir().join("config.toml"))
}

/// Load the given file, else the default location if it exists, else defaults
pub fn load_or_default(path: Option<&Path>) -> Result<SolverConfig> {
    if let Some(path) = path {
        let config = load_config(path)?;
        info!("Loaded configuration from {:?}", path);
        return Ok(config);
    }

    if let Ok(default_path) = default_config_path() {
        if default_path.exists() {
            let config = load_config(&default_path)?;
            info!("Loaded configuration from {:?}", default_path);
            return Ok(config);
        }
    }

    info!("Using default configuration");
    Ok(SolverConfig::default())
}

fn check_unit(name: &str, value: f32) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        bail!("{} must be in [0, 1], got {}", name, value);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = SolverConfig::default();

        assert!(config.search.allow_diagonal);
        assert!(config.search.allow_reversed);
        assert!(config.search.return_all_occurrences);
        assert_eq!(config.search.confidence_mode, ConfidenceMode::Minimum);

        assert!((config.reconstruction.low_confidence_threshold - 0.6).abs() < 0.001);
        assert!((config.reconstruction.min_confidence_floor - 0.15).abs() < 0.001);

        assert_eq!(config.segmentation.max_grid_size, 40);
        assert_eq!(config.classification.backend, RecognizerBackend::Template);
        assert_eq!(config.classification.per_cell_timeout_ms, 2000);
        assert!((config.classification.max_fallback_fraction - 0.2).abs() < 0.001);

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let mut config = SolverConfig::default();
        config.search.confidence_mode = ConfidenceMode::Product;
        config.classification.backend = RecognizerBackend::Tesseract;
        config.classification.template_dir = Some(PathBuf::from("/tmp/glyphs"));

        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: SolverConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config, parsed);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let parsed: SolverConfig = toml::from_str(
            "[search]\nallow_diagonal = false\n\n[classification]\nbackend = \"tesseract\"\n",
        )
        .unwrap();

        assert!(!parsed.search.allow_diagonal);
        assert!(parsed.search.allow_reversed);
        assert_eq!(parsed.classification.backend, RecognizerBackend::Tesseract);
        assert_eq!(parsed.classification.language, "eng");
        assert_eq!(parsed.segmentation, SegmentationSettings::default());
    }

    #[test]
    fn test_preprocessing_section() {
        let parsed: SolverConfig = toml::from_str(
            "[classification.preprocessing]\nmin_dimension = 64\nauto_invert = false\n",
        )
        .unwrap();

        let preprocessing = &parsed.classification.preprocessing;
        assert_eq!(preprocessing.min_dimension, 64);
        assert!(!preprocessing.auto_invert);
        assert!(preprocessing.stretch_contrast);
        assert_eq!(preprocessing.padding, CellPreprocessing::default().padding);
    }

    #[test]
    fn test_save_and_load_config() {
        let mut config = SolverConfig::default();
        config.segmentation.max_grid_size = 25;

        let temp_file = NamedTempFile::new().unwrap();
        save_config(&config, temp_file.path()).unwrap();
        let loaded = load_config(temp_file.path()).unwrap();

        assert_eq!(loaded.segmentation.max_grid_size, 25);
    }

    #[test]
    fn test_load_config_file_not_found() {
        let result = load_config(Path::new("/nonexistent/path/config.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_invalid_toml() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "this is not valid toml {{{{").unwrap();

        assert!(load_config(temp_file.path()).is_err());
    }

    #[test]
    fn test_load_config_rejects_out_of_range_values() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "[reconstruction]\nmin_confidence_floor = 0.9").unwrap();

        let err = load_config(temp_file.path()).unwrap_err();
        assert!(err.to_string().contains("min_confidence_floor"));
    }

    #[test]
    fn test_validate_catches_bad_values() {
        let mut config = SolverConfig::default();
        config.search.unresolved_penalty = 1.5;
        assert!(config.validate().is_err());

        let mut config = SolverConfig::default();
        config.classification.fallback_letter = '0';
        assert!(config.validate().is_err());

        let mut config = SolverConfig::default();
        config.segmentation.cell_margin = 0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_explicit_concurrency() {
        let mut settings = ClassificationSettings::default();
        settings.max_concurrency = 3;
        assert_eq!(settings.concurrency(), 3);
        settings.max_concurrency = 0;
        assert!(settings.concurrency() >= 1);
    }
}
