//! Tesseract CLI recognizer
//!
//! Runs the `tesseract` executable in single-character mode on each cell and
//! reads the TSV it prints. Requires Tesseract on PATH (or a configured path).

use async_trait::async_trait;
use image::GrayImage;
use std::path::PathBuf;
use std::process::Stdio;
use tempfile::NamedTempFile;
use tokio::process::Command;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::classifier::{LetterRecognizer, RawGuess, RecognizerError};
use super::preprocess::{prepare_cell, CellPreprocessing};
use crate::config::ClassificationSettings;

const WHITELIST: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// TSV row level for single words
const WORD_LEVEL: i32 = 5;

pub struct TesseractRecognizer {
    executable: PathBuf,
    language: String,
    preprocessing: CellPreprocessing,
    available: OnceCell<bool>,
}

impl TesseractRecognizer {
    pub fn new(executable: impl Into<PathBuf>, language: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
            language: language.into(),
            preprocessing: CellPreprocessing::default(),
            available: OnceCell::new(),
        }
    }

    pub fn from_settings(settings: &ClassificationSettings) -> Self {
        Self::new(settings.tesseract_path.clone(), settings.language.clone())
            .with_preprocessing(settings.preprocessing.clone())
    }

    pub fn with_preprocessing(mut self, preprocessing: CellPreprocessing) -> Self {
        self.preprocessing = preprocessing;
        self
    }

    async fn probe(&self) -> bool {
        let result = Command::new(&self.executable)
            .arg("--version")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await;

        match result {
            Ok(output) if output.status.success() => {
                let version = String::from_utf8_lossy(&output.stdout);
                info!(
                    "Using Tesseract: {}",
                    version.lines().next().unwrap_or("unknown version")
                );
                true
            }
            Ok(output) => {
                warn!("{:?} --version exited with {}", self.executable, output.status);
                false
            }
            Err(e) => {
                warn!("Tesseract not found at {:?}: {}", self.executable, e);
                false
            }
        }
    }
}

#[async_trait]
impl LetterRecognizer for TesseractRecognizer {
    fn name(&self) -> &str {
        "tesseract"
    }

    async fn is_available(&self) -> bool {
        *self.available.get_or_init(|| self.probe()).await
    }

    async fn recognize(&self, cell: &GrayImage) -> Result<Vec<RawGuess>, RecognizerError> {
        let prepared = prepare_cell(cell, &self.preprocessing);

        let input = NamedTempFile::with_suffix(".png")?;
        prepared.save(input.path())?;

        let output = Command::new(&self.executable)
            .arg(input.path())
            .arg("stdout")
            .arg("-l")
            .arg(&self.language)
            .arg("--psm")
            .arg("10") // Single character
            .arg("-c")
            .arg(format!("tessedit_char_whitelist={WHITELIST}"))
            .arg("tsv")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    RecognizerError::Unavailable(format!("{:?} not found", self.executable))
                }
                _ => RecognizerError::Io(e),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RecognizerError::Failed(format!("Tesseract failed: {}", stderr.trim())));
        }

        let guesses = parse_tsv(&String::from_utf8_lossy(&output.stdout));
        debug!("Tesseract read {:?}", guesses);
        Ok(guesses)
    }
}

/// Word rows of Tesseract TSV output, confidence scaled to [0, 1]
pub fn parse_tsv(tsv: &str) -> Vec<RawGuess> {
    let mut guesses = Vec::new();

    // Header first: level page_num block_num par_num line_num word_num left top width height conf text
    for line in tsv.lines().skip(1) {
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 12 {
            continue;
        }

        let level: i32 = fields[0].parse().unwrap_or(-1);
        let conf: f32 = fields[10].trim().parse().unwrap_or(-1.0);
        let text = fields[11].trim();

        if level != WORD_LEVEL || text.is_empty() || conf < 0.0 {
            continue;
        }

        guesses.push(RawGuess::new(text, conf / 100.0));
    }

    guesses
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext";

    #[test]
    fn test_parse_single_character() {
        let tsv = format!(
            "{HEADER}\n\
             1\t1\t0\t0\t0\t0\t0\t0\t64\t64\t-1\t\n\
             4\t1\t1\t1\t1\t0\t20\t18\t22\t28\t-1\t\n\
             5\t1\t1\t1\t1\t1\t20\t18\t22\t28\t91.5\tQ\n"
        );
        assert_eq!(parse_tsv(&tsv), vec![RawGuess::new("Q", 0.915)]);
    }

    #[test]
    fn test_parse_skips_blank_and_malformed_rows() {
        let tsv = format!(
            "{HEADER}\n\
             5\t1\t1\t1\t1\t1\t0\t0\t10\t10\t95\t \n\
             garbage line\n\
             5\t1\t1\t1\t1\t2\t0\t0\t10\t10\tabc\tW\n\
             5\t1\t1\t1\t1\t3\t0\t0\t10\t10\t40\tVV\n"
        );
        assert_eq!(parse_tsv(&tsv), vec![RawGuess::new("VV", 0.4)]);
    }

    #[test]
    fn test_parse_empty_output() {
        assert!(parse_tsv("").is_empty());
        assert!(parse_tsv(HEADER).is_empty());
    }

    #[test]
    fn test_preprocessing_comes_from_settings() {
        let mut settings = ClassificationSettings::default();
        settings.preprocessing.min_dimension = 64;
        settings.preprocessing.auto_invert = false;

        let recognizer = TesseractRecognizer::from_settings(&settings);
        assert_eq!(recognizer.preprocessing, settings.preprocessing);
        assert_eq!(recognizer.language, "eng");
    }

    #[tokio::test]
    async fn test_missing_executable_is_unavailable() {
        let recognizer = TesseractRecognizer::new("/nonexistent/tesseract-binary", "eng");
        assert!(!recognizer.is_available().await);

        let cell = GrayImage::from_pixel(8, 8, image::Luma([255]));
        let err = recognizer.recognize(&cell).await.unwrap_err();
        assert!(matches!(err, RecognizerError::Unavailable(_)));
    }
}
