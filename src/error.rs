//! Solve errors
//!
//! The error surface handed to callers. Messages are meant to be shown to an
//! end user as-is.

use crate::puzzle::{GridError, InvalidWordReason, WordIndexError};
use crate::vision::SegmentationError;

/// Errors that abort a solve request
#[derive(Debug, thiserror::Error)]
pub enum SolveError {
    #[error("could not split the puzzle into cells: {0}")]
    Segmentation(#[from] SegmentationError),

    #[error("invalid word {word:?}: {reason}")]
    InvalidWord { word: String, reason: InvalidWordReason },

    #[error("no words to search for")]
    EmptyWordList,

    #[error("letter recognition failed for {fallback_cells} of {total_cells} cells")]
    ClassificationTimeoutExceeded { fallback_cells: usize, total_cells: usize },

    #[error("letter recognition is unavailable: {0}")]
    OcrUnavailable(String),

    #[error("could not read the image: {0}")]
    ImageDecode(String),

    #[error("invalid grid: {0}")]
    InvalidGrid(#[from] GridError),

    #[error("invalid options: {0}")]
    InvalidOptions(String),

    #[error("the solve was cancelled")]
    Cancelled,
}

impl SolveError {
    /// Stable machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            Self::Segmentation(_) => "segmentation_error",
            Self::InvalidWord { .. } => "invalid_word",
            Self::EmptyWordList => "empty_word_list",
            Self::ClassificationTimeoutExceeded { .. } => "classification_timeout_exceeded",
            Self::OcrUnavailable(_) => "ocr_unavailable",
            Self::ImageDecode(_) => "image_decode_error",
            Self::InvalidGrid(_) => "invalid_grid",
            Self::InvalidOptions(_) => "invalid_options",
            Self::Cancelled => "cancelled",
        }
    }

    /// Input problems the caller can fix, as opposed to OCR failures
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::Segmentation(_)
                | Self::InvalidWord { .. }
                | Self::EmptyWordList
                | Self::ImageDecode(_)
                | Self::InvalidGrid(_)
                | Self::InvalidOptions(_)
        )
    }
}

impl From<WordIndexError> for SolveError {
    fn from(err: WordIndexError) -> Self {
        match err {
            WordIndexError::Empty => Self::EmptyWordList,
            WordIndexError::InvalidWord { word, reason } => Self::InvalidWord { word, reason },
        }
    }
}
