//! Letter classification
//!
//! `LetterRecognizer` is the seam to an OCR backend. `ClassifierAdapter` is
//! the only caller of a recognizer: it applies timeouts, normalizes raw
//! output into ranked A-Z candidates and decides when OCR failed as a whole.

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use image::GrayImage;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, warn};

use super::segment::CellImage;
use crate::config::ClassificationSettings;
use crate::error::SolveError;
use crate::puzzle::grid::sanitize_confidence;
use crate::puzzle::{Candidate, CandidateGrid};

/// One reading reported by a backend, confidence in backend scale
#[derive(Debug, Clone, PartialEq)]
pub struct RawGuess {
    pub text: String,
    pub confidence: f32,
}

impl RawGuess {
    pub fn new(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            text: text.into(),
            confidence,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RecognizerError {
    #[error("recognizer unavailable: {0}")]
    Unavailable(String),

    #[error("recognition failed: {0}")]
    Failed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}

/// An OCR backend able to read a single character
#[async_trait]
pub trait LetterRecognizer: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &str;

    /// Whether the backend can be used at all
    async fn is_available(&self) -> bool;

    /// Read one cell image. An empty result means nothing was recognized.
    async fn recognize(&self, cell: &GrayImage) -> Result<Vec<RawGuess>, RecognizerError>;
}

/// How a cell's candidate list was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellOutcome {
    Recognized,
    /// The backend returned nothing usable
    Empty,
    /// The backend returned an error
    Failed,
    TimedOut,
}

#[derive(Debug, Clone)]
pub struct ClassifiedCell {
    pub candidates: Vec<Candidate>,
    pub outcome: CellOutcome,
}

impl ClassifiedCell {
    /// The cell got the placeholder candidate
    pub fn is_fallback(&self) -> bool {
        self.outcome != CellOutcome::Recognized
    }
}

/// Candidate lists for a whole grid
#[derive(Debug, Clone)]
pub struct ClassifiedGrid {
    pub candidates: CandidateGrid,
    /// Cells that got the placeholder candidate
    pub fallback_cells: usize,
    /// Cells where the recognizer returned an error
    pub failed_cells: usize,
}

/// Turn raw backend output into ranked uppercase candidates.
///
/// Confidences are clamped to [0, 1], lowercase is folded, digit look-alikes
/// are mapped to letters and anything else is dropped. A letter reported
/// twice keeps its best confidence. Ties keep backend order.
pub fn normalize_guesses(guesses: &[RawGuess], max_candidates: usize) -> Vec<Candidate> {
    let mut candidates: Vec<Candidate> = Vec::new();

    for guess in guesses {
        let confidence = sanitize_confidence(guess.confidence);
        for letter in guess.text.chars().filter_map(map_char) {
            match candidates.iter_mut().find(|c| c.letter == letter) {
                Some(existing) => existing.confidence = existing.confidence.max(confidence),
                None => candidates.push(Candidate::new(letter, confidence)),
            }
        }
    }

    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    if max_candidates > 0 {
        candidates.truncate(max_candidates);
    }
    candidates
}

fn map_char(c: char) -> Option<char> {
    match c {
        'a'..='z' | 'A'..='Z' => Some(c.to_ascii_uppercase()),
        '0' => Some('O'),
        '1' | '|' => Some('I'),
        '2' => Some('Z'),
        '5' => Some('S'),
        '6' => Some('G'),
        '8' => Some('B'),
        _ => None,
    }
}

/// Wraps a recognizer with per-cell timeouts, normalization and the
/// grid-level failure rules
pub struct ClassifierAdapter {
    recognizer: Arc<dyn LetterRecognizer>,
    timeout: Duration,
    concurrency: usize,
    max_fallback_fraction: f32,
    max_candidates: usize,
    fallback_letter: char,
}

impl ClassifierAdapter {
    pub fn new(recognizer: Arc<dyn LetterRecognizer>, settings: &ClassificationSettings) -> Self {
        Self {
            recognizer,
            timeout: Duration::from_millis(settings.per_cell_timeout_ms),
            concurrency: settings.concurrency(),
            max_fallback_fraction: settings.max_fallback_fraction,
            max_candidates: settings.max_candidates,
            fallback_letter: settings.fallback_letter.to_ascii_uppercase(),
        }
    }

    pub fn recognizer_name(&self) -> &str {
        self.recognizer.name()
    }

    /// Classify one cell. Never fails: problems yield the placeholder.
    ///
    /// The recognizer runs as its own task, aborted on timeout or when the
    /// returned future is dropped.
    pub async fn classify_cell(&self, image: &GrayImage) -> ClassifiedCell {
        let recognizer = Arc::clone(&self.recognizer);
        let image = image.clone();
        let task = AbortOnDropHandle::new(tokio::spawn(async move { recognizer.recognize(&image).await }));

        let outcome = match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(Ok(guesses))) => {
                let candidates = normalize_guesses(&guesses, self.max_candidates);
                if !candidates.is_empty() {
                    return ClassifiedCell {
                        candidates,
                        outcome: CellOutcome::Recognized,
                    };
                }
                CellOutcome::Empty
            }
            Ok(Ok(Err(e))) => {
                debug!("{} recognizer error: {}", self.recognizer.name(), e);
                CellOutcome::Failed
            }
            Ok(Err(e)) => {
                warn!("{} recognizer task failed: {}", self.recognizer.name(), e);
                CellOutcome::Failed
            }
            Err(_) => {
                debug!("{} recognizer timed out after {:?}", self.recognizer.name(), self.timeout);
                CellOutcome::TimedOut
            }
        };

        ClassifiedCell {
            candidates: vec![Candidate::new(self.fallback_letter, 0.0)],
            outcome,
        }
    }

    /// Classify every cell of a rows x cols grid, keeping row-major order
    pub async fn classify_grid(
        &self,
        rows: usize,
        cols: usize,
        cells: Vec<CellImage>,
        cancel: &CancellationToken,
    ) -> Result<ClassifiedGrid, SolveError> {
        if !self.recognizer.is_available().await {
            return Err(SolveError::OcrUnavailable(format!(
                "the {} recognizer is not available",
                self.recognizer.name()
            )));
        }

        let start = Instant::now();
        let total = cells.len();
        let work = stream::iter(cells.iter())
            .map(|cell| self.classify_cell(&cell.image))
            .buffered(self.concurrency)
            .collect::<Vec<_>>();

        let classified = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SolveError::Cancelled),
            classified = work => classified,
        };

        let fallback_cells = classified.iter().filter(|c| c.is_fallback()).count();
        let failed_cells = classified
            .iter()
            .filter(|c| c.outcome == CellOutcome::Failed)
            .count();

        debug!(
            "Classified {} cells with {} in {:?} ({} fallback, {} errors)",
            total,
            self.recognizer.name(),
            start.elapsed(),
            fallback_cells,
            failed_cells
        );

        if total > 0 && failed_cells == total {
            return Err(SolveError::OcrUnavailable(format!(
                "the {} recognizer failed on every cell",
                self.recognizer.name()
            )));
        }
        if total > 0 && fallback_cells as f32 / total as f32 > self.max_fallback_fraction {
            return Err(SolveError::ClassificationTimeoutExceeded {
                fallback_cells,
                total_cells: total,
            });
        }
        if fallback_cells > 0 {
            warn!("{} of {} cells fell back to the placeholder letter", fallback_cells, total);
        }

        let lists = classified.into_iter().map(|c| c.candidates).collect();
        Ok(ClassifiedGrid {
            candidates: CandidateGrid::new(rows, cols, lists)?,
            fallback_cells,
            failed_cells,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::puzzle::Position;
    use image::Luma;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// What the scripted recognizer does for a cell, keyed by the cell's shade
    #[derive(Clone)]
    enum Script {
        Read(&'static str, f32),
        Nothing,
        Error,
        Hang,
        Slow(&'static str, u64),
    }

    struct ScriptedRecognizer {
        scripts: Vec<Script>,
        available: bool,
    }

    #[async_trait]
    impl LetterRecognizer for ScriptedRecognizer {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn is_available(&self) -> bool {
            self.available
        }

        async fn recognize(&self, cell: &GrayImage) -> Result<Vec<RawGuess>, RecognizerError> {
            let shade = cell.get_pixel(0, 0).0[0] as usize;
            match &self.scripts[shade] {
                Script::Read(text, conf) => Ok(vec![RawGuess::new(*text, *conf)]),
                Script::Nothing => Ok(Vec::new()),
                Script::Error => Err(RecognizerError::Failed("scripted failure".into())),
                Script::Hang => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(Vec::new())
                }
                Script::Slow(text, ms) => {
                    tokio::time::sleep(Duration::from_millis(*ms)).await;
                    Ok(vec![RawGuess::new(*text, 0.9)])
                }
            }
        }
    }

    fn adapter(scripts: Vec<Script>) -> ClassifierAdapter {
        let settings = ClassificationSettings {
            per_cell_timeout_ms: 100,
            max_concurrency: 4,
            ..Default::default()
        };
        let recognizer = ScriptedRecognizer {
            scripts,
            available: true,
        };
        ClassifierAdapter::new(Arc::new(recognizer), &settings)
    }

    /// One cell per script, each cell filled with its script index
    fn cells(rows: usize, cols: usize) -> Vec<CellImage> {
        (0..rows * cols)
            .map(|i| CellImage {
                position: Position::new(i / cols, i % cols),
                image: GrayImage::from_pixel(4, 4, Luma([i as u8])),
            })
            .collect()
    }

    fn letters(grid: &ClassifiedGrid) -> String {
        (0..grid.candidates.rows())
            .flat_map(|r| (0..grid.candidates.cols()).map(move |c| Position::new(r, c)))
            .map(|p| grid.candidates.candidates(p)[0].letter)
            .collect()
    }

    #[test]
    fn test_normalize_guesses() {
        let guesses = vec![
            RawGuess::new("o", 0.4),
            RawGuess::new("0", 0.7),
            RawGuess::new("5", 1.5),
            RawGuess::new("#", 0.9),
            RawGuess::new("|", f32::NAN),
        ];
        let candidates = normalize_guesses(&guesses, 0);
        let pairs: Vec<(char, f32)> = candidates.iter().map(|c| (c.letter, c.confidence)).collect();
        assert_eq!(pairs, vec![('S', 1.0), ('O', 0.7), ('I', 0.0)]);
    }

    #[test]
    fn test_normalize_keeps_backend_order_on_ties() {
        let guesses = vec![RawGuess::new("Q", 0.5), RawGuess::new("O", 0.5), RawGuess::new("D", 0.2)];
        let candidates = normalize_guesses(&guesses, 2);
        let order: Vec<char> = candidates.iter().map(|c| c.letter).collect();
        assert_eq!(order, vec!['Q', 'O']);
    }

    #[tokio::test]
    async fn test_classify_cell_fallbacks() {
        let adapter = adapter(vec![Script::Nothing, Script::Error, Script::Hang, Script::Read("k", 0.8)]);
        let grid = cells(1, 4);

        let empty = adapter.classify_cell(&grid[0].image).await;
        assert_eq!(empty.outcome, CellOutcome::Empty);
        assert_eq!(empty.candidates, vec![Candidate::new('X', 0.0)]);

        let failed = adapter.classify_cell(&grid[1].image).await;
        assert_eq!(failed.outcome, CellOutcome::Failed);

        let timed_out = adapter.classify_cell(&grid[2].image).await;
        assert_eq!(timed_out.outcome, CellOutcome::TimedOut);
        assert!(timed_out.is_fallback());

        let read = adapter.classify_cell(&grid[3].image).await;
        assert_eq!(read.outcome, CellOutcome::Recognized);
        assert_eq!(read.candidates, vec![Candidate::new('K', 0.8)]);
    }

    #[tokio::test]
    async fn test_grid_keeps_row_major_order() {
        // Earlier cells finish last
        let adapter = adapter(vec![
            Script::Slow("C", 40),
            Script::Slow("A", 30),
            Script::Slow("T", 20),
            Script::Slow("S", 10),
        ]);
        let grid = adapter
            .classify_grid(2, 2, cells(2, 2), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(letters(&grid), "CATS");
        assert_eq!(grid.fallback_cells, 0);
    }

    #[tokio::test]
    async fn test_small_fallback_share_is_tolerated() {
        let mut scripts = vec![Script::Read("A", 0.9); 4];
        scripts.push(Script::Hang);
        let grid = adapter(scripts)
            .classify_grid(1, 5, cells(1, 5), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(grid.fallback_cells, 1);
        assert_eq!(letters(&grid), "AAAAX");
    }

    #[tokio::test]
    async fn test_too_many_fallbacks() {
        let scripts = vec![Script::Read("A", 0.9), Script::Read("B", 0.9), Script::Read("C", 0.9), Script::Hang];
        let err = adapter(scripts)
            .classify_grid(2, 2, cells(2, 2), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SolveError::ClassificationTimeoutExceeded {
                fallback_cells: 1,
                total_cells: 4
            }
        ));
    }

    #[tokio::test]
    async fn test_every_cell_failing_is_unavailable() {
        let err = adapter(vec![Script::Error; 4])
            .classify_grid(2, 2, cells(2, 2), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "ocr_unavailable");
    }

    #[tokio::test]
    async fn test_unavailable_recognizer() {
        let recognizer = ScriptedRecognizer {
            scripts: vec![Script::Read("A", 1.0)],
            available: false,
        };
        let adapter = ClassifierAdapter::new(Arc::new(recognizer), &ClassificationSettings::default());
        let err = adapter
            .classify_grid(1, 1, cells(1, 1), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SolveError::OcrUnavailable(_)));
    }

    #[tokio::test]
    async fn test_cancellation() {
        let adapter = adapter(vec![Script::Hang; 4]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = adapter.classify_grid(2, 2, cells(2, 2), &cancel).await.unwrap_err();
        assert!(matches!(err, SolveError::Cancelled));
    }

    /// Reads every cell as `A` after holding its thread, without yielding
    struct BlockingRecognizer {
        hold: Duration,
        calls: AtomicUsize,
    }

    impl BlockingRecognizer {
        fn new(hold_ms: u64) -> Arc<Self> {
            Arc::new(Self {
                hold: Duration::from_millis(hold_ms),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl LetterRecognizer for BlockingRecognizer {
        fn name(&self) -> &str {
            "blocking"
        }

        async fn is_available(&self) -> bool {
            true
        }

        async fn recognize(&self, _cell: &GrayImage) -> Result<Vec<RawGuess>, RecognizerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.hold);
            Ok(vec![RawGuess::new("A", 0.9)])
        }
    }

    fn blocking_adapter(recognizer: Arc<BlockingRecognizer>, timeout_ms: u64, concurrency: usize) -> ClassifierAdapter {
        let settings = ClassificationSettings {
            per_cell_timeout_ms: timeout_ms,
            max_concurrency: concurrency,
            ..Default::default()
        };
        ClassifierAdapter::new(recognizer, &settings)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_timeout_applies_to_blocking_recognizer() {
        let adapter = blocking_adapter(BlockingRecognizer::new(300), 20, 1);
        let start = Instant::now();
        let cell = adapter.classify_cell(&GrayImage::from_pixel(4, 4, Luma([0]))).await;
        assert_eq!(cell.outcome, CellOutcome::TimedOut);
        assert!(start.elapsed() < Duration::from_millis(250), "took {:?}", start.elapsed());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_blocking_cells_run_in_parallel() {
        let adapter = blocking_adapter(BlockingRecognizer::new(150), 5_000, 4);
        let start = Instant::now();
        let grid = adapter
            .classify_grid(2, 2, cells(2, 2), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(letters(&grid), "AAAA");
        // Serial classification would take 600ms
        assert!(start.elapsed() < Duration::from_millis(450), "took {:?}", start.elapsed());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_cancellation_stops_blocking_recognizer() {
        let recognizer = BlockingRecognizer::new(200);
        let adapter = blocking_adapter(Arc::clone(&recognizer), 5_000, 2);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let start = Instant::now();
        let err = adapter.classify_grid(2, 4, cells(2, 4), &cancel).await.unwrap_err();
        assert!(matches!(err, SolveError::Cancelled));
        assert!(start.elapsed() < Duration::from_millis(190), "took {:?}", start.elapsed());

        // Cells that had not started are never handed to the recognizer
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(recognizer.calls.load(Ordering::SeqCst) < 8);
    }

    #[tokio::test]
    async fn test_cancellation_while_running() {
        let adapter = adapter(vec![Script::Slow("A", 5_000); 4]);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let err = adapter.classify_grid(2, 2, cells(2, 2), &cancel).await.unwrap_err();
        assert!(matches!(err, SolveError::Cancelled));
    }
}
