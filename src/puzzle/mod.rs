//! Puzzle Layer
//!
//! Everything that happens after OCR: turning candidate lists into a grid,
//! indexing the target words, searching and reporting.

pub mod grid;
pub mod index;
pub mod language;
pub mod reconstruct;
pub mod report;
pub mod search;

pub use grid::{Direction, Grid, GridError, Position, Tile};
pub use index::{InvalidWordReason, WordIndex, WordIndexError};
pub use language::LetterModel;
pub use reconstruct::{reconstruct, Candidate, CandidateGrid, Reconstruction};
pub use report::{GridView, SolveReport, SolveStats};
pub use search::{enabled_directions, search, Match};

use std::time::Instant;
use tracing::debug;

use crate::config::SearchSettings;

/// Search `grid` for every word in `index` and aggregate the result
pub fn solve_grid(grid: &Grid, index: &WordIndex, settings: &SearchSettings, stats: SolveStats) -> SolveReport {
    let start = Instant::now();
    let matches = search(grid, index, settings);
    let raw = matches.len();
    let report = report::aggregate(matches, index, grid, settings.return_all_occurrences, stats);

    debug!(
        "Search complete in {:?}: {} raw matches, {} reported, {} words not found",
        start.elapsed(),
        raw,
        report.found().len(),
        report.not_found().len()
    );

    report
}
