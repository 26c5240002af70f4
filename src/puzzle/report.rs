//! Result aggregation
//!
//! Collapses duplicate matches, applies the occurrence policy and builds the
//! report handed back to the caller.

use serde::{Serialize, Serializer};
use std::collections::HashMap;

use super::grid::{Grid, Position};
use super::index::WordIndex;
use super::search::{round4, Match};

/// Counters describing how the grid was obtained
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SolveStats {
    /// Total grid cells
    pub cells: usize,
    /// Cells that got the OCR placeholder (error, timeout or nothing recognized)
    pub fallback_cells: usize,
    /// Cells left unresolved
    pub unresolved_cells: usize,
    /// Cells where neighbour context overruled the OCR top candidate
    pub corrected_cells: usize,
}

/// The resolved grid as shown to the caller
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GridView {
    pub rows: usize,
    pub cols: usize,
    /// One string per row, `?` for unresolved cells
    pub letters: Vec<String>,
    /// Per-cell confidence, rows x cols
    #[serde(serialize_with = "serialize_matrix")]
    pub confidence: Vec<Vec<f32>>,
}

impl From<&Grid> for GridView {
    fn from(grid: &Grid) -> Self {
        Self {
            rows: grid.rows(),
            cols: grid.cols(),
            letters: grid.letters(),
            confidence: grid.confidence_map(),
        }
    }
}

/// Outcome of one solve request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SolveReport {
    found: Vec<Match>,
    not_found: Vec<String>,
    grid: GridView,
    stats: SolveStats,
}

impl SolveReport {
    /// Located words, ordered by word list order then scan order
    pub fn found(&self) -> &[Match] {
        &self.found
    }

    /// Words with no match, in word list order
    pub fn not_found(&self) -> &[String] {
        &self.not_found
    }

    pub fn grid(&self) -> &GridView {
        &self.grid
    }

    pub fn stats(&self) -> SolveStats {
        self.stats
    }

    /// Matches for one word (case-insensitive)
    pub fn matches_for<'a>(&'a self, word: &'a str) -> impl Iterator<Item = &'a Match> + 'a {
        self.found
            .iter()
            .filter(move |m| m.word().eq_ignore_ascii_case(word.trim()))
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Build the final report from raw search output (in scan order)
pub fn aggregate(
    matches: Vec<Match>,
    index: &WordIndex,
    grid: &Grid,
    return_all_occurrences: bool,
    stats: SolveStats,
) -> SolveReport {
    let mut found = dedup_same_cells(matches);

    if !return_all_occurrences {
        let mut seen = vec![false; index.len()];
        found.retain(|m| !std::mem::replace(&mut seen[m.word_id()], true));
    }

    found.sort_by_key(Match::word_id);

    let mut has_match = vec![false; index.len()];
    for m in &found {
        has_match[m.word_id()] = true;
    }
    let not_found = index
        .words()
        .iter()
        .zip(&has_match)
        .filter(|&(_, &hit)| !hit)
        .map(|(word, _)| word.clone())
        .collect();

    SolveReport {
        found,
        not_found,
        grid: GridView::from(grid),
        stats,
    }
}

/// A word read forwards and backwards over the same cells (a palindrome) is
/// one occurrence; keep the more confident reading, the earlier one on ties.
fn dedup_same_cells(matches: Vec<Match>) -> Vec<Match> {
    let mut kept: Vec<Match> = Vec::with_capacity(matches.len());
    let mut slots: HashMap<(usize, Position, Position), usize> = HashMap::new();

    for m in matches {
        let (a, b) = (m.start(), m.end());
        let key = (m.word_id(), a.min(b), a.max(b));
        match slots.get(&key) {
            Some(&slot) => {
                if m.confidence() > kept[slot].confidence() {
                    kept[slot] = m;
                }
            }
            None => {
                slots.insert(key, kept.len());
                kept.push(m);
            }
        }
    }

    kept
}

fn serialize_matrix<S: Serializer>(matrix: &[Vec<f32>], serializer: S) -> Result<S::Ok, S::Error> {
    let rounded: Vec<Vec<f64>> = matrix
        .iter()
        .map(|row| row.iter().map(|&v| round4(v)).collect())
        .collect();
    rounded.serialize(serializer)
}
