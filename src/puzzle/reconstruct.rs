//! Grid reconstruction
//!
//! Turns per-cell OCR candidate lists into a single letter grid. Cells the OCR
//! was unsure about are re-ranked using how well each candidate fits the
//! confident letters around it.

use serde::Serialize;
use tracing::debug;

use super::grid::{sanitize_confidence, Direction, Grid, GridError, Position, Tile};
use super::language::LetterModel;
use crate::config::ReconstructionSettings;

/// Scores closer than this count as a tie
const TIE_EPSILON: f32 = 1e-6;

/// A letter proposed by OCR for one cell
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Candidate {
    /// Uppercase letter A-Z
    pub letter: char,
    /// Confidence (0.0 - 1.0)
    pub confidence: f32,
}

impl Candidate {
    pub fn new(letter: char, confidence: f32) -> Self {
        Self {
            letter,
            confidence: sanitize_confidence(confidence),
        }
    }
}

/// Ranked candidate lists for every cell of a grid, row-major
#[derive(Debug, Clone)]
pub struct CandidateGrid {
    rows: usize,
    cols: usize,
    cells: Vec<Vec<Candidate>>,
}

impl CandidateGrid {
    /// Create a candidate grid; each cell list is sorted by descending
    /// confidence, keeping the original order for equal confidences
    pub fn new(rows: usize, cols: usize, mut cells: Vec<Vec<Candidate>>) -> Result<Self, GridError> {
        if rows == 0 || cols == 0 {
            return Err(GridError::Empty);
        }
        if cells.len() != rows * cols {
            return Err(GridError::CellCount {
                expected: rows * cols,
                found: cells.len(),
            });
        }
        for (i, cell) in cells.iter_mut().enumerate() {
            if let Some(bad) = cell.iter().find(|c| !c.letter.is_ascii_uppercase()) {
                return Err(GridError::InvalidCharacter {
                    row: i / cols,
                    col: i % cols,
                    ch: bad.letter,
                });
            }
            cell.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        }
        Ok(Self { rows, cols, cells })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn candidates(&self, pos: Position) -> &[Candidate] {
        &self.cells[pos.row * self.cols + pos.col]
    }

    fn top(&self, pos: Position) -> Option<&Candidate> {
        self.candidates(pos).first()
    }
}

/// Reconstructed grid plus bookkeeping for the report
#[derive(Debug, Clone)]
pub struct Reconstruction {
    pub grid: Grid,
    /// Cells where context replaced the OCR top candidate
    pub corrected_cells: usize,
    /// Cells left unresolved
    pub unresolved_cells: usize,
}

/// Resolve every cell of `candidates` into a grid
pub fn reconstruct(
    candidates: &CandidateGrid,
    model: &LetterModel,
    settings: &ReconstructionSettings,
) -> Result<Reconstruction, GridError> {
    let rows = candidates.rows();
    let cols = candidates.cols();
    let low = settings.low_confidence_threshold;
    let floor = settings.min_confidence_floor;

    // Only confident cells provide context, so the result does not depend on
    // the order cells are visited in.
    let anchors: Vec<Option<char>> = (0..rows * cols)
        .map(|i| {
            let pos = Position::new(i / cols, i % cols);
            candidates
                .top(pos)
                .filter(|top| top.confidence >= low)
                .map(|top| top.letter)
        })
        .collect();
    let anchor = |pos: Position| anchors[pos.row * cols + pos.col];

    let mut cells = Vec::with_capacity(rows * cols);
    let mut corrected_cells = 0;
    let mut unresolved_cells = 0;

    for i in 0..rows * cols {
        let pos = Position::new(i / cols, i % cols);
        let list = candidates.candidates(pos);

        let Some(top) = list.first().filter(|top| top.confidence >= floor) else {
            let best = list.first().map(|c| c.confidence).unwrap_or(0.0);
            cells.push((Tile::Unresolved, best));
            unresolved_cells += 1;
            continue;
        };

        if top.confidence >= low {
            cells.push((Tile::Letter(top.letter), top.confidence));
            continue;
        }

        let score = |c: &Candidate| {
            c.confidence + settings.context_weight * context_score(pos, c.letter, rows, cols, &anchor, model)
        };

        let mut chosen = top;
        let mut chosen_score = score(top);
        for cand in list.iter().skip(1).filter(|c| c.confidence >= floor) {
            let s = score(cand);
            if s > chosen_score + TIE_EPSILON {
                chosen = cand;
                chosen_score = s;
            }
        }

        if chosen.letter != top.letter {
            debug!(
                "Cell {} resolved to '{}' ({:.2}) over OCR top '{}' ({:.2})",
                pos, chosen.letter, chosen.confidence, top.letter, top.confidence
            );
            corrected_cells += 1;
        }
        cells.push((Tile::Letter(chosen.letter), chosen.confidence));
    }

    let grid = Grid::from_cells(rows, cols, cells)?;

    Ok(Reconstruction {
        grid,
        corrected_cells,
        unresolved_cells,
    })
}

/// Mean plausibility of the bigrams and trigrams `letter` forms with confident
/// neighbours, read in every direction
fn context_score(
    pos: Position,
    letter: char,
    rows: usize,
    cols: usize,
    anchor: &impl Fn(Position) -> Option<char>,
    model: &LetterModel,
) -> f32 {
    let mut total = 0.0;
    let mut count = 0usize;

    for dir in Direction::ALL {
        let ahead = pos.step(dir, rows, cols);
        let next = ahead.and_then(anchor);

        if let Some(a) = next {
            total += model.bigram_score(letter, a);
            count += 1;

            let beyond = ahead
                .and_then(|p| p.step(dir, rows, cols))
                .and_then(anchor);
            if let Some(b) = beyond {
                total += model.trigram_score(letter, a, b);
                count += 1;
            }

            let behind = pos.step(dir.opposite(), rows, cols).and_then(anchor);
            if let Some(m) = behind {
                total += model.trigram_score(m, letter, a);
                count += 1;
            }
        }
    }

    if count == 0 {
        0.0
    } else {
        total / count as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn certain(text: &str) -> Vec<Vec<Candidate>> {
        text.chars()
            .filter(|c| !c.is_whitespace())
            .map(|c| vec![Candidate::new(c, 0.99)])
            .collect()
    }

    fn boat_candidates() -> CandidateGrid {
        let mut cells = certain("BOAT XXXX XXXX XXXX");
        cells[1] = vec![
            Candidate::new('D', 0.45),
            Candidate::new('O', 0.40),
            Candidate::new('Q', 0.10),
        ];
        CandidateGrid::new(4, 4, cells).unwrap()
    }

    #[test]
    fn test_high_confidence_input_is_unchanged() {
        let candidates = CandidateGrid::new(2, 3, certain("CATDOG")).unwrap();
        let model = LetterModel::english();
        let settings = ReconstructionSettings::default();

        let first = reconstruct(&candidates, &model, &settings).unwrap();
        assert_eq!(first.grid.letters(), vec!["CAT", "DOG"]);
        assert_eq!(first.corrected_cells, 0);

        // Feeding the resolved grid back in gives the same grid
        let again: Vec<Vec<Candidate>> = first
            .grid
            .positions()
            .map(|p| vec![Candidate::new(first.grid.tile(p).as_char(), first.grid.confidence(p))])
            .collect();
        let second = reconstruct(&CandidateGrid::new(2, 3, again).unwrap(), &model, &settings).unwrap();
        assert_eq!(first.grid, second.grid);
    }

    #[test]
    fn test_context_restores_ambiguous_letter() {
        let model = LetterModel::from_words(["BOAT", "COAT", "GOAT", "ROAD"]);
        let result = reconstruct(&boat_candidates(), &model, &ReconstructionSettings::default()).unwrap();

        assert_eq!(result.grid.letters()[0], "BOAT");
        assert_eq!(result.corrected_cells, 1);
        assert!((result.grid.confidence(Position::new(0, 1)) - 0.40).abs() < 1e-6);
    }

    #[test]
    fn test_without_context_top_candidate_wins() {
        let model = LetterModel::from_words(["BOAT", "COAT", "GOAT", "ROAD"]);
        let mut settings = ReconstructionSettings::default();
        settings.context_weight = 0.0;

        let result = reconstruct(&boat_candidates(), &model, &settings).unwrap();
        assert_eq!(result.grid.letters()[0], "BDAT");
        assert_eq!(result.corrected_cells, 0);
    }

    #[test]
    fn test_tie_keeps_ocr_order() {
        let mut cells = certain("AAA");
        cells[1] = vec![Candidate::new('M', 0.3), Candidate::new('N', 0.3)];
        let candidates = CandidateGrid::new(1, 3, cells).unwrap();
        // Empty model: no context bonus for either letter
        let model = LetterModel::from_words(Vec::<String>::new());

        let result = reconstruct(&candidates, &model, &ReconstructionSettings::default()).unwrap();
        assert_eq!(result.grid.letters()[0], "AMA");
    }

    #[test]
    fn test_below_floor_becomes_unresolved() {
        let mut cells = certain("CAT");
        cells[1] = vec![Candidate::new('A', 0.1), Candidate::new('R', 0.05)];
        let candidates = CandidateGrid::new(1, 3, cells).unwrap();

        let result = reconstruct(&candidates, &LetterModel::english(), &ReconstructionSettings::default()).unwrap();
        assert_eq!(result.grid.tile(Position::new(0, 1)), Tile::Unresolved);
        assert_eq!(result.unresolved_cells, 1);
        assert!((result.grid.confidence(Position::new(0, 1)) - 0.1).abs() < 1e-6);
        assert_eq!(result.grid.letters()[0], "C?T");
    }

    #[test]
    fn test_empty_candidate_list_is_unresolved() {
        let mut cells = certain("AB");
        cells[0].clear();
        let candidates = CandidateGrid::new(1, 2, cells).unwrap();

        let result = reconstruct(&candidates, &LetterModel::english(), &ReconstructionSettings::default()).unwrap();
        assert_eq!(result.grid.tile(Position::new(0, 0)), Tile::Unresolved);
    }

    #[test]
    fn test_candidates_below_floor_are_never_chosen() {
        let mut cells = certain("BOAT");
        cells[1] = vec![Candidate::new('D', 0.3), Candidate::new('O', 0.1)];
        let candidates = CandidateGrid::new(1, 4, cells).unwrap();
        let model = LetterModel::from_words(["BOAT"]);

        let result = reconstruct(&candidates, &model, &ReconstructionSettings::default()).unwrap();
        assert_eq!(result.grid.letters()[0], "BDAT");
    }

    #[test]
    fn test_candidate_grid_sorts_and_validates() {
        let grid = CandidateGrid::new(
            1,
            1,
            vec![vec![Candidate::new('A', 0.2), Candidate::new('B', 0.9)]],
        )
        .unwrap();
        assert_eq!(grid.candidates(Position::new(0, 0))[0].letter, 'B');

        assert!(CandidateGrid::new(1, 2, vec![vec![]]).is_err());
        assert!(CandidateGrid::new(1, 1, vec![vec![Candidate::new('a', 0.5)]]).is_err());
    }
}
