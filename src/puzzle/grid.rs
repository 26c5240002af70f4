//! Letter grid model
//!
//! Positions, reading directions and the immutable resolved grid that the
//! reconstructor produces (or that is parsed from a typed puzzle).

use serde::{Serialize, Serializer};
use std::fmt;

/// Character used to render an unresolved cell
pub const UNRESOLVED_CHAR: char = '?';

/// A cell coordinate (zero-based)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Position {
    pub row: usize,
    pub col: usize,
}

impl Position {
    pub fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }

    /// Move one step in `direction`, staying inside a `rows` x `cols` grid
    pub fn step(self, direction: Direction, rows: usize, cols: usize) -> Option<Position> {
        let (dr, dc) = direction.delta();
        let row = self.row.checked_add_signed(dr)?;
        let col = self.col.checked_add_signed(dc)?;
        (row < rows && col < cols).then_some(Position { row, col })
    }

    /// Position reached after `steps` moves in `direction`, without bounds checks
    pub(crate) fn offset(self, direction: Direction, steps: usize) -> Position {
        let (dr, dc) = direction.delta();
        Position {
            row: self.row.wrapping_add_signed(dr * steps as isize),
            col: self.col.wrapping_add_signed(dc * steps as isize),
        }
    }
}

impl Serialize for Position {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        [self.row, self.col].serialize(serializer)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.row, self.col)
    }
}

/// One of the 8 compass reading directions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Direction {
    N,
    NE,
    E,
    SE,
    S,
    SW,
    W,
    NW,
}

impl Direction {
    /// All directions in scan order
    pub const ALL: [Direction; 8] = [
        Direction::N,
        Direction::NE,
        Direction::E,
        Direction::SE,
        Direction::S,
        Direction::SW,
        Direction::W,
        Direction::NW,
    ];

    /// Unit vector as (delta row, delta col)
    pub fn delta(self) -> (isize, isize) {
        match self {
            Direction::N => (-1, 0),
            Direction::NE => (-1, 1),
            Direction::E => (0, 1),
            Direction::SE => (1, 1),
            Direction::S => (1, 0),
            Direction::SW => (1, -1),
            Direction::W => (0, -1),
            Direction::NW => (-1, -1),
        }
    }

    pub fn opposite(self) -> Direction {
        match self {
            Direction::N => Direction::S,
            Direction::NE => Direction::SW,
            Direction::E => Direction::W,
            Direction::SE => Direction::NW,
            Direction::S => Direction::N,
            Direction::SW => Direction::NE,
            Direction::W => Direction::E,
            Direction::NW => Direction::SE,
        }
    }

    pub fn is_diagonal(self) -> bool {
        matches!(self, Direction::NE | Direction::SE | Direction::SW | Direction::NW)
    }

    /// Reading against the usual left-to-right / top-to-bottom order
    pub fn is_reversed(self) -> bool {
        matches!(self, Direction::N | Direction::W | Direction::SW | Direction::NW)
    }

    pub fn name(self) -> &'static str {
        match self {
            Direction::N => "N",
            Direction::NE => "NE",
            Direction::E => "E",
            Direction::SE => "SE",
            Direction::S => "S",
            Direction::SW => "SW",
            Direction::W => "W",
            Direction::NW => "NW",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Resolved content of a grid cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tile {
    /// An uppercase letter A-Z
    Letter(char),
    /// OCR never cleared the confidence floor; acts as a wildcard during search
    Unresolved,
}

impl Tile {
    pub fn as_char(self) -> char {
        match self {
            Tile::Letter(c) => c,
            Tile::Unresolved => UNRESOLVED_CHAR,
        }
    }

    pub fn is_unresolved(self) -> bool {
        matches!(self, Tile::Unresolved)
    }
}

/// Grid construction errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GridError {
    #[error("grid must have at least one row and one column")]
    Empty,

    #[error("row {row} has {found} cells, expected {expected}")]
    Ragged { row: usize, expected: usize, found: usize },

    #[error("invalid character {ch:?} at row {row}, column {col}")]
    InvalidCharacter { row: usize, col: usize, ch: char },

    #[error("expected {expected} cells, got {found}")]
    CellCount { expected: usize, found: usize },
}

/// An immutable rows x cols letter grid with a per-cell confidence map
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    rows: usize,
    cols: usize,
    tiles: Vec<Tile>,
    confidence: Vec<f32>,
}

impl Grid {
    /// Build a grid from row-major cells
    pub fn from_cells(rows: usize, cols: usize, cells: Vec<(Tile, f32)>) -> Result<Self, GridError> {
        if rows == 0 || cols == 0 {
            return Err(GridError::Empty);
        }
        if cells.len() != rows * cols {
            return Err(GridError::CellCount {
                expected: rows * cols,
                found: cells.len(),
            });
        }

        let mut tiles = Vec::with_capacity(cells.len());
        let mut confidence = Vec::with_capacity(cells.len());
        for (i, (tile, conf)) in cells.into_iter().enumerate() {
            if let Tile::Letter(c) = tile {
                if !c.is_ascii_uppercase() {
                    return Err(GridError::InvalidCharacter {
                        row: i / cols,
                        col: i % cols,
                        ch: c,
                    });
                }
            }
            tiles.push(tile);
            confidence.push(sanitize_confidence(conf));
        }

        Ok(Self {
            rows,
            cols,
            tiles,
            confidence,
        })
    }

    /// Parse a typed grid: one row per line, letters (any case) or `?` for
    /// unresolved cells. Whitespace inside a line and blank lines are ignored.
    pub fn parse(text: &str) -> Result<Self, GridError> {
        let mut rows: Vec<Vec<(Tile, f32)>> = Vec::new();

        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            let row_idx = rows.len();
            let mut row = Vec::new();
            for ch in line.chars().filter(|c| !c.is_whitespace()) {
                let cell = match ch {
                    UNRESOLVED_CHAR => (Tile::Unresolved, 0.0),
                    c if c.is_ascii_alphabetic() => (Tile::Letter(c.to_ascii_uppercase()), 1.0),
                    c => {
                        return Err(GridError::InvalidCharacter {
                            row: row_idx,
                            col: row.len(),
                            ch: c,
                        })
                    }
                };
                row.push(cell);
            }
            rows.push(row);
        }

        let cols = rows.first().map(Vec::len).unwrap_or(0);
        for (i, row) in rows.iter().enumerate() {
            if row.len() != cols {
                return Err(GridError::Ragged {
                    row: i,
                    expected: cols,
                    found: row.len(),
                });
            }
        }

        let height = rows.len();
        Self::from_cells(height, cols, rows.into_iter().flatten().collect())
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Number of cells
    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn contains(&self, pos: Position) -> bool {
        pos.row < self.rows && pos.col < self.cols
    }

    /// Tile at `pos`; panics when out of bounds
    pub fn tile(&self, pos: Position) -> Tile {
        self.tiles[self.index(pos)]
    }

    /// Confidence at `pos`; panics when out of bounds
    pub fn confidence(&self, pos: Position) -> f32 {
        self.confidence[self.index(pos)]
    }

    pub fn get(&self, pos: Position) -> Option<(Tile, f32)> {
        self.contains(pos)
            .then(|| (self.tiles[self.index(pos)], self.confidence[self.index(pos)]))
    }

    /// Neighbouring position in `direction`, if inside the grid
    pub fn step(&self, pos: Position, direction: Direction) -> Option<Position> {
        pos.step(direction, self.rows, self.cols)
    }

    /// All positions in row-major order
    pub fn positions(&self) -> impl Iterator<Item = Position> + '_ {
        (0..self.rows).flat_map(move |row| (0..self.cols).map(move |col| Position::new(row, col)))
    }

    /// Rows rendered as strings, `?` for unresolved cells
    pub fn letters(&self) -> Vec<String> {
        self.tiles
            .chunks(self.cols)
            .map(|row| row.iter().map(|t| t.as_char()).collect())
            .collect()
    }

    /// Confidence values as a rows x cols matrix
    pub fn confidence_map(&self) -> Vec<Vec<f32>> {
        self.confidence.chunks(self.cols).map(<[f32]>::to_vec).collect()
    }

    pub fn unresolved_count(&self) -> usize {
        self.tiles.iter().filter(|t| t.is_unresolved()).count()
    }

    fn index(&self, pos: Position) -> usize {
        assert!(self.contains(pos), "position {} outside {}x{} grid", pos, self.rows, self.cols);
        pos.row * self.cols + pos.col
    }
}

impl fmt::Display for Grid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, row) in self.letters().iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            f.write_str(row)?;
        }
        Ok(())
    }
}

pub(crate) fn sanitize_confidence(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_grid() {
        let grid = Grid::parse("cats\nX X X X\n\nxxxx\nXXXX\n").unwrap();
        assert_eq!(grid.rows(), 4);
        assert_eq!(grid.cols(), 4);
        assert_eq!(grid.tile(Position::new(0, 0)), Tile::Letter('C'));
        assert_eq!(grid.letters()[0], "CATS");
        assert_eq!(grid.letters()[1], "XXXX");
        assert!((grid.confidence(Position::new(3, 3)) - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_parse_unresolved_marker() {
        let grid = Grid::parse("C?T").unwrap();
        assert_eq!(grid.tile(Position::new(0, 1)), Tile::Unresolved);
        assert_eq!(grid.confidence(Position::new(0, 1)), 0.0);
        assert_eq!(grid.unresolved_count(), 1);
        assert_eq!(grid.to_string(), "C?T");
    }

    #[test]
    fn test_parse_rejects_ragged_rows() {
        let err = Grid::parse("ABC\nAB").unwrap_err();
        assert_eq!(err, GridError::Ragged { row: 1, expected: 3, found: 2 });
    }

    #[test]
    fn test_parse_rejects_digits() {
        let err = Grid::parse("AB\nA1").unwrap_err();
        assert_eq!(err, GridError::InvalidCharacter { row: 1, col: 1, ch: '1' });
    }

    #[test]
    fn test_empty_grid_rejected() {
        assert_eq!(Grid::parse("  \n").unwrap_err(), GridError::Empty);
        assert_eq!(Grid::from_cells(0, 3, vec![]).unwrap_err(), GridError::Empty);
    }

    #[test]
    fn test_from_cells_clamps_confidence() {
        let grid = Grid::from_cells(
            1,
            2,
            vec![(Tile::Letter('A'), 1.7), (Tile::Letter('B'), f32::NAN)],
        )
        .unwrap();
        assert_eq!(grid.confidence(Position::new(0, 0)), 1.0);
        assert_eq!(grid.confidence(Position::new(0, 1)), 0.0);
    }

    #[test]
    fn test_step_stays_in_bounds() {
        let origin = Position::new(0, 0);
        assert_eq!(origin.step(Direction::N, 3, 3), None);
        assert_eq!(origin.step(Direction::W, 3, 3), None);
        assert_eq!(origin.step(Direction::SE, 3, 3), Some(Position::new(1, 1)));
        assert_eq!(Position::new(2, 2).step(Direction::E, 3, 3), None);
    }

    #[test]
    fn test_direction_properties() {
        for dir in Direction::ALL {
            let (dr, dc) = dir.delta();
            let (or, oc) = dir.opposite().delta();
            assert_eq!((dr + or, dc + oc), (0, 0));
            assert_ne!(dir.is_reversed(), dir.opposite().is_reversed());
        }
        assert_eq!(Direction::ALL.iter().filter(|d| d.is_diagonal()).count(), 4);
        assert_eq!(serde_json::to_string(&Direction::SW).unwrap(), "\"SW\"");
    }

    #[test]
    fn test_position_serializes_as_pair() {
        assert_eq!(serde_json::to_string(&Position::new(2, 5)).unwrap(), "[2,5]");
    }
}
