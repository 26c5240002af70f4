//! Word search engine
//!
//! Walks the grid from every cell in every enabled direction, following the
//! word trie one tile at a time and giving up as soon as the prefix is dead.

use serde::{Serialize, Serializer};

use super::grid::{Direction, Grid, Position, Tile};
use super::index::{NodeId, WordIndex};
use crate::config::{ConfidenceMode, SearchSettings};

/// A located occurrence of a target word
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Match {
    #[serde(skip)]
    word_id: usize,
    word: String,
    start: Position,
    end: Position,
    direction: Direction,
    #[serde(serialize_with = "serialize_rounded")]
    confidence: f32,
    unresolved_cells: usize,
}

impl Match {
    pub fn word(&self) -> &str {
        &self.word
    }

    /// Position of the word in the index (input order)
    pub fn word_id(&self) -> usize {
        self.word_id
    }

    pub fn start(&self) -> Position {
        self.start
    }

    pub fn end(&self) -> Position {
        self.end
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    /// Wildcard cells the match passed through
    pub fn unresolved_cells(&self) -> usize {
        self.unresolved_cells
    }

    pub fn len(&self) -> usize {
        self.word.len()
    }

    pub fn is_empty(&self) -> bool {
        self.word.is_empty()
    }

    /// Cells covered by the match, from start to end
    pub fn path(&self) -> impl Iterator<Item = Position> + '_ {
        (0..self.len()).map(move |i| self.start.offset(self.direction, i))
    }
}

/// Directions enabled by the search settings, in scan order
pub fn enabled_directions(settings: &SearchSettings) -> Vec<Direction> {
    Direction::ALL
        .into_iter()
        .filter(|d| settings.allow_diagonal || !d.is_diagonal())
        .filter(|d| settings.allow_reversed || !d.is_reversed())
        .collect()
}

/// Find every occurrence of every indexed word. Matches come out ordered by
/// start cell (row-major), then direction, then word length.
pub fn search(grid: &Grid, index: &WordIndex, settings: &SearchSettings) -> Vec<Match> {
    let directions = enabled_directions(settings);
    let mut matches = Vec::new();

    for start in grid.positions() {
        // A wildcard cannot start a match
        if grid.tile(start).is_unresolved() {
            continue;
        }
        for &direction in &directions {
            let mut ray = Ray {
                grid,
                index,
                settings,
                start,
                direction,
                found: Vec::new(),
            };
            ray.extend(index.root(), start, PathScore::new());
            ray.found.sort_by_key(Match::len);
            matches.append(&mut ray.found);
        }
    }

    matches
}

/// Running confidence along a path
#[derive(Debug, Clone, Copy)]
struct PathScore {
    min: f32,
    product: f32,
    unresolved: usize,
}

impl PathScore {
    fn new() -> Self {
        Self {
            min: 1.0,
            product: 1.0,
            unresolved: 0,
        }
    }

    fn push(self, tile: Tile, confidence: f32) -> Self {
        match tile {
            Tile::Unresolved => Self {
                unresolved: self.unresolved + 1,
                ..self
            },
            Tile::Letter(_) => Self {
                min: self.min.min(confidence),
                product: self.product * confidence,
                unresolved: self.unresolved,
            },
        }
    }

    fn finish(self, settings: &SearchSettings) -> f32 {
        let base = match settings.confidence_mode {
            ConfidenceMode::Minimum => self.min,
            ConfidenceMode::Product => self.product,
        };
        base * settings.unresolved_penalty.powi(self.unresolved as i32)
    }
}

/// One (start, direction) walk
struct Ray<'a> {
    grid: &'a Grid,
    index: &'a WordIndex,
    settings: &'a SearchSettings,
    start: Position,
    direction: Direction,
    found: Vec<Match>,
}

impl Ray<'_> {
    fn extend(&mut self, node: NodeId, pos: Position, score: PathScore) {
        let tile = self.grid.tile(pos);
        let score = score.push(tile, self.grid.confidence(pos));

        let next_nodes: Vec<NodeId> = match tile {
            Tile::Letter(c) => self.index.child(node, c).into_iter().collect(),
            Tile::Unresolved => self.index.children(node).map(|(_, id)| id).collect(),
        };

        for child in next_nodes {
            if let Some(word_id) = self.index.word_at(child) {
                self.found.push(Match {
                    word_id,
                    word: self.index.word(word_id).to_string(),
                    start: self.start,
                    end: pos,
                    direction: self.direction,
                    confidence: score.finish(self.settings),
                    unresolved_cells: score.unresolved,
                });
            }
            if let Some(next) = self.grid.step(pos, self.direction) {
                self.extend(child, next, score);
            }
        }
    }
}

pub(crate) fn round4(value: f32) -> f64 {
    (value as f64 * 10_000.0).round() / 10_000.0
}

fn serialize_rounded<S: Serializer>(value: &f32, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(round4(*value))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn find(grid: &str, words: &[&str]) -> Vec<Match> {
        let grid = Grid::parse(grid).unwrap();
        let index = WordIndex::new(words).unwrap();
        search(&grid, &index, &SearchSettings::default())
    }

    fn read_path(grid: &Grid, m: &Match) -> String {
        m.path().map(|p| grid.tile(p).as_char()).collect()
    }

    #[test]
    fn test_finds_word_east() {
        let matches = find("CATS\nXXXX\nXXXX\nXXXX", &["CAT"]);
        assert_eq!(matches.len(), 1);
        let m = &matches[0];
        assert_eq!(m.word(), "CAT");
        assert_eq!(m.start(), Position::new(0, 0));
        assert_eq!(m.end(), Position::new(0, 2));
        assert_eq!(m.direction(), Direction::E);
        assert!((m.confidence() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_absent_word_yields_nothing() {
        assert!(find("CATS\nXXXX\nXXXX\nXXXX", &["DOG"]).is_empty());
    }

    #[test]
    fn test_all_eight_directions() {
        // Centre letter A with T around it: "AT" reads in every direction
        let matches = find("TTT\nTAT\nTTT", &["AT"]);
        let mut dirs: Vec<Direction> = matches.iter().map(|m| m.direction()).collect();
        dirs.sort();
        assert_eq!(dirs, Direction::ALL.to_vec());
        assert!(matches.iter().all(|m| m.start() == Position::new(1, 1)));
    }

    #[test]
    fn test_direction_filters() {
        let grid = Grid::parse("TTT\nTAT\nTTT").unwrap();
        let index = WordIndex::new(["AT"]).unwrap();

        let mut settings = SearchSettings::default();
        settings.allow_diagonal = false;
        let dirs: Vec<Direction> = search(&grid, &index, &settings).iter().map(|m| m.direction()).collect();
        assert_eq!(dirs, vec![Direction::N, Direction::E, Direction::S, Direction::W]);

        settings.allow_reversed = false;
        let dirs: Vec<Direction> = search(&grid, &index, &settings).iter().map(|m| m.direction()).collect();
        assert_eq!(dirs, vec![Direction::E, Direction::S]);

        settings.allow_diagonal = true;
        let dirs: Vec<Direction> = search(&grid, &index, &settings).iter().map(|m| m.direction()).collect();
        assert_eq!(dirs, vec![Direction::NE, Direction::E, Direction::SE, Direction::S]);
    }

    #[test]
    fn test_shared_prefix_reports_both_words() {
        let matches = find("CATS", &["CATS", "CAT"]);
        let words: Vec<&str> = matches.iter().map(|m| m.word()).collect();
        assert_eq!(words, vec!["CAT", "CATS"]);
    }

    #[test]
    fn test_reversed_occurrence() {
        let matches = find("XXXX\nXXXX\nTACX", &["CAT"]);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].start(), Position::new(2, 2));
        assert_eq!(matches[0].end(), Position::new(2, 0));
        assert_eq!(matches[0].direction(), Direction::W);
    }

    #[test]
    fn test_unresolved_cell_is_wildcard_with_penalty() {
        let matches = find("C?T", &["CAT", "COT"]);
        assert_eq!(matches.len(), 2);
        for m in &matches {
            assert_eq!(m.unresolved_cells(), 1);
            assert!((m.confidence() - 0.5).abs() < 1e-6);
        }
        assert_eq!(matches[0].word(), "CAT");
        assert_eq!(matches[1].word(), "COT");
    }

    #[test]
    fn test_unresolved_cell_cannot_start_a_match() {
        assert!(find("?AT", &["CAT"]).is_empty());
        // But the same word can end on a wildcard
        let matches = find("CA?", &["CAT"]);
        assert_eq!(matches.len(), 1);
    }

    #[test]
    fn test_confidence_modes() {
        let grid = Grid::from_cells(
            1,
            3,
            vec![
                (Tile::Letter('C'), 0.9),
                (Tile::Letter('A'), 0.5),
                (Tile::Letter('T'), 0.8),
            ],
        )
        .unwrap();
        let index = WordIndex::new(["CAT"]).unwrap();

        let mut settings = SearchSettings::default();
        let m = &search(&grid, &index, &settings)[0];
        assert!((m.confidence() - 0.5).abs() < 1e-6);

        settings.confidence_mode = ConfidenceMode::Product;
        let m = &search(&grid, &index, &settings)[0];
        assert!((m.confidence() - 0.36).abs() < 1e-5);
    }

    #[test]
    fn test_every_match_reads_its_word() {
        let text = "SPELLX\nLEVELA\nAPIARY\nTANGOE\nELEVEL\nSTARTS";
        let words = ["LEVEL", "SPELL", "STAR", "TANGO", "PEA", "ALE", "SLATE", "ART", "LEVELS"];
        let grid = Grid::parse(text).unwrap();
        let index = WordIndex::new(words).unwrap();
        let matches = search(&grid, &index, &SearchSettings::default());

        assert!(!matches.is_empty());
        for m in &matches {
            assert!(m.path().all(|p| grid.contains(p)));
            assert_eq!(read_path(&grid, m), m.word());
        }
    }

    #[test]
    fn test_search_is_deterministic() {
        let grid = Grid::parse("ABAB\nBABA\nABAB\nBABA").unwrap();
        let index = WordIndex::new(["AB", "BA", "ABA", "BAB"]).unwrap();
        let settings = SearchSettings::default();
        let first = search(&grid, &index, &settings);
        let second = search(&grid, &index, &settings);
        assert_eq!(first, second);
    }

    #[test]
    fn test_match_serialization() {
        let matches = find("CATS", &["CAT"]);
        let json = serde_json::to_string(&matches[0]).unwrap();
        assert_eq!(
            json,
            r#"{"word":"CAT","start":[0,0],"end":[0,2],"direction":"E","confidence":1.0,"unresolved_cells":0}"#
        );
    }
}
