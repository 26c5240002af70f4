//! Word Puzzle Solver
//!
//! Reads a word-search grid from an image (or text), reconstructs the most
//! plausible letters from OCR candidates and finds the target words in all
//! eight directions.

pub mod config;
pub mod error;
pub mod puzzle;
pub mod solver;
pub mod vision;

pub use config::SolverConfig;
pub use error::SolveError;
pub use puzzle::{Direction, Grid, Match, Position, SolveReport, SolveStats};
pub use solver::{PuzzleInput, SolveOptions, Solver};
