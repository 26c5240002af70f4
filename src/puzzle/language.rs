//! Letter n-gram model
//!
//! Bigram and trigram counts used by the grid reconstructor to judge how
//! plausible a letter is next to its neighbours. Built once at startup and
//! shared read-only between solves.

use anyhow::{Context, Result};
use std::path::Path;
use tracing::info;

const ALPHABET: usize = 26;

/// Word list compiled into the binary as the default reference corpus
const ENGLISH_CORPUS: &str = include_str!("../../data/english_words.txt");

/// Read-only bigram/trigram frequency table over A-Z
#[derive(Debug, Clone)]
pub struct LetterModel {
    bigrams: Vec<u32>,
    trigrams: Vec<u32>,
    bigram_norm: f32,
    trigram_norm: f32,
}

impl LetterModel {
    /// Build a model from free text. Runs of ASCII letters count as words;
    /// n-grams never cross a word boundary. Lines starting with `#` are skipped.
    pub fn from_corpus(text: &str) -> Self {
        let words = text
            .lines()
            .filter(|line| !line.trim_start().starts_with('#'))
            .flat_map(|line| line.split(|c: char| !c.is_ascii_alphabetic()));
        Self::from_words(words)
    }

    /// Build a model from individual words
    pub fn from_words<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut bigrams = vec![0u32; ALPHABET * ALPHABET];
        let mut trigrams = vec![0u32; ALPHABET * ALPHABET * ALPHABET];

        for word in words {
            let letters: Vec<usize> = word
                .as_ref()
                .chars()
                .filter_map(letter_index)
                .collect();
            for pair in letters.windows(2) {
                bigrams[pair[0] * ALPHABET + pair[1]] += 1;
            }
            for triple in letters.windows(3) {
                trigrams[(triple[0] * ALPHABET + triple[1]) * ALPHABET + triple[2]] += 1;
            }
        }

        let bigram_norm = log_norm(&bigrams);
        let trigram_norm = log_norm(&trigrams);

        Self {
            bigrams,
            trigrams,
            bigram_norm,
            trigram_norm,
        }
    }

    /// The built-in English model
    pub fn english() -> Self {
        Self::from_corpus(ENGLISH_CORPUS)
    }

    /// Load a model from a plain-text corpus file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read letter corpus: {:?}", path))?;
        let model = Self::from_corpus(&text);
        if model.is_empty() {
            anyhow::bail!("Letter corpus {:?} contains no letter pairs", path);
        }
        info!("Loaded letter model from {:?}", path);
        Ok(model)
    }

    /// True when the corpus produced no bigrams at all
    pub fn is_empty(&self) -> bool {
        self.bigram_norm == 0.0
    }

    pub fn bigram_count(&self, a: char, b: char) -> u32 {
        match (letter_index(a), letter_index(b)) {
            (Some(a), Some(b)) => self.bigrams[a * ALPHABET + b],
            _ => 0,
        }
    }

    pub fn trigram_count(&self, a: char, b: char, c: char) -> u32 {
        match (letter_index(a), letter_index(b), letter_index(c)) {
            (Some(a), Some(b), Some(c)) => self.trigrams[(a * ALPHABET + b) * ALPHABET + c],
            _ => 0,
        }
    }

    /// Plausibility of the pair `ab` in [0, 1] (log-scaled count over the table maximum)
    pub fn bigram_score(&self, a: char, b: char) -> f32 {
        scaled(self.bigram_count(a, b), self.bigram_norm)
    }

    /// Plausibility of the triple `abc` in [0, 1]
    pub fn trigram_score(&self, a: char, b: char, c: char) -> f32 {
        scaled(self.trigram_count(a, b, c), self.trigram_norm)
    }
}

impl Default for LetterModel {
    fn default() -> Self {
        Self::english()
    }
}

fn letter_index(c: char) -> Option<usize> {
    c.is_ascii_alphabetic()
        .then(|| (c.to_ascii_uppercase() as u8 - b'A') as usize)
}

fn log_norm(counts: &[u32]) -> f32 {
    let max = counts.iter().copied().max().unwrap_or(0);
    (max as f32).ln_1p()
}

fn scaled(count: u32, norm: f32) -> f32 {
    if norm == 0.0 {
        return 0.0;
    }
    ((count as f32).ln_1p() / norm).clamp(0.0, 1.0)
}
