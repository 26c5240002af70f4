//! Target word index
//!
//! Normalizes the word list and stores it in a trie so the search engine can
//! abandon a direction as soon as no target word shares the current prefix.

use std::fmt;

const ALPHABET: usize = 26;
const NO_CHILD: u32 = 0;

/// Why a word was rejected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidWordReason {
    /// Fewer than two letters after trimming
    TooShort,
    /// Contains a character outside A-Z
    NonLetter(char),
}

impl fmt::Display for InvalidWordReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidWordReason::TooShort => f.write_str("words need at least 2 letters"),
            InvalidWordReason::NonLetter(c) => write!(f, "{:?} is not a letter A-Z", c),
        }
    }
}

/// Word list errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WordIndexError {
    #[error("the word list is empty")]
    Empty,

    #[error("invalid word {word:?}: {reason}")]
    InvalidWord { word: String, reason: InvalidWordReason },
}

/// Handle to a trie node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeId(u32);

#[derive(Debug, Clone)]
struct Node {
    children: [u32; ALPHABET],
    word: Option<usize>,
}

impl Node {
    fn new() -> Self {
        Self {
            children: [NO_CHILD; ALPHABET],
            word: None,
        }
    }
}

/// Trie over the normalized, de-duplicated target words
#[derive(Debug, Clone)]
pub struct WordIndex {
    words: Vec<String>,
    nodes: Vec<Node>,
    max_len: usize,
}

impl WordIndex {
    /// Build the index. Words are trimmed and uppercased; duplicates collapse
    /// into the first occurrence, keeping input order.
    pub fn new<I, S>(words: I) -> Result<Self, WordIndexError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut index = Self {
            words: Vec::new(),
            nodes: vec![Node::new()],
            max_len: 0,
        };

        for raw in words {
            let word = normalize(raw.as_ref())?;
            index.insert(word);
        }

        if index.words.is_empty() {
            return Err(WordIndexError::Empty);
        }
        Ok(index)
    }

    fn insert(&mut self, word: String) {
        let mut node = 0usize;
        for b in word.bytes() {
            let slot = (b - b'A') as usize;
            let child = self.nodes[node].children[slot];
            node = if child == NO_CHILD {
                self.nodes.push(Node::new());
                let id = self.nodes.len() - 1;
                self.nodes[node].children[slot] = id as u32;
                id
            } else {
                child as usize
            };
        }

        if self.nodes[node].word.is_none() {
            self.max_len = self.max_len.max(word.len());
            self.nodes[node].word = Some(self.words.len());
            self.words.push(word);
        }
    }

    /// True if any target word starts with `prefix` (case-insensitive)
    pub fn candidates_from(&self, prefix: &str) -> bool {
        self.find(prefix).is_some()
    }

    /// True if `s` is exactly one of the target words (case-insensitive)
    pub fn is_word(&self, s: &str) -> bool {
        self.find(s).and_then(|node| self.word_at(node)).is_some()
    }

    /// Normalized words in input order
    pub fn words(&self) -> &[String] {
        &self.words
    }

    pub fn word(&self, id: usize) -> &str {
        &self.words[id]
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Length of the longest word
    pub fn max_len(&self) -> usize {
        self.max_len
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// Child of `node` along `letter`
    pub fn child(&self, node: NodeId, letter: char) -> Option<NodeId> {
        if !letter.is_ascii_alphabetic() {
            return None;
        }
        let slot = (letter.to_ascii_uppercase() as u8 - b'A') as usize;
        match self.nodes[node.0 as usize].children[slot] {
            NO_CHILD => None,
            id => Some(NodeId(id)),
        }
    }

    /// All children of `node` in alphabetical order
    pub fn children(&self, node: NodeId) -> impl Iterator<Item = (char, NodeId)> + '_ {
        self.nodes[node.0 as usize]
            .children
            .iter()
            .enumerate()
            .filter(|&(_, &id)| id != NO_CHILD)
            .map(|(slot, &id)| ((b'A' + slot as u8) as char, NodeId(id)))
    }

    /// Word id ending at `node`, if any
    pub fn word_at(&self, node: NodeId) -> Option<usize> {
        self.nodes[node.0 as usize].word
    }

    fn find(&self, s: &str) -> Option<NodeId> {
        s.chars().try_fold(self.root(), |node, c| self.child(node, c))
    }
}

/// Trim and uppercase a word, rejecting anything that is not 2+ letters A-Z
pub fn normalize(word: &str) -> Result<String, WordIndexError> {
    let normalized = word.trim().to_uppercase();

    if let Some(bad) = normalized.chars().find(|c| !c.is_ascii_uppercase()) {
        return Err(WordIndexError::InvalidWord {
            word: word.to_string(),
            reason: InvalidWordReason::NonLetter(bad),
        });
    }
    if normalized.len() < 2 {
        return Err(WordIndexError::InvalidWord {
            word: word.to_string(),
            reason: InvalidWordReason::TooShort,
        });
    }
    Ok(normalized)
}
