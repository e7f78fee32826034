//! Hand-crafted style metrics for a single chat message.
//!
//! Builds a fixed-size numeric vector from surface properties of the raw
//! text. The vector is the first of the two inputs of the author classifier.
//!
//! # Feature Vector Layout (22 dimensions)
//!
//! | Index | Feature                             | Type    |
//! |-------|-------------------------------------|---------|
//! | 0     | Character count (normalised)        | Numeric |
//! | 1     | Word count (normalised)             | Numeric |
//! | 2     | Average word length (normalised)    | Numeric |
//! | 3     | Longest word length (normalised)    | Numeric |
//! | 4     | Uppercase share of letters          | Ratio   |
//! | 5     | Digit share of characters           | Ratio   |
//! | 6     | Whitespace share of characters      | Ratio   |
//! | 7     | Punctuation share of characters     | Ratio   |
//! | 8     | Non-ASCII share of letters          | Ratio   |
//! | 9     | Question marks                      | Count   |
//! | 10    | Exclamation marks                   | Count   |
//! | 11    | Full stops                          | Count   |
//! | 12    | Commas                              | Count   |
//! | 13    | Ellipses                            | Count   |
//! | 14    | Emoticons                           | Count   |
//! | 15    | Links                               | Count   |
//! | 16    | Distinct word share                 | Ratio   |
//! | 17    | Starts with an uppercase letter     | Binary  |
//! | 18    | Ends with terminal punctuation      | Binary  |
//! | 19    | Sentence count                      | Count   |
//! | 20    | Runs of three repeated characters   | Count   |
//! | 21    | Line count                          | Count   |
//!
//! Counts are divided by a per-feature ceiling and clamped to `[0, 1]`.

use authorid_core::{AuthorIdError, Result};
use regex::Regex;
use std::collections::HashSet;

/// Total number of features in the metrics vector.
pub const METRICS_DIM: usize = 22;

/// Character count treated as 1.0.
const MAX_CHARS: f32 = 1_000.0;
/// Word count treated as 1.0.
const MAX_WORDS: f32 = 100.0;
/// Average word length treated as 1.0.
const MAX_AVG_WORD_LEN: f32 = 20.0;
/// Longest word length treated as 1.0.
const MAX_WORD_LEN: f32 = 40.0;

const EMOTICON_PATTERN: &str =
    r"[:;=8]-?[()\[\]DPpOo3]|\){2,}|\({2,}|[\x{1F300}-\x{1FAFF}\x{2600}-\x{27BF}]";
const LINK_PATTERN: &str = r"(?i)\b(?:https?://|www\.)\S+";
const ELLIPSIS_PATTERN: &str = r"\.{3,}|…";
const SENTENCE_PATTERN: &str = r"[^.!?…]+[.!?…]*";

/// Extracts the style metrics vector.
///
/// Holds the compiled patterns so a single instance can be reused for a whole
/// corpus.
pub struct MessageMetrics {
    emoticon: Regex,
    link: Regex,
    ellipsis: Regex,
    sentence: Regex,
}

impl MessageMetrics {
    /// Compile the patterns used by the extractor.
    pub fn new() -> Result<Self> {
        let compile = |name: &str, pattern: &str| {
            Regex::new(pattern).map_err(|e| {
                AuthorIdError::Config(format!("Failed to compile {name} pattern: {e}"))
            })
        };
        Ok(Self {
            emoticon: compile("emoticon", EMOTICON_PATTERN)?,
            link: compile("link", LINK_PATTERN)?,
            ellipsis: compile("ellipsis", ELLIPSIS_PATTERN)?,
            sentence: compile("sentence", SENTENCE_PATTERN)?,
        })
    }

    /// Compute the metrics vector of one message.
    pub fn extract(&self, text: &str) -> [f32; METRICS_DIM] {
        let mut features = [0.0_f32; METRICS_DIM];

        let char_count = text.chars().count();
        let words: Vec<&str> = text.split_whitespace().collect();

        features[0] = scaled(char_count, MAX_CHARS);
        features[1] = scaled(words.len(), MAX_WORDS);

        // --- Word lengths (indices 2-3) ---
        if !words.is_empty() {
            let lengths: Vec<usize> = words.iter().map(|w| w.chars().count()).collect();
            let total: usize = lengths.iter().sum();
            let avg = total as f32 / words.len() as f32;
            features[2] = (avg / MAX_AVG_WORD_LEN).min(1.0);
            features[3] = scaled(lengths.iter().copied().max().unwrap_or(0), MAX_WORD_LEN);
        }

        // --- Character class ratios (indices 4-8) ---
        let mut letters = 0usize;
        let mut upper = 0usize;
        let mut digits = 0usize;
        let mut spaces = 0usize;
        let mut punct = 0usize;
        let mut non_ascii_letters = 0usize;
        for c in text.chars() {
            if c.is_alphabetic() {
                letters += 1;
                if c.is_uppercase() {
                    upper += 1;
                }
                if !c.is_ascii() {
                    non_ascii_letters += 1;
                }
            } else if c.is_numeric() {
                digits += 1;
            } else if c.is_whitespace() {
                spaces += 1;
            } else {
                punct += 1;
            }
        }
        features[4] = ratio(upper, letters);
        features[5] = ratio(digits, char_count);
        features[6] = ratio(spaces, char_count);
        features[7] = ratio(punct, char_count);
        features[8] = ratio(non_ascii_letters, letters);

        // --- Punctuation counts (indices 9-12) ---
        features[9] = scaled(count_char(text, '?'), 5.0);
        features[10] = scaled(count_char(text, '!'), 5.0);
        features[11] = scaled(count_char(text, '.'), 10.0);
        features[12] = scaled(count_char(text, ','), 10.0);

        // --- Pattern counts (indices 13-15) ---
        features[13] = scaled(self.ellipsis.find_iter(text).count(), 3.0);
        features[14] = scaled(self.emoticon.find_iter(text).count(), 5.0);
        features[15] = scaled(self.link.find_iter(text).count(), 3.0);

        // --- Vocabulary richness (index 16) ---
        if !words.is_empty() {
            let distinct: HashSet<String> = words.iter().map(|w| w.to_lowercase()).collect();
            features[16] = distinct.len() as f32 / words.len() as f32;
        }

        // --- Shape of the message (indices 17-21) ---
        let trimmed = text.trim();
        if trimmed.chars().next().is_some_and(char::is_uppercase) {
            features[17] = 1.0;
        }
        if trimmed
            .chars()
            .last()
            .is_some_and(|c| matches!(c, '.' | '!' | '?' | '…'))
        {
            features[18] = 1.0;
        }
        let sentences = self
            .sentence
            .find_iter(trimmed)
            .filter(|m| m.as_str().chars().any(char::is_alphanumeric))
            .count();
        features[19] = scaled(sentences, 10.0);
        features[20] = scaled(repeated_runs(text), 5.0);
        features[21] = scaled(text.lines().count(), 10.0);

        features
    }
}

fn scaled(count: usize, ceiling: f32) -> f32 {
    (count as f32 / ceiling).min(1.0)
}

fn ratio(part: usize, whole: usize) -> f32 {
    if whole == 0 {
        0.0
    } else {
        part as f32 / whole as f32
    }
}

fn count_char(text: &str, needle: char) -> usize {
    text.chars().filter(|&c| c == needle).count()
}

/// Number of runs where the same character appears three or more times.
fn repeated_runs(text: &str) -> usize {
    let mut runs = 0;
    let mut prev = None;
    let mut len = 0;
    for c in text.chars() {
        if Some(c) == prev {
            len += 1;
            if len == 3 {
                runs += 1;
            }
        } else {
            prev = Some(c);
            len = 1;
        }
    }
    runs
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
