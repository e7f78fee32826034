//! Word-level tokenizer producing fixed-length id sequences.
//!
//! Fitting builds a vocabulary ordered by word frequency (ties keep first
//! occurrence order) and records the longest message as the sequence length.
//! Applying maps known words to ids, drops unknown words, and pads or
//! truncates at the front so every row has exactly `max_len` ids.
//!
//! Id `0` is reserved for padding; the most frequent word has id `1`.

use authorid_core::TokenizerState;
use std::collections::HashMap;
use unicode_normalization::UnicodeNormalization;

/// Characters removed before splitting into words.
const FILTERED: &str = "!\"#$%&()*+,-./:;<=>?@[\\]^_`{|}~\t\n\r";

/// Fitted tokenizer.
#[derive(Debug, Clone)]
pub struct WordTokenizer {
    state: TokenizerState,
    ids: HashMap<String, u32>,
}

impl WordTokenizer {
    /// Fit a tokenizer on `messages`.
    pub fn fit<S: AsRef<str>>(messages: &[S]) -> Self {
        let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
        let mut max_len = 0usize;

        for message in messages {
            let words = split_words(message.as_ref());
            max_len = max_len.max(words.len());
            for word in words {
                let next_rank = counts.len();
                counts.entry(word).or_insert((0, next_rank)).0 += 1;
            }
        }

        let mut ranked: Vec<(String, (usize, usize))> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1 .0.cmp(&a.1 .0).then(a.1 .1.cmp(&b.1 .1)));

        let state = TokenizerState {
            vocabulary: ranked.into_iter().map(|(word, _)| word).collect(),
            // a zero-width token input cannot feed the network
            max_len: max_len.max(1),
        };
        tracing::debug!(
            messages = messages.len(),
            vocabulary = state.vocabulary.len(),
            max_len = state.max_len,
            "Tokenizer fitted"
        );
        Self::from_state(state)
    }

    /// Rebuild a tokenizer from persisted state.
    pub fn from_state(state: TokenizerState) -> Self {
        let ids = state
            .vocabulary
            .iter()
            .enumerate()
            .map(|(i, word)| (word.clone(), i as u32 + 1))
            .collect();
        Self { state, ids }
    }

    /// Encode one message into exactly `max_len` ids.
    pub fn encode(&self, text: &str) -> Vec<u32> {
        let max_len = self.state.max_len;
        let ids: Vec<u32> = split_words(text)
            .iter()
            .filter_map(|w| self.ids.get(w).copied())
            .collect();

        let kept = &ids[ids.len().saturating_sub(max_len)..];
        let mut row = vec![0u32; max_len - kept.len()];
        row.extend_from_slice(kept);
        row
    }

    /// Encode every message, preserving order.
    pub fn apply<S: AsRef<str>>(&self, messages: &[S]) -> Vec<Vec<u32>> {
        messages.iter().map(|m| self.encode(m.as_ref())).collect()
    }

    /// Padded sequence length.
    pub fn max_len(&self) -> usize {
        self.state.max_len
    }

    /// Number of ids in use, including padding.
    pub fn vocab_size(&self) -> usize {
        self.state.vocabulary.len() + 1
    }

    /// Borrow the persistable state.
    pub fn state(&self) -> &TokenizerState {
        &self.state
    }
}

fn split_words(text: &str) -> Vec<String> {
    let cleaned: String = text
        .nfkc()
        .flat_map(char::to_lowercase)
        .map(|c| if FILTERED.contains(c) { ' ' } else { c })
        .collect();
    cleaned.split_whitespace().map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vocabulary_ordered_by_frequency_then_first_seen() {
        let tok = WordTokenizer::fit(&["b a", "a c", "c d"]);
        assert_eq!(tok.state().vocabulary, vec!["a", "c", "b", "d"]);
        assert_eq!(tok.max_len(), 2);
        assert_eq!(tok.vocab_size(), 5);
    }

    #[test]
    fn test_encode_pre_pads_and_pre_truncates() {
        let tok = WordTokenizer::fit(&["one two three", "one"]);
        assert_eq!(tok.max_len(), 3);
        assert_eq!(tok.encode("one"), vec![0, 0, 1]);
        // keeps the last max_len known words
        assert_eq!(tok.encode("one two three one"), vec![2, 3, 1]);
    }

    #[test]
    fn test_unknown_words_dropped() {
        let tok = WordTokenizer::fit(&["hello world"]);
        assert_eq!(tok.encode("hello stranger"), vec![0, 1]);
        assert_eq!(tok.encode("nobody"), vec![0, 0]);
    }

    #[test]
    fn test_filters_punctuation_and_case() {
        let tok = WordTokenizer::fit(&["Hello, World!"]);
        assert_eq!(tok.state().vocabulary, vec!["hello", "world"]);
        assert_eq!(tok.encode("HELLO world?"), vec![1, 2]);
    }

    #[test]
    fn test_state_round_trip_reproduces_encoding() {
        let tok = WordTokenizer::fit(&["the cat sat", "the dog"]);
        let restored = WordTokenizer::from_state(tok.state().clone());
        for text in ["the cat", "dog sat the", "unseen"] {
            assert_eq!(tok.encode(text), restored.encode(text));
        }
    }

    #[test]
    fn test_empty_corpus_has_unit_length() {
        let tok = WordTokenizer::fit::<&str>(&[]);
        assert_eq!(tok.max_len(), 1);
        assert_eq!(tok.encode("anything"), vec![0]);
    }
}
