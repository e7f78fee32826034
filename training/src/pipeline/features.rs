//! Feature fusion and label indexing.
//!
//! Every message becomes a row in two aligned matrices: the style metrics
//! vector and the padded token id sequence. Labels become dense class indices
//! in active author order.

use authorid_core::{ActiveAuthors, AuthorIdError, Result, TokenizerState};
use authorid_features::{MessageMetrics, WordTokenizer, METRICS_DIM};
use candle_core::{Device, Tensor};

/// Row-aligned metrics and token matrices, stored row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    /// Number of messages.
    pub rows: usize,
    /// `rows * METRICS_DIM` metric values.
    pub metrics: Vec<f32>,
    /// `rows * token_len` token ids.
    pub tokens: Vec<u32>,
    /// Padded sequence length.
    pub token_len: usize,
}

impl FeatureMatrix {
    fn with_capacity(rows: usize, token_len: usize) -> Self {
        Self {
            rows: 0,
            metrics: Vec::with_capacity(rows * METRICS_DIM),
            tokens: Vec::with_capacity(rows * token_len),
            token_len,
        }
    }

    fn push(&mut self, metrics: &[f32], tokens: &[u32]) {
        self.metrics.extend_from_slice(metrics);
        self.tokens.extend_from_slice(tokens);
        self.rows += 1;
    }

    /// Metrics vector of row `i`.
    pub fn metrics_row(&self, i: usize) -> &[f32] {
        &self.metrics[i * METRICS_DIM..(i + 1) * METRICS_DIM]
    }

    /// Token vector of row `i`.
    pub fn tokens_row(&self, i: usize) -> &[u32] {
        &self.tokens[i * self.token_len..(i + 1) * self.token_len]
    }

    /// New matrix holding the given rows, in the given order.
    pub fn select(&self, indices: &[usize]) -> Self {
        let mut out = Self::with_capacity(indices.len(), self.token_len);
        for &i in indices {
            out.push(self.metrics_row(i), self.tokens_row(i));
        }
        out
    }

    /// `([rows, METRICS_DIM]` f32, `[rows, token_len]` u32) tensors.
    pub fn to_tensors(&self, device: &Device) -> Result<(Tensor, Tensor)> {
        let metrics = Tensor::from_vec(self.metrics.clone(), (self.rows, METRICS_DIM), device)
            .map_err(|e| AuthorIdError::Model(format!("metrics tensor: {e}")))?;
        let tokens = Tensor::from_vec(self.tokens.clone(), (self.rows, self.token_len), device)
            .map_err(|e| AuthorIdError::Model(format!("tokens tensor: {e}")))?;
        Ok((metrics, tokens))
    }
}

/// Maps messages to feature pairs with a fitted tokenizer.
pub struct FeatureFuser {
    metrics: MessageMetrics,
    tokenizer: WordTokenizer,
}

impl FeatureFuser {
    /// Fit the tokenizer on `messages` and transform them.
    pub fn fit<S: AsRef<str>>(messages: &[S]) -> Result<(Self, FeatureMatrix)> {
        let fuser = Self {
            metrics: MessageMetrics::new()?,
            tokenizer: WordTokenizer::fit(messages),
        };
        let matrix = fuser.transform(messages);
        Ok((fuser, matrix))
    }

    /// Rebuild a fuser around a persisted tokenizer.
    pub fn from_tokenizer(state: TokenizerState) -> Result<Self> {
        Ok(Self {
            metrics: MessageMetrics::new()?,
            tokenizer: WordTokenizer::from_state(state),
        })
    }

    /// Feature rows for `messages`, in input order.
    pub fn transform<S: AsRef<str>>(&self, messages: &[S]) -> FeatureMatrix {
        let mut out = FeatureMatrix::with_capacity(messages.len(), self.tokenizer.max_len());
        for message in messages {
            let text = message.as_ref();
            out.push(&self.metrics.extract(text), &self.tokenizer.encode(text));
        }
        out
    }

    /// The tokenizer in use.
    pub fn tokenizer(&self) -> &WordTokenizer {
        &self.tokenizer
    }
}

/// Class index of every author, failing on the first one outside `actives`.
pub fn encode_labels<S: AsRef<str>>(authors: &[S], actives: &ActiveAuthors) -> Result<Vec<u32>> {
    authors
        .iter()
        .map(|author| {
            let author = author.as_ref();
            actives
                .index_of(author)
                .map(|idx| idx as u32)
                .ok_or_else(|| {
                    AuthorIdError::DataIntegrity(format!(
                        "label {author:?} is not an active author {actives}"
                    ))
                })
        })
        .collect()
}

/// Author at class index `index`.
pub fn decode_label(index: u32, actives: &ActiveAuthors) -> Result<&str> {
    actives.get(index as usize).ok_or_else(|| {
        AuthorIdError::DataIntegrity(format!(
            "class index {index} out of range for {} authors",
            actives.len()
        ))
    })
}
