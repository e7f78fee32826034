//! Corpus preparation pipeline.
//!
//! Records flow through the components in a fixed order:
//! selection → balancing → shuffling → feature fusion + label indexing →
//! partitioning. [`prepare_corpus`] runs everything up to feature fusion,
//! which the workflows perform once the tokenizer scope is known.

pub mod balance;
pub mod features;
pub mod partition;
pub mod select;
pub mod shuffle;

pub use balance::{balance, BalancedCorpus};
pub use features::{decode_label, encode_labels, FeatureFuser, FeatureMatrix};
pub use partition::{floor_share, single_split, Fold, SlidingKFold, Split};
pub use select::select_active_authors;
pub use shuffle::{gather, permutation, shuffle_aligned};

use authorid_core::{ActiveAuthors, AuthorIdError, MessageRecord, Result};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info};

/// Balanced, shuffled corpus with class indices, ready for feature fusion.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedCorpus {
    /// Class index ordering.
    pub actives: ActiveAuthors,
    /// Messages in final order.
    pub messages: Vec<String>,
    /// Class index of each message.
    pub labels: Vec<u32>,
    /// Messages per author.
    pub least_count: usize,
}

impl PreparedCorpus {
    /// Number of messages.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Returns `true` if there are no messages.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Select, balance and shuffle `records`.
///
/// A single generator seeded with `seed` drives both the pre-balance shuffle
/// (which decides the records kept per author) and the final permutation, so
/// equal inputs and seeds always produce the same corpus.
pub fn prepare_corpus(
    records: Vec<MessageRecord>,
    amount: usize,
    seed: u64,
) -> Result<PreparedCorpus> {
    if records.is_empty() {
        return Err(AuthorIdError::EmptyCorpus);
    }

    let authors: Vec<&str> = records.iter().map(|r| r.author.as_str()).collect();
    let actives = select_active_authors(&authors, amount)?;
    info!(
        records = records.len(),
        amount,
        actives = %actives,
        "Selected active authors"
    );

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let order = permutation(records.len(), &mut rng);
    let shuffled = gather(&records, &order);

    let balanced = balance(&shuffled, &actives);
    debug!(
        least_count = balanced.least_count,
        total = balanced.records.len(),
        "Balanced corpus"
    );

    let (messages, authors): (Vec<String>, Vec<String>) = balanced
        .records
        .into_iter()
        .map(|r| (r.text, r.author))
        .unzip();
    let labels = encode_labels(&authors, &actives)?;
    let (messages, labels) = shuffle_aligned(&messages, &labels, &mut rng)?;

    info!(
        messages = messages.len(),
        least_count = balanced.least_count,
        seed,
        "Prepared corpus"
    );

    Ok(PreparedCorpus {
        actives,
        messages,
        labels,
        least_count: balanced.least_count,
    })
}
