//! Reproducible lock-step shuffling.
//!
//! A permutation is drawn once from an explicitly seeded generator and
//! applied to every parallel array by index gathering, so messages and their
//! labels can never drift apart.

use authorid_core::{AuthorIdError, Result};
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;

/// Random permutation of `0..len`.
pub fn permutation(len: usize, rng: &mut ChaCha8Rng) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..len).collect();
    indices.shuffle(rng);
    indices
}

/// Reorder `items` so that `out[i] == items[order[i]]`.
pub fn gather<T: Clone>(items: &[T], order: &[usize]) -> Vec<T> {
    order.iter().map(|&i| items[i].clone()).collect()
}

/// Shuffle two parallel arrays with one permutation.
pub fn shuffle_aligned<A: Clone, B: Clone>(
    left: &[A],
    right: &[B],
    rng: &mut ChaCha8Rng,
) -> Result<(Vec<A>, Vec<B>)> {
    if left.len() != right.len() {
        return Err(AuthorIdError::DataIntegrity(format!(
            "cannot shuffle {} messages with {} labels",
            left.len(),
            right.len()
        )));
    }
    let order = permutation(left.len(), rng);
    Ok((gather(left, &order), gather(right, &order)))
}
