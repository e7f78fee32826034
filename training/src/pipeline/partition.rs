//! Positional train/test partitioning.
//!
//! Both partitioners work on indices of the already shuffled corpus and never
//! look at the data, so any reordering must happen before partitioning.

use authorid_core::{AuthorIdError, Result};
use std::ops::Range;

/// `floor(total * fraction)`, capped at `total`.
///
/// The small epsilon keeps products such as `100 * (1 - 0.8)` from flooring
/// to one less than the exact decimal result.
pub fn floor_share(total: usize, fraction: f64) -> usize {
    ((total as f64 * fraction + 1e-9).floor() as usize).min(total)
}

fn check_quotient(quotient: f64) -> Result<()> {
    if quotient > 0.0 && quotient < 1.0 {
        Ok(())
    } else {
        Err(AuthorIdError::Config(format!(
            "quotient must be in (0, 1), got {quotient}"
        )))
    }
}

/// Single train/test split.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Split {
    /// `[0, floor(total * q))`.
    pub train: Range<usize>,
    /// The remainder.
    pub test: Range<usize>,
}

/// Split `total` rows into a leading training slice and a trailing test slice.
pub fn single_split(total: usize, quotient: f64) -> Result<Split> {
    check_quotient(quotient)?;
    let cut = floor_share(total, quotient);
    Ok(Split {
        train: 0..cut,
        test: cut..total,
    })
}

/// One k-fold partition: a contiguous test window and the rest as training.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fold {
    /// Zero-based fold number.
    pub index: usize,
    /// Test window.
    pub test: Range<usize>,
    /// Rows before and after the window.
    pub train: [Range<usize>; 2],
}

impl Fold {
    /// Training row indices, ascending.
    pub fn train_indices(&self) -> Vec<usize> {
        self.train.iter().flat_map(|r| r.clone()).collect()
    }

    /// Test row indices, ascending.
    pub fn test_indices(&self) -> Vec<usize> {
        self.test.clone().collect()
    }
}

/// Non-overlapping test windows of width `floor(total * (1 - q))`.
///
/// Yields `floor(total / width)` folds; a tail shorter than the window is
/// never tested, only trained on.
#[derive(Debug, Clone)]
pub struct SlidingKFold {
    total: usize,
    width: usize,
    next: usize,
}

impl SlidingKFold {
    /// Plan the folds for `total` rows.
    pub fn new(total: usize, quotient: f64) -> Result<Self> {
        check_quotient(quotient)?;
        let width = floor_share(total, 1.0 - quotient);
        if width == 0 {
            return Err(AuthorIdError::Config(format!(
                "test window of {total} rows at quotient {quotient} is empty"
            )));
        }
        Ok(Self {
            total,
            width,
            next: 0,
        })
    }

    /// Rows per test window.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Total number of folds.
    pub fn fold_count(&self) -> usize {
        self.total / self.width
    }
}

impl Iterator for SlidingKFold {
    type Item = Fold;

    fn next(&mut self) -> Option<Fold> {
        let left = self.next * self.width;
        let right = left + self.width;
        if right > self.total {
            return None;
        }
        let fold = Fold {
            index: self.next,
            test: left..right,
            train: [0..left, right..self.total],
        };
        self.next += 1;
        Some(fold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_split_sizes() {
        let split = single_split(10, 0.8).unwrap();
        assert_eq!(split.train, 0..8);
        assert_eq!(split.test, 8..10);

        for total in [1, 7, 33, 100, 1001] {
            for q in [0.1, 0.5, 0.7, 0.8, 0.9] {
                let split = single_split(total, q).unwrap();
                assert_eq!(split.train.len(), floor_share(total, q));
                assert_eq!(split.train.len() + split.test.len(), total);
            }
        }
    }

    #[test]
    fn test_floor_share_exact_decimals() {
        assert_eq!(floor_share(100, 1.0 - 0.8), 20);
        assert_eq!(floor_share(10, 0.8), 8);
        assert_eq!(floor_share(7, 0.5), 3);
    }

    #[test]
    fn test_quotient_bounds() {
        assert!(single_split(10, 0.0).is_err());
        assert!(single_split(10, 1.0).is_err());
        assert!(SlidingKFold::new(10, 1.5).is_err());
    }

    #[test]
    fn test_kfold_hundred_rows() {
        let kfold = SlidingKFold::new(100, 0.8).unwrap();
        assert_eq!(kfold.width(), 20);
        assert_eq!(kfold.fold_count(), 5);
        let folds: Vec<Fold> = kfold.collect();
        assert_eq!(folds.len(), 5);
        assert_eq!(folds[0].test, 0..20);
        assert_eq!(folds[4].test, 80..100);
    }

    #[test]
    fn test_kfold_windows_disjoint_and_cover() {
        for (total, q) in [(23, 0.8), (50, 0.7), (9, 0.5)] {
            let kfold = SlidingKFold::new(total, q).unwrap();
            let expected = kfold.fold_count();
            let mut seen = vec![false; total];
            let mut count = 0;
            for fold in kfold {
                count += 1;
                let test = fold.test_indices();
                let train = fold.train_indices();
                assert!(fold.test.end <= total);
                assert_eq!(test.len() + train.len(), total);
                let mut all: Vec<usize> = test.iter().chain(&train).copied().collect();
                all.sort_unstable();
                assert_eq!(all, (0..total).collect::<Vec<_>>());
                for i in test {
                    assert!(!seen[i], "row {i} tested twice");
                    seen[i] = true;
                }
            }
            assert_eq!(count, expected);
        }
    }

    #[test]
    fn test_kfold_tail_never_tested() {
        let folds: Vec<Fold> = SlidingKFold::new(23, 0.8).unwrap().collect();
        // width 4, five folds, rows 20..23 only trained on
        assert_eq!(folds.len(), 5);
        assert_eq!(folds.last().map(|f| f.test.clone()), Some(16..20));
        assert!(folds.iter().all(|f| f.train[1].contains(&22)));
    }

    #[test]
    fn test_kfold_zero_width_is_config_error() {
        let err = SlidingKFold::new(3, 0.8).unwrap_err();
        assert!(matches!(err, AuthorIdError::Config(_)));
    }
}
