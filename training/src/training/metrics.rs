//! Classification metrics.
//!
//! Computes per-author precision, recall and F1 from a multi-class confusion
//! matrix, plus the fold variance used by k-fold evaluation.

use authorid_core::{AuthorIdError, Result};

/// Scores of one class.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassScores {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    /// Rows whose true label is this class.
    pub support: usize,
}

/// Metrics derived from a confusion matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationMetrics {
    pub accuracy: f64,
    /// Scores in class index order.
    pub per_class: Vec<ClassScores>,
    /// Unweighted mean of the per-class F1 scores.
    pub mean_f1: f64,
    /// `confusion[actual][predicted]`.
    pub confusion: Vec<Vec<usize>>,
}

impl ClassificationMetrics {
    /// F1 per class, in class index order.
    pub fn f1_scores(&self) -> Vec<f64> {
        self.per_class.iter().map(|c| c.f1).collect()
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den > 0 {
        num as f64 / den as f64
    } else {
        0.0
    }
}

/// Compute metrics from predicted and ground-truth class indices.
pub fn compute_classification_metrics(
    predictions: &[u32],
    labels: &[u32],
    classes: usize,
) -> Result<ClassificationMetrics> {
    if predictions.len() != labels.len() {
        return Err(AuthorIdError::DataIntegrity(format!(
            "{} predictions for {} labels",
            predictions.len(),
            labels.len()
        )));
    }

    let mut confusion = vec![vec![0usize; classes]; classes];
    for (&pred, &label) in predictions.iter().zip(labels) {
        let (pred, label) = (pred as usize, label as usize);
        if pred >= classes || label >= classes {
            return Err(AuthorIdError::DataIntegrity(format!(
                "class index out of range: predicted {pred}, actual {label}, classes {classes}"
            )));
        }
        confusion[label][pred] += 1;
    }

    let correct: usize = (0..classes).map(|c| confusion[c][c]).sum();
    let accuracy = ratio(correct, labels.len());

    let per_class: Vec<ClassScores> = (0..classes)
        .map(|c| {
            let tp = confusion[c][c];
            let predicted: usize = (0..classes).map(|r| confusion[r][c]).sum();
            let support: usize = confusion[c].iter().sum();
            let precision = ratio(tp, predicted);
            let recall = ratio(tp, support);
            let f1 = if precision + recall > 0.0 {
                2.0 * precision * recall / (precision + recall)
            } else {
                0.0
            };
            ClassScores {
                precision,
                recall,
                f1,
                support,
            }
        })
        .collect();

    let mean_f1 = if classes > 0 {
        per_class.iter().map(|c| c.f1).sum::<f64>() / classes as f64
    } else {
        0.0
    };

    Ok(ClassificationMetrics {
        accuracy,
        per_class,
        mean_f1,
        confusion,
    })
}

/// Share of rows where prediction equals label.
pub fn accuracy(predictions: &[u32], labels: &[u32]) -> f64 {
    let correct = predictions
        .iter()
        .zip(labels)
        .filter(|(p, l)| p == l)
        .count();
    ratio(correct, labels.len())
}

/// Sample variance (n - 1 denominator) using Welford's method.
///
/// Returns `None` for fewer than two values.
pub fn sample_variance(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let mut mean = 0.0f64;
    let mut m2 = 0.0f64;
    let mut count = 0.0f64;
    for &x in values {
        count += 1.0;
        let delta = x - mean;
        mean += delta / count;
        m2 += delta * (x - mean);
    }
    Some(m2 / (count - 1.0))
}

impl std::fmt::Display for ClassificationMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "acc={:.4} mean_f1={:.4} f1=[", self.accuracy, self.mean_f1)?;
        for (i, c) in self.per_class.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{:.4}", c.f1)?;
        }
        f.write_str("]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_perfect_predictions() {
        let labels = vec![0, 1, 2, 0, 1, 2];
        let m = compute_classification_metrics(&labels, &labels, 3).unwrap();
        assert!((m.accuracy - 1.0).abs() < 1e-9);
        assert!((m.mean_f1 - 1.0).abs() < 1e-9);
        assert!(m.per_class.iter().all(|c| (c.f1 - 1.0).abs() < 1e-9));
    }

    #[test]
    fn test_mixed() {
        // class 0: tp 2, fp 1, fn 0; class 1: tp 1, fp 0, fn 1; class 2: tp 1, fp 0, fn 0
        let labels = vec![0, 0, 1, 1, 2];
        let preds = vec![0, 0, 1, 0, 2];
        let m = compute_classification_metrics(&preds, &labels, 3).unwrap();
        assert_eq!(m.confusion[1][0], 1);
        assert!((m.accuracy - 0.8).abs() < 1e-9);
        assert!((m.per_class[0].precision - 2.0 / 3.0).abs() < 1e-9);
        assert!((m.per_class[0].recall - 1.0).abs() < 1e-9);
        assert!((m.per_class[0].f1 - 0.8).abs() < 1e-9);
        assert!((m.per_class[1].precision - 1.0).abs() < 1e-9);
        assert!((m.per_class[1].recall - 0.5).abs() < 1e-9);
        assert!((m.per_class[1].f1 - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(m.per_class[1].support, 2);
        let expected_mean = (0.8 + 2.0 / 3.0 + 1.0) / 3.0;
        assert!((m.mean_f1 - expected_mean).abs() < 1e-9);
    }

    #[test]
    fn test_class_never_predicted_scores_zero() {
        let m = compute_classification_metrics(&[0, 0], &[0, 1], 2).unwrap();
        assert!((m.per_class[1].f1).abs() < 1e-9);
        assert!((m.accuracy - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(compute_classification_metrics(&[0], &[0, 1], 2).is_err());
        assert!(compute_classification_metrics(&[3], &[0], 2).is_err());
    }

    #[test]
    fn test_empty() {
        let m = compute_classification_metrics(&[], &[], 2).unwrap();
        assert!((m.accuracy).abs() < 1e-9);
        assert!((m.mean_f1).abs() < 1e-9);
    }

    #[test]
    fn test_accuracy() {
        assert!((accuracy(&[1, 2, 3, 4], &[1, 2, 0, 0]) - 0.5).abs() < 1e-9);
        assert!((accuracy(&[], &[])).abs() < 1e-9);
    }

    #[test]
    fn test_sample_variance() {
        assert_eq!(sample_variance(&[]), None);
        assert_eq!(sample_variance(&[0.7]), None);
        let var = sample_variance(&[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert!((var - 5.0 / 3.0).abs() < 1e-12);
        let var = sample_variance(&[0.5, 0.5, 0.5]).unwrap();
        assert!(var.abs() < 1e-12);
    }

    #[test]
    fn test_display() {
        let m = compute_classification_metrics(&[0, 1], &[0, 1], 2).unwrap();
        assert_eq!(m.to_string(), "acc=1.0000 mean_f1=1.0000 f1=[1.0000, 1.0000]");
    }
}
