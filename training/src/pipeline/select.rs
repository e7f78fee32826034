//! Active author selection.

use authorid_core::{ActiveAuthors, AuthorIdError, Result};
use std::collections::HashMap;

/// Pick the `amount` most frequent labels.
///
/// Authors are ordered by descending message count; equal counts keep the
/// order in which the authors first appear in `labels`. The returned order
/// is the class index mapping.
pub fn select_active_authors<S: AsRef<str>>(labels: &[S], amount: usize) -> Result<ActiveAuthors> {
    if amount < 2 {
        return Err(AuthorIdError::Config(format!(
            "amount must be at least 2, got {amount}"
        )));
    }

    let mut position: HashMap<&str, usize> = HashMap::new();
    let mut counts: Vec<(&str, usize)> = Vec::new();
    for label in labels {
        let label = label.as_ref();
        match position.get(label) {
            Some(&i) => counts[i].1 += 1,
            None => {
                position.insert(label, counts.len());
                counts.push((label, 1));
            }
        }
    }

    if counts.len() < amount {
        return Err(AuthorIdError::InsufficientAuthors {
            requested: amount,
            available: counts.len(),
        });
    }

    // stable sort keeps first-seen order among ties
    counts.sort_by(|a, b| b.1.cmp(&a.1));
    Ok(ActiveAuthors::new(
        counts
            .into_iter()
            .take(amount)
            .map(|(label, _)| label.to_string())
            .collect(),
    ))
}
