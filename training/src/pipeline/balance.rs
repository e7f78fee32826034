//! Class balancing.

use authorid_core::{ActiveAuthors, MessageRecord};

/// Corpus where every active author contributes the same number of records.
#[derive(Debug, Clone, PartialEq)]
pub struct BalancedCorpus {
    /// Records grouped by author, groups in active author order.
    pub records: Vec<MessageRecord>,
    /// Records kept per author.
    pub least_count: usize,
}

/// Keep only active authors and truncate each to the smallest author's count.
///
/// Within an author the input order is preserved, so the caller decides which
/// records survive truncation by shuffling beforehand. The result has
/// exactly `actives.len() * least_count` records.
pub fn balance(records: &[MessageRecord], actives: &ActiveAuthors) -> BalancedCorpus {
    let mut groups: Vec<Vec<&MessageRecord>> = vec![Vec::new(); actives.len()];
    for record in records {
        if let Some(idx) = actives.index_of(&record.author) {
            groups[idx].push(record);
        }
    }

    let least_count = groups.iter().map(Vec::len).min().unwrap_or(0);
    let records = groups
        .into_iter()
        .flat_map(|group| group.into_iter().take(least_count).cloned())
        .collect();

    BalancedCorpus {
        records,
        least_count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corpus(counts: &[(&str, usize)]) -> Vec<MessageRecord> {
        counts
            .iter()
            .flat_map(|&(name, n)| {
                (0..n).map(move |i| MessageRecord::new(name, format!("{name}{i}")))
            })
            .collect()
    }

    fn actives(names: &[&str]) -> ActiveAuthors {
        ActiveAuthors::new(names.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn test_truncates_to_minimum_count() {
        let records = corpus(&[("a", 7), ("b", 4), ("c", 5)]);
        let balanced = balance(&records, &actives(&["a", "c", "b"]));
        assert_eq!(balanced.least_count, 4);
        assert_eq!(balanced.records.len(), 12);
        for name in ["a", "b", "c"] {
            let n = balanced.records.iter().filter(|r| r.author == name).count();
            assert_eq!(n, 4);
        }
    }

    #[test]
    fn test_groups_follow_active_order() {
        let records = corpus(&[("a", 2), ("b", 2)]);
        let balanced = balance(&records, &actives(&["b", "a"]));
        let authors: Vec<&str> = balanced.records.iter().map(|r| r.author.as_str()).collect();
        assert_eq!(authors, vec!["b", "b", "a", "a"]);
    }

    #[test]
    fn test_excludes_inactive_authors() {
        let records = corpus(&[("a", 10), ("b", 10), ("c", 3)]);
        let balanced = balance(&records, &actives(&["a", "b"]));
        assert_eq!(balanced.least_count, 10);
        assert_eq!(balanced.records.len(), 20);
        assert!(balanced.records.iter().all(|r| r.author != "c"));
    }

    #[test]
    fn test_keeps_earliest_records_per_author() {
        let records = corpus(&[("a", 3), ("b", 1)]);
        let balanced = balance(&records, &actives(&["a", "b"]));
        let texts: Vec<&str> = balanced.records.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(texts, vec!["a0", "b0"]);
    }
}
