//! Partition a submission against the reference snapshot.

use std::collections::HashSet;

use super::normalize::normalize_strict;

/// Outcome of checking one submission.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    pub total: usize,
    /// Already recorded in the reference set, in submission order.
    pub matched: Vec<String>,
    /// Not recorded yet, in submission order.
    pub unmatched: Vec<String>,
}

/// Route every identifier to `matched` or `unmatched` by exact key membership.
pub fn reconcile(submission: &[String], reference: &HashSet<String>) -> Reconciliation {
    let (matched, unmatched): (Vec<String>, Vec<String>) = submission
        .iter()
        .cloned()
        .partition(|id| reference.contains(&normalize_strict(id)));

    Reconciliation {
        total: submission.len(),
        matched,
        unmatched,
    }
}
