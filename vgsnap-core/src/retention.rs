//! Retention of existing clones.
//!
//! Given the clones already on the control plane and a "keep N" rule, decides
//! which ones to evict before a new clone is taken. Pure: the orchestrator does
//! the deleting.

use crate::types::CloneIdentifier;

/// Select the clones to evict so that at most `keep` of `existing` remain.
///
/// The oldest identifiers (by embedded timestamp, ties broken by identifier
/// string) are selected first, and the result is returned oldest-first so that
/// deletions proceed in creation order. Duplicates in the input are considered
/// once. The result does not depend on the order of `existing`.
#[must_use]
pub fn select_for_eviction(existing: &[CloneIdentifier], keep: usize) -> Vec<CloneIdentifier> {
    let mut sorted: Vec<CloneIdentifier> = existing.to_vec();
    sorted.sort();
    sorted.dedup();

    let excess = sorted.len().saturating_sub(keep);
    sorted.truncate(excess);
    sorted
}

/// Identifiers of `environment` found among arbitrary volume-group names, oldest first.
pub fn clones_in_namespace<'a>(
    names: impl IntoIterator<Item = &'a str>,
    environment: &str,
) -> Vec<CloneIdentifier> {
    let mut ids: Vec<CloneIdentifier> = names
        .into_iter()
        .filter_map(CloneIdentifier::parse)
        .filter(|id| id.belongs_to(environment))
        .collect();
    ids.sort();
    ids
}
