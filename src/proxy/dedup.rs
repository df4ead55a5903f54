//! Order-preserving candidate deduplication

use crate::proxy::models::{ProxyCandidate, ProxyKey};
use std::collections::HashSet;
use tracing::debug;

/// Collapse candidates sharing an identity key.
///
/// The first-seen candidate wins and the surviving order is the input
/// order. Idempotent: running the output through again changes nothing.
pub fn dedupe(candidates: Vec<ProxyCandidate>) -> Vec<ProxyCandidate> {
    let before = candidates.len();
    let mut seen: HashSet<ProxyKey> = HashSet::with_capacity(before);
    let unique: Vec<ProxyCandidate> = candidates
        .into_iter()
        .filter(|candidate| seen.insert(candidate.key()))
        .collect();
    if unique.len() < before {
        debug!(before, after = unique.len(), "collapsed duplicate candidates");
    }
    unique
}
