//! Two-tier performance classification of working proxies
//!
//! The working set is ranked twice, by latency and by best transfer rate,
//! and split into a realtime half and a streaming half. Candidates that make
//! the top half of both rankings are contested and go to the tier where they
//! rank better. No I/O here; ordering within the output follows input order.

use crate::proxy::models::{ClassifiedProxies, ClassifiedProxy, Tier, ValidatedProxy};
use std::cmp::Ordering;
use std::collections::HashSet;
use tracing::debug;

/// Partition working proxies into realtime and streaming tiers.
///
/// Every input lands in exactly one tier and the two tiers together cover
/// the whole input. With an odd count the streaming tier ends up one larger,
/// since realtime is capped at `n / 2`. Ties between equal measurements
/// resolve by input order (the sorts are stable), so the split is
/// deterministic for any input.
pub fn classify(working: Vec<ValidatedProxy>) -> ClassifiedProxies {
    let n = working.len();
    if n == 0 {
        return ClassifiedProxies::default();
    }

    let mut by_latency: Vec<usize> = (0..n).collect();
    by_latency.sort_by(|&a, &b| {
        working[a]
            .result
            .latency
            .partial_cmp(&working[b].result.latency)
            .unwrap_or(Ordering::Equal)
    });

    let mut by_throughput: Vec<usize> = (0..n).collect();
    by_throughput.sort_by(|&a, &b| {
        working[b]
            .result
            .best_throughput()
            .partial_cmp(&working[a].result.best_throughput())
            .unwrap_or(Ordering::Equal)
    });

    let mut latency_rank = vec![0usize; n];
    for (rank, &index) in by_latency.iter().enumerate() {
        latency_rank[index] = rank;
    }
    let mut throughput_rank = vec![0usize; n];
    for (rank, &index) in by_throughput.iter().enumerate() {
        throughput_rank[index] = rank;
    }

    let mid = n / 2;
    let realtime_top: HashSet<usize> = by_latency[..mid].iter().copied().collect();
    let streaming_top: HashSet<usize> = by_throughput[..mid].iter().copied().collect();

    // Contested candidates go where their rank index is lower; an exact tie
    // reads as streaming.
    let mut assigned: Vec<Option<Tier>> = vec![None; n];
    let mut realtime_count = 0;
    for index in 0..n {
        if realtime_top.contains(&index) && streaming_top.contains(&index) {
            if latency_rank[index] < throughput_rank[index] {
                assigned[index] = Some(Tier::Realtime);
                realtime_count += 1;
            } else {
                assigned[index] = Some(Tier::Streaming);
            }
        }
    }

    // Uncontested candidates fill realtime up to the midpoint in input
    // order; streaming absorbs the rest.
    for slot in assigned.iter_mut() {
        if slot.is_none() {
            if realtime_count < mid {
                *slot = Some(Tier::Realtime);
                realtime_count += 1;
            } else {
                *slot = Some(Tier::Streaming);
            }
        }
    }

    let mut classified = ClassifiedProxies::default();
    for (index, validated) in working.into_iter().enumerate() {
        let tier = assigned[index].unwrap_or(Tier::Streaming);
        let entry = ClassifiedProxy {
            candidate: validated.candidate,
            result: validated.result,
            tier,
        };
        match tier {
            Tier::Realtime => classified.realtime.push(entry),
            Tier::Streaming => classified.streaming.push(entry),
        }
    }

    debug!(
        realtime = classified.realtime.len(),
        streaming = classified.streaming.len(),
        "classified working proxies"
    );
    classified
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::models::{ProxyCandidate, ValidationResult};

    fn validated(host: &str, latency: f64, download_bps: f64) -> ValidatedProxy {
        ValidatedProxy::new(
            ProxyCandidate::http(host, 8080),
            ValidationResult::working(latency).with_throughput(download_bps, 0.0),
        )
    }

    fn hosts(entries: &[ClassifiedProxy]) -> Vec<&str> {
        entries.iter().map(|e| e.candidate.host.as_str()).collect()
    }

    #[test]
    fn test_classify_empty_input() {
        let classified = classify(Vec::new());
        assert!(classified.is_empty());
    }

    #[test]
    fn test_classify_balances_without_overlap() {
        let working = vec![
            validated("10.0.0.1", 0.01, 10.0),
            validated("10.0.0.2", 0.02, 20.0),
            validated("10.0.0.3", 0.03, 1000.0),
            validated("10.0.0.4", 0.04, 2000.0),
        ];

        let classified = classify(working);
        assert_eq!(classified.realtime.len(), 2);
        assert_eq!(classified.streaming.len(), 2);
        assert_eq!(hosts(&classified.realtime), vec!["10.0.0.1", "10.0.0.2"]);
        assert_eq!(hosts(&classified.streaming), vec!["10.0.0.3", "10.0.0.4"]);
    }

    #[test]
    fn test_classify_total_and_disjoint() {
        let working = vec![
            validated("10.0.0.1", 0.05, 500.0),
            validated("10.0.0.2", 0.01, 4000.0),
            validated("10.0.0.3", 0.03, 100.0),
            validated("10.0.0.4", 0.02, 300.0),
            validated("10.0.0.5", 0.04, 2000.0),
            validated("10.0.0.6", 0.06, 1000.0),
        ];
        let n = working.len();

        let classified = classify(working);
        assert_eq!(classified.total(), n);

        let realtime_keys: std::collections::HashSet<_> = classified
            .realtime
            .iter()
            .map(|e| e.candidate.key())
            .collect();
        assert!(classified
            .streaming
            .iter()
            .all(|e| !realtime_keys.contains(&e.candidate.key())));
    }

    #[test]
    fn test_classify_odd_count_grows_streaming() {
        let working = vec![
            validated("10.0.0.1", 0.01, 10.0),
            validated("10.0.0.2", 0.02, 20.0),
            validated("10.0.0.3", 0.03, 30.0),
            validated("10.0.0.4", 0.04, 4000.0),
            validated("10.0.0.5", 0.05, 5000.0),
        ];

        let classified = classify(working);
        assert_eq!(classified.realtime.len(), 2);
        assert_eq!(classified.streaming.len(), 3);
    }

    #[test]
    fn test_classify_single_entry_goes_streaming() {
        let classified = classify(vec![validated("10.0.0.1", 0.01, 100.0)]);
        assert!(classified.realtime.is_empty());
        assert_eq!(classified.streaming.len(), 1);
    }

    #[test]
    fn test_contested_candidate_follows_better_rank() {
        // 10.0.0.1 leads the latency ranking but is second for throughput,
        // so the contest resolves to realtime.
        let working = vec![
            validated("10.0.0.1", 0.001, 100.0),
            validated("10.0.0.2", 0.05, 5000.0),
            validated("10.0.0.3", 0.02, 10.0),
            validated("10.0.0.4", 0.03, 20.0),
        ];

        let classified = classify(working);
        assert!(hosts(&classified.realtime).contains(&"10.0.0.1"));
    }

    #[test]
    fn test_contested_tie_resolves_to_streaming() {
        // 10.0.0.1 tops both rankings, so both rank indices are zero and
        // the tie goes to streaming.
        let working = vec![
            validated("10.0.0.1", 0.001, 5000.0),
            validated("10.0.0.2", 0.02, 10.0),
            validated("10.0.0.3", 0.03, 20.0),
            validated("10.0.0.4", 0.04, 30.0),
        ];

        let classified = classify(working);
        assert!(hosts(&classified.streaming).contains(&"10.0.0.1"));
        assert_eq!(classified.realtime.len(), 2);
        assert_eq!(classified.streaming.len(), 2);
    }

    #[test]
    fn test_equal_measurements_split_deterministically() {
        let working = vec![
            validated("10.0.0.1", 0.02, 100.0),
            validated("10.0.0.2", 0.02, 100.0),
            validated("10.0.0.3", 0.02, 100.0),
            validated("10.0.0.4", 0.02, 100.0),
        ];

        let first = classify(working.clone());
        let second = classify(working);
        assert_eq!(first, second);
        assert_eq!(first.total(), 4);
        assert_eq!(first.realtime.len(), 2);
    }
}
