//! Gap analysis over the composite ID space.
//!
//! The registry assigns sequence numbers per partition contiguously from 1.
//! Anything below a partition's highest observed sequence that is not in the
//! store is either a record the date sweep missed or a tombstone; only a
//! point lookup can tell which.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::model::RecordId;
use crate::store::RecordStore;

/// Gaps per partition above which missing IDs are counted but not listed.
///
/// A single bogus sequence number (say `4000000000-2026`) would otherwise
/// expand into billions of lookups.
pub const DEFAULT_MAX_GAP: usize = 100_000;

/// Derived coverage for one partition. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionCoverage {
    pub partition: String,
    pub observed: usize,
    pub max_observed: u32,
    /// Missing sequence numbers. Left empty when `over_limit` is set.
    pub missing: BTreeSet<u32>,
    /// `max_observed - observed`, whether or not it was enumerated.
    pub missing_count: usize,
    /// The gap exceeded the limit, so `missing` was not enumerated.
    pub over_limit: bool,
}

impl PartitionCoverage {
    /// Size of the expected range `1..=max_observed`.
    pub fn expected(&self) -> u32 {
        self.max_observed
    }

    pub fn coverage_pct(&self) -> f64 {
        if self.max_observed == 0 {
            return 100.0;
        }
        self.observed as f64 / self.max_observed as f64 * 100.0
    }

    pub fn is_complete(&self) -> bool {
        self.missing_count == 0
    }
}

/// Per-partition gaps, keyed and iterated in partition order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GapReport {
    partitions: BTreeMap<String, PartitionCoverage>,
}

impl GapReport {
    pub fn partitions(&self) -> impl Iterator<Item = &PartitionCoverage> {
        self.partitions.values()
    }

    pub fn partition(&self, key: &str) -> Option<&PartitionCoverage> {
        self.partitions.get(key)
    }

    /// `partition -> sorted missing sequence numbers`.
    pub fn missing_by_partition(&self) -> BTreeMap<&str, &BTreeSet<u32>> {
        self.partitions
            .iter()
            .map(|(k, cov)| (k.as_str(), &cov.missing))
            .collect()
    }

    /// All missing IDs, partition by partition, ascending sequence.
    pub fn missing_ids(&self) -> Vec<RecordId> {
        self.partitions
            .values()
            .flat_map(|cov| cov.missing.iter().map(move |seq| RecordId::new(*seq, cov.partition.clone())))
            .collect()
    }

    pub fn total_missing(&self) -> usize {
        self.partitions.values().map(|c| c.missing_count).sum()
    }

    /// Partitions whose gaps were too large to enumerate.
    pub fn over_limit(&self) -> impl Iterator<Item = &PartitionCoverage> {
        self.partitions.values().filter(|c| c.over_limit)
    }

    /// True when the date sweep alone covered every expected ID.
    pub fn is_complete(&self) -> bool {
        self.total_missing() == 0
    }

    /// True when there are enumerated IDs left to look up.
    pub fn has_lookups(&self) -> bool {
        self.partitions.values().any(|c| !c.missing.is_empty())
    }

    pub fn summaries(&self) -> Vec<CoverageSummary> {
        self.partitions.values().map(CoverageSummary::from).collect()
    }
}

/// Serializable view of one partition's coverage for the stats artifact.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoverageSummary {
    pub partition: String,
    pub observed: usize,
    pub max_observed: u32,
    pub missing: usize,
    pub coverage_pct: f64,
    /// Missing IDs were not looked up because the gap was over the limit.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub over_limit: bool,
}

impl From<&PartitionCoverage> for CoverageSummary {
    fn from(cov: &PartitionCoverage) -> Self {
        Self {
            partition: cov.partition.clone(),
            observed: cov.observed,
            max_observed: cov.max_observed,
            missing: cov.missing_count,
            coverage_pct: (cov.coverage_pct() * 10.0).round() / 10.0,
            over_limit: cov.over_limit,
        }
    }
}

/// Compute gaps from the store's current keys with [`DEFAULT_MAX_GAP`].
pub fn analyze(store: &RecordStore) -> GapReport {
    analyze_ids(store.ids())
}

/// Compute gaps, enumerating at most `max_gap` missing IDs per partition.
pub fn analyze_with_limit(store: &RecordStore, max_gap: usize) -> GapReport {
    analyze_ids_with_limit(store.ids(), max_gap)
}

/// Same as [`analyze`], over any ID set.
pub fn analyze_ids<'a>(ids: impl IntoIterator<Item = &'a RecordId>) -> GapReport {
    analyze_ids_with_limit(ids, DEFAULT_MAX_GAP)
}

pub fn analyze_ids_with_limit<'a>(ids: impl IntoIterator<Item = &'a RecordId>, max_gap: usize) -> GapReport {
    let mut observed: BTreeMap<&str, BTreeSet<u32>> = BTreeMap::new();
    for id in ids {
        observed.entry(id.partition()).or_default().insert(id.sequence());
    }

    let mut partitions = BTreeMap::new();
    for (partition, seen) in observed {
        let Some(&max_observed) = seen.iter().next_back() else {
            continue;
        };
        // `seen` holds distinct values in 1..=max_observed.
        let missing_count = max_observed as usize - seen.len();
        let over_limit = missing_count > max_gap;
        let missing: BTreeSet<u32> = if over_limit {
            BTreeSet::new()
        } else {
            (1..=max_observed).filter(|seq| !seen.contains(seq)).collect()
        };
        partitions.insert(
            partition.to_string(),
            PartitionCoverage {
                partition: partition.to_string(),
                observed: seen.len(),
                max_observed,
                missing,
                missing_count,
                over_limit,
            },
        );
    }

    GapReport { partitions }
}
