use std::collections::BTreeMap;

use serde::Serialize;

use crate::gaps::CoverageSummary;

/// Date sweep counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Phase1Stats {
    pub windows: usize,
    pub failed_windows: usize,
    pub pages: u64,
    pub records_received: usize,
    /// Items dropped because their ID could not be parsed.
    pub items_skipped: usize,
    pub unique_after_merge: usize,
    pub duration_secs: f64,
}

/// Backfill counters. Tombstones and failures are kept apart.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Phase2Stats {
    pub attempted: usize,
    pub fetched: usize,
    pub tombstoned: usize,
    pub failed: usize,
    pub failed_ids: Vec<String>,
    pub duration_secs: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TotalStats {
    pub records: usize,
    pub by_partition: BTreeMap<String, usize>,
    pub earliest_observed: Option<String>,
    pub latest_observed: Option<String>,
    pub duration_secs: f64,
}

/// Everything a session reports about itself, written as the stats artifact.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionStats {
    pub start_date: String,
    pub end_date: String,
    pub seeded: usize,
    pub phase1: Phase1Stats,
    pub gaps: Vec<CoverageSummary>,
    pub phase2: Phase2Stats,
    pub totals: TotalStats,
    pub interrupted: bool,
}

impl SessionStats {
    pub fn missing_total(&self) -> usize {
        self.gaps.iter().map(|g| g.missing).sum()
    }

    /// Windows or IDs left unresolved: transient failures, or a partition
    /// whose gap was too large to look up.
    pub fn has_unresolved(&self) -> bool {
        self.phase2.failed > 0 || self.phase1.failed_windows > 0 || self.gaps.iter().any(|g| g.over_limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_stats_serialize_shape() {
        let mut stats = SessionStats {
            start_date: "2026-01-01".into(),
            end_date: "2026-01-31".into(),
            ..Default::default()
        };
        stats.phase2.failed = 1;
        stats.phase2.failed_ids.push("7-2026".into());
        stats.totals.by_partition.insert("2026".into(), 9);

        let value = serde_json::to_value(&stats).unwrap();
        assert_eq!(value["phase2"]["failed_ids"], json!(["7-2026"]));
        assert_eq!(value["totals"]["by_partition"]["2026"], json!(9));
        assert_eq!(value["totals"]["earliest_observed"], json!(null));
        assert_eq!(value["interrupted"], json!(false));
        assert!(stats.has_unresolved());
    }
}
