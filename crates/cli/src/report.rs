//! Human-readable summaries for `fetch` and `coverage`.

use std::fmt::Write as _;
use std::path::Path;

use georeport_reconcile::gaps::CoverageSummary;
use georeport_reconcile::SessionStats;
use serde::Serialize;

/// Final `fetch` summary, printed on stderr.
pub fn fetch_summary(stats: &SessionStats, records_path: &Path, stats_path: &Path) -> String {
    let mut out = String::new();
    let p1 = &stats.phase1;
    let p2 = &stats.phase2;
    let totals = &stats.totals;

    let _ = writeln!(out, "Fetch {} to {}", stats.start_date, stats.end_date);
    if stats.seeded > 0 {
        let _ = writeln!(out, "  resumed from:   {} records", stats.seeded);
    }
    let _ = writeln!(
        out,
        "  date sweep:     {} records in {} windows ({} pages, {} failed) {:.1}s",
        p1.records_received, p1.windows, p1.pages, p1.failed_windows, p1.duration_secs
    );

    let missing = stats.missing_total();
    if missing == 0 {
        let _ = writeln!(out, "  gaps:           none, date sweep obtained full coverage");
    } else {
        let _ = writeln!(
            out,
            "  backfill:       {} of {} missing IDs fetched, {} deleted, {} failed {:.1}s",
            p2.fetched, missing, p2.tombstoned, p2.failed, p2.duration_secs
        );
    }

    let _ = writeln!(out, "  total:          {} records in {:.1}s", totals.records, totals.duration_secs);
    if let (Some(earliest), Some(latest)) = (&totals.earliest_observed, &totals.latest_observed) {
        let _ = writeln!(out, "  observed range: {earliest} to {latest}");
    }
    for (partition, count) in &totals.by_partition {
        let _ = writeln!(out, "    {partition}: {count}");
    }

    let _ = writeln!(out, "  records:        {}", records_path.display());
    let _ = write!(out, "  stats:          {}", stats_path.display());
    if stats.interrupted {
        let _ = write!(out, "\n  (interrupted: partial results)");
    }
    out
}

/// Machine-readable `coverage --json` output.
#[derive(Debug, Serialize)]
pub struct CoverageOutput<'a> {
    pub file: String,
    pub records: usize,
    pub skipped: usize,
    pub total_missing: usize,
    pub partitions: &'a [CoverageSummary],
}

pub fn coverage_table(partitions: &[CoverageSummary]) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<10} {:>9} {:>9} {:>9} {:>9}",
        "partition", "records", "highest", "missing", "coverage"
    );
    for p in partitions {
        let _ = write!(
            out,
            "{:<10} {:>9} {:>9} {:>9} {:>8.1}%",
            p.partition, p.observed, p.max_observed, p.missing, p.coverage_pct
        );
        if p.over_limit {
            let _ = write!(out, "  (gap too large, not backfilled)");
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_summary_reports_full_coverage() {
        let mut stats = SessionStats {
            start_date: "2026-01-01".into(),
            end_date: "2026-01-07".into(),
            ..Default::default()
        };
        stats.totals.records = 3;
        stats.totals.by_partition.insert("2026".into(), 3);

        let text = fetch_summary(&stats, &PathBuf::from("a.json"), &PathBuf::from("b.json"));
        assert!(text.contains("full coverage"));
        assert!(text.contains("2026: 3"));
        assert!(!text.contains("interrupted"));
    }

    #[test]
    fn test_coverage_table_rows() {
        let rows = vec![CoverageSummary {
            partition: "2025".into(),
            observed: 8,
            max_observed: 10,
            missing: 2,
            coverage_pct: 80.0,
            over_limit: false,
        }];
        let table = coverage_table(&rows);
        let line = table.lines().nth(1).unwrap();
        assert!(line.starts_with("2025"));
        assert!(line.ends_with("80.0%"));
    }

    #[test]
    fn test_coverage_table_flags_oversized_gap() {
        let rows = vec![CoverageSummary {
            partition: "2026".into(),
            observed: 3,
            max_observed: 4_000_000_000,
            missing: 3_999_999_997,
            coverage_pct: 0.0,
            over_limit: true,
        }];
        let table = coverage_table(&rows);
        assert!(table.lines().nth(1).unwrap().ends_with("(gap too large, not backfilled)"));
    }
}
