// georeport CLI - complete exports from Open311 GeoReport v2 registries
// Two-phase fetch: date-range sweep, then point lookups for ID gaps

mod exit_codes;
mod persist;
mod report;
mod signal;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use georeport_config::{ConfigError, Settings};
use georeport_reconcile::{gaps, FetchError, RecordId, RecordStore, Registry, ReconciliationSession, SessionOptions};
use georeport_registry::{ClientOptions, RegistryClient, USER_AGENT};

use exit_codes::{
    fetch_exit_code, EXIT_FETCH_INCOMPLETE, EXIT_FETCH_NOT_FOUND, EXIT_INTERRUPTED, EXIT_IO, EXIT_SUCCESS, EXIT_USAGE,
};
use persist::JsonFileSink;

#[derive(Parser)]
#[command(name = "georeport")]
#[command(about = "Complete, de-duplicated exports from Open311 GeoReport v2 registries")]
#[command(long_version = long_version())]
#[command(version)]
struct Cli {
    /// Only log warnings and errors
    #[arg(long, short = 'q', global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Log per-page and per-lookup detail
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sweep a date range, backfill ID gaps, write records and stats
    #[command(after_help = "\
Examples:
  georeport fetch --from 2025-01-01
  georeport fetch --from 2025-01-01 --to 2025-12-31 --out events-2025.json
  georeport fetch --from 2025-01-01 --resume
  georeport fetch --from 2026-01-01 --base-url https://example.org/georeport/v2 --workers 4

Exit codes:
  0    all windows and all missing IDs resolved
  56   artifacts written, but some windows or IDs failed (rerun with --resume)
  130  interrupted; partial results written")]
    Fetch {
        /// First day of the range (YYYY-MM-DD)
        #[arg(long)]
        from: String,

        /// Last day of the range, inclusive (YYYY-MM-DD, default: today)
        #[arg(long)]
        to: Option<String>,

        /// Settings file (default: <config dir>/georeport/config.toml)
        #[arg(long, env = "GEOREPORT_CONFIG")]
        config: Option<PathBuf>,

        /// Registry base URL
        #[arg(long, env = "GEOREPORT_BASE_URL")]
        base_url: Option<String>,

        /// Concurrent requests for both phases
        #[arg(long)]
        workers: Option<usize>,

        /// Days per date-range window
        #[arg(long)]
        window_days: Option<u32>,

        /// Minimum milliseconds between point lookups
        #[arg(long)]
        lookup_interval_ms: Option<u64>,

        /// Retries for 429, 5xx and network errors
        #[arg(long)]
        max_retries: Option<u32>,

        /// Records artifact path
        #[arg(long, short = 'o')]
        out: Option<PathBuf>,

        /// Stats artifact path
        #[arg(long)]
        stats: Option<PathBuf>,

        /// Seed from an existing records artifact before sweeping
        #[arg(long)]
        resume: bool,
    },

    /// Report per-partition ID coverage of a saved records artifact
    #[command(after_help = "\
Examples:
  georeport coverage all_events.json
  georeport coverage all_events.json --json | jq '.total_missing'")]
    Coverage {
        /// Records artifact written by `fetch`
        file: PathBuf,

        /// Output JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Look up one record by ID and print it as JSON
    #[command(after_help = "\
Examples:
  georeport lookup 4521-2026
  georeport lookup 17-2025 --base-url https://example.org/georeport/v2

Exits 50 if the registry has no record with that ID.")]
    Lookup {
        /// Record ID (SEQUENCE-PARTITION, e.g. 4521-2026)
        id: String,

        /// Settings file (default: <config dir>/georeport/config.toml)
        #[arg(long, env = "GEOREPORT_CONFIG")]
        config: Option<PathBuf>,

        /// Registry base URL
        #[arg(long, env = "GEOREPORT_BASE_URL")]
        base_url: Option<String>,
    },
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug)]
pub struct CliError {
    pub code: u8,
    pub message: String,
    pub hint: Option<String>,
}

impl CliError {
    pub fn usage(msg: impl Into<String>) -> Self {
        Self { code: EXIT_USAGE, message: msg.into(), hint: None }
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Self { code: EXIT_IO, message: msg.into(), hint: None }
    }

    pub fn fetch(err: FetchError) -> Self {
        let hint = match &err {
            FetchError::Network(_) => Some("check connectivity to the registry or raise --max-retries".to_string()),
            FetchError::Upstream { status: 429, .. } => Some("lower --workers or raise --lookup-interval-ms".to_string()),
            _ => None,
        };
        Self { code: fetch_exit_code(&err), message: err.to_string(), hint }
    }

    pub fn config(err: ConfigError) -> Self {
        let code = match err {
            ConfigError::Io { .. } => EXIT_IO,
            _ => EXIT_USAGE,
        };
        Self { code, message: err.to_string(), hint: None }
    }

    /// Add a hint to an existing error.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

// ============================================================================
// fetch
// ============================================================================

struct FetchOverrides {
    base_url: Option<String>,
    workers: Option<usize>,
    window_days: Option<u32>,
    lookup_interval_ms: Option<u64>,
    max_retries: Option<u32>,
    out: Option<PathBuf>,
    stats: Option<PathBuf>,
}

impl FetchOverrides {
    fn apply(self, settings: &mut Settings) {
        if let Some(url) = self.base_url {
            settings.registry.base_url = url;
        }
        if let Some(n) = self.workers {
            settings.sweep.workers = n;
            settings.backfill.workers = n;
        }
        if let Some(days) = self.window_days {
            settings.sweep.window_days = days;
        }
        if let Some(ms) = self.lookup_interval_ms {
            settings.backfill.lookup_interval_ms = ms;
        }
        if let Some(n) = self.max_retries {
            settings.registry.max_retries = n;
        }
        if let Some(path) = self.out {
            settings.output.records = path;
        }
        if let Some(path) = self.stats {
            settings.output.stats = path;
        }
    }
}

fn load_settings(config: Option<&Path>, base_url: Option<String>) -> Result<Settings, CliError> {
    let mut settings = Settings::load(config).map_err(CliError::config)?;
    if let Some(url) = base_url {
        settings.registry.base_url = url;
    }
    settings.validate().map_err(CliError::config)?;
    Ok(settings)
}

fn client_for(settings: &Settings) -> Result<RegistryClient, CliError> {
    RegistryClient::new(ClientOptions {
        base_url: settings.registry.base_url.clone(),
        timeout: Duration::from_secs(settings.registry.timeout_secs),
        max_retries: settings.registry.max_retries,
        retry_backoff: Duration::from_millis(settings.registry.retry_backoff_ms),
        max_retry_after: Duration::from_secs(settings.registry.max_retry_after_secs),
        user_agent: USER_AGENT.to_string(),
    })
    .map_err(CliError::fetch)
}

fn parse_date(value: &str, flag: &str) -> Result<NaiveDate, CliError> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|e| CliError::usage(format!("invalid {flag} date {value:?}: {e}")).with_hint("use YYYY-MM-DD"))
}

fn parse_date_range(from: &str, to: Option<&str>) -> Result<(NaiveDate, NaiveDate), CliError> {
    let from_date = parse_date(from, "--from")?;
    let to_date = match to {
        Some(to) => parse_date(to, "--to")?,
        None => chrono::Local::now().date_naive(),
    };
    if from_date > to_date {
        return Err(CliError::usage(format!(
            "--from ({from_date}) must not be after --to ({to_date})"
        )));
    }
    Ok((from_date, to_date))
}

fn cmd_fetch(
    from: String,
    to: Option<String>,
    config: Option<PathBuf>,
    overrides: FetchOverrides,
    resume: bool,
    quiet: bool,
) -> Result<(), CliError> {
    let (start, end) = parse_date_range(&from, to.as_deref())?;

    let mut settings = Settings::load(config.as_deref()).map_err(CliError::config)?;
    overrides.apply(&mut settings);
    settings.validate().map_err(CliError::config)?;

    let cancel = signal::install_cancel_handler()?;
    let client = client_for(&settings)?.with_cancel_token(cancel.clone());
    let options = SessionOptions {
        window_days: settings.sweep.window_days,
        sweep_workers: settings.sweep.workers,
        lookup_workers: settings.backfill.workers,
        batch_size: settings.backfill.batch_size,
        lookup_interval: Duration::from_millis(settings.backfill.lookup_interval_ms),
        max_gap: settings.backfill.max_gap,
    };

    let mut session = ReconciliationSession::new(&client, start, end, options)
        .map_err(CliError::fetch)?
        .with_cancel_token(cancel);

    let records_path = settings.output.records.clone();
    let stats_path = settings.output.stats.clone();

    if resume {
        if records_path.exists() {
            let loaded = persist::read_records(&records_path)?;
            let added = session.seed(loaded.records);
            log::info!("resuming from {}: {added} records", records_path.display());
        } else {
            log::warn!("--resume: {} does not exist, starting fresh", records_path.display());
        }
    }

    log::info!(
        "fetching {start} to {end} from {} ({} window(s))",
        client.base_url(),
        session.windows().len()
    );

    let mut sink = JsonFileSink::new(records_path.clone(), stats_path.clone());
    let stats = session.run(&mut sink).map_err(CliError::fetch)?;

    if !quiet {
        eprintln!("{}", report::fetch_summary(&stats, &records_path, &stats_path));
    }

    if stats.interrupted {
        return Err(CliError {
            code: EXIT_INTERRUPTED,
            message: format!("interrupted; partial results written to {}", records_path.display()),
            hint: Some("rerun with --resume to continue".to_string()),
        });
    }
    if stats.has_unresolved() {
        return Err(CliError {
            code: EXIT_FETCH_INCOMPLETE,
            message: format!(
                "{} window(s) and {} ID(s) could not be fetched",
                stats.phase1.failed_windows, stats.phase2.failed
            ),
            hint: Some("rerun with --resume to retry".to_string()),
        });
    }
    Ok(())
}

// ============================================================================
// coverage
// ============================================================================

fn cmd_coverage(file: PathBuf, json: bool) -> Result<(), CliError> {
    let loaded = persist::read_records(&file)?;
    let mut store = RecordStore::new();
    store.merge_all(loaded.records);

    let report = gaps::analyze(&store);
    let partitions = report.summaries();

    if json {
        let output = report::CoverageOutput {
            file: file.display().to_string(),
            records: store.len(),
            skipped: loaded.skipped,
            total_missing: report.total_missing(),
            partitions: &partitions,
        };
        let text = serde_json::to_string_pretty(&output)
            .map_err(|e| CliError::io(format!("cannot serialize coverage: {e}")))?;
        println!("{text}");
    } else {
        print!("{}", report::coverage_table(&partitions));
        println!("{} records, {} missing IDs", store.len(), report.total_missing());
    }
    Ok(())
}

// ============================================================================
// lookup
// ============================================================================

fn cmd_lookup(id: String, config: Option<PathBuf>, base_url: Option<String>) -> Result<(), CliError> {
    let id: RecordId = id
        .parse()
        .map_err(|e: FetchError| CliError::usage(e.to_string()).with_hint("IDs look like 4521-2026"))?;

    let settings = load_settings(config.as_deref(), base_url)?;
    let client = client_for(&settings)?;

    match client.fetch_by_id(&id) {
        Ok(Some(record)) => {
            let text = serde_json::to_string_pretty(&record)
                .map_err(|e| CliError::io(format!("cannot serialize record: {e}")))?;
            println!("{text}");
            Ok(())
        }
        Ok(None) | Err(FetchError::NotFound) => Err(CliError {
            code: EXIT_FETCH_NOT_FOUND,
            message: format!("{id} not found"),
            hint: Some("the record was deleted or never issued".to_string()),
        }),
        Err(e) => Err(CliError::fetch(e)),
    }
}

// ============================================================================
// main
// ============================================================================

fn init_logging(quiet: bool, verbose: bool) {
    let default_level = if verbose {
        "debug"
    } else if quiet {
        "warn"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp(None)
        .format_target(false)
        .init();
}

fn long_version() -> &'static str {
    concat!(
        env!("CARGO_PKG_VERSION"),
        " (", env!("GIT_COMMIT_HASH"), ")",
        "\nengine:  georeport-reconcile ", env!("CARGO_PKG_VERSION"),
        "\ntarget:  ", env!("TARGET"),
    )
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.quiet, cli.verbose);

    let result = match cli.command {
        Commands::Fetch {
            from,
            to,
            config,
            base_url,
            workers,
            window_days,
            lookup_interval_ms,
            max_retries,
            out,
            stats,
            resume,
        } => {
            let overrides = FetchOverrides { base_url, workers, window_days, lookup_interval_ms, max_retries, out, stats };
            cmd_fetch(from, to, config, overrides, resume, cli.quiet)
        }
        Commands::Coverage { file, json } => cmd_coverage(file, json),
        Commands::Lookup { id, config, base_url } => cmd_lookup(id, config, base_url),
    };

    match result {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(CliError { code, message, hint }) => {
            if !message.is_empty() {
                eprintln!("error: {}", message);
            }
            if let Some(hint) = hint {
                eprintln!("hint:  {}", hint);
            }
            ExitCode::from(code)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_date_range() {
        let (from, to) = parse_date_range("2026-01-01", Some("2026-01-31")).unwrap();
        assert_eq!(from.to_string(), "2026-01-01");
        assert_eq!(to.to_string(), "2026-01-31");

        // Single day is a valid range.
        assert!(parse_date_range("2026-01-01", Some("2026-01-01")).is_ok());
    }

    #[test]
    fn test_parse_date_range_errors() {
        let err = parse_date_range("2026-02-01", Some("2026-01-01")).unwrap_err();
        assert_eq!(err.code, EXIT_USAGE);

        let err = parse_date_range("01/02/2026", None).unwrap_err();
        assert!(err.message.contains("--from"));
        assert_eq!(err.hint.as_deref(), Some("use YYYY-MM-DD"));
    }

    #[test]
    fn test_overrides_apply_to_both_phases() {
        let mut settings = Settings::default();
        FetchOverrides {
            base_url: Some("http://localhost:9999".into()),
            workers: Some(3),
            window_days: None,
            lookup_interval_ms: Some(0),
            max_retries: Some(0),
            out: Some(PathBuf::from("x.json")),
            stats: None,
        }
        .apply(&mut settings);

        assert_eq!(settings.sweep.workers, 3);
        assert_eq!(settings.backfill.workers, 3);
        assert_eq!(settings.sweep.window_days, 7);
        assert_eq!(settings.backfill.lookup_interval_ms, 0);
        assert_eq!(settings.registry.max_retries, 0);
        assert_eq!(settings.output.records, PathBuf::from("x.json"));
        assert_eq!(settings.output.stats, PathBuf::from("fetch_stats.json"));
    }

    #[test]
    fn test_fetch_error_hints() {
        let err = CliError::fetch(FetchError::Upstream { status: 429, message: String::new() });
        assert_eq!(err.code, exit_codes::EXIT_FETCH_RATE_LIMIT);
        assert!(err.hint.unwrap().contains("--workers"));
    }
}
