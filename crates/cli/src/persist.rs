//! JSON artifacts: the records file and the stats file.
//!
//! Both are written to a sibling temp file and renamed into place, so an
//! interrupted write never leaves a truncated artifact behind.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use georeport_reconcile::sink::RecordSink;
use georeport_reconcile::{FetchError, Record, SessionStats};
use serde::Serialize;
use serde_json::Value;

use crate::CliError;

pub struct JsonFileSink {
    records_path: PathBuf,
    stats_path: PathBuf,
}

impl JsonFileSink {
    pub fn new(records_path: PathBuf, stats_path: PathBuf) -> Self {
        Self { records_path, stats_path }
    }
}

impl RecordSink for JsonFileSink {
    fn persist(&mut self, records: &[Record], stats: &SessionStats) -> Result<(), FetchError> {
        write_json(&self.records_path, records)?;
        write_json(&self.stats_path, stats)?;
        log::info!(
            "wrote {} records to {} and stats to {}",
            records.len(),
            self.records_path.display(),
            self.stats_path.display()
        );
        Ok(())
    }
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), FetchError> {
    let persist_err = |what: &str, e: &dyn std::fmt::Display| {
        FetchError::Persist(format!("cannot {what} {}: {e}", path.display()))
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| persist_err("create directory for", &e))?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let file = File::create(&tmp).map_err(|e| persist_err("create", &e))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value).map_err(|e| persist_err("serialize", &e))?;
    writer.write_all(b"\n").map_err(|e| persist_err("write", &e))?;
    writer.flush().map_err(|e| persist_err("flush", &e))?;
    drop(writer);

    fs::rename(&tmp, path).map_err(|e| persist_err("replace", &e))
}

/// Records loaded from an existing artifact.
pub struct LoadedRecords {
    pub records: Vec<Record>,
    /// Entries without a usable record ID.
    pub skipped: usize,
}

pub fn read_records(path: &Path) -> Result<LoadedRecords, CliError> {
    let text = fs::read_to_string(path)
        .map_err(|e| CliError::io(format!("cannot read {}: {}", path.display(), e)))?;
    let items: Vec<Value> = serde_json::from_str(text.trim_start_matches('\u{feff}')).map_err(|e| {
        CliError::usage(format!("{} is not a JSON array of records: {}", path.display(), e))
    })?;

    let mut records = Vec::with_capacity(items.len());
    let mut skipped = 0;
    for item in items {
        match Record::from_value(item) {
            Ok(record) => records.push(record),
            Err(e) => {
                log::warn!("{}: skipping entry: {e}", path.display());
                skipped += 1;
            }
        }
    }
    Ok(LoadedRecords { records, skipped })
}
