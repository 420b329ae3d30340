use std::fmt;

use chrono::{Duration, NaiveDate};
use serde::Serialize;

use crate::error::FetchError;

/// Default sweep window length.
pub const DEFAULT_WINDOW_DAYS: u32 = 7;

/// Inclusive date interval for one date-range query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, FetchError> {
        if start > end {
            return Err(FetchError::Configuration(format!(
                "start date {start} is after end date {end}"
            )));
        }
        Ok(Self { start, end })
    }

    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }
}

impl fmt::Display for DateWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} to {}", self.start, self.end)
    }
}

/// Split `[start, end]` into consecutive windows of `days` days.
///
/// Windows tile the span exactly: no gaps, no overlap, the last one is
/// truncated to `end`.
pub fn plan_windows(start: NaiveDate, end: NaiveDate, days: u32) -> Result<Vec<DateWindow>, FetchError> {
    if days == 0 {
        return Err(FetchError::Configuration("window length must be at least one day".into()));
    }
    DateWindow::new(start, end)?;

    let step = Duration::days(i64::from(days) - 1);
    let mut windows = Vec::new();
    let mut current = start;
    loop {
        let window_end = current.checked_add_signed(step).map_or(end, |d| d.min(end));
        windows.push(DateWindow { start: current, end: window_end });
        match window_end.succ_opt() {
            Some(next) if window_end < end => current = next,
            _ => break,
        }
    }
    Ok(windows)
}
