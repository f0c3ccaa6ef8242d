//! Run configuration and parsing of its textual forms

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone, Utc};
use std::time::Duration;
use tracing::warn;

use crate::error::ConfigError;
use crate::indicators::RSI_MINIMUM_ELEMENTS;
use crate::reporting::ReportWindow;
use crate::types::Instrument;

pub const DEFAULT_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_CONCURRENCY: usize = 5;
pub const DEFAULT_HISTORY_WINDOW: usize = 50;

/// Used when the kernel thread limit cannot be read
const FALLBACK_THREAD_CEILING: usize = 1024;
const THREADS_MAX_PATH: &str = "/proc/sys/kernel/threads-max";

/// When the scheduler loops stop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Deadline {
    #[default]
    Never,
    At(DateTime<Utc>),
}

impl Deadline {
    pub fn has_passed(&self, now: DateTime<Utc>) -> bool {
        match self {
            Deadline::Never => false,
            Deadline::At(at) => now > *at,
        }
    }
}

/// Everything the scheduler needs to build and run its work list
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub instruments: Vec<Instrument>,
    pub run_wild: bool,
    pub rumour_ratio: Option<f64>,
    pub concurrency: usize,
    pub interval: Duration,
    pub deadline: Deadline,
    pub history_window: usize,
    pub report_window: ReportWindow,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            instruments: Vec::new(),
            run_wild: false,
            rumour_ratio: None,
            concurrency: DEFAULT_CONCURRENCY,
            interval: Duration::from_secs(DEFAULT_INTERVAL_SECS),
            deadline: Deadline::Never,
            history_window: DEFAULT_HISTORY_WINDOW,
            report_window: ReportWindow::default(),
        }
    }
}

impl RunConfig {
    /// Startup checks. Wild mode may run without any configured instrument.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.instruments.is_empty() && !self.run_wild {
            return Err(ConfigError::NoInstruments);
        }
        if let Some(ratio) = self.rumour_ratio {
            check_rumour_ratio(ratio, &ratio.to_string())?;
        }
        if self.history_window == 0 {
            return Err(ConfigError::EmptyHistoryWindow);
        }
        if self.history_window < RSI_MINIMUM_ELEMENTS {
            warn!(
                history_window = self.history_window,
                minimum = RSI_MINIMUM_ELEMENTS,
                "History window too short for RSI, reports will never be produced"
            );
        }
        Ok(())
    }
}

/// Split a comma or newline separated list, dropping blanks and duplicates
pub fn parse_instruments(raw: &str) -> Vec<Instrument> {
    let mut seen = Vec::new();
    for symbol in raw.split([',', '\n']).map(str::trim).filter(|s| !s.is_empty()) {
        let instrument = Instrument::new(symbol);
        if !seen.contains(&instrument) {
            seen.push(instrument);
        }
    }
    seen
}

/// `"<count>.<unit>"` with unit second(s), minute(s) or hour(s).
/// Anything else falls back to the default interval.
pub fn parse_interval(raw: &str) -> Duration {
    match try_parse_interval(raw) {
        Some(interval) => interval,
        None => {
            warn!(
                interval = raw,
                default_secs = DEFAULT_INTERVAL_SECS,
                "Invalid interval, using default"
            );
            Duration::from_secs(DEFAULT_INTERVAL_SECS)
        }
    }
}

fn try_parse_interval(raw: &str) -> Option<Duration> {
    let (count, unit) = raw.trim().split_once('.')?;
    let count: u64 = count.parse().ok()?;
    let multiplier = match unit {
        "second" | "seconds" => 1,
        "minute" | "minutes" => 60,
        "hour" | "hours" => 3600,
        _ => return None,
    };
    Some(Duration::from_secs(count.checked_mul(multiplier)?))
}

/// RFC 3339, `YYYY-MM-DD HH:MM:SS` or `YYYY-MM-DD` (local time).
/// An unparseable value means no deadline.
pub fn parse_deadline(raw: &str) -> Deadline {
    let raw = raw.trim();
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Deadline::At(at.with_timezone(&Utc));
    }

    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        });

    match naive.and_then(|n| Local.from_local_datetime(&n).earliest()) {
        Some(local) => Deadline::At(local.with_timezone(&Utc)),
        None => {
            warn!(
                run_until = raw,
                "RUN_UNTIL was not a valid time format, running for unlimited time"
            );
            Deadline::Never
        }
    }
}

/// A float in `[0, 1)`
pub fn parse_rumour_ratio(raw: &str) -> Result<f64, ConfigError> {
    let ratio: f64 = raw
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidRumourRatio(raw.to_string()))?;
    check_rumour_ratio(ratio, raw)?;
    Ok(ratio)
}

fn check_rumour_ratio(ratio: f64, raw: &str) -> Result<(), ConfigError> {
    if !(0.0..1.0).contains(&ratio) {
        return Err(ConfigError::InvalidRumourRatio(raw.to_string()));
    }
    Ok(())
}

/// `"HH:MM-HH:MM"`
pub fn parse_report_window(raw: &str) -> Result<ReportWindow, ConfigError> {
    let invalid = || ConfigError::InvalidReportWindow(raw.to_string());

    let minute_of_day = |part: &str| -> Option<u32> {
        let (h, m) = part.trim().split_once(':')?;
        let (h, m): (u32, u32) = (h.parse().ok()?, m.parse().ok()?);
        (h < 24 && m < 60).then_some(h * 60 + m)
    };

    let (start, end) = raw.split_once('-').ok_or_else(invalid)?;
    let start = minute_of_day(start).ok_or_else(invalid)?;
    let end = minute_of_day(end).ok_or_else(invalid)?;
    Ok(ReportWindow::new(start, end))
}

/// Upper bound on concurrently running workers, from the kernel thread limit
pub fn platform_thread_ceiling() -> usize {
    std::fs::read_to_string(THREADS_MAX_PATH)
        .ok()
        .and_then(|s| s.trim().parse::<usize>().ok())
        .filter(|n| *n > 0)
        .unwrap_or(FALLBACK_THREAD_CEILING)
}

/// `min(requested, platform ceiling)`, at least one
pub fn effective_concurrency(requested: usize) -> usize {
    requested.clamp(1, platform_thread_ceiling().max(1))
}
