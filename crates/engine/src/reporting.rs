//! Daily reporting gate and report snapshots
//!
//! The gate opens once per calendar day when the local clock enters the
//! configured report window. While it is open every analysis pass persists a
//! [`ReportRecord`]; the worker that sees the day's record count reach the
//! active worker count completes the day and sends the batch.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::Serialize;
use tracing::info;

use crate::types::{AnalysisResult, Instrument, ReportRecord};

/// Slices of the window treated as the first and last trading hour
const MARKET_HOURS: usize = 8;

const MINUTES_PER_DAY: u32 = 24 * 60;

/// Minute-of-day window `[start, end)`; wraps past midnight when `start > end`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReportWindow {
    start_minute: u32,
    end_minute: u32,
}

impl ReportWindow {
    pub fn new(start_minute: u32, end_minute: u32) -> Self {
        Self {
            start_minute: start_minute % MINUTES_PER_DAY,
            end_minute: end_minute % MINUTES_PER_DAY,
        }
    }

    pub fn contains(&self, time: NaiveTime) -> bool {
        let minute = time.hour() * 60 + time.minute();
        if self.start_minute <= self.end_minute {
            minute >= self.start_minute && minute < self.end_minute
        } else {
            minute >= self.start_minute || minute < self.end_minute
        }
    }
}

impl Default for ReportWindow {
    /// 16:00-16:30, right after the US close
    fn default() -> Self {
        Self::new(16 * 60, 16 * 60 + 30)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GateState {
    Idle,
    AboutToReport,
}

/// Outcome of one gate evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateDecision {
    pub state: GateState,
    /// True only on the evaluation that flipped Idle → AboutToReport
    pub opened: bool,
}

#[derive(Debug, Clone)]
pub struct ReportingGate {
    window: ReportWindow,
    state: GateState,
    opened_on: Option<NaiveDate>,
    last_reported: Option<NaiveDate>,
}

impl ReportingGate {
    pub fn new(window: ReportWindow) -> Self {
        Self {
            window,
            state: GateState::Idle,
            opened_on: None,
            last_reported: None,
        }
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    pub fn last_reported(&self) -> Option<NaiveDate> {
        self.last_reported
    }

    pub fn evaluate(&mut self, now: NaiveDateTime) -> GateDecision {
        let today = now.date();
        let in_window = self.window.contains(now.time());
        let mut opened = false;

        self.state = if !in_window || self.last_reported == Some(today) {
            GateState::Idle
        } else {
            match self.state {
                GateState::AboutToReport => GateState::AboutToReport,
                GateState::Idle if self.opened_on != Some(today) => {
                    self.opened_on = Some(today);
                    opened = true;
                    info!(date = %today, "Reporting window opened");
                    GateState::AboutToReport
                }
                GateState::Idle => GateState::Idle,
            }
        };

        GateDecision {
            state: self.state,
            opened,
        }
    }

    /// Seed the last reported day from persisted state, e.g. after a restart.
    /// An older date never replaces a newer one.
    pub fn restore(&mut self, last_reported: NaiveDate) {
        if self.last_reported.map_or(true, |known| known < last_reported) {
            self.last_reported = Some(last_reported);
            info!(date = %last_reported, "Restored last reported day");
        }
    }

    /// Mark `today` as reported. Returns true for the first caller only.
    pub fn complete(&mut self, today: NaiveDate) -> bool {
        if self.last_reported == Some(today) {
            return false;
        }
        self.last_reported = Some(today);
        self.state = GateState::Idle;
        true
    }
}

// ============================================================================
// Report snapshot
// ============================================================================

/// `last - first` of a slice, 0 when they are equal or the slice is empty
fn movement(data: &[f64]) -> f64 {
    match (data.first(), data.last()) {
        (Some(first), Some(last)) if first != last => last - first,
        _ => 0.0,
    }
}

fn occurrences(data: &[f64], target: f64) -> u32 {
    data.iter().filter(|v| **v == target).count() as u32
}

impl ReportRecord {
    /// Build the day's snapshot from the analysis window and its result.
    /// Returns `None` for an empty window or a result without RSI.
    pub fn snapshot(
        instrument: &Instrument,
        date: NaiveDate,
        window: &[f64],
        analysis: &AnalysisResult,
    ) -> Option<Self> {
        let strength = analysis.relative_strength_index.as_ref()?;
        let open = *window.first()?;
        let high = window.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let low = window.iter().copied().fold(f64::INFINITY, f64::min);

        let per_hour = (window.len() / MARKET_HOURS).max(1);
        let initial_hour = &window[..per_hour];
        let power_hour = &window[window.len() - per_hour..];

        Some(Self {
            instrument: instrument.clone(),
            date,
            open,
            high,
            low,
            moving_average: analysis.exponential_moving_average,
            relative_strength_index: strength.rsi_step_two,
            sentiment: strength.sentiment,
            bottoms: occurrences(window, low),
            tops: occurrences(window, high),
            initial_hour_movement: movement(initial_hour),
            power_hour_movement: movement(power_hour),
        })
    }
}

/// Plain-text body for the daily batch notification
pub fn render_batch(date: NaiveDate, records: &[ReportRecord]) -> String {
    let mut body = format!("Trend report {date}\n");
    for r in records {
        body.push_str(&format!(
            "{:<6} open {:>10.2} high {:>10.2} low {:>10.2} ema {:>10.4} rsi {:>6.2} {:<10} tops {} bottoms {} first-hour {:+.2} power-hour {:+.2}\n",
            r.instrument.as_str(),
            r.open,
            r.high,
            r.low,
            r.moving_average,
            r.relative_strength_index,
            r.sentiment.as_str(),
            r.tops,
            r.bottoms,
            r.initial_hour_movement,
            r.power_hour_movement,
        ));
    }
    body
}
