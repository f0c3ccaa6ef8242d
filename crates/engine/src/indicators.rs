//! Indicator engine
//!
//! Computes the simple moving average, the incremental exponential moving
//! average and the two-stage (Wilder) relative strength index over a window of
//! recent prices. Everything here is pure: the only state the EMA needs, the
//! "previous EMA" scalar, is passed in and the value to persist for the next
//! pass is handed back to the caller.

use chrono::{DateTime, Utc};
use tracing::{debug, error};

use crate::error::IndicatorError;
use crate::types::{AnalysisResult, Instrument, RsiReading, Sentiment};

/// RSI needs at least this many prices
pub const RSI_MINIMUM_ELEMENTS: usize = 14;

const TOP_STRENGTH: f64 = 100.0;
const OVERBOUGHT_LEVEL: f64 = 70.0;
const OVERSOLD_LEVEL: f64 = 30.0;

// ============================================================================
// Slice selection
// ============================================================================

/// Named views over a price (or delta) series
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slice {
    /// The full series
    Whole,
    /// The last element only
    Latest,
    /// The second-to-last element only
    Former,
    /// The last two elements
    CurrentPair,
    /// Everything except the last two elements
    Previous,
}

impl Slice {
    pub fn select(self, data: &[f64]) -> &[f64] {
        let len = data.len();
        match self {
            Slice::Whole => data,
            Slice::Latest => &data[len.saturating_sub(1)..],
            Slice::Former => {
                if len < 2 {
                    &data[..0]
                } else {
                    &data[len - 2..len - 1]
                }
            }
            Slice::CurrentPair => &data[len.saturating_sub(2)..],
            Slice::Previous => &data[..len.saturating_sub(2)],
        }
    }
}

// ============================================================================
// Moving averages
// ============================================================================

/// Simple moving average with integer truncation of the sum and the quotient.
pub fn sma(window: &[f64]) -> Result<f64, IndicatorError> {
    if window.is_empty() {
        return Err(IndicatorError::EmptyWindow);
    }
    let sum: f64 = window.iter().sum();
    Ok((sum.trunc() / window.len() as f64).trunc())
}

/// Output of one EMA pass
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EmaOutput {
    pub ema: f64,
    /// The former term, to be stored as the instrument's new previous EMA
    pub next_previous: f64,
}

/// Smoothing factor `2 / (count + 1)`
fn smoothing(count: f64) -> f64 {
    2.0 / (count + 1.0)
}

/// `1 - smoothing / (count + 1)`
fn weighting(count: f64) -> f64 {
    1.0 - smoothing(count) / (count + 1.0)
}

/// `value × smoothing / (count + 1)` applied to the first element of a slice
fn primer(window: &[f64], slice: Slice) -> Option<f64> {
    let count = window.len() as f64;
    slice
        .select(window)
        .first()
        .map(|value| value * (smoothing(count) / (count + 1.0)))
}

/// Exponential moving average over `window`.
///
/// A stored previous value switches the former term to the SMA of the window.
/// Without one the former term is the primer of the second-to-last price, or
/// the SMA when the window holds a single price.
pub fn ema(window: &[f64], previous: Option<f64>) -> Result<EmaOutput, IndicatorError> {
    let count = window.len() as f64;
    let current_term = primer(window, Slice::Latest).ok_or(IndicatorError::EmptyWindow)?;

    let former_term = match previous {
        Some(_) => sma(window)?,
        None => match primer(window, Slice::Former) {
            Some(former) => former,
            None => sma(window)?,
        },
    };

    Ok(EmaOutput {
        ema: current_term + former_term * weighting(count),
        next_previous: former_term,
    })
}

// ============================================================================
// Relative strength index
// ============================================================================

/// Consecutive differences `p[i+1] - p[i]`
pub fn price_changes(window: &[f64]) -> Vec<f64> {
    window.windows(2).map(|pair| pair[1] - pair[0]).collect()
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        0.0
    } else {
        sum / n as f64
    }
}

/// Mean of the gains (non-gains count as 0), divided by the window count
fn average_gain(changes: &[f64], count: f64) -> f64 {
    mean(changes.iter().map(|d| d.max(0.0))) / count
}

/// Mean of the absolute losses (non-losses count as 0), divided by the window count
fn average_loss(changes: &[f64], count: f64) -> f64 {
    mean(changes.iter().map(|d| if *d < 0.0 { d.abs() } else { 0.0 })) / count
}

/// `100 - 100 / (1 + gain / loss)`. No losses reads as 100, a flat series as 50.
pub fn relative_strength(gain: f64, loss: f64) -> f64 {
    if loss == 0.0 {
        return if gain == 0.0 { TOP_STRENGTH / 2.0 } else { TOP_STRENGTH };
    }
    TOP_STRENGTH - TOP_STRENGTH / (1.0 + gain / loss)
}

/// Wilder smoothing of the "previous" and "current" averages
pub fn smoothed_average(previous: f64, current: f64, count: f64) -> f64 {
    previous * (count - 1.0) + current
}

impl Sentiment {
    /// High RSI reads as overbought, low RSI as oversold
    pub fn from_rsi(rsi: f64) -> Self {
        if rsi > OVERBOUGHT_LEVEL {
            Sentiment::Overbought
        } else if rsi < OVERSOLD_LEVEL {
            Sentiment::Oversold
        } else {
            Sentiment::Neutral
        }
    }
}

/// Two-stage RSI. Windows shorter than 14 prices are rejected.
pub fn rsi(window: &[f64]) -> Result<RsiReading, IndicatorError> {
    if window.len() < RSI_MINIMUM_ELEMENTS {
        let err = IndicatorError::DataInsufficient {
            received: window.to_vec(),
            count: window.len(),
            expected: format!("Array with at least {RSI_MINIMUM_ELEMENTS} elements"),
        };
        error!(error = %err, "RSI window too small");
        return Err(err);
    }

    let count = window.len() as f64;
    let changes = price_changes(window);

    let step_one = relative_strength(
        average_gain(&changes, count),
        average_loss(&changes, count),
    );

    let previous = Slice::Previous.select(&changes);
    let current = Slice::CurrentPair.select(&changes);
    let step_two = relative_strength(
        smoothed_average(
            average_gain(previous, count),
            average_gain(current, count),
            count,
        ),
        smoothed_average(
            average_loss(previous, count),
            average_loss(current, count),
            count,
        ),
    );

    let current_price = *Slice::Latest
        .select(window)
        .first()
        .ok_or(IndicatorError::EmptyWindow)?;

    Ok(RsiReading {
        rsi_step_one: step_one,
        rsi_step_two: step_two,
        current: current_price,
        sentiment: Sentiment::from_rsi(step_two),
    })
}

// ============================================================================
// Full pass
// ============================================================================

/// Result of one analysis pass: the ephemeral result plus the state to persist
#[derive(Debug, Clone, PartialEq)]
pub struct Analysis {
    pub result: AnalysisResult,
    pub next_previous: f64,
}

/// Run SMA, EMA and RSI over a window. Nothing is persisted here; the caller
/// writes `next_previous` back through the history guard.
///
/// SMA and EMA need a single price. RSI is left out, after logging the
/// `DataInsufficient` error, while the window is shorter than
/// [`RSI_MINIMUM_ELEMENTS`].
pub fn analyze(
    instrument: &Instrument,
    window: &[f64],
    previous: Option<f64>,
    now: DateTime<Utc>,
) -> Result<Analysis, IndicatorError> {
    let simple = sma(window)?;
    let exponential = ema(window, previous)?;
    let strength = match rsi(window) {
        Ok(reading) => Some(reading),
        Err(IndicatorError::DataInsufficient { count, .. }) => {
            debug!(instrument = %instrument, points = count, "Skipping RSI for short history");
            None
        }
        Err(e) => return Err(e),
    };

    debug!(
        instrument = %instrument,
        points = window.len(),
        sma = simple,
        ema = exponential.ema,
        rsi = strength.as_ref().map(|r| r.rsi_step_two),
        sentiment = strength.as_ref().map(|r| r.sentiment.as_str()),
        "Indicators computed"
    );

    Ok(Analysis {
        result: AnalysisResult {
            instrument: instrument.clone(),
            simple_moving_average: simple,
            exponential_moving_average: exponential.ema,
            relative_strength_index: strength,
            analyzed_at: now,
        },
        next_previous: exponential.next_previous,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one_to(n: u32) -> Vec<f64> {
        (1..=n).map(f64::from).collect()
    }

    fn approx(a: f64, b: f64, eps: f64) -> bool {
        (a - b).abs() < eps
    }

    const RSI_FIXTURE: [f64; 14] = [
        26.5, 26.4, 25.9, 25.2, 26.0, 26.2, 26.7, 26.2, 25.2, 25.6, 25.6, 26.7, 26.4, 26.5,
    ];

    #[test]
    fn test_slice_selection() {
        let data = one_to(5);
        assert_eq!(Slice::Whole.select(&data), &[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(Slice::Latest.select(&data), &[5.0]);
        assert_eq!(Slice::Former.select(&data), &[4.0]);
        assert_eq!(Slice::CurrentPair.select(&data), &[4.0, 5.0]);
        assert_eq!(Slice::Previous.select(&data), &[1.0, 2.0, 3.0]);

        assert!(Slice::Former.select(&[1.0]).is_empty());
        assert!(Slice::Previous.select(&[1.0, 2.0]).is_empty());
        assert!(Slice::Latest.select(&[]).is_empty());
    }

    #[test]
    fn test_sma_truncates() {
        assert_eq!(sma(&one_to(20)).unwrap(), 10.0);
        assert_eq!(sma(&[2.0, 4.0]).unwrap(), 3.0);
        assert_eq!(sma(&[]), Err(IndicatorError::EmptyWindow));
    }

    #[test]
    fn test_ema_terms() {
        let count = 20.0;
        assert!(approx(smoothing(count), 0.0952, 1e-4));
        assert!(approx(weighting(count), 0.99546, 1e-5));
        let window = one_to(20);
        assert!(approx(primer(&window, Slice::Latest).unwrap(), 0.0907, 1e-4));
        assert!(approx(primer(&window, Slice::Former).unwrap(), 0.0862, 1e-4));
    }

    #[test]
    fn test_ema_without_state_uses_former_primer() {
        let out = ema(&one_to(20), None).unwrap();
        assert!(approx(out.ema, 0.1765, 1e-4), "ema was {}", out.ema);
        assert!(approx(out.next_previous, 0.0862, 1e-4));

        let shorter = ema(&one_to(19), None).unwrap();
        assert!(approx(shorter.ema, 0.18455, 1e-9));
    }

    #[test]
    fn test_ema_with_state_uses_sma() {
        let out = ema(&one_to(20), Some(0.0862)).unwrap();
        assert!(approx(out.ema, 10.0454, 1e-4), "ema was {}", out.ema);
        assert_eq!(out.next_previous, 10.0);

        // only the presence of a stored value matters
        assert_eq!(ema(&one_to(20), Some(123.0)).unwrap(), out);
    }

    #[test]
    fn test_ema_single_point_falls_back_to_sma() {
        for previous in [None, Some(3.0)] {
            let out = ema(&[42.0], previous).unwrap();
            assert_eq!(out.next_previous, 42.0);
            assert!(approx(out.ema, 42.0, 1e-9));
        }
    }

    #[test]
    fn test_rsi_rejects_short_window() {
        let err = rsi(&[]).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("at least 14 elements"), "{message}");
        assert!(message.contains("[]"), "{message}");
        assert!(message.contains("(0 elements)"), "{message}");

        let err = rsi(&one_to(13)).unwrap_err();
        match err {
            IndicatorError::DataInsufficient {
                ref received,
                count,
                ..
            } => {
                assert_eq!(count, 13);
                assert_eq!(received.len(), 13);
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(err.to_string().contains("[1.0, 2.0, 3.0"));
    }

    #[test]
    fn test_rsi_monotonic_uptrend() {
        let window: Vec<f64> = (0..15).map(|i| 1.0 + 9.0 * i as f64).collect();
        assert_eq!(window.last(), Some(&127.0));

        let reading = rsi(&window).unwrap();
        assert_eq!(reading.rsi_step_one, 100.0);
        assert_eq!(reading.rsi_step_two, 100.0);
        assert_eq!(reading.current, 127.0);
        assert_eq!(reading.sentiment, Sentiment::Overbought);

        let changes = price_changes(&window);
        assert!(approx(average_gain(&changes, 15.0), 0.6, 1e-12));
        assert_eq!(average_loss(&changes, 15.0), 0.0);
    }

    #[test]
    fn test_rsi_monotonic_downtrend_is_oversold() {
        let window: Vec<f64> = (0..14).map(|i| 100.0 - i as f64).collect();
        let reading = rsi(&window).unwrap();
        assert_eq!(reading.rsi_step_one, 0.0);
        assert_eq!(reading.sentiment, Sentiment::Oversold);
    }

    #[test]
    fn test_rsi_flat_series_is_neutral() {
        let reading = rsi(&[5.0; 14]).unwrap();
        assert_eq!(reading.rsi_step_two, 50.0);
        assert_eq!(reading.sentiment, Sentiment::Neutral);
    }

    #[test]
    fn test_rsi_mixed_series_is_bounded() {
        let reading = rsi(&RSI_FIXTURE).unwrap();
        assert_eq!(reading.current, 26.5);
        assert!(reading.rsi_step_one > 0.0 && reading.rsi_step_one < 100.0);
        assert!(reading.rsi_step_two > 0.0 && reading.rsi_step_two < 100.0);
    }

    #[test]
    fn test_relative_strength_values() {
        assert!(approx(relative_strength(10_000.0, 100.0), 99.00990099009901, 1e-12));
        assert!(approx(relative_strength(10.0, 1.0), 90.9090909090909, 1e-12));
        assert!(approx(relative_strength(5.0, 1.0), 83.33333333333333, 1e-12));
    }

    #[test]
    fn test_smoothed_stage_two() {
        // previous window of 14 prices: (10000 * 13 + 1000) / (100 * 13 + 10)
        let gain = smoothed_average(10_000.0, 1_000.0, 14.0);
        let loss = smoothed_average(100.0, 10.0, 14.0);
        assert!(approx(relative_strength(gain, loss), 99.00990099009901, 1e-9));
    }

    #[test]
    fn test_sentiment_thresholds() {
        assert_eq!(Sentiment::from_rsi(71.0), Sentiment::Overbought);
        assert_eq!(Sentiment::from_rsi(29.0), Sentiment::Oversold);
        assert_eq!(Sentiment::from_rsi(50.0), Sentiment::Neutral);
        assert_eq!(Sentiment::from_rsi(70.0), Sentiment::Neutral);
        assert_eq!(Sentiment::from_rsi(30.0), Sentiment::Neutral);
    }

    #[test]
    fn test_analyze_full_pass() {
        let instrument = Instrument::new("PLTR");
        let window = one_to(20);
        let now = Utc::now();

        let analysis = analyze(&instrument, &window, Some(1.0), now).unwrap();
        assert_eq!(analysis.result.instrument, instrument);
        assert_eq!(analysis.result.simple_moving_average, 10.0);
        assert!(approx(analysis.result.exponential_moving_average, 10.0454, 1e-4));
        let reading = analysis.result.relative_strength_index.unwrap();
        assert_eq!(reading.current, 20.0);
        assert_eq!(analysis.next_previous, 10.0);
        assert_eq!(analysis.result.analyzed_at, now);
    }

    #[test]
    fn test_analyze_short_window_skips_rsi_only() {
        let analysis = analyze(&Instrument::new("PLTR"), &one_to(5), None, Utc::now()).unwrap();
        assert_eq!(analysis.result.simple_moving_average, 3.0);
        assert!(analysis.result.relative_strength_index.is_none());
        // 5 × 2/36 + 4 × 2/36 × (1 - 2/36)
        let factor = 2.0 / 36.0;
        assert!(approx(
            analysis.result.exponential_moving_average,
            5.0 * factor + 4.0 * factor * (1.0 - factor),
            1e-12
        ));
        assert!(approx(analysis.next_previous, 4.0 * factor, 1e-12));
    }

    #[test]
    fn test_analyze_empty_window_fails() {
        let err = analyze(&Instrument::new("PLTR"), &[], None, Utc::now()).unwrap_err();
        assert_eq!(err, IndicatorError::EmptyWindow);
    }
}
