//! Discovery of instruments nobody is tracking yet, mined from a rumor feed
//!
//! Each mention names a target price and (optionally) a target date. A
//! mention's strength is the implied percent move divided by the number of
//! decimal digits in the seconds left until the target date, so near-term
//! calls outweigh far-off ones by orders of magnitude. A candidate's score is
//! the sum of its mention strengths plus one point per usable mention.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::SourceError;
use crate::sources::{PriceSource, RumorFeed};
use crate::types::{Instrument, Mention, PriceQuote};

/// Decimal digits of a non-negative count, `digit_count(0) == 1`
pub fn digit_count(mut value: u64) -> u32 {
    let mut digits = 1;
    while value >= 10 {
        value /= 10;
        digits += 1;
    }
    digits
}

/// Strength of one mention, `None` when it has no date or the date is past
pub fn mention_strength(mention: &Mention, current_price: f64, now: DateTime<Utc>) -> Option<f64> {
    let date = mention.date?;
    let seconds = (date - now).num_seconds();
    if seconds < 0 || current_price <= 0.0 {
        return None;
    }

    let percent_move = mention.magnitude / current_price * 100.0;
    Some(percent_move / f64::from(digit_count(seconds as u64)))
}

/// Score of one candidate, `None` when none of its mentions is usable
pub fn score_mentions(mentions: &[Mention], current_price: f64, now: DateTime<Utc>) -> Option<f64> {
    let strengths: Vec<f64> = mentions
        .iter()
        .filter_map(|m| mention_strength(m, current_price, now))
        .collect();

    if strengths.is_empty() {
        return None;
    }
    Some(strengths.iter().sum::<f64>() + strengths.len() as f64)
}

/// A scored candidate
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateScore {
    pub instrument: Instrument,
    pub score: f64,
    pub quote: PriceQuote,
}

/// Highest score wins; on a tie the earlier candidate is kept
pub fn select_best(scores: impl IntoIterator<Item = CandidateScore>) -> Option<CandidateScore> {
    scores.into_iter().fold(None, |best, candidate| match best {
        Some(b) if b.score >= candidate.score => Some(b),
        _ => Some(candidate),
    })
}

fn has_usable_date(mentions: &[Mention], now: DateTime<Utc>) -> bool {
    mentions.iter().any(|m| m.date.is_some_and(|d| d >= now))
}

/// One discovery pass: mine, price, score, pick
pub struct DiscoveryTask {
    feed: Arc<dyn RumorFeed>,
    prices: Arc<dyn PriceSource>,
    tracked: HashSet<Instrument>,
}

impl DiscoveryTask {
    pub fn new(
        feed: Arc<dyn RumorFeed>,
        prices: Arc<dyn PriceSource>,
        tracked: impl IntoIterator<Item = Instrument>,
    ) -> Self {
        Self {
            feed,
            prices,
            tracked: tracked.into_iter().collect(),
        }
    }

    /// Best untracked candidate this pass, if any mention was usable.
    ///
    /// A feed failure is returned; a failed candidate price is skipped.
    pub async fn discover(&self, now: DateTime<Utc>) -> Result<Option<CandidateScore>, SourceError> {
        let mined = self.feed.mine().await?;
        let mut scored = Vec::new();

        for (instrument, mentions) in mined {
            if self.tracked.contains(&instrument) || !has_usable_date(&mentions, now) {
                continue;
            }

            let quote = match self.prices.fetch(&instrument).await {
                Ok(q) if q.value > 0.0 => q,
                Ok(q) => {
                    warn!(%instrument, price = q.value, "Skipping candidate with non-positive price");
                    continue;
                }
                Err(e) => {
                    warn!(%instrument, error = %e, "Skipping candidate, price unavailable");
                    continue;
                }
            };

            if let Some(score) = score_mentions(&mentions, quote.value, now) {
                debug!(%instrument, score, mentions = mentions.len(), "Scored candidate");
                scored.push(CandidateScore {
                    instrument,
                    score,
                    quote,
                });
            }
        }

        let best = select_best(scored);
        match &best {
            Some(b) => info!(instrument = %b.instrument, score = b.score, "Discovered candidate"),
            None => debug!("No usable mentions this pass"),
        }
        Ok(best)
    }
}
