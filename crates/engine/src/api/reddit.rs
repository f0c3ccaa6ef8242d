//! Reddit rumor feed
//!
//! Reads the pinned thread of a subreddit through the public `.json`
//! endpoints and mines `(symbol, target price, date)` out of each comment.

use async_trait::async_trait;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::LazyLock;
use tracing::{debug, info};

use crate::error::SourceError;
use crate::sources::{MinedMentions, RumorFeed};
use crate::types::{Instrument, Mention};

const BASE_URL: &str = "https://www.reddit.com";
const USER_AGENT: &str = concat!("trend-sentinel/", env!("CARGO_PKG_VERSION"));
const MAX_MONTH: u32 = 12;

/// Which crowd to listen to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RiskLevel {
    High,
    #[default]
    Low,
}

impl RiskLevel {
    /// `"HIGH"` (any case) is high risk, anything else low
    pub fn parse(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("high") {
            RiskLevel::High
        } else {
            RiskLevel::Low
        }
    }

    pub fn subreddit(&self) -> &'static str {
        match self {
            RiskLevel::High => "wallstreetbets",
            RiskLevel::Low => "investing",
        }
    }
}

#[derive(Debug, Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Debug, Deserialize)]
struct ListingData {
    #[serde(default)]
    children: Vec<Child>,
}

#[derive(Debug, Deserialize)]
struct Child {
    data: ChildData,
}

#[derive(Debug, Default, Deserialize)]
struct ChildData {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    stickied: bool,
    #[serde(default)]
    body: Option<String>,
}

#[derive(Clone)]
pub struct RedditFeed {
    client: Client,
    base_url: String,
    subreddit: String,
}

impl RedditFeed {
    pub fn new(risk: RiskLevel) -> Self {
        Self::for_subreddit(risk.subreddit())
    }

    pub fn for_subreddit(subreddit: impl Into<String>) -> Self {
        Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .user_agent(USER_AGENT)
                .build()
                .unwrap_or_default(),
            base_url: BASE_URL.to_string(),
            subreddit: subreddit.into(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn subreddit(&self) -> &str {
        &self.subreddit
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, SourceError> {
        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::Status {
                service: "reddit",
                status,
                body,
            });
        }

        Ok(response.json().await?)
    }

    /// Comment bodies of the subreddit's pinned thread
    pub async fn pinned_comments(&self) -> Result<Vec<String>, SourceError> {
        let front: Listing = self
            .get_json(&format!("{}/r/{}/.json", self.base_url, self.subreddit))
            .await?;
        let thread_id = pinned_id(&front)
            .ok_or_else(|| SourceError::Parse(format!("r/{} has no threads", self.subreddit)))?;

        let thread: Vec<Listing> = self
            .get_json(&format!(
                "{}/r/{}/comments/{}/.json",
                self.base_url, self.subreddit, thread_id
            ))
            .await?;

        Ok(comment_bodies(&thread))
    }
}

/// First stickied post, or the first post when none is pinned
fn pinned_id(front: &Listing) -> Option<String> {
    let children = &front.data.children;
    children
        .iter()
        .find(|c| c.data.stickied)
        .or_else(|| children.first())
        .and_then(|c| c.data.id.clone())
}

/// The thread endpoint answers `[post, comments]`
fn comment_bodies(thread: &[Listing]) -> Vec<String> {
    thread
        .get(1)
        .map(|listing| {
            listing
                .data
                .children
                .iter()
                .filter_map(|c| c.data.body.clone())
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl RumorFeed for RedditFeed {
    async fn mine(&self) -> Result<MinedMentions, SourceError> {
        let comments = self.pinned_comments().await?;
        let mined = group_mentions(&comments, Utc::now());
        info!(
            subreddit = %self.subreddit,
            comments = comments.len(),
            candidates = mined.len(),
            "Mined rumor feed"
        );
        Ok(mined)
    }
}

// ============================================================================
// Extraction
// ============================================================================

static NOISE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:WSB|OK|EOH|EOD|EOW|EOM|EOQ|EOY|USA|WOW|YOLO|CEO|IPO|ATH|DD|LOL|IMO)\b")
        .expect("noise regex")
});
static SYMBOL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|\s)[#$]?([A-Z]{3,4})(?:[\s.,!?]|$)").expect("symbol regex"));
static AMOUNT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[$£]\s?(\d{1,3}(?:,\d{3})+(?:\.\d+)?|\d+(?:\.\d+)?)").expect("amount regex")
});
static DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|\s)(\d{1,2})[/-](\d{1,2})(?:[\s.,!?]|$)").expect("date regex")
});

/// Pull a candidate mention out of one comment.
///
/// A comment needs a symbol and a target price; the date is optional.
pub fn extract_mention(text: &str, now: DateTime<Utc>) -> Option<(Instrument, Mention)> {
    let cleaned = NOISE.replace_all(text, " ");

    let symbol = SYMBOL.captures(&cleaned)?.get(1)?.as_str();
    let magnitude: f64 = AMOUNT
        .captures(&cleaned)?
        .get(1)?
        .as_str()
        .replace(',', "")
        .parse()
        .ok()?;

    let date = DATE.captures(&cleaned).and_then(|c| {
        let first: u32 = c.get(1)?.as_str().parse().ok()?;
        let second: u32 = c.get(2)?.as_str().parse().ok()?;
        resolve_date(first, second, now)
    });

    Some((Instrument::new(symbol), Mention { date, magnitude }))
}

/// Month first unless that cannot be a month. Resolved in the current year.
fn resolve_date(first: u32, second: u32, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let (month, day) = if first > MAX_MONTH {
        (second, first)
    } else {
        (first, second)
    };
    NaiveDate::from_ymd_opt(now.year(), month, day)?
        .and_hms_opt(0, 0, 0)
        .map(|n| n.and_utc())
}

/// Mentions per candidate, candidates in first-seen order
pub fn group_mentions(comments: &[String], now: DateTime<Utc>) -> MinedMentions {
    let mut order: HashMap<Instrument, usize> = HashMap::new();
    let mut grouped: MinedMentions = Vec::new();

    for comment in comments {
        let Some((instrument, mention)) = extract_mention(comment, now) else {
            continue;
        };
        debug!(%instrument, magnitude = mention.magnitude, "Extracted mention");
        match order.get(&instrument) {
            Some(&i) => grouped[i].1.push(mention),
            None => {
                order.insert(instrument.clone(), grouped.len());
                grouped.push((instrument, vec![mention]));
            }
        }
    }
    grouped
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2021, 1, 4, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_risk_level_picks_subreddit() {
        assert_eq!(RiskLevel::parse("HIGH").subreddit(), "wallstreetbets");
        assert_eq!(RiskLevel::parse("high").subreddit(), "wallstreetbets");
        assert_eq!(RiskLevel::parse("LOW").subreddit(), "investing");
        assert_eq!(RiskLevel::parse("").subreddit(), "investing");
        assert_eq!(RedditFeed::new(RiskLevel::High).subreddit(), "wallstreetbets");
    }

    #[test]
    fn test_extract_symbol_and_price() {
        let (instrument, mention) =
            extract_mention("this comment has PLTR valued at $4.20", now()).unwrap();
        assert_eq!(instrument.as_str(), "PLTR");
        assert_eq!(mention.magnitude, 4.20);
        assert_eq!(mention.date, None);
    }

    #[test]
    fn test_extract_date_month_first() {
        let (instrument, mention) =
            extract_mention("this thinks NIO will reach $6.90 on 4/20", now()).unwrap();
        assert_eq!(instrument.as_str(), "NIO");
        assert_eq!(mention.magnitude, 6.90);
        assert_eq!(
            mention.date,
            Some(Utc.with_ymd_and_hms(2021, 4, 20, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_extract_date_day_first_when_unambiguous() {
        let (_, mention) = extract_mention("TSLA to $1,000 by 20-4", now()).unwrap();
        assert_eq!(mention.magnitude, 1000.0);
        assert_eq!(
            mention.date,
            Some(Utc.with_ymd_and_hms(2021, 4, 20, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_extract_skips_noise_and_incomplete_comments() {
        assert!(extract_mention("no value comment", now()).is_none());
        assert!(extract_mention("PLTR to the moon", now()).is_none());
        assert!(extract_mention("WSB says $40 EOD", now()).is_none());

        let (instrument, _) = extract_mention("YOLO GME $420 EOW", now()).unwrap();
        assert_eq!(instrument.as_str(), "GME");
    }

    #[test]
    fn test_impossible_date_is_dropped() {
        let (_, mention) = extract_mention("AMC hits $20 on 2/31", now()).unwrap();
        assert_eq!(mention.date, None);
    }

    #[test]
    fn test_group_mentions_first_seen_order() {
        let comments = vec![
            "NIO to $50 on 1/5".to_string(),
            "TSLA $900 1/8".to_string(),
            "nothing here".to_string(),
            "NIO $55 in 2/1".to_string(),
        ];
        let grouped = group_mentions(&comments, now());

        let symbols: Vec<&str> = grouped.iter().map(|(i, _)| i.as_str()).collect();
        assert_eq!(symbols, vec!["NIO", "TSLA"]);
        assert_eq!(grouped[0].1.len(), 2);
        assert_eq!(grouped[0].1[1].magnitude, 55.0);
    }

    #[test]
    fn test_pinned_thread_parsing() {
        let front: Listing = serde_json::from_str(
            r#"{"data":{"children":[
                {"data":{"id":"first","stickied":false}},
                {"data":{"id":"pinned","stickied":true}}
            ]}}"#,
        )
        .unwrap();
        assert_eq!(pinned_id(&front).as_deref(), Some("pinned"));

        let unpinned: Listing =
            serde_json::from_str(r#"{"data":{"children":[{"data":{"id":"FAKEID"}}]}}"#).unwrap();
        assert_eq!(pinned_id(&unpinned).as_deref(), Some("FAKEID"));

        let thread: Vec<Listing> = serde_json::from_str(
            r#"[
                {"data":{"children":[{"data":{"id":"FAKEID"}}]}},
                {"data":{"children":[
                    {"data":{"body":"TESTCOMMENT"}},
                    {"data":{"id":"more"}}
                ]}}
            ]"#,
        )
        .unwrap();
        assert_eq!(comment_bodies(&thread), vec!["TESTCOMMENT".to_string()]);
        assert!(comment_bodies(&thread[..1]).is_empty());
    }
}
