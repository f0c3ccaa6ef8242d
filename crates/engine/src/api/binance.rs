//! Binance public API client for spot prices (no authentication required)

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::error::SourceError;
use crate::sources::PriceSource;
use crate::types::{Instrument, PriceQuote};

const DEFAULT_BASE_URL: &str = "https://api.binance.com";
const DEFAULT_QUOTE_ASSET: &str = "USDT";

/// Binance public market data client
#[derive(Clone)]
pub struct BinanceClient {
    client: Client,
    base_url: String,
    quote_asset: String,
}

/// Binance ticker price response
#[derive(Debug, Deserialize)]
struct TickerPrice {
    symbol: String,
    price: String,
}

impl Default for BinanceClient {
    fn default() -> Self {
        Self::new()
    }
}

impl BinanceClient {
    /// Create a new Binance client with default base URL, quoting in USDT
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            base_url: base_url.into(),
            quote_asset: DEFAULT_QUOTE_ASSET.to_string(),
        }
    }

    /// Asset appended to bare instruments, e.g. `BTC` → `BTCUSDT`
    pub fn quote_asset(mut self, asset: impl Into<String>) -> Self {
        self.quote_asset = asset.into().to_uppercase();
        self
    }

    /// Exchange symbol for an instrument
    pub fn symbol_for(&self, instrument: &Instrument) -> String {
        let symbol = instrument.as_str();
        if self.quote_asset.is_empty() || symbol.ends_with(&self.quote_asset) {
            symbol.to_string()
        } else {
            format!("{symbol}{}", self.quote_asset)
        }
    }

    /// Get current price for an exchange symbol
    pub async fn get_price(&self, symbol: &str) -> Result<f64, SourceError> {
        let url = format!("{}/api/v3/ticker/price?symbol={}", self.base_url, symbol);

        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::Status {
                service: "binance",
                status,
                body,
            });
        }

        let ticker: TickerPrice = response.json().await?;
        parse_price(&ticker)
    }
}

fn parse_price(ticker: &TickerPrice) -> Result<f64, SourceError> {
    ticker
        .price
        .parse::<f64>()
        .map_err(|e| SourceError::Parse(format!("price {:?} for {}: {e}", ticker.price, ticker.symbol)))
}

#[async_trait]
impl PriceSource for BinanceClient {
    async fn fetch(&self, instrument: &Instrument) -> Result<PriceQuote, SourceError> {
        let symbol = self.symbol_for(instrument);
        let value = self.get_price(&symbol).await?;
        debug!(%instrument, symbol, value, "Fetched price from Binance");
        Ok(PriceQuote {
            value,
            observed_at: Utc::now(),
        })
    }
}
