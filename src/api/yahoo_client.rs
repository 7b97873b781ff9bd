use chrono::NaiveDate;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::{ApiRateLimiter, MarketDataProvider};
use crate::config::EtlConfig;
use crate::error::{EtlError, Result};
use crate::models::RawSeries;

pub const DEFAULT_BASE_URL: &str = "https://query2.finance.yahoo.com";

/// Yahoo Finance v8 chart API response
#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartBody,
}

#[derive(Debug, Deserialize)]
struct ChartBody {
    result: Option<Vec<ChartData>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    #[serde(default)]
    timestamp: Vec<Value>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    #[serde(default)]
    quote: Vec<QuoteColumns>,
    #[serde(default)]
    adjclose: Vec<AdjCloseColumn>,
}

#[derive(Debug, Deserialize)]
struct QuoteColumns {
    #[serde(default)]
    open: Vec<Value>,
    #[serde(default)]
    high: Vec<Value>,
    #[serde(default)]
    low: Vec<Value>,
    #[serde(default)]
    close: Vec<Value>,
    #[serde(default)]
    volume: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct AdjCloseColumn {
    #[serde(default)]
    adjclose: Vec<Value>,
}

/// Yahoo Finance chart client.
///
/// Returns per-symbol, column-oriented history with nulls left in place;
/// classification of empty or all-zero answers happens in the fetcher.
pub struct YahooClient {
    client: Client,
    base_url: String,
    rate_limiter: ApiRateLimiter,
}

impl YahooClient {
    pub fn new(config: &EtlConfig) -> Result<Self> {
        Self::with_base_url(config, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(config: &EtlConfig, base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .user_agent("Mozilla/5.0 (X11; Linux x86_64) ohlcv-etl/0.1")
            .build()
            .map_err(|e| EtlError::Config(format!("build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            rate_limiter: ApiRateLimiter::new(config.rate_limit_per_minute),
        })
    }

    fn chart_url(&self, symbol: &str, start: NaiveDate, end: NaiveDate) -> Result<Url> {
        let period1 = start
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc().timestamp())
            .unwrap_or_default();
        let period2 = end
            .and_hms_opt(23, 59, 59)
            .map(|dt| dt.and_utc().timestamp())
            .unwrap_or_default();

        let mut url = Url::parse(&self.base_url)
            .map_err(|e| EtlError::Config(format!("invalid base URL {}: {e}", self.base_url)))?;
        url.path_segments_mut()
            .map_err(|_| EtlError::Config(format!("base URL cannot have a path: {}", self.base_url)))?
            .pop_if_empty()
            .extend(["v8", "finance", "chart", symbol]);
        url.query_pairs_mut()
            .append_pair("period1", &period1.to_string())
            .append_pair("period2", &period2.to_string())
            .append_pair("interval", "1d")
            .append_pair("includeAdjustedClose", "true");

        Ok(url)
    }

    fn into_series(symbol: &str, response: ChartResponse) -> Result<RawSeries> {
        if let Some(err) = response.chart.error {
            return Err(EtlError::transport(
                symbol,
                format!("{}: {}", err.code, err.description),
            ));
        }

        let empty = RawSeries::PerSymbol {
            symbol: symbol.to_string(),
            dates: Vec::new(),
            fields: Vec::new(),
        };

        let Some(data) = response.chart.result.and_then(|r| r.into_iter().next()) else {
            return Ok(empty);
        };
        let Some(quote) = data.indicators.quote.into_iter().next() else {
            return Ok(empty);
        };

        let mut fields = vec![
            ("open".to_string(), quote.open),
            ("high".to_string(), quote.high),
            ("low".to_string(), quote.low),
            ("close".to_string(), quote.close),
            ("volume".to_string(), quote.volume),
        ];
        if let Some(adj) = data.indicators.adjclose.into_iter().next() {
            fields.push(("adjclose".to_string(), adj.adjclose));
        }

        Ok(RawSeries::PerSymbol {
            symbol: symbol.to_string(),
            dates: data.timestamp,
            fields,
        })
    }
}

#[async_trait::async_trait]
impl MarketDataProvider for YahooClient {
    async fn fetch(&self, symbol: &str, start: NaiveDate, end: NaiveDate) -> Result<RawSeries> {
        let url = self.chart_url(symbol, start, end)?;

        self.rate_limiter.wait().await;
        debug!("Making request to: {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| EtlError::transport(symbol, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EtlError::transport(
                symbol,
                format!("HTTP {}: {}", status, body.chars().take(200).collect::<String>()),
            ));
        }

        let chart: ChartResponse = response
            .json()
            .await
            .map_err(|e| EtlError::transport(symbol, format!("malformed chart response: {e}")))?;

        let series = Self::into_series(symbol, chart)?;
        debug!("Retrieved {} rows for {} from {} to {}", series.len(), symbol, start, end);
        Ok(series)
    }
}
