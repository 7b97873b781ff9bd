//! Hand-written provider and sink doubles for pipeline tests

use async_trait::async_trait;
use chrono::NaiveDate;
use ohlcv_etl::api::MarketDataProvider;
use ohlcv_etl::database::{PriceSink, PriceStore, UpsertReport};
use ohlcv_etl::models::{CanonicalRecord, RawSeries};
use ohlcv_etl::{EtlError, Result};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

/// Canned answer for one symbol
#[derive(Clone)]
pub enum StubResponse {
    Bars(RawSeries),
    Empty,
    TransportError,
}

/// Provider returning fixed responses per symbol and counting calls.
/// Unknown symbols get a transport error.
#[derive(Default)]
pub struct StubProvider {
    responses: HashMap<String, StubResponse>,
    calls: Mutex<HashMap<String, u32>>,
}

impl StubProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, symbol: &str, response: StubResponse) -> Self {
        self.responses.insert(symbol.to_string(), response);
        self
    }

    pub fn calls(&self, symbol: &str) -> u32 {
        self.calls.lock().unwrap().get(symbol).copied().unwrap_or(0)
    }
}

#[async_trait]
impl MarketDataProvider for StubProvider {
    async fn fetch(&self, symbol: &str, _start: NaiveDate, _end: NaiveDate) -> Result<RawSeries> {
        *self.calls.lock().unwrap().entry(symbol.to_string()).or_default() += 1;

        match self.responses.get(symbol) {
            Some(StubResponse::Bars(series)) => Ok(series.clone()),
            Some(StubResponse::Empty) => Ok(RawSeries::empty()),
            Some(StubResponse::TransportError) | None => {
                Err(EtlError::transport(symbol, "connection refused"))
            }
        }
    }
}

/// Wraps a real store, failing pings or writes on demand
pub struct FlakySink {
    inner: PriceStore,
    unreachable: bool,
    reject_tickers: HashSet<String>,
}

impl FlakySink {
    pub fn new(inner: PriceStore) -> Self {
        Self {
            inner,
            unreachable: false,
            reject_tickers: HashSet::new(),
        }
    }

    pub fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }

    pub fn rejecting(mut self, ticker: &str) -> Self {
        self.reject_tickers.insert(ticker.to_string());
        self
    }
}

#[async_trait]
impl PriceSink for FlakySink {
    async fn ping(&self) -> Result<()> {
        if self.unreachable {
            return Err(EtlError::Write("database is unreachable".to_string()));
        }
        self.inner.ping().await
    }

    async fn ensure_schema(&self) -> Result<()> {
        self.inner.ensure_schema().await
    }

    async fn upsert(&self, records: &[CanonicalRecord]) -> Result<UpsertReport> {
        if records.iter().any(|r| self.reject_tickers.contains(&r.ticker)) {
            return Err(EtlError::Write("disk I/O error".to_string()));
        }
        self.inner.upsert(records).await
    }
}
