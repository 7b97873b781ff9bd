use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::api::MarketDataProvider;
use crate::error::{EtlError, FetchFailure, Result};
use crate::models::raw::value_as_f64;
use crate::models::{ExtractionWindow, Field, Instrument, RawSeries};

/// How the pause between attempts grows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    #[default]
    Fixed,
    /// `delay * attempt`
    Linear,
}

impl FromStr for BackoffKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fixed" => Ok(BackoffKind::Fixed),
            "linear" => Ok(BackoffKind::Linear),
            other => Err(format!("unknown backoff '{other}'")),
        }
    }
}

/// Bounded retry schedule for one instrument's fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    pub delay: Duration,
    pub kind: BackoffKind,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(2), BackoffKind::Fixed)
    }
}

impl BackoffPolicy {
    pub fn new(max_attempts: u32, delay: Duration, kind: BackoffKind) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
            kind,
        }
    }

    /// Retry `max_attempts` times with no pause
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO, BackoffKind::Fixed)
    }

    /// Pause after failed attempt number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.kind {
            BackoffKind::Fixed => self.delay,
            BackoffKind::Linear => self.delay.saturating_mul(attempt.max(1)),
        }
    }
}

/// A successful fetch and how many attempts it took
#[derive(Debug, Clone)]
pub struct FetchedSeries {
    pub series: RawSeries,
    pub attempts: u32,
}

/// Fetches one instrument's window with bounded retries.
///
/// Empty responses and responses with no usable close price count as failed
/// attempts, same as transport errors.
#[derive(Clone)]
pub struct RawDataFetcher {
    provider: Arc<dyn MarketDataProvider>,
    policy: BackoffPolicy,
}

impl RawDataFetcher {
    pub fn new(provider: Arc<dyn MarketDataProvider>, policy: BackoffPolicy) -> Self {
        Self { provider, policy }
    }

    pub async fn fetch(
        &self,
        instrument: &Instrument,
        window: &ExtractionWindow,
    ) -> std::result::Result<FetchedSeries, FetchFailure> {
        let symbol = instrument.symbol.as_str();
        let mut attempts = 0;

        loop {
            attempts += 1;
            debug!("Fetching {} ({}), attempt {}/{}", symbol, window, attempts, self.policy.max_attempts);

            let error = match self.attempt(symbol, window).await {
                Ok(series) => return Ok(FetchedSeries { series, attempts }),
                Err(e) => e,
            };

            if !error.is_retryable() || attempts >= self.policy.max_attempts {
                return Err(FetchFailure {
                    symbol: symbol.to_string(),
                    attempts,
                    last_error: error,
                });
            }

            let pause = self.policy.delay_for(attempts);
            warn!(
                "Attempt {} failed for {}: {}. Retrying in {:?}...",
                attempts, symbol, error, pause
            );
            if !pause.is_zero() {
                tokio::time::sleep(pause).await;
            }
        }
    }

    async fn attempt(&self, symbol: &str, window: &ExtractionWindow) -> Result<RawSeries> {
        let series = self.provider.fetch(symbol, window.start, window.end).await?;

        if series.is_empty() {
            return Err(EtlError::EmptyResponse {
                symbol: symbol.to_string(),
            });
        }
        if is_degenerate(&series, symbol) {
            return Err(EtlError::DegenerateData {
                symbol: symbol.to_string(),
            });
        }

        Ok(series)
    }
}

/// No close column, or every close is null, unparsable or zero
fn is_degenerate(series: &RawSeries, symbol: &str) -> bool {
    match series.table(symbol).column(Field::Close) {
        None => true,
        Some(closes) => closes
            .into_iter()
            .all(|v| value_as_f64(v).map(|c| c == 0.0 || !c.is_finite()).unwrap_or(true)),
    }
}
