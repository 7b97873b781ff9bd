use chrono::NaiveDate;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;

use crate::error::Result;
use crate::models::RawSeries;

pub mod csv_source;
pub mod yahoo_client;

pub use csv_source::CsvDirectorySource;
pub use yahoo_client::YahooClient;

/// Request pacing shared by HTTP providers
pub struct ApiRateLimiter {
    limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
}

impl ApiRateLimiter {
    pub fn new(requests_per_minute: u32) -> Self {
        let per_minute = NonZeroU32::new(requests_per_minute).unwrap_or(NonZeroU32::MIN);
        Self {
            limiter: RateLimiter::direct(Quota::per_minute(per_minute)),
        }
    }

    pub async fn wait(&self) {
        self.limiter.until_ready().await;
    }
}

/// Source of raw daily bars for one symbol.
///
/// Implementations return whatever layout the provider speaks; an empty
/// series is a valid response and is judged by the fetcher, not here.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait MarketDataProvider: Send + Sync {
    async fn fetch(&self, symbol: &str, start: NaiveDate, end: NaiveDate) -> Result<RawSeries>;
}
