use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use crate::fetcher::{BackoffKind, BackoffPolicy};
use crate::period::EndDatePolicy;
use crate::validator::SuspectBatchPolicy;

/// Where raw bars come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DataSourceKind {
    /// Yahoo Finance chart API
    Yahoo,
    /// Directory of `<SYMBOL>.csv` files
    Csv,
}

impl FromStr for DataSourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "yahoo" => Ok(DataSourceKind::Yahoo),
            "csv" => Ok(DataSourceKind::Csv),
            other => Err(format!("unknown data source '{other}'")),
        }
    }
}

/// Configuration for the ingestion job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EtlConfig {
    pub database_path: String,
    pub catalog_path: Option<PathBuf>,
    pub data_source: DataSourceKind,
    pub csv_data_dir: PathBuf,
    pub lookback_days: i64,
    pub same_day_embargo: bool,
    pub max_retries: u32,
    pub retry_delay_seconds: u64,
    pub backoff: BackoffKind,
    pub rate_limit_per_minute: u32,
    pub request_timeout_seconds: u64,
    pub concurrency: usize,
    pub suspect_batch_policy: SuspectBatchPolicy,
}

impl Default for EtlConfig {
    fn default() -> Self {
        Self {
            database_path: "stocks.db".to_string(),
            catalog_path: None,
            data_source: DataSourceKind::Yahoo,
            csv_data_dir: PathBuf::from("data"),
            lookback_days: 365,
            same_day_embargo: true,
            max_retries: 3,
            retry_delay_seconds: 2,
            backoff: BackoffKind::Fixed,
            rate_limit_per_minute: 120,
            request_timeout_seconds: 30,
            concurrency: 1,
            suspect_batch_policy: SuspectBatchPolicy::Write,
        }
    }
}

impl EtlConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok(); // Load .env file if it exists
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset or unparsable keys keep
    /// their defaults.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        Self {
            database_path: lookup("DATABASE_PATH").unwrap_or(defaults.database_path),
            catalog_path: lookup("CATALOG_PATH")
                .filter(|p| !p.trim().is_empty())
                .map(PathBuf::from),
            data_source: parse_var(&lookup, "DATA_SOURCE", defaults.data_source),
            csv_data_dir: lookup("CSV_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.csv_data_dir),
            lookback_days: parse_var(&lookup, "LOOKBACK_DAYS", defaults.lookback_days),
            same_day_embargo: parse_var(&lookup, "SAME_DAY_EMBARGO", defaults.same_day_embargo),
            max_retries: parse_var(&lookup, "MAX_RETRIES", defaults.max_retries),
            retry_delay_seconds: parse_var(&lookup, "RETRY_DELAY_SECONDS", defaults.retry_delay_seconds),
            backoff: parse_var(&lookup, "RETRY_BACKOFF", defaults.backoff),
            rate_limit_per_minute: parse_var(&lookup, "RATE_LIMIT_PER_MINUTE", defaults.rate_limit_per_minute),
            request_timeout_seconds: parse_var(
                &lookup,
                "REQUEST_TIMEOUT_SECONDS",
                defaults.request_timeout_seconds,
            ),
            concurrency: parse_var(&lookup, "CONCURRENCY", defaults.concurrency),
            suspect_batch_policy: parse_var(
                &lookup,
                "SUSPECT_BATCH_POLICY",
                defaults.suspect_batch_policy,
            ),
        }
    }

    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            self.max_retries,
            Duration::from_secs(self.retry_delay_seconds),
            self.backoff,
        )
    }

    pub fn end_date_policy(&self) -> EndDatePolicy {
        if self.same_day_embargo {
            EndDatePolicy::SameDayEmbargo
        } else {
            EndDatePolicy::IncludeReferenceDay
        }
    }
}

fn parse_var<T, F>(lookup: &F, key: &str, default: T) -> T
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("Ignoring unparsable {}={:?}, using default", key, raw);
            default
        }),
        None => default,
    }
}
