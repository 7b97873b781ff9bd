use thiserror::Error;

/// Errors raised by the ingestion pipeline.
///
/// Fetch-side variants (`Transport`, `EmptyResponse`, `DegenerateData`) are
/// retried by the fetcher; everything else is reported as-is.
#[derive(Debug, Error)]
pub enum EtlError {
    #[error("transport failure for {symbol}: {message}")]
    Transport { symbol: String, message: String },

    #[error("empty response for {symbol}")]
    EmptyResponse { symbol: String },

    #[error("degenerate response for {symbol}: close prices are entirely zero or null")]
    DegenerateData { symbol: String },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("write failure: {0}")]
    Write(String),

    #[error("pre-flight check failed: {0}")]
    Preflight(String),

    #[error("lookback must be non-negative, got {0} days")]
    InvalidLookback(i64),

    #[error("extraction window is inverted: start {start} is after end {end}")]
    InvertedWindow {
        start: chrono::NaiveDate,
        end: chrono::NaiveDate,
    },

    #[error("catalog error: {0}")]
    Catalog(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl EtlError {
    pub fn transport(symbol: &str, message: impl Into<String>) -> Self {
        EtlError::Transport {
            symbol: symbol.to_string(),
            message: message.into(),
        }
    }

    /// Whether another fetch attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EtlError::Transport { .. } | EtlError::EmptyResponse { .. } | EtlError::DegenerateData { .. }
        )
    }
}

/// Returned by the fetcher once every attempt for an instrument has failed.
#[derive(Debug, Error)]
#[error("fetch for {symbol} failed after {attempts} attempt(s): {last_error}")]
pub struct FetchFailure {
    pub symbol: String,
    pub attempts: u32,
    #[source]
    pub last_error: EtlError,
}

pub type Result<T> = std::result::Result<T, EtlError>;
