use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

pub mod raw;

pub use raw::{Field, RawSeries};

pub const UNKNOWN: &str = "Unknown";

/// Instrument kind as stored in the `type` column
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AssetType {
    #[default]
    Stock,
    Index,
}

impl AssetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetType::Stock => "stock",
            AssetType::Index => "index",
        }
    }
}

impl fmt::Display for AssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn unknown() -> String {
    UNKNOWN.to_string()
}

/// Catalog entry describing one tradable symbol
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Instrument {
    pub symbol: String,
    #[serde(default = "unknown")]
    pub sector: String,
    #[serde(default, rename = "type")]
    pub asset_type: AssetType,
    #[serde(default = "unknown")]
    pub name: String,
    #[serde(default = "unknown")]
    pub country: String,
    #[serde(default = "unknown")]
    pub continent: String,
}

impl Instrument {
    pub fn new(
        symbol: &str,
        sector: &str,
        asset_type: AssetType,
        name: &str,
        country: &str,
        continent: &str,
    ) -> Self {
        Self {
            symbol: symbol.to_string(),
            sector: sector.to_string(),
            asset_type,
            name: name.to_string(),
            country: country.to_string(),
            continent: continent.to_string(),
        }
    }

    /// Placeholder metadata for a symbol missing from the catalog
    pub fn unregistered(symbol: &str) -> Self {
        Self::new(symbol, UNKNOWN, AssetType::Stock, UNKNOWN, UNKNOWN, UNKNOWN)
    }
}

/// Inclusive date range for one extraction run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl ExtractionWindow {
    pub fn days_count(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }
}

impl fmt::Display for ExtractionWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} to {}", self.start, self.end)
    }
}

/// A normalized row whose numeric cells have not been coerced yet.
///
/// `date` stays optional so the validator can account for rows that reach it
/// without one.
#[derive(Debug, Clone, PartialEq)]
pub struct DraftRecord {
    pub date: Option<NaiveDate>,
    pub ticker: String,
    pub asset_type: String,
    pub sector: String,
    pub name: String,
    pub country: String,
    pub continent: String,
    pub open: Value,
    pub high: Value,
    pub low: Value,
    pub close: Value,
    pub volume: Value,
    pub adj_close: Value,
    pub last_updated: DateTime<Utc>,
}

/// One instrument-day observation in the fixed destination schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub date: NaiveDate,
    pub ticker: String,
    #[serde(rename = "type")]
    pub asset_type: String,
    pub sector: String,
    pub name: String,
    pub country: String,
    pub continent: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
    pub adj_close: f64,
    pub last_updated: DateTime<Utc>,
}
