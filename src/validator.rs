use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use tracing::{debug, warn};

use crate::models::raw::value_as_f64;
use crate::models::{CanonicalRecord, DraftRecord};

/// What to do with a batch whose mean close is exactly zero
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SuspectBatchPolicy {
    /// Log and write it anyway
    #[default]
    Write,
    /// Log and skip the write; the instrument is reported as failed
    Withhold,
}

impl FromStr for SuspectBatchPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "write" => Ok(SuspectBatchPolicy::Write),
            "withhold" => Ok(SuspectBatchPolicy::Withhold),
            other => Err(format!("unknown suspect batch policy '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ValidationOutcome {
    pub records: Vec<CanonicalRecord>,
    /// Rows missing a date or ticker
    pub dropped: usize,
    /// Numeric cells replaced with 0
    pub substitutions: usize,
    /// Non-empty batch with a mean close of exactly 0
    pub suspect: bool,
}

impl ValidationOutcome {
    pub fn mean_close(&self) -> Option<f64> {
        if self.records.is_empty() {
            return None;
        }
        let total: f64 = self.records.iter().map(|r| r.close).sum();
        Some(total / self.records.len() as f64)
    }
}

/// Coerce draft rows into canonical records.
///
/// Unusable numeric cells become 0 rather than dropping the row; only a
/// missing date or ticker drops it.
pub fn validate(drafts: Vec<DraftRecord>) -> ValidationOutcome {
    let mut outcome = ValidationOutcome::default();

    for draft in drafts {
        let Some(date) = draft.date else {
            outcome.dropped += 1;
            continue;
        };
        if draft.ticker.trim().is_empty() {
            outcome.dropped += 1;
            continue;
        }

        let mut price = |value: &Value, column: &str| -> f64 {
            match value_as_f64(value) {
                Some(v) if v.is_finite() && v >= 0.0 => v,
                _ => {
                    debug!("{} {}: {} is {:?}, defaulting to 0", draft.ticker, date, column, value);
                    outcome.substitutions += 1;
                    0.0
                }
            }
        };

        let open = price(&draft.open, "open");
        let high = price(&draft.high, "high");
        let low = price(&draft.low, "low");
        let close = price(&draft.close, "close");
        let adj_close = price(&draft.adj_close, "adj_close");
        let volume = price(&draft.volume, "volume").round() as i64;

        outcome.records.push(CanonicalRecord {
            date,
            ticker: draft.ticker,
            asset_type: draft.asset_type,
            sector: draft.sector,
            name: draft.name,
            country: draft.country,
            continent: draft.continent,
            open,
            high,
            low,
            close,
            volume,
            adj_close,
            last_updated: draft.last_updated,
        });
    }

    outcome.suspect = outcome.mean_close() == Some(0.0);

    if let Some(first) = outcome.records.first() {
        if outcome.substitutions > 0 {
            warn!(
                "⚠️ {}: {} numeric values defaulted to 0 across {} rows",
                first.ticker,
                outcome.substitutions,
                outcome.records.len()
            );
        }
        if outcome.suspect {
            warn!(
                "⚠️ {}: mean close is 0 across {} rows, batch looks suspect",
                first.ticker,
                outcome.records.len()
            );
        }
    }
    if outcome.dropped > 0 {
        warn!("Dropped {} rows missing date or ticker", outcome.dropped);
    }

    outcome
}
