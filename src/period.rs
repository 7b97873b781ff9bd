use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::{EtlError, Result};
use crate::models::ExtractionWindow;

/// Where the window ends relative to the reference date
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum EndDatePolicy {
    /// Stop at the day before the reference date; same-day bars are often
    /// incomplete until the provider settles them.
    #[default]
    SameDayEmbargo,
    IncludeReferenceDay,
}

/// Derive the rolling extraction window for a run.
///
/// `start = reference - lookback_days`; `end` follows `policy`.
pub fn compute_window(
    reference_date: NaiveDate,
    lookback_days: i64,
    policy: EndDatePolicy,
) -> Result<ExtractionWindow> {
    if lookback_days < 0 {
        return Err(EtlError::InvalidLookback(lookback_days));
    }

    let start = reference_date - Duration::days(lookback_days);
    let end = match policy {
        EndDatePolicy::SameDayEmbargo => reference_date - Duration::days(1),
        EndDatePolicy::IncludeReferenceDay => reference_date,
    };

    if end < start {
        return Err(EtlError::InvertedWindow { start, end });
    }

    Ok(ExtractionWindow { start, end })
}
