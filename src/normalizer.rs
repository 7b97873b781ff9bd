use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, warn};

use crate::catalog::InstrumentCatalog;
use crate::models::raw::value_as_date;
use crate::models::{DraftRecord, Field, RawSeries};

/// Draft rows for one instrument plus the rows that had no usable date
#[derive(Debug, Clone, Default)]
pub struct NormalizedBatch {
    pub records: Vec<DraftRecord>,
    pub dropped: usize,
}

/// Maps any provider layout onto the destination column set and attaches
/// catalog metadata.
pub struct SchemaNormalizer<'a> {
    catalog: &'a InstrumentCatalog,
}

impl<'a> SchemaNormalizer<'a> {
    pub fn new(catalog: &'a InstrumentCatalog) -> Self {
        Self { catalog }
    }

    pub fn normalize(&self, raw: &RawSeries, symbol: &str) -> NormalizedBatch {
        self.normalize_at(raw, symbol, Utc::now())
    }

    /// Same as [`normalize`](Self::normalize) with an explicit `last_updated`
    pub fn normalize_at(
        &self,
        raw: &RawSeries,
        symbol: &str,
        fetched_at: DateTime<Utc>,
    ) -> NormalizedBatch {
        let instrument = self.catalog.resolve(symbol);
        let asset_type = instrument.asset_type.as_str().to_string();
        let table = raw.table(symbol);

        if !table.has(Field::AdjClose) {
            debug!("No adjusted close column for {}, using close", symbol);
        }

        let cell = |row: usize, field: Field| -> Value {
            table.cell(row, field).cloned().unwrap_or(Value::Null)
        };

        let mut batch = NormalizedBatch::default();
        if instrument.symbol.trim().is_empty() {
            warn!("Blank ticker, dropping all {} rows", table.len());
            batch.dropped = table.len();
            return batch;
        }

        for row in 0..table.len() {
            let Some(date) = table.cell(row, Field::Date).and_then(value_as_date) else {
                batch.dropped += 1;
                continue;
            };

            let close = cell(row, Field::Close);
            let adj_close = match cell(row, Field::AdjClose) {
                Value::Null => close.clone(),
                adj => adj,
            };

            batch.records.push(DraftRecord {
                date: Some(date),
                ticker: instrument.symbol.clone(),
                asset_type: asset_type.clone(),
                sector: instrument.sector.clone(),
                name: instrument.name.clone(),
                country: instrument.country.clone(),
                continent: instrument.continent.clone(),
                open: cell(row, Field::Open),
                high: cell(row, Field::High),
                low: cell(row, Field::Low),
                close,
                volume: cell(row, Field::Volume),
                adj_close,
                last_updated: fetched_at,
            });
        }

        if batch.dropped > 0 {
            warn!("Dropped {} rows without a readable date for {}", batch.dropped, symbol);
        }
        debug!(
            "Normalized {} {} rows for {}",
            batch.records.len(),
            raw.shape_name(),
            symbol
        );
        batch
    }
}
