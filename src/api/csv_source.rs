use chrono::NaiveDate;
use csv::ReaderBuilder;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::MarketDataProvider;
use crate::error::{EtlError, Result};
use crate::models::raw::value_as_date;
use crate::models::{ExtractionWindow, Field, RawSeries};

/// Reads daily bars from `<dir>/<SYMBOL>.csv`.
///
/// Accepts a plain single-header file or the three-line header written by
/// yfinance downloads:
///
/// ```text
/// Price,Close,High,Low,Open,Volume
/// Ticker,ABC,ABC,ABC,ABC,ABC
/// Date,,,,,
/// 2024-01-02,10.5,11.0,9.5,10.0,1000
/// ```
pub struct CsvDirectorySource {
    dir: PathBuf,
}

impl CsvDirectorySource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, symbol: &str) -> PathBuf {
        self.dir.join(format!("{symbol}.csv"))
    }

    fn parse(symbol: &str, path: &Path, content: &str) -> Result<RawSeries> {
        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(content.as_bytes());

        let mut records = Vec::new();
        for record in reader.records() {
            let record = record
                .map_err(|e| EtlError::transport(symbol, format!("read {}: {e}", path.display())))?;
            records.push(record.iter().map(|s| s.to_string()).collect::<Vec<String>>());
        }

        let mut lines = records.into_iter();
        let Some(header) = lines.next() else {
            return Ok(RawSeries::empty());
        };
        let rest: Vec<Vec<String>> = lines.collect();

        let two_level = rest
            .first()
            .and_then(|row| row.first())
            .map(|cell| cell.trim().eq_ignore_ascii_case("ticker"))
            .unwrap_or(false);

        if two_level {
            let tickers = &rest[0];
            let mut columns: Vec<(String, String)> = header
                .iter()
                .enumerate()
                .map(|(i, outer)| {
                    let inner = tickers.get(i).cloned().unwrap_or_default();
                    (outer.trim().to_string(), inner.trim().to_string())
                })
                .collect();
            // The first column holds dates under a "Price"/"Ticker" label.
            if let Some(first) = columns.first_mut() {
                *first = ("Date".to_string(), String::new());
            }

            let data_start = match rest.get(1).and_then(|row| row.first()) {
                Some(cell) if Field::from_header(cell) == Some(Field::Date) => 2,
                _ => 1,
            };
            let rows = rest.into_iter().skip(data_start).map(to_values).collect();
            Ok(RawSeries::MultiLevel { columns, rows })
        } else {
            let columns = header.iter().map(|h| h.trim().to_string()).collect();
            let rows = rest.into_iter().map(to_values).collect();
            Ok(RawSeries::Flat { columns, rows })
        }
    }
}

fn to_values(row: Vec<String>) -> Vec<Value> {
    row.into_iter().map(|cell| cell_value(&cell)).collect()
}

fn cell_value(cell: &str) -> Value {
    let cell = cell.trim();
    if cell.is_empty() {
        return Value::Null;
    }
    if let Ok(n) = cell.parse::<i64>() {
        return Value::from(n);
    }
    match cell.parse::<f64>() {
        Ok(f) if f.is_finite() => Value::from(f),
        _ => Value::String(cell.to_string()),
    }
}

/// Drop rows whose date parses and lies outside `[start, end]`. Rows with an
/// unreadable date are left for the normalizer to account for.
fn restrict_to_window(series: RawSeries, symbol: &str, window: &ExtractionWindow) -> RawSeries {
    let keep = |row: &Vec<Value>, date_col: Option<usize>| -> bool {
        match date_col.and_then(|c| row.get(c)).and_then(value_as_date) {
            Some(date) => window.contains(date),
            None => true,
        }
    };

    match series {
        RawSeries::Flat { columns, rows } => {
            let date_col = columns
                .iter()
                .position(|h| Field::from_header(h) == Some(Field::Date));
            let rows = rows.into_iter().filter(|r| keep(r, date_col)).collect();
            RawSeries::Flat { columns, rows }
        }
        RawSeries::MultiLevel { columns, rows } => {
            let date_col = columns
                .iter()
                .position(|(outer, _)| Field::from_header(outer) == Some(Field::Date));
            let rows = rows.into_iter().filter(|r| keep(r, date_col)).collect();
            RawSeries::MultiLevel { columns, rows }
        }
        other => {
            debug!("No window filtering for {} {} series", symbol, other.shape_name());
            other
        }
    }
}

#[async_trait::async_trait]
impl MarketDataProvider for CsvDirectorySource {
    async fn fetch(&self, symbol: &str, start: NaiveDate, end: NaiveDate) -> Result<RawSeries> {
        let path = self.path_for(symbol);
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| EtlError::transport(symbol, format!("read {}: {e}", path.display())))?;

        let series = Self::parse(symbol, &path, &content)?;
        let series = restrict_to_window(series, symbol, &ExtractionWindow { start, end });
        debug!(
            "Loaded {} {} rows for {} from {}",
            series.len(),
            series.shape_name(),
            symbol,
            path.display()
        );
        Ok(series)
    }
}
