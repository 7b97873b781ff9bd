use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{EtlError, Result};
use crate::models::CanonicalRecord;

/// Result of one batch write
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertReport {
    pub written: usize,
    /// Rows rejected while preparing the write
    pub skipped: usize,
}

/// Destination for canonical price rows
#[async_trait]
pub trait PriceSink: Send + Sync {
    /// Cheap reachability check, run once before any instrument is processed
    async fn ping(&self) -> Result<()>;

    async fn ensure_schema(&self) -> Result<()>;

    /// Insert-or-replace every row keyed by (date, ticker) in one transaction,
    /// creating the table first if it is missing. A failed statement rolls
    /// back the whole batch.
    async fn upsert(&self, records: &[CanonicalRecord]) -> Result<UpsertReport>;
}

/// SQLite store backing the `historical_prices` table
#[derive(Clone)]
pub struct PriceStore {
    pool: SqlitePool,
}

impl PriceStore {
    /// Open (or create) a database file
    pub async fn connect(database_path: &str) -> Result<Self> {
        let path = database_path.strip_prefix("sqlite:").unwrap_or(database_path);
        debug!("Connecting to database: {}", path);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(SqliteConnectOptions::new().filename(path).create_if_missing(true))
            .await?;

        sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;
        sqlx::query("PRAGMA synchronous = NORMAL").execute(&pool).await?;

        info!("Database opened at {}", path);
        Ok(Self { pool })
    }

    /// Private in-memory database; a single connection keeps every query on
    /// the same database.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Ok(Self { pool })
    }

    pub async fn count_rows(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM historical_prices")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("count")?)
    }

    /// Stored rows for one ticker, oldest first
    pub async fn records_for(&self, ticker: &str) -> Result<Vec<CanonicalRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT date, ticker, type, sector, name, country, continent,
                   open, high, low, close, volume, adj_close, last_updated
            FROM historical_prices
            WHERE ticker = ?
            ORDER BY date
            "#,
        )
        .bind(ticker)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(record_from_row).collect()
    }
}

fn record_from_row(row: &SqliteRow) -> Result<CanonicalRecord> {
    Ok(CanonicalRecord {
        date: row.try_get::<NaiveDate, _>("date")?,
        ticker: row.try_get("ticker")?,
        asset_type: row.try_get("type")?,
        sector: row.try_get("sector")?,
        name: row.try_get("name")?,
        country: row.try_get("country")?,
        continent: row.try_get("continent")?,
        open: row.try_get("open")?,
        high: row.try_get("high")?,
        low: row.try_get("low")?,
        close: row.try_get("close")?,
        volume: row.try_get("volume")?,
        adj_close: row.try_get("adj_close")?,
        last_updated: row.try_get::<DateTime<Utc>, _>("last_updated")?,
    })
}

/// Last line of defence before SQL: rows the validator should never emit
fn is_writable(record: &CanonicalRecord) -> bool {
    let prices = [record.open, record.high, record.low, record.close, record.adj_close];
    !record.ticker.trim().is_empty()
        && prices.iter().all(|p| p.is_finite() && *p >= 0.0)
        && record.volume >= 0
}

#[async_trait]
impl PriceSink for PriceStore {
    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS historical_prices (
                date TEXT NOT NULL,
                ticker TEXT NOT NULL,
                type TEXT NOT NULL DEFAULT 'stock',
                sector TEXT NOT NULL DEFAULT 'Unknown',
                name TEXT NOT NULL DEFAULT 'Unknown',
                country TEXT NOT NULL DEFAULT 'Unknown',
                continent TEXT NOT NULL DEFAULT 'Unknown',
                open REAL NOT NULL DEFAULT 0,
                high REAL NOT NULL DEFAULT 0,
                low REAL NOT NULL DEFAULT 0,
                close REAL NOT NULL DEFAULT 0,
                volume INTEGER NOT NULL DEFAULT 0,
                adj_close REAL NOT NULL DEFAULT 0,
                last_updated TEXT NOT NULL,
                PRIMARY KEY (date, ticker)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_historical_prices_ticker ON historical_prices(ticker)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn upsert(&self, records: &[CanonicalRecord]) -> Result<UpsertReport> {
        let (writable, rejected): (Vec<&CanonicalRecord>, Vec<&CanonicalRecord>) =
            records.iter().partition(|r| is_writable(r));

        for record in &rejected {
            warn!("Skipping unwritable row {} {}", record.ticker, record.date);
        }

        let mut report = UpsertReport {
            written: 0,
            skipped: rejected.len(),
        };
        if writable.is_empty() {
            return Ok(report);
        }

        self.ensure_schema()
            .await
            .map_err(|e| EtlError::Write(e.to_string()))?;

        let write_err = |e: sqlx::Error| EtlError::Write(e.to_string());
        let mut tx = self.pool.begin().await.map_err(write_err)?;

        for record in &writable {
            sqlx::query(
                r#"
                INSERT INTO historical_prices
                    (date, ticker, type, sector, name, country, continent,
                     open, high, low, close, volume, adj_close, last_updated)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(date, ticker) DO UPDATE SET
                    type = excluded.type,
                    sector = excluded.sector,
                    name = excluded.name,
                    country = excluded.country,
                    continent = excluded.continent,
                    open = excluded.open,
                    high = excluded.high,
                    low = excluded.low,
                    close = excluded.close,
                    volume = excluded.volume,
                    adj_close = excluded.adj_close,
                    last_updated = excluded.last_updated
                "#,
            )
            .bind(record.date)
            .bind(&record.ticker)
            .bind(&record.asset_type)
            .bind(&record.sector)
            .bind(&record.name)
            .bind(&record.country)
            .bind(&record.continent)
            .bind(record.open)
            .bind(record.high)
            .bind(record.low)
            .bind(record.close)
            .bind(record.volume)
            .bind(record.adj_close)
            .bind(record.last_updated)
            .execute(&mut *tx)
            .await
            .map_err(write_err)?;
        }

        tx.commit().await.map_err(write_err)?;
        report.written = writable.len();
        Ok(report)
    }
}
