//! Database integration tests

use chrono::{TimeZone, Utc};
use ohlcv_etl::database::{PriceSink, PriceStore, UpsertReport};
use ohlcv_etl::models::CanonicalRecord;
use pretty_assertions::assert_eq;
use tokio_test::assert_ok;

use crate::common::test_data::date;
use crate::common::{fresh_test_database, logging};

fn record(ticker: &str, day: u32, close: f64) -> CanonicalRecord {
    CanonicalRecord {
        date: date(2024, 1, day),
        ticker: ticker.to_string(),
        asset_type: "stock".to_string(),
        sector: "Technology".to_string(),
        name: format!("{} Inc.", ticker),
        country: "United States".to_string(),
        continent: "North America".to_string(),
        open: close - 0.5,
        high: close + 1.0,
        low: close - 1.0,
        close,
        volume: 1_000_000,
        adj_close: close,
        last_updated: Utc.with_ymd_and_hms(2024, 1, 6, 18, 0, 0).unwrap(),
    }
}

#[test_log::test(tokio::test)]
async fn test_upsert_twice_is_idempotent() {
    logging::log_test_step("Applying the same batch twice");
    let db = fresh_test_database().await;
    let batch: Vec<CanonicalRecord> = (2..=5).map(|d| record("AAA", d, 100.0 + d as f64)).collect();

    let first = assert_ok!(db.store.upsert(&batch).await);
    let after_first = db.store.records_for("AAA").await.unwrap();
    let second = assert_ok!(db.store.upsert(&batch).await);
    let after_second = db.store.records_for("AAA").await.unwrap();

    assert_eq!(first, UpsertReport { written: 4, skipped: 0 });
    assert_eq!(second, first);
    assert_eq!(after_first, after_second);
    assert_eq!(after_second, batch);
    assert_eq!(db.store.count_rows().await.unwrap(), 4);
}

#[tokio::test]
async fn test_same_key_is_overwritten_in_place() {
    let db = fresh_test_database().await;
    db.store.upsert(&[record("AAA", 2, 100.0), record("AAA", 3, 101.0)]).await.unwrap();

    let mut revised = record("AAA", 3, 99.5);
    revised.sector = "Semiconductors".to_string();
    revised.last_updated = Utc.with_ymd_and_hms(2024, 1, 7, 18, 0, 0).unwrap();
    db.store.upsert(&[revised.clone()]).await.unwrap();

    let stored = db.store.records_for("AAA").await.unwrap();
    logging::log_test_data("Stored rows", &stored);
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[1], revised);
    assert_eq!(stored[0].close, 100.0);
}

#[tokio::test]
async fn test_tickers_share_dates_without_collision() {
    let db = fresh_test_database().await;
    db.store
        .upsert(&[record("AAA", 2, 10.0), record("BBB", 2, 20.0), record("MC.PA", 2, 740.0)])
        .await
        .unwrap();

    assert_eq!(db.store.count_rows().await.unwrap(), 3);
    assert_eq!(db.store.records_for("MC.PA").await.unwrap()[0].close, 740.0);
}

#[tokio::test]
async fn test_rows_survive_reconnect() {
    let db = fresh_test_database().await;
    db.store.upsert(&[record("AAA", 2, 10.0)]).await.unwrap();

    let reopened = PriceStore::connect(&db.path).await.unwrap();
    reopened.ensure_schema().await.unwrap();
    assert_eq!(reopened.records_for("AAA").await.unwrap(), vec![record("AAA", 2, 10.0)]);
}

#[tokio::test]
async fn test_empty_batch_writes_nothing() {
    let db = fresh_test_database().await;
    let report = db.store.upsert(&[]).await.unwrap();
    assert_eq!(report, UpsertReport::default());
    assert_eq!(db.store.count_rows().await.unwrap(), 0);
}
