//! End-to-end pipeline runs against stub providers and file-backed SQLite

use assert_matches::assert_matches;
use ohlcv_etl::database::PriceSink;
use ohlcv_etl::fetcher::BackoffPolicy;
use ohlcv_etl::models::{AssetType, Instrument};
use ohlcv_etl::period::EndDatePolicy;
use ohlcv_etl::pipeline::{InstrumentState, SectorStats, Stage};
use ohlcv_etl::validator::SuspectBatchPolicy;
use ohlcv_etl::{EtlError, InstrumentCatalog, Pipeline, PipelineSettings};
use pretty_assertions::assert_eq;
use std::sync::Arc;

use crate::common::api_mock::{FlakySink, StubProvider, StubResponse};
use crate::common::test_data::{catalog, date, flat_bars, multi_level_bars};
use crate::common::{fresh_test_database, logging};

fn settings() -> PipelineSettings {
    PipelineSettings {
        lookback_days: 5,
        end_date_policy: EndDatePolicy::SameDayEmbargo,
        backoff: BackoffPolicy::immediate(3),
        concurrency: 1,
        suspect_policy: SuspectBatchPolicy::Write,
    }
}

fn week() -> Vec<(&'static str, f64)> {
    vec![
        ("2024-01-02", 100.0),
        ("2024-01-03", 101.5),
        ("2024-01-04", 99.0),
        ("2024-01-05", 102.0),
    ]
}

#[test_log::test(tokio::test)]
async fn test_partial_failure_isolation() {
    logging::log_test_step("One failing instrument out of three");
    let db = fresh_test_database().await;
    let provider = Arc::new(
        StubProvider::new()
            .with("AAA", StubResponse::Bars(flat_bars(&week())))
            .with("BBB", StubResponse::TransportError)
            .with("CCC", StubResponse::Bars(multi_level_bars("CCC", &week()))),
    );

    let pipeline = Pipeline::new(
        settings(),
        catalog(&["AAA", "BBB", "CCC"]),
        provider.clone(),
        Arc::new(db.store.clone()),
    );
    let summary = pipeline.run(date(2024, 1, 6)).await.unwrap();

    assert_eq!(summary.window.start, date(2024, 1, 1));
    assert_eq!(summary.window.end, date(2024, 1, 5));
    assert_eq!(summary.success_count, 2);
    assert_eq!(summary.error_count, 1);
    assert_eq!(summary.total_rows_inserted, 8);
    assert_eq!(provider.calls("BBB"), 3);
    assert_eq!(provider.calls("AAA"), 1);

    let failed = &summary.reports[1];
    assert_eq!(failed.symbol, "BBB");
    assert_eq!(failed.state, InstrumentState::Failed(Stage::Fetch));
    assert_eq!(failed.attempts, 3);
    assert!(failed.error.as_deref().unwrap().contains("BBB"));

    assert_eq!(db.store.records_for("AAA").await.unwrap().len(), 4);
    assert_eq!(db.store.records_for("BBB").await.unwrap().len(), 0);
    assert_eq!(db.store.records_for("CCC").await.unwrap().len(), 4);
}

#[test_log::test(tokio::test)]
async fn test_zero_close_is_written_without_suspect_flag() {
    let db = fresh_test_database().await;
    let provider = Arc::new(StubProvider::new().with(
        "ABC",
        StubResponse::Bars(flat_bars(&[
            ("2024-01-02", 10.0),
            ("2024-01-03", 11.0),
            ("2024-01-04", 0.0),
        ])),
    ));

    let pipeline = Pipeline::new(settings(), catalog(&["ABC"]), provider, Arc::new(db.store.clone()));
    let summary = pipeline.run(date(2024, 1, 6)).await.unwrap();

    let report = &summary.reports[0];
    assert_eq!(report.state, InstrumentState::Written);
    assert_eq!(report.rows_written, 3);
    assert!(!report.suspect);

    let stored = db.store.records_for("ABC").await.unwrap();
    let closes: Vec<f64> = stored.iter().map(|r| r.close).collect();
    assert_eq!(closes, vec![10.0, 11.0, 0.0]);
}

#[test_log::test(tokio::test)]
async fn test_empty_instrument_is_retried_then_recorded() {
    let db = fresh_test_database().await;
    let provider = Arc::new(
        StubProvider::new()
            .with("ABC", StubResponse::Bars(flat_bars(&week())))
            .with("XYZ", StubResponse::Empty),
    );

    let pipeline = Pipeline::new(
        settings(),
        catalog(&["XYZ", "ABC"]),
        provider.clone(),
        Arc::new(db.store.clone()),
    );
    let summary = pipeline.run(date(2024, 1, 6)).await.unwrap();

    assert_eq!(provider.calls("XYZ"), 3);
    assert_eq!(summary.error_count, 1);
    assert_eq!(summary.success_count, 1);
    assert!(db.store.records_for("XYZ").await.unwrap().is_empty());
    assert_eq!(db.store.count_rows().await.unwrap(), 4);
}

#[tokio::test]
async fn test_rerun_is_idempotent() {
    let db = fresh_test_database().await;
    let provider = Arc::new(
        StubProvider::new()
            .with("AAA", StubResponse::Bars(flat_bars(&week())))
            .with("BBB", StubResponse::Bars(multi_level_bars("BBB", &week()))),
    );
    let pipeline = Pipeline::new(
        settings(),
        catalog(&["AAA", "BBB"]),
        provider,
        Arc::new(db.store.clone()),
    );

    pipeline.run(date(2024, 1, 6)).await.unwrap();
    let first: Vec<(String, f64)> = db
        .store
        .records_for("AAA")
        .await
        .unwrap()
        .into_iter()
        .map(|r| (r.date.to_string(), r.close))
        .collect();

    pipeline.run(date(2024, 1, 6)).await.unwrap();
    let second: Vec<(String, f64)> = db
        .store
        .records_for("AAA")
        .await
        .unwrap()
        .into_iter()
        .map(|r| (r.date.to_string(), r.close))
        .collect();

    assert_eq!(db.store.count_rows().await.unwrap(), 8);
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_preflight_failure_aborts_before_fetching() {
    let db = fresh_test_database().await;
    let provider = Arc::new(StubProvider::new().with("AAA", StubResponse::Bars(flat_bars(&week()))));
    let sink = FlakySink::new(db.store.clone()).unreachable();

    let pipeline = Pipeline::new(settings(), catalog(&["AAA"]), provider.clone(), Arc::new(sink));
    let result = pipeline.run(date(2024, 1, 6)).await;

    assert_matches!(result, Err(EtlError::Preflight(_)));
    assert_eq!(provider.calls("AAA"), 0);
}

#[tokio::test]
async fn test_invalid_lookback_is_rejected() {
    let db = fresh_test_database().await;
    let mut settings = settings();
    settings.lookback_days = -3;

    let pipeline = Pipeline::new(
        settings,
        catalog(&["AAA"]),
        Arc::new(StubProvider::new()),
        Arc::new(db.store.clone()),
    );
    assert_matches!(pipeline.run(date(2024, 1, 6)).await, Err(EtlError::InvalidLookback(-3)));
}

#[test_log::test(tokio::test)]
async fn test_write_failure_is_isolated() {
    let db = fresh_test_database().await;
    let provider = Arc::new(
        StubProvider::new()
            .with("AAA", StubResponse::Bars(flat_bars(&week())))
            .with("BBB", StubResponse::Bars(flat_bars(&week()))),
    );
    let sink = FlakySink::new(db.store.clone()).rejecting("AAA");

    let pipeline = Pipeline::new(settings(), catalog(&["AAA", "BBB"]), provider, Arc::new(sink));
    let summary = pipeline.run(date(2024, 1, 6)).await.unwrap();

    assert_eq!(summary.reports[0].state, InstrumentState::Failed(Stage::Write));
    assert_eq!(summary.reports[1].state, InstrumentState::Written);
    assert_eq!(summary.error_count, 1);
    assert_eq!(db.store.records_for("AAA").await.unwrap().len(), 0);
    assert_eq!(db.store.records_for("BBB").await.unwrap().len(), 4);
}

#[tokio::test]
async fn test_sector_breakdown() {
    let db = fresh_test_database().await;
    let catalog = InstrumentCatalog::new(vec![
        Instrument::new("AAA", "Technology", AssetType::Stock, "A", "United States", "North America"),
        Instrument::new("BBB", "Technology", AssetType::Stock, "B", "United States", "North America"),
        Instrument::new("HHH", "Healthcare", AssetType::Stock, "H", "United States", "North America"),
        Instrument::new("^IDX", "Index", AssetType::Index, "Idx", "France", "Europe"),
    ])
    .unwrap();
    let provider = Arc::new(
        StubProvider::new()
            .with("AAA", StubResponse::Bars(flat_bars(&week())))
            .with("BBB", StubResponse::Empty)
            .with("HHH", StubResponse::Bars(flat_bars(&week()[..2])))
            .with("^IDX", StubResponse::Bars(flat_bars(&week()))),
    );

    let pipeline = Pipeline::new(settings(), catalog, provider, Arc::new(db.store.clone()));
    let summary = pipeline.run(date(2024, 1, 6)).await.unwrap();

    assert_eq!(
        summary.per_sector.get("Technology"),
        Some(&SectorStats {
            instruments: 2,
            succeeded: 1,
            failed: 1,
            rows_inserted: 4,
        })
    );
    assert_eq!(summary.per_sector["Healthcare"].rows_inserted, 2);
    assert_eq!(summary.per_sector["Index"].succeeded, 1);

    let index_rows = db.store.records_for("^IDX").await.unwrap();
    assert_eq!(index_rows[0].asset_type, "index");
    assert_eq!(index_rows[0].country, "France");
}

#[tokio::test]
async fn test_suspect_batch_policies() {
    // Negative closes pass the fetch check but validate to 0
    let suspect = flat_bars(&[("2024-01-02", -1.0), ("2024-01-03", -2.0)]);

    for (policy, expected) in [
        (SuspectBatchPolicy::Write, InstrumentState::Written),
        (SuspectBatchPolicy::Withhold, InstrumentState::Failed(Stage::Validate)),
    ] {
        let db = fresh_test_database().await;
        let provider = Arc::new(StubProvider::new().with("ABC", StubResponse::Bars(suspect.clone())));
        let mut settings = settings();
        settings.suspect_policy = policy;

        let pipeline = Pipeline::new(settings, catalog(&["ABC"]), provider, Arc::new(db.store.clone()));
        let summary = pipeline.run(date(2024, 1, 6)).await.unwrap();
        let report = &summary.reports[0];

        assert!(report.suspect);
        assert_eq!(report.state, expected, "policy {:?}", policy);
        let stored = db.store.count_rows().await.unwrap();
        match policy {
            SuspectBatchPolicy::Write => assert_eq!(stored, 2),
            SuspectBatchPolicy::Withhold => assert_eq!(stored, 0),
        }
    }
}

#[tokio::test]
async fn test_concurrent_run_keeps_catalog_order() {
    let db = fresh_test_database().await;
    let symbols = ["S1", "S2", "S3", "S4", "S5", "S6"];
    let mut provider = StubProvider::new();
    for symbol in symbols {
        provider = provider.with(symbol, StubResponse::Bars(flat_bars(&week())));
    }
    let mut settings = settings();
    settings.concurrency = 4;

    let pipeline = Pipeline::new(settings, catalog(&symbols), Arc::new(provider), Arc::new(db.store.clone()));
    let summary = pipeline.run(date(2024, 1, 6)).await.unwrap();

    let order: Vec<&str> = summary.reports.iter().map(|r| r.symbol.as_str()).collect();
    assert_eq!(order, symbols.to_vec());
    assert_eq!(summary.success_count, 6);
    assert_eq!(db.store.count_rows().await.unwrap(), 24);
}

#[tokio::test]
async fn test_summary_serializes_to_json() {
    let db = fresh_test_database().await;
    let provider = Arc::new(StubProvider::new().with("AAA", StubResponse::Bars(flat_bars(&week()))));
    let pipeline = Pipeline::new(settings(), catalog(&["AAA", "BBB"]), provider, Arc::new(db.store.clone()));
    let summary = pipeline.run(date(2024, 1, 6)).await.unwrap();

    let json = serde_json::to_value(&summary).unwrap();
    assert_eq!(json["success_count"], 1);
    assert_eq!(json["error_count"], 1);
    assert_eq!(json["reports"][1]["state"]["failed"], "fetch");
    assert!(summary.to_string().contains("BBB (fetch)"));

    db.store.ping().await.unwrap();
}
