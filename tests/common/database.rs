//! Test databases backed by temporary files

use ohlcv_etl::database::{PriceSink, PriceStore};
use tempfile::TempDir;

/// A file-backed store that is deleted when dropped
pub struct TestDatabase {
    pub store: PriceStore,
    pub path: String,
    _dir: TempDir,
}

/// Create a fresh database file with the schema in place
pub async fn fresh_test_database() -> TestDatabase {
    let dir = TempDir::new().expect("create temp dir");
    let path = dir.path().join("prices.db").to_string_lossy().to_string();
    let store = PriceStore::connect(&path).await.expect("open test database");
    store.ensure_schema().await.expect("create schema");

    TestDatabase {
        store,
        path,
        _dir: dir,
    }
}
