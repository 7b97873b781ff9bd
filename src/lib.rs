//! Daily OHLCV ingestion: fetch a rolling window of bars for every catalog
//! instrument, normalize provider layouts onto one schema, validate, and
//! upsert into SQLite keyed by (date, ticker).

pub mod api;
pub mod catalog;
pub mod config;
pub mod database;
pub mod error;
pub mod fetcher;
pub mod models;
pub mod normalizer;
pub mod period;
pub mod pipeline;
pub mod validator;

pub use catalog::InstrumentCatalog;
pub use config::EtlConfig;
pub use error::{EtlError, Result};
pub use pipeline::{Pipeline, PipelineSettings, RunSummary};
