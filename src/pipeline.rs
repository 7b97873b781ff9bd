use chrono::{NaiveDate, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::api::MarketDataProvider;
use crate::catalog::InstrumentCatalog;
use crate::config::EtlConfig;
use crate::database::PriceSink;
use crate::error::{EtlError, Result};
use crate::fetcher::{BackoffPolicy, RawDataFetcher};
use crate::models::{ExtractionWindow, Instrument};
use crate::normalizer::SchemaNormalizer;
use crate::period::{compute_window, EndDatePolicy};
use crate::validator::{validate, SuspectBatchPolicy};

/// Run-level knobs, detached from where they were loaded
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub lookback_days: i64,
    pub end_date_policy: EndDatePolicy,
    pub backoff: BackoffPolicy,
    pub concurrency: usize,
    pub suspect_policy: SuspectBatchPolicy,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from(&EtlConfig::default())
    }
}

impl From<&EtlConfig> for PipelineSettings {
    fn from(config: &EtlConfig) -> Self {
        Self {
            lookback_days: config.lookback_days,
            end_date_policy: config.end_date_policy(),
            backoff: config.backoff_policy(),
            concurrency: config.concurrency.max(1),
            suspect_policy: config.suspect_batch_policy,
        }
    }
}

/// Stage an instrument failed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Fetch,
    Validate,
    Write,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Fetch => "fetch",
            Stage::Validate => "validate",
            Stage::Write => "write",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InstrumentState {
    Pending,
    Fetched,
    Normalized,
    Validated,
    Written,
    Failed(Stage),
}

impl InstrumentState {
    pub fn is_success(&self) -> bool {
        matches!(self, InstrumentState::Written)
    }
}

/// Outcome of one instrument's fetch → normalize → validate → write pass
#[derive(Debug, Clone, Serialize)]
pub struct InstrumentReport {
    pub symbol: String,
    pub sector: String,
    pub state: InstrumentState,
    pub attempts: u32,
    pub rows_written: usize,
    /// Rows without a usable date or ticker
    pub rows_dropped: usize,
    /// Rows rejected by the writer
    pub rows_skipped: usize,
    pub substitutions: usize,
    pub suspect: bool,
    pub error: Option<String>,
}

impl InstrumentReport {
    fn pending(instrument: &Instrument) -> Self {
        Self {
            symbol: instrument.symbol.clone(),
            sector: instrument.sector.clone(),
            state: InstrumentState::Pending,
            attempts: 0,
            rows_written: 0,
            rows_dropped: 0,
            rows_skipped: 0,
            substitutions: 0,
            suspect: false,
            error: None,
        }
    }

    fn advance(&mut self, state: InstrumentState) {
        debug!("{}: {:?} -> {:?}", self.symbol, self.state, state);
        self.state = state;
    }

    fn fail(mut self, stage: Stage, error: impl ToString) -> Self {
        self.advance(InstrumentState::Failed(stage));
        self.error = Some(error.to_string());
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SectorStats {
    pub instruments: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub rows_inserted: usize,
}

/// End-of-run statistics
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub window: ExtractionWindow,
    pub success_count: usize,
    pub error_count: usize,
    pub total_rows_inserted: usize,
    pub per_sector: BTreeMap<String, SectorStats>,
    pub reports: Vec<InstrumentReport>,
    pub duration_ms: u64,
}

impl RunSummary {
    fn from_reports(window: ExtractionWindow, reports: Vec<InstrumentReport>, started: Instant) -> Self {
        let mut summary = RunSummary {
            window,
            success_count: 0,
            error_count: 0,
            total_rows_inserted: 0,
            per_sector: BTreeMap::new(),
            reports: Vec::new(),
            duration_ms: started.elapsed().as_millis() as u64,
        };

        for report in &reports {
            let sector = summary.per_sector.entry(report.sector.clone()).or_default();
            sector.instruments += 1;
            if report.state.is_success() {
                summary.success_count += 1;
                summary.total_rows_inserted += report.rows_written;
                sector.succeeded += 1;
                sector.rows_inserted += report.rows_written;
            } else {
                summary.error_count += 1;
                sector.failed += 1;
            }
        }

        summary.reports = reports;
        summary
    }

    pub fn failures(&self) -> impl Iterator<Item = &InstrumentReport> {
        self.reports.iter().filter(|r| !r.state.is_success())
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Window: {}", self.window)?;
        writeln!(
            f,
            "Succeeded: {}  Failed: {}  Rows inserted: {}",
            self.success_count, self.error_count, self.total_rows_inserted
        )?;
        writeln!(f)?;
        writeln!(f, "{:<28} {:>6} {:>6} {:>6} {:>10}", "Sector", "Total", "OK", "Failed", "Rows")?;
        for (sector, stats) in &self.per_sector {
            writeln!(
                f,
                "{:<28} {:>6} {:>6} {:>6} {:>10}",
                sector, stats.instruments, stats.succeeded, stats.failed, stats.rows_inserted
            )?;
        }
        for report in self.failures() {
            if let InstrumentState::Failed(stage) = report.state {
                writeln!(
                    f,
                    "  ❌ {} ({}): {}",
                    report.symbol,
                    stage,
                    report.error.as_deref().unwrap_or("failed")
                )?;
            }
        }
        Ok(())
    }
}

/// Drives every catalog instrument through fetch, normalize, validate and
/// write. One instrument's failure never stops the others.
pub struct Pipeline {
    settings: PipelineSettings,
    catalog: InstrumentCatalog,
    fetcher: RawDataFetcher,
    sink: Arc<dyn PriceSink>,
}

impl Pipeline {
    pub fn new(
        settings: PipelineSettings,
        catalog: InstrumentCatalog,
        provider: Arc<dyn MarketDataProvider>,
        sink: Arc<dyn PriceSink>,
    ) -> Self {
        let fetcher = RawDataFetcher::new(provider, settings.backoff);
        Self {
            settings,
            catalog,
            fetcher,
            sink,
        }
    }

    pub async fn run_today(&self) -> Result<RunSummary> {
        self.run(Utc::now().date_naive()).await
    }

    /// Returns `Err` only when the window is invalid or the destination is
    /// unreachable before any instrument is touched.
    pub async fn run(&self, reference_date: NaiveDate) -> Result<RunSummary> {
        let started = Instant::now();
        let window = compute_window(
            reference_date,
            self.settings.lookback_days,
            self.settings.end_date_policy,
        )?;

        self.sink
            .ping()
            .await
            .map_err(|e| EtlError::Preflight(e.to_string()))?;
        self.sink
            .ensure_schema()
            .await
            .map_err(|e| EtlError::Preflight(e.to_string()))?;

        info!(
            "🚀 Processing {} instruments for {} ({} worker(s))",
            self.catalog.len(),
            window,
            self.settings.concurrency
        );

        let mut results: Vec<(usize, InstrumentReport)> = stream::iter(self.catalog.instruments().iter().enumerate())
            .map(|(idx, instrument)| async move { (idx, self.process(instrument, &window).await) })
            .buffer_unordered(self.settings.concurrency.max(1))
            .collect()
            .await;
        results.sort_by_key(|(idx, _)| *idx);

        let reports = results.into_iter().map(|(_, report)| report).collect();
        let summary = RunSummary::from_reports(window, reports, started);

        info!(
            "✅ Run complete: {} succeeded, {} failed, {} rows inserted",
            summary.success_count, summary.error_count, summary.total_rows_inserted
        );
        Ok(summary)
    }

    async fn process(&self, instrument: &Instrument, window: &ExtractionWindow) -> InstrumentReport {
        let mut report = InstrumentReport::pending(instrument);
        let symbol = instrument.symbol.as_str();

        let fetched = match self.fetcher.fetch(instrument, window).await {
            Ok(fetched) => fetched,
            Err(failure) => {
                error!("❌ {}: {}", symbol, failure);
                report.attempts = failure.attempts;
                return report.fail(Stage::Fetch, failure);
            }
        };
        report.attempts = fetched.attempts;
        report.advance(InstrumentState::Fetched);

        let batch = SchemaNormalizer::new(&self.catalog).normalize(&fetched.series, symbol);
        report.rows_dropped = batch.dropped;
        report.advance(InstrumentState::Normalized);

        let outcome = validate(batch.records);
        report.rows_dropped += outcome.dropped;
        report.substitutions = outcome.substitutions;
        report.suspect = outcome.suspect;
        if outcome.suspect && self.settings.suspect_policy == SuspectBatchPolicy::Withhold {
            warn!("⚠️ {}: withholding suspect batch of {} rows", symbol, outcome.records.len());
            return report.fail(Stage::Validate, "suspect batch withheld: mean close is 0");
        }
        report.advance(InstrumentState::Validated);

        match self.sink.upsert(&outcome.records).await {
            Ok(written) => {
                report.rows_written = written.written;
                report.rows_skipped = written.skipped;
                report.advance(InstrumentState::Written);
                info!("✅ {}: {} rows written ({} attempt(s))", symbol, written.written, report.attempts);
                report
            }
            Err(e) => {
                error!("❌ {}: write failed: {}", symbol, e);
                report.fail(Stage::Write, e)
            }
        }
    }
}
