use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use ohlcv_etl::api::{CsvDirectorySource, MarketDataProvider, YahooClient};
use ohlcv_etl::config::DataSourceKind;
use ohlcv_etl::database::PriceStore;
use ohlcv_etl::fetcher::BackoffKind;
use ohlcv_etl::validator::SuspectBatchPolicy;
use ohlcv_etl::{EtlConfig, InstrumentCatalog, Pipeline, PipelineSettings};

/// Daily OHLCV ingestion into SQLite
#[derive(Parser)]
#[command(name = "ohlcv-etl")]
#[command(version)]
#[command(about = "Fetch a rolling window of daily bars for every catalog instrument and upsert them into SQLite")]
#[command(long_about = "
Fetches daily open/high/low/close/volume history for each instrument in the
catalog, normalizes the provider layout, validates the rows and upserts them
into the historical_prices table keyed by (date, ticker). Re-running over the
same window overwrites rows in place.

Settings are read from the environment (or a .env file) and can be overridden
with flags.

Examples:
  ohlcv-etl run                                  # default universe, last 365 days
  ohlcv-etl run --catalog universe.toml --json   # custom catalog, JSON summary
  ohlcv-etl run --source csv --csv-dir data/     # read <SYMBOL>.csv files
  ohlcv-etl catalog                              # print the default universe as TOML
")]
struct Cli {
    /// Enable debug logging
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the ingestion pipeline once
    Run(RunArgs),
    /// Print the instrument catalog as TOML
    Catalog {
        /// Catalog file to print instead of the default universe
        #[arg(long)]
        catalog: Option<PathBuf>,
    },
}

#[derive(Args)]
struct RunArgs {
    /// SQLite database file
    #[arg(long)]
    database: Option<String>,

    /// TOML instrument catalog (defaults to the built-in universe)
    #[arg(long)]
    catalog: Option<PathBuf>,

    /// Reference date in YYYYMMDD format (defaults to today, UTC)
    #[arg(long, short = 'r')]
    reference_date: Option<String>,

    #[arg(long)]
    lookback_days: Option<i64>,

    /// Include the reference date itself in the window
    #[arg(long)]
    include_today: bool,

    /// Total fetch attempts per instrument
    #[arg(long)]
    max_retries: Option<u32>,

    /// Seconds between fetch attempts
    #[arg(long)]
    retry_delay: Option<u64>,

    #[arg(long, value_enum)]
    backoff: Option<BackoffKind>,

    #[arg(long, value_enum)]
    source: Option<DataSourceKind>,

    /// Directory of <SYMBOL>.csv files for --source csv
    #[arg(long)]
    csv_dir: Option<PathBuf>,

    /// Instruments processed at once
    #[arg(long, short = 'c')]
    concurrency: Option<usize>,

    /// What to do with batches whose mean close is 0
    #[arg(long, value_enum)]
    suspect_policy: Option<SuspectBatchPolicy>,

    /// Print the run summary as JSON
    #[arg(long)]
    json: bool,
}

impl RunArgs {
    fn apply(&self, config: &mut EtlConfig) {
        if let Some(database) = &self.database {
            config.database_path = database.clone();
        }
        if let Some(catalog) = &self.catalog {
            config.catalog_path = Some(catalog.clone());
        }
        if let Some(days) = self.lookback_days {
            config.lookback_days = days;
        }
        if self.include_today {
            config.same_day_embargo = false;
        }
        if let Some(retries) = self.max_retries {
            config.max_retries = retries;
        }
        if let Some(delay) = self.retry_delay {
            config.retry_delay_seconds = delay;
        }
        if let Some(backoff) = self.backoff {
            config.backoff = backoff;
        }
        if let Some(source) = self.source {
            config.data_source = source;
        }
        if let Some(dir) = &self.csv_dir {
            config.csv_data_dir = dir.clone();
        }
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }
        if let Some(policy) = self.suspect_policy {
            config.suspect_batch_policy = policy;
        }
    }
}

fn init_logging(verbose: bool) -> Result<()> {
    let default_filter = if verbose { "ohlcv_etl=debug" } else { "ohlcv_etl=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow!("setting default subscriber failed: {}", e))
}

fn load_catalog(path: Option<&PathBuf>) -> Result<InstrumentCatalog> {
    match path {
        Some(path) => Ok(InstrumentCatalog::from_file(path)?),
        None => Ok(InstrumentCatalog::default_universe()),
    }
}

fn parse_reference_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y%m%d")
        .with_context(|| format!("reference date must be YYYYMMDD, got: {}", raw))
}

async fn run(args: RunArgs) -> Result<()> {
    let mut config = EtlConfig::from_env();
    args.apply(&mut config);

    let catalog = load_catalog(config.catalog_path.as_ref())?;
    if catalog.is_empty() {
        return Err(anyhow!("instrument catalog is empty"));
    }

    let provider: Arc<dyn MarketDataProvider> = match config.data_source {
        DataSourceKind::Yahoo => Arc::new(YahooClient::new(&config)?),
        DataSourceKind::Csv => Arc::new(CsvDirectorySource::new(config.csv_data_dir.clone())),
    };
    let store = PriceStore::connect(&config.database_path)
        .await
        .with_context(|| format!("opening database {}", config.database_path))?;

    info!("📋 {} instruments, source: {:?}", catalog.len(), config.data_source);
    let pipeline = Pipeline::new(PipelineSettings::from(&config), catalog, provider, Arc::new(store));

    let summary = match &args.reference_date {
        Some(raw) => pipeline.run(parse_reference_date(raw)?).await?,
        None => pipeline.run_today().await?,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("{}", summary);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    match cli.command {
        Command::Run(args) => {
            if let Err(e) = run(args).await {
                error!("Run aborted: {:#}", e);
                eprintln!("❌ {:#}", e);
                std::process::exit(1);
            }
        }
        Command::Catalog { catalog } => {
            let catalog = load_catalog(catalog.as_ref())?;
            print!("{}", catalog.to_toml()?);
        }
    }

    Ok(())
}
