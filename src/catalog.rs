//! Instrument catalog.
//!
//! The catalog is either the built-in default universe or a TOML file with
//! one `[[instrument]]` table per symbol:
//!
//! ```toml
//! [[instrument]]
//! symbol = "NVDA"
//! sector = "Technology"
//! type = "stock"
//! name = "NVIDIA Corporation"
//! country = "United States"
//! continent = "North America"
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::info;

use crate::error::{EtlError, Result};
use crate::models::{AssetType, Instrument};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstrumentCatalog {
    #[serde(rename = "instrument", default)]
    instruments: Vec<Instrument>,
}

impl InstrumentCatalog {
    /// Build a catalog, rejecting blank or duplicate symbols
    pub fn new(instruments: Vec<Instrument>) -> Result<Self> {
        let mut seen = HashSet::new();
        for instrument in &instruments {
            if instrument.symbol.trim().is_empty() {
                return Err(EtlError::Catalog("instrument with blank symbol".to_string()));
            }
            if !seen.insert(instrument.symbol.as_str()) {
                return Err(EtlError::Catalog(format!(
                    "duplicate symbol in catalog: {}",
                    instrument.symbol
                )));
            }
        }
        Ok(Self { instruments })
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| EtlError::Catalog(format!("read {}: {}", path.display(), e)))?;
        let catalog = Self::from_toml(&content)?;
        info!("📋 Loaded {} instruments from {}", catalog.len(), path.display());
        Ok(catalog)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let parsed: InstrumentCatalog = toml::from_str(content)
            .map_err(|e| EtlError::Catalog(format!("parse catalog TOML: {e}")))?;
        Self::new(parsed.instruments)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| EtlError::Catalog(format!("serialize catalog: {e}")))
    }

    pub fn get(&self, symbol: &str) -> Option<&Instrument> {
        self.instruments.iter().find(|i| i.symbol == symbol)
    }

    /// Registered metadata, or "Unknown"/stock placeholders
    pub fn resolve(&self, symbol: &str) -> Instrument {
        self.get(symbol)
            .cloned()
            .unwrap_or_else(|| Instrument::unregistered(symbol))
    }

    pub fn instruments(&self) -> &[Instrument] {
        &self.instruments
    }

    pub fn len(&self) -> usize {
        self.instruments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instruments.is_empty()
    }

    /// The default universe: large-cap US growth names plus a few index and
    /// non-US listings.
    pub fn default_universe() -> Self {
        use AssetType::{Index, Stock};

        let na = ("United States", "North America");
        let instruments = vec![
            Instrument::new("NVDA", "Technology", Stock, "NVIDIA Corporation", na.0, na.1),
            Instrument::new("MSFT", "Technology", Stock, "Microsoft Corporation", na.0, na.1),
            Instrument::new("GOOGL", "Communication Services", Stock, "Alphabet Inc.", na.0, na.1),
            Instrument::new("AMZN", "Consumer Discretionary", Stock, "Amazon.com Inc.", na.0, na.1),
            Instrument::new(
                "TSM",
                "Technology",
                Stock,
                "Taiwan Semiconductor Manufacturing",
                "Taiwan",
                "Asia",
            ),
            Instrument::new("LLY", "Healthcare", Stock, "Eli Lilly and Company", na.0, na.1),
            Instrument::new("ENPH", "Energy", Stock, "Enphase Energy Inc.", na.0, na.1),
            Instrument::new("PLTR", "Technology", Stock, "Palantir Technologies Inc.", na.0, na.1),
            Instrument::new("HD", "Consumer Discretionary", Stock, "The Home Depot Inc.", na.0, na.1),
            Instrument::new("CRWD", "Technology", Stock, "CrowdStrike Holdings Inc.", na.0, na.1),
            Instrument::new("MC.PA", "Consumer Discretionary", Stock, "LVMH", "France", "Europe"),
            Instrument::new("^GSPC", "Index", Index, "S&P 500", na.0, na.1),
            Instrument::new("^FCHI", "Index", Index, "CAC 40", "France", "Europe"),
        ];

        Self { instruments }
    }
}
