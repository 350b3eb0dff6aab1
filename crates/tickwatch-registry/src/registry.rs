//! Instrument registry.
//!
//! State lives behind a `parking_lot::RwLock` held only for in-memory
//! read-modify-write; store writes happen on a cloned snapshot after the
//! lock is released.

use crate::error::{RegistryError, RegistryResult};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tickwatch_core::Instrument;
use tickwatch_persistence::{read_json, write_json_atomic};
use tracing::{debug, info, warn};

/// On-disk instrument store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstrumentDocument {
    #[serde(default)]
    pub instruments: Vec<Instrument>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

/// Tracked instruments keyed by symbol.
#[derive(Debug)]
pub struct InstrumentRegistry {
    path: PathBuf,
    instruments: RwLock<Vec<Instrument>>,
}

impl InstrumentRegistry {
    /// Open the store at `path`.
    ///
    /// A missing file yields an empty registry; a corrupt one is an error.
    pub fn open(path: impl Into<PathBuf>) -> RegistryResult<Self> {
        let registry = Self {
            path: path.into(),
            instruments: RwLock::new(Vec::new()),
        };
        registry.reload()?;
        Ok(registry)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-read the store, replacing in-memory state.
    ///
    /// Duplicate symbols in the file keep their first occurrence. Entries
    /// with out-of-range thresholds are excluded.
    pub fn reload(&self) -> RegistryResult<usize> {
        let doc: InstrumentDocument = read_json(&self.path)?.unwrap_or_default();

        let mut loaded: Vec<Instrument> = Vec::with_capacity(doc.instruments.len());
        for inst in doc.instruments {
            if loaded.iter().any(|i| i.symbol == inst.symbol) {
                warn!(symbol = %inst.symbol, "Duplicate instrument in store, keeping first");
                continue;
            }
            if let Err(e) = Instrument::validate_thresholds(inst.threshold_up, inst.threshold_down)
            {
                warn!(symbol = %inst.symbol, error = %e, "Excluding instrument with invalid thresholds");
                continue;
            }
            loaded.push(inst);
        }

        let count = loaded.len();
        *self.instruments.write() = loaded;
        info!(path = %self.path.display(), count, "Loaded instruments");
        Ok(count)
    }

    /// Write the current state to the store.
    pub fn save(&self) -> RegistryResult<()> {
        let doc = InstrumentDocument {
            instruments: self.list(),
            last_updated: Some(Utc::now()),
        };
        write_json_atomic(&self.path, &doc)?;
        debug!(count = doc.instruments.len(), "Saved instruments");
        Ok(())
    }

    /// Save, logging instead of failing; in-memory state stays authoritative.
    fn persist(&self) {
        if let Err(e) = self.save() {
            warn!(path = %self.path.display(), error = %e, "Failed to save instrument store");
        }
    }

    fn with_instrument<R>(
        &self,
        symbol: &str,
        f: impl FnOnce(&mut Instrument) -> RegistryResult<R>,
    ) -> RegistryResult<R> {
        let mut instruments = self.instruments.write();
        let inst = instruments
            .iter_mut()
            .find(|i| i.symbol == symbol)
            .ok_or_else(|| RegistryError::NotFound(symbol.to_string()))?;
        f(inst)
    }

    /// Add a new instrument. Rejects duplicates and invalid thresholds.
    pub fn add(&self, instrument: Instrument) -> RegistryResult<()> {
        Instrument::validate_thresholds(instrument.threshold_up, instrument.threshold_down)?;
        {
            let mut instruments = self.instruments.write();
            if instruments.iter().any(|i| i.symbol == instrument.symbol) {
                return Err(RegistryError::Duplicate(instrument.symbol));
            }
            info!(symbol = %instrument.symbol, market = %instrument.market, "Instrument added");
            instruments.push(instrument);
        }
        self.persist();
        Ok(())
    }

    /// Remove an instrument, returning it.
    pub fn remove(&self, symbol: &str) -> RegistryResult<Instrument> {
        let removed = {
            let mut instruments = self.instruments.write();
            let idx = instruments
                .iter()
                .position(|i| i.symbol == symbol)
                .ok_or_else(|| RegistryError::NotFound(symbol.to_string()))?;
            instruments.remove(idx)
        };
        info!(%symbol, "Instrument removed");
        self.persist();
        Ok(removed)
    }

    pub fn set_enabled(&self, symbol: &str, enabled: bool) -> RegistryResult<()> {
        self.with_instrument(symbol, |inst| {
            inst.enabled = enabled;
            Ok(())
        })?;
        info!(%symbol, enabled, "Instrument toggled");
        self.persist();
        Ok(())
    }

    /// Update both thresholds; the instrument is unchanged on error.
    pub fn set_thresholds(&self, symbol: &str, up: f64, down: f64) -> RegistryResult<()> {
        self.with_instrument(symbol, |inst| Ok(inst.set_thresholds(up, down)?))?;
        info!(%symbol, up, down, "Instrument thresholds updated");
        self.persist();
        Ok(())
    }

    /// Snapshot of all instruments.
    pub fn list(&self) -> Vec<Instrument> {
        self.instruments.read().clone()
    }

    /// Snapshot of enabled instruments.
    pub fn enabled(&self) -> Vec<Instrument> {
        self.instruments
            .read()
            .iter()
            .filter(|i| i.enabled)
            .cloned()
            .collect()
    }

    pub fn get(&self, symbol: &str) -> Option<Instrument> {
        self.instruments
            .read()
            .iter()
            .find(|i| i.symbol == symbol)
            .cloned()
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.instruments.read().iter().any(|i| i.symbol == symbol)
    }

    pub fn len(&self) -> usize {
        self.instruments.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.instruments.read().is_empty()
    }

    pub fn enabled_count(&self) -> usize {
        self.instruments.read().iter().filter(|i| i.enabled).count()
    }

    /// Fold a successful fetch into the instrument state. Not persisted here.
    pub fn record_price(&self, symbol: &str, price: f64, at: DateTime<Utc>) -> RegistryResult<()> {
        self.with_instrument(symbol, |inst| {
            inst.record_price(price, at);
            Ok(())
        })
    }

    /// Mark an accepted alert. Not persisted here.
    pub fn record_alert(&self, symbol: &str, at: DateTime<Utc>) -> RegistryResult<()> {
        self.with_instrument(symbol, |inst| {
            inst.last_alert_time = Some(at);
            Ok(())
        })
    }

    /// Cooldown gate; unknown symbols never alert.
    pub fn can_alert(&self, symbol: &str, now: DateTime<Utc>, cooldown_minutes: u64) -> bool {
        self.instruments
            .read()
            .iter()
            .find(|i| i.symbol == symbol)
            .is_some_and(|i| i.can_alert(now, cooldown_minutes))
    }
}
