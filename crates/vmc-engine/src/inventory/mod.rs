//! Consumable stocks and their registry.
//!
//! Each stock registers gated `add.<name>(?)` and debit actions with the
//! engine. The inventory keeps the stocks by name and handles telemetry
//! export and on-disk persistence.

mod stock;

pub use stock::{translate, tune_key, AtomicF32, Stock, StockGate};

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use vmc_core::config::InventoryConfig;

use crate::context::{ContextValue, ExecContext};
use crate::engine::Engine;
use crate::error::{EngineError, Result};

/// Persisted state of one stock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockState {
    pub name: String,
    pub enabled: bool,
    pub value: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventorySnapshot {
    pub saved_at: DateTime<Utc>,
    pub stocks: Vec<StockState>,
}

/// Stock level as reported to telemetry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeleStock {
    pub code: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub value: f32,
}

pub struct Inventory {
    config: InventoryConfig,
    stocks: RwLock<BTreeMap<String, Arc<Stock>>>,
}

impl Inventory {
    /// Build every declared stock, registering its actions with `engine`.
    ///
    /// All stock errors are reported together.
    pub fn new(config: &InventoryConfig, engine: &Engine) -> Result<Self> {
        let mut stocks = BTreeMap::new();
        let mut errs = Vec::new();
        for sc in &config.stocks {
            match Stock::new(sc, engine) {
                Ok(stock) => {
                    debug!(stock = %sc, "inventory stock");
                    stocks.insert(sc.name.clone(), stock);
                }
                Err(e) => errs.push(e),
            }
        }
        EngineError::fold(errs)?;
        Ok(Self {
            config: config.clone(),
            stocks: RwLock::new(stocks),
        })
    }

    pub fn config(&self) -> &InventoryConfig {
        &self.config
    }

    pub fn get(&self, name: &str) -> Option<Arc<Stock>> {
        self.stocks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn get_by_code(&self, code: u32) -> Option<Arc<Stock>> {
        self.stocks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .find(|s| s.code() == code)
            .cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.stocks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    pub fn enable_all(&self) {
        for s in self.all() {
            s.enable();
        }
    }

    pub fn disable_all(&self) {
        for s in self.all() {
            s.disable();
        }
    }

    fn all(&self) -> Vec<Arc<Stock>> {
        self.stocks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Derive a context in which adds to stock `name` are scaled by `rate`.
    pub fn with_tuning(&self, ctx: &ExecContext, name: &str, rate: f32) -> Result<ExecContext> {
        let stock = self
            .get(name)
            .ok_or_else(|| EngineError::StockNotFound(name.to_string()))?;
        Ok(ctx.with_value(stock.tune_key(), ContextValue::Tune(rate)))
    }

    pub fn snapshot(&self) -> InventorySnapshot {
        let stocks = self
            .all()
            .iter()
            .map(|s| StockState {
                name: s.name().to_string(),
                enabled: s.is_enabled(),
                value: s.value(),
            })
            .collect();
        InventorySnapshot {
            saved_at: Utc::now(),
            stocks,
        }
    }

    /// Apply a snapshot. Stocks no longer configured are skipped.
    pub fn restore(&self, snapshot: &InventorySnapshot) {
        for state in &snapshot.stocks {
            let Some(stock) = self.get(&state.name) else {
                warn!(stock = %state.name, "inventory restore: unknown stock skipped");
                continue;
            };
            stock.set(state.value);
            if state.enabled {
                stock.enable();
            } else {
                stock.disable();
            }
        }
    }

    pub fn persist_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.snapshot())?;
        fs::write(path, json)?;
        info!(path = %path.display(), "inventory saved");
        Ok(())
    }

    /// Restore from `path`. A missing file leaves the inventory untouched.
    pub fn load_from(&self, path: &Path) -> Result<()> {
        if !path.exists() {
            debug!(path = %path.display(), "inventory state not found");
            return Ok(());
        }
        let content = fs::read_to_string(path)?;
        let snapshot: InventorySnapshot = serde_json::from_str(&content)?;
        self.restore(&snapshot);
        info!(path = %path.display(), saved_at = %snapshot.saved_at, "inventory loaded");
        Ok(())
    }

    /// Levels of enabled stocks, ordered by code then name.
    pub fn tele(&self) -> Vec<TeleStock> {
        let mut out: Vec<TeleStock> = self
            .all()
            .iter()
            .filter(|s| s.is_enabled())
            .map(|s| TeleStock {
                code: s.code(),
                name: self.config.tele_add_name.then(|| s.name().to_string()),
                value: s.value(),
            })
            .collect();
        out.sort_by(|a, b| a.code.cmp(&b.code).then_with(|| a.name.cmp(&b.name)));
        out
    }

    /// Set levels from telemetry. Nothing changes unless every entry
    /// matches a stock, by name if given, otherwise by code.
    pub fn set_tele(&self, levels: &[TeleStock]) -> Result<()> {
        let mut matched = Vec::with_capacity(levels.len());
        for t in levels {
            let stock = match &t.name {
                Some(name) if !name.is_empty() => self.get(name),
                _ => self.get_by_code(t.code),
            };
            match stock {
                Some(s) => matched.push((s, t.value)),
                None => {
                    return Err(EngineError::StockNotFound(format!(
                        "name={} code={}",
                        t.name.as_deref().unwrap_or(""),
                        t.code
                    )))
                }
            }
        }
        for (s, v) in matched {
            s.set(v);
        }
        Ok(())
    }
}
