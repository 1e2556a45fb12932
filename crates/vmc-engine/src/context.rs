//! Per-execution context handed to every doer.
//!
//! Carries an explicit engine reference, an immutable key/value bag (current
//! price, stock tuning rates) and an optional cancellation token. Cloning is
//! cheap; derived contexts copy the bag on write.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use vmc_core::types::Amount;

use crate::doer::Doer;
use crate::engine::Engine;
use crate::error::Result;

/// Key under which the price of the item being served is stored.
pub const CURRENT_PRICE_KEY: &str = "run/current-price";

#[derive(Debug, Clone, PartialEq)]
pub enum ContextValue {
    Price(Amount),
    Tune(f32),
    Text(String),
}

#[derive(Clone, Default)]
pub struct ExecContext {
    engine: Option<Engine>,
    values: Arc<HashMap<String, ContextValue>>,
    cancel: Option<CancellationToken>,
}

impl ExecContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_engine(mut self, engine: Engine) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn engine(&self) -> Option<&Engine> {
        self.engine.as_ref()
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn cancellation(&self) -> Option<&CancellationToken> {
        self.cancel.as_ref()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|t| t.is_cancelled())
    }

    /// Derive a context with `key` set. The receiver is unchanged.
    pub fn with_value(&self, key: impl Into<String>, value: ContextValue) -> Self {
        let mut next = self.clone();
        Arc::make_mut(&mut next.values).insert(key.into(), value);
        next
    }

    /// Derive a context with `key` removed.
    pub fn without(&self, key: &str) -> Self {
        if !self.values.contains_key(key) {
            return self.clone();
        }
        let mut next = self.clone();
        Arc::make_mut(&mut next.values).remove(key);
        next
    }

    pub fn value(&self, key: &str) -> Option<&ContextValue> {
        self.values.get(key)
    }

    pub fn with_price(&self, price: Amount) -> Self {
        self.with_value(CURRENT_PRICE_KEY, ContextValue::Price(price))
    }

    pub fn price(&self) -> Option<Amount> {
        match self.value(CURRENT_PRICE_KEY) {
            Some(ContextValue::Price(p)) => Some(*p),
            _ => None,
        }
    }

    /// Tuning rate stored under `key`, if any.
    pub fn tune(&self, key: &str) -> Option<f32> {
        match self.value(key) {
            Some(ContextValue::Tune(rate)) => Some(*rate),
            _ => None,
        }
    }

    /// Execute `d` through the engine when one is attached, so the profile
    /// hook sees it; otherwise call it directly.
    pub async fn exec(&self, d: &dyn Doer) -> Result<()> {
        match &self.engine {
            Some(engine) => engine.exec(self, d).await,
            None => d.execute(self).await,
        }
    }

    /// Like [`exec`](Self::exec) but skips profiling.
    pub async fn exec_part(&self, d: &dyn Doer) -> Result<()> {
        match &self.engine {
            Some(engine) => engine.exec_part(self, d).await,
            None => d.execute(self).await,
        }
    }
}

impl fmt::Debug for ExecContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecContext")
            .field("engine", &self.engine.is_some())
            .field("values", &self.values)
            .field("cancellable", &self.cancel.is_some())
            .finish()
    }
}
