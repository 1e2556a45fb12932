//! A single stock and the gate that debits it.
//!
//! Hardware and spend arguments are scaled by per-stock rates. A tuning
//! rate in the context rescales the argument once per gate.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use vmc_core::config::StockConfig;

use crate::context::ExecContext;
use crate::doer::{self, Arg, Doer, DoerRef};
use crate::engine::Engine;
use crate::error::{EngineError, Result};
use crate::primitive::{Func, FuncArg};

/// `f32` stored in an `AtomicU32`, updated by compare-and-swap.
#[derive(Debug, Default)]
pub struct AtomicF32(AtomicU32);

impl AtomicF32 {
    pub fn new(v: f32) -> Self {
        Self(AtomicU32::new(v.to_bits()))
    }

    pub fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Acquire))
    }

    pub fn store(&self, v: f32) {
        self.0.store(v.to_bits(), Ordering::Release);
    }

    /// Add `delta`, returning the previous value.
    pub fn fetch_add(&self, delta: f32) -> f32 {
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            let next = (f32::from_bits(current) + delta).to_bits();
            match self
                .0
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(prev) => return f32::from_bits(prev),
                Err(actual) => current = actual,
            }
        }
    }
}

/// Context key holding the tuning rate for stock `name`.
pub fn tune_key(name: &str) -> String {
    format!("run/inventory-{}-tune", name)
}

/// Scale `arg` by `rate`. Zero stays zero; any other argument gives at
/// least 1.
pub fn translate(arg: Arg, rate: f32) -> f32 {
    if arg == 0 {
        return 0.0;
    }
    let result = (f64::from(arg) * f64::from(rate)).round() as f32;
    if result == 0.0 {
        1.0
    } else {
        result
    }
}

/// A named consumable with a float level.
pub struct Stock {
    name: String,
    code: u32,
    enabled: AtomicBool,
    check: bool,
    hw_rate: f32,
    spend_rate: f32,
    min: f32,
    value: AtomicF32,
    tune_key: String,
}

impl Stock {
    /// Build a stock from its declaration and register its actions:
    /// `stock.<name>.spend1`, `stock.<name>.spend(?)` and, when
    /// `register_add` is set, the gated `add.<name>(?)`.
    pub fn new(config: &StockConfig, engine: &Engine) -> Result<Arc<Stock>> {
        if config.name.is_empty() {
            return Err(EngineError::InvalidStock("stock=(empty) is invalid".into()));
        }
        if config.spend_rate < 0.0 {
            return Err(EngineError::InvalidStock(format!(
                "stock={} invalid spend_rate={}",
                config.name, config.spend_rate
            )));
        }
        let rate_or_one = |r: f32| if r == 0.0 { 1.0 } else { r };

        let stock = Arc::new(Stock {
            name: config.name.clone(),
            code: config.code,
            enabled: AtomicBool::new(true),
            check: config.check,
            hw_rate: rate_or_one(config.hw_rate),
            spend_rate: rate_or_one(config.spend_rate),
            min: config.min,
            value: AtomicF32::default(),
            tune_key: tune_key(&config.name),
        });

        if !config.register_add.is_empty() {
            stock.register_add(&config.register_add, engine)?;
        }

        let s = Arc::clone(&stock);
        engine.register(
            format!("stock.{}.spend1", stock.name),
            Arc::new(Func::sync(format!("stock.{}.spend1", stock.name), move |_| {
                s.spend_value(s.translate_spend(1));
                Ok(())
            })),
        );
        let s = Arc::clone(&stock);
        engine.register(
            format!("stock.{}.spend(?)", stock.name),
            Arc::new(FuncArg::sync(
                format!("stock.{}.spend", stock.name),
                move |_, arg| {
                    s.spend_value(s.translate_spend(arg));
                    Ok(())
                },
            )),
        );
        Ok(stock)
    }

    fn register_add(self: &Arc<Self>, scenario: &str, engine: &Engine) -> Result<()> {
        let add_name = format!("add.{}(?)", self.name);
        let template = engine
            .parse_text(&add_name, scenario)
            .map_err(|e| e.context(format!("stock={} register_add", self.name)))?;
        // Check for a free slot. A not-yet-registered action is accepted, it
        // is resolved on first use.
        match doer::arg_apply(&template, 0) {
            Ok((_, true)) => {}
            Err(e) if e.is_not_resolved() => {}
            Ok((_, false)) => {
                return Err(EngineError::InvalidStock(format!(
                    "stock={} register_add={} no free argument",
                    self.name, scenario
                )))
            }
            Err(e) => {
                return Err(e.context(format!(
                    "stock={} register_add={}",
                    self.name, scenario
                )))
            }
        }
        engine.register(add_name, self.wrap(template));
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn code(&self) -> u32 {
        self.code
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Release);
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Release);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn value(&self) -> f32 {
        self.value.load()
    }

    pub fn set(&self, v: f32) {
        self.value.store(v);
    }

    /// True if spending `v` keeps the level at or above the threshold.
    pub fn has(&self, v: f32) -> bool {
        self.value.load() - v >= self.min
    }

    pub fn tune_key(&self) -> &str {
        &self.tune_key
    }

    pub fn translate_hw(&self, arg: Arg) -> f32 {
        translate(arg, self.hw_rate)
    }

    pub fn translate_spend(&self, arg: Arg) -> f32 {
        translate(arg, self.spend_rate)
    }

    /// Gate `d` on this stock. `d` must have a free argument slot.
    pub fn wrap(self: &Arc<Self>, d: DoerRef) -> DoerRef {
        Arc::new(StockGate {
            stock: Arc::clone(self),
            before: d,
            after: None,
            arg: 0,
            spend: 0.0,
        })
    }

    fn spend_value(&self, v: f32) {
        if self.is_enabled() {
            self.value.fetch_add(-v);
        }
    }
}

impl fmt::Display for Stock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stock(name={} value={})", self.name, self.value())
    }
}

/// Wraps an action with stock bookkeeping.
///
/// `before` is the unbound template. Applying an argument produces a new
/// gate whose `after` holds the template bound to the hardware argument.
pub struct StockGate {
    stock: Arc<Stock>,
    before: DoerRef,
    after: Option<DoerRef>,
    arg: Arg,
    spend: f32,
}

impl StockGate {
    fn bind(&self, arg: Arg) -> Result<StockGate> {
        let hw_arg = self.stock.translate_hw(arg) as Arg;
        let (after, applied) =
            doer::arg_apply(&self.before, hw_arg).map_err(|e| e.named(&self.stock.to_string()))?;
        if !applied {
            return Err(EngineError::ArgNotApplied.named(&self.stock.to_string()));
        }
        Ok(StockGate {
            stock: Arc::clone(&self.stock),
            before: Arc::clone(&self.before),
            after: Some(after),
            arg,
            spend: self.stock.translate_spend(arg),
        })
    }

    fn bound(&self) -> Result<&DoerRef> {
        self.after
            .as_ref()
            .ok_or_else(|| EngineError::ArgNotApplied.named(&self.describe()))
    }

    fn check(&self) -> Result<()> {
        if !self.stock.is_enabled() || !self.stock.check || self.stock.has(self.spend) {
            return Ok(());
        }
        Err(EngineError::StockLow.context(format!("stock={}", self.stock.name)))
    }
}

#[async_trait]
impl Doer for StockGate {
    fn validate(&self) -> Result<()> {
        self.bound()?
            .validate()
            .map_err(|e| e.context(format!("stock={}", self.stock.name)))?;
        self.check()
    }

    async fn execute(&self, ctx: &ExecContext) -> Result<()> {
        if let Some(rate) = ctx.tune(self.stock.tune_key()) {
            let tuned_arg = (f64::from(self.arg) * f64::from(rate)).round() as Arg;
            debug!(
                stock = %self.stock.name,
                arg = self.arg,
                rate,
                tuned_arg,
                "inventory tuning"
            );
            let tuned = self.bind(tuned_arg).map_err(|e| {
                e.context(format!(
                    "stock={} tuned_arg={}",
                    self.stock.name, tuned_arg
                ))
            })?;
            let tuned_ctx = ctx.without(self.stock.tune_key());
            return tuned_ctx.exec(&tuned).await;
        }

        let after = self.bound()?;
        self.check()
            .map_err(|e| e.context(format!("stock={} check fail", self.stock.name)))?;
        after
            .validate()
            .map_err(|e| e.context(format!("stock={}", self.stock.name)))?;
        ctx.exec(after.as_ref()).await?;
        self.stock.spend_value(self.spend);
        Ok(())
    }

    fn describe(&self) -> String {
        format!("stock.{}({})", self.stock.name, self.arg)
    }

    fn apply_arg(&self, arg: Arg) -> Result<Option<DoerRef>> {
        if self.after.is_some() {
            return Err(EngineError::ArgOverwrite.named(&self.stock.to_string()));
        }
        Ok(Some(Arc::new(self.bind(arg)?)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn stock_config(name: &str) -> StockConfig {
        StockConfig {
            name: name.to_string(),
            ..Default::default()
        }
    }

    fn hw_recorder(engine: &Engine, name: &str) -> Arc<Mutex<Vec<Arg>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let tag = name.trim_end_matches("(?)").to_string();
        engine.register(
            name,
            Arc::new(FuncArg::sync(tag, move |_, arg| {
                s.lock().unwrap().push(arg);
                Ok(())
            })),
        );
        seen
    }

    // ---- helpers ----

    #[test]
    fn test_atomic_f32() {
        let v = AtomicF32::new(1.5);
        assert_eq!(v.fetch_add(2.0), 1.5);
        assert_eq!(v.load(), 3.5);
        v.store(-1.0);
        assert_eq!(v.load(), -1.0);
    }

    #[test]
    fn test_translate() {
        assert_eq!(translate(0, 5.0), 0.0);
        assert_eq!(translate(3, 1.5), 5.0); // 4.5 rounds away from zero
        assert_eq!(translate(1, 0.1), 1.0);
        assert_eq!(translate(10, 0.33), 3.0);
    }

    // ---- construction ----

    #[test]
    fn test_stock_errors() {
        let e = Engine::new();
        let cases: Vec<(StockConfig, &str)> = vec![
            (stock_config(""), "stock=(empty) is invalid"),
            (
                StockConfig {
                    spend_rate: -1.0,
                    ..stock_config("bad")
                },
                "stock=bad invalid spend_rate=-1",
            ),
            (
                StockConfig {
                    register_add: "sleep(1ms)".into(),
                    ..stock_config("cup")
                },
                "stock=cup register_add=sleep(1ms) no free argument",
            ),
            (
                StockConfig {
                    register_add: "sleep(99999999999999999999999ms)".into(),
                    ..stock_config("cup")
                },
                "stock=cup register_add",
            ),
        ];
        for (config, expected) in cases {
            let err = Stock::new(&config, &e).err().unwrap();
            assert!(
                err.to_string().contains(expected),
                "{} does not contain {}",
                err,
                expected
            );
        }
    }

    #[test]
    fn test_register_add_accepts_forward_reference() {
        let e = Engine::new();
        let config = StockConfig {
            register_add: "water.pour(?)".into(),
            ..stock_config("water")
        };
        Stock::new(&config, &e).unwrap();
        let names = e.list();
        assert!(names.contains(&"add.water(?)".to_string()));
        assert!(names.contains(&"stock.water.spend1".to_string()));
        assert!(names.contains(&"stock.water.spend(?)".to_string()));
    }

    #[tokio::test]
    async fn test_spend_actions() {
        let e = Engine::new();
        let stock = Stock::new(
            &StockConfig {
                spend_rate: 2.0,
                ..stock_config("cup")
            },
            &e,
        )
        .unwrap();
        stock.set(10.0);
        let ctx = e.context();
        e.exec(&ctx, e.resolve("stock.cup.spend1").as_ref())
            .await
            .unwrap();
        assert_eq!(stock.value(), 8.0);
        e.exec(&ctx, e.resolve("stock.cup.spend(3)").as_ref())
            .await
            .unwrap();
        assert_eq!(stock.value(), 2.0);

        stock.disable();
        e.exec(&ctx, e.resolve("stock.cup.spend1").as_ref())
            .await
            .unwrap();
        assert_eq!(stock.value(), 2.0);
    }

    // ---- gate ----

    #[tokio::test]
    async fn test_gate_binds_hw_arg_and_spends() {
        let e = Engine::new();
        let hw = hw_recorder(&e, "water.pour(?)");
        let stock = Stock::new(
            &StockConfig {
                hw_rate: 2.0,
                spend_rate: 1.5,
                check: true,
                register_add: "water.pour(?)".into(),
                ..stock_config("water")
            },
            &e,
        )
        .unwrap();
        stock.set(10.0);

        let d = e.try_resolve("add.water(3)").unwrap();
        assert_eq!(d.describe(), "stock.water(3)");
        d.validate().unwrap();
        e.exec(&e.context(), d.as_ref()).await.unwrap();
        assert_eq!(*hw.lock().unwrap(), vec![6]);
        assert_eq!(stock.value(), 5.0);

        assert!(d.apply_arg(1).unwrap_err().is_arg_binding());
    }

    #[tokio::test]
    async fn test_gate_stock_low() {
        let e = Engine::new();
        let hw = hw_recorder(&e, "sugar.drop(?)");
        let stock = Stock::new(
            &StockConfig {
                check: true,
                min: 1.0,
                register_add: "sugar.drop(?)".into(),
                ..stock_config("sugar")
            },
            &e,
        )
        .unwrap();
        stock.set(3.0);

        let d = e.try_resolve("add.sugar(3)").unwrap();
        let err = d.validate().unwrap_err();
        assert!(err.is_stock_low());
        let err = e.exec(&e.context(), d.as_ref()).await.unwrap_err();
        assert!(err.is_stock_low());
        assert!(err.to_string().contains("check fail"));
        assert!(hw.lock().unwrap().is_empty());
        assert_eq!(stock.value(), 3.0);

        // disabled stocks are not checked and not debited
        stock.disable();
        d.validate().unwrap();
        e.exec(&e.context(), d.as_ref()).await.unwrap();
        assert_eq!(*hw.lock().unwrap(), vec![3]);
        assert_eq!(stock.value(), 3.0);
    }

    #[tokio::test]
    async fn test_gate_failure_keeps_value() {
        let e = Engine::new();
        e.register(
            "cup.drop(?)",
            Arc::new(FuncArg::sync("cup.drop", |_, _| {
                Err(EngineError::msg("cup jammed"))
            })),
        );
        let stock = Stock::new(
            &StockConfig {
                register_add: "cup.drop(?)".into(),
                ..stock_config("cup")
            },
            &e,
        )
        .unwrap();
        stock.set(5.0);
        let d = e.try_resolve("add.cup(1)").unwrap();
        assert!(e.exec(&e.context(), d.as_ref()).await.is_err());
        assert_eq!(stock.value(), 5.0);
    }

    #[tokio::test]
    async fn test_gate_unbound_fails_validate() {
        let e = Engine::new();
        let stock = Stock::new(&stock_config("tea"), &e).unwrap();
        let gate = stock.wrap(e.resolve("ignore(?)"));
        assert!(matches!(gate.validate().unwrap_err().root(), EngineError::ArgNotApplied));
    }

    #[tokio::test]
    async fn test_tuning_applies_once() {
        let e = Engine::new();
        let hw = hw_recorder(&e, "tea.drop(?)");
        let stock = Stock::new(
            &StockConfig {
                spend_rate: 0.33,
                register_add: "tea.drop(?)".into(),
                ..stock_config("tea")
            },
            &e,
        )
        .unwrap();
        stock.set(100.0);

        let ctx = e
            .context()
            .with_value(stock.tune_key(), crate::context::ContextValue::Tune(1.25));
        let d = e.parse_text("menu", "add.tea(15) add.tea(10)").unwrap();
        d.validate().unwrap();
        e.exec(&ctx, d.as_ref()).await.unwrap();

        // tuning is applied to each gate, never compounded
        assert_eq!(*hw.lock().unwrap(), vec![19, 13]);
        let spent = (19.0f64 * 0.33).round() + (13.0f64 * 0.33).round();
        assert_eq!(stock.value(), 100.0 - spent as f32);
        // the caller's context still carries the tuning
        assert_eq!(ctx.tune(stock.tune_key()), Some(1.25));
    }
}
