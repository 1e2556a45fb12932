//! Bootstrap from configuration.
//!
//! Builds the engine, the inventory and the menu from `[engine]`, installs
//! the profile hook and exposes the configured hook lists.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use tracing::{debug, info, warn};
use vmc_core::config::{EngineConfig, ProfileConfig};
use vmc_core::types::Amount;
use vmc_core::VmcConfig;

use crate::context::ExecContext;
use crate::doer::{Doer, DoerRef};
use crate::engine::Engine;
use crate::error::{EngineError, Result};
use crate::inventory::Inventory;
use crate::primitive::Func;
use crate::profile::ProfileFn;

const DEFAULT_PROFILE_FORMAT: &str = "engine profile action={action} time={time}";

/// Configured scenario lists run at controller lifecycle points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hook {
    OnBoot,
    OnMenuError,
    OnServiceBegin,
    OnServiceEnd,
    OnFrontBegin,
    OnBroken,
}

impl Hook {
    pub const ALL: [Hook; 6] = [
        Hook::OnBoot,
        Hook::OnMenuError,
        Hook::OnServiceBegin,
        Hook::OnServiceEnd,
        Hook::OnFrontBegin,
        Hook::OnBroken,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Hook::OnBoot => "on_boot",
            Hook::OnMenuError => "on_menu_error",
            Hook::OnServiceBegin => "on_service_begin",
            Hook::OnServiceEnd => "on_service_end",
            Hook::OnFrontBegin => "on_front_begin",
            Hook::OnBroken => "on_broken",
        }
    }

    fn list(self, config: &EngineConfig) -> &[String] {
        match self {
            Hook::OnBoot => &config.on_boot,
            Hook::OnMenuError => &config.on_menu_error,
            Hook::OnServiceBegin => &config.on_service_begin,
            Hook::OnServiceEnd => &config.on_service_end,
            Hook::OnFrontBegin => &config.on_front_begin,
            Hook::OnBroken => &config.on_broken,
        }
    }
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A sellable item compiled from `[[engine.menu.item]]`.
#[derive(Clone)]
pub struct MenuItem {
    pub code: String,
    pub name: String,
    pub price: Amount,
    pub doer: DoerRef,
}

impl fmt::Debug for MenuItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MenuItem")
            .field("code", &self.code)
            .field("name", &self.name)
            .field("price", &self.price)
            .field("doer", &self.doer.describe())
            .finish()
    }
}

pub struct Controller {
    config: EngineConfig,
    engine: Engine,
    inventory: Arc<Inventory>,
    menu: BTreeMap<String, MenuItem>,
}

impl Controller {
    /// Build everything `config.engine` declares.
    ///
    /// Every alias, menu item, stock and profile error is collected and
    /// returned together.
    pub fn from_config(config: &VmcConfig) -> Result<Self> {
        let ec = &config.engine;
        let engine = Engine::new();
        let mut errs = Vec::new();

        let inventory = match Inventory::new(&ec.inventory, &engine) {
            Ok(inv) => Some(Arc::new(inv)),
            Err(e) => {
                errs.push(e.context("inventory"));
                None
            }
        };

        for alias in &ec.aliases {
            match engine.parse_text(&alias.name, &alias.scenario) {
                Ok(d) => engine.register(alias.name.as_str(), d),
                Err(e) => errs.push(e.context(format!("alias={}", alias.name))),
            }
        }

        let mut menu = BTreeMap::new();
        for item in &ec.menu.items {
            let name = format!("menu.{}", item.code);
            match engine.parse_text(&name, &item.scenario) {
                Ok(d) => {
                    engine.register(name.as_str(), Arc::clone(&d));
                    menu.insert(
                        item.code.clone(),
                        MenuItem {
                            code: item.code.clone(),
                            name: item.name.clone(),
                            price: Amount::scaled(item.price, config.general.price_scale),
                            doer: d,
                        },
                    );
                }
                Err(e) => errs.push(e.context(format!("menu code={}", item.code))),
            }
        }

        if let Err(e) = install_profile(&engine, &ec.profile) {
            errs.push(e);
        }

        for hook in Hook::ALL {
            register_hook_action(&engine, hook, hook.list(ec));
        }

        EngineError::fold(errs)?;
        let inventory = inventory.ok_or_else(|| EngineError::Config("inventory".into()))?;
        info!(
            actions = engine.list().len(),
            menu = menu.len(),
            stocks = inventory.names().len(),
            "controller ready"
        );
        Ok(Self {
            config: ec.clone(),
            engine,
            inventory,
            menu,
        })
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn inventory(&self) -> &Arc<Inventory> {
        &self.inventory
    }

    pub fn menu_item(&self, code: &str) -> Option<&MenuItem> {
        self.menu.get(code)
    }

    pub fn menu(&self) -> impl Iterator<Item = &MenuItem> {
        self.menu.values()
    }

    /// Context for serving `code`, carrying its price.
    pub fn menu_context(&self, code: &str) -> Option<ExecContext> {
        let item = self.menu_item(code)?;
        Some(self.engine.context().with_price(item.price))
    }

    /// Run the scenarios configured for `hook`. Errors are collected.
    pub async fn run_hook(&self, hook: Hook, ctx: &ExecContext) -> Vec<EngineError> {
        let list = hook.list(&self.config);
        if list.is_empty() {
            return Vec::new();
        }
        debug!(hook = %hook, count = list.len(), "controller hook");
        self.engine.exec_list(ctx, hook.as_str(), list).await
    }

    /// Validate and run menu item `code` with its price in the context.
    ///
    /// On failure the `on_menu_error` hook runs before the error is returned.
    pub async fn serve(&self, code: &str, ctx: &ExecContext) -> Result<()> {
        let item = self
            .menu_item(code)
            .ok_or_else(|| EngineError::NotResolved(format!("menu.{}", code)))?;
        let ctx = ctx.with_price(item.price);
        info!(code = %item.code, name = %item.name, price = %item.price, "menu begin");
        match self.engine.validate_exec(&ctx, item.doer.as_ref()).await {
            Ok(()) => {
                info!(code = %item.code, "menu complete");
                Ok(())
            }
            Err(e) => {
                warn!(code = %item.code, error = %e, "menu failed");
                for he in self.run_hook(Hook::OnMenuError, &ctx).await {
                    warn!(error = %he, "on_menu_error");
                }
                Err(e)
            }
        }
    }
}

fn install_profile(engine: &Engine, config: &ProfileConfig) -> Result<()> {
    if config.regexp.is_empty() {
        return Ok(());
    }
    let re = Regex::new(&config.regexp)
        .map_err(|e| EngineError::Config(format!("profile regexp={}: {}", config.regexp, e)))?;
    let format = if config.log_format.is_empty() {
        DEFAULT_PROFILE_FORMAT.to_string()
    } else {
        config.log_format.clone()
    };
    let hook: ProfileFn = Arc::new(move |d: &dyn Doer, elapsed: Duration| {
        let line = format
            .replace("{action}", &d.describe())
            .replace("{time}", &format!("{:?}", elapsed));
        debug!("{}", line);
    });
    engine.set_profile(Some(re), Duration::from_micros(config.min_us), Some(hook));
    Ok(())
}

/// Register `hook.<name>`, which runs the hook list and folds its errors.
fn register_hook_action(engine: &Engine, hook: Hook, list: &[String]) {
    let list: Arc<Vec<String>> = Arc::new(list.to_vec());
    let name = format!("hook.{}", hook.as_str());
    engine.register(
        name.as_str(),
        Arc::new(Func::new(name.as_str(), move |ctx: ExecContext| {
            let list = Arc::clone(&list);
            async move {
                let engine = ctx
                    .engine()
                    .cloned()
                    .ok_or_else(|| EngineError::msg("hook needs an engine in context"))?;
                let errs = engine.exec_list(&ctx, hook.as_str(), &list).await;
                EngineError::fold(errs)
            }
        })),
    );
}
