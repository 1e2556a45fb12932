//! Configuration loading from TOML.
//!
//! Sections: `[general]` and `[engine]` (hook lists, aliases, menu, profile,
//! inventory). Missing sections fall back to defaults.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{CoreError, Result};

/// Top-level configuration for the vending machine controller.
///
/// Loaded from `~/.vmc/config.toml` by default. The `engine` section carries
/// everything the action engine registers at startup: aliases, menu items,
/// hook scenario lists, inventory stocks and the profile hook.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VmcConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub engine: EngineConfig,
}

impl VmcConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: VmcConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| CoreError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }
}

/// General controller settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Directory for persisted state (inventory snapshot).
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
    /// Multiplier from config prices to currency minor units.
    pub price_scale: u32,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.vmc/data".to_string(),
            log_level: "info".to_string(),
            price_scale: 1,
        }
    }
}

/// Action engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Scenarios run once after device initialisation.
    pub on_boot: Vec<String>,
    pub on_menu_error: Vec<String>,
    pub on_service_begin: Vec<String>,
    pub on_service_end: Vec<String>,
    pub on_front_begin: Vec<String>,
    pub on_broken: Vec<String>,
    /// Named scenarios registered as plain actions.
    #[serde(rename = "alias")]
    pub aliases: Vec<AliasConfig>,
    pub menu: MenuConfig,
    pub profile: ProfileConfig,
    pub inventory: InventoryConfig,
}

/// A scenario registered under its own name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AliasConfig {
    pub name: String,
    pub scenario: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MenuConfig {
    #[serde(rename = "item")]
    pub items: Vec<MenuItemConfig>,
}

/// A sellable product. Registered as `menu.<code>`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MenuItemConfig {
    pub code: String,
    #[serde(default)]
    pub name: String,
    /// Price before `general.price_scale` is applied.
    #[serde(default)]
    pub price: u32,
    pub scenario: String,
}

/// Execution profiling hook.
///
/// Disabled while `regexp` is empty.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileConfig {
    pub regexp: String,
    pub min_us: u64,
    /// `{action}` and `{time}` are substituted.
    pub log_format: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InventoryConfig {
    /// Save stock values to `<data_dir>/inventory.json`.
    pub persist: bool,
    /// Include stock names in telemetry snapshots.
    pub tele_add_name: bool,
    #[serde(rename = "stock")]
    pub stocks: Vec<StockConfig>,
}

/// Declaration of one consumable stock.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StockConfig {
    pub name: String,
    pub code: u32,
    /// Reject gated actions when the stock would fall below `min`.
    pub check: bool,
    pub min: f32,
    /// Engine argument to hardware units. Zero means 1.
    pub hw_rate: f32,
    /// Engine argument to spent stock units. Zero means 1.
    pub spend_rate: f32,
    /// Scenario registered as `add.<name>(?)`, gated by this stock.
    pub register_add: String,
}

impl std::fmt::Display for StockConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "inventory.{} #{} check={} hw_rate={} spend_rate={} min={}",
            self.name, self.code, self.check, self.hw_rate, self.spend_rate, self.min
        )
    }
}
