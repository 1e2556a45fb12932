//! vmc application binary - composition root.
//!
//! 1. Parse CLI arguments and load configuration from TOML
//! 2. Build the engine, inventory and menu from `[engine]`
//! 3. Restore the inventory snapshot and run the `on_boot` hook
//! 4. Execute `--exec` lines, or read console lines from stdin
//! 5. Save the inventory snapshot on exit

mod cli;
mod repl;

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;
use vmc_core::config::VmcConfig;
use vmc_engine::{Controller, FuncArg, Hook};

use cli::CliArgs;

const INVENTORY_FILE: &str = "inventory.json";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    let config_file = args.resolve_config_path();
    let config = VmcConfig::load_or_default(&config_file);

    // Tracing. RUST_LOG overrides the flag and config level.
    let level = args.resolve_log_level(&config.general.log_level);
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level)),
        )
        .init();

    tracing::info!("Starting vmc v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(path = %config_file.display(), "Configuration loaded");

    let controller = match Controller::from_config(&config) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "Controller bootstrap failed");
            return Err(e.into());
        }
    };
    let engine = controller.engine().clone();

    engine.register(
        "echo(?)",
        Arc::new(FuncArg::sync("echo", |_, arg| {
            tracing::info!(arg, "echo");
            Ok(())
        })),
    );

    // Inventory state.
    let inventory_path = cli::resolve_data_dir(&config.general.data_dir).join(INVENTORY_FILE);
    let persist = controller.inventory().config().persist;
    if persist {
        if let Err(e) = controller.inventory().load_from(&inventory_path) {
            tracing::warn!(path = %inventory_path.display(), error = %e, "Inventory restore failed");
        }
    }

    if !args.no_boot {
        for e in controller.run_hook(Hook::OnBoot, &engine.context()).await {
            tracing::error!(error = %e, "on_boot");
        }
    }

    if args.exec.is_empty() {
        repl::interactive(&engine).await?;
    } else {
        for line in &args.exec {
            repl::run_line(&engine, line).await;
        }
    }

    if persist {
        if let Err(e) = controller.inventory().persist_to(&inventory_path) {
            tracing::error!(path = %inventory_path.display(), error = %e, "Inventory save failed");
        }
    }

    tracing::info!("vmc stopped");
    Ok(())
}
