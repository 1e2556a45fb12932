//! Shared configuration, errors and types for the vending machine controller.

pub mod config;
pub mod error;
pub mod types;

pub use config::VmcConfig;
pub use error::{CoreError, Result};
pub use types::*;
