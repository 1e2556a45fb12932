//! Action engine for the vending machine controller.
//!
//! Named hardware and service actions ("doers") are registered in a shared
//! registry, composed into sequences and dependency graphs, compiled from
//! whitespace-separated scenario text and gated by consumable stocks.

pub mod context;
pub mod controller;
pub mod doer;
pub mod engine;
pub mod error;
pub mod graph;
pub mod inventory;
pub mod lazy;
pub mod primitive;
pub mod profile;
pub mod retry;
pub mod seq;

pub use context::{ContextValue, ExecContext, CURRENT_PRICE_KEY};
pub use controller::{Controller, Hook, MenuItem};
pub use doer::{Arg, Doer, DoerRef, Forced};
pub use engine::Engine;
pub use error::{EngineError, Result};
pub use graph::{Graph, NodeId};
pub use inventory::{Inventory, InventorySnapshot, Stock, StockGate, TeleStock};
pub use lazy::Lazy;
pub use primitive::{Fail, Func, FuncArg, IgnoreArg, Nothing, RepeatN, Sleep};
pub use retry::RetryOn;
pub use seq::Seq;
