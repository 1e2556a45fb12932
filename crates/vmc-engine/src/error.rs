//! Error types for the action engine.

use std::fmt;
use std::sync::Arc;

use vmc_core::error::CoreError;

/// Errors surfaced by doers, the registry and the inventory gate.
///
/// Cloneable so that a fixed-error doer can hand out its error on every
/// `validate`/`execute` call.
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum EngineError {
    #[error("action={0} not resolved")]
    NotResolved(String),
    #[error("argument not applied")]
    ArgNotApplied,
    #[error("argument already applied")]
    ArgOverwrite,
    #[error("lazy action {0} not resolved")]
    LazyNotResolved(String),
    #[error("parse duration `{input}`: {reason}")]
    ParseDuration { input: String, reason: String },
    #[error("parse argument `{input}`: {reason}")]
    ParseInt { input: String, reason: String },
    #[error("{}", FoldDisplay(.0))]
    ValidateFolded(Vec<EngineError>),
    #[error("{}", FoldDisplay(.0))]
    ExecuteFolded(Vec<EngineError>),
    #[error("{}", FoldDisplay(.0))]
    Multiple(Vec<EngineError>),
    #[error("{0}")]
    Failed(String),
    #[error("{0}")]
    Doer(Arc<dyn std::error::Error + Send + Sync>),
    #[error("Stock is too low")]
    StockLow,
    #[error("stock={0} not found")]
    StockNotFound(String),
    #[error("{0}")]
    InvalidStock(String),
    #[error("invalid graph: {0}")]
    InvalidGraph(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Persist error: {0}")]
    Persist(String),
    #[error("cancelled")]
    Cancelled,
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<EngineError>,
    },
    #[error("{first} (reset failed: {reset})")]
    Reset {
        first: Box<EngineError>,
        reset: Box<EngineError>,
    },
}

/// `multiple errors:\n- a\n- b`
struct FoldDisplay<'a>(&'a [EngineError]);

impl fmt::Display for FoldDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("multiple errors:")?;
        for e in self.0 {
            write!(f, "\n- {}", e)?;
        }
        Ok(())
    }
}

impl EngineError {
    /// Wrap any error returned by user-supplied doer code.
    pub fn custom<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        EngineError::Doer(Arc::new(err))
    }

    pub fn msg(message: impl Into<String>) -> Self {
        EngineError::Failed(message.into())
    }

    /// Annotate with context; the original error stays reachable via `root`.
    pub fn context(self, context: impl Into<String>) -> Self {
        EngineError::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Annotate with the doer name, rendered as `` `name` ``.
    pub fn named(self, name: &str) -> Self {
        self.context(format!("`{}`", name))
    }

    /// The innermost error beneath any context annotations.
    pub fn root(&self) -> &EngineError {
        match self {
            EngineError::Context { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn is_not_resolved(&self) -> bool {
        matches!(self.root(), EngineError::NotResolved(_))
    }

    pub fn is_stock_low(&self) -> bool {
        matches!(self.root(), EngineError::StockLow)
    }

    /// True for "already applied" and "not applied", the two binding errors
    /// a composite skips over while looking for a free slot.
    pub fn is_arg_binding(&self) -> bool {
        matches!(
            self.root(),
            EngineError::ArgOverwrite | EngineError::ArgNotApplied
        )
    }

    /// Fold errors of unrelated operations: none is success, one is passed
    /// through unchanged.
    pub fn fold(errs: Vec<EngineError>) -> Result<()> {
        Self::fold_with(errs, EngineError::Multiple)
    }

    pub fn fold_validate(errs: Vec<EngineError>) -> Result<()> {
        Self::fold_with(errs, EngineError::ValidateFolded)
    }

    pub fn fold_execute(errs: Vec<EngineError>) -> Result<()> {
        Self::fold_with(errs, EngineError::ExecuteFolded)
    }

    fn fold_with(
        mut errs: Vec<EngineError>,
        wrap: fn(Vec<EngineError>) -> EngineError,
    ) -> Result<()> {
        match errs.len() {
            0 => Ok(()),
            1 => Err(errs.remove(0)),
            _ => Err(wrap(errs)),
        }
    }
}

impl From<CoreError> for EngineError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Config(msg) => EngineError::Config(msg),
            other => EngineError::Persist(other.to_string()),
        }
    }
}

impl From<EngineError> for CoreError {
    fn from(err: EngineError) -> Self {
        CoreError::Engine(err.to_string())
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Persist(err.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Persist(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
