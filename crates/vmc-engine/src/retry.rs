//! Single retry after a reset on transient errors.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::context::ExecContext;
use crate::doer::{self, Arg, Doer, DoerRef};
use crate::error::{EngineError, Result};

/// Decides whether an error is transient.
pub type ErrorPredicate = Arc<dyn Fn(&EngineError) -> bool + Send + Sync>;

/// On a transient error, runs `reset` and retries the wrapped doer once.
///
/// Only the wrapped doer is validated; `reset` is trusted.
#[derive(Clone)]
pub struct RetryOn {
    doer: DoerRef,
    check: ErrorPredicate,
    reset: DoerRef,
}

impl RetryOn {
    pub fn new<P>(doer: DoerRef, check: P, reset: DoerRef) -> Self
    where
        P: Fn(&EngineError) -> bool + Send + Sync + 'static,
    {
        Self {
            doer,
            check: Arc::new(check),
            reset,
        }
    }
}

#[async_trait]
impl Doer for RetryOn {
    fn validate(&self) -> Result<()> {
        self.doer.validate()
    }

    async fn execute(&self, ctx: &ExecContext) -> Result<()> {
        let first = match ctx.exec(self.doer.as_ref()).await {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };
        if !(self.check)(&first) {
            return Err(first);
        }
        warn!(
            action = %self.doer.describe(),
            error = %first,
            reset = %self.reset.describe(),
            "transient error, resetting"
        );
        if let Err(reset) = ctx.exec(self.reset.as_ref()).await {
            return Err(EngineError::Reset {
                first: Box::new(first),
                reset: Box::new(reset),
            });
        }
        ctx.exec(self.doer.as_ref()).await
    }

    fn describe(&self) -> String {
        self.doer.describe()
    }

    fn apply_arg(&self, arg: Arg) -> Result<Option<DoerRef>> {
        let (bound, applied) = doer::arg_apply(&self.doer, arg)?;
        if !applied {
            return Ok(None);
        }
        Ok(Some(Arc::new(RetryOn {
            doer: bound,
            check: Arc::clone(&self.check),
            reset: Arc::clone(&self.reset),
        })))
    }
}
