//! The unit-of-work contract and the two capability helpers built on it.

use std::sync::Arc;

use async_trait::async_trait;

use crate::context::ExecContext;
use crate::error::Result;

/// Engine-level integer argument, bound into `name(?)` slots.
pub type Arg = u32;

/// Shared handle to a doer. Composites hold these for their children.
pub type DoerRef = Arc<dyn Doer>;

/// A unit of work.
///
/// `validate` is cheap and side-effect free. `execute` performs the work and
/// may block on hardware. `describe` returns a stable human-readable name.
///
/// Two optional capabilities have default implementations meaning
/// "not supported": argument application and lazy forcing.
#[async_trait]
pub trait Doer: Send + Sync {
    fn validate(&self) -> Result<()>;

    async fn execute(&self, ctx: &ExecContext) -> Result<()>;

    fn describe(&self) -> String;

    /// Bind `arg` into the first free slot, returning a rebuilt doer.
    ///
    /// `Ok(None)` means there is no free slot and the receiver stays as it
    /// is. Never mutates `self`.
    fn apply_arg(&self, _arg: Arg) -> Result<Option<DoerRef>> {
        Ok(None)
    }

    /// Resolve deferred references. `Ok(None)` means nothing to force.
    fn force(&self) -> Result<Option<Forced>> {
        Ok(None)
    }
}

impl std::fmt::Debug for dyn Doer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.describe())
    }
}

/// Result of forcing a doer.
#[derive(Clone)]
pub struct Forced {
    pub doer: DoerRef,
    /// True when resolution happened during this call rather than coming
    /// from a cache. Composites rebuild only when some child is fresh.
    pub fresh: bool,
}

impl std::fmt::Debug for Forced {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Forced")
            .field("doer", &self.doer.describe())
            .field("fresh", &self.fresh)
            .finish()
    }
}

/// Force `d`, returning `d` itself when it has nothing to resolve.
pub fn force(d: &DoerRef) -> Result<Forced> {
    match d.force()? {
        Some(forced) => Ok(forced),
        None => Ok(Forced {
            doer: Arc::clone(d),
            fresh: false,
        }),
    }
}

/// Force `d`, then bind `arg` into it.
///
/// Returns `(doer, false)` when the forced doer takes no argument; callers
/// that supplied a literal argument must treat that as an error.
pub fn arg_apply(d: &DoerRef, arg: Arg) -> Result<(DoerRef, bool)> {
    let forced = force(d)?.doer;
    match forced.apply_arg(arg)? {
        Some(bound) => Ok((bound, true)),
        None => Ok((forced, false)),
    }
}
