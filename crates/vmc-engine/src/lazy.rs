//! Deferred lookup of actions by name.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;

use crate::context::ExecContext;
use crate::doer::{Arg, Doer, DoerRef, Forced};
use crate::error::Result;

/// Name-to-doer lookup used by lazy placeholders.
pub type Resolver = Arc<dyn Fn(&str) -> Result<DoerRef> + Send + Sync>;

/// Placeholder that resolves its action name on first use.
///
/// Lets scenarios reference actions registered later. Only a successful
/// resolution is cached; failures are retried on the next use.
pub struct Lazy {
    name: String,
    resolver: Resolver,
    cache: Mutex<Option<DoerRef>>,
}

impl Lazy {
    pub fn new(name: impl Into<String>, resolver: Resolver) -> Self {
        Self {
            name: name.into(),
            resolver,
            cache: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn resolve(&self) -> Result<Forced> {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(d) = cache.as_ref() {
            return Ok(Forced {
                doer: Arc::clone(d),
                fresh: false,
            });
        }
        let d = (self.resolver)(&self.name)?;
        *cache = Some(Arc::clone(&d));
        Ok(Forced {
            doer: d,
            fresh: true,
        })
    }
}

#[async_trait]
impl Doer for Lazy {
    fn validate(&self) -> Result<()> {
        self.resolve()?.doer.validate()
    }

    async fn execute(&self, ctx: &ExecContext) -> Result<()> {
        let d = self.resolve()?.doer;
        d.execute(ctx).await
    }

    fn describe(&self) -> String {
        self.name.clone()
    }

    fn apply_arg(&self, arg: Arg) -> Result<Option<DoerRef>> {
        self.resolve()?.doer.apply_arg(arg)
    }

    fn force(&self) -> Result<Option<Forced>> {
        self.resolve().map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::primitive::Nothing;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn counting_resolver(ready_after: u32) -> (Resolver, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let target: DoerRef = Arc::new(Nothing::new("target"));
        let resolver: Resolver = Arc::new(move |name: &str| {
            let n = c.fetch_add(1, Ordering::SeqCst) + 1;
            if n < ready_after {
                return Err(EngineError::NotResolved(name.to_string()));
            }
            Ok(Arc::clone(&target))
        });
        (resolver, calls)
    }

    #[test]
    fn test_lazy_memoises_success() {
        let (resolver, calls) = counting_resolver(1);
        let lazy = Lazy::new("later", resolver);
        assert_eq!(lazy.describe(), "later");

        let first = lazy.force().unwrap().unwrap();
        assert!(first.fresh);
        assert_eq!(first.doer.describe(), "target");
        let second = lazy.force().unwrap().unwrap();
        assert!(!second.fresh);
        lazy.validate().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_lazy_retries_after_failure() {
        let (resolver, calls) = counting_resolver(2);
        let lazy = Lazy::new("later", resolver);
        assert!(lazy.validate().unwrap_err().is_not_resolved());
        assert!(lazy.execute(&ExecContext::new()).await.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
