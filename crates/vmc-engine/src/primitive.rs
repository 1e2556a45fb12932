//! Leaf doers: no-op, sleep, fixed error, user functions, repeat and
//! argument swallowing.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tracing::debug;

use crate::context::ExecContext;
use crate::doer::{Arg, Doer, DoerRef};
use crate::error::{EngineError, Result};

/// Succeeds without doing anything. Used as the graph root.
#[derive(Debug, Clone)]
pub struct Nothing {
    name: String,
}

impl Nothing {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Doer for Nothing {
    fn validate(&self) -> Result<()> {
        Ok(())
    }

    async fn execute(&self, _ctx: &ExecContext) -> Result<()> {
        Ok(())
    }

    fn describe(&self) -> String {
        self.name.clone()
    }
}

/// Waits for a fixed wall-clock duration.
///
/// Returns [`EngineError::Cancelled`] early if the context carries a
/// cancellation token that fires.
#[derive(Debug, Clone, Copy)]
pub struct Sleep {
    duration: Duration,
}

impl Sleep {
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }
}

#[async_trait]
impl Doer for Sleep {
    fn validate(&self) -> Result<()> {
        Ok(())
    }

    async fn execute(&self, ctx: &ExecContext) -> Result<()> {
        match ctx.cancellation() {
            Some(token) => {
                tokio::select! {
                    _ = tokio::time::sleep(self.duration) => Ok(()),
                    _ = token.cancelled() => Err(EngineError::Cancelled),
                }
            }
            None => {
                tokio::time::sleep(self.duration).await;
                Ok(())
            }
        }
    }

    fn describe(&self) -> String {
        format!("sleep({:?})", self.duration)
    }
}

/// Always fails with a pre-built error.
///
/// Lets resolution failures travel as ordinary doers.
#[derive(Debug, Clone)]
pub struct Fail {
    error: EngineError,
}

impl Fail {
    pub fn new(error: EngineError) -> Self {
        Self { error }
    }

    pub fn error(&self) -> &EngineError {
        &self.error
    }
}

#[async_trait]
impl Doer for Fail {
    fn validate(&self) -> Result<()> {
        Err(self.error.clone())
    }

    async fn execute(&self, _ctx: &ExecContext) -> Result<()> {
        Err(self.error.clone())
    }

    fn describe(&self) -> String {
        self.error.to_string()
    }
}

type FuncFn = Arc<dyn Fn(ExecContext) -> BoxFuture<'static, Result<()>> + Send + Sync>;
type FuncArgFn = Arc<dyn Fn(ExecContext, Arg) -> BoxFuture<'static, Result<()>> + Send + Sync>;
type ValidateFn = Arc<dyn Fn() -> Result<()> + Send + Sync>;

/// Wraps a caller-supplied function with an optional validator.
#[derive(Clone)]
pub struct Func {
    name: String,
    f: FuncFn,
    validator: Option<ValidateFn>,
}

impl Func {
    pub fn new<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(ExecContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            name: name.into(),
            f: Arc::new(move |ctx| Box::pin(f(ctx))),
            validator: None,
        }
    }

    /// Build from a synchronous function.
    pub fn sync<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&ExecContext) -> Result<()> + Send + Sync + 'static,
    {
        Self::new(name, move |ctx| futures::future::ready(f(&ctx)))
    }

    pub fn with_validator<V>(mut self, v: V) -> Self
    where
        V: Fn() -> Result<()> + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(v));
        self
    }
}

#[async_trait]
impl Doer for Func {
    fn validate(&self) -> Result<()> {
        match &self.validator {
            Some(v) => v(),
            None => Ok(()),
        }
    }

    async fn execute(&self, ctx: &ExecContext) -> Result<()> {
        (self.f)(ctx.clone()).await
    }

    fn describe(&self) -> String {
        self.name.clone()
    }
}

/// A function with one integer argument slot.
///
/// Registered under `<tag>(?)`. Validate and execute fail until an argument
/// is bound; binding twice is an error.
#[derive(Clone)]
pub struct FuncArg {
    tag: String,
    f: FuncArgFn,
    arg: Option<Arg>,
}

impl FuncArg {
    pub fn new<F, Fut>(tag: impl Into<String>, f: F) -> Self
    where
        F: Fn(ExecContext, Arg) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            tag: tag.into(),
            f: Arc::new(move |ctx, arg| Box::pin(f(ctx, arg))),
            arg: None,
        }
    }

    pub fn sync<F>(tag: impl Into<String>, f: F) -> Self
    where
        F: Fn(&ExecContext, Arg) -> Result<()> + Send + Sync + 'static,
    {
        Self::new(tag, move |ctx, arg| futures::future::ready(f(&ctx, arg)))
    }

    pub fn arg(&self) -> Option<Arg> {
        self.arg
    }
}

#[async_trait]
impl Doer for FuncArg {
    fn validate(&self) -> Result<()> {
        match self.arg {
            Some(_) => Ok(()),
            None => Err(EngineError::ArgNotApplied.named(&self.describe())),
        }
    }

    async fn execute(&self, ctx: &ExecContext) -> Result<()> {
        match self.arg {
            Some(arg) => (self.f)(ctx.clone(), arg).await,
            None => Err(EngineError::ArgNotApplied.named(&self.describe())),
        }
    }

    fn describe(&self) -> String {
        match self.arg {
            Some(arg) => format!("{}:{}", self.tag, arg),
            None => format!("{}(?)", self.tag),
        }
    }

    fn apply_arg(&self, arg: Arg) -> Result<Option<DoerRef>> {
        if self.arg.is_some() {
            return Err(EngineError::ArgOverwrite.named(&self.describe()));
        }
        let mut bound = self.clone();
        bound.arg = Some(arg);
        Ok(Some(Arc::new(bound)))
    }
}

/// Runs the child up to `n` times, stopping at the first error.
pub struct RepeatN {
    n: u32,
    doer: DoerRef,
}

impl RepeatN {
    pub fn new(n: u32, doer: DoerRef) -> Self {
        Self { n, doer }
    }
}

#[async_trait]
impl Doer for RepeatN {
    fn validate(&self) -> Result<()> {
        self.doer.validate()
    }

    async fn execute(&self, ctx: &ExecContext) -> Result<()> {
        for i in 1..=self.n {
            debug!("engine loop {}/{}", i, self.n);
            ctx.exec_part(self.doer.as_ref()).await?;
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("RepeatN(N={} D={})", self.n, self.doer.describe())
    }
}

/// Accepts and discards an argument, leaving the inner doer unbound.
pub struct IgnoreArg {
    doer: DoerRef,
}

impl IgnoreArg {
    pub fn new(doer: DoerRef) -> Self {
        Self { doer }
    }
}

#[async_trait]
impl Doer for IgnoreArg {
    fn validate(&self) -> Result<()> {
        self.doer.validate()
    }

    async fn execute(&self, ctx: &ExecContext) -> Result<()> {
        self.doer.execute(ctx).await
    }

    fn describe(&self) -> String {
        self.doer.describe()
    }

    fn apply_arg(&self, _arg: Arg) -> Result<Option<DoerRef>> {
        Ok(Some(Arc::clone(&self.doer)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;
    use tokio_util::sync::CancellationToken;

    // ---- nothing / fail ----

    #[tokio::test]
    async fn test_nothing() {
        let d = Nothing::new("root");
        assert!(d.validate().is_ok());
        assert!(d.execute(&ExecContext::new()).await.is_ok());
        assert_eq!(d.describe(), "root");
    }

    #[tokio::test]
    async fn test_fail_returns_same_error_everywhere() {
        let d = Fail::new(EngineError::NotResolved("x".into()));
        assert!(d.validate().unwrap_err().is_not_resolved());
        assert!(d.execute(&ExecContext::new()).await.unwrap_err().is_not_resolved());
        assert_eq!(d.describe(), "action=x not resolved");
    }

    // ---- sleep ----

    #[tokio::test]
    async fn test_sleep_waits() {
        let d = Sleep::new(Duration::from_millis(20));
        assert_eq!(d.describe(), "sleep(20ms)");
        let start = Instant::now();
        d.execute(&ExecContext::new()).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[tokio::test]
    async fn test_sleep_observes_cancellation() {
        let token = CancellationToken::new();
        token.cancel();
        let ctx = ExecContext::new().with_cancellation(token);
        let d = Sleep::new(Duration::from_secs(30));
        let err = d.execute(&ctx).await.unwrap_err();
        assert!(matches!(err, EngineError::Cancelled));
    }

    // ---- func ----

    #[tokio::test]
    async fn test_func_validator() {
        let d = Func::sync("f", |_| Ok(())).with_validator(|| Err(EngineError::msg("offline")));
        assert_eq!(d.validate().unwrap_err().to_string(), "offline");
        assert!(d.execute(&ExecContext::new()).await.is_ok());
    }

    #[tokio::test]
    async fn test_func_async_body() {
        let counter = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&counter);
        let d = Func::new("async", move |_ctx| {
            let c = Arc::clone(&c);
            async move {
                tokio::task::yield_now().await;
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
        d.execute(&ExecContext::new()).await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_func_arg_lifecycle() {
        let seen = Arc::new(AtomicU32::new(0));
        let s = Arc::clone(&seen);
        let d = FuncArg::sync("inc", move |_, arg| {
            s.fetch_add(arg, Ordering::SeqCst);
            Ok(())
        });
        assert_eq!(d.describe(), "inc(?)");
        assert_eq!(
            d.validate().unwrap_err().to_string(),
            "`inc(?)`: argument not applied"
        );
        assert!(d.execute(&ExecContext::new()).await.is_err());

        let bound = d.apply_arg(5).unwrap().unwrap();
        assert_eq!(bound.describe(), "inc:5");
        bound.validate().unwrap();
        bound.execute(&ExecContext::new()).await.unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 5);

        assert!(bound.apply_arg(1).unwrap_err().is_arg_binding());
        // describe stays stable on the original
        assert_eq!(d.describe(), "inc(?)");
    }

    // ---- repeat / ignore ----

    #[tokio::test]
    async fn test_repeat_n_stops_on_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let flaky: DoerRef = Arc::new(Func::sync("flaky", move |_| {
            if c.fetch_add(1, Ordering::SeqCst) == 2 {
                return Err(EngineError::msg("third call fails"));
            }
            Ok(())
        }));
        let d = RepeatN::new(5, flaky);
        assert_eq!(d.describe(), "RepeatN(N=5 D=flaky)");
        assert!(d.execute(&ExecContext::new()).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_ignore_arg_swallows() {
        let inner: DoerRef = Arc::new(Nothing::new("beep"));
        let d = IgnoreArg::new(Arc::clone(&inner));
        let applied = d.apply_arg(9).unwrap().unwrap();
        assert!(Arc::ptr_eq(&applied, &inner));
        assert!(applied.apply_arg(1).unwrap().is_none());
    }
}
