//! Action registry, name parser and scenario compiler.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, LazyLock, PoisonError, RwLock, Weak};
use std::time::{Duration, Instant};

use regex::Regex;
use tracing::{debug, error};

use crate::context::ExecContext;
use crate::doer::{self, Arg, Doer, DoerRef};
use crate::error::{EngineError, Result};
use crate::lazy::{Lazy, Resolver};
use crate::primitive::{Fail, Func, FuncArg, Sleep};
use crate::profile::{ProfileFn, Profiler};
use crate::seq::Seq;

static ARG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.+)\((\d+|\?)\)$").expect("valid argument regex"));

static SLEEP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^sleep\((\d+)(ms|s)\)$").expect("valid sleep regex"));

/// Argument part of a parameterised action name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgToken<'a> {
    /// `?`
    Free,
    /// Decimal digits, not yet range-checked.
    Literal(&'a str),
}

/// Result of splitting `tag(arg)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionName<'a> {
    pub tag: &'a str,
    /// `<tag>(?)`, the key parameterised doers are registered under.
    pub norm: String,
    pub arg: ArgToken<'a>,
}

/// Parse a parameterised action name. Plain names give `None`.
pub fn parse_action_name(name: &str) -> Option<ActionName<'_>> {
    let caps = ARG_RE.captures(name)?;
    let tag = caps.get(1)?.as_str();
    let arg = match caps.get(2)?.as_str() {
        "?" => ArgToken::Free,
        digits => ArgToken::Literal(digits),
    };
    Some(ActionName {
        tag,
        norm: format!("{}(?)", tag),
        arg,
    })
}

/// Parse the `<N>ms` / `<N>s` argument of `sleep(...)`.
///
/// `Ok(None)` when `name` is not a sleep action at all.
pub fn parse_sleep(name: &str) -> Result<Option<Duration>> {
    let Some(caps) = SLEEP_RE.captures(name) else {
        return Ok(None);
    };
    let (digits, unit) = (&caps[1], &caps[2]);
    let n: u64 = digits.parse().map_err(|e: std::num::ParseIntError| {
        EngineError::ParseDuration {
            input: name.to_string(),
            reason: e.to_string(),
        }
    })?;
    let duration = match unit {
        "ms" => Duration::from_millis(n),
        _ => Duration::from_secs(n),
    };
    Ok(Some(duration))
}

struct Inner {
    actions: RwLock<HashMap<String, DoerRef>>,
    profile: Profiler,
    resolver: Resolver,
}

/// Shared handle to the action registry.
///
/// Cloning is cheap. Lazy placeholders created by this engine hold only a
/// weak reference back to it.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<Inner>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    /// Create a registry seeded with `ignore(?)` and `sleep(100ms)`.
    pub fn new() -> Self {
        let inner = Arc::new_cyclic(|weak: &Weak<Inner>| {
            let weak = weak.clone();
            let resolver: Resolver = Arc::new(move |name: &str| match weak.upgrade() {
                Some(inner) => Engine { inner }.try_resolve(name),
                None => Err(EngineError::LazyNotResolved(name.to_string())),
            });
            Inner {
                actions: RwLock::new(HashMap::new()),
                profile: Profiler::default(),
                resolver,
            }
        });
        let engine = Engine { inner };
        engine.register("ignore(?)", Arc::new(FuncArg::sync("ignore", |_, _| Ok(()))));
        engine.register("sleep(100ms)", Arc::new(Sleep::new(Duration::from_millis(100))));
        engine
    }

    /// Execution context bound to this engine.
    pub fn context(&self) -> ExecContext {
        ExecContext::new().with_engine(self.clone())
    }

    /// Install `d` under `name`, replacing any previous entry.
    pub fn register(&self, name: impl Into<String>, d: DoerRef) {
        let name = name.into();
        debug!(action = %name, "engine register");
        self.inner
            .actions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, d);
    }

    pub fn register_func<F, Fut>(&self, name: &str, f: F)
    where
        F: Fn(ExecContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.register(name, Arc::new(Func::new(name, f)));
    }

    pub fn register_seq(&self, name: &str, doers: impl IntoIterator<Item = DoerRef>) {
        let mut seq = Seq::new(name);
        for d in doers {
            seq.append(d);
        }
        self.register(name, Arc::new(seq));
    }

    /// Compile `scenario` and register it under `name`.
    pub fn register_scenario(&self, name: &str, scenario: &str) -> Result<()> {
        let d = self
            .parse_text(name, scenario)
            .map_err(|e| e.context(format!("register name={} scenario={}", name, scenario)))?;
        self.register(name, d);
        Ok(())
    }

    fn lookup(&self, name: &str) -> Option<DoerRef> {
        self.inner
            .actions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Resolve `name`, binding a literal argument if it has one.
    ///
    /// `foo(?)` returns the registered doer still unbound. `foo(42)` looks up
    /// `foo(?)` and binds 42 into it.
    pub fn try_resolve(&self, name: &str) -> Result<DoerRef> {
        if let Some(d) = self.lookup(name) {
            return Ok(d);
        }
        let parsed =
            parse_action_name(name).ok_or_else(|| EngineError::NotResolved(name.to_string()))?;
        let template = self
            .lookup(&parsed.norm)
            .ok_or_else(|| EngineError::NotResolved(parsed.norm.clone()).named(name))?;
        let digits = match parsed.arg {
            ArgToken::Free => return Ok(template),
            ArgToken::Literal(digits) => digits,
        };
        let arg: Arg = digits.parse().map_err(|e: std::num::ParseIntError| {
            EngineError::ParseInt {
                input: digits.to_string(),
                reason: e.to_string(),
            }
            .named(name)
        })?;
        let (d, applied) = doer::arg_apply(&template, arg).map_err(|e| e.named(name))?;
        if !applied {
            return Err(EngineError::ArgNotApplied.named(name));
        }
        Ok(d)
    }

    /// Like [`try_resolve`](Self::try_resolve) but never fails: errors are
    /// logged and returned as a [`Fail`] doer.
    pub fn resolve(&self, name: &str) -> DoerRef {
        match self.try_resolve(name) {
            Ok(d) => d,
            Err(e) => {
                error!(action = %name, error = %e, "engine resolve");
                Arc::new(Fail::new(e))
            }
        }
    }

    /// Resolution used by the scenario compiler.
    ///
    /// Unknown names become lazy placeholders, so forward references work.
    /// `sleep(<N>ms)` and `sleep(<N>s)` produce a fresh [`Sleep`].
    pub fn resolve_or_lazy(&self, name: &str) -> Result<DoerRef> {
        if let Some(d) = self.lookup(name) {
            return Ok(d);
        }
        if let Some(duration) = parse_sleep(name)? {
            return Ok(Arc::new(Sleep::new(duration)));
        }
        Ok(Arc::new(Lazy::new(name, Arc::clone(&self.inner.resolver))))
    }

    /// Compile whitespace separated action names into a sequence named `tag`.
    pub fn parse_text(&self, tag: &str, text: &str) -> Result<DoerRef> {
        let mut seq = Seq::new(tag);
        for word in text.split_whitespace() {
            let d = self
                .resolve_or_lazy(word)
                .map_err(|e| e.context(format!("scenario={} word={}", tag, word)))?;
            seq.append(d);
        }
        Ok(Arc::new(seq))
    }

    /// Registered action names, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .actions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Install or clear the profile hook.
    pub fn set_profile(&self, re: Option<Regex>, min: Duration, hook: Option<ProfileFn>) {
        self.inner.profile.set(re, min, hook);
    }

    /// Execute with profiling, without validation.
    pub async fn exec(&self, ctx: &ExecContext, d: &dyn Doer) -> Result<()> {
        self.run(ctx, d, false, true).await
    }

    /// Execute a part of a larger action: no validation, no profiling.
    pub async fn exec_part(&self, ctx: &ExecContext, d: &dyn Doer) -> Result<()> {
        self.run(ctx, d, false, false).await
    }

    /// Validate, then execute with profiling.
    pub async fn validate_exec(&self, ctx: &ExecContext, d: &dyn Doer) -> Result<()> {
        self.run(ctx, d, true, true).await
    }

    /// Compile and run each scenario of `list`, collecting every error.
    ///
    /// Scenario `i` is named `<tag>:<i>`.
    pub async fn exec_list(
        &self,
        ctx: &ExecContext,
        tag: &str,
        list: &[String],
    ) -> Vec<EngineError> {
        let mut errs = Vec::new();
        for (i, text) in list.iter().enumerate() {
            let item_tag = format!("{}:{}", tag, i);
            let result = match self.parse_text(&item_tag, text) {
                Ok(d) => self.validate_exec(ctx, d.as_ref()).await,
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                errs.push(e);
            }
        }
        errs
    }

    async fn run(
        &self,
        ctx: &ExecContext,
        d: &dyn Doer,
        validate: bool,
        profile: bool,
    ) -> Result<()> {
        let bound;
        let ctx = match ctx.engine() {
            Some(_) => ctx,
            None => {
                bound = ctx.clone().with_engine(self.clone());
                &bound
            }
        };
        if validate {
            d.validate()?;
        }
        let hook = if profile {
            self.inner.profile.matching(&d.describe())
        } else {
            None
        };
        match hook {
            Some((hook, min)) => {
                let begin = Instant::now();
                let result = d.execute(ctx).await;
                let elapsed = begin.elapsed();
                if elapsed >= min {
                    hook(d, elapsed);
                }
                result
            }
            None => d.execute(ctx).await,
        }
    }
}
