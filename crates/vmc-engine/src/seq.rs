//! Sequence composite: children run in order, stopping at the first error.

use std::sync::Arc;

use async_trait::async_trait;

use crate::context::ExecContext;
use crate::doer::{self, Arg, Doer, DoerRef, Forced};
use crate::error::{EngineError, Result};

/// Typical scenarios hold 1-8 actions.
const SEQ_CAPACITY: usize = 8;

/// Ordered list of doers executed one after another.
///
/// Validation visits every child and folds all errors. Execution stops at
/// the first failing child and returns its error unchanged.
#[derive(Clone)]
pub struct Seq {
    name: String,
    items: Vec<DoerRef>,
}

impl Seq {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            items: Vec::with_capacity(SEQ_CAPACITY),
        }
    }

    pub fn append(&mut self, d: DoerRef) {
        self.items.push(d);
    }

    pub fn with(mut self, d: DoerRef) -> Self {
        self.append(d);
        self
    }

    pub fn items(&self) -> &[DoerRef] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn rebuilt(&self, items: Vec<DoerRef>) -> DoerRef {
        Arc::new(Seq {
            name: self.name.clone(),
            items,
        })
    }
}

#[async_trait]
impl Doer for Seq {
    fn validate(&self) -> Result<()> {
        let errs = self
            .items
            .iter()
            .filter_map(|child| {
                child.validate().err().map(|e| {
                    e.context(format!(
                        "seq={} node={} validate",
                        self.name,
                        child.describe()
                    ))
                })
            })
            .collect();
        EngineError::fold_validate(errs)
    }

    async fn execute(&self, ctx: &ExecContext) -> Result<()> {
        for child in &self.items {
            ctx.exec(child.as_ref()).await?;
        }
        Ok(())
    }

    fn describe(&self) -> String {
        self.name.clone()
    }

    fn apply_arg(&self, arg: Arg) -> Result<Option<DoerRef>> {
        let mut found = false;
        let mut items = Vec::with_capacity(self.items.len());
        for child in &self.items {
            if found {
                items.push(Arc::clone(child));
                continue;
            }
            match doer::arg_apply(child, arg) {
                Ok((bound, true)) => {
                    found = true;
                    items.push(bound);
                }
                Ok((_, false)) => items.push(Arc::clone(child)),
                Err(e) if e.is_arg_binding() => items.push(Arc::clone(child)),
                Err(e) => return Err(e),
            }
        }
        Ok(found.then(|| self.rebuilt(items)))
    }

    fn force(&self) -> Result<Option<Forced>> {
        let mut fresh = false;
        let mut items = Vec::with_capacity(self.items.len());
        for child in &self.items {
            let forced = doer::force(child)?;
            fresh |= forced.fresh;
            items.push(forced.doer);
        }
        if !fresh {
            return Ok(None);
        }
        Ok(Some(Forced {
            doer: self.rebuilt(items),
            fresh: true,
        }))
    }
}
