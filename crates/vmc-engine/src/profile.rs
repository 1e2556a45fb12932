//! Execution timing hook.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use regex::Regex;

use crate::doer::Doer;

/// Called with the doer and its execution time.
pub type ProfileFn = Arc<dyn Fn(&dyn Doer, Duration) + Send + Sync>;

/// Optional timing hook around `Engine::exec`.
///
/// The atomic flag keeps the disabled path to a single load.
#[derive(Default)]
pub struct Profiler {
    fastpath: AtomicBool,
    state: Mutex<ProfileState>,
}

#[derive(Default)]
struct ProfileState {
    re: Option<Regex>,
    min: Duration,
    hook: Option<ProfileFn>,
}

impl Profiler {
    /// Pass `None` for both `re` and `hook` to disable.
    pub fn set(&self, re: Option<Regex>, min: Duration, hook: Option<ProfileFn>) {
        let enabled = re.is_some() || hook.is_some();
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            *state = ProfileState { re, min, hook };
        }
        self.fastpath.store(enabled, Ordering::Release);
    }

    pub fn enabled(&self) -> bool {
        self.fastpath.load(Ordering::Acquire)
    }

    /// Hook and minimum duration if `tag` matches the configured pattern.
    pub fn matching(&self, tag: &str) -> Option<(ProfileFn, Duration)> {
        if !self.enabled() {
            return None;
        }
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match (&state.re, &state.hook) {
            (Some(re), Some(hook)) if re.is_match(tag) => Some((Arc::clone(hook), state.min)),
            _ => None,
        }
    }
}
