//! Cooperative interruption of a running round.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared flag asking the current round to stop.
///
/// Workers check it before every task and functions observe it on every
/// dependency read. The round that notices the request resets the flag,
/// rolls back unfinished nodes and returns
/// [`EvalError::Interrupted`](super::EvalError::Interrupted). A request made
/// between rounds is cleared when the next round starts.
#[derive(Debug, Clone, Default)]
pub struct InterruptHandle {
    flag: Arc<AtomicBool>,
}

impl InterruptHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the running round to stop.
    pub fn interrupt(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_interrupted(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Reset the flag, returning whether it was set.
    pub(crate) fn take(&self) -> bool {
        self.flag.swap(false, Ordering::AcqRel)
    }
}
