//! Per-round evaluation options.

use std::thread;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Environment variable overriding [`EvaluationOptions::num_threads`].
pub const THREADS_ENV: &str = "SKYGRAPH_THREADS";

/// Environment variable overriding [`EvaluationOptions::keep_going`].
pub const KEEP_GOING_ENV: &str = "SKYGRAPH_KEEP_GOING";

/// How one evaluation round runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationOptions {
    /// Keep evaluating independent work after an error instead of stopping
    /// at the first one.
    pub keep_going: bool,
    /// Number of worker threads (0 = auto-detect).
    pub num_threads: usize,
}

impl EvaluationOptions {
    /// Fail-fast evaluation on an auto-detected number of threads.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn keep_going(mut self, keep_going: bool) -> Self {
        self.keep_going = keep_going;
        self
    }

    #[must_use]
    pub fn with_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads;
        self
    }

    /// Defaults overridden by `SKYGRAPH_THREADS` and `SKYGRAPH_KEEP_GOING`.
    ///
    /// Unparsable values are logged and ignored.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut options = Self::default();
        if let Some(raw) = lookup(THREADS_ENV) {
            match raw.trim().parse() {
                Ok(threads) => options.num_threads = threads,
                Err(_) => warn!(variable = THREADS_ENV, value = %raw, "ignoring invalid thread count"),
            }
        }
        if let Some(raw) = lookup(KEEP_GOING_ENV) {
            match parse_flag(&raw) {
                Some(keep_going) => options.keep_going = keep_going,
                None => warn!(variable = KEEP_GOING_ENV, value = %raw, "ignoring invalid flag"),
            }
        }
        options
    }

    /// Get the effective number of worker threads.
    #[must_use]
    pub fn effective_threads(&self) -> usize {
        if self.num_threads == 0 {
            thread::available_parallelism()
                .map(std::num::NonZero::get)
                .unwrap_or(1)
        } else {
            self.num_threads
        }
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
