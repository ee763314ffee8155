//! Progress notifications.
//!
//! A session forwards graph events to an [`EvaluationProgress`] receiver.
//! All methods default to doing nothing, so receivers implement only what
//! they care about. Receivers are called from worker threads and must not
//! block.

/// How a node finished in a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EvaluatedOutcome {
    /// The function ran and produced a value.
    Built {
        /// Whether the value differs from the previous one.
        changed: bool,
    },
    /// The node was dirty but none of its dependencies changed.
    Clean,
    /// The node completed with an error.
    Failed,
}

/// Receiver of graph events.
pub trait EvaluationProgress<K>: Send + Sync {
    /// `key` was marked dirty, or changed if its own input changed.
    fn invalidated(&self, _key: &K, _changed: bool) {}

    /// `key` is about to be evaluated for the first time in a round.
    fn enqueueing(&self, _key: &K) {}

    /// `key` completed in the current round.
    fn evaluated(&self, _key: &K, _outcome: EvaluatedOutcome) {}
}

/// Receiver that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProgress;

impl<K> EvaluationProgress<K> for NullProgress {}
