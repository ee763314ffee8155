//! Error types.
//!
//! Two layers of failure exist:
//!
//! - [`ErrorInfo`] is a per-node build error. It is memoized in the graph
//!   like a value and reported per key in the evaluation result.
//! - [`EvalError`] is fatal to a whole round: a function panicked, broke the
//!   function contract, or the round was interrupted.

use std::any::Any;
use std::fmt::{self, Debug, Display};
use std::hash::Hash;
use std::panic;

use indexmap::IndexSet;
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;

use super::cycle::CycleInfo;
use crate::graph::Domain;

/// Where a node's error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorOrigin {
    /// The node itself failed, or is part of a cycle.
    Own,
    /// A dependency failed and the node did not handle it.
    Propagated,
}

/// A memoized per-node error.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorInfo<K: Hash + Eq, E> {
    error: Option<E>,
    root_causes: IndexSet<K>,
    cycles: Vec<CycleInfo<K>>,
    origin: ErrorOrigin,
}

/// [`ErrorInfo`] for a domain's key and error types.
pub type ErrorInfoOf<D> = ErrorInfo<<D as Domain>::Key, <D as Domain>::Error>;

impl<K, E> ErrorInfo<K, E>
where
    K: Clone + Eq + Hash,
    E: Clone,
{
    /// `key` failed with `error`.
    pub fn own(key: K, error: E) -> Self {
        let mut root_causes = IndexSet::new();
        root_causes.insert(key);
        Self {
            error: Some(error),
            root_causes,
            cycles: Vec::new(),
            origin: ErrorOrigin::Own,
        }
    }

    /// The node is a member of each of `cycles`.
    pub fn from_cycles(cycles: Vec<CycleInfo<K>>) -> Self {
        Self {
            error: None,
            root_causes: IndexSet::new(),
            cycles,
            origin: ErrorOrigin::Own,
        }
    }

    /// `key` returned `error`, which it received from a dependency whose
    /// failure is described by `child`.
    pub fn rethrown(key: &K, error: E, child: &Self) -> Self {
        Self {
            error: Some(error),
            root_causes: child.root_causes.clone(),
            cycles: child.cycles.iter().map(|c| c.entered_from(key)).collect(),
            origin: ErrorOrigin::Propagated,
        }
    }

    /// `key` could not complete because each of `children` failed.
    ///
    /// The first child carrying a declared error provides the error; root
    /// causes and cycles are the union over all children.
    pub fn from_child_errors<'a, I>(key: &K, children: I) -> Self
    where
        I: IntoIterator<Item = &'a Self>,
        K: 'a,
        E: 'a,
    {
        let mut error = None;
        let mut root_causes = IndexSet::new();
        let mut cycles: Vec<CycleInfo<K>> = Vec::new();
        for child in children {
            if error.is_none() {
                error = child.error.clone();
            }
            root_causes.extend(child.root_causes.iter().cloned());
            for cycle in &child.cycles {
                if cycle.is_member(key) {
                    continue;
                }
                let seen = cycle.entered_from(key);
                if !cycles.contains(&seen) {
                    cycles.push(seen);
                }
            }
        }
        Self {
            error,
            root_causes,
            cycles,
            origin: ErrorOrigin::Propagated,
        }
    }

    /// The error `child` produced, seen from the start of `chain`, where
    /// `chain` is the dependency path walked down to the failing node
    /// (excluding the node itself).
    pub(crate) fn bubbled(chain: &[K], child: &Self) -> Self {
        let mut cycles = child.cycles.clone();
        for key in chain.iter().rev() {
            cycles = cycles.iter().map(|c| c.entered_from(key)).collect();
        }
        Self {
            error: child.error.clone(),
            root_causes: child.root_causes.clone(),
            cycles,
            origin: ErrorOrigin::Propagated,
        }
    }

    /// The declared error, absent for pure cycle errors.
    pub fn error(&self) -> Option<&E> {
        self.error.as_ref()
    }

    /// Keys whose own failure caused this error.
    pub fn root_causes(&self) -> &IndexSet<K> {
        &self.root_causes
    }

    /// Cycles this error stems from.
    pub fn cycles(&self) -> &[CycleInfo<K>] {
        &self.cycles
    }

    pub fn origin(&self) -> ErrorOrigin {
        self.origin
    }

    /// Whether the node failed by itself rather than through a dependency.
    pub fn is_own(&self) -> bool {
        self.origin == ErrorOrigin::Own
    }

    /// Whether this error exists only because of dependency cycles.
    pub fn is_cycle(&self) -> bool {
        self.error.is_none() && !self.cycles.is_empty()
    }
}

impl<K, E> Display for ErrorInfo<K, E>
where
    K: Debug + Hash + Eq,
    E: Display,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.error {
            Some(error) => write!(f, "{error}"),
            None => write!(f, "{} dependency cycle(s)", self.cycles.len()),
        }?;
        if self.origin == ErrorOrigin::Propagated && !self.root_causes.is_empty() {
            let causes: Vec<_> = self.root_causes.iter().collect();
            write!(f, " (caused by {causes:?})")?;
        }
        Ok(())
    }
}

/// The value a function panicked with.
///
/// Kept as caught so the caller can inspect it or keep unwinding with it.
pub struct PanicPayload(Mutex<Option<Box<dyn Any + Send>>>);

impl PanicPayload {
    pub(crate) fn new(payload: Box<dyn Any + Send>) -> Self {
        Self(Mutex::new(Some(payload)))
    }

    /// Take the payload out. Returns `None` once taken.
    pub fn take(&self) -> Option<Box<dyn Any + Send>> {
        self.0.lock().take()
    }

    /// Continue unwinding with the original payload.
    pub fn resume(self) -> ! {
        match self.0.into_inner() {
            Some(payload) => panic::resume_unwind(payload),
            None => panic::resume_unwind(Box::new("panic payload already taken")),
        }
    }
}

impl Debug for PanicPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PanicPayload(..)")
    }
}

/// Failure of an evaluation round as a whole.
#[derive(Debug, Error)]
pub enum EvalError<K: Debug> {
    /// A function panicked. Panics are programming errors, never build
    /// errors. `message` is the payload rendered as text when it is a
    /// string; `payload` is the original value.
    #[error("function for {key:?} panicked: {message}")]
    FunctionPanicked {
        key: K,
        message: String,
        payload: PanicPayload,
    },

    /// No function is registered for the key's function type.
    #[error("no function registered for {key:?}")]
    MissingFunction { key: K },

    /// A function returned a value although some dependency was missing.
    #[error("function for {key:?} returned a value while dependencies were missing")]
    ValueWithMissingDeps { key: K },

    /// A function asked to be restarted without any dependency missing.
    #[error("function for {key:?} returned no value and requested no missing dependencies")]
    NoProgress { key: K },

    /// The round observed an interrupt request.
    #[error("evaluation interrupted")]
    Interrupted,
}

impl<K: Debug> EvalError<K> {
    /// Re-raise a function's panic on the calling thread with its original
    /// payload. Any other error is returned unchanged.
    pub fn resume_panic(self) -> Self {
        match self {
            EvalError::FunctionPanicked { payload, .. } => payload.resume(),
            other => other,
        }
    }
}
