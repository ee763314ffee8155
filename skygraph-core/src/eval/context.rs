//! The environment a function reads its dependencies through.
//!
//! # Overview
//!
//! Every dependency read is recorded. The reads of one call form one
//! dependency group, which is what dirty checking later re-validates in
//! order.
//!
//! Reads never block. A dependency that is not complete yet is scheduled
//! (if nobody did so already), the current node is registered as waiting on
//! it, and the read returns `None`. The function is expected to notice
//! [`values_missing`](Environment::values_missing) and return
//! [`Computed::NeedsDeps`](super::Computed::NeedsDeps); it is invoked again
//! once everything it waits on has completed.
//!
//! A dependency that completed with an error reads as missing too, unless
//! the caller opted into seeing that error with one of the `_or_throw`
//! methods.

use std::any::{type_name, Any};
use std::sync::Arc;

use indexmap::IndexMap;

use super::error::ErrorInfoOf;
use super::evaluator::{DepRead, ParallelEvaluator};
use crate::graph::{Domain, Version};

/// Dependency access for one invocation of a function.
pub struct Environment<'a, D: Domain> {
    evaluator: &'a ParallelEvaluator<'a, D>,
    key: &'a D::Key,
    groups: Vec<Vec<D::Key>>,
    waiting_on: Vec<D::Key>,
    registered: usize,
    missing: bool,
    child_errors: Vec<ErrorInfoOf<D>>,
    surfaced: Vec<ErrorInfoOf<D>>,
    state: Option<Box<dyn Any + Send>>,
}

/// What an invocation left behind, handed back to the evaluator.
pub(crate) struct Requests<D: Domain> {
    pub(crate) groups: Vec<Vec<D::Key>>,
    pub(crate) waiting_on: Vec<D::Key>,
    /// Dependencies that will signal this node when they complete.
    pub(crate) registered: usize,
    pub(crate) missing: bool,
    pub(crate) child_errors: Vec<ErrorInfoOf<D>>,
    pub(crate) surfaced: Vec<ErrorInfoOf<D>>,
    pub(crate) state: Option<Box<dyn Any + Send>>,
}

impl<'a, D: Domain> Environment<'a, D> {
    pub(crate) fn new(
        evaluator: &'a ParallelEvaluator<'a, D>,
        key: &'a D::Key,
        state: Option<Box<dyn Any + Send>>,
    ) -> Self {
        Self {
            evaluator,
            key,
            groups: Vec::new(),
            waiting_on: Vec::new(),
            registered: 0,
            missing: false,
            child_errors: Vec::new(),
            surfaced: Vec::new(),
            state,
        }
    }

    /// The key being computed.
    pub fn key(&self) -> &D::Key {
        self.key
    }

    /// The version of the running round.
    pub fn version(&self) -> Version {
        self.evaluator.version()
    }

    /// The value of `dep`, or `None` if it is not available yet or failed.
    pub fn get_value(&mut self, dep: &D::Key) -> Option<Arc<D::Value>> {
        self.groups.push(vec![dep.clone()]);
        self.read(dep, &reject).unwrap_or(None)
    }

    /// Read several dependencies as one group.
    pub fn get_values<'k, I>(&mut self, deps: I) -> IndexMap<D::Key, Option<Arc<D::Value>>>
    where
        I: IntoIterator<Item = &'k D::Key>,
    {
        let deps: Vec<D::Key> = deps.into_iter().cloned().collect();
        self.groups.push(deps.clone());
        deps.into_iter()
            .map(|dep| {
                let value = self.read(&dep, &reject).unwrap_or(None);
                (dep, value)
            })
            .collect()
    }

    /// Like [`get_value`](Self::get_value), but a declared error of `dep`
    /// that `accepts` is returned instead of reading as missing.
    ///
    /// A surfaced error does not count as missing: the function is expected
    /// to handle it, or to return it, in which case the node's error keeps
    /// the dependency's root causes.
    pub fn get_value_or_throw<F>(&mut self, dep: &D::Key, accepts: F) -> Result<Option<Arc<D::Value>>, D::Error>
    where
        F: Fn(&D::Error) -> bool,
    {
        self.groups.push(vec![dep.clone()]);
        self.read(dep, &accepts)
    }

    /// Batched form of [`get_value_or_throw`](Self::get_value_or_throw).
    pub fn get_values_or_throw<'k, I, F>(
        &mut self,
        deps: I,
        accepts: F,
    ) -> IndexMap<D::Key, Result<Option<Arc<D::Value>>, D::Error>>
    where
        I: IntoIterator<Item = &'k D::Key>,
        F: Fn(&D::Error) -> bool,
    {
        let deps: Vec<D::Key> = deps.into_iter().cloned().collect();
        self.groups.push(deps.clone());
        deps.into_iter()
            .map(|dep| {
                let result = self.read(&dep, &accepts);
                (dep, result)
            })
            .collect()
    }

    /// Whether any read so far returned no value.
    pub fn values_missing(&self) -> bool {
        self.missing
    }

    /// Whether the round has been asked to stop. Long-running functions may
    /// poll this and return [`Computed::NeedsDeps`](super::Computed::NeedsDeps)
    /// early.
    pub fn is_interrupted(&self) -> bool {
        self.evaluator.is_interrupted()
    }

    /// State kept across restarts of this key within the round.
    ///
    /// Created with `S::default()` on first use, and replaced if a
    /// different type was stored before. Dropped when the node completes.
    pub fn compute_state<S: Default + Send + 'static>(&mut self) -> &mut S {
        if !matches!(&self.state, Some(state) if (**state).is::<S>()) {
            self.state = Some(Box::new(S::default()));
        }
        match self.state.as_mut().and_then(|state| state.downcast_mut::<S>()) {
            Some(state) => state,
            None => unreachable!("compute state holds a {}", type_name::<S>()),
        }
    }

    fn read(
        &mut self,
        dep: &D::Key,
        accepts: &dyn Fn(&D::Error) -> bool,
    ) -> Result<Option<Arc<D::Value>>, D::Error> {
        match self.evaluator.request(self.key, dep) {
            DepRead::Value { value, .. } => Ok(Some(value)),
            DepRead::Failed { error, .. } => {
                match error.error().filter(|declared| accepts(declared)).cloned() {
                    Some(declared) => {
                        self.surfaced.push(error);
                        Err(declared)
                    }
                    None => {
                        self.missing = true;
                        self.child_errors.push(error);
                        Ok(None)
                    }
                }
            }
            DepRead::Pending { registered } => {
                self.missing = true;
                if registered {
                    self.registered += 1;
                }
                self.waiting_on.push(dep.clone());
                Ok(None)
            }
            DepRead::Interrupted => {
                self.missing = true;
                Ok(None)
            }
        }
    }

    pub(crate) fn into_requests(self) -> Requests<D> {
        Requests {
            groups: self.groups,
            waiting_on: self.waiting_on,
            registered: self.registered,
            missing: self.missing,
            child_errors: self.child_errors,
            surfaced: self.surfaced,
            state: self.state,
        }
    }
}

fn reject<E>(_: &E) -> bool {
    false
}
