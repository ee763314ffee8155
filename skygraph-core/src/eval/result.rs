//! What one evaluation round produced.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use super::cycle::{CycleInfo, CycleReporter};
use super::error::ErrorInfoOf;
use crate::graph::{Domain, Version};

/// Per-root outcome of a round.
///
/// Each root has a value, an error, or, when the round stopped early in
/// fail-fast mode without reaching it, neither.
pub struct EvaluationResult<D: Domain> {
    roots: Vec<D::Key>,
    values: IndexMap<D::Key, Arc<D::Value>>,
    errors: IndexMap<D::Key, ErrorInfoOf<D>>,
    cycles: Vec<CycleInfo<D::Key>>,
    version: Version,
}

impl<D: Domain> EvaluationResult<D> {
    pub(crate) fn new(
        roots: Vec<D::Key>,
        values: IndexMap<D::Key, Arc<D::Value>>,
        errors: IndexMap<D::Key, ErrorInfoOf<D>>,
        cycles: Vec<CycleInfo<D::Key>>,
        version: Version,
    ) -> Self {
        Self {
            roots,
            values,
            errors,
            cycles,
            version,
        }
    }

    /// The value of `root`, if it has one.
    pub fn get(&self, root: &D::Key) -> Option<&Arc<D::Value>> {
        self.values.get(root)
    }

    /// Values of every root that has one.
    pub fn values(&self) -> &IndexMap<D::Key, Arc<D::Value>> {
        &self.values
    }

    /// The error of `root`, if it failed.
    pub fn error(&self, root: &D::Key) -> Option<&ErrorInfoOf<D>> {
        self.errors.get(root)
    }

    /// Errors of every root that failed.
    pub fn errors(&self) -> &IndexMap<D::Key, ErrorInfoOf<D>> {
        &self.errors
    }

    pub fn has_error(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Cycles found in this round or carried by the roots' errors, without
    /// duplicates.
    pub fn cycles(&self) -> &[CycleInfo<D::Key>] {
        &self.cycles
    }

    /// The requested roots, in request order.
    pub fn root_keys(&self) -> &[D::Key] {
        &self.roots
    }

    /// The version the round ran at.
    pub fn version(&self) -> Version {
        self.version
    }

    /// Human readable descriptions of [`cycles`](Self::cycles).
    pub fn describe_cycles(&self, reporter: &CycleReporter<D::Key>) -> Vec<String> {
        self.cycles.iter().map(|cycle| reporter.report(cycle)).collect()
    }
}

impl<D: Domain> fmt::Debug for EvaluationResult<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvaluationResult")
            .field("version", &self.version)
            .field("roots", &self.roots)
            .field("values", &self.values)
            .field("errors", &self.errors)
            .field("cycles", &self.cycles)
            .finish()
    }
}
