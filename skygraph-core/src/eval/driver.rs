//! Build driver: the entry point for callers.
//!
//! The driver pairs a session with a cycle reporter. Everything that
//! mutates the graph between rounds takes `&mut self`, so invalidation can
//! never overlap an evaluation.

use std::sync::Arc;

use tracing::info;

use super::cycle::{CycleInfo, CycleReporter};
use super::error::EvalError;
use super::function::FunctionRegistry;
use super::interrupt::InterruptHandle;
use super::options::EvaluationOptions;
use super::progress::EvaluationProgress;
use super::result::EvaluationResult;
use super::session::EvaluatorSession;
use crate::graph::{Domain, GraphDump, InMemoryGraph, InvalidationStats, Version};

pub struct BuildDriver<D: Domain> {
    session: EvaluatorSession<D>,
    reporter: CycleReporter<D::Key>,
}

impl<D: Domain> BuildDriver<D> {
    pub fn new(registry: FunctionRegistry<D>) -> Self {
        Self::from_session(EvaluatorSession::new(registry))
    }

    pub fn from_session(session: EvaluatorSession<D>) -> Self {
        Self {
            session,
            reporter: CycleReporter::new(),
        }
    }

    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn EvaluationProgress<D::Key>>) -> Self {
        self.session = self.session.with_progress(progress);
        self
    }

    /// Use `reporter` to describe cycles.
    #[must_use]
    pub fn with_cycle_reporter(mut self, reporter: CycleReporter<D::Key>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Evaluate `roots`, reusing everything still valid from earlier rounds.
    ///
    /// Per-key failures are reported in the result. An `Err` means the round
    /// as a whole failed: a function panicked or broke its contract, or the
    /// round was interrupted. Either way the graph stays consistent and the
    /// next round picks up where this one left off.
    pub fn evaluate<I>(&mut self, roots: I, options: &EvaluationOptions) -> Result<EvaluationResult<D>, EvalError<D::Key>>
    where
        I: IntoIterator<Item = D::Key>,
    {
        let roots: Vec<D::Key> = roots.into_iter().collect();
        let result = self.session.evaluate(&roots, options)?;
        for description in result.describe_cycles(&self.reporter) {
            info!("{description}");
        }
        Ok(result)
    }

    /// See [`EvaluatorSession::invalidate`].
    pub fn invalidate<I>(&mut self, changed: I) -> InvalidationStats
    where
        I: IntoIterator<Item = D::Key>,
    {
        self.session.invalidate(changed)
    }

    /// See [`EvaluatorSession::inject`].
    pub fn inject<I>(&mut self, values: I) -> InvalidationStats
    where
        I: IntoIterator<Item = (D::Key, D::Value)>,
    {
        self.session.inject(values)
    }

    /// See [`EvaluatorSession::delete`].
    pub fn delete<P>(&mut self, predicate: P) -> InvalidationStats
    where
        P: Fn(&D::Key) -> bool,
    {
        self.session.delete(predicate)
    }

    pub fn graph(&self) -> &InMemoryGraph<D> {
        self.session.graph()
    }

    pub fn session(&self) -> &EvaluatorSession<D> {
        &self.session
    }

    pub fn version(&self) -> Version {
        self.session.version()
    }

    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.session.interrupt_handle()
    }

    /// Describe one cycle with the configured reporter.
    pub fn describe_cycle(&self, cycle: &CycleInfo<D::Key>) -> String {
        self.reporter.report(cycle)
    }

    /// Describe every cycle of `result`.
    pub fn describe_cycles(&self, result: &EvaluationResult<D>) -> Vec<String> {
        result.describe_cycles(&self.reporter)
    }

    /// Snapshot the graph for debugging.
    pub fn dump(&self) -> GraphDump<D::Key> {
        GraphDump::capture(self.graph())
    }
}
