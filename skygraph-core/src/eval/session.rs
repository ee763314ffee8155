//! Evaluator session.
//!
//! A session owns everything that lives across rounds: the graph, the
//! function registry, the version counter, the progress receiver and the
//! injections waiting for the next round. Nothing here is global, so any
//! number of sessions can coexist in one process.

use std::sync::Arc;

use indexmap::IndexMap;
use tracing::debug;

use super::error::EvalError;
use super::evaluator::ParallelEvaluator;
use super::function::FunctionRegistry;
use super::interrupt::InterruptHandle;
use super::options::EvaluationOptions;
use super::progress::{EvaluationProgress, NullProgress};
use super::result::EvaluationResult;
use crate::graph::{Domain, InMemoryGraph, InvalidationStats, Invalidator, NodeState, Version, VersionCounter};

pub struct EvaluatorSession<D: Domain> {
    graph: InMemoryGraph<D>,
    registry: FunctionRegistry<D>,
    versions: VersionCounter,
    progress: Arc<dyn EvaluationProgress<D::Key>>,
    interrupt: InterruptHandle,
    injections: IndexMap<D::Key, Arc<D::Value>>,
}

impl<D: Domain> EvaluatorSession<D> {
    /// Create a session with an empty graph.
    pub fn new(registry: FunctionRegistry<D>) -> Self {
        Self {
            graph: InMemoryGraph::new(),
            registry,
            versions: VersionCounter::new(),
            progress: Arc::new(NullProgress),
            interrupt: InterruptHandle::new(),
            injections: IndexMap::new(),
        }
    }

    /// Send graph events to `progress`.
    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn EvaluationProgress<D::Key>>) -> Self {
        self.progress = progress;
        self
    }

    pub fn graph(&self) -> &InMemoryGraph<D> {
        &self.graph
    }

    pub fn registry(&self) -> &FunctionRegistry<D> {
        &self.registry
    }

    /// Version of the most recent round.
    pub fn version(&self) -> Version {
        self.versions.current()
    }

    /// A handle that interrupts this session's rounds from any thread.
    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.interrupt.clone()
    }

    /// Run one round at a fresh version.
    ///
    /// An interrupt requested while no round was running is discarded.
    pub fn evaluate(
        &mut self,
        roots: &[D::Key],
        options: &EvaluationOptions,
    ) -> Result<EvaluationResult<D>, EvalError<D::Key>> {
        if self.interrupt.take() {
            debug!("discarding interrupt requested between rounds");
        }
        let version = self.versions.advance();
        self.apply_injections(version);
        ParallelEvaluator::new(
            &self.graph,
            &self.registry,
            self.progress.as_ref(),
            &self.interrupt,
            version,
            options,
        )
        .evaluate(roots)
    }

    /// Mark `changed` keys and everything depending on them for
    /// re-evaluation.
    pub fn invalidate<I>(&mut self, changed: I) -> InvalidationStats
    where
        I: IntoIterator<Item = D::Key>,
    {
        Invalidator::new(&self.graph, self.progress.as_ref()).invalidate(changed)
    }

    /// Set input values directly. They take effect at the start of the next
    /// round; dependents of keys whose value differs are dirtied now.
    pub fn inject<I>(&mut self, values: I) -> InvalidationStats
    where
        I: IntoIterator<Item = (D::Key, D::Value)>,
    {
        let mut differing = Vec::new();
        for (key, value) in values {
            let unchanged = self.graph.get(&key).is_some_and(|entry| {
                entry.state() == NodeState::Done && entry.value().is_some_and(|old| *old == value)
            });
            if !unchanged {
                differing.push(key.clone());
            }
            self.injections.insert(key, Arc::new(value));
        }
        debug!(injected = self.injections.len(), differing = differing.len(), "queued injections");
        Invalidator::new(&self.graph, self.progress.as_ref()).invalidate(differing)
    }

    /// Remove every node matching `predicate` and everything depending on
    /// it. Pending injections for removed keys are dropped as well.
    pub fn delete<P>(&mut self, predicate: P) -> InvalidationStats
    where
        P: Fn(&D::Key) -> bool,
    {
        self.injections.retain(|key, _| !predicate(key));
        Invalidator::new(&self.graph, self.progress.as_ref()).delete(predicate)
    }

    fn apply_injections(&mut self, version: Version) {
        for (key, value) in self.injections.drain(..) {
            let changed = self.graph.inject(&key, value, version);
            debug!(?key, changed, "applied injection");
        }
    }
}
