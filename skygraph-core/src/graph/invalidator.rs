//! Invalidation
//!
//! Between rounds, callers report which inputs changed. The invalidator
//! pushes that information up the reverse edges of the graph:
//!
//! 1. Every changed key that has been built is marked Changed.
//! 2. Breadth-first over reverse dependencies, every reached node that is
//!    complete is marked Dirty.
//! 3. A node that was already dirty is not walked through: its reverse
//!    dependencies were dirtied when it was.
//!
//! Nothing is recomputed here. Dirty nodes are checked lazily when a later
//! round requests them, and a dirty node whose dependencies turn out not to
//! have changed goes back to Done without running its function.

use std::collections::{HashSet, VecDeque};

use tracing::debug;

use super::key::Domain;
use super::store::InMemoryGraph;
use crate::eval::EvaluationProgress;

/// Counts of what an invalidation pass touched.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct InvalidationStats {
    /// Keys marked Changed.
    pub changed: usize,
    /// Keys marked Dirty.
    pub dirtied: usize,
    /// Keys removed from the graph.
    pub deleted: usize,
}

/// Marks nodes dirty or deletes them. Must not run during an evaluation.
pub struct Invalidator<'g, D: Domain> {
    graph: &'g InMemoryGraph<D>,
    progress: &'g dyn EvaluationProgress<D::Key>,
}

impl<'g, D: Domain> Invalidator<'g, D> {
    pub fn new(graph: &'g InMemoryGraph<D>, progress: &'g dyn EvaluationProgress<D::Key>) -> Self {
        Self { graph, progress }
    }

    /// Mark `changed` keys Changed and everything depending on them Dirty.
    pub fn invalidate<I>(&self, changed: I) -> InvalidationStats
    where
        I: IntoIterator<Item = D::Key>,
    {
        let mut stats = InvalidationStats::default();
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();

        for key in changed {
            if !visited.insert(key.clone()) {
                continue;
            }
            let Some(entry) = self.graph.get(&key) else {
                continue;
            };
            if self.graph.mark_dirty(&key, true) {
                stats.changed += 1;
                self.progress.invalidated(&key, true);
                queue.extend(entry.reverse_deps());
            }
        }

        while let Some(key) = queue.pop_front() {
            if !visited.insert(key.clone()) {
                continue;
            }
            if self.graph.mark_dirty(&key, false) {
                stats.dirtied += 1;
                self.progress.invalidated(&key, false);
                if let Some(entry) = self.graph.get(&key) {
                    queue.extend(entry.reverse_deps());
                }
            }
        }

        debug!(changed = stats.changed, dirtied = stats.dirtied, "invalidated");
        stats
    }

    /// Remove every node matching `predicate` together with everything that
    /// transitively depends on it.
    ///
    /// Dependents are removed rather than dirtied: their recorded
    /// dependencies would otherwise point at nodes that no longer exist.
    pub fn delete<P>(&self, predicate: P) -> InvalidationStats
    where
        P: Fn(&D::Key) -> bool,
    {
        let mut doomed = HashSet::new();
        let mut queue: VecDeque<D::Key> = self
            .graph
            .keys()
            .into_iter()
            .filter(|key| predicate(key))
            .collect();

        while let Some(key) = queue.pop_front() {
            if !doomed.insert(key.clone()) {
                continue;
            }
            if let Some(entry) = self.graph.get(&key) {
                queue.extend(entry.reverse_deps());
            }
        }

        let deleted = doomed
            .iter()
            .filter(|key| self.graph.remove(key).is_some())
            .count();
        debug!(deleted, "deleted nodes");
        InvalidationStats {
            deleted,
            ..InvalidationStats::default()
        }
    }
}
