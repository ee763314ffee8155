//! In-memory graph store.
//!
//! The store maps keys to [`NodeEntry`]s. The table itself is a sharded
//! concurrent map, and each entry carries its own lock, so there is no
//! global lock over the graph.
//!
//! Operations that touch more than one entry (recording dependencies,
//! removing a node) lock one entry at a time. No code path holds two entry
//! locks at once, which keeps lock ordering trivially deadlock free.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::trace;

use super::key::Domain;
use super::node::{GroupedDeps, NodeEntry, NodeState};
use super::version::Version;
use crate::eval::ErrorInfoOf;

/// Outcome of moving a node into a terminal state.
#[derive(Debug)]
pub struct Completion<K> {
    /// Parents that were waiting on the node in the current round.
    pub waiting_parents: Vec<K>,
    /// Whether the value or error differs from the previous one.
    pub changed: bool,
}

/// The graph: every node known to a session.
pub struct InMemoryGraph<D: Domain> {
    nodes: DashMap<D::Key, Arc<NodeEntry<D>>>,
}

impl<D: Domain> InMemoryGraph<D> {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self {
            nodes: DashMap::new(),
        }
    }

    /// Get the entry for `key`, creating a New one if needed.
    ///
    /// Concurrent callers for equal keys always receive the same entry.
    pub fn get_or_create(&self, key: &D::Key) -> Arc<NodeEntry<D>> {
        if let Some(existing) = self.nodes.get(key) {
            return Arc::clone(existing.value());
        }
        let entry = self
            .nodes
            .entry(key.clone())
            .or_insert_with(|| Arc::new(NodeEntry::new(key.clone())));
        Arc::clone(entry.value())
    }

    /// Get the entry for `key` if it exists.
    pub fn get(&self, key: &D::Key) -> Option<Arc<NodeEntry<D>>> {
        self.nodes.get(key).map(|entry| Arc::clone(entry.value()))
    }

    /// Get the entry for a key that must exist.
    ///
    /// # Panics
    ///
    /// Panics if the key is not in the graph. Callers only ask for keys they
    /// created, so a miss is a bug in the caller.
    pub fn entry(&self, key: &D::Key) -> Arc<NodeEntry<D>> {
        match self.get(key) {
            Some(entry) => entry,
            None => panic!("node {key:?} is not in the graph"),
        }
    }

    pub fn contains(&self, key: &D::Key) -> bool {
        self.nodes.contains_key(key)
    }

    /// Replace the dependencies of `key` with `deps`.
    ///
    /// Keeps reverse edges in sync: `key` is added to the reverse
    /// dependencies of every new dependency and removed from those of
    /// dependencies it no longer reads.
    pub fn record_deps(&self, key: &D::Key, deps: GroupedDeps<D::Key>) {
        let entry = self.entry(key);
        let old = {
            let mut inner = entry.lock();
            std::mem::replace(&mut inner.deps, deps.clone())
        };

        for dropped in old.iter().filter(|dep| !deps.contains(dep)) {
            if let Some(dep) = self.get(dropped) {
                dep.lock().rdeps.remove(key);
            }
        }
        for added in deps.iter() {
            self.get_or_create(added).lock().rdeps.insert(key.clone());
        }
        trace!(?key, deps = deps.len(), "recorded deps");
    }

    /// Publish a value for `key` at `version`.
    ///
    /// If the value equals the previous one, the previous value and its
    /// `changed_at` are kept: dependents that already read it need not
    /// rebuild.
    pub fn set_done(&self, key: &D::Key, value: Arc<D::Value>, version: Version) -> Completion<D::Key> {
        let entry = self.entry(key);
        let mut inner = entry.lock();
        let changed = !inner.value.as_ref().is_some_and(|old| **old == *value);
        if changed {
            inner.value = Some(value);
            inner.changed_at = version;
        }
        inner.error = None;
        inner.evaluated_at = version;
        inner.state = NodeState::Done;
        Completion {
            waiting_parents: inner.take_waiting_parents(),
            changed,
        }
    }

    /// Publish an error for `key` at `version`.
    pub fn set_error(&self, key: &D::Key, error: ErrorInfoOf<D>, version: Version) -> Completion<D::Key> {
        let entry = self.entry(key);
        let mut inner = entry.lock();
        let changed = inner.error.as_ref() != Some(&error);
        if changed {
            inner.error = Some(error);
            inner.changed_at = version;
        }
        inner.value = None;
        inner.evaluated_at = version;
        inner.state = NodeState::Error;
        Completion {
            waiting_parents: inner.take_waiting_parents(),
            changed,
        }
    }

    /// Confirm a dirty node without rebuilding it.
    pub fn mark_clean(&self, key: &D::Key, version: Version) -> Completion<D::Key> {
        let entry = self.entry(key);
        let mut inner = entry.lock();
        inner.state = if inner.error.is_some() {
            NodeState::Error
        } else {
            NodeState::Done
        };
        inner.evaluated_at = version;
        Completion {
            waiting_parents: inner.take_waiting_parents(),
            changed: false,
        }
    }

    /// Mark a complete node Dirty, or Changed if its own input changed.
    ///
    /// Returns whether the node was complete before. A Dirty node asked to
    /// become Changed is upgraded but still reports false, since its reverse
    /// dependencies were already dirtied.
    pub fn mark_dirty(&self, key: &D::Key, changed: bool) -> bool {
        let Some(entry) = self.get(key) else {
            return false;
        };
        let mut inner = entry.lock();
        let target = if changed {
            NodeState::Changed
        } else {
            NodeState::Dirty
        };
        match inner.state {
            NodeState::Done | NodeState::Error => {
                inner.state = target;
                true
            }
            NodeState::Dirty if changed => {
                inner.state = NodeState::Changed;
                false
            }
            _ => false,
        }
    }

    /// Set the value of an input key directly, outside of any function.
    ///
    /// Returns whether the value differs from the previous one.
    pub fn inject(&self, key: &D::Key, value: Arc<D::Value>, version: Version) -> bool {
        let entry = self.get_or_create(key);
        let old_deps = {
            let mut inner = entry.lock();
            inner.building = None;
            std::mem::take(&mut inner.deps)
        };
        for dep in old_deps.iter() {
            if let Some(dep) = self.get(dep) {
                dep.lock().rdeps.remove(key);
            }
        }
        self.set_done(key, value, version).changed
    }

    /// Reverse dependencies of a key that must exist.
    pub fn reverse_deps(&self, key: &D::Key) -> HashSet<D::Key> {
        self.entry(key).reverse_deps()
    }

    /// Direct dependencies of a key that must exist.
    pub fn direct_deps(&self, key: &D::Key) -> Vec<D::Key> {
        self.entry(key).direct_deps()
    }

    /// Remove a node.
    ///
    /// The node disappears from the reverse dependencies of everything it
    /// depended on. Its own reverse dependencies are left pointing at a
    /// missing key; callers remove or invalidate them.
    pub fn remove(&self, key: &D::Key) -> Option<Arc<NodeEntry<D>>> {
        let (_, entry) = self.nodes.remove(key)?;
        for dep in entry.direct_deps() {
            if let Some(dep) = self.get(&dep) {
                dep.lock().rdeps.remove(key);
            }
        }
        Some(entry)
    }

    pub fn state_of(&self, key: &D::Key) -> Option<NodeState> {
        self.get(key).map(|entry| entry.state())
    }

    pub fn value_of(&self, key: &D::Key) -> Option<Arc<D::Value>> {
        self.get(key).and_then(|entry| entry.value())
    }

    pub fn error_of(&self, key: &D::Key) -> Option<ErrorInfoOf<D>> {
        self.get(key).and_then(|entry| entry.error())
    }

    /// Snapshot of all keys.
    pub fn keys(&self) -> Vec<D::Key> {
        self.nodes.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Snapshot of all entries.
    pub fn entries(&self) -> Vec<Arc<NodeEntry<D>>> {
        self.nodes.iter().map(|entry| Arc::clone(entry.value())).collect()
    }

    /// Get the total number of nodes in the graph.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Drop every node.
    pub fn clear(&self) {
        self.nodes.clear();
    }
}

impl<D: Domain> Default for InMemoryGraph<D> {
    fn default() -> Self {
        Self::new()
    }
}
