//! Graph Nodes
//!
//! This module defines the per-key record kept by the graph.
//!
//! A [`NodeEntry`] owns everything the engine knows about one key: its
//! memoized value or error, the dependencies read by its last evaluation,
//! the keys that read it, and its versions. All of that lives behind one
//! mutex per entry, so different entries can be updated concurrently and a
//! reader always sees a value together with the state it was published in.

use std::any::Any;
use std::collections::HashSet;
use std::hash::Hash;
use std::sync::Arc;

use indexmap::IndexSet;
use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use smallvec::SmallVec;

use super::key::Domain;
use super::version::Version;
use crate::eval::ErrorInfoOf;

/// Lifecycle state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum NodeState {
    /// Created but never completed.
    New,

    /// Something the node transitively depends on changed. The node has to
    /// be checked before its value can be trusted again.
    Dirty,

    /// The node is an input whose observed value changed. It is rebuilt
    /// without checking its dependencies.
    Changed,

    /// Scheduled in the current round and not yet complete.
    Evaluating,

    /// Holds an up-to-date value.
    Done,

    /// Holds an up-to-date error.
    Error,
}

impl NodeState {
    /// Whether the node needs work before it can be read.
    pub fn is_dirty(self) -> bool {
        matches!(self, NodeState::Dirty | NodeState::Changed)
    }

    /// Whether the node holds a trusted value or error.
    pub fn is_complete(self) -> bool {
        matches!(self, NodeState::Done | NodeState::Error)
    }
}

/// One batch of dependencies requested together.
pub type DepGroup<K> = SmallVec<[K; 4]>;

/// Dependencies in request order, grouped by the batch they were requested
/// in.
///
/// Groups matter for dirty checking: a later group may only be needed
/// because of what an earlier group returned, so groups are re-checked one
/// at a time and checking stops at the first group that changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupedDeps<K: Hash + Eq> {
    groups: Vec<DepGroup<K>>,
    seen: HashSet<K>,
}

impl<K: Clone + Hash + Eq> GroupedDeps<K> {
    pub fn new() -> Self {
        Self {
            groups: Vec::new(),
            seen: HashSet::new(),
        }
    }

    /// Append a group. Keys already recorded are skipped, and a group that
    /// ends up empty is not added.
    pub fn push_group<I: IntoIterator<Item = K>>(&mut self, keys: I) {
        let group: DepGroup<K> = keys
            .into_iter()
            .filter(|key| self.seen.insert(key.clone()))
            .collect();
        if !group.is_empty() {
            self.groups.push(group);
        }
    }

    /// The group at `index`.
    pub fn group(&self, index: usize) -> Option<&DepGroup<K>> {
        self.groups.get(index)
    }

    pub fn groups(&self) -> &[DepGroup<K>] {
        &self.groups
    }

    pub fn contains(&self, key: &K) -> bool {
        self.seen.contains(key)
    }

    /// All keys in request order.
    pub fn iter(&self) -> impl Iterator<Item = &K> {
        self.groups.iter().flatten()
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

impl<K: Clone + Hash + Eq> Default for GroupedDeps<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// How a scheduled node is being brought up to date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BuildMode {
    /// Re-checking old dependency groups, starting at `next_group`.
    CheckDirty { next_group: usize },

    /// Running the node's function.
    Rebuild,
}

/// Round-local bookkeeping of a node that is being evaluated.
///
/// Dropped as soon as the node completes; reset wholesale when a round ends
/// without completing it.
pub(crate) struct BuildingState<D: Domain> {
    /// State before the round touched the node.
    pub(crate) prior: NodeState,
    pub(crate) mode: BuildMode,
    /// Dependencies requested by the function so far, across restarts.
    pub(crate) temp_deps: GroupedDeps<D::Key>,
    /// Every dependency this node had to wait for in the round.
    pub(crate) waiting_on: IndexSet<D::Key>,
    /// Parents to signal on completion.
    pub(crate) waiting_parents: IndexSet<D::Key>,
    /// Signals still expected before the node can run again. Signals that
    /// arrive while the node runs drive this below zero until the runner
    /// adds the number of dependencies it registered.
    pub(crate) outstanding: isize,
    /// Owned by the scheduler: queued or running.
    pub(crate) scheduled: bool,
    pub(crate) compute_state: Option<Box<dyn Any + Send>>,
}

impl<D: Domain> BuildingState<D> {
    fn new(prior: NodeState) -> Self {
        let mode = match prior {
            NodeState::Dirty => BuildMode::CheckDirty { next_group: 0 },
            _ => BuildMode::Rebuild,
        };
        Self {
            prior,
            mode,
            temp_deps: GroupedDeps::new(),
            waiting_on: IndexSet::new(),
            waiting_parents: IndexSet::new(),
            outstanding: 0,
            scheduled: true,
            compute_state: None,
        }
    }
}

/// The mutable part of an entry.
pub(crate) struct EntryInner<D: Domain> {
    pub(crate) state: NodeState,
    pub(crate) value: Option<Arc<D::Value>>,
    pub(crate) error: Option<ErrorInfoOf<D>>,
    pub(crate) deps: GroupedDeps<D::Key>,
    pub(crate) rdeps: HashSet<D::Key>,
    pub(crate) changed_at: Version,
    pub(crate) evaluated_at: Version,
    pub(crate) building: Option<BuildingState<D>>,
}

impl<D: Domain> EntryInner<D> {
    /// Move a New, Dirty or Changed node to Evaluating.
    ///
    /// Returns false if the node is already scheduled or complete.
    pub(crate) fn begin_evaluation(&mut self) -> bool {
        match self.state {
            NodeState::New | NodeState::Dirty | NodeState::Changed => {
                self.building = Some(BuildingState::new(self.state));
                self.state = NodeState::Evaluating;
                true
            }
            NodeState::Evaluating | NodeState::Done | NodeState::Error => false,
        }
    }

    /// Undo an evaluation that did not complete.
    pub(crate) fn abandon_evaluation(&mut self) -> bool {
        match self.building.take() {
            Some(building) => {
                self.state = building.prior;
                true
            }
            None => false,
        }
    }

    /// Take the parents waiting on this node.
    pub(crate) fn take_waiting_parents(&mut self) -> Vec<D::Key> {
        self.building
            .take()
            .map(|building| building.waiting_parents.into_iter().collect())
            .unwrap_or_default()
    }
}

/// A node in the dependency graph.
pub struct NodeEntry<D: Domain> {
    key: D::Key,
    inner: Mutex<EntryInner<D>>,
}

impl<D: Domain> NodeEntry<D> {
    /// Create a New node for `key`.
    pub fn new(key: D::Key) -> Self {
        Self {
            key,
            inner: Mutex::new(EntryInner {
                state: NodeState::New,
                value: None,
                error: None,
                deps: GroupedDeps::new(),
                rdeps: HashSet::new(),
                changed_at: Version::MINIMUM,
                evaluated_at: Version::MINIMUM,
                building: None,
            }),
        }
    }

    pub fn key(&self) -> &D::Key {
        &self.key
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, EntryInner<D>> {
        self.inner.lock()
    }

    pub fn state(&self) -> NodeState {
        self.inner.lock().state
    }

    /// The value, if the node is Done.
    pub fn value(&self) -> Option<Arc<D::Value>> {
        let inner = self.inner.lock();
        match inner.state {
            NodeState::Done => inner.value.clone(),
            _ => None,
        }
    }

    /// The last value, even if the node is dirty.
    pub fn last_value(&self) -> Option<Arc<D::Value>> {
        self.inner.lock().value.clone()
    }

    /// The error, if the node is in the Error state.
    pub fn error(&self) -> Option<ErrorInfoOf<D>> {
        let inner = self.inner.lock();
        match inner.state {
            NodeState::Error => inner.error.clone(),
            _ => None,
        }
    }

    /// Version at which the value last changed.
    pub fn changed_at(&self) -> Version {
        self.inner.lock().changed_at
    }

    /// Version at which the node was last built or verified.
    pub fn evaluated_at(&self) -> Version {
        self.inner.lock().evaluated_at
    }

    /// Dependencies of the last completed evaluation, in request order.
    pub fn direct_deps(&self) -> Vec<D::Key> {
        self.inner.lock().deps.iter().cloned().collect()
    }

    /// Dependency groups of the last completed evaluation.
    pub fn dep_groups(&self) -> Vec<DepGroup<D::Key>> {
        self.inner.lock().deps.groups().to_vec()
    }

    pub fn reverse_deps(&self) -> HashSet<D::Key> {
        self.inner.lock().rdeps.clone()
    }

    pub fn is_complete(&self) -> bool {
        self.inner.lock().state.is_complete()
    }

    pub fn is_dirty(&self) -> bool {
        self.inner.lock().state.is_dirty()
    }
}

impl<D: Domain> std::fmt::Debug for NodeEntry<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("NodeEntry")
            .field("key", &self.key)
            .field("state", &inner.state)
            .field("changed_at", &inner.changed_at)
            .field("evaluated_at", &inner.evaluated_at)
            .field("deps", &inner.deps.len())
            .field("rdeps", &inner.rdeps.len())
            .finish()
    }
}
