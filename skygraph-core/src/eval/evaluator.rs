//! Parallel Evaluator
//!
//! This module drives one evaluation round over the graph.
//!
//! # Overview
//!
//! A fixed set of worker threads pulls node keys from a shared queue. For
//! each key a worker either re-checks the node's old dependencies (if the
//! node is dirty) or runs its function. Functions never block: a missing
//! dependency is scheduled, the node registers itself as waiting on it, and
//! the function returns early. Every completing node signals the nodes
//! waiting on it, and a node whose outstanding signals reach zero is put
//! back on the queue.
//!
//! When the queue drains with roots still incomplete, the only thing that
//! can hold them up is a dependency cycle. The evaluator finds the cycles,
//! fails their members and lets the workers continue.
//!
//! # Design Decisions
//!
//! 1. Each node carries a signed counter of signals it still expects.
//!    Signals that arrive while the node's function runs push it below zero;
//!    the runner then adds the number of dependencies it registered on, and
//!    reruns immediately if the sum is zero. No thread ever waits on a
//!    node's completion.
//!
//! 2. A node is queued or running on at most one worker at a time, tracked
//!    by the `scheduled` flag of its building state.
//!
//! 3. Everything a round does to nodes it did not complete is undone when
//!    the round ends, so an interrupted or aborted round leaves the graph
//!    as it found it apart from the nodes that did complete.

use std::any::Any;
use std::collections::HashSet;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam::channel::{self, Receiver, Sender};
use dashmap::DashSet;
use indexmap::{IndexMap, IndexSet};
use parking_lot::Mutex;
use tracing::{debug, info_span, trace, warn};

use super::context::Environment;
use super::cycle::{find_cycles, CycleInfo};
use super::error::{ErrorInfo, ErrorInfoOf, EvalError, PanicPayload};
use super::function::{Computed, FunctionRegistry};
use super::interrupt::InterruptHandle;
use super::options::EvaluationOptions;
use super::progress::{EvaluatedOutcome, EvaluationProgress};
use super::result::EvaluationResult;
use crate::graph::{BuildMode, Domain, GroupedDeps, InMemoryGraph, NodeEntry, NodeState, Version};

enum Task<K> {
    Evaluate(K),
    Shutdown,
}

/// What a node sees when it reads a dependency.
pub(crate) enum DepRead<D: Domain> {
    Value {
        value: Arc<D::Value>,
        changed_at: Version,
    },
    Failed {
        error: ErrorInfoOf<D>,
        changed_at: Version,
    },
    /// Not complete yet. `registered` is true if this read added the reader
    /// to the dependency's waiting parents.
    Pending { registered: bool },
    Interrupted,
}

enum DirtyCheck {
    Clean,
    Rebuild,
    Waiting,
}

/// One evaluation round.
pub(crate) struct ParallelEvaluator<'a, D: Domain> {
    graph: &'a InMemoryGraph<D>,
    registry: &'a FunctionRegistry<D>,
    progress: &'a dyn EvaluationProgress<D::Key>,
    interrupt: &'a InterruptHandle,
    version: Version,
    keep_going: bool,
    threads: usize,
    sender: Sender<Task<D::Key>>,
    receiver: Receiver<Task<D::Key>>,
    /// Tasks sent but not yet finished.
    queued: AtomicUsize,
    /// Set after the first error in fail-fast mode; no new work is queued.
    stopping: AtomicBool,
    /// Set on a fatal error; queued work is skipped.
    failed: AtomicBool,
    fatal: Mutex<Option<EvalError<D::Key>>>,
    /// Every key this round started evaluating.
    touched: DashSet<D::Key>,
}

impl<'a, D: Domain> ParallelEvaluator<'a, D> {
    pub(crate) fn new(
        graph: &'a InMemoryGraph<D>,
        registry: &'a FunctionRegistry<D>,
        progress: &'a dyn EvaluationProgress<D::Key>,
        interrupt: &'a InterruptHandle,
        version: Version,
        options: &EvaluationOptions,
    ) -> Self {
        let (sender, receiver) = channel::unbounded();
        Self {
            graph,
            registry,
            progress,
            interrupt,
            version,
            keep_going: options.keep_going,
            threads: options.effective_threads(),
            sender,
            receiver,
            queued: AtomicUsize::new(0),
            stopping: AtomicBool::new(false),
            failed: AtomicBool::new(false),
            fatal: Mutex::new(None),
            touched: DashSet::new(),
        }
    }

    pub(crate) fn version(&self) -> Version {
        self.version
    }

    pub(crate) fn is_interrupted(&self) -> bool {
        self.interrupt.is_interrupted()
    }

    /// Bring `roots` up to date.
    pub(crate) fn evaluate(&self, roots: &[D::Key]) -> Result<EvaluationResult<D>, EvalError<D::Key>> {
        let roots: Vec<D::Key> = roots.iter().cloned().collect::<IndexSet<_>>().into_iter().collect();
        let span = info_span!("evaluate", version = %self.version, roots = roots.len());
        let _guard = span.enter();

        let outcome = self.drive(&roots);
        self.abandon_unfinished();
        if let Ok(result) = &outcome {
            debug!(
                values = result.values().len(),
                errors = result.errors().len(),
                cycles = result.cycles().len(),
                "round complete"
            );
        }
        outcome
    }

    fn drive(&self, roots: &[D::Key]) -> Result<EvaluationResult<D>, EvalError<D::Key>> {
        for root in roots {
            let entry = self.graph.get_or_create(root);
            let started = entry.lock().begin_evaluation();
            if started {
                self.started(root);
            }
        }

        let mut cycles = Vec::new();
        loop {
            self.run_workers();
            self.check_aborted()?;

            let stuck: Vec<D::Key> = roots.iter().filter(|root| !self.is_complete(root)).cloned().collect();
            if stuck.is_empty() || self.stopping.load(Ordering::Acquire) {
                break;
            }
            let found = find_cycles(&stuck, |key| self.stuck_deps(key));
            if found.is_empty() {
                warn!(stuck = stuck.len(), "roots did not complete and no cycle holds them up");
                break;
            }
            self.fail_cycle_members(&found);
            cycles.extend(found);
        }

        Ok(self.collect(roots, cycles))
    }

    fn check_aborted(&self) -> Result<(), EvalError<D::Key>> {
        if let Some(error) = self.fatal.lock().take() {
            return Err(error);
        }
        if self.interrupt.take() {
            warn!("evaluation interrupted");
            return Err(EvalError::Interrupted);
        }
        Ok(())
    }

    fn run_workers(&self) {
        if self.queued.load(Ordering::Acquire) == 0 {
            return;
        }
        if self.threads == 1 {
            self.work();
            return;
        }
        thread::scope(|scope| {
            for _ in 0..self.threads {
                scope.spawn(|| self.work());
            }
        });
    }

    fn work(&self) {
        while let Ok(task) = self.receiver.recv() {
            let Task::Evaluate(key) = task else {
                break;
            };
            if !self.halted() {
                if let Err(error) = self.process(&key) {
                    self.abort(error);
                }
            }
            if self.queued.fetch_sub(1, Ordering::AcqRel) == 1 {
                for _ in 0..self.threads {
                    // The receiver lives as long as `self`.
                    let _ = self.sender.send(Task::Shutdown);
                }
            }
        }
    }

    fn halted(&self) -> bool {
        self.failed.load(Ordering::Acquire) || self.interrupt.is_interrupted()
    }

    fn abort(&self, error: EvalError<D::Key>) {
        warn!(%error, "aborting evaluation");
        let mut fatal = self.fatal.lock();
        if fatal.is_none() {
            *fatal = Some(error);
        }
        self.failed.store(true, Ordering::Release);
    }

    fn enqueue(&self, key: D::Key) {
        if self.stopping.load(Ordering::Acquire) {
            trace!(?key, "not enqueueing after error");
            return;
        }
        trace!(?key, "enqueue");
        self.queued.fetch_add(1, Ordering::AcqRel);
        let _ = self.sender.send(Task::Evaluate(key));
    }

    /// First scheduling of a node in this round.
    fn started(&self, key: &D::Key) {
        self.touched.insert(key.clone());
        self.progress.enqueueing(key);
        self.enqueue(key.clone());
    }

    /// Read `dep` on behalf of `parent`, scheduling it if needed.
    pub(crate) fn request(&self, parent: &D::Key, dep: &D::Key) -> DepRead<D> {
        if self.is_interrupted() {
            return DepRead::Interrupted;
        }
        let entry = self.graph.get_or_create(dep);
        let mut inner = entry.lock();
        match inner.state {
            NodeState::Done => {
                if let Some(value) = inner.value.clone() {
                    return DepRead::Value {
                        value,
                        changed_at: inner.changed_at,
                    };
                }
            }
            NodeState::Error => {
                if let Some(error) = inner.error.clone() {
                    return DepRead::Failed {
                        error,
                        changed_at: inner.changed_at,
                    };
                }
            }
            _ => {}
        }

        let started = inner.begin_evaluation();
        let registered = match inner.building.as_mut() {
            Some(building) => building.waiting_parents.insert(parent.clone()),
            None => false,
        };
        drop(inner);

        trace!(?parent, ?dep, registered, "waiting on dependency");
        if started {
            self.started(dep);
        }
        DepRead::Pending { registered }
    }

    fn process(&self, key: &D::Key) -> Result<(), EvalError<D::Key>> {
        let entry = self.graph.entry(key);
        loop {
            let mode = match entry.lock().building.as_ref() {
                Some(building) => building.mode,
                None => return Ok(()),
            };
            match mode {
                BuildMode::CheckDirty { next_group } => match self.check_dirty(key, &entry, next_group) {
                    DirtyCheck::Clean => {
                        self.complete_clean(key);
                        return Ok(());
                    }
                    DirtyCheck::Rebuild => continue,
                    DirtyCheck::Waiting => return Ok(()),
                },
                BuildMode::Rebuild => return self.rebuild(key, &entry),
            }
        }
    }

    /// Re-validate the old dependency groups of a dirty node, starting at
    /// group `from`.
    fn check_dirty(&self, key: &D::Key, entry: &NodeEntry<D>, from: usize) -> DirtyCheck {
        let mut index = from;
        loop {
            let (group, evaluated_at) = {
                let inner = entry.lock();
                (inner.deps.group(index).cloned(), inner.evaluated_at)
            };
            let Some(group) = group else {
                return DirtyCheck::Clean;
            };

            let mut changed = false;
            let mut registered = 0;
            let mut waiting = Vec::new();
            for dep in &group {
                match self.request(key, dep) {
                    DepRead::Value { changed_at, .. } | DepRead::Failed { changed_at, .. } => {
                        changed |= changed_at > evaluated_at;
                    }
                    DepRead::Pending { registered: newly } => {
                        registered += usize::from(newly);
                        waiting.push(dep.clone());
                    }
                    DepRead::Interrupted => return DirtyCheck::Waiting,
                }
            }

            let complete = waiting.is_empty();
            let mut inner = entry.lock();
            let Some(building) = inner.building.as_mut() else {
                return DirtyCheck::Waiting;
            };
            building.waiting_on.extend(waiting);
            building.outstanding += registered as isize;
            let ready = building.outstanding == 0;

            if changed {
                trace!(?key, group = index, "dependency changed, rebuilding");
                building.mode = BuildMode::Rebuild;
                if ready {
                    return DirtyCheck::Rebuild;
                }
            } else if complete {
                index += 1;
                continue;
            } else if ready {
                // Everything we registered on finished meanwhile.
                continue;
            } else {
                building.mode = BuildMode::CheckDirty { next_group: index };
            }
            building.scheduled = false;
            return DirtyCheck::Waiting;
        }
    }

    /// Run the node's function until it completes or has to wait.
    fn rebuild(&self, key: &D::Key, entry: &NodeEntry<D>) -> Result<(), EvalError<D::Key>> {
        let Some(function) = self.registry.get(key) else {
            return Err(EvalError::MissingFunction { key: key.clone() });
        };

        loop {
            let state = entry
                .lock()
                .building
                .as_mut()
                .and_then(|building| building.compute_state.take());
            let mut env = Environment::new(self, key, state);
            let result = panic::catch_unwind(AssertUnwindSafe(|| function.compute(key, &mut env)));
            let requests = env.into_requests();
            let result = match result {
                Ok(result) => result,
                Err(payload) => {
                    return Err(EvalError::FunctionPanicked {
                        key: key.clone(),
                        message: panic_message(payload.as_ref()),
                        payload: PanicPayload::new(payload),
                    })
                }
            };
            if self.is_interrupted() {
                return Ok(());
            }

            let mut inner = entry.lock();
            let Some(building) = inner.building.as_mut() else {
                return Ok(());
            };
            for group in requests.groups {
                building.temp_deps.push_group(group);
            }
            building.waiting_on.extend(requests.waiting_on);
            building.compute_state = requests.state;

            match result {
                Ok(Computed::Value(value)) => {
                    if requests.missing {
                        return Err(EvalError::ValueWithMissingDeps { key: key.clone() });
                    }
                    let deps = mem::take(&mut building.temp_deps);
                    drop(inner);
                    self.complete_value(key, deps, value);
                    return Ok(());
                }
                Err(error) => {
                    let info = match requests.surfaced.iter().find(|child| child.error() == Some(&error)) {
                        Some(child) => ErrorInfo::rethrown(key, error, child),
                        None => ErrorInfo::own(key.clone(), error),
                    };
                    let deps = mem::take(&mut building.temp_deps);
                    drop(inner);
                    self.complete_error(key, Some(deps), info);
                    return Ok(());
                }
                Ok(Computed::NeedsDeps) => {
                    if !requests.missing {
                        return Err(EvalError::NoProgress { key: key.clone() });
                    }
                    building.outstanding += requests.registered as isize;
                    if building.outstanding != 0 {
                        building.scheduled = false;
                        return Ok(());
                    }
                    if requests.registered == 0 {
                        // Nothing left to wait for: every missing dependency failed.
                        if requests.child_errors.is_empty() {
                            return Err(EvalError::NoProgress { key: key.clone() });
                        }
                        let info = ErrorInfo::from_child_errors(key, &requests.child_errors);
                        let deps = mem::take(&mut building.temp_deps);
                        drop(inner);
                        self.complete_error(key, Some(deps), info);
                        return Ok(());
                    }
                    trace!(?key, "dependencies finished during invocation, restarting");
                }
            }
        }
    }

    fn complete_value(&self, key: &D::Key, deps: GroupedDeps<D::Key>, value: D::Value) {
        self.graph.record_deps(key, deps);
        let completion = self.graph.set_done(key, Arc::new(value), self.version);
        debug!(?key, changed = completion.changed, "built");
        self.progress.evaluated(
            key,
            EvaluatedOutcome::Built {
                changed: completion.changed,
            },
        );
        self.signal(key, completion.waiting_parents);
    }

    fn complete_error(&self, key: &D::Key, deps: Option<GroupedDeps<D::Key>>, error: ErrorInfoOf<D>) {
        if let Some(deps) = deps {
            self.graph.record_deps(key, deps);
        }
        debug!(?key, %error, origin = ?error.origin(), "failed");
        let completion = self.graph.set_error(key, error, self.version);
        if !self.keep_going {
            self.stopping.store(true, Ordering::Release);
        }
        self.progress.evaluated(key, EvaluatedOutcome::Failed);
        self.signal(key, completion.waiting_parents);
    }

    fn complete_clean(&self, key: &D::Key) {
        let completion = self.graph.mark_clean(key, self.version);
        debug!(?key, "verified clean");
        self.progress.evaluated(key, EvaluatedOutcome::Clean);
        self.signal(key, completion.waiting_parents);
    }

    /// Tell `parents` that `child` completed, queueing those that have
    /// nothing left to wait for.
    fn signal(&self, child: &D::Key, parents: Vec<D::Key>) {
        for parent in parents {
            let Some(entry) = self.graph.get(&parent) else {
                continue;
            };
            let ready = match entry.lock().building.as_mut() {
                Some(building) => {
                    building.outstanding -= 1;
                    let ready = building.outstanding == 0 && !building.scheduled;
                    if ready {
                        building.scheduled = true;
                    }
                    ready
                }
                None => false,
            };
            trace!(?child, ?parent, ready, "signal");
            if ready {
                self.enqueue(parent);
            }
        }
    }

    fn is_complete(&self, key: &D::Key) -> bool {
        self.graph.get(key).is_some_and(|entry| entry.is_complete())
    }

    /// Incomplete dependencies `key` is waiting on.
    fn stuck_deps(&self, key: &D::Key) -> Vec<D::Key> {
        let Some(entry) = self.graph.get(key) else {
            return Vec::new();
        };
        let waiting: Vec<D::Key> = entry
            .lock()
            .building
            .as_ref()
            .map(|building| building.waiting_on.iter().cloned().collect())
            .unwrap_or_default();
        waiting.into_iter().filter(|dep| !self.is_complete(dep)).collect()
    }

    /// Everything `key` requested or waited on in this round.
    fn round_deps(&self, key: &D::Key) -> Vec<D::Key> {
        let Some(entry) = self.graph.get(key) else {
            return Vec::new();
        };
        let inner = entry.lock();
        match inner.building.as_ref() {
            Some(building) => {
                let mut deps: IndexSet<D::Key> = building.temp_deps.iter().cloned().collect();
                deps.extend(building.waiting_on.iter().cloned());
                deps.into_iter().collect()
            }
            None => Vec::new(),
        }
    }

    /// Fail every member of `cycles` with the cycles it belongs to.
    fn fail_cycle_members(&self, cycles: &[CycleInfo<D::Key>]) {
        let mut members: IndexMap<D::Key, Vec<CycleInfo<D::Key>>> = IndexMap::new();
        for found in cycles {
            let cycle = CycleInfo::new(Vec::new(), found.cycle().to_vec());
            for member in found.cycle() {
                let infos = members.entry(member.clone()).or_default();
                if !infos.contains(&cycle) {
                    infos.push(cycle.clone());
                }
            }
        }

        for (member, cycles) in members {
            let Some(entry) = self.graph.get(&member) else {
                continue;
            };
            let deps = {
                let mut inner = entry.lock();
                match inner.building.as_mut() {
                    Some(building) if building.mode == BuildMode::Rebuild => Some(mem::take(&mut building.temp_deps)),
                    Some(_) => None,
                    None => continue,
                }
            };
            warn!(key = ?member, cycles = cycles.len(), "dependency cycle");
            self.complete_error(&member, deps, ErrorInfo::from_cycles(cycles));
        }
    }

    /// Error reported for a root the round never completed: the first failed
    /// node found below it, seen from the root.
    fn bubble(&self, root: &D::Key) -> Option<ErrorInfoOf<D>> {
        let mut visited = HashSet::new();
        let mut stack = vec![vec![root.clone()]];
        while let Some(chain) = stack.pop() {
            let Some(key) = chain.last() else {
                continue;
            };
            if !visited.insert(key.clone()) {
                continue;
            }
            for dep in self.round_deps(key) {
                if let Some(child) = self.graph.error_of(&dep) {
                    return Some(ErrorInfo::bubbled(&chain, &child));
                }
                if !self.is_complete(&dep) {
                    let mut next = chain.clone();
                    next.push(dep);
                    stack.push(next);
                }
            }
        }
        None
    }

    fn collect(&self, roots: &[D::Key], found: Vec<CycleInfo<D::Key>>) -> EvaluationResult<D> {
        let mut values = IndexMap::new();
        let mut errors = IndexMap::new();
        for root in roots {
            let Some(entry) = self.graph.get(root) else {
                continue;
            };
            let (state, value, error) = {
                let inner = entry.lock();
                (inner.state, inner.value.clone(), inner.error.clone())
            };
            match (state, value, error) {
                (NodeState::Done, Some(value), _) => {
                    values.insert(root.clone(), value);
                }
                (NodeState::Error, _, Some(error)) => {
                    errors.insert(root.clone(), error);
                }
                _ => {
                    if let Some(error) = self.bubble(root) {
                        errors.insert(root.clone(), error);
                    }
                }
            }
        }

        let mut cycles: IndexSet<CycleInfo<D::Key>> = found.into_iter().collect();
        for error in errors.values() {
            cycles.extend(error.cycles().iter().cloned());
        }
        EvaluationResult::new(
            roots.to_vec(),
            values,
            errors,
            cycles.into_iter().collect(),
            self.version,
        )
    }

    /// Roll back every node this round started but did not complete.
    fn abandon_unfinished(&self) {
        let mut abandoned = 0usize;
        for key in self.touched.iter() {
            if let Some(entry) = self.graph.get(key.key()) {
                if entry.lock().abandon_evaluation() {
                    abandoned += 1;
                }
            }
        }
        if abandoned > 0 {
            debug!(abandoned, "rolled back unfinished nodes");
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::eval::NullProgress;
    use crate::testing::{TestDomain, TestError, TestFunction, TestKey, TestValue};

    fn run(
        graph: &InMemoryGraph<TestDomain>,
        registry: &FunctionRegistry<TestDomain>,
        roots: &[TestKey],
        options: EvaluationOptions,
    ) -> Result<EvaluationResult<TestDomain>, EvalError<TestKey>> {
        let interrupt = InterruptHandle::new();
        ParallelEvaluator::new(graph, registry, &NullProgress, &interrupt, Version::MINIMUM, &options)
            .evaluate(roots)
    }

    fn chain_registry() -> FunctionRegistry<TestDomain> {
        FunctionRegistry::<TestDomain>::new()
            .register_fn(TestFunction::Input, |key, _env| {
                Ok(Computed::Value(TestValue(format!("{key:?}"))))
            })
            .register_fn(TestFunction::Node, |key, env| {
                let TestKey::Node(name) = key else {
                    unreachable!()
                };
                let Some(input) = env.get_value(&TestKey::input(name)) else {
                    return Ok(Computed::NeedsDeps);
                };
                Ok(Computed::Value(TestValue(format!("node of {}", input.0))))
            })
    }

    #[test]
    fn builds_dependencies_before_parents() {
        let graph = InMemoryGraph::new();
        let registry = chain_registry();
        let result = run(&graph, &registry, &[TestKey::node("a")], EvaluationOptions::new().with_threads(1)).unwrap();

        assert_eq!(
            result.get(&TestKey::node("a")).map(|v| v.0.as_str()),
            Some("node of Input(\"a\")")
        );
        assert_eq!(graph.direct_deps(&TestKey::node("a")), vec![TestKey::input("a")]);
        assert!(graph.reverse_deps(&TestKey::input("a")).contains(&TestKey::node("a")));
    }

    #[test]
    fn duplicate_roots_are_evaluated_once() {
        let graph = InMemoryGraph::new();
        let registry = chain_registry();
        let root = TestKey::node("a");
        let result = run(&graph, &registry, &[root.clone(), root.clone()], EvaluationOptions::new()).unwrap();
        assert_eq!(result.root_keys(), &[root]);
    }

    #[test]
    fn returning_a_value_with_missing_deps_is_fatal() {
        let graph = InMemoryGraph::new();
        let registry = chain_registry().register_fn(TestFunction::Node, |key, env| {
            let TestKey::Node(name) = key else {
                unreachable!()
            };
            env.get_value(&TestKey::input(name));
            Ok(Computed::Value(TestValue("eager".into())))
        });

        let err = run(&graph, &registry, &[TestKey::node("a")], EvaluationOptions::new()).unwrap_err();
        assert!(matches!(err, EvalError::ValueWithMissingDeps { .. }));
        assert_eq!(graph.state_of(&TestKey::node("a")), Some(NodeState::New));
    }

    #[test]
    fn needing_deps_without_missing_any_is_fatal() {
        let graph = InMemoryGraph::new();
        let registry = FunctionRegistry::<TestDomain>::new().register_fn(TestFunction::Node, |_key, _env| Ok(Computed::NeedsDeps));

        let err = run(&graph, &registry, &[TestKey::node("a")], EvaluationOptions::new()).unwrap_err();
        assert!(matches!(err, EvalError::NoProgress { .. }));
    }

    #[test]
    fn compute_state_survives_restarts() {
        let graph = InMemoryGraph::new();
        let invocations = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&invocations);
        let registry = chain_registry().register_fn(TestFunction::Node, move |key, env| {
            seen.fetch_add(1, Ordering::SeqCst);
            let TestKey::Node(name) = key else {
                unreachable!()
            };
            *env.compute_state::<usize>() += 1;
            if env.get_value(&TestKey::input(name)).is_none() {
                return Ok(Computed::NeedsDeps);
            }
            let runs = *env.compute_state::<usize>();
            Ok(Computed::Value(TestValue(format!("runs={runs}"))))
        });

        let result = run(&graph, &registry, &[TestKey::node("a")], EvaluationOptions::new().with_threads(1)).unwrap();
        assert_eq!(invocations.load(Ordering::SeqCst), 2);
        assert_eq!(result.get(&TestKey::node("a")).map(|v| v.0.as_str()), Some("runs=2"));
    }

    #[test]
    fn surfaced_errors_can_be_handled() {
        let graph = InMemoryGraph::new();
        let registry = FunctionRegistry::<TestDomain>::new()
            .register_fn(TestFunction::Input, |_key, _env| Err(TestError("no such file".into())))
            .register_fn(TestFunction::Node, |key, env| {
                let TestKey::Node(name) = key else {
                    unreachable!()
                };
                match env.get_value_or_throw(&TestKey::input(name), |_| true) {
                    Ok(Some(_)) => Ok(Computed::Value(TestValue("found".into()))),
                    Ok(None) => Ok(Computed::NeedsDeps),
                    Err(_) => Ok(Computed::Value(TestValue("fallback".into()))),
                }
            });

        let options = EvaluationOptions::new().keep_going(true);
        let result = run(&graph, &registry, &[TestKey::node("a")], options).unwrap();
        assert_eq!(result.get(&TestKey::node("a")).map(|v| v.0.as_str()), Some("fallback"));
        assert!(!result.has_error());
    }

    #[test]
    fn panics_keep_their_payload() {
        #[derive(Debug, PartialEq)]
        struct Code(u32);

        let graph = InMemoryGraph::new();
        let registry = FunctionRegistry::<TestDomain>::new()
            .register_fn(TestFunction::Node, |_key, _env| panic::panic_any(Code(3)));

        let err = run(&graph, &registry, &[TestKey::node("a")], EvaluationOptions::new().with_threads(1)).unwrap_err();
        match err {
            EvalError::FunctionPanicked { key, message, payload } => {
                assert_eq!(key, TestKey::node("a"));
                assert_eq!(message, "non-string panic payload");
                assert_eq!(payload.take().and_then(|p| p.downcast::<Code>().ok()).map(|c| *c), Some(Code(3)));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn panic_message_extracts_strings() {
        assert_eq!(panic_message(&"static"), "static");
        assert_eq!(panic_message(&String::from("owned")), "owned");
        assert_eq!(panic_message(&42u8), "non-string panic payload");
    }
}
