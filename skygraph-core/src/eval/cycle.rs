//! Cycle detection and reporting.
//!
//! Functions never block, so a dependency cycle does not deadlock a thread:
//! it shows up as a set of nodes that are all waiting on each other once the
//! work queue has drained. The evaluator then walks the "waiting on" edges
//! from every unfinished root with an explicit stack. Reaching a key that is
//! already on the stack closes a cycle; the keys before it form the path
//! that led into the cycle.

use std::collections::HashSet;
use std::fmt::{Debug, Write as _};
use std::hash::Hash;

use indexmap::IndexSet;
use serde::Serialize;

/// A dependency cycle, as seen from some entry point.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct CycleInfo<K> {
    path_to_cycle: Vec<K>,
    cycle: Vec<K>,
}

impl<K: Clone + PartialEq> CycleInfo<K> {
    /// Create a cycle reached through `path_to_cycle`.
    pub fn new(path_to_cycle: Vec<K>, cycle: Vec<K>) -> Self {
        Self {
            path_to_cycle,
            cycle,
        }
    }

    /// The cycle members in traversal order.
    pub fn cycle(&self) -> &[K] {
        &self.cycle
    }

    /// Keys leading from an entry point into the cycle.
    pub fn path_to_cycle(&self) -> &[K] {
        &self.path_to_cycle
    }

    /// Whether `key` is a member of the cycle itself.
    pub fn is_member(&self, key: &K) -> bool {
        self.cycle.contains(key)
    }

    /// The same cycle seen from a dependent of the current entry point.
    pub(crate) fn entered_from(&self, key: &K) -> Self {
        let mut path_to_cycle = Vec::with_capacity(self.path_to_cycle.len() + 1);
        path_to_cycle.push(key.clone());
        path_to_cycle.extend(self.path_to_cycle.iter().cloned());
        Self {
            path_to_cycle,
            cycle: self.cycle.clone(),
        }
    }
}

/// Walk `waiting_on` edges from `roots` and collect every cycle closed by a
/// back edge.
///
/// Each node is expanded at most once across all roots, so the walk is
/// linear in the number of stuck nodes and edges.
pub(crate) fn find_cycles<K, F>(roots: &[K], mut waiting_on: F) -> Vec<CycleInfo<K>>
where
    K: Clone + Eq + Hash,
    F: FnMut(&K) -> Vec<K>,
{
    let mut found = Vec::new();
    let mut visited: HashSet<K> = HashSet::new();

    for root in roots {
        if !visited.insert(root.clone()) {
            continue;
        }

        let mut stack: IndexSet<K> = IndexSet::new();
        let mut frames: Vec<(Vec<K>, usize)> = Vec::new();
        stack.insert(root.clone());
        frames.push((waiting_on(root), 0));

        while let Some((children, next)) = frames.last_mut() {
            if *next >= children.len() {
                frames.pop();
                stack.pop();
                continue;
            }
            let child = children[*next].clone();
            *next += 1;

            if let Some(position) = stack.get_index_of(&child) {
                let path = stack.iter().take(position).cloned().collect();
                let cycle = stack.iter().skip(position).cloned().collect();
                found.push(CycleInfo::new(path, cycle));
                continue;
            }
            if !visited.insert(child.clone()) {
                continue;
            }

            let grandchildren = waiting_on(&child);
            stack.insert(child);
            frames.push((grandchildren, 0));
        }
    }

    found
}

/// Turns a cycle into a human readable explanation for one kind of node.
///
/// Returning `None` defers to the next describer.
pub trait CycleDescriber<K>: Send + Sync {
    fn describe(&self, cycle: &CycleInfo<K>) -> Option<String>;
}

impl<K, F> CycleDescriber<K> for F
where
    F: Fn(&CycleInfo<K>) -> Option<String> + Send + Sync,
{
    fn describe(&self, cycle: &CycleInfo<K>) -> Option<String> {
        self(cycle)
    }
}

/// Ordered list of describers with a generic fallback.
pub struct CycleReporter<K> {
    describers: Vec<Box<dyn CycleDescriber<K>>>,
}

impl<K: Debug + Clone + PartialEq> CycleReporter<K> {
    /// A reporter that only knows the generic format.
    pub fn new() -> Self {
        Self {
            describers: Vec::new(),
        }
    }

    /// Add a describer. Describers are consulted in registration order.
    #[must_use]
    pub fn with_describer(mut self, describer: impl CycleDescriber<K> + 'static) -> Self {
        self.describers.push(Box::new(describer));
        self
    }

    /// Describe one cycle.
    pub fn report(&self, cycle: &CycleInfo<K>) -> String {
        self.describers
            .iter()
            .find_map(|describer| describer.describe(cycle))
            .unwrap_or_else(|| Self::generic(cycle))
    }

    /// Generic rendering:
    ///
    /// ```text
    /// cycle in dependency graph:
    ///     Root
    /// .-> A
    /// |   B
    /// `-- A
    /// ```
    pub fn generic(cycle: &CycleInfo<K>) -> String {
        let mut out = String::from("cycle in dependency graph:\n");
        for key in cycle.path_to_cycle() {
            let _ = writeln!(out, "    {key:?}");
        }
        let members = cycle.cycle();
        for (index, key) in members.iter().enumerate() {
            let marker = if index == 0 { ".-> " } else { "|   " };
            let _ = writeln!(out, "{marker}{key:?}");
        }
        if let Some(first) = members.first() {
            let _ = writeln!(out, "`-- {first:?}");
        }
        out
    }
}

impl<K: Debug + Clone + PartialEq> Default for CycleReporter<K> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn edges(pairs: &[(&'static str, &'static str)]) -> HashMap<&'static str, Vec<&'static str>> {
        let mut map: HashMap<&'static str, Vec<&'static str>> = HashMap::new();
        for (from, to) in pairs {
            map.entry(*from).or_default().push(*to);
        }
        map
    }

    #[test]
    fn finds_three_node_cycle_in_traversal_order() {
        let graph = edges(&[("a", "b"), ("b", "c"), ("c", "a")]);
        let cycles = find_cycles(&["a"], |k| graph.get(k).cloned().unwrap_or_default());

        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].cycle(), &["a", "b", "c"]);
        assert!(cycles[0].path_to_cycle().is_empty());
    }

    #[test]
    fn records_path_into_cycle() {
        let graph = edges(&[("root", "mid"), ("mid", "x"), ("x", "y"), ("y", "x")]);
        let cycles = find_cycles(&["root"], |k| graph.get(k).cloned().unwrap_or_default());

        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].path_to_cycle(), &["root", "mid"]);
        assert_eq!(cycles[0].cycle(), &["x", "y"]);
    }

    #[test]
    fn self_edge_is_a_cycle() {
        let graph = edges(&[("a", "a")]);
        let cycles = find_cycles(&["a"], |k| graph.get(k).cloned().unwrap_or_default());
        assert_eq!(cycles, vec![CycleInfo::new(vec![], vec!["a"])]);
    }

    #[test]
    fn acyclic_graph_has_no_cycles() {
        let graph = edges(&[("a", "b"), ("a", "c"), ("b", "c")]);
        let cycles = find_cycles(&["a"], |k| graph.get(k).cloned().unwrap_or_default());
        assert!(cycles.is_empty());
    }

    #[test]
    fn shared_nodes_are_expanded_once() {
        let graph = edges(&[("a", "b"), ("c", "b"), ("b", "d"), ("d", "b")]);
        let mut expanded = Vec::new();
        let cycles = find_cycles(&["a", "c"], |k| {
            expanded.push(*k);
            graph.get(k).cloned().unwrap_or_default()
        });

        assert_eq!(cycles.len(), 1);
        assert_eq!(expanded.iter().filter(|k| **k == "b").count(), 1);
    }

    #[test]
    fn entered_from_prepends_to_path() {
        let info = CycleInfo::new(vec!["mid"], vec!["x", "y"]);
        let seen = info.entered_from(&"root");
        assert_eq!(seen.path_to_cycle(), &["root", "mid"]);
        assert_eq!(seen.cycle(), info.cycle());
    }

    #[test]
    fn reporter_prefers_describers_then_falls_back() {
        let reporter = CycleReporter::new().with_describer(|info: &CycleInfo<&'static str>| {
            (info.cycle().len() == 1).then(|| format!("{} depends on itself", info.cycle()[0]))
        });

        let own = CycleInfo::new(vec![], vec!["lib"]);
        assert_eq!(reporter.report(&own), "lib depends on itself");

        let generic = CycleInfo::new(vec!["root"], vec!["a", "b"]);
        assert_eq!(
            reporter.report(&generic),
            "cycle in dependency graph:\n    \"root\"\n.-> \"a\"\n|   \"b\"\n`-- \"a\"\n"
        );
    }
}
