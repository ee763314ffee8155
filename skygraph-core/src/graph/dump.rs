//! Read-only snapshot of the graph for debugging.

use serde::Serialize;

use super::key::{Domain, NodeKey};
use super::node::NodeState;
use super::store::InMemoryGraph;
use super::version::Version;

/// One node as seen at capture time.
#[derive(Debug, Clone, Serialize)]
pub struct NodeDump<K> {
    pub key: K,
    pub state: NodeState,
    pub changed_at: Version,
    pub evaluated_at: Version,
    pub deps: Vec<Vec<K>>,
    pub rdeps: Vec<K>,
    pub value: Option<String>,
    pub error: Option<String>,
}

/// Every node of a graph, ordered by the debug rendering of its key.
#[derive(Debug, Clone, Serialize)]
pub struct GraphDump<K> {
    pub nodes: Vec<NodeDump<K>>,
}

impl<K: NodeKey> GraphDump<K> {
    pub fn capture<D>(graph: &InMemoryGraph<D>) -> Self
    where
        D: Domain<Key = K>,
    {
        let mut nodes: Vec<NodeDump<K>> = graph
            .entries()
            .into_iter()
            .map(|entry| {
                let inner = entry.lock();
                let mut rdeps: Vec<K> = inner.rdeps.iter().cloned().collect();
                rdeps.sort_by_cached_key(|key| format!("{key:?}"));
                NodeDump {
                    key: entry.key().clone(),
                    state: inner.state,
                    changed_at: inner.changed_at,
                    evaluated_at: inner.evaluated_at,
                    deps: inner.deps.groups().iter().map(|g| g.to_vec()).collect(),
                    rdeps,
                    value: inner.value.as_ref().map(|value| format!("{value:?}")),
                    error: inner.error.as_ref().map(ToString::to_string),
                }
            })
            .collect();
        nodes.sort_by_cached_key(|node| format!("{:?}", node.key));
        Self { nodes }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{GroupedDeps, VersionCounter};
    use crate::testing::{value, TestDomain, TestKey};

    #[test]
    fn dump_lists_nodes_with_edges() {
        let graph = InMemoryGraph::<TestDomain>::new();
        let version = VersionCounter::new().advance();
        let parent = TestKey::node("parent");
        let child = TestKey::node("child");
        graph.get_or_create(&parent);
        graph.get_or_create(&child);
        graph.set_done(&child, value("c"), version);
        let mut deps = GroupedDeps::new();
        deps.push_group([child.clone()]);
        graph.record_deps(&parent, deps);

        let dump = GraphDump::capture(&graph);
        assert_eq!(dump.nodes.len(), 2);
        assert_eq!(dump.nodes[0].key, child);
        assert_eq!(dump.nodes[0].rdeps, vec![parent.clone()]);
        assert_eq!(dump.nodes[1].deps, vec![vec![child]]);

        let json = dump.to_json().unwrap();
        assert!(json.contains("\"state\": \"Done\""));
        assert!(json.contains("\"Node\": \"parent\""));
    }
}
