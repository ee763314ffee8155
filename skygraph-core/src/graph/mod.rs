//! Dependency Graph
//!
//! This module implements the memoization graph that the evaluator fills in
//! and the invalidator walks.
//!
//! # Overview
//!
//! The graph is a directed graph where:
//!
//! - Nodes are keyed computations, each holding a memoized value or error
//! - Edges are dependencies: if A read B while computing, there is an edge
//!   from A to B, and a reverse edge from B to A
//!
//! When an input changes, we traverse reverse edges to find all affected
//! nodes and mark them dirty. The next evaluation round then determines
//! which dirty nodes actually need to recompute.
//!
//! # Design Decisions
//!
//! 1. Entries live in a concurrent map keyed by the node key, and each entry
//!    has its own lock. There is no global lock, so workers evaluating
//!    unrelated nodes never contend.
//!
//! 2. Dependencies are recorded in request groups so a dirty node can
//!    re-check them in the order they were first needed.
//!
//! 3. We maintain both forward (dependencies) and reverse (dependents) edges
//!    to enable efficient traversal in both directions.

mod dump;
mod invalidator;
mod key;
mod node;
mod store;
mod version;

pub use dump::{GraphDump, NodeDump};
pub use invalidator::{InvalidationStats, Invalidator};
pub use key::{Domain, FunctionOf, NodeKey};
pub use node::{DepGroup, GroupedDeps, NodeEntry, NodeState};
pub(crate) use node::BuildMode;
pub use store::{Completion, InMemoryGraph};
pub use version::{Version, VersionCounter};
