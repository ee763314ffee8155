//! Skygraph Core
//!
//! This crate provides an incremental evaluation engine over a dependency
//! graph of keyed computations. It implements:
//!
//! - A concurrent, memoizing graph of nodes with forward and reverse edges
//! - A parallel evaluator that runs restartable functions on worker threads
//! - Change pruning, so dirty nodes only rebuild when an input they read
//!   really changed
//! - Cycle detection and per-key error propagation
//!
//! # Architecture
//!
//! The crate is organized into two modules:
//!
//! - `graph`: keys, versions, node entries, the graph store and invalidation
//! - `eval`: functions, the evaluation environment, the evaluator, error
//!   types and the build driver
//!
//! # Example
//!
//! ```rust,ignore
//! use skygraph_core::{BuildDriver, Computed, EvaluationOptions, FunctionRegistry};
//!
//! let registry = FunctionRegistry::<MyDomain>::new()
//!     .register_fn(MyFunction::File, |key, _env| Ok(Computed::Value(read(key)?)))
//!     .register_fn(MyFunction::Lines, |key, env| {
//!         let Some(text) = env.get_value(&key.file()) else {
//!             return Ok(Computed::NeedsDeps);
//!         };
//!         Ok(Computed::Value(count_lines(&text)))
//!     });
//!
//! let mut driver = BuildDriver::new(registry);
//! let result = driver.evaluate([MyKey::lines("src/lib.rs")], &EvaluationOptions::new())?;
//!
//! // The file changed: only what depends on it is checked again.
//! driver.invalidate([MyKey::file("src/lib.rs")]);
//! let result = driver.evaluate([MyKey::lines("src/lib.rs")], &EvaluationOptions::new())?;
//! ```

pub mod eval;
pub mod graph;

#[cfg(test)]
mod testing;

pub use eval::{
    BuildDriver, Computed, CycleInfo, CycleReporter, Environment, ErrorInfo, ErrorOrigin, EvalError,
    EvaluationOptions, EvaluationResult, EvaluatorSession, FunctionRegistry, InterruptHandle, SkyFunction,
};
pub use graph::{Domain, InMemoryGraph, NodeKey, NodeState, Version};
