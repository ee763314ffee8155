//! Functions and the registry that dispatches to them.
//!
//! A function computes the value of one key. It reads dependencies through
//! its [`Environment`]; when some of them are not available yet it returns
//! [`Computed::NeedsDeps`] and is invoked again, from scratch, once they
//! are. Functions therefore must be deterministic in the values they read
//! and must not keep local state between invocations other than through
//! [`Environment::compute_state`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::context::Environment;
use crate::graph::{Domain, FunctionOf, NodeKey};

/// Non-error outcome of one function invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Computed<V> {
    /// The node's value.
    Value(V),
    /// Some requested dependency is not available yet; invoke again later.
    NeedsDeps,
}

/// Result of one function invocation.
pub type ComputeResult<D> = Result<Computed<<D as Domain>::Value>, <D as Domain>::Error>;

/// Computation for every key of one function type.
pub trait SkyFunction<D: Domain>: Send + Sync {
    fn compute(&self, key: &D::Key, env: &mut Environment<'_, D>) -> ComputeResult<D>;
}

impl<D, F> SkyFunction<D> for F
where
    D: Domain,
    F: Fn(&D::Key, &mut Environment<'_, D>) -> ComputeResult<D> + Send + Sync,
{
    fn compute(&self, key: &D::Key, env: &mut Environment<'_, D>) -> ComputeResult<D> {
        self(key, env)
    }
}

/// Function types mapped to their functions. Built once, then read-only.
pub struct FunctionRegistry<D: Domain> {
    functions: HashMap<FunctionOf<D>, Arc<dyn SkyFunction<D>>>,
}

impl<D: Domain> FunctionRegistry<D> {
    pub fn new() -> Self {
        Self {
            functions: HashMap::new(),
        }
    }

    /// Register the function for `function`, replacing any previous one.
    #[must_use]
    pub fn register(mut self, function: FunctionOf<D>, implementation: impl SkyFunction<D> + 'static) -> Self {
        self.functions.insert(function, Arc::new(implementation));
        self
    }

    /// Register a closure. Same as [`register`](Self::register), but lets
    /// the compiler infer the closure's argument types.
    #[must_use]
    pub fn register_fn<F>(self, function: FunctionOf<D>, implementation: F) -> Self
    where
        F: Fn(&D::Key, &mut Environment<'_, D>) -> ComputeResult<D> + Send + Sync + 'static,
    {
        self.register(function, implementation)
    }

    /// The function computing `key`.
    pub fn get(&self, key: &D::Key) -> Option<&Arc<dyn SkyFunction<D>>> {
        self.functions.get(&key.function())
    }

    pub fn contains(&self, function: FunctionOf<D>) -> bool {
        self.functions.contains_key(&function)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

impl<D: Domain> Default for FunctionRegistry<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: Domain> fmt::Debug for FunctionRegistry<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.functions.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{TestDomain, TestFunction, TestKey, TestValue};

    struct Echo;

    impl SkyFunction<TestDomain> for Echo {
        fn compute(&self, key: &TestKey, _env: &mut Environment<'_, TestDomain>) -> ComputeResult<TestDomain> {
            Ok(Computed::Value(TestValue(format!("{key:?}"))))
        }
    }

    #[test]
    fn registry_dispatches_on_function_type() {
        let registry = FunctionRegistry::<TestDomain>::new()
            .register(TestFunction::Node, Echo)
            .register_fn(TestFunction::Input, |_key, _env| Ok(Computed::NeedsDeps));

        assert_eq!(registry.len(), 2);
        assert!(registry.get(&TestKey::node("a")).is_some());
        assert!(registry.contains(TestFunction::Input));
    }

    #[test]
    fn missing_function_type_is_none() {
        let registry = FunctionRegistry::<TestDomain>::new().register(TestFunction::Node, Echo);
        assert!(registry.get(&TestKey::input("a")).is_none());
        assert!(!registry.is_empty());
    }
}
