//! Scripted graphs for integration tests.
//!
//! Every node of a test graph is described by a [`Script`]. A single
//! registered function looks the script up and runs it, counting calls per
//! key so tests can tell which functions actually ran.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Once};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use skygraph_core::eval::{ComputeResult, EvaluationProgress};
use skygraph_core::{
    BuildDriver, Computed, Domain, Environment, EvalError, EvaluationOptions, EvaluationResult, FunctionRegistry,
    NodeKey,
};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum Key {
    /// Computed by its script.
    Node(String),
    /// Only ever injected; no function is registered for inputs.
    Input(String),
}

pub fn node(name: &str) -> Key {
    Key::Node(name.to_string())
}

pub fn input(name: &str) -> Key {
    Key::Input(name.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Function {
    Scripted,
    Input,
}

impl NodeKey for Key {
    type Function = Function;

    fn function(&self) -> Function {
        match self {
            Key::Node(_) => Function::Scripted,
            Key::Input(_) => Function::Input,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct TestError(pub String);

pub struct TestDomain;

impl Domain for TestDomain {
    type Key = Key;
    type Value = String;
    type Error = TestError;
}

/// What a node does when evaluated.
#[derive(Debug, Clone)]
pub enum Script {
    /// Produce a fixed value.
    Constant(String),
    /// Read all dependencies as one group and join their values with `+`.
    Concat(Vec<Key>),
    /// Read dependencies one group at a time, stopping at the first missing
    /// one, then join like `Concat`.
    Sequential(Vec<Key>),
    /// Fail with the given message.
    Fail(String),
    /// Read the dependency; on a declared error return the fallback.
    Catch(Key, String),
    /// Read the dependency and return its declared error as our own.
    Rethrow(Key),
    /// Panic.
    Panic,
}

pub fn constant(value: &str) -> Script {
    Script::Constant(value.to_string())
}

pub fn concat(deps: &[Key]) -> Script {
    Script::Concat(deps.to_vec())
}

pub fn fail(message: &str) -> Script {
    Script::Fail(message.to_string())
}

type Hook = Arc<dyn Fn(&Key) + Send + Sync>;

#[derive(Default)]
struct Shared {
    scripts: RwLock<HashMap<Key, Script>>,
    calls: Mutex<HashMap<Key, usize>>,
    hook: RwLock<Option<Hook>>,
}

pub struct GraphTester {
    shared: Arc<Shared>,
    pub driver: BuildDriver<TestDomain>,
}

impl GraphTester {
    pub fn new() -> Self {
        init_tracing();
        let shared = Arc::new(Shared::default());
        let scripts = Arc::clone(&shared);
        let registry = FunctionRegistry::<TestDomain>::new()
            .register_fn(Function::Scripted, move |key, env| run(&scripts, key, env));
        Self {
            shared,
            driver: BuildDriver::new(registry),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn EvaluationProgress<Key>>) -> Self {
        self.driver = self.driver.with_progress(progress);
        self
    }

    pub fn set(&self, key: Key, script: Script) -> &Self {
        self.shared.scripts.write().insert(key, script);
        self
    }

    /// Replace a script and invalidate its node.
    pub fn change(&mut self, key: Key, script: Script) {
        self.set(key.clone(), script);
        self.driver.invalidate([key]);
    }

    /// Run `hook` at the start of every function call.
    pub fn on_call(&self, hook: impl Fn(&Key) + Send + Sync + 'static) {
        *self.shared.hook.write() = Some(Arc::new(hook));
    }

    pub fn calls(&self, key: &Key) -> usize {
        self.shared.calls.lock().get(key).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.shared.calls.lock().values().sum()
    }

    pub fn reset_calls(&self) {
        self.shared.calls.lock().clear();
    }

    pub fn eval(
        &mut self,
        roots: &[Key],
        options: &EvaluationOptions,
    ) -> Result<EvaluationResult<TestDomain>, EvalError<Key>> {
        self.driver.evaluate(roots.iter().cloned(), options)
    }

    /// Keep-going evaluation that must not fail as a whole.
    pub fn eval_keep_going(&mut self, roots: &[Key]) -> EvaluationResult<TestDomain> {
        match self.eval(roots, &EvaluationOptions::new().keep_going(true)) {
            Ok(result) => result,
            Err(err) => panic!("round failed: {err}"),
        }
    }
}

fn run(shared: &Shared, key: &Key, env: &mut Environment<'_, TestDomain>) -> ComputeResult<TestDomain> {
    *shared.calls.lock().entry(key.clone()).or_default() += 1;
    let hook = shared.hook.read().clone();
    if let Some(hook) = hook {
        hook(key);
    }

    let script = shared.scripts.read().get(key).cloned();
    let Some(script) = script else {
        panic!("no script for {key:?}");
    };

    match script {
        Script::Constant(value) => Ok(Computed::Value(value)),
        Script::Concat(deps) => {
            let values = env.get_values(&deps);
            if env.values_missing() {
                return Ok(Computed::NeedsDeps);
            }
            let parts: Vec<String> = values.values().flatten().map(|v| v.to_string()).collect();
            Ok(Computed::Value(parts.join("+")))
        }
        Script::Sequential(deps) => {
            let mut parts = Vec::new();
            for dep in &deps {
                match env.get_value(dep) {
                    Some(value) => parts.push(value.to_string()),
                    None => return Ok(Computed::NeedsDeps),
                }
            }
            Ok(Computed::Value(parts.join("+")))
        }
        Script::Fail(message) => Err(TestError(message)),
        Script::Catch(dep, fallback) => match env.get_value_or_throw(&dep, |_| true) {
            Ok(Some(value)) => Ok(Computed::Value(value.to_string())),
            Ok(None) => Ok(Computed::NeedsDeps),
            Err(_) => Ok(Computed::Value(fallback)),
        },
        Script::Rethrow(dep) => match env.get_value_or_throw(&dep, |_| true) {
            Ok(Some(value)) => Ok(Computed::Value(value.to_string())),
            Ok(None) => Ok(Computed::NeedsDeps),
            Err(err) => Err(err),
        },
        Script::Panic => panic!("scripted panic in {key:?}"),
    }
}

static TRACING_INIT: Once = Once::new();

/// Route engine logs to the test output. Enable with `RUST_LOG=skygraph_core=debug`.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::{fmt, EnvFilter};

        if std::env::var("RUST_LOG").is_ok() {
            let _ = fmt()
                .with_env_filter(EnvFilter::from_default_env())
                .with_test_writer()
                .try_init();
        }
    });
}
