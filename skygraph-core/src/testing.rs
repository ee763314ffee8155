//! Small domain shared by the unit tests.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::graph::{Domain, NodeKey};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum TestKey {
    Node(String),
    Input(String),
}

impl TestKey {
    pub fn node(name: &str) -> Self {
        TestKey::Node(name.to_string())
    }

    pub fn input(name: &str) -> Self {
        TestKey::Input(name.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TestFunction {
    Node,
    Input,
}

impl NodeKey for TestKey {
    type Function = TestFunction;

    fn function(&self) -> TestFunction {
        match self {
            TestKey::Node(_) => TestFunction::Node,
            TestKey::Input(_) => TestFunction::Input,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestValue(pub String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestError(pub String);

impl fmt::Display for TestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub struct TestDomain;

impl Domain for TestDomain {
    type Key = TestKey;
    type Value = TestValue;
    type Error = TestError;
}

pub fn value(text: &str) -> Arc<TestValue> {
    Arc::new(TestValue(text.to_string()))
}
