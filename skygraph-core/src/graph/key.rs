//! Keys, values and the domain that binds them.
//!
//! A graph is instantiated for one [`Domain`]: the domain fixes the key type,
//! the value type and the declared error type that functions may return.
//! Keys are usually an enum whose variants are the function types and whose
//! payloads are the arguments.

use std::fmt::{Debug, Display};
use std::hash::Hash;

use serde::Serialize;

/// Identity of a unit of computation.
///
/// Two keys that compare equal denote the same node. Hashing and equality
/// must not depend on evaluation order or on any interior mutability.
pub trait NodeKey: Clone + Eq + Hash + Debug + Serialize + Send + Sync + 'static {
    /// Discriminator selecting the function that computes this key.
    type Function: Copy + Eq + Hash + Debug + Send + Sync + 'static;

    /// The function type of this key.
    fn function(&self) -> Self::Function;
}

/// The types a graph is built over.
pub trait Domain: Send + Sync + 'static {
    /// Node identity.
    type Key: NodeKey;

    /// Memoized result of a successful evaluation.
    ///
    /// Equality drives change pruning: a rebuilt node whose new value is
    /// equal to its old one does not count as changed.
    type Value: Clone + PartialEq + Debug + Send + Sync + 'static;

    /// Recoverable, per-key failure a function may return.
    type Error: Clone + PartialEq + Debug + Display + Send + Sync + 'static;
}

/// Function discriminator of a domain's keys.
pub type FunctionOf<D> = <<D as Domain>::Key as NodeKey>::Function;
