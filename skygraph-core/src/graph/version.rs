//! Graph versions.
//!
//! Every evaluation round runs at a fresh [`Version`]. A node remembers the
//! version at which its value last changed and the version at which it was
//! last built or verified; comparing the two across an edge tells a dirty
//! node whether it has to rebuild.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// A point in the evaluation history of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version(u64);

impl Version {
    /// The version before any evaluation took place.
    pub const MINIMUM: Version = Version(0);

    /// Get the raw version number.
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Monotonic source of versions, owned by a session.
#[derive(Debug, Default)]
pub struct VersionCounter {
    current: AtomicU64,
}

impl VersionCounter {
    /// Create a counter positioned at [`Version::MINIMUM`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance to and return the next version.
    pub fn advance(&self) -> Version {
        Version(self.current.fetch_add(1, Ordering::AcqRel) + 1)
    }

    /// The most recently handed out version.
    pub fn current(&self) -> Version {
        Version(self.current.load(Ordering::Acquire))
    }
}
