//! KD-tree spatial index over 128-d feature descriptors.

pub mod error;
pub mod kdtree;

pub use error::{IndexError, IndexResult};
pub use kdtree::{IndexNode, Neighbor, SpatialIndex, MAX_DEPTH};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Index build and search settings
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct IndexConfig {
    /// Levels that split on the highest-variance dimension before switching to round-robin
    pub variance_split_depth: usize,
    /// Node visit budget per query; `None` searches exactly
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none", default))]
    pub max_checks: Option<usize>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            variance_split_depth: 10,
            max_checks: None,
        }
    }
}

impl IndexConfig {
    /// Approximate search visiting at most `checks` nodes per query
    pub fn with_max_checks(mut self, checks: usize) -> Self {
        self.max_checks = Some(checks);
        self
    }
}
