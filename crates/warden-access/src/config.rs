//! Reachability configuration.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AccessConfig {
    /// Node expansions allowed per traversal before giving up.
    pub max_nodes: usize,
    /// Wall-clock limit per traversal.
    pub timeout: Duration,
    /// Extra traversals attempted when a write lands mid-traversal.
    pub snapshot_retries: u32,
    pub cache_enabled: bool,
    /// Visible-set cache entries kept before eviction.
    pub cache_capacity: usize,
    /// Owner-chain steps walked when computing inherited trash.
    pub max_ancestor_depth: usize,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            max_nodes: 100_000,
            timeout: Duration::from_secs(5),
            snapshot_retries: 3,
            cache_enabled: true,
            cache_capacity: 10_000,
            max_ancestor_depth: 64,
        }
    }
}
