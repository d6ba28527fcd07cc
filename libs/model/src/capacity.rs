//! Capacity groups: named quota/priority classes for applications.

use serde::{Deserialize, Serialize};

/// Name of the capacity group used when a descriptor does not pick one.
pub const DEFAULT_CAPACITY_GROUP: &str = "default";

/// Per-application sizing and priority bounds.
///
/// Read-only from the resolver's perspective; the harness supplies it via
/// `CapacityGroupService`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityGroup {
    pub name: String,
    pub min_size: u32,
    pub desired_size: u32,
    pub max_size: u32,
    /// Lower value wins contention for fleet capacity.
    pub priority: u32,
}

impl Default for CapacityGroup {
    fn default() -> Self {
        Self {
            name: DEFAULT_CAPACITY_GROUP.to_string(),
            min_size: 0,
            desired_size: 0,
            max_size: u32::MAX,
            priority: 100,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_group_is_unbounded() {
        let group = CapacityGroup::default();
        assert_eq!(group.name, DEFAULT_CAPACITY_GROUP);
        assert_eq!(group.max_size, u32::MAX);
    }
}
