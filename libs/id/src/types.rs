//! Typed ID definitions for all orchestrator resources.
//!
//! Each ID type has a unique prefix that identifies the resource type.
//! IDs are ULID-based for sortability and uniqueness.

use crate::define_id;

// =============================================================================
// Job Model
// =============================================================================

define_id!(JobId, "job");
define_id!(TaskId, "task");

// =============================================================================
// Fleet
// =============================================================================

define_id!(AgentId, "agent");

// =============================================================================
// Requests
// =============================================================================

define_id!(RequestId, "req");

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_id_roundtrip() {
        let id = JobId::new();
        let s = id.to_string();
        let parsed: JobId = s.parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_job_id_prefix() {
        let id = JobId::new();
        let s = id.to_string();
        assert!(s.starts_with("job_"));
    }

    #[test]
    fn test_job_id_invalid_prefix() {
        let result: Result<JobId, _> = "task_01HV4Z2WQXKJNM8GPQY6VBKC3D".parse();
        assert!(result.is_err());
        assert!(matches!(
            result.unwrap_err(),
            crate::IdError::InvalidPrefix { .. }
        ));
    }

    #[test]
    fn test_job_id_missing_separator() {
        let result: Result<JobId, _> = "job01HV4Z2WQXKJNM8GPQY6VBKC3D".parse();
        assert!(result.is_err());
        assert!(matches!(
            result.unwrap_err(),
            crate::IdError::MissingSeparator
        ));
    }

    #[test]
    fn test_job_id_empty() {
        let result: Result<JobId, _> = "".parse();
        assert!(result.is_err());
        assert!(matches!(result.unwrap_err(), crate::IdError::Empty));
    }

    #[test]
    fn test_job_id_invalid_ulid() {
        let result: Result<JobId, _> = "job_invalid".parse();
        assert!(result.is_err());
        assert!(matches!(result.unwrap_err(), crate::IdError::InvalidUlid(_)));
    }

    #[test]
    fn test_task_id_json_roundtrip() {
        let id = TaskId::new();
        let json = serde_json::to_string(&id).unwrap();
        let parsed: TaskId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_task_id_sortable() {
        let id1 = TaskId::new();
        std::thread::sleep(std::time::Duration::from_millis(1));
        let id2 = TaskId::new();
        // ULIDs are time-ordered, so id1 < id2
        assert!(id1 < id2);
    }

    proptest::proptest! {
        /// Every ULID value survives the display/parse round trip under its
        /// prefix.
        #[test]
        fn prop_display_parse_roundtrip(value in proptest::prelude::any::<u128>()) {
            let id = TaskId::from_ulid(crate::Ulid::from(value));
            let parsed: TaskId = id.to_string().parse().unwrap();
            proptest::prop_assert_eq!(id, parsed);
        }
    }

    #[test]
    fn test_all_id_prefixes_unique() {
        // Ensure all prefixes are unique
        let prefixes = vec![
            JobId::PREFIX,
            TaskId::PREFIX,
            AgentId::PREFIX,
            RequestId::PREFIX,
        ];

        let unique: std::collections::HashSet<_> = prefixes.iter().collect();
        assert_eq!(prefixes.len(), unique.len(), "Duplicate ID prefixes found!");
    }
}
