//! Unit tests for the condition model

#[cfg(test)]
mod tests {
    use crate::cluster::ClusterStatus;
    use crate::condition::*;
    use chrono::{Duration as ChronoDuration, Utc};
    use std::time::Duration;

    #[test]
    fn test_default_conditions_cover_every_type() {
        let conditions = default_conditions::<ClusterConditionType>();
        assert_eq!(conditions.len(), ClusterConditionType::ALL.len());
        for (condition, kind) in conditions.iter().zip(ClusterConditionType::ALL) {
            assert_eq!(condition.kind, *kind);
            assert_eq!(condition.status, ConditionStatus::NotSet);
            assert_eq!(condition.reason, DEFAULT_CONDITION_REASON);
        }
    }

    #[test]
    fn test_condition_type_codes() {
        assert_eq!(ClusterConditionType::Register.code(), 1);
        assert_eq!(ClusterConditionType::BootstrapAgent.code(), 8);
        assert_eq!(ClusterConditionType::Health.code(), 10);
        assert_eq!(NamespaceConditionType::Assigned.code(), 0);
        assert_eq!(ClusterConditionType::from_code(9), Some(ClusterConditionType::Delete));
        assert_eq!(ClusterConditionType::from_code(0), None);
    }

    #[test]
    fn test_condition_wire_format() {
        let condition = new_condition(ClusterConditionType::BootstrapAgent)(
            ConditionStatus::Success,
            "bootstrap agent created",
        );
        let value = serde_json::to_value(&condition).unwrap();
        assert_eq!(value["type"], 8);
        assert_eq!(value["status"], "Success");
        assert_eq!(value["reason"], "bootstrap agent created");
        assert!(value["lastUpdated"].is_string(), "lastUpdated should be RFC3339");
    }

    #[test]
    fn test_condition_rejects_unknown_type_code() {
        let raw = r#"{"type": 42, "status": "Success", "reason": "", "lastUpdated": "2024-05-01T10:00:00Z"}"#;
        let parsed = serde_json::from_str::<ClusterCondition>(raw);
        assert!(parsed.is_err(), "Unknown type codes must fail deserialization");
    }

    #[test]
    fn test_status_accepts_lowercase_alias() {
        let raw = r#"{"type": 9, "status": "retry", "reason": "x", "lastUpdated": "2024-05-01T10:00:00Z"}"#;
        let parsed: ClusterCondition = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.status, ConditionStatus::Retry);
    }

    #[test]
    fn test_set_condition_replaces_by_type() {
        let mut status = ClusterStatus::default();
        status.set_condition(ClusterCondition::new(
            ClusterConditionType::Delete,
            ConditionStatus::Pending,
            "deleting",
        ));
        status.set_condition(ClusterCondition::new(
            ClusterConditionType::Health,
            ConditionStatus::Success,
            "healthy",
        ));
        status.set_condition(ClusterCondition::new(
            ClusterConditionType::Delete,
            ConditionStatus::Retry,
            "unable to delete cluster",
        ));

        let deletes = status
            .conditions
            .iter()
            .filter(|c| c.kind == ClusterConditionType::Delete)
            .count();
        assert_eq!(deletes, 1, "At most one condition per type");
        assert!(status.is_condition(ClusterConditionType::Delete, ConditionStatus::Retry));
        assert_eq!(
            status.condition_reason(ClusterConditionType::Delete),
            Some("unable to delete cluster")
        );
        assert_eq!(status.conditions.len(), 2);
    }

    #[test]
    fn test_cooled_down_requires_retry() {
        let mut status = ClusterStatus::default();
        let mut pending = ClusterCondition::new(
            ClusterConditionType::Delete,
            ConditionStatus::Pending,
            "deleting",
        );
        pending.last_updated = Utc::now() - ChronoDuration::hours(1);
        status.set_condition(pending);

        assert!(!status.is_cooled_down(ClusterConditionType::Delete, Duration::from_secs(60)));
        assert!(!status.is_cooled_down(ClusterConditionType::Health, Duration::from_secs(60)));
    }

    #[test]
    fn test_cooled_down_after_duration_elapsed() {
        let mut status = ClusterStatus::default();
        status.set_condition(ClusterCondition::new(
            ClusterConditionType::Delete,
            ConditionStatus::Retry,
            "rpc failed",
        ));
        let updated = status.conditions[0].last_updated;
        let cooldown = Duration::from_secs(60);

        assert!(!status.is_cooled_down_at(ClusterConditionType::Delete, cooldown, updated));
        assert!(!status.is_cooled_down_at(
            ClusterConditionType::Delete,
            cooldown,
            updated + ChronoDuration::seconds(10)
        ));
        assert!(!status.is_cooled_down_at(
            ClusterConditionType::Delete,
            cooldown,
            updated + ChronoDuration::seconds(60)
        ));
        assert!(status.is_cooled_down_at(
            ClusterConditionType::Delete,
            cooldown,
            updated + ChronoDuration::seconds(61)
        ));
    }

    #[test]
    fn test_cooled_down_ignores_future_timestamp() {
        let mut status = ClusterStatus::default();
        let mut retry = ClusterCondition::new(
            ClusterConditionType::BootstrapAgent,
            ConditionStatus::Retry,
            "clock skew",
        );
        retry.last_updated = Utc::now() + ChronoDuration::minutes(5);
        status.set_condition(retry);
        assert!(!status.is_cooled_down(ClusterConditionType::BootstrapAgent, Duration::ZERO));
    }
}
