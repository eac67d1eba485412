//! Status conditions shared by `Workspace` and `Run`

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const STATUS_TRUE: &str = "True";
pub const STATUS_FALSE: &str = "False";

/// Condition for a runq resource
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition
    #[serde(rename = "type")]
    pub condition_type: String,

    /// Status of the condition (True, False, or Unknown)
    pub status: String,

    /// Last time the condition transitioned (RFC3339 format)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,

    /// Reason for the condition's last transition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Human-readable message about the condition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Condition {
    pub fn new(condition_type: &str, status: bool, reason: &str, message: impl Into<String>) -> Self {
        Self {
            condition_type: condition_type.to_string(),
            status: if status { STATUS_TRUE } else { STATUS_FALSE }.to_string(),
            last_transition_time: None,
            reason: Some(reason.to_string()),
            message: Some(message.into()),
        }
    }

    pub fn is_true(&self) -> bool {
        self.status == STATUS_TRUE
    }

    pub fn reason(&self) -> &str {
        self.reason.as_deref().unwrap_or_default()
    }

    pub fn message(&self) -> &str {
        self.message.as_deref().unwrap_or_default()
    }
}

pub fn find<'a>(conditions: &'a [Condition], condition_type: &str) -> Option<&'a Condition> {
    conditions
        .iter()
        .find(|c| c.condition_type == condition_type)
}

pub fn is_true_for(conditions: &[Condition], condition_type: &str) -> bool {
    find(conditions, condition_type).is_some_and(Condition::is_true)
}

pub fn is_false_for(conditions: &[Condition], condition_type: &str) -> bool {
    find(conditions, condition_type).is_some_and(|c| c.status == STATUS_FALSE)
}

/// Insert or update a condition, returning whether anything changed.
///
/// `lastTransitionTime` only moves when the status flips; a reason or message
/// change on its own keeps the original timestamp.
pub fn set_condition(conditions: &mut Vec<Condition>, mut new: Condition) -> bool {
    match conditions
        .iter_mut()
        .find(|c| c.condition_type == new.condition_type)
    {
        Some(existing) => {
            if existing.status == new.status
                && existing.reason == new.reason
                && existing.message == new.message
            {
                return false;
            }
            if existing.status == new.status {
                new.last_transition_time = existing.last_transition_time.clone();
            } else {
                new.last_transition_time = Some(chrono::Utc::now().to_rfc3339());
            }
            *existing = new;
            true
        }
        None => {
            new.last_transition_time = Some(chrono::Utc::now().to_rfc3339());
            conditions.push(new);
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_condition_appends_missing_type() {
        let mut conditions = Vec::new();
        assert!(set_condition(
            &mut conditions,
            Condition::new("Healthy", true, "AllResourcesFound", "ok")
        ));
        assert_eq!(conditions.len(), 1);
        assert!(conditions[0].last_transition_time.is_some());
        assert!(is_true_for(&conditions, "Healthy"));
    }

    #[test]
    fn set_condition_is_noop_when_unchanged() {
        let mut conditions = vec![];
        set_condition(
            &mut conditions,
            Condition::new("Attachable", false, "Queued", "In workspace queue position 1"),
        );
        let before = conditions.clone();

        let changed = set_condition(
            &mut conditions,
            Condition::new("Attachable", false, "Queued", "In workspace queue position 1"),
        );

        assert!(!changed);
        assert_eq!(conditions, before);
    }

    #[test]
    fn set_condition_keeps_transition_time_on_message_change() {
        let mut conditions = vec![Condition {
            last_transition_time: Some("2020-01-01T00:00:00+00:00".to_string()),
            ..Condition::new("Attachable", false, "Queued", "In workspace queue position 2")
        }];

        let changed = set_condition(
            &mut conditions,
            Condition::new("Attachable", false, "Queued", "In workspace queue position 1"),
        );

        assert!(changed);
        assert_eq!(conditions[0].message(), "In workspace queue position 1");
        assert_eq!(
            conditions[0].last_transition_time.as_deref(),
            Some("2020-01-01T00:00:00+00:00")
        );
    }

    #[test]
    fn false_and_missing_are_distinct() {
        let conditions = vec![Condition::new("Healthy", false, "MissingResource", "gone")];
        assert!(is_false_for(&conditions, "Healthy"));
        assert!(!is_false_for(&conditions, "Ready"));
        assert!(!is_true_for(&conditions, "Ready"));
    }
}
