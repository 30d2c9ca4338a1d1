//! Condition helpers shared by the Torrent and Replication controllers
//!
//! Conditions are a log of state transitions, not mutable flags: setting a
//! condition appends or updates the entry of the same type, and the object's
//! `phase` is a denormalized projection of the newest true condition.

use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};

/// Build a `True` condition with the given type, reason, and message.
pub fn new_condition(type_: &str, reason: &str, message: &str) -> Condition {
    Condition {
        type_: type_.to_string(),
        status: "True".to_string(),
        reason: reason.to_string(),
        message: message.to_string(),
        last_transition_time: Time(Utc::now()),
        observed_generation: None,
    }
}

/// Set a condition on the list, updating in place when an entry of the same
/// type exists. Returns true when the list changed.
///
/// `lastTransitionTime` is only bumped when the status actually flips, so
/// repeated reconciles settle into a stable status.
pub fn set_condition(conditions: &mut Vec<Condition>, condition: Condition) -> bool {
    if let Some(existing) = conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        let mut changed = false;
        if existing.status != condition.status {
            existing.status = condition.status;
            existing.last_transition_time = condition.last_transition_time;
            changed = true;
        }
        if existing.reason != condition.reason {
            existing.reason = condition.reason;
            changed = true;
        }
        if existing.message != condition.message {
            existing.message = condition.message;
            changed = true;
        }
        if existing.observed_generation != condition.observed_generation {
            existing.observed_generation = condition.observed_generation;
            changed = true;
        }
        changed
    } else {
        conditions.push(condition);
        true
    }
}

/// True when the list carries a condition of the given type with status "True".
pub fn is_condition_true(conditions: &[Condition], type_: &str) -> bool {
    conditions
        .iter()
        .any(|c| c.type_ == type_ && c.status == "True")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_appends_new_condition() {
        let mut conditions = Vec::new();
        let changed = set_condition(
            &mut conditions,
            new_condition("Pending", "Pending", "Waiting for Replication creations"),
        );
        assert!(changed);
        assert_eq!(conditions.len(), 1);
        assert!(is_condition_true(&conditions, "Pending"));
    }

    #[test]
    fn set_is_idempotent_for_same_condition() {
        let mut conditions = Vec::new();
        set_condition(&mut conditions, new_condition("Ready", "Ready", "done"));
        let changed = set_condition(&mut conditions, new_condition("Ready", "Ready", "done"));
        assert!(!changed);
        assert_eq!(conditions.len(), 1);
    }

    #[test]
    fn set_updates_message_in_place() {
        let mut conditions = Vec::new();
        set_condition(&mut conditions, new_condition("Ready", "Ready", "done"));
        let changed = set_condition(&mut conditions, new_condition("Ready", "Ready", "all done"));
        assert!(changed);
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].message, "all done");
    }

    #[test]
    fn transition_time_only_bumps_on_status_flip() {
        let mut conditions = Vec::new();
        set_condition(&mut conditions, new_condition("Ready", "Ready", "done"));
        let original = conditions[0].last_transition_time.clone();

        // Same status, different message: time untouched.
        set_condition(&mut conditions, new_condition("Ready", "Ready", "still done"));
        assert_eq!(conditions[0].last_transition_time, original);

        // Status flip: time bumped.
        let mut flipped = new_condition("Ready", "NotReady", "regressed");
        flipped.status = "False".to_string();
        set_condition(&mut conditions, flipped);
        assert_eq!(conditions[0].status, "False");
    }

    #[test]
    fn conditions_of_different_types_accumulate() {
        let mut conditions = Vec::new();
        set_condition(&mut conditions, new_condition("Pending", "Pending", "waiting"));
        set_condition(&mut conditions, new_condition("Replicating", "Replicating", "copying"));
        set_condition(&mut conditions, new_condition("Ready", "Ready", "done"));
        assert_eq!(conditions.len(), 3);
        assert!(is_condition_true(&conditions, "Pending"));
        assert!(is_condition_true(&conditions, "Ready"));
        assert!(!is_condition_true(&conditions, "Reclaiming"));
    }
}
