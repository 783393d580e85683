//! The transition rule table.
//!
//! Who may move a corrective action between which states is expressed as a
//! single lookup structure keyed by (stored status, event), not as cascading
//! conditionals scattered through handlers. The engine and the API both
//! consult this table, so it is the one source of truth for gating.
//!
//! The `overdue` label is not a row here: it is a read-time derivation over
//! `pending`/`in_progress` (see [`crate::CorrectiveAction::display_status`]),
//! so "start from overdue" is simply the `pending -> in_progress` row.

use serde::Serialize;

use crate::actor::{ActorContext, Role};
use crate::model::{CorrectiveAction, Status};

/// Lifecycle events an actor can issue against a corrective action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Start,
    Complete,
    Verify,
    Reject,
    Edit,
}

impl EventKind {
    /// All events, for transition-completeness sweeps.
    pub const ALL: [EventKind; 5] = [
        EventKind::Start,
        EventKind::Complete,
        EventKind::Verify,
        EventKind::Reject,
        EventKind::Edit,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Start => "start",
            EventKind::Complete => "complete",
            EventKind::Verify => "verify",
            EventKind::Reject => "reject",
            EventKind::Edit => "edit",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who may trigger a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorGate {
    /// Only the action's assignee, whatever their role.
    Assignee,
    /// Any actor holding one of the listed roles.
    Roles(&'static [Role]),
}

/// One row of the transition table.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct TransitionRule {
    pub from: Status,
    pub event: EventKind,
    pub to: Status,
    pub gate: ActorGate,
}

impl TransitionRule {
    /// Whether `actor` passes this rule's gate for `action`.
    pub fn permits(&self, action: &CorrectiveAction, actor: &ActorContext) -> bool {
        match self.gate {
            ActorGate::Assignee => actor.actor_id == action.assignee_id,
            ActorGate::Roles(roles) => roles.contains(&actor.role),
        }
    }
}

/// Roles allowed to verify, reject, and edit.
const REVIEWER_ROLES: &[Role] = &[Role::Admin, Role::SafetyOfficer];

/// Roles allowed to create corrective actions. Creation is gated here even
/// though it is not a row in the table (there is no `from` state yet).
pub const ASSIGNER_ROLES: &[Role] = &[Role::Admin, Role::SafetyOfficer, Role::Manager];

const RULES: &[TransitionRule] = &[
    TransitionRule {
        from: Status::Pending,
        event: EventKind::Start,
        to: Status::InProgress,
        gate: ActorGate::Assignee,
    },
    TransitionRule {
        from: Status::InProgress,
        event: EventKind::Complete,
        to: Status::Completed,
        gate: ActorGate::Assignee,
    },
    TransitionRule {
        from: Status::Completed,
        event: EventKind::Verify,
        to: Status::Verified,
        gate: ActorGate::Roles(REVIEWER_ROLES),
    },
    TransitionRule {
        from: Status::Completed,
        event: EventKind::Reject,
        to: Status::InProgress,
        gate: ActorGate::Roles(REVIEWER_ROLES),
    },
    // Edits keep the status they find. The engine additionally refuses edits
    // on terminally closed actions (verified, or completed without a pending
    // verification step).
    TransitionRule {
        from: Status::Pending,
        event: EventKind::Edit,
        to: Status::Pending,
        gate: ActorGate::Roles(REVIEWER_ROLES),
    },
    TransitionRule {
        from: Status::InProgress,
        event: EventKind::Edit,
        to: Status::InProgress,
        gate: ActorGate::Roles(REVIEWER_ROLES),
    },
    TransitionRule {
        from: Status::Completed,
        event: EventKind::Edit,
        to: Status::Completed,
        gate: ActorGate::Roles(REVIEWER_ROLES),
    },
];

/// The full transition table, in declaration order.
pub fn rules() -> &'static [TransitionRule] {
    RULES
}

/// Look up the rule for a (status, event) pair. `None` means the transition
/// does not exist and must fail.
pub fn lookup(from: Status, event: EventKind) -> Option<&'static TransitionRule> {
    RULES.iter().find(|r| r.from == from && r.event == event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn action(status: Status) -> CorrectiveAction {
        CorrectiveAction {
            id: "ca-1".to_string(),
            incident_id: "inc-1".to_string(),
            description: "d".to_string(),
            action_type: "repair".to_string(),
            priority: crate::Priority::Medium,
            status,
            assignee_id: "u-worker".to_string(),
            assigner_id: "u-boss".to_string(),
            due_date: datetime!(2026-06-01 00:00 UTC),
            completion_notes: None,
            completed_at: None,
            verified_at: None,
            verified_by: None,
            verification_required: true,
            created_at: datetime!(2026-01-01 00:00 UTC),
            updated_at: datetime!(2026-01-01 00:00 UTC),
            version: 0,
        }
    }

    #[test]
    fn happy_path_rows_exist() {
        assert_eq!(
            lookup(Status::Pending, EventKind::Start).unwrap().to,
            Status::InProgress
        );
        assert_eq!(
            lookup(Status::InProgress, EventKind::Complete).unwrap().to,
            Status::Completed
        );
        assert_eq!(
            lookup(Status::Completed, EventKind::Verify).unwrap().to,
            Status::Verified
        );
        assert_eq!(
            lookup(Status::Completed, EventKind::Reject).unwrap().to,
            Status::InProgress
        );
    }

    #[test]
    fn no_rows_out_of_verified() {
        for event in EventKind::ALL {
            assert!(lookup(Status::Verified, event).is_none());
        }
    }

    #[test]
    fn start_is_assignee_only() {
        let a = action(Status::Pending);
        let rule = lookup(Status::Pending, EventKind::Start).unwrap();
        assert!(rule.permits(&a, &ActorContext::new("u-worker", Role::Employee)));
        // An admin who is not the assignee may not start on their behalf.
        assert!(!rule.permits(&a, &ActorContext::new("u-boss", Role::Admin)));
    }

    #[test]
    fn verify_is_reviewer_only() {
        let a = action(Status::Completed);
        let rule = lookup(Status::Completed, EventKind::Verify).unwrap();
        assert!(rule.permits(&a, &ActorContext::new("x", Role::Admin)));
        assert!(rule.permits(&a, &ActorContext::new("x", Role::SafetyOfficer)));
        assert!(!rule.permits(&a, &ActorContext::new("x", Role::Manager)));
        // The assignee cannot verify their own work.
        assert!(!rule.permits(&a, &ActorContext::new("u-worker", Role::Employee)));
    }

    #[test]
    fn edits_never_change_status() {
        for rule in rules().iter().filter(|r| r.event == EventKind::Edit) {
            assert_eq!(rule.from, rule.to);
        }
    }
}
