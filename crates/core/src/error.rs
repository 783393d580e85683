//! The workflow error taxonomy.
//!
//! Every error that can cross the engine boundary carries a stable
//! machine-readable kind ([`WorkflowError::kind`]) plus a human-readable
//! message (`Display`). State errors are surfaced verbatim and never retried
//! by the engine; `VersionConflict` is the caller's cue to re-read and
//! resubmit; `IncidentCloseFailed` and `AuditAppendFailed` name the one side
//! effect that failed after the transition committed, so the caller knows
//! the command took effect.

use std::fmt;

use crate::model::Status;
use crate::rules::EventKind;

/// Errors that can occur while executing a workflow command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowError {
    /// Bad input shape, rejected before any state machinery runs.
    Validation { field: String, message: String },
    /// The referenced incident does not exist in the incident service.
    UnknownIncident { incident_id: String },
    /// The actor's identity or role does not pass the operation's gate.
    Forbidden { operation: String, actor_id: String },
    /// No rule exists for this (status, event) pair.
    InvalidTransition { status: Status, event: EventKind },
    /// `complete` was invoked on an already completed or verified action.
    AlreadyCompleted { action_id: String, status: Status },
    /// `verify` requires status = completed.
    NotReadyForVerification { action_id: String, status: Status },
    /// Evidence may not be added to a completed or verified action.
    ActionClosed { action_id: String, status: Status },
    /// An uploaded file failed the evidence acceptance policy.
    InvalidFile { file_name: String, reason: String },
    /// Optimistic-concurrency conflict: the stored version moved on. The
    /// caller must re-read, re-validate, and resubmit.
    VersionConflict {
        action_id: String,
        expected_version: i64,
    },
    /// No corrective action with this id.
    NotFound { action_id: String },
    /// The verify transition committed but the incident-close side effect
    /// failed. The action stays verified; only the close needs retrying.
    IncidentCloseFailed {
        incident_id: String,
        message: String,
    },
    /// The transition committed but appending its audit event failed. The
    /// state change took effect; only the audit record is missing.
    AuditAppendFailed { action_id: String, message: String },
    /// A storage backend failure (connection, serialization, ...).
    Storage { message: String },
}

impl WorkflowError {
    /// Stable machine-readable kind, used as the `error.kind` field at the
    /// API boundary. Never changes once published.
    pub fn kind(&self) -> &'static str {
        match self {
            WorkflowError::Validation { .. } => "validation",
            WorkflowError::UnknownIncident { .. } => "unknown_incident",
            WorkflowError::Forbidden { .. } => "forbidden",
            WorkflowError::InvalidTransition { .. } => "invalid_transition",
            WorkflowError::AlreadyCompleted { .. } => "already_completed",
            WorkflowError::NotReadyForVerification { .. } => "not_ready_for_verification",
            WorkflowError::ActionClosed { .. } => "action_closed",
            WorkflowError::InvalidFile { .. } => "invalid_file",
            WorkflowError::VersionConflict { .. } => "version_conflict",
            WorkflowError::NotFound { .. } => "not_found",
            WorkflowError::IncidentCloseFailed { .. } => "incident_close_failed",
            WorkflowError::AuditAppendFailed { .. } => "audit_append_failed",
            WorkflowError::Storage { .. } => "storage",
        }
    }

    fn validation(field: &str, message: impl Into<String>) -> Self {
        WorkflowError::Validation {
            field: field.to_string(),
            message: message.into(),
        }
    }

    /// Field-level validation error for a missing/blank required field.
    pub fn missing_field(field: &str) -> Self {
        Self::validation(field, "must not be empty")
    }
}

impl fmt::Display for WorkflowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowError::Validation { field, message } => {
                write!(f, "invalid field '{}': {}", field, message)
            }
            WorkflowError::UnknownIncident { incident_id } => {
                write!(f, "incident '{}' does not exist", incident_id)
            }
            WorkflowError::Forbidden { operation, actor_id } => {
                write!(f, "actor '{}' is not allowed to {}", actor_id, operation)
            }
            WorkflowError::InvalidTransition { status, event } => {
                write!(f, "cannot {} an action in status '{}'", event, status)
            }
            WorkflowError::AlreadyCompleted { action_id, status } => {
                write!(f, "action '{}' is already {}", action_id, status)
            }
            WorkflowError::NotReadyForVerification { action_id, status } => {
                write!(
                    f,
                    "action '{}' is '{}', only completed actions can be verified",
                    action_id, status
                )
            }
            WorkflowError::ActionClosed { action_id, status } => {
                write!(
                    f,
                    "action '{}' is {}; evidence can no longer be added",
                    action_id, status
                )
            }
            WorkflowError::InvalidFile { file_name, reason } => {
                write!(f, "file '{}' rejected: {}", file_name, reason)
            }
            WorkflowError::VersionConflict {
                action_id,
                expected_version,
            } => {
                write!(
                    f,
                    "version conflict on action '{}': expected version {}",
                    action_id, expected_version
                )
            }
            WorkflowError::NotFound { action_id } => {
                write!(f, "corrective action '{}' not found", action_id)
            }
            WorkflowError::IncidentCloseFailed {
                incident_id,
                message,
            } => {
                write!(
                    f,
                    "action verified, but closing incident '{}' failed: {}",
                    incident_id, message
                )
            }
            WorkflowError::AuditAppendFailed { action_id, message } => {
                write!(
                    f,
                    "action '{}' transition committed, but recording the audit event failed: {}",
                    action_id, message
                )
            }
            WorkflowError::Storage { message } => {
                write!(f, "storage error: {}", message)
            }
        }
    }
}

impl std::error::Error for WorkflowError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_distinct() {
        let errors = [
            WorkflowError::missing_field("description"),
            WorkflowError::UnknownIncident {
                incident_id: "inc-1".to_string(),
            },
            WorkflowError::Forbidden {
                operation: "verify".to_string(),
                actor_id: "u-1".to_string(),
            },
            WorkflowError::InvalidTransition {
                status: Status::Pending,
                event: EventKind::Verify,
            },
            WorkflowError::AlreadyCompleted {
                action_id: "ca-1".to_string(),
                status: Status::Completed,
            },
            WorkflowError::NotReadyForVerification {
                action_id: "ca-1".to_string(),
                status: Status::Pending,
            },
            WorkflowError::ActionClosed {
                action_id: "ca-1".to_string(),
                status: Status::Verified,
            },
            WorkflowError::InvalidFile {
                file_name: "a.exe".to_string(),
                reason: "type".to_string(),
            },
            WorkflowError::VersionConflict {
                action_id: "ca-1".to_string(),
                expected_version: 3,
            },
            WorkflowError::NotFound {
                action_id: "ca-1".to_string(),
            },
            WorkflowError::IncidentCloseFailed {
                incident_id: "inc-1".to_string(),
                message: "timeout".to_string(),
            },
            WorkflowError::AuditAppendFailed {
                action_id: "ca-1".to_string(),
                message: "disk full".to_string(),
            },
            WorkflowError::Storage {
                message: "down".to_string(),
            },
        ];
        let mut kinds: Vec<&str> = errors.iter().map(|e| e.kind()).collect();
        kinds.sort_unstable();
        kinds.dedup();
        assert_eq!(kinds.len(), errors.len());
    }

    #[test]
    fn display_names_the_failed_side_effect() {
        let err = WorkflowError::IncidentCloseFailed {
            incident_id: "inc-42".to_string(),
            message: "503".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("inc-42"));
        assert!(text.contains("verified"));
    }

    #[test]
    fn display_marks_post_commit_audit_failures_as_committed() {
        let err = WorkflowError::AuditAppendFailed {
            action_id: "ca-9".to_string(),
            message: "disk full".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("ca-9"));
        assert!(text.contains("committed"));
        assert!(text.contains("disk full"));
    }
}
