//! Read model for corrective actions.
//!
//! [`ActionView`] is what callers see: the stored record with the status
//! replaced by the derived label, so a past-due pending action presents as
//! `overdue` without any stored flag to go stale.

use serde::Serialize;
use time::OffsetDateTime;

use capa_core::{CorrectiveAction, DisplayStatus, Priority};

/// A corrective action as presented to callers.
#[derive(Debug, Clone, Serialize)]
pub struct ActionView {
    pub id: String,
    pub incident_id: String,
    pub description: String,
    pub action_type: String,
    pub priority: Priority,
    /// Derived label, recomputed against the server clock on every read.
    pub status: DisplayStatus,
    pub assignee_id: String,
    pub assigner_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub due_date: OffsetDateTime,
    pub completion_notes: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub verified_at: Option<OffsetDateTime>,
    pub verified_by: Option<String>,
    pub verification_required: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    pub version: i64,
}

impl ActionView {
    pub fn of(action: CorrectiveAction, now: OffsetDateTime) -> Self {
        let status = action.display_status(now);
        Self {
            id: action.id,
            incident_id: action.incident_id,
            description: action.description,
            action_type: action.action_type,
            priority: action.priority,
            status,
            assignee_id: action.assignee_id,
            assigner_id: action.assigner_id,
            due_date: action.due_date,
            completion_notes: action.completion_notes,
            completed_at: action.completed_at,
            verified_at: action.verified_at,
            verified_by: action.verified_by,
            verification_required: action.verification_required,
            created_at: action.created_at,
            updated_at: action.updated_at,
            version: action.version,
        }
    }
}
