//! Corrective-action and evidence records.
//!
//! `Status` is the stored state machine value. The `overdue` label users see
//! is NOT stored: it is derived from `due_date` against the server clock on
//! every read ([`CorrectiveAction::display_status`]), so a stale stored flag
//! can never survive a due-date extension.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Stored lifecycle state of a corrective action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Pending,
    InProgress,
    Completed,
    Verified,
}

impl Status {
    /// All stored states, in lifecycle order.
    pub const ALL: [Status; 4] = [
        Status::Pending,
        Status::InProgress,
        Status::Completed,
        Status::Verified,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::InProgress => "in_progress",
            Status::Completed => "completed",
            Status::Verified => "verified",
        }
    }

    /// A closed action no longer accepts work or evidence.
    pub fn is_closed(self) -> bool {
        matches!(self, Status::Completed | Status::Verified)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derived status label presented to callers.
///
/// Identical to [`Status`] except that a pending or in-progress action whose
/// due date has passed presents as `overdue`. Never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayStatus {
    Pending,
    InProgress,
    Completed,
    Overdue,
    Verified,
}

impl DisplayStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DisplayStatus::Pending => "pending",
            DisplayStatus::InProgress => "in_progress",
            DisplayStatus::Completed => "completed",
            DisplayStatus::Overdue => "overdue",
            DisplayStatus::Verified => "verified",
        }
    }

    /// Parse a status filter as supplied on the list endpoint.
    pub fn parse_filter(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(DisplayStatus::Pending),
            "in_progress" => Some(DisplayStatus::InProgress),
            "completed" => Some(DisplayStatus::Completed),
            "overdue" => Some(DisplayStatus::Overdue),
            "verified" => Some(DisplayStatus::Verified),
            _ => None,
        }
    }
}

/// Priority tag assigned by the assigner at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

/// A remediation task assigned against a safety incident.
///
/// Mutated only through lifecycle engine transitions; never hard-deleted.
/// `version` is the optimistic-concurrency token: it increments by exactly
/// one on every accepted transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectiveAction {
    pub id: String,
    /// Reference into the external incident service. Immutable.
    pub incident_id: String,
    pub description: String,
    pub action_type: String,
    pub priority: Priority,
    pub status: Status,
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
    /// Set at creation. When false, `completed` is terminal closure; when
    /// true, the action must reach `verified` before the incident side may
    /// treat it as closed.
    pub verification_required: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    pub version: i64,
}

impl CorrectiveAction {
    /// Derived status label at `now` (server clock, never client-supplied).
    pub fn display_status(&self, now: OffsetDateTime) -> DisplayStatus {
        match self.status {
            Status::Pending | Status::InProgress if now > self.due_date => DisplayStatus::Overdue,
            Status::Pending => DisplayStatus::Pending,
            Status::InProgress => DisplayStatus::InProgress,
            Status::Completed => DisplayStatus::Completed,
            Status::Verified => DisplayStatus::Verified,
        }
    }

    /// Whether the action has reached terminal closure: verified, or
    /// completed with no verification step required.
    pub fn is_terminal(&self) -> bool {
        match self.status {
            Status::Verified => true,
            Status::Completed => !self.verification_required,
            _ => false,
        }
    }
}

/// Creation payload for a corrective action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAction {
    pub incident_id: String,
    pub description: String,
    pub action_type: String,
    pub priority: Priority,
    pub assignee_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub due_date: OffsetDateTime,
    pub verification_required: bool,
}

/// Fields an admin or safety officer may change through `edit`.
///
/// Everything else -- status in particular -- is off limits to edits.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EditFields {
    pub description: Option<String>,
    pub priority: Option<Priority>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub due_date: Option<OffsetDateTime>,
    pub assignee_id: Option<String>,
}

/// Proof of remediation work attached to a corrective action.
///
/// Exclusively owned by its action; the evidence list is append-only and
/// ordered by `uploaded_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub id: String,
    pub action_id: String,
    pub file_name: String,
    pub content_type: String,
    pub size_bytes: u64,
    /// SHA-256 of the accepted file content, hex encoded.
    pub sha256: String,
    /// Backend storage reference (e.g. `mem://ev-…`).
    pub storage_ref: String,
    pub description: String,
    pub uploader_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub uploaded_at: OffsetDateTime,
}
