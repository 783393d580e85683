//! Domain events emitted on accepted lifecycle transitions.
//!
//! Out-of-scope collaborators (notifications, dashboards) subscribe to this
//! stream; the engine emits exactly one event per accepted command.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::model::Status;

/// What happened to the action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionEventKind {
    Created,
    Started,
    Completed,
    Verified,
    Rejected,
    Edited,
}

impl ActionEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionEventKind::Created => "created",
            ActionEventKind::Started => "started",
            ActionEventKind::Completed => "completed",
            ActionEventKind::Verified => "verified",
            ActionEventKind::Rejected => "rejected",
            ActionEventKind::Edited => "edited",
        }
    }
}

/// A single domain event: `{actionId, fromStatus, toStatus, actor, timestamp}`
/// plus an optional detail payload.
///
/// `detail` carries the rejection reason on `Rejected` events -- the reason
/// is event history, not a field on the action record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionEvent {
    pub action_id: String,
    pub kind: ActionEventKind,
    /// `None` for `Created` (there is no prior state).
    pub from_status: Option<Status>,
    pub to_status: Status,
    pub actor_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
    pub detail: Option<String>,
}
