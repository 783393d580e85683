//! The lifecycle engine: validated, role-gated state transitions.
//!
//! Every command follows the same walk:
//!
//! 1. fetch the current record
//! 2. map the (status, event) pair through the transition rule table,
//!    specializing the failure where a dedicated error exists
//!    (`AlreadyCompleted`, `NotReadyForVerification`)
//! 3. check the rule's actor gate (role checks live HERE, not only at the
//!    API edge)
//! 4. commit exactly one version-validated update through the repository
//! 5. append and publish exactly one domain event
//!
//! A `VersionConflict` from step 4 is returned untouched; the engine never
//! retries on the caller's behalf.

use std::sync::Arc;

use time::OffsetDateTime;

use capa_core::{
    lookup, ActionEvent, ActionEventKind, ActorContext, CorrectiveAction, DisplayStatus,
    EditFields, EventKind, Evidence, NewAction, Status, WorkflowError, ASSIGNER_ROLES,
};
use capa_storage::{ActionFilter, ActionRepository, EvidenceStore, StorageError};

use crate::events::EventSink;
use crate::evidence::{EvidencePolicy, UploadFile};
use crate::ids;
use crate::incident::IncidentClient;
use crate::verification::VerificationCoordinator;
use crate::view::ActionView;

use sha2::{Digest, Sha256};

#[cfg(test)]
mod tests;

/// List query accepted by the engine.
///
/// `status` filters on the DERIVED label, so `overdue` matches past-due
/// pending and in-progress actions.
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub assignee_id: Option<String>,
    pub incident_id: Option<String>,
    pub status: Option<DisplayStatus>,
}

/// The workflow engine. Stateless apart from its collaborators; safe to
/// share behind an `Arc` across request handlers.
pub struct LifecycleEngine<S, C> {
    store: Arc<S>,
    incidents: Arc<C>,
    events: Arc<dyn EventSink>,
    policy: EvidencePolicy,
    coordinator: VerificationCoordinator<S, C>,
}

impl<S, C> LifecycleEngine<S, C>
where
    S: ActionRepository + EvidenceStore,
    C: IncidentClient,
{
    pub fn new(store: Arc<S>, incidents: Arc<C>, events: Arc<dyn EventSink>) -> Self {
        let coordinator =
            VerificationCoordinator::new(store.clone(), incidents.clone(), events.clone());
        Self {
            store,
            incidents,
            events,
            policy: EvidencePolicy::default(),
            coordinator,
        }
    }

    pub fn with_policy(mut self, policy: EvidencePolicy) -> Self {
        self.policy = policy;
        self
    }

    // ── Commands ─────────────────────────────────────────────────────────

    /// Create a corrective action against an existing incident.
    pub async fn create(
        &self,
        new: NewAction,
        actor: &ActorContext,
    ) -> Result<ActionView, WorkflowError> {
        for (field, value) in [
            ("incident_id", &new.incident_id),
            ("description", &new.description),
            ("action_type", &new.action_type),
            ("assignee_id", &new.assignee_id),
        ] {
            if value.trim().is_empty() {
                return Err(WorkflowError::missing_field(field));
            }
        }
        if !ASSIGNER_ROLES.contains(&actor.role) {
            return Err(WorkflowError::Forbidden {
                operation: "create".to_string(),
                actor_id: actor.actor_id.clone(),
            });
        }
        let exists = self
            .incidents
            .incident_exists(&new.incident_id)
            .await
            .map_err(|e| WorkflowError::Storage {
                message: format!("incident lookup: {e}"),
            })?;
        if !exists {
            return Err(WorkflowError::UnknownIncident {
                incident_id: new.incident_id,
            });
        }

        let now = OffsetDateTime::now_utc();
        let action = CorrectiveAction {
            id: ids::action_id(),
            incident_id: new.incident_id,
            description: new.description,
            action_type: new.action_type,
            priority: new.priority,
            status: Status::Pending,
            assignee_id: new.assignee_id,
            assigner_id: actor.actor_id.clone(),
            due_date: new.due_date,
            completion_notes: None,
            completed_at: None,
            verified_at: None,
            verified_by: None,
            verification_required: new.verification_required,
            created_at: now,
            updated_at: now,
            version: 0,
        };
        self.store
            .create_action(action.clone())
            .await
            .map_err(storage_err)?;

        let event = ActionEvent {
            action_id: action.id.clone(),
            kind: ActionEventKind::Created,
            from_status: None,
            to_status: Status::Pending,
            actor_id: actor.actor_id.clone(),
            at: now,
            detail: None,
        };
        // The action is already durable; a failed audit append must not
        // read as a failed create.
        self.store
            .append_event(event.clone())
            .await
            .map_err(|e| WorkflowError::AuditAppendFailed {
                action_id: action.id.clone(),
                message: e.to_string(),
            })?;
        self.events.publish(&event);

        Ok(ActionView::of(action, now))
    }

    /// pending -> in_progress, by the assignee.
    pub async fn start(
        &self,
        action_id: &str,
        actor: &ActorContext,
        expected_version: i64,
    ) -> Result<ActionView, WorkflowError> {
        let updated = apply_transition(
            self.store.as_ref(),
            self.events.as_ref(),
            action_id,
            EventKind::Start,
            actor,
            expected_version,
            ActionEventKind::Started,
            None,
            |_action, _now| {},
        )
        .await?;
        Ok(ActionView::of(updated, OffsetDateTime::now_utc()))
    }

    /// in_progress -> completed, by the assignee, with completion notes.
    pub async fn complete(
        &self,
        action_id: &str,
        notes: &str,
        actor: &ActorContext,
        expected_version: i64,
    ) -> Result<ActionView, WorkflowError> {
        if notes.trim().is_empty() {
            return Err(WorkflowError::missing_field("completion_notes"));
        }
        let notes = notes.to_string();
        let updated = apply_transition(
            self.store.as_ref(),
            self.events.as_ref(),
            action_id,
            EventKind::Complete,
            actor,
            expected_version,
            ActionEventKind::Completed,
            None,
            move |action, now| {
                action.completion_notes = Some(notes);
                action.completed_at = Some(now);
            },
        )
        .await?;
        Ok(ActionView::of(updated, OffsetDateTime::now_utc()))
    }

    /// completed -> verified, by an admin or safety officer, optionally
    /// closing the parent incident afterwards.
    pub async fn verify(
        &self,
        action_id: &str,
        actor: &ActorContext,
        expected_version: i64,
        close_incident: bool,
    ) -> Result<ActionView, WorkflowError> {
        let verified = self
            .coordinator
            .verify_and_maybe_close(action_id, actor, expected_version, close_incident)
            .await?;
        Ok(ActionView::of(verified, OffsetDateTime::now_utc()))
    }

    /// completed -> in_progress, by an admin or safety officer. The reason
    /// is recorded on the rejection event, not on the action record.
    pub async fn reject(
        &self,
        action_id: &str,
        reason: &str,
        actor: &ActorContext,
        expected_version: i64,
    ) -> Result<ActionView, WorkflowError> {
        if reason.trim().is_empty() {
            return Err(WorkflowError::missing_field("reason"));
        }
        let updated = apply_transition(
            self.store.as_ref(),
            self.events.as_ref(),
            action_id,
            EventKind::Reject,
            actor,
            expected_version,
            ActionEventKind::Rejected,
            Some(reason.to_string()),
            |action, _now| {
                action.completion_notes = None;
                action.completed_at = None;
            },
        )
        .await?;
        Ok(ActionView::of(updated, OffsetDateTime::now_utc()))
    }

    /// Update description/priority/due date/assignee without touching the
    /// status. Admin or safety officer only; refused on terminally closed
    /// actions.
    pub async fn edit(
        &self,
        action_id: &str,
        fields: EditFields,
        actor: &ActorContext,
        expected_version: i64,
    ) -> Result<ActionView, WorkflowError> {
        if fields.description.is_none()
            && fields.priority.is_none()
            && fields.due_date.is_none()
            && fields.assignee_id.is_none()
        {
            return Err(WorkflowError::Validation {
                field: "fields".to_string(),
                message: "at least one editable field must be set".to_string(),
            });
        }
        if let Some(ref description) = fields.description {
            if description.trim().is_empty() {
                return Err(WorkflowError::missing_field("description"));
            }
        }
        if let Some(ref assignee_id) = fields.assignee_id {
            if assignee_id.trim().is_empty() {
                return Err(WorkflowError::missing_field("assignee_id"));
            }
        }
        let updated = apply_transition(
            self.store.as_ref(),
            self.events.as_ref(),
            action_id,
            EventKind::Edit,
            actor,
            expected_version,
            ActionEventKind::Edited,
            None,
            move |action, _now| {
                if let Some(description) = fields.description {
                    action.description = description;
                }
                if let Some(priority) = fields.priority {
                    action.priority = priority;
                }
                if let Some(due_date) = fields.due_date {
                    action.due_date = due_date;
                }
                if let Some(assignee_id) = fields.assignee_id {
                    action.assignee_id = assignee_id;
                }
            },
        )
        .await?;
        Ok(ActionView::of(updated, OffsetDateTime::now_utc()))
    }

    // ── Queries ──────────────────────────────────────────────────────────

    /// Fetch one action with its derived status label.
    pub async fn get(&self, action_id: &str) -> Result<ActionView, WorkflowError> {
        let action = self.store.get_action(action_id).await.map_err(storage_err)?;
        Ok(ActionView::of(action, OffsetDateTime::now_utc()))
    }

    /// List actions; the status filter applies to the derived label.
    pub async fn list(&self, filter: &ListFilter) -> Result<Vec<ActionView>, WorkflowError> {
        let stored_filter = ActionFilter {
            assignee_id: filter.assignee_id.clone(),
            incident_id: filter.incident_id.clone(),
        };
        let now = OffsetDateTime::now_utc();
        let actions = self
            .store
            .list_actions(&stored_filter)
            .await
            .map_err(storage_err)?;
        Ok(actions
            .into_iter()
            .map(|a| ActionView::of(a, now))
            .filter(|view| filter.status.map_or(true, |wanted| view.status == wanted))
            .collect())
    }

    /// The action's domain-event audit trail, oldest first.
    pub async fn history(&self, action_id: &str) -> Result<Vec<ActionEvent>, WorkflowError> {
        // Distinguish "no events yet" from "no such action".
        self.store.get_action(action_id).await.map_err(storage_err)?;
        self.store.list_events(action_id).await.map_err(storage_err)
    }

    // ── Evidence ─────────────────────────────────────────────────────────

    /// Attach evidence files to an open action.
    ///
    /// Every file must pass the acceptance policy before ANY file is
    /// stored, and the whole upload lands in one atomic storage append.
    /// The closed-action gate is re-checked by the storage write path, so
    /// a verify/complete racing this upload wins cleanly: either the batch
    /// commits first or none of it is stored.
    pub async fn add_evidence(
        &self,
        action_id: &str,
        files: Vec<UploadFile>,
        description: &str,
        actor: &ActorContext,
    ) -> Result<Vec<Evidence>, WorkflowError> {
        if files.is_empty() {
            return Err(WorkflowError::Validation {
                field: "files".to_string(),
                message: "at least one file is required".to_string(),
            });
        }
        for file in &files {
            self.policy.validate(file)?;
        }

        let now = OffsetDateTime::now_utc();
        let mut stored = Vec::with_capacity(files.len());
        for file in files {
            let sha256 = hex_digest(&file.bytes);
            let id = ids::evidence_id();
            stored.push(Evidence {
                id: id.clone(),
                action_id: action_id.to_string(),
                file_name: file.file_name,
                content_type: file.content_type,
                size_bytes: file.bytes.len() as u64,
                sha256,
                storage_ref: format!("mem://{id}"),
                description: description.to_string(),
                uploader_id: actor.actor_id.clone(),
                uploaded_at: now,
            });
        }
        self.store
            .append_evidence(stored.clone())
            .await
            .map_err(storage_err)?;
        Ok(stored)
    }

    /// All evidence for an action, ordered by upload time.
    pub async fn list_evidence(&self, action_id: &str) -> Result<Vec<Evidence>, WorkflowError> {
        self.store.get_action(action_id).await.map_err(storage_err)?;
        self.store
            .list_evidence(action_id)
            .await
            .map_err(storage_err)
    }
}

/// Shared transition walk used by the engine and the verification
/// coordinator. Commits exactly one CAS update and one domain event.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn apply_transition<S, M>(
    store: &S,
    events: &dyn EventSink,
    action_id: &str,
    event: EventKind,
    actor: &ActorContext,
    expected_version: i64,
    event_kind: ActionEventKind,
    detail: Option<String>,
    mutate: M,
) -> Result<CorrectiveAction, WorkflowError>
where
    S: ActionRepository,
    M: FnOnce(&mut CorrectiveAction, OffsetDateTime),
{
    let action = store.get_action(action_id).await.map_err(storage_err)?;

    // Specialized state errors take precedence over the generic lookup.
    match event {
        EventKind::Complete if action.status.is_closed() => {
            return Err(WorkflowError::AlreadyCompleted {
                action_id: action.id,
                status: action.status,
            });
        }
        EventKind::Verify if action.status != Status::Completed => {
            return Err(WorkflowError::NotReadyForVerification {
                action_id: action.id,
                status: action.status,
            });
        }
        EventKind::Edit if action.is_terminal() => {
            return Err(WorkflowError::InvalidTransition {
                status: action.status,
                event,
            });
        }
        _ => {}
    }

    let rule = lookup(action.status, event).ok_or(WorkflowError::InvalidTransition {
        status: action.status,
        event,
    })?;
    if !rule.permits(&action, actor) {
        return Err(WorkflowError::Forbidden {
            operation: event.as_str().to_string(),
            actor_id: actor.actor_id.clone(),
        });
    }

    let now = OffsetDateTime::now_utc();
    let from_status = action.status;
    let mut updated = action;
    updated.status = rule.to;
    mutate(&mut updated, now);
    updated.updated_at = now;

    let new_version = store
        .update_action(action_id, expected_version, updated.clone())
        .await
        .map_err(storage_err)?;
    updated.version = new_version;

    let event = ActionEvent {
        action_id: updated.id.clone(),
        kind: event_kind,
        from_status: Some(from_status),
        to_status: updated.status,
        actor_id: actor.actor_id.clone(),
        at: now,
        detail,
    };
    // Past the CAS the transition is durable; name the failed side effect
    // instead of reporting a generic storage failure.
    store
        .append_event(event.clone())
        .await
        .map_err(|e| WorkflowError::AuditAppendFailed {
            action_id: updated.id.clone(),
            message: e.to_string(),
        })?;
    events.publish(&event);

    Ok(updated)
}

fn hex_digest(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

fn storage_err(e: StorageError) -> WorkflowError {
    match e {
        StorageError::VersionConflict {
            action_id,
            expected_version,
        } => WorkflowError::VersionConflict {
            action_id,
            expected_version,
        },
        StorageError::ActionNotFound { action_id } => WorkflowError::NotFound { action_id },
        StorageError::ActionClosed { action_id, status } => {
            WorkflowError::ActionClosed { action_id, status }
        }
        StorageError::ActionExists { action_id } => WorkflowError::Storage {
            message: format!("action id collision: {action_id}"),
        },
        StorageError::Backend(message) => WorkflowError::Storage { message },
    }
}
