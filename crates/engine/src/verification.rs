//! Verification coordination.
//!
//! `verify` has an optional side effect on a system we do not own: closing
//! the parent incident. The two effects are deliberately NOT one
//! transaction. The verify transition commits first through the repository
//! CAS; only then is the incident service called. A failed close therefore
//! never rolls the verification back -- the caller gets
//! `IncidentCloseFailed` and retries just the close.

use std::sync::Arc;

use capa_core::{ActionEventKind, ActorContext, CorrectiveAction, EventKind, WorkflowError};
use capa_storage::ActionRepository;

use crate::events::EventSink;
use crate::incident::IncidentClient;
use crate::lifecycle::apply_transition;

/// Orchestrates the verify transition and the optional incident close.
pub struct VerificationCoordinator<S, C> {
    store: Arc<S>,
    incidents: Arc<C>,
    events: Arc<dyn EventSink>,
}

impl<S, C> VerificationCoordinator<S, C>
where
    S: ActionRepository,
    C: IncidentClient,
{
    pub fn new(store: Arc<S>, incidents: Arc<C>, events: Arc<dyn EventSink>) -> Self {
        Self {
            store,
            incidents,
            events,
        }
    }

    /// Apply the verify transition; when `close_incident` is set, close the
    /// parent incident after the transition is durably committed.
    pub async fn verify_and_maybe_close(
        &self,
        action_id: &str,
        actor: &ActorContext,
        expected_version: i64,
        close_incident: bool,
    ) -> Result<CorrectiveAction, WorkflowError> {
        let verifier = actor.actor_id.clone();
        let verified = apply_transition(
            self.store.as_ref(),
            self.events.as_ref(),
            action_id,
            EventKind::Verify,
            actor,
            expected_version,
            ActionEventKind::Verified,
            None,
            move |action, now| {
                action.verified_at = Some(now);
                action.verified_by = Some(verifier);
            },
        )
        .await?;

        if close_incident {
            if let Err(e) = self.incidents.close_incident(&verified.incident_id).await {
                return Err(WorkflowError::IncidentCloseFailed {
                    incident_id: verified.incident_id.clone(),
                    message: e.to_string(),
                });
            }
        }

        Ok(verified)
    }
}
