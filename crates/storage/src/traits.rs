use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use capa_core::{ActionEvent, CorrectiveAction, Evidence};

use crate::error::StorageError;

/// Filter for listing corrective actions.
///
/// Status filtering is NOT part of the repository contract: the `overdue`
/// label is derived against the server clock at read time, so the engine
/// filters on the derived label after fetching.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionFilter {
    pub assignee_id: Option<String>,
    pub incident_id: Option<String>,
}

impl ActionFilter {
    pub fn by_assignee(assignee_id: impl Into<String>) -> Self {
        Self {
            assignee_id: Some(assignee_id.into()),
            ..Self::default()
        }
    }

    pub fn by_incident(incident_id: impl Into<String>) -> Self {
        Self {
            incident_id: Some(incident_id.into()),
            ..Self::default()
        }
    }

    /// Whether `action` matches every set field.
    pub fn matches(&self, action: &CorrectiveAction) -> bool {
        if let Some(ref assignee) = self.assignee_id {
            if action.assignee_id != *assignee {
                return false;
            }
        }
        if let Some(ref incident) = self.incident_id {
            if action.incident_id != *incident {
                return false;
            }
        }
        true
    }
}

/// Durable storage of corrective-action records.
///
/// ## OCC Contract
///
/// [`update_action`](ActionRepository::update_action) is the ONLY mutation
/// path after creation. It is a compare-and-swap conditional on
/// `version = expected_version`; on mismatch it returns
/// [`StorageError::VersionConflict`] and leaves the stored record untouched,
/// forcing the engine to re-fetch and re-validate rather than blindly
/// overwrite. On success the backend stores the record with
/// `version = expected_version + 1` and returns the new version.
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync + 'static` to be shared as axum
/// application state and across async task boundaries.
#[async_trait]
pub trait ActionRepository: Send + Sync + 'static {
    /// Insert a freshly created action at version 0.
    ///
    /// Returns `Err(StorageError::ActionExists)` if the id is taken.
    async fn create_action(&self, action: CorrectiveAction) -> Result<(), StorageError>;

    /// Fetch a single action by id.
    ///
    /// Returns `Err(StorageError::ActionNotFound)` if absent.
    async fn get_action(&self, action_id: &str) -> Result<CorrectiveAction, StorageError>;

    /// List actions matching `filter`, ordered by creation time then id.
    ///
    /// An empty result is an empty `Vec`, never an error.
    async fn list_actions(&self, filter: &ActionFilter)
        -> Result<Vec<CorrectiveAction>, StorageError>;

    /// Version-validated replace (OCC). See the trait docs.
    async fn update_action(
        &self,
        action_id: &str,
        expected_version: i64,
        updated: CorrectiveAction,
    ) -> Result<i64, StorageError>;

    /// Append a domain event to the action's audit trail.
    async fn append_event(&self, event: ActionEvent) -> Result<(), StorageError>;

    /// All recorded events for an action, oldest first.
    async fn list_events(&self, action_id: &str) -> Result<Vec<ActionEvent>, StorageError>;
}

/// Storage of evidence attached to corrective actions.
///
/// The evidence list is append-only and exclusively owned by its action.
/// `append_evidence` re-reads the owning action's status inside the write
/// path and refuses with [`StorageError::ActionClosed`] once the action is
/// completed or verified; the check is not cached from an earlier read.
#[async_trait]
pub trait EvidenceStore: Send + Sync + 'static {
    /// Append a batch of evidence records for one action, re-validating the
    /// owning action's status at write time. Every record in the batch must
    /// reference the same action. The batch commits atomically: either all
    /// records are stored or none is, so a transition racing the append
    /// never observes a partial batch. An empty batch is a no-op.
    async fn append_evidence(&self, batch: Vec<Evidence>) -> Result<(), StorageError>;

    /// All evidence for an action, ordered by `uploaded_at` ascending.
    async fn list_evidence(&self, action_id: &str) -> Result<Vec<Evidence>, StorageError>;
}
