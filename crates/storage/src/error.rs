use capa_core::Status;

/// All errors that can be returned by a storage backend.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Optimistic concurrency conflict: the stored version no longer
    /// matches the caller's expected version.
    #[error("version conflict on action {action_id}: expected version {expected_version}")]
    VersionConflict {
        action_id: String,
        expected_version: i64,
    },

    /// No corrective action with the given id.
    #[error("corrective action not found: {action_id}")]
    ActionNotFound { action_id: String },

    /// A corrective action with this id already exists.
    #[error("corrective action already exists: {action_id}")]
    ActionExists { action_id: String },

    /// Evidence append refused: the owning action is completed or verified.
    /// Checked under the backend's write path, so a transition racing the
    /// upload cannot slip a late file in.
    #[error("corrective action {action_id} is {status}; evidence is closed")]
    ActionClosed { action_id: String, status: Status },

    /// A backend-specific storage error (DB connection, serialization, etc.).
    #[error("storage backend error: {0}")]
    Backend(String),
}
