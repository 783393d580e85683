//! In-memory storage backend.
//!
//! Reference implementation of [`ActionRepository`] and [`EvidenceStore`]
//! backed by a single `tokio::sync::RwLock`. All invariants the conformance
//! suite checks (OCC, write-time evidence gating, append-only ordering) hold
//! because every mutation runs under the one write lock.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use capa_core::{ActionEvent, CorrectiveAction, Evidence};

use crate::error::StorageError;
use crate::traits::{ActionFilter, ActionRepository, EvidenceStore};

#[derive(Default)]
struct MemoryState {
    actions: HashMap<String, CorrectiveAction>,
    /// Evidence per action id, in append (= upload) order.
    evidence: HashMap<String, Vec<Evidence>>,
    /// Domain events per action id, oldest first.
    events: HashMap<String, Vec<ActionEvent>>,
}

/// In-memory backend used by the server default configuration and by tests.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ActionRepository for MemoryStore {
    async fn create_action(&self, action: CorrectiveAction) -> Result<(), StorageError> {
        let mut state = self.state.write().await;
        if state.actions.contains_key(&action.id) {
            return Err(StorageError::ActionExists {
                action_id: action.id,
            });
        }
        state.actions.insert(action.id.clone(), action);
        Ok(())
    }

    async fn get_action(&self, action_id: &str) -> Result<CorrectiveAction, StorageError> {
        let state = self.state.read().await;
        state
            .actions
            .get(action_id)
            .cloned()
            .ok_or_else(|| StorageError::ActionNotFound {
                action_id: action_id.to_string(),
            })
    }

    async fn list_actions(
        &self,
        filter: &ActionFilter,
    ) -> Result<Vec<CorrectiveAction>, StorageError> {
        let state = self.state.read().await;
        let mut matching: Vec<CorrectiveAction> = state
            .actions
            .values()
            .filter(|a| filter.matches(a))
            .cloned()
            .collect();
        matching.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(matching)
    }

    async fn update_action(
        &self,
        action_id: &str,
        expected_version: i64,
        mut updated: CorrectiveAction,
    ) -> Result<i64, StorageError> {
        let mut state = self.state.write().await;
        let stored = state
            .actions
            .get_mut(action_id)
            .ok_or_else(|| StorageError::ActionNotFound {
                action_id: action_id.to_string(),
            })?;
        if stored.version != expected_version {
            return Err(StorageError::VersionConflict {
                action_id: action_id.to_string(),
                expected_version,
            });
        }
        let new_version = expected_version + 1;
        updated.version = new_version;
        *stored = updated;
        Ok(new_version)
    }

    async fn append_event(&self, event: ActionEvent) -> Result<(), StorageError> {
        let mut state = self.state.write().await;
        state
            .events
            .entry(event.action_id.clone())
            .or_default()
            .push(event);
        Ok(())
    }

    async fn list_events(&self, action_id: &str) -> Result<Vec<ActionEvent>, StorageError> {
        let state = self.state.read().await;
        Ok(state.events.get(action_id).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl EvidenceStore for MemoryStore {
    async fn append_evidence(&self, batch: Vec<Evidence>) -> Result<(), StorageError> {
        let Some(first) = batch.first() else {
            return Ok(());
        };
        let action_id = first.action_id.clone();
        let mut state = self.state.write().await;
        // Re-read the owning action's status under the write lock: a
        // transition committed after the engine's earlier read is seen here
        // and rejects the whole batch before any record lands.
        let action = state
            .actions
            .get(&action_id)
            .ok_or_else(|| StorageError::ActionNotFound {
                action_id: action_id.clone(),
            })?;
        if action.status.is_closed() {
            return Err(StorageError::ActionClosed {
                action_id,
                status: action.status,
            });
        }
        state.evidence.entry(action_id).or_default().extend(batch);
        Ok(())
    }

    async fn list_evidence(&self, action_id: &str) -> Result<Vec<Evidence>, StorageError> {
        let state = self.state.read().await;
        Ok(state.evidence.get(action_id).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conformance::run_conformance_suite;

    #[tokio::test]
    async fn memory_store_passes_conformance() {
        let report = run_conformance_suite(|| async { MemoryStore::new() }).await;
        assert_eq!(report.failed, 0, "{report}");
    }
}
