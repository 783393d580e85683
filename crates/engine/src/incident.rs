//! The external incident-service seam.
//!
//! The incident store is another system: the workflow consumes an incident
//! id at creation time and may ask for the incident to be closed after
//! verification. Both calls go through [`IncidentClient`] so the engine
//! never knows whether it is talking to HTTP or a test double.

use std::collections::HashSet;

use async_trait::async_trait;
use tokio::sync::Mutex;

/// Errors from the incident collaborator.
#[derive(Debug, thiserror::Error)]
pub enum IncidentError {
    #[error("incident not found: {incident_id}")]
    NotFound { incident_id: String },

    /// Transport failure or timeout. Timeouts are failures, never a
    /// pending internal state.
    #[error("incident service unavailable: {message}")]
    Unavailable { message: String },
}

/// External incident service contract.
#[async_trait]
pub trait IncidentClient: Send + Sync + 'static {
    /// Whether the incident exists (consulted at action creation).
    async fn incident_exists(&self, incident_id: &str) -> Result<bool, IncidentError>;

    /// Close the incident. Invoked by the verification coordinator only
    /// after the verify transition is durably committed.
    async fn close_incident(&self, incident_id: &str) -> Result<(), IncidentError>;
}

/// In-memory incident client for tests and standalone serving.
///
/// `permissive` mode accepts any incident id; otherwise only registered ids
/// exist. `failing_close` forces `close_incident` to fail, which is how
/// tests exercise the incident-close-independence guarantee.
pub struct StaticIncidentClient {
    known: HashSet<String>,
    closed: Mutex<Vec<String>>,
    permissive: bool,
    fail_close: bool,
}

impl StaticIncidentClient {
    /// Accepts every incident id and every close call.
    pub fn permissive() -> Self {
        Self {
            known: HashSet::new(),
            closed: Mutex::new(Vec::new()),
            permissive: true,
            fail_close: false,
        }
    }

    /// Knows exactly the given incident ids.
    pub fn with_incidents<I: IntoIterator<Item = String>>(ids: I) -> Self {
        Self {
            known: ids.into_iter().collect(),
            closed: Mutex::new(Vec::new()),
            permissive: false,
            fail_close: false,
        }
    }

    /// Make every `close_incident` call fail with `Unavailable`.
    pub fn failing_close(mut self) -> Self {
        self.fail_close = true;
        self
    }

    /// Incident ids that have been closed, in call order.
    pub async fn closed_incidents(&self) -> Vec<String> {
        self.closed.lock().await.clone()
    }
}

#[async_trait]
impl IncidentClient for StaticIncidentClient {
    async fn incident_exists(&self, incident_id: &str) -> Result<bool, IncidentError> {
        Ok(self.permissive || self.known.contains(incident_id))
    }

    async fn close_incident(&self, incident_id: &str) -> Result<(), IncidentError> {
        if self.fail_close {
            return Err(IncidentError::Unavailable {
                message: "forced failure".to_string(),
            });
        }
        if !self.permissive && !self.known.contains(incident_id) {
            return Err(IncidentError::NotFound {
                incident_id: incident_id.to_string(),
            });
        }
        self.closed.lock().await.push(incident_id.to_string());
        Ok(())
    }
}
