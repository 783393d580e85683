//! Outbound HTTP client for the external incident service.
//!
//! The incident service is another system with its own lifecycle; this
//! client only asks two questions of it: does an incident exist, and close
//! this incident. `ureq` is a synchronous client, so every call runs inside
//! `tokio::task::spawn_blocking`.

use async_trait::async_trait;

use capa_engine::{IncidentClient, IncidentError, StaticIncidentClient};

/// Incident client talking HTTP to a configured base URL.
///
/// - `GET  {base}/incidents/{id}` -- existence check (404 means "no")
/// - `POST {base}/incidents/{id}/close` -- close after verification
///
/// A bearer token is read from `CAPA_INCIDENT_TOKEN` when set.
pub(crate) struct HttpIncidentClient {
    base_url: String,
    token: Option<String>,
}

impl HttpIncidentClient {
    pub(crate) fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        let token = std::env::var("CAPA_INCIDENT_TOKEN")
            .ok()
            .filter(|t| !t.is_empty());
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    fn unavailable(e: impl std::fmt::Display) -> IncidentError {
        IncidentError::Unavailable {
            message: e.to_string(),
        }
    }
}

#[async_trait]
impl IncidentClient for HttpIncidentClient {
    async fn incident_exists(&self, incident_id: &str) -> Result<bool, IncidentError> {
        let url = format!("{}/incidents/{}", self.base_url, incident_id);
        let token = self.token.clone();

        let result = tokio::task::spawn_blocking(move || {
            let agent = ureq::Agent::new_with_defaults();
            let mut request = agent.get(&url);
            if let Some(token) = &token {
                request = request.header("Authorization", &format!("Bearer {}", token));
            }
            request.call().map(|_| ())
        })
        .await
        .map_err(Self::unavailable)?;

        match result {
            Ok(()) => Ok(true),
            Err(ureq::Error::StatusCode(404)) => Ok(false),
            Err(e) => Err(Self::unavailable(e)),
        }
    }

    async fn close_incident(&self, incident_id: &str) -> Result<(), IncidentError> {
        let url = format!("{}/incidents/{}/close", self.base_url, incident_id);
        let id = incident_id.to_string();
        let token = self.token.clone();

        let result = tokio::task::spawn_blocking(move || {
            let agent = ureq::Agent::new_with_defaults();
            let mut request = agent.post(&url);
            if let Some(token) = &token {
                request = request.header("Authorization", &format!("Bearer {}", token));
            }
            request.send_empty().map(|_| ())
        })
        .await
        .map_err(Self::unavailable)?;

        match result {
            Ok(()) => Ok(()),
            Err(ureq::Error::StatusCode(404)) => Err(IncidentError::NotFound { incident_id: id }),
            Err(e) => Err(Self::unavailable(e)),
        }
    }
}

/// The server's incident collaborator: HTTP when `--incident-url` is given,
/// otherwise the permissive in-memory client.
pub(crate) enum IncidentBackend {
    Permissive(StaticIncidentClient),
    Http(HttpIncidentClient),
}

#[async_trait]
impl IncidentClient for IncidentBackend {
    async fn incident_exists(&self, incident_id: &str) -> Result<bool, IncidentError> {
        match self {
            IncidentBackend::Permissive(c) => c.incident_exists(incident_id).await,
            IncidentBackend::Http(c) => c.incident_exists(incident_id).await,
        }
    }

    async fn close_incident(&self, incident_id: &str) -> Result<(), IncidentError> {
        match self {
            IncidentBackend::Permissive(c) => c.close_incident(incident_id).await,
            IncidentBackend::Http(c) => c.close_incident(incident_id).await,
        }
    }
}
