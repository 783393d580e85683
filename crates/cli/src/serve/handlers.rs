//! HTTP route handlers for the workflow API.
//!
//! Handlers stay thin: extract the actor and version token, call the
//! engine, map `WorkflowError` onto an HTTP status. All gating and state
//! logic lives in the engine; nothing here decides who may do what.

use std::sync::Arc;

use axum::extract::{Multipart, Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use capa_core::{ActorContext, DisplayStatus, EditFields, NewAction, Role, WorkflowError};
use capa_engine::{ListFilter, UploadFile};

use super::json_error;
use super::state::AppState;

/// Map a workflow error onto an HTTP status. The body always carries the
/// stable `error.kind` so clients can branch without parsing messages.
fn error_response(err: &WorkflowError) -> Response {
    let status = match err.kind() {
        "validation" | "invalid_file" => StatusCode::BAD_REQUEST,
        "forbidden" => StatusCode::FORBIDDEN,
        "not_found" | "unknown_incident" => StatusCode::NOT_FOUND,
        "invalid_transition" | "already_completed" | "not_ready_for_verification"
        | "action_closed" | "version_conflict" => StatusCode::CONFLICT,
        "incident_close_failed" => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    json_error(status, err.kind(), &err.to_string())
}

/// Build the actor from the X-Actor-Id / X-Actor-Role headers supplied by
/// the upstream identity layer.
fn actor_from_headers(headers: &HeaderMap) -> Result<ActorContext, Response> {
    let actor_id = headers
        .get("x-actor-id")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty());
    let Some(actor_id) = actor_id else {
        return Err(json_error(
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            "missing X-Actor-Id header",
        ));
    };

    let role_raw = headers
        .get("x-actor-role")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty());
    let Some(role_raw) = role_raw else {
        return Err(json_error(
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            "missing X-Actor-Role header",
        ));
    };

    let role: Role = role_raw
        .parse()
        .map_err(|e: String| json_error(StatusCode::BAD_REQUEST, "validation", &e))?;

    Ok(ActorContext::new(actor_id, role))
}

/// Parse an If-Match version token: a non-negative integer, optionally
/// wrapped in double quotes as HTTP entity tags are.
fn parse_version_token(raw: &str) -> Option<i64> {
    let trimmed = raw.trim();
    let trimmed = trimmed
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .unwrap_or(trimmed);
    trimmed.parse::<i64>().ok().filter(|v| *v >= 0)
}

/// The If-Match version precondition. Mutations without one are refused:
/// the server never guesses which version the caller saw.
fn expected_version(headers: &HeaderMap) -> Result<i64, Response> {
    let raw = headers
        .get(header::IF_MATCH)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            json_error(
                StatusCode::BAD_REQUEST,
                "validation",
                "missing If-Match header with the action version",
            )
        })?;
    parse_version_token(raw).ok_or_else(|| {
        json_error(
            StatusCode::BAD_REQUEST,
            "validation",
            &format!("If-Match must be a version integer, got '{}'", raw),
        )
    })
}

/// Fallback handler for unmatched routes.
pub(crate) async fn handle_not_found() -> Response {
    json_error(StatusCode::NOT_FOUND, "not_found", "not found")
}

/// GET /health
pub(crate) async fn handle_health() -> impl IntoResponse {
    let response = serde_json::json!({
        "status": "ok",
        "service": "capa",
    });
    (StatusCode::OK, Json(response))
}

/// POST /actions
pub(crate) async fn handle_create(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(new): Json<NewAction>,
) -> Response {
    let actor = match actor_from_headers(&headers) {
        Ok(a) => a,
        Err(r) => return r,
    };
    match state.engine.create(new, &actor).await {
        Ok(view) => (StatusCode::CREATED, Json(view)).into_response(),
        Err(e) => error_response(&e),
    }
}

#[derive(Deserialize)]
pub(crate) struct ListQuery {
    assignee: Option<String>,
    incident: Option<String>,
    status: Option<String>,
}

/// GET /actions?assignee=&incident=&status=
///
/// The status filter matches the derived label, so `status=overdue` finds
/// past-due pending and in-progress actions.
pub(crate) async fn handle_list(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
    headers: HeaderMap,
) -> Response {
    if let Err(response) = actor_from_headers(&headers) {
        return response;
    }
    let status = match query.status.as_deref() {
        None => None,
        Some(raw) => match DisplayStatus::parse_filter(raw) {
            Some(s) => Some(s),
            None => {
                return json_error(
                    StatusCode::BAD_REQUEST,
                    "validation",
                    &format!("unknown status filter '{}'", raw),
                )
            }
        },
    };
    let filter = ListFilter {
        assignee_id: query.assignee,
        incident_id: query.incident,
        status,
    };
    match state.engine.list(&filter).await {
        Ok(actions) => (StatusCode::OK, Json(serde_json::json!({ "actions": actions })))
            .into_response(),
        Err(e) => error_response(&e),
    }
}

/// GET /actions/{id}
pub(crate) async fn handle_get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    // Reads carry no role gate, but the actor must still be authenticated.
    if let Err(response) = actor_from_headers(&headers) {
        return response;
    }
    match state.engine.get(&id).await {
        Ok(view) => (StatusCode::OK, Json(view)).into_response(),
        Err(e) => error_response(&e),
    }
}

/// PATCH /actions/{id}
pub(crate) async fn handle_edit(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(fields): Json<EditFields>,
) -> Response {
    let actor = match actor_from_headers(&headers) {
        Ok(a) => a,
        Err(r) => return r,
    };
    let version = match expected_version(&headers) {
        Ok(v) => v,
        Err(r) => return r,
    };
    match state.engine.edit(&id, fields, &actor, version).await {
        Ok(view) => (StatusCode::OK, Json(view)).into_response(),
        Err(e) => error_response(&e),
    }
}

/// POST /actions/{id}/start
pub(crate) async fn handle_start(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let actor = match actor_from_headers(&headers) {
        Ok(a) => a,
        Err(r) => return r,
    };
    let version = match expected_version(&headers) {
        Ok(v) => v,
        Err(r) => return r,
    };
    match state.engine.start(&id, &actor, version).await {
        Ok(view) => (StatusCode::OK, Json(view)).into_response(),
        Err(e) => error_response(&e),
    }
}

#[derive(Deserialize)]
pub(crate) struct CompleteBody {
    completion_notes: String,
}

/// POST /actions/{id}/complete
pub(crate) async fn handle_complete(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<CompleteBody>,
) -> Response {
    let actor = match actor_from_headers(&headers) {
        Ok(a) => a,
        Err(r) => return r,
    };
    let version = match expected_version(&headers) {
        Ok(v) => v,
        Err(r) => return r,
    };
    match state
        .engine
        .complete(&id, &body.completion_notes, &actor, version)
        .await
    {
        Ok(view) => (StatusCode::OK, Json(view)).into_response(),
        Err(e) => error_response(&e),
    }
}

#[derive(Deserialize, Default)]
pub(crate) struct VerifyBody {
    #[serde(default)]
    close_incident: bool,
}

/// POST /actions/{id}/verify
///
/// When the verify transition commits but the incident close fails, the
/// 502 body carries the verified action so the caller can retry just the
/// close instead of re-verifying.
pub(crate) async fn handle_verify(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Option<Json<VerifyBody>>,
) -> Response {
    let actor = match actor_from_headers(&headers) {
        Ok(a) => a,
        Err(r) => return r,
    };
    let version = match expected_version(&headers) {
        Ok(v) => v,
        Err(r) => return r,
    };
    let close_incident = body.map(|Json(b)| b.close_incident).unwrap_or(false);
    match state.engine.verify(&id, &actor, version, close_incident).await {
        Ok(view) => (StatusCode::OK, Json(view)).into_response(),
        Err(e @ WorkflowError::IncidentCloseFailed { .. }) => {
            let action = state.engine.get(&id).await.ok();
            let body = serde_json::json!({
                "error": {"kind": e.kind(), "message": e.to_string()},
                "action": action,
            });
            (StatusCode::BAD_GATEWAY, Json(body)).into_response()
        }
        Err(e) => error_response(&e),
    }
}

#[derive(Deserialize)]
pub(crate) struct RejectBody {
    reason: String,
}

/// POST /actions/{id}/reject
pub(crate) async fn handle_reject(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<RejectBody>,
) -> Response {
    let actor = match actor_from_headers(&headers) {
        Ok(a) => a,
        Err(r) => return r,
    };
    let version = match expected_version(&headers) {
        Ok(v) => v,
        Err(r) => return r,
    };
    match state.engine.reject(&id, &body.reason, &actor, version).await {
        Ok(view) => (StatusCode::OK, Json(view)).into_response(),
        Err(e) => error_response(&e),
    }
}

/// POST /actions/{id}/evidence (multipart: file parts + optional
/// `description` text part)
///
/// No If-Match: evidence appends never move the action version, so there
/// is no precondition to check.
pub(crate) async fn handle_add_evidence(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Response {
    let actor = match actor_from_headers(&headers) {
        Ok(a) => a,
        Err(r) => return r,
    };

    let mut files = Vec::new();
    let mut description = String::new();
    loop {
        match multipart.next_field().await {
            Ok(Some(field)) => {
                if field.name() == Some("description") {
                    match field.text().await {
                        Ok(text) => description = text,
                        Err(e) => {
                            return json_error(
                                StatusCode::BAD_REQUEST,
                                "validation",
                                &format!("malformed description part: {}", e),
                            )
                        }
                    }
                    continue;
                }
                let file_name = field.file_name().unwrap_or("unnamed").to_string();
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                match field.bytes().await {
                    Ok(bytes) => files.push(UploadFile {
                        file_name,
                        content_type,
                        bytes: bytes.to_vec(),
                    }),
                    Err(e) => {
                        return json_error(
                            StatusCode::BAD_REQUEST,
                            "validation",
                            &format!("malformed file part: {}", e),
                        )
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                return json_error(
                    StatusCode::BAD_REQUEST,
                    "validation",
                    &format!("malformed multipart body: {}", e),
                )
            }
        }
    }

    match state
        .engine
        .add_evidence(&id, files, &description, &actor)
        .await
    {
        Ok(stored) => (
            StatusCode::CREATED,
            Json(serde_json::json!({ "evidence": stored })),
        )
            .into_response(),
        Err(e) => error_response(&e),
    }
}

/// GET /actions/{id}/evidence
pub(crate) async fn handle_list_evidence(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    if let Err(response) = actor_from_headers(&headers) {
        return response;
    }
    match state.engine.list_evidence(&id).await {
        Ok(evidence) => (
            StatusCode::OK,
            Json(serde_json::json!({ "evidence": evidence })),
        )
            .into_response(),
        Err(e) => error_response(&e),
    }
}

/// GET /actions/{id}/history
pub(crate) async fn handle_history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    if let Err(response) = actor_from_headers(&headers) {
        return response;
    }
    match state.engine.history(&id).await {
        Ok(events) => (
            StatusCode::OK,
            Json(serde_json::json!({ "events": events })),
        )
            .into_response(),
        Err(e) => error_response(&e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use capa_core::{EventKind, Status};
    use capa_engine::{LifecycleEngine, NullSink, StaticIncidentClient};
    use capa_storage::MemoryStore;

    use crate::incident::IncidentBackend;
    use crate::serve::state::RateLimiter;

    fn test_state() -> Arc<AppState> {
        Arc::new(AppState {
            engine: LifecycleEngine::new(
                Arc::new(MemoryStore::new()),
                Arc::new(IncidentBackend::Permissive(StaticIncidentClient::permissive())),
                Arc::new(NullSink),
            ),
            rate_limiter: RateLimiter::new(60),
            api_key: None,
        })
    }

    fn actor_headers(role: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-actor-id", HeaderValue::from_static("u-1"));
        headers.insert("x-actor-role", HeaderValue::from_static(role));
        headers
    }

    #[tokio::test]
    async fn read_routes_reject_missing_actor_headers() {
        let state = test_state();
        let none = HeaderMap::new();

        let response =
            handle_get(State(state.clone()), Path("ca-1".to_string()), none.clone()).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let query = Query(ListQuery {
            assignee: None,
            incident: None,
            status: None,
        });
        let response = handle_list(State(state.clone()), query, none.clone()).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response =
            handle_list_evidence(State(state.clone()), Path("ca-1".to_string()), none.clone())
                .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = handle_history(State(state), Path("ca-1".to_string()), none).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn read_routes_reject_unknown_actor_role() {
        let state = test_state();
        let response = handle_get(
            State(state),
            Path("ca-1".to_string()),
            actor_headers("superuser"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn authenticated_read_of_missing_action_is_not_found() {
        let state = test_state();
        let response = handle_get(
            State(state),
            Path("ca-absent".to_string()),
            actor_headers("employee"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn version_token_accepts_bare_and_quoted_integers() {
        assert_eq!(parse_version_token("3"), Some(3));
        assert_eq!(parse_version_token("\"3\""), Some(3));
        assert_eq!(parse_version_token(" 12 "), Some(12));
        assert_eq!(parse_version_token("0"), Some(0));
    }

    #[test]
    fn version_token_rejects_garbage() {
        assert_eq!(parse_version_token(""), None);
        assert_eq!(parse_version_token("abc"), None);
        assert_eq!(parse_version_token("\"abc\""), None);
        assert_eq!(parse_version_token("-1"), None);
        assert_eq!(parse_version_token("\"3"), None);
    }

    #[test]
    fn actor_headers_parse_into_actor_context() {
        let mut headers = HeaderMap::new();
        headers.insert("x-actor-id", HeaderValue::from_static("u-1"));
        headers.insert("x-actor-role", HeaderValue::from_static("safety_officer"));
        let actor = actor_from_headers(&headers).unwrap();
        assert_eq!(actor.actor_id, "u-1");
        assert_eq!(actor.role, Role::SafetyOfficer);
    }

    #[test]
    fn missing_actor_id_is_unauthorized() {
        let mut headers = HeaderMap::new();
        headers.insert("x-actor-role", HeaderValue::from_static("admin"));
        let response = actor_from_headers(&headers).unwrap_err();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn unknown_role_is_bad_request() {
        let mut headers = HeaderMap::new();
        headers.insert("x-actor-id", HeaderValue::from_static("u-1"));
        headers.insert("x-actor-role", HeaderValue::from_static("superuser"));
        let response = actor_from_headers(&headers).unwrap_err();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn missing_if_match_is_bad_request() {
        let response = expected_version(&HeaderMap::new()).unwrap_err();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn workflow_errors_map_to_expected_statuses() {
        let cases = [
            (WorkflowError::missing_field("description"), StatusCode::BAD_REQUEST),
            (
                WorkflowError::Forbidden {
                    operation: "verify".to_string(),
                    actor_id: "u-1".to_string(),
                },
                StatusCode::FORBIDDEN,
            ),
            (
                WorkflowError::NotFound {
                    action_id: "ca-1".to_string(),
                },
                StatusCode::NOT_FOUND,
            ),
            (
                WorkflowError::InvalidTransition {
                    status: Status::Verified,
                    event: EventKind::Start,
                },
                StatusCode::CONFLICT,
            ),
            (
                WorkflowError::VersionConflict {
                    action_id: "ca-1".to_string(),
                    expected_version: 2,
                },
                StatusCode::CONFLICT,
            ),
            (
                WorkflowError::IncidentCloseFailed {
                    incident_id: "inc-1".to_string(),
                    message: "503".to_string(),
                },
                StatusCode::BAD_GATEWAY,
            ),
            (
                WorkflowError::Storage {
                    message: "down".to_string(),
                },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(error_response(&err).status(), expected, "{}", err.kind());
        }
    }
}
