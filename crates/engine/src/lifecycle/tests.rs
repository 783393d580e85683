use std::sync::Arc;

use time::{Duration, OffsetDateTime};

use capa_core::{
    DisplayStatus, EditFields, NewAction, Priority, Role, Status, WorkflowError,
};
use capa_storage::{ActionRepository, MemoryStore};

use super::*;
use crate::events::{BroadcastSink, NullSink};
use crate::incident::StaticIncidentClient;

type TestEngine = LifecycleEngine<MemoryStore, StaticIncidentClient>;

fn assigner() -> ActorContext {
    ActorContext::new("u-officer", Role::SafetyOfficer)
}

fn assignee() -> ActorContext {
    ActorContext::new("u-worker", Role::Employee)
}

fn admin() -> ActorContext {
    ActorContext::new("u-admin", Role::Admin)
}

fn manager() -> ActorContext {
    ActorContext::new("u-manager", Role::Manager)
}

fn new_action() -> NewAction {
    NewAction {
        incident_id: "inc-1".to_string(),
        description: "install machine guard".to_string(),
        action_type: "engineering_control".to_string(),
        priority: Priority::High,
        assignee_id: "u-worker".to_string(),
        due_date: OffsetDateTime::now_utc() + Duration::days(7),
        verification_required: true,
    }
}

fn setup() -> (Arc<MemoryStore>, Arc<StaticIncidentClient>, TestEngine) {
    setup_with(StaticIncidentClient::permissive())
}

fn setup_with(
    incidents: StaticIncidentClient,
) -> (Arc<MemoryStore>, Arc<StaticIncidentClient>, TestEngine) {
    let store = Arc::new(MemoryStore::new());
    let incidents = Arc::new(incidents);
    let engine = LifecycleEngine::new(store.clone(), incidents.clone(), Arc::new(NullSink));
    (store, incidents, engine)
}

/// Drive a freshly created action to the given stored status through the
/// regular transitions. Returns the latest view.
async fn action_in(engine: &TestEngine, status: Status) -> ActionView {
    let created = engine.create(new_action(), &assigner()).await.unwrap();
    let id = created.id.clone();
    match status {
        Status::Pending => created,
        Status::InProgress => engine.start(&id, &assignee(), 0).await.unwrap(),
        Status::Completed => {
            engine.start(&id, &assignee(), 0).await.unwrap();
            engine
                .complete(&id, "guard rail installed", &assignee(), 1)
                .await
                .unwrap()
        }
        Status::Verified => {
            engine.start(&id, &assignee(), 0).await.unwrap();
            engine
                .complete(&id, "guard rail installed", &assignee(), 1)
                .await
                .unwrap();
            engine.verify(&id, &admin(), 2, false).await.unwrap()
        }
    }
}

// ──────────────────────────────────────
// Creation
// ──────────────────────────────────────

#[tokio::test]
async fn create_starts_pending_at_version_zero() {
    let (_, _, engine) = setup();
    let view = engine.create(new_action(), &assigner()).await.unwrap();
    assert_eq!(view.status, DisplayStatus::Pending);
    assert_eq!(view.version, 0);
    assert_eq!(view.assigner_id, "u-officer");
    assert!(view.id.starts_with("ca-"));
}

#[tokio::test]
async fn create_requires_assigner_role() {
    let (_, _, engine) = setup();
    let err = engine.create(new_action(), &assignee()).await.unwrap_err();
    assert_eq!(err.kind(), "forbidden");
}

#[tokio::test]
async fn create_by_manager_is_allowed() {
    let (_, _, engine) = setup();
    assert!(engine.create(new_action(), &manager()).await.is_ok());
}

#[tokio::test]
async fn create_against_unknown_incident_rejected() {
    let (_, _, engine) = setup_with(StaticIncidentClient::with_incidents(vec![
        "inc-9".to_string(),
    ]));
    let err = engine.create(new_action(), &assigner()).await.unwrap_err();
    assert_eq!(
        err,
        WorkflowError::UnknownIncident {
            incident_id: "inc-1".to_string()
        }
    );
}

#[tokio::test]
async fn create_validates_required_fields() {
    let (_, _, engine) = setup();
    let mut blank = new_action();
    blank.description = "  ".to_string();
    let err = engine.create(blank, &assigner()).await.unwrap_err();
    assert_eq!(err.kind(), "validation");
}

// ──────────────────────────────────────
// Overdue derivation (scenarios 1 and 2)
// ──────────────────────────────────────

#[tokio::test]
async fn past_due_pending_action_presents_overdue_on_read() {
    let (store, _, engine) = setup();
    let mut overdue = new_action();
    overdue.due_date = OffsetDateTime::now_utc() - Duration::days(1);
    let created = engine.create(overdue, &assigner()).await.unwrap();

    let fetched = engine.get(&created.id).await.unwrap();
    assert_eq!(fetched.status, DisplayStatus::Overdue);
    // Stored status stays pending; overdue is display only.
    let stored = store.get_action(&created.id).await.unwrap();
    assert_eq!(stored.status, Status::Pending);
}

#[tokio::test]
async fn start_on_overdue_action_keeps_overdue_label_until_due_date_moves() {
    let (store, _, engine) = setup();
    let mut overdue = new_action();
    overdue.due_date = OffsetDateTime::now_utc() - Duration::days(1);
    let created = engine.create(overdue, &assigner()).await.unwrap();

    let started = engine.start(&created.id, &assignee(), 0).await.unwrap();
    assert_eq!(started.version, 1);
    // Underlying status moved, the label is still overdue.
    assert_eq!(started.status, DisplayStatus::Overdue);
    let stored = store.get_action(&created.id).await.unwrap();
    assert_eq!(stored.status, Status::InProgress);

    // Extending the due date clears the label on the next read.
    let edited = engine
        .edit(
            &created.id,
            EditFields {
                due_date: Some(OffsetDateTime::now_utc() + Duration::days(3)),
                ..EditFields::default()
            },
            &admin(),
            1,
        )
        .await
        .unwrap();
    assert_eq!(edited.status, DisplayStatus::InProgress);
}

// ──────────────────────────────────────
// Start / complete
// ──────────────────────────────────────

#[tokio::test]
async fn start_moves_to_in_progress_and_bumps_version() {
    let (_, _, engine) = setup();
    let created = engine.create(new_action(), &assigner()).await.unwrap();
    let started = engine.start(&created.id, &assignee(), 0).await.unwrap();
    assert_eq!(started.status, DisplayStatus::InProgress);
    assert_eq!(started.version, 1);
    assert!(started.updated_at >= created.updated_at);
}

#[tokio::test]
async fn start_by_non_assignee_is_forbidden_even_for_admin() {
    let (store, _, engine) = setup();
    let created = engine.create(new_action(), &assigner()).await.unwrap();
    let err = engine.start(&created.id, &admin(), 0).await.unwrap_err();
    assert_eq!(err.kind(), "forbidden");
    // Nothing changed.
    let stored = store.get_action(&created.id).await.unwrap();
    assert_eq!(stored.status, Status::Pending);
    assert_eq!(stored.version, 0);
}

#[tokio::test]
async fn complete_records_notes_and_timestamp() {
    let (_, _, engine) = setup();
    let started = action_in(&engine, Status::InProgress).await;
    let completed = engine
        .complete(&started.id, "Guard rail installed", &assignee(), 1)
        .await
        .unwrap();
    assert_eq!(completed.status, DisplayStatus::Completed);
    assert_eq!(
        completed.completion_notes.as_deref(),
        Some("Guard rail installed")
    );
    assert!(completed.completed_at.is_some());
    assert_eq!(completed.version, 2);
}

#[tokio::test]
async fn complete_requires_notes() {
    let (_, _, engine) = setup();
    let started = action_in(&engine, Status::InProgress).await;
    let err = engine
        .complete(&started.id, "", &assignee(), 1)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "validation");
}

#[tokio::test]
async fn complete_twice_is_already_completed_not_idempotent() {
    let (_, _, engine) = setup();
    let completed = action_in(&engine, Status::Completed).await;
    let err = engine
        .complete(&completed.id, "again", &assignee(), 2)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "already_completed");
}

// ──────────────────────────────────────
// Verify (scenario 4) and incident-close independence
// ──────────────────────────────────────

#[tokio::test]
async fn verify_sets_verifier_and_closes_incident_once() {
    let (_, incidents, engine) = setup();
    let completed = action_in(&engine, Status::Completed).await;
    let verified = engine.verify(&completed.id, &admin(), 2, true).await.unwrap();
    assert_eq!(verified.status, DisplayStatus::Verified);
    assert_eq!(verified.verified_by.as_deref(), Some("u-admin"));
    assert!(verified.verified_at.is_some());
    assert_eq!(incidents.closed_incidents().await, vec!["inc-1".to_string()]);
}

#[tokio::test]
async fn verify_without_close_leaves_incident_open() {
    let (_, incidents, engine) = setup();
    let completed = action_in(&engine, Status::Completed).await;
    engine.verify(&completed.id, &admin(), 2, false).await.unwrap();
    assert!(incidents.closed_incidents().await.is_empty());
}

#[tokio::test]
async fn verify_requires_completed_status() {
    let (_, _, engine) = setup();
    for status in [Status::Pending, Status::InProgress, Status::Verified] {
        let view = action_in(&engine, status).await;
        let err = engine
            .verify(&view.id, &admin(), view.version, false)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "not_ready_for_verification", "status {status}");
    }
}

#[tokio::test]
async fn verify_by_manager_is_forbidden() {
    let (_, _, engine) = setup();
    let completed = action_in(&engine, Status::Completed).await;
    let err = engine
        .verify(&completed.id, &manager(), 2, false)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "forbidden");
}

#[tokio::test]
async fn failed_incident_close_does_not_roll_back_verification() {
    let (_, _, engine) = setup_with(StaticIncidentClient::permissive().failing_close());
    let completed = action_in(&engine, Status::Completed).await;
    let err = engine
        .verify(&completed.id, &admin(), 2, true)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "incident_close_failed");
    // Confirmed by re-fetch: the transition stuck.
    let fetched = engine.get(&completed.id).await.unwrap();
    assert_eq!(fetched.status, DisplayStatus::Verified);
    assert_eq!(fetched.version, 3);
}

// ──────────────────────────────────────
// Reject (scenario 5)
// ──────────────────────────────────────

#[tokio::test]
async fn reject_reverts_to_in_progress_and_clears_completion() {
    let (_, _, engine) = setup();
    let completed = action_in(&engine, Status::Completed).await;
    let rejected = engine
        .reject(&completed.id, "Insufficient evidence", &admin(), 2)
        .await
        .unwrap();
    assert_eq!(rejected.status, DisplayStatus::InProgress);
    assert_eq!(rejected.completion_notes, None);
    assert_eq!(rejected.completed_at, None);
    assert_eq!(rejected.version, 3);

    // The reason lives on the rejection event, not on the record.
    let history = engine.history(&completed.id).await.unwrap();
    let rejection = history
        .iter()
        .find(|e| e.kind == ActionEventKind::Rejected)
        .unwrap();
    assert_eq!(rejection.detail.as_deref(), Some("Insufficient evidence"));
    assert_eq!(rejection.from_status, Some(Status::Completed));
    assert_eq!(rejection.to_status, Status::InProgress);
}

#[tokio::test]
async fn reject_requires_reason() {
    let (_, _, engine) = setup();
    let completed = action_in(&engine, Status::Completed).await;
    let err = engine
        .reject(&completed.id, " ", &admin(), 2)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "validation");
}

// ──────────────────────────────────────
// Edit
// ──────────────────────────────────────

#[tokio::test]
async fn edit_changes_fields_but_never_status() {
    let (store, _, engine) = setup();
    let created = engine.create(new_action(), &assigner()).await.unwrap();
    let edited = engine
        .edit(
            &created.id,
            EditFields {
                description: Some("replace guard rail entirely".to_string()),
                priority: Some(Priority::Critical),
                assignee_id: Some("u-other".to_string()),
                due_date: None,
            },
            &admin(),
            0,
        )
        .await
        .unwrap();
    assert_eq!(edited.status, DisplayStatus::Pending);
    assert_eq!(edited.priority, Priority::Critical);
    assert_eq!(edited.assignee_id, "u-other");
    assert_eq!(edited.version, 1);
    assert_eq!(store.get_action(&created.id).await.unwrap().status, Status::Pending);
}

#[tokio::test]
async fn edit_by_assignee_is_forbidden() {
    let (_, _, engine) = setup();
    let created = engine.create(new_action(), &assigner()).await.unwrap();
    let err = engine
        .edit(
            &created.id,
            EditFields {
                priority: Some(Priority::Low),
                ..EditFields::default()
            },
            &assignee(),
            0,
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "forbidden");
}

#[tokio::test]
async fn edit_requires_at_least_one_field() {
    let (_, _, engine) = setup();
    let created = engine.create(new_action(), &assigner()).await.unwrap();
    let err = engine
        .edit(&created.id, EditFields::default(), &admin(), 0)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "validation");
}

#[tokio::test]
async fn edit_allowed_on_completed_action_awaiting_verification() {
    let (_, _, engine) = setup();
    let completed = action_in(&engine, Status::Completed).await;
    let edited = engine
        .edit(
            &completed.id,
            EditFields {
                priority: Some(Priority::Low),
                ..EditFields::default()
            },
            &admin(),
            2,
        )
        .await
        .unwrap();
    assert_eq!(edited.status, DisplayStatus::Completed);
}

#[tokio::test]
async fn edit_rejected_on_terminally_closed_actions() {
    let (_, _, engine) = setup();

    // Verified is always terminal.
    let verified = action_in(&engine, Status::Verified).await;
    let err = engine
        .edit(
            &verified.id,
            EditFields {
                priority: Some(Priority::Low),
                ..EditFields::default()
            },
            &admin(),
            verified.version,
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "invalid_transition");

    // Completed without a verification step is terminal closure too.
    let mut no_verify = new_action();
    no_verify.verification_required = false;
    let created = engine.create(no_verify, &assigner()).await.unwrap();
    engine.start(&created.id, &assignee(), 0).await.unwrap();
    engine
        .complete(&created.id, "done", &assignee(), 1)
        .await
        .unwrap();
    let err = engine
        .edit(
            &created.id,
            EditFields {
                priority: Some(Priority::Low),
                ..EditFields::default()
            },
            &admin(),
            2,
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "invalid_transition");
}

// ──────────────────────────────────────
// Transition completeness and versioning
// ──────────────────────────────────────

async fn invoke(
    engine: &TestEngine,
    id: &str,
    event: EventKind,
    version: i64,
) -> Result<ActionView, WorkflowError> {
    match event {
        EventKind::Start => engine.start(id, &assignee(), version).await,
        EventKind::Complete => engine.complete(id, "notes", &assignee(), version).await,
        EventKind::Verify => engine.verify(id, &admin(), version, false).await,
        EventKind::Reject => engine.reject(id, "reason", &admin(), version).await,
        EventKind::Edit => {
            engine
                .edit(
                    id,
                    EditFields {
                        priority: Some(Priority::Low),
                        ..EditFields::default()
                    },
                    &admin(),
                    version,
                )
                .await
        }
    }
}

#[tokio::test]
async fn unlisted_status_event_pairs_fail_and_leave_record_unchanged() {
    let (store, _, engine) = setup();
    for status in Status::ALL {
        for event in EventKind::ALL {
            if capa_core::lookup(status, event).is_some() {
                continue;
            }
            let view = action_in(&engine, status).await;
            let before = store.get_action(&view.id).await.unwrap();
            let err = invoke(&engine, &view.id, event, view.version)
                .await
                .unwrap_err();
            assert!(
                matches!(
                    err,
                    WorkflowError::InvalidTransition { .. }
                        | WorkflowError::AlreadyCompleted { .. }
                        | WorkflowError::NotReadyForVerification { .. }
                ),
                "({status}, {event}) returned {err:?}"
            );
            let after = store.get_action(&view.id).await.unwrap();
            assert_eq!(after.status, before.status, "({status}, {event})");
            assert_eq!(after.version, before.version, "({status}, {event})");
        }
    }
}

#[tokio::test]
async fn versions_increase_by_one_per_accepted_transition() {
    let (_, _, engine) = setup();
    let created = engine.create(new_action(), &assigner()).await.unwrap();
    let started = engine.start(&created.id, &assignee(), 0).await.unwrap();
    let completed = engine
        .complete(&created.id, "done", &assignee(), 1)
        .await
        .unwrap();
    let verified = engine.verify(&created.id, &admin(), 2, false).await.unwrap();
    assert_eq!(
        (created.version, started.version, completed.version, verified.version),
        (0, 1, 2, 3)
    );
}

#[tokio::test]
async fn stale_version_token_conflicts() {
    let (_, _, engine) = setup();
    let created = engine.create(new_action(), &assigner()).await.unwrap();
    let err = engine.start(&created.id, &assignee(), 5).await.unwrap_err();
    assert_eq!(err.kind(), "version_conflict");
}

#[tokio::test]
async fn concurrent_verifies_exactly_one_wins() {
    let (_, _, engine) = setup();
    let completed = action_in(&engine, Status::Completed).await;
    let engine = Arc::new(engine);

    let mut handles = Vec::new();
    for verifier in ["u-admin-a", "u-admin-b"] {
        let engine = engine.clone();
        let id = completed.id.clone();
        handles.push(tokio::spawn(async move {
            let actor = ActorContext::new(verifier, Role::Admin);
            engine.verify(&id, &actor, 2, false).await
        }));
    }

    let mut wins = 0;
    let mut losses = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(view) => {
                assert_eq!(view.status, DisplayStatus::Verified);
                wins += 1;
            }
            // The loser fails at the CAS, or on re-read if the winner
            // committed before the loser fetched.
            Err(
                WorkflowError::VersionConflict { .. }
                | WorkflowError::NotReadyForVerification { .. },
            ) => losses += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!((wins, losses), (1, 1));
}

// ──────────────────────────────────────
// Events
// ──────────────────────────────────────

#[tokio::test]
async fn lifecycle_publishes_one_event_per_command() {
    let store = Arc::new(MemoryStore::new());
    let incidents = Arc::new(StaticIncidentClient::permissive());
    let sink = Arc::new(BroadcastSink::new(16));
    let mut rx = sink.subscribe();
    let engine = LifecycleEngine::new(store, incidents, sink);

    let created = engine.create(new_action(), &assigner()).await.unwrap();
    engine.start(&created.id, &assignee(), 0).await.unwrap();

    let first = rx.recv().await.unwrap();
    assert_eq!(first.kind, ActionEventKind::Created);
    let second = rx.recv().await.unwrap();
    assert_eq!(second.kind, ActionEventKind::Started);
    assert_eq!(second.from_status, Some(Status::Pending));
    assert_eq!(second.to_status, Status::InProgress);
}

#[tokio::test]
async fn history_for_missing_action_is_not_found() {
    let (_, _, engine) = setup();
    let err = engine.history("ca-absent").await.unwrap_err();
    assert_eq!(err.kind(), "not_found");
}

// ──────────────────────────────────────
// Evidence
// ──────────────────────────────────────

fn upload(name: &str, content_type: &str, bytes: &[u8]) -> UploadFile {
    UploadFile {
        file_name: name.to_string(),
        content_type: content_type.to_string(),
        bytes: bytes.to_vec(),
    }
}

#[tokio::test]
async fn evidence_round_trips_in_upload_order() {
    let (_, _, engine) = setup();
    let started = action_in(&engine, Status::InProgress).await;
    let stored = engine
        .add_evidence(
            &started.id,
            vec![
                upload("before.jpg", "image/jpeg", b"before"),
                upload("after.jpg", "image/jpeg", b"after"),
            ],
            "photos of the fix",
            &assignee(),
        )
        .await
        .unwrap();
    assert_eq!(stored.len(), 2);

    let listed = engine.list_evidence(&started.id).await.unwrap();
    let names: Vec<&str> = listed.iter().map(|e| e.file_name.as_str()).collect();
    assert_eq!(names, ["before.jpg", "after.jpg"]);
    assert_eq!(listed[0].uploader_id, "u-worker");
}

#[tokio::test]
async fn evidence_checksum_is_sha256_of_content() {
    let (_, _, engine) = setup();
    let started = action_in(&engine, Status::InProgress).await;
    let stored = engine
        .add_evidence(
            &started.id,
            vec![upload("note.txt", "text/plain", b"hello")],
            "",
            &assignee(),
        )
        .await
        .unwrap();
    assert_eq!(
        stored[0].sha256,
        "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
    );
    assert_eq!(stored[0].size_bytes, 5);
}

#[tokio::test]
async fn evidence_rejected_on_closed_actions() {
    let (_, _, engine) = setup();
    for status in [Status::Completed, Status::Verified] {
        let view = action_in(&engine, status).await;
        let err = engine
            .add_evidence(
                &view.id,
                vec![upload("late.jpg", "image/jpeg", b"late")],
                "",
                &assignee(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "action_closed", "status {status}");
    }
}

#[tokio::test]
async fn one_invalid_file_blocks_the_whole_batch() {
    let (_, _, engine) = setup();
    let started = action_in(&engine, Status::InProgress).await;
    let err = engine
        .add_evidence(
            &started.id,
            vec![
                upload("ok.jpg", "image/jpeg", b"fine"),
                upload("bad.exe", "application/octet-stream", b"nope"),
            ],
            "",
            &assignee(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "invalid_file");
    // Nothing was stored.
    assert!(engine.list_evidence(&started.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn tightened_policy_applies_to_uploads() {
    let engine = LifecycleEngine::new(
        Arc::new(MemoryStore::new()),
        Arc::new(StaticIncidentClient::permissive()),
        Arc::new(NullSink),
    )
    .with_policy(EvidencePolicy {
        max_file_bytes: 8,
        ..EvidencePolicy::default()
    });
    let started = action_in(&engine, Status::InProgress).await;

    let err = engine
        .add_evidence(
            &started.id,
            vec![upload("big.txt", "text/plain", b"nine bytes or more")],
            "",
            &assignee(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "invalid_file");

    // Files within the tightened cap still pass.
    engine
        .add_evidence(
            &started.id,
            vec![upload("ok.txt", "text/plain", b"tiny")],
            "",
            &assignee(),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn evidence_upload_does_not_touch_the_version() {
    let (_, _, engine) = setup();
    let started = action_in(&engine, Status::InProgress).await;
    engine
        .add_evidence(
            &started.id,
            vec![upload("a.jpg", "image/jpeg", b"a")],
            "",
            &assignee(),
        )
        .await
        .unwrap();
    assert_eq!(engine.get(&started.id).await.unwrap().version, started.version);
}
