use std::future::Future;

use time::macros::datetime;

use capa_core::Status;

use super::{make_action, make_evidence, TestResult};
use crate::traits::{ActionRepository, EvidenceStore};
use crate::StorageError;

pub(super) async fn run_evidence_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: ActionRepository + EvidenceStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "evidence",
        "append_then_list_in_upload_order",
        append_then_list_in_upload_order(factory).await,
    ));
    results.push(TestResult::from_result(
        "evidence",
        "batch_append_stores_all_records_in_order",
        batch_append_stores_all_records_in_order(factory).await,
    ));
    results.push(TestResult::from_result(
        "evidence",
        "append_to_closed_action_rejected",
        append_to_closed_action_rejected(factory).await,
    ));
    results.push(TestResult::from_result(
        "evidence",
        "append_to_missing_action_not_found",
        append_to_missing_action_not_found(factory).await,
    ));
    results.push(TestResult::from_result(
        "evidence",
        "append_does_not_bump_action_version",
        append_does_not_bump_action_version(factory).await,
    ));
    results.push(TestResult::from_result(
        "evidence",
        "list_for_action_without_evidence_is_empty",
        list_for_action_without_evidence_is_empty(factory).await,
    ));

    results
}

async fn append_then_list_in_upload_order<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ActionRepository + EvidenceStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    storage
        .create_action(make_action("ca-1"))
        .await
        .map_err(|e| format!("create: {e}"))?;

    for (i, at) in [
        datetime!(2026-01-02 09:00 UTC),
        datetime!(2026-01-02 10:00 UTC),
        datetime!(2026-01-02 11:00 UTC),
    ]
    .iter()
    .enumerate()
    {
        storage
            .append_evidence(vec![make_evidence(&format!("ev-{i}"), "ca-1", *at)])
            .await
            .map_err(|e| format!("append ev-{i}: {e}"))?;
    }

    let listed = storage
        .list_evidence("ca-1")
        .await
        .map_err(|e| format!("list: {e}"))?;
    let ids: Vec<&str> = listed.iter().map(|e| e.id.as_str()).collect();
    if ids != ["ev-0", "ev-1", "ev-2"] {
        return Err(format!("wrong order: {ids:?}"));
    }
    Ok(())
}

async fn append_to_closed_action_rejected<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ActionRepository + EvidenceStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    for closed in [Status::Completed, Status::Verified] {
        let storage = factory().await;
        storage
            .create_action(make_action("ca-1"))
            .await
            .map_err(|e| format!("create: {e}"))?;
        let mut updated = make_action("ca-1");
        updated.status = closed;
        storage
            .update_action("ca-1", 0, updated)
            .await
            .map_err(|e| format!("update: {e}"))?;

        let batch = vec![
            make_evidence("ev-late-0", "ca-1", datetime!(2026-01-03 00:00 UTC)),
            make_evidence("ev-late-1", "ca-1", datetime!(2026-01-03 01:00 UTC)),
        ];
        match storage.append_evidence(batch).await {
            Err(StorageError::ActionClosed { status, .. }) if status == closed => {}
            Err(e) => return Err(format!("expected ActionClosed for {closed}, got: {e}")),
            Ok(()) => return Err(format!("append accepted on {closed} action")),
        }
        // The rejection covers the whole batch; no record may have landed.
        let listed = storage
            .list_evidence("ca-1")
            .await
            .map_err(|e| format!("list: {e}"))?;
        if !listed.is_empty() {
            return Err(format!(
                "rejected batch left {} records behind on {closed} action",
                listed.len()
            ));
        }
    }
    Ok(())
}

async fn batch_append_stores_all_records_in_order<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ActionRepository + EvidenceStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    storage
        .create_action(make_action("ca-1"))
        .await
        .map_err(|e| format!("create: {e}"))?;

    let batch = vec![
        make_evidence("ev-0", "ca-1", datetime!(2026-01-02 09:00 UTC)),
        make_evidence("ev-1", "ca-1", datetime!(2026-01-02 10:00 UTC)),
        make_evidence("ev-2", "ca-1", datetime!(2026-01-02 11:00 UTC)),
    ];
    storage
        .append_evidence(batch)
        .await
        .map_err(|e| format!("append batch: {e}"))?;

    let listed = storage
        .list_evidence("ca-1")
        .await
        .map_err(|e| format!("list: {e}"))?;
    let ids: Vec<&str> = listed.iter().map(|e| e.id.as_str()).collect();
    if ids != ["ev-0", "ev-1", "ev-2"] {
        return Err(format!("wrong batch contents or order: {ids:?}"));
    }
    Ok(())
}

async fn append_to_missing_action_not_found<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ActionRepository + EvidenceStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    let ev = make_evidence("ev-1", "ca-absent", datetime!(2026-01-03 00:00 UTC));
    match storage.append_evidence(vec![ev]).await {
        Err(StorageError::ActionNotFound { .. }) => Ok(()),
        Err(e) => Err(format!("expected ActionNotFound, got: {e}")),
        Ok(()) => Err("append to missing action succeeded".to_string()),
    }
}

async fn append_does_not_bump_action_version<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ActionRepository + EvidenceStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    storage
        .create_action(make_action("ca-1"))
        .await
        .map_err(|e| format!("create: {e}"))?;
    storage
        .append_evidence(vec![make_evidence(
            "ev-1",
            "ca-1",
            datetime!(2026-01-02 00:00 UTC),
        )])
        .await
        .map_err(|e| format!("append: {e}"))?;

    let fetched = storage
        .get_action("ca-1")
        .await
        .map_err(|e| format!("get: {e}"))?;
    if fetched.version != 0 {
        return Err(format!(
            "evidence append changed version to {}",
            fetched.version
        ));
    }
    Ok(())
}

async fn list_for_action_without_evidence_is_empty<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ActionRepository + EvidenceStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    storage
        .create_action(make_action("ca-1"))
        .await
        .map_err(|e| format!("create: {e}"))?;
    let listed = storage
        .list_evidence("ca-1")
        .await
        .map_err(|e| format!("list: {e}"))?;
    if !listed.is_empty() {
        return Err(format!("expected no evidence, got {}", listed.len()));
    }
    Ok(())
}
