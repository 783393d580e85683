use std::future::Future;

use capa_core::Status;

use super::{make_action, TestResult};
use crate::traits::{ActionRepository, EvidenceStore};
use crate::StorageError;

pub(super) async fn run_version_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: ActionRepository + EvidenceStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "version",
        "update_with_correct_version_succeeds",
        update_with_correct_version_succeeds(factory).await,
    ));
    results.push(TestResult::from_result(
        "version",
        "versions_increment_sequentially",
        versions_increment_sequentially(factory).await,
    ));
    results.push(TestResult::from_result(
        "version",
        "update_with_wrong_version_conflicts",
        update_with_wrong_version_conflicts(factory).await,
    ));
    results.push(TestResult::from_result(
        "version",
        "conflict_leaves_record_unchanged",
        conflict_leaves_record_unchanged(factory).await,
    ));
    results.push(TestResult::from_result(
        "version",
        "stale_version_after_intervening_update",
        stale_version_after_intervening_update(factory).await,
    ));

    results
}

async fn update_with_correct_version_succeeds<S, F, Fut>(factory: &F) -> Result<(), String>
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

    let mut updated = make_action("ca-1");
    updated.status = Status::InProgress;
    let new_version = storage
        .update_action("ca-1", 0, updated)
        .await
        .map_err(|e| format!("update: {e}"))?;
    if new_version != 1 {
        return Err(format!("expected new version 1, got {new_version}"));
    }
    let fetched = storage
        .get_action("ca-1")
        .await
        .map_err(|e| format!("get: {e}"))?;
    if fetched.status != Status::InProgress || fetched.version != 1 {
        return Err(format!(
            "expected in_progress at version 1, got {} at {}",
            fetched.status, fetched.version
        ));
    }
    Ok(())
}

async fn versions_increment_sequentially<S, F, Fut>(factory: &F) -> Result<(), String>
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

    for expected in 0..5 {
        let current = storage
            .get_action("ca-1")
            .await
            .map_err(|e| format!("get: {e}"))?;
        let new_version = storage
            .update_action("ca-1", expected, current)
            .await
            .map_err(|e| format!("update at {expected}: {e}"))?;
        if new_version != expected + 1 {
            return Err(format!(
                "expected version {} after update, got {new_version}",
                expected + 1
            ));
        }
    }
    Ok(())
}

async fn update_with_wrong_version_conflicts<S, F, Fut>(factory: &F) -> Result<(), String>
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

    match storage.update_action("ca-1", 3, make_action("ca-1")).await {
        Err(StorageError::VersionConflict {
            action_id,
            expected_version,
        }) => {
            if action_id != "ca-1" || expected_version != 3 {
                return Err(format!(
                    "conflict fields wrong: {action_id}/{expected_version}"
                ));
            }
            Ok(())
        }
        Err(e) => Err(format!("expected VersionConflict, got: {e}")),
        Ok(v) => Err(format!("stale update succeeded with version {v}")),
    }
}

async fn conflict_leaves_record_unchanged<S, F, Fut>(factory: &F) -> Result<(), String>
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

    let mut poisoned = make_action("ca-1");
    poisoned.status = Status::Verified;
    poisoned.description = "should never be stored".to_string();
    let _ = storage.update_action("ca-1", 7, poisoned).await;

    let fetched = storage
        .get_action("ca-1")
        .await
        .map_err(|e| format!("get: {e}"))?;
    if fetched.status != Status::Pending || fetched.version != 0 {
        return Err(format!(
            "conflict mutated the record: {} at version {}",
            fetched.status, fetched.version
        ));
    }
    Ok(())
}

async fn stale_version_after_intervening_update<S, F, Fut>(factory: &F) -> Result<(), String>
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

    // First writer moves the record to version 1.
    storage
        .update_action("ca-1", 0, make_action("ca-1"))
        .await
        .map_err(|e| format!("first update: {e}"))?;

    // Second writer still holds version 0 and must lose.
    match storage.update_action("ca-1", 0, make_action("ca-1")).await {
        Err(StorageError::VersionConflict { .. }) => Ok(()),
        Err(e) => Err(format!("expected VersionConflict, got: {e}")),
        Ok(_) => Err("stale writer won".to_string()),
    }
}
