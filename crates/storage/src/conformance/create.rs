use std::future::Future;

use super::{make_action, TestResult};
use crate::traits::{ActionFilter, ActionRepository, EvidenceStore};
use crate::StorageError;

pub(super) async fn run_create_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: ActionRepository + EvidenceStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "create",
        "create_then_get_round_trips",
        create_then_get_round_trips(factory).await,
    ));
    results.push(TestResult::from_result(
        "create",
        "duplicate_create_rejected",
        duplicate_create_rejected(factory).await,
    ));
    results.push(TestResult::from_result(
        "create",
        "get_missing_returns_not_found",
        get_missing_returns_not_found(factory).await,
    ));
    results.push(TestResult::from_result(
        "create",
        "list_filters_by_assignee",
        list_filters_by_assignee(factory).await,
    ));
    results.push(TestResult::from_result(
        "create",
        "list_filters_by_incident",
        list_filters_by_incident(factory).await,
    ));
    results.push(TestResult::from_result(
        "create",
        "list_with_no_match_is_empty_not_error",
        list_with_no_match_is_empty_not_error(factory).await,
    ));

    results
}

async fn create_then_get_round_trips<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ActionRepository + EvidenceStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    let action = make_action("ca-1");
    storage
        .create_action(action.clone())
        .await
        .map_err(|e| format!("create: {e}"))?;
    let fetched = storage
        .get_action("ca-1")
        .await
        .map_err(|e| format!("get: {e}"))?;
    if fetched != action {
        return Err("fetched record differs from created record".to_string());
    }
    if fetched.version != 0 {
        return Err(format!("expected version 0, got {}", fetched.version));
    }
    Ok(())
}

async fn duplicate_create_rejected<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ActionRepository + EvidenceStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    storage
        .create_action(make_action("ca-1"))
        .await
        .map_err(|e| format!("first create: {e}"))?;
    match storage.create_action(make_action("ca-1")).await {
        Err(StorageError::ActionExists { action_id }) if action_id == "ca-1" => Ok(()),
        Err(e) => Err(format!("expected ActionExists, got: {e}")),
        Ok(()) => Err("duplicate create succeeded".to_string()),
    }
}

async fn get_missing_returns_not_found<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ActionRepository + EvidenceStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    match storage.get_action("ca-absent").await {
        Err(StorageError::ActionNotFound { action_id }) if action_id == "ca-absent" => Ok(()),
        Err(e) => Err(format!("expected ActionNotFound, got: {e}")),
        Ok(_) => Err("get of missing action succeeded".to_string()),
    }
}

async fn list_filters_by_assignee<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ActionRepository + EvidenceStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    let mut a = make_action("ca-1");
    a.assignee_id = "u-alpha".to_string();
    let mut b = make_action("ca-2");
    b.assignee_id = "u-beta".to_string();
    storage
        .create_action(a)
        .await
        .map_err(|e| format!("create a: {e}"))?;
    storage
        .create_action(b)
        .await
        .map_err(|e| format!("create b: {e}"))?;

    let listed = storage
        .list_actions(&ActionFilter::by_assignee("u-alpha"))
        .await
        .map_err(|e| format!("list: {e}"))?;
    if listed.len() != 1 || listed[0].id != "ca-1" {
        return Err(format!(
            "expected [ca-1], got {:?}",
            listed.iter().map(|x| x.id.clone()).collect::<Vec<_>>()
        ));
    }
    Ok(())
}

async fn list_filters_by_incident<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ActionRepository + EvidenceStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    let mut a = make_action("ca-1");
    a.incident_id = "inc-7".to_string();
    let b = make_action("ca-2");
    storage
        .create_action(a)
        .await
        .map_err(|e| format!("create a: {e}"))?;
    storage
        .create_action(b)
        .await
        .map_err(|e| format!("create b: {e}"))?;

    let listed = storage
        .list_actions(&ActionFilter::by_incident("inc-7"))
        .await
        .map_err(|e| format!("list: {e}"))?;
    if listed.len() != 1 || listed[0].id != "ca-1" {
        return Err(format!("expected [ca-1], got {} records", listed.len()));
    }
    Ok(())
}

async fn list_with_no_match_is_empty_not_error<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ActionRepository + EvidenceStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    let listed = storage
        .list_actions(&ActionFilter::by_assignee("u-nobody"))
        .await
        .map_err(|e| format!("list must not error on no match: {e}"))?;
    if !listed.is_empty() {
        return Err(format!("expected empty list, got {} records", listed.len()));
    }
    Ok(())
}
