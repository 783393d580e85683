use std::future::Future;
use std::sync::Arc;

use capa_core::Status;

use super::{make_action, TestResult};
use crate::traits::{ActionRepository, EvidenceStore};
use crate::StorageError;

/// Number of concurrent tasks to spawn in each test.
const N: usize = 10;

pub(super) async fn run_concurrent_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: ActionRepository + EvidenceStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "concurrent",
        "concurrent_updates_exactly_one_wins",
        concurrent_updates_exactly_one_wins(factory).await,
    ));
    results.push(TestResult::from_result(
        "concurrent",
        "concurrent_updates_different_actions_all_succeed",
        concurrent_updates_different_actions_all_succeed(factory).await,
    ));

    results
}

/// N spawned tasks race to update the same action from version 0. Exactly
/// one must win; every other task must get VersionConflict.
async fn concurrent_updates_exactly_one_wins<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ActionRepository + EvidenceStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);
    storage
        .create_action(make_action("ca-1"))
        .await
        .map_err(|e| format!("create: {e}"))?;

    let mut handles = Vec::new();
    for _ in 0..N {
        let s = storage.clone();
        handles.push(tokio::spawn(async move {
            let mut updated = make_action("ca-1");
            updated.status = Status::InProgress;
            s.update_action("ca-1", 0, updated).await
        }));
    }

    let mut wins = 0usize;
    let mut conflicts = 0usize;
    for handle in handles {
        match handle.await.map_err(|e| format!("join: {e}"))? {
            Ok(_) => wins += 1,
            Err(StorageError::VersionConflict { .. }) => conflicts += 1,
            Err(e) => return Err(format!("unexpected error: {e}")),
        }
    }
    if wins != 1 || conflicts != N - 1 {
        return Err(format!("expected 1 win / {} conflicts, got {wins}/{conflicts}", N - 1));
    }

    let fetched = storage
        .get_action("ca-1")
        .await
        .map_err(|e| format!("get: {e}"))?;
    if fetched.version != 1 {
        return Err(format!("final version must be 1, got {}", fetched.version));
    }
    Ok(())
}

/// Updates against distinct actions never conflict with each other.
async fn concurrent_updates_different_actions_all_succeed<S, F, Fut>(
    factory: &F,
) -> Result<(), String>
where
    S: ActionRepository + EvidenceStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);
    for i in 0..N {
        storage
            .create_action(make_action(&format!("ca-{i}")))
            .await
            .map_err(|e| format!("create ca-{i}: {e}"))?;
    }

    let mut handles = Vec::new();
    for i in 0..N {
        let s = storage.clone();
        handles.push(tokio::spawn(async move {
            let id = format!("ca-{i}");
            let mut updated = make_action(&id);
            updated.status = Status::InProgress;
            s.update_action(&id, 0, updated).await
        }));
    }

    for handle in handles {
        handle
            .await
            .map_err(|e| format!("join: {e}"))?
            .map_err(|e| format!("update failed: {e}"))?;
    }
    Ok(())
}
