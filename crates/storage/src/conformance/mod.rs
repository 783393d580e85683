//! Conformance test suite for CAPA storage backends.
//!
//! A backend-agnostic suite that any [`ActionRepository`] + [`EvidenceStore`]
//! implementation can run to verify correctness:
//!
//! - **create**: insertion, duplicate detection, filtered listing
//! - **version**: version-validated updates, conflict detection,
//!   conflicts leave the stored record untouched
//! - **concurrent**: spawned-task races where exactly one update wins
//! - **evidence**: append-only upload ordering, atomic batch appends, and
//!   the write-time closed-action gate
//!
//! # Usage
//!
//! Backend crates call [`run_conformance_suite`] with a factory that creates
//! a fresh, empty storage instance per test:
//!
//! ```ignore
//! use capa_storage::conformance::run_conformance_suite;
//!
//! #[tokio::test]
//! async fn postgres_conformance() {
//!     let report = run_conformance_suite(|| async {
//!         create_test_postgres_storage().await
//!     }).await;
//!     assert_eq!(report.failed, 0, "{report}");
//! }
//! ```

mod concurrent;
mod create;
mod evidence;
mod version;

use std::fmt;
use std::future::Future;

use time::macros::datetime;
use time::OffsetDateTime;

use capa_core::{CorrectiveAction, Evidence, Priority, Status};

use crate::traits::{ActionRepository, EvidenceStore};

/// Result of a single conformance test.
#[derive(Debug, Clone)]
pub struct TestResult {
    /// Test category (e.g. "create", "version", "concurrent").
    pub category: String,
    /// Test name (e.g. "update_with_wrong_version_conflicts").
    pub name: String,
    /// Whether the test passed.
    pub passed: bool,
    /// Error message if the test failed.
    pub message: Option<String>,
}

impl TestResult {
    fn from_result(category: &str, name: &str, result: Result<(), String>) -> Self {
        let (passed, message) = match result {
            Ok(()) => (true, None),
            Err(msg) => (false, Some(msg)),
        };
        Self {
            category: category.to_string(),
            name: name.to_string(),
            passed,
            message,
        }
    }
}

/// Aggregated report from a full conformance suite run.
#[derive(Debug, Clone)]
pub struct ConformanceReport {
    pub results: Vec<TestResult>,
    pub passed: usize,
    pub failed: usize,
    pub total: usize,
}

impl fmt::Display for ConformanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Conformance: {}/{} passed ({} failed)",
            self.passed, self.total, self.failed
        )?;
        for r in &self.results {
            if !r.passed {
                writeln!(
                    f,
                    "  FAIL [{}/{}]: {}",
                    r.category,
                    r.name,
                    r.message.as_deref().unwrap_or("(no message)")
                )?;
            }
        }
        Ok(())
    }
}

/// Run the full conformance suite against a storage backend.
///
/// The `factory` is called once per test to create a fresh, empty storage
/// instance, ensuring test isolation.
pub async fn run_conformance_suite<S, F, Fut>(factory: F) -> ConformanceReport
where
    S: ActionRepository + EvidenceStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();
    results.extend(create::run_create_tests(&factory).await);
    results.extend(version::run_version_tests(&factory).await);
    results.extend(concurrent::run_concurrent_tests(&factory).await);
    results.extend(evidence::run_evidence_tests(&factory).await);

    let passed = results.iter().filter(|r| r.passed).count();
    let failed = results.len() - passed;
    let total = results.len();
    ConformanceReport {
        results,
        passed,
        failed,
        total,
    }
}

// ── Fixtures ────────────────────────────────────────────────────────────────

pub(super) const FIXED_CREATED_AT: OffsetDateTime = datetime!(2026-01-01 00:00 UTC);

/// A pending corrective action at version 0 with deterministic timestamps.
pub(super) fn make_action(id: &str) -> CorrectiveAction {
    CorrectiveAction {
        id: id.to_string(),
        incident_id: "inc-1".to_string(),
        description: "install machine guard".to_string(),
        action_type: "engineering_control".to_string(),
        priority: Priority::High,
        status: Status::Pending,
        assignee_id: "u-worker".to_string(),
        assigner_id: "u-officer".to_string(),
        due_date: datetime!(2026-02-01 00:00 UTC),
        completion_notes: None,
        completed_at: None,
        verified_at: None,
        verified_by: None,
        verification_required: true,
        created_at: FIXED_CREATED_AT,
        updated_at: FIXED_CREATED_AT,
        version: 0,
    }
}

pub(super) fn make_evidence(id: &str, action_id: &str, at: OffsetDateTime) -> Evidence {
    Evidence {
        id: id.to_string(),
        action_id: action_id.to_string(),
        file_name: format!("{id}.jpg"),
        content_type: "image/jpeg".to_string(),
        size_bytes: 1024,
        sha256: "00".repeat(32),
        storage_ref: format!("mem://{id}"),
        description: "photo of installed guard".to_string(),
        uploader_id: "u-worker".to_string(),
        uploaded_at: at,
    }
}
