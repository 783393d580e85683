//! The CAPA lifecycle engine.
//!
//! Orchestrates every corrective-action command: transition validation
//! against the rule table, role gating, optimistic-concurrency writes
//! through the repository, evidence acceptance, and the verify-then-close
//! coordination with the external incident service. All state lives in the
//! storage backend; the engine itself holds no mutable state.

mod events;
mod evidence;
mod ids;
mod incident;
mod lifecycle;
mod verification;
mod view;

pub use events::{BroadcastSink, EventSink, NullSink};
pub use evidence::{EvidencePolicy, UploadFile};
pub use incident::{IncidentClient, IncidentError, StaticIncidentClient};
pub use lifecycle::{LifecycleEngine, ListFilter};
pub use verification::VerificationCoordinator;
pub use view::ActionView;
