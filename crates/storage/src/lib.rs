//! Durable storage for the CAPA workflow.
//!
//! Defines the [`ActionRepository`] and [`EvidenceStore`] traits every
//! backend implements, the in-memory reference backend, and a
//! backend-agnostic conformance suite (OCC semantics, evidence gating,
//! concurrent exactly-one-wins) that future backends run unchanged.

pub mod conformance;
mod error;
mod memory;
mod traits;

pub use error::StorageError;
pub use memory::MemoryStore;
pub use traits::{ActionFilter, ActionRepository, EvidenceStore};
