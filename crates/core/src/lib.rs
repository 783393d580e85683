//! Domain core for the CAPA corrective-action workflow.
//!
//! This crate is pure data and rules: the corrective-action record and its
//! invariants, the actor/role model, the transition rule table, domain
//! events, and the workflow error taxonomy. No I/O, no async -- the engine
//! and storage crates build on top of these types.

mod actor;
mod error;
mod event;
mod model;
mod rules;

pub use actor::{ActorContext, Role};
pub use error::WorkflowError;
pub use event::{ActionEvent, ActionEventKind};
pub use model::{
    CorrectiveAction, DisplayStatus, EditFields, Evidence, NewAction, Priority, Status,
};
pub use rules::{lookup, rules, ActorGate, EventKind, TransitionRule, ASSIGNER_ROLES};
