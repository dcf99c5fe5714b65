//! Reconciliation between the in-memory diary view, the persisted store, and
//! the feedback gateway.

mod confirm;
mod controller;

pub use confirm::{AutoConfirm, Confirm, DenyAll};
pub use controller::{ControllerError, DeleteOutcome, DiaryController, Phase, SubmitOutcome};
