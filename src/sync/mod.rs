//! Reconciliation engine: parallel fetch phase, sequential operation
//! execution, per-project state machine, and post-update hooks.

pub mod engine;
pub mod hooks;
pub mod project;

pub use engine::{Engine, UpdateOptions, UpdateSummary};
