//! jiri: a multi-repository workspace manager.
//!
//! A declarative manifest pins a set of git repositories to revisions
//! or tracking branches; one reconciliation brings the local tree into
//! agreement with it by cloning, moving, rebasing, and (opt-in)
//! deleting projects, then running project-scoped hooks.

pub mod cli;
pub mod core;
pub mod git;
pub mod remote;
pub mod sync;
pub mod util;
