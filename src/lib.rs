//! psor: playbook-driven security orchestration and remediation.
//!
//! Loads a remediation playbook, gates every step against its safety
//! policies, runs each allowed step in an isolated plugin sandbox and
//! attempts a compensating rollback when a step fails.

pub mod cli;
pub mod config;
pub mod error;
pub mod executor;
pub mod intake;
pub mod logging;
pub mod playbook;
pub mod ui;
