//! Controller module for ais-operator.
//!
//! Contains the reconciliation loop, the lifecycle state machine, the daemon
//! group controllers and the teardown orchestrator.
//!
//! One pass of [`reconciler::Reconciler`] dispatches on the stored state:
//! - bootstrap states (`bootstrap`)
//! - the Created/Ready loop over proxies and targets (`daemon`, `proxy`, `target`, `config_sync`)
//! - graceful shutdown (`reconciler`)
//! - teardown after deletion (`cleanup`)

// Shared modules
pub mod common;
pub mod context;
pub mod error;
pub mod status;
pub mod step;

// Lifecycle
pub mod cluster_state_machine;
pub mod reconciler;

// Phases
pub mod bootstrap;
pub mod cleanup;
pub mod config_sync;

// Daemon groups
pub mod daemon;
pub mod drift;
pub mod proxy;
pub mod target;
