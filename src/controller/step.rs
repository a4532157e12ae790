//! Outcome of one reconcile step.

use std::time::Duration;

use kube::runtime::controller::Action;

use crate::controller::error::{Error, Result};

/// Requeue used while waiting on pods, services or the cluster API.
pub const SHORT_RETRY: Duration = Duration::from_secs(5);

/// Requeue used while the managed cluster is decommissioning.
pub const DECOMMISSION_RETRY: Duration = Duration::from_secs(10);

/// Periodic resync once a cluster is settled.
pub const RESYNC_INTERVAL: Duration = Duration::from_secs(300);

/// What a step achieved.
///
/// Steps return `Result<StepResult>`; the driver folds errors into
/// [`StepResult::Failed`] and maps the final value to a controller [`Action`].
#[derive(Debug)]
pub enum StepResult {
    /// Nothing left to do in this step.
    Done,
    /// Come back after the given delay (zero means immediately).
    RetryAfter(Duration),
    /// The step failed; the work queue backs off.
    Failed(Error),
}

impl StepResult {
    pub fn immediately() -> Self {
        StepResult::RetryAfter(Duration::ZERO)
    }

    pub fn is_done(&self) -> bool {
        matches!(self, StepResult::Done)
    }

    /// Collapse a step's result.
    pub fn from_result(result: Result<StepResult>) -> Self {
        result.unwrap_or_else(StepResult::Failed)
    }

    /// Interpret for the controller runtime.
    pub fn into_action(self) -> Result<Action> {
        match self {
            StepResult::Done => Ok(Action::requeue(RESYNC_INTERVAL)),
            StepResult::RetryAfter(delay) => Ok(Action::requeue(delay)),
            StepResult::Failed(err) => Err(err),
        }
    }
}
