//! Reconcile outcomes and their scheduling

use std::time::Duration;

use kube::runtime::controller::Action;

/// Delay used for "retry now" so a persistent conflict cannot spin the worker
pub const RETRY_NOW_DELAY: Duration = Duration::from_secs(1);

/// What the controller should do after a reconcile pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileDecision {
    /// Target state reached; wait for the next watch event
    Done,
    /// A write failed; try again right away
    RetryNow,
    /// Verdict unresolved; re-validate after the interval
    RetryAfter(Duration),
}

impl ReconcileDecision {
    pub fn into_action(self) -> Action {
        match self {
            ReconcileDecision::Done => Action::await_change(),
            ReconcileDecision::RetryNow => Action::requeue(RETRY_NOW_DELAY),
            ReconcileDecision::RetryAfter(interval) => Action::requeue(interval),
        }
    }
}
