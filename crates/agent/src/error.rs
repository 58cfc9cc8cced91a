//! Terminal loop errors and the errors of the planner and gate seams.

use planwright_core::{ProviderError, StepId};
use thiserror::Error;

/// Why a planner call produced no usable plan.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("Reasoning backend error: {0}")]
    Backend(#[from] ProviderError),

    #[error("Could not parse plan: {0}")]
    Parse(String),

    #[error("Plan has no steps")]
    Empty,

    #[error("Invalid plan: {0}")]
    Invalid(String),
}

/// Errors that end a request. Each maps to one `error` event.
#[derive(Debug, Clone, Error)]
pub enum LoopError {
    #[error("Planning failed: {0}")]
    PlanningFailed(String),

    #[error("Re-plan cap of {cap} exceeded: {reason}")]
    ReplanCapExceeded { cap: u32, reason: String },

    #[error("Reasoning backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl LoopError {
    /// Stable machine-readable kind carried by the `error` event.
    pub fn kind(&self) -> &'static str {
        match self {
            LoopError::PlanningFailed(_) => "planning_failed",
            LoopError::ReplanCapExceeded { .. } => "replan_cap_exceeded",
            LoopError::BackendUnavailable(_) => "backend_unavailable",
            LoopError::Cancelled => "cancelled",
            LoopError::Internal(_) => "internal",
        }
    }
}

impl From<PlanError> for LoopError {
    fn from(err: PlanError) -> Self {
        match err {
            PlanError::Backend(e) => LoopError::BackendUnavailable(e.to_string()),
            other => LoopError::PlanningFailed(other.to_string()),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GateError {
    #[error("Step {0} is not awaiting confirmation")]
    NotPending(StepId),

    #[error("Request {0} is not active")]
    UnknownRequest(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable() {
        assert_eq!(LoopError::PlanningFailed("x".into()).kind(), "planning_failed");
        assert_eq!(
            LoopError::ReplanCapExceeded { cap: 3, reason: "x".into() }.kind(),
            "replan_cap_exceeded"
        );
        assert_eq!(LoopError::Cancelled.kind(), "cancelled");
    }

    #[test]
    fn backend_plan_errors_are_infrastructure_faults() {
        let err: LoopError = PlanError::Backend(ProviderError::Timeout("30s".into())).into();
        assert_eq!(err.kind(), "backend_unavailable");
        let err: LoopError = PlanError::Empty.into();
        assert_eq!(err.kind(), "planning_failed");
    }
}
