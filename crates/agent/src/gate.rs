//! Confirmation gate — suspends a step until the caller decides on it.
//!
//! One [`ConfirmationHub`] exists per request. The controller registers the
//! step before announcing `confirmation_required`, then waits on the
//! returned [`PendingConfirmation`]; the caller's response is routed back
//! by step id through [`ConfirmationHub::resolve`]. There is no local
//! timeout: only a response or cancellation ends the wait.

use planwright_core::{ConfirmationDecision, ConfirmationResponse, StepId};
use std::collections::HashMap;
use tokio::sync::{Mutex, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::GateError;

/// How a modification changes the step's tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolChange {
    Keep,
    /// Make the step tool-free.
    Clear,
    Replace(String),
}

/// The resolved state of a gated step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Approved {
        feedback: Option<String>,
    },
    Rejected {
        feedback: Option<String>,
    },
    Modified {
        goal: Option<String>,
        tool: ToolChange,
        feedback: Option<String>,
    },
    /// The request was cancelled while waiting.
    Cancelled,
}

impl From<ConfirmationResponse> for GateDecision {
    fn from(response: ConfirmationResponse) -> Self {
        let feedback = response.feedback.filter(|f| !f.trim().is_empty());
        match response.decision {
            ConfirmationDecision::Approve => GateDecision::Approved { feedback },
            ConfirmationDecision::Reject => GateDecision::Rejected { feedback },
            ConfirmationDecision::Modify => {
                let tool = match response.modified_tool.as_deref().map(str::trim) {
                    None | Some("") => ToolChange::Keep,
                    Some(t) if t.eq_ignore_ascii_case("none") => ToolChange::Clear,
                    Some(t) => ToolChange::Replace(t.to_string()),
                };
                GateDecision::Modified {
                    goal: response.modified_goal.filter(|g| !g.trim().is_empty()),
                    tool,
                    feedback,
                }
            }
        }
    }
}

/// Pending confirmations of one request, keyed by step id.
#[derive(Default)]
pub struct ConfirmationHub {
    pending: Mutex<HashMap<StepId, oneshot::Sender<ConfirmationResponse>>>,
}

impl ConfirmationHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `step_id` as awaiting a decision.
    pub async fn register(&self, step_id: StepId) -> PendingConfirmation {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(step_id, tx);
        PendingConfirmation { step_id, rx }
    }

    /// Route a caller's response to the step it names.
    pub async fn resolve(&self, response: ConfirmationResponse) -> Result<(), GateError> {
        let step_id = response.step_id;
        let tx = self
            .pending
            .lock()
            .await
            .remove(&step_id)
            .ok_or(GateError::NotPending(step_id))?;
        tx.send(response).map_err(|_| GateError::NotPending(step_id))
    }

    pub async fn pending_steps(&self) -> Vec<StepId> {
        let mut ids: Vec<StepId> = self.pending.lock().await.keys().copied().collect();
        ids.sort();
        ids
    }

    async fn forget(&self, step_id: StepId) {
        self.pending.lock().await.remove(&step_id);
    }
}

/// The controller's side of one suspended step.
pub struct PendingConfirmation {
    step_id: StepId,
    rx: oneshot::Receiver<ConfirmationResponse>,
}

impl PendingConfirmation {
    pub fn step_id(&self) -> StepId {
        self.step_id
    }

    /// Wait for the caller's decision or for cancellation.
    pub async fn decision(self, hub: &ConfirmationHub, cancel: &CancellationToken) -> GateDecision {
        let step_id = self.step_id;
        let decision = tokio::select! {
            biased;
            _ = cancel.cancelled() => GateDecision::Cancelled,
            response = self.rx => match response {
                Ok(response) => response.into(),
                // Hub dropped with the step still pending
                Err(_) => GateDecision::Cancelled,
            },
        };
        if decision == GateDecision::Cancelled {
            hub.forget(step_id).await;
        }
        debug!(step_id = %step_id, decision = ?decision, "Gate resolved");
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn approve_resolves_pending_step() {
        let hub = Arc::new(ConfirmationHub::new());
        let pending = hub.register(StepId(1)).await;
        assert_eq!(hub.pending_steps().await, vec![StepId(1)]);

        let responder = Arc::clone(&hub);
        tokio::spawn(async move {
            responder
                .resolve(ConfirmationResponse::approve(StepId(1)).with_feedback("go ahead"))
                .await
                .unwrap();
        });

        let decision = pending.decision(&hub, &CancellationToken::new()).await;
        assert_eq!(
            decision,
            GateDecision::Approved {
                feedback: Some("go ahead".into())
            }
        );
        assert!(hub.pending_steps().await.is_empty());
    }

    #[tokio::test]
    async fn unknown_step_is_rejected() {
        let hub = ConfirmationHub::new();
        let _pending = hub.register(StepId(1)).await;
        let err = hub.resolve(ConfirmationResponse::reject(StepId(7))).await.unwrap_err();
        assert_eq!(err, GateError::NotPending(StepId(7)));
    }

    #[tokio::test]
    async fn second_response_for_same_step_fails() {
        let hub = ConfirmationHub::new();
        let _pending = hub.register(StepId(2)).await;
        hub.resolve(ConfirmationResponse::approve(StepId(2))).await.unwrap();
        assert!(hub.resolve(ConfirmationResponse::approve(StepId(2))).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_resolves_as_cancelled() {
        let hub = ConfirmationHub::new();
        let pending = hub.register(StepId(3)).await;
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });
        assert_eq!(pending.decision(&hub, &cancel).await, GateDecision::Cancelled);
        assert!(hub.pending_steps().await.is_empty());
    }

    #[test]
    fn modify_decodes_tool_change() {
        let mut response = ConfirmationResponse::modify(StepId(1), "list files in /tmp");
        assert_eq!(
            GateDecision::from(response.clone()),
            GateDecision::Modified {
                goal: Some("list files in /tmp".into()),
                tool: ToolChange::Keep,
                feedback: None,
            }
        );

        response.modified_tool = Some("none".into());
        assert!(matches!(
            GateDecision::from(response.clone()),
            GateDecision::Modified {
                tool: ToolChange::Clear,
                ..
            }
        ));

        response.modified_tool = Some("web_search".into());
        assert!(matches!(
            GateDecision::from(response),
            GateDecision::Modified {
                tool: ToolChange::Replace(ref t),
                ..
            } if t == "web_search"
        ));
    }
}
