//! Per-request wire events.
//!
//! `LoopEvent` is what the caller of one request observes: a finite,
//! totally ordered sequence that ends with `final_response` or `error`.
//! The HTTP collaborator forwards these over SSE via [`LoopEvent::to_sse`].

use planwright_core::{ConfirmationProposal, PlanStep, ResultReason, StepId, StepPayload, StepStatus};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Events emitted by the loop controller for one request.
///
/// - `plan_created`          — a plan (or a replacement revision) is in place
/// - `step_started`          — a step is about to run
/// - `step_result`           — a step reached a terminal status
/// - `confirmation_required` — a step is suspended at the gate
/// - `replanning`            — the loop is going back to the planner
/// - `final_response`        — the synthesized answer (terminal)
/// - `error`                 — a fatal error or cancellation (terminal)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LoopEvent {
    PlanCreated {
        revision: u32,
        analysis: String,
        steps: Vec<PlanStep>,
    },

    StepStarted {
        step_id: StepId,
        goal: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool: Option<String>,
    },

    StepResult {
        step_id: StepId,
        status: StepStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<ResultReason>,
        payload: StepPayload,
        duration_ms: u64,
    },

    ConfirmationRequired {
        step_id: StepId,
        proposal: ConfirmationProposal,
    },

    Replanning {
        reason: String,
        attempt: u32,
    },

    FinalResponse {
        text: String,
        sources: Vec<StepId>,
        elapsed_ms: u64,
    },

    /// Carries the ids of steps that had already succeeded.
    Error {
        kind: String,
        message: String,
        completed_steps: Vec<StepId>,
    },
}

impl LoopEvent {
    /// SSE event name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::PlanCreated { .. } => "plan_created",
            Self::StepStarted { .. } => "step_started",
            Self::StepResult { .. } => "step_result",
            Self::ConfirmationRequired { .. } => "confirmation_required",
            Self::Replanning { .. } => "replanning",
            Self::FinalResponse { .. } => "final_response",
            Self::Error { .. } => "error",
        }
    }

    /// Whether the sequence ends with this event.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::FinalResponse { .. } | Self::Error { .. })
    }

    pub fn to_sse(&self) -> String {
        let data = serde_json::to_string(self).unwrap_or_else(|e| {
            format!(r#"{{"type":"error","kind":"internal","message":"{e}","completed_steps":[]}}"#)
        });
        format!("event: {}\ndata: {data}\n\n", self.event_type())
    }
}

/// The caller's end of a request's event sequence.
pub type EventStream = ReceiverStream<LoopEvent>;

/// The controller's end. Sends wait for channel capacity, so a slow
/// consumer slows the loop instead of losing events.
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::Sender<LoopEvent>,
}

impl EventSink {
    pub fn channel(buffer: usize) -> (Self, EventStream) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { tx }, ReceiverStream::new(rx))
    }

    /// Deliver one event. Returns false once the consumer has gone away.
    pub async fn emit(&self, event: LoopEvent) -> bool {
        self.tx.send(event).await.is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
