//! Domain events for cross-request observers.
//!
//! The per-request wire stream lives in the agent crate; this bus carries a
//! coarser feed (plans, step outcomes, re-plans, completions, registrations)
//! that any number of subscribers can watch across all requests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::plan::{StepId, StepStatus};

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// The planner produced a plan (or a replacement)
    PlanCreated {
        request_id: String,
        revision: u32,
        step_count: usize,
        timestamp: DateTime<Utc>,
    },

    /// A step reached a recorded status
    StepExecuted {
        request_id: String,
        step_id: StepId,
        tool: Option<String>,
        status: StepStatus,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// Re-planning was triggered
    ReplanTriggered {
        request_id: String,
        attempt: u32,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// A request reached a terminal state
    RequestFinished {
        request_id: String,
        success: bool,
        elapsed_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A tool was added to the registry
    ToolRegistered {
        tool_name: String,
        source: String,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
