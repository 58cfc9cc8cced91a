//! The plan-execute control loop — the heart of Planwright.
//!
//! A request goes through a **Plan → Execute → Synthesize** cycle:
//!
//! 1. **Analyze** the request and discover any MCP tools it names
//! 2. **Plan**: the reasoning backend decomposes it into steps, each with a
//!    tool (or none) and an uncertainty score
//! 3. **Execute** steps in order; uncertain steps on guarded tools wait at
//!    the confirmation gate for the caller to approve, reject or modify them
//! 4. **Re-plan** on failure or rejection, keeping successful results, up to
//!    a configured cap
//! 5. **Synthesize** the final answer from the recorded results
//!
//! Progress is observable as an ordered stream of [`LoopEvent`]s.

pub mod controller;
pub mod error;
pub mod executor;
pub mod gate;
pub mod orchestrator;
pub mod planner;
pub mod stream_event;
pub mod synthesizer;

#[cfg(test)]
mod test_helpers;

pub use controller::{LoopController, RunRequest, RunSummary};
pub use error::{GateError, LoopError, PlanError};
pub use executor::{PlanImpact, StepContext, StepExecutor, StepOutcome};
pub use gate::{ConfirmationHub, GateDecision, PendingConfirmation, ToolChange};
pub use orchestrator::{HealthReport, Orchestrator, RunHandle, controller_from_config};
pub use planner::{LlmPlanner, Planner, PlanningInput};
pub use stream_event::{EventSink, EventStream, LoopEvent};
pub use synthesizer::{FinalResponse, ResponseSynthesizer, SynthesisInput};
