//! # Planwright Core
//!
//! Domain types, traits, and error definitions for the Planwright
//! plan-execute agent. This crate has **no framework dependencies**; it
//! defines the model that the planner, executor and tool crates implement
//! against.
//!
//! ## Design Philosophy
//!
//! Every seam is a trait here (`Provider`, `Tool`). Implementations live in
//! their respective crates, so the control loop can be driven by scripted
//! providers and mock tools in tests exactly as it is by real backends.

pub mod error;
pub mod event;
pub mod message;
pub mod plan;
pub mod provider;
pub mod request;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{ProviderError, ToolError};
pub use event::{DomainEvent, EventBus};
pub use message::{Conversation, Message, Role};
pub use plan::{
    ExecutionPlan, PlanStep, ResultReason, StepId, StepPayload, StepResult, StepStatus,
};
pub use provider::{Provider, ProviderRequest, ProviderResponse};
pub use request::{
    AgentRequest, ConfirmationDecision, ConfirmationProposal, ConfirmationResponse,
    McpServerConfig, McpTransportKind,
};
pub use tool::{
    DependencyOutput, RegisteredTool, Tool, ToolContract, ToolDescriptor, ToolDiscovery, ToolInput,
    ToolOutput, ToolRegistry, ToolSource,
};
