//! Request entry point: starts loops, routes confirmations and
//! cancellations to them, and answers the health query.

use planwright_config::AppConfig;
use planwright_core::{AgentRequest, ConfirmationResponse, McpServerConfig, Provider, ToolRegistry};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::controller::{LoopController, RunRequest, RunSummary};
use crate::error::{GateError, LoopError};
use crate::gate::ConfirmationHub;
use crate::planner::LlmPlanner;
use crate::stream_event::{EventSink, EventStream, LoopEvent};
use crate::synthesizer::ResponseSynthesizer;

/// Build a controller wired to `provider` with the planner and synthesizer
/// models and loop settings from `config`.
pub fn controller_from_config(
    config: &AppConfig,
    provider: Arc<dyn Provider>,
    registry: Arc<ToolRegistry>,
) -> LoopController {
    let planner = LlmPlanner::new(Arc::clone(&provider), config.planner_model());
    let synthesizer = ResponseSynthesizer::new(provider, &config.default_model)
        .with_temperature(config.default_temperature);
    LoopController::new(Arc::new(planner), synthesizer, registry, config.agent.clone())
}

#[derive(Clone)]
struct ActiveRequest {
    hub: Arc<ConfirmationHub>,
    cancel: CancellationToken,
}

/// Dependency reachability, without internal state.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub backend_reachable: bool,
    pub tool_registry_reachable: bool,
    pub tools_registered: usize,
}

pub struct Orchestrator {
    controller: Arc<LoopController>,
    provider: Arc<dyn Provider>,
    mcp_servers: Vec<McpServerConfig>,
    active: Arc<Mutex<HashMap<String, ActiveRequest>>>,
}

impl Orchestrator {
    pub fn new(controller: LoopController, provider: Arc<dyn Provider>) -> Self {
        Self {
            controller: Arc::new(controller),
            provider,
            mcp_servers: Vec::new(),
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Servers discovered for every request, before the request's own.
    pub fn with_mcp_servers(mut self, servers: Vec<McpServerConfig>) -> Self {
        self.mcp_servers = servers;
        self
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        self.controller.registry()
    }

    /// Start a request on its own task and return its handle.
    pub fn start(&self, mut request: AgentRequest) -> RunHandle {
        let request_id = Uuid::new_v4().to_string();
        request.mcp_configs = merge_servers(&self.mcp_servers, request.mcp_configs);

        let (sink, events) = EventSink::channel(self.controller.config().event_buffer);
        let hub = Arc::new(ConfirmationHub::new());
        let cancel = CancellationToken::new();
        self.lock_active().insert(
            request_id.clone(),
            ActiveRequest {
                hub: Arc::clone(&hub),
                cancel: cancel.clone(),
            },
        );

        let controller = Arc::clone(&self.controller);
        let active = Arc::clone(&self.active);
        let run = RunRequest {
            request_id: request_id.clone(),
            request,
            sink,
            hub: Arc::clone(&hub),
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(async move {
            let summary = controller.run(run).await;
            active
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&summary.request_id);
            summary
        });
        debug!(request_id = %request_id, "Request spawned");

        RunHandle {
            request_id,
            events,
            hub,
            cancel,
            task,
        }
    }

    /// Route a confirmation to a running request by id.
    pub async fn confirm(&self, request_id: &str, response: ConfirmationResponse) -> Result<(), GateError> {
        let hub = self
            .lock_active()
            .get(request_id)
            .map(|a| Arc::clone(&a.hub))
            .ok_or_else(|| GateError::UnknownRequest(request_id.to_string()))?;
        hub.resolve(response).await
    }

    /// Cancel a running request. Returns false if it is not running.
    pub fn cancel(&self, request_id: &str) -> bool {
        match self.lock_active().get(request_id) {
            Some(active) => {
                info!(request_id, "Cancelling request");
                active.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn active_requests(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock_active().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn health(&self) -> HealthReport {
        let timeout = Duration::from_secs(self.controller.config().health_timeout_secs);
        let backend_reachable = match tokio::time::timeout(timeout, self.provider.health_check()).await {
            Ok(Ok(reachable)) => reachable,
            Ok(Err(e)) => {
                debug!(error = %e, "Backend health check failed");
                false
            }
            Err(_) => {
                debug!(timeout_secs = timeout.as_secs(), "Backend health check timed out");
                false
            }
        };
        let tools_registered = self.registry().len();
        HealthReport {
            healthy: backend_reachable,
            backend_reachable,
            tool_registry_reachable: true,
            tools_registered,
        }
    }

    fn lock_active(&self) -> std::sync::MutexGuard<'_, HashMap<String, ActiveRequest>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Configured servers, replaced by request-scoped ones of the same name.
fn merge_servers(configured: &[McpServerConfig], scoped: Vec<McpServerConfig>) -> Vec<McpServerConfig> {
    let mut merged: Vec<McpServerConfig> = configured
        .iter()
        .filter(|c| !scoped.iter().any(|s| s.name == c.name))
        .cloned()
        .collect();
    merged.extend(scoped);
    merged
}

/// The caller's handle on one running request.
pub struct RunHandle {
    request_id: String,
    events: EventStream,
    hub: Arc<ConfirmationHub>,
    cancel: CancellationToken,
    task: JoinHandle<RunSummary>,
}

impl RunHandle {
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// The next event; `None` after the terminal one.
    pub async fn next_event(&mut self) -> Option<LoopEvent> {
        self.events.next().await
    }

    pub async fn confirm(&self, response: ConfirmationResponse) -> Result<(), GateError> {
        self.hub.resolve(response).await
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// A token that cancels this request, for use from another task.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Drain the remaining events and wait for the loop to end.
    pub async fn finish(self) -> RunSummary {
        self.collect().await.1
    }

    /// All remaining events plus the summary. Confirmations are not
    /// answered; use [`RunHandle::next_event`] for interactive runs.
    pub async fn collect(mut self) -> (Vec<LoopEvent>, RunSummary) {
        let mut events = Vec::new();
        while let Some(event) = self.events.next().await {
            events.push(event);
        }
        let request_id = self.request_id;
        let summary = self.task.await.unwrap_or_else(|e| RunSummary {
            request_id,
            outcome: Err(LoopError::Internal(format!("loop task failed: {e}"))),
            conversation: Default::default(),
            results: Vec::new(),
            replans: 0,
        });
        (events, summary)
    }
}
