//! Router actor
//!
//! Gate between the orchestrator and the executor. A task reaches the
//! executor only if its tool is registered, not masked off, and its circuit
//! admits the call; otherwise it is answered immediately with the reason.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

use super::actor::{Actor, ActorHandle};
use super::messages::{ExecuteTask, OrchestratorMessage, RouteTask, Task, TaskError, TaskResultMsg};
use super::recovery::CircuitBreakerManager;
use super::tools::{ToolRegistry, ToolStatus};

pub struct RouterActor {
    registry: Arc<ToolRegistry>,
    breakers: Arc<CircuitBreakerManager>,
    executor: ActorHandle<ExecuteTask>,
}

impl RouterActor {
    pub fn new(
        registry: Arc<ToolRegistry>,
        breakers: Arc<CircuitBreakerManager>,
        executor: ActorHandle<ExecuteTask>,
    ) -> Self {
        Self {
            registry,
            breakers,
            executor,
        }
    }

    /// Decide whether `task` may run. Consumes a half-open probe when it does.
    pub fn admit(&self, task: &Task) -> Result<(), TaskError> {
        let mask = self
            .registry
            .tool_status(&task.tool_name)
            .ok_or_else(|| TaskError::UnknownTool(task.tool_name.clone()))?;

        match mask.status {
            ToolStatus::Disabled | ToolStatus::Unavailable => {
                return Err(TaskError::Unavailable {
                    tool: task.tool_name.clone(),
                    reason: mask.reason.unwrap_or_else(|| mask.status.as_str().to_string()),
                });
            }
            ToolStatus::Restricted => {
                debug!("Running restricted tool '{}'", task.tool_name);
            }
            ToolStatus::Enabled => {}
        }

        if !self.breakers.should_use_tool(&task.tool_name) {
            return Err(TaskError::CircuitOpen(task.tool_name.clone()));
        }
        Ok(())
    }
}

#[async_trait]
impl Actor for RouterActor {
    type Message = RouteTask;

    fn name(&self) -> &str {
        "router"
    }

    async fn handle(&mut self, route: RouteTask) -> Result<()> {
        match self.admit(&route.task) {
            Ok(()) => {
                debug!(
                    correlation_id = %route.correlation_id,
                    "Routing task {} to executor", route.task.id
                );
                self.executor.tell(ExecuteTask::from(route))?;
            }
            Err(rejection) => {
                info!(
                    correlation_id = %route.correlation_id,
                    "Task {} rejected: {}", route.task.id, rejection
                );
                let reply = OrchestratorMessage::TaskResult(TaskResultMsg {
                    correlation_id: route.correlation_id,
                    task_id: route.task.id,
                    outcome: Err(rejection),
                });
                if route.reply_to.tell(reply).is_err() {
                    debug!("Orchestrator gone, rejection dropped");
                }
            }
        }
        Ok(())
    }
}
