//! Executor actor
//!
//! Runs routed tasks through the `ToolExecutor` and feeds each outcome into
//! the tool's circuit breaker. Tasks run on their own tokio tasks; a panicking
//! tool becomes a failed outcome instead of taking the actor down.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use super::actor::Actor;
use super::messages::{BreakerClaim, ExecuteTask, OrchestratorMessage, Task, TaskError, TaskOutcome, TaskResultMsg};
use super::recovery::CircuitBreakerManager;
use super::tools::ToolResult;
use crate::traits::ToolExecutor;

pub struct ExecutorActor {
    executor: Arc<dyn ToolExecutor>,
    breakers: Arc<CircuitBreakerManager>,
}

impl ExecutorActor {
    pub fn new(executor: Arc<dyn ToolExecutor>, breakers: Arc<CircuitBreakerManager>) -> Self {
        Self { executor, breakers }
    }
}

/// Execute one task and record the result with its breaker, unless the
/// dispatch was already counted (the orchestrator gave up waiting)
pub async fn run_task(
    executor: Arc<dyn ToolExecutor>,
    breakers: &CircuitBreakerManager,
    task: &Task,
    claim: &BreakerClaim,
) -> TaskOutcome {
    let tool_name = task.tool_name.clone();
    let arguments = task.parameters.clone();

    let result = match tokio::spawn(async move { executor.execute(&tool_name, arguments).await }).await {
        Ok(result) => result,
        Err(e) => ToolResult::failure(&task.tool_name, format!("Tool execution aborted: {}", e)),
    };

    let counted = claim.claim();
    if !counted {
        debug!("Task {} ({}) finished after its timeout", task.id, task.tool_name);
    }

    if result.success {
        if counted {
            breakers.record_tool_success(&task.tool_name);
        }
        debug!(
            "Task {} ({}) succeeded in {}ms",
            task.id, task.tool_name, result.execution_time_ms
        );
        Ok(result.data)
    } else {
        let message = result
            .error
            .unwrap_or_else(|| "Tool reported failure without a message".to_string());
        warn!("Task {} ({}) failed: {}", task.id, task.tool_name, message);
        if counted {
            breakers.record_tool_failure(&task.tool_name, &message);
        }
        Err(TaskError::Failed {
            tool: task.tool_name.clone(),
            message,
        })
    }
}

#[async_trait]
impl Actor for ExecutorActor {
    type Message = ExecuteTask;

    fn name(&self) -> &str {
        "executor"
    }

    async fn handle(&mut self, request: ExecuteTask) -> Result<()> {
        let executor = self.executor.clone();
        let breakers = self.breakers.clone();

        tokio::spawn(async move {
            let ExecuteTask {
                correlation_id,
                task,
                claim,
                reply_to,
            } = request;

            let outcome = run_task(executor, &breakers, &task, &claim).await;
            let reply = OrchestratorMessage::TaskResult(TaskResultMsg {
                correlation_id,
                task_id: task.id,
                outcome,
            });
            if reply_to.tell(reply).is_err() {
                debug!("Orchestrator gone, task result dropped");
            }
        });

        Ok(())
    }
}
