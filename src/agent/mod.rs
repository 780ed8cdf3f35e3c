//! Agent orchestration core
//!
//! Actor-style pipeline turning one intent into a stream of events:
//! - Planner: intent → plan of tool tasks
//! - Router: masks and circuit breakers decide whether a task may run
//! - Executor: runs tools, feeds outcomes back into the breakers
//! - Orchestrator: owns per-request state, sequencing and answer synthesis
//!
//! Intent → Plan → Route → Execute → Verify → Answer

pub mod actor;
pub mod classifier;
pub mod events;
pub mod executor;
pub mod messages;
pub mod orchestrator;
pub mod planner;
pub mod recovery;
pub mod router;
pub mod tools;

pub use actor::{Actor, ActorError, ActorHandle, Correlated, Supervisor};
pub use classifier::TaskClassifier;
pub use events::{Event, EventCollector, EventPayload, EventType};
pub use messages::{BreakerClaim, CorrelationState, CorrelationStatus, Intent, Plan, PlanError, Task, TaskError, TaskOutcome};
pub use orchestrator::{EventStream, Orchestrator, OrchestratorConfig, OrchestratorServices};
pub use planner::{HeuristicPlanner, PlannerActor};
pub use recovery::{BreakerStatus, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerManager, CircuitState};
pub use tools::{Tool, ToolInfo, ToolMask, ToolRegistry, ToolResult, ToolSchema, ToolStatus};
