//! Intent Orchestrator
//!
//! Orchestration core for agentic question answering over documents.
//!
//! # Features
//!
//! - **Actor Pipeline**: planner, router and executor actors behind one orchestrator
//! - **Event Streams**: ordered `thinking`/`plan`/`tool_call`/.../`done` events per request
//! - **Circuit Breakers**: per-tool failure isolation with stricter init-error handling
//! - **Tool Masking**: enable, restrict or disable tools per task category
//! - **Compacting Memory**: sliding window with background summarization
//!
//! # Architecture
//!
//! ```text
//! Caller ──► Orchestrator ──► Planner ──► PlanGenerator (Claude / heuristic)
//!               │
//!               ├── Router ──► Executor ──► ToolExecutor (registry)
//!               │     └── CircuitBreakerManager
//!               └── AnswerGenerator (Claude / extractive)
//! ```

pub mod agent;
pub mod claude;
pub mod config;
pub mod fallback;
pub mod memory;
pub mod policy;
pub mod tokenizer;
pub mod traits;

pub use agent::{Event, EventType, Intent, Orchestrator, OrchestratorConfig, OrchestratorServices};
pub use claude::ClaudeClient;
pub use config::Config;
pub use fallback::{ExtractiveAnswerer, ExtractiveSummarizer};
pub use memory::{CompactingMemory, CompactionOutcome, MemorySummary, MemoryWindow, Message, Role};
pub use policy::{OrchestrationPolicy, TaskCategory};
pub use tokenizer::TokenCounter;
pub use traits::{AnswerGenerator, EventSink, PlanGenerator, Summarizer, ToolExecutor};
