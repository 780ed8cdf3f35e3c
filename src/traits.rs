//! Collaborator interfaces
//!
//! Seams to the systems the orchestration core does not own. Each has a
//! network-backed implementation in `claude`, an offline one in `fallback`,
//! and in-test doubles.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::agent::events::Event;
use crate::agent::messages::{Intent, Plan};
use crate::agent::tools::{ToolResult, ToolSchema};

/// Runs tools by name
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Failures come back as an unsuccessful `ToolResult`, never as an error
    async fn execute(&self, tool_name: &str, arguments: Value) -> ToolResult;
}

/// Writes the final answer from a question and retrieved context
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    async fn generate(&self, question: &str, context: &[String]) -> Result<String>;
}

/// Condenses a conversation transcript
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, transcript: &str) -> Result<String>;
}

/// Turns an intent into a plan over the tools the caller may use
#[async_trait]
pub trait PlanGenerator: Send + Sync {
    async fn plan(&self, intent: &Intent, tools: &[ToolSchema]) -> Result<Plan>;
}

/// Destination for one request's events
pub trait EventSink: Send + Sync {
    fn put(&self, event: Event) -> Result<()>;
}

impl EventSink for mpsc::UnboundedSender<Event> {
    fn put(&self, event: Event) -> Result<()> {
        self.send(event).map_err(|_| anyhow!("event consumer went away"))
    }
}
