//! Event Stream Types
//!
//! Everything a caller observes about a request arrives as an `Event`:
//! - Typed progress (thinking, plan, tool calls and results)
//! - The answer and its cited sources
//! - Exactly one terminal event (`done` or `error`)
//!
//! Events serialize to the JSON shape used over Server-Sent Events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Thinking,
    Plan,
    ToolCall,
    ToolResult,
    Answer,
    Source,
    Done,
    Error,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Thinking => "thinking",
            Self::Plan => "plan",
            Self::ToolCall => "tool_call",
            Self::ToolResult => "tool_result",
            Self::Answer => "answer",
            Self::Source => "source",
            Self::Done => "done",
            Self::Error => "error",
        }
    }

    /// Ends the stream for its correlation id
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }
}

/// Human-readable content plus optional structured data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventPayload {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// One observable step of a request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub payload: EventPayload,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub correlation_id: String,
}

impl Event {
    pub fn new(event_type: EventType, content: impl Into<String>, correlation_id: &str) -> Self {
        Self {
            event_type,
            payload: EventPayload {
                content: content.into(),
                data: None,
            },
            timestamp: Utc::now(),
            source: "orchestrator".to_string(),
            correlation_id: correlation_id.to_string(),
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.payload.data = Some(data);
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn content(&self) -> &str {
        &self.payload.content
    }

    pub fn data(&self) -> Option<&Value> {
        self.payload.data.as_ref()
    }

    pub fn is_terminal(&self) -> bool {
        self.event_type.is_terminal()
    }

    /// Progress marker in `payload.data.type` (`planning`, `generating`)
    pub fn progress_kind(&self) -> Option<&str> {
        self.data()?.get("type")?.as_str()
    }

    /// Server-Sent Events frame: `data: {json}\n\n`
    pub fn to_sse(&self) -> serde_json::Result<String> {
        Ok(format!("data: {}\n\n", serde_json::to_string(self)?))
    }
}

/// Collector for a finished event stream
#[derive(Debug, Default)]
pub struct EventCollector {
    events: Vec<Event>,
}

impl EventCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, event: Event) {
        self.events.push(event);
    }

    /// Last event received was terminal
    pub fn is_complete(&self) -> bool {
        self.events.last().map(|e| e.is_terminal()).unwrap_or(false)
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn types(&self) -> Vec<EventType> {
        self.events.iter().map(|e| e.event_type).collect()
    }

    pub fn of_type(&self, event_type: EventType) -> Vec<&Event> {
        self.events
            .iter()
            .filter(|e| e.event_type == event_type)
            .collect()
    }

    pub fn count(&self, event_type: EventType) -> usize {
        self.events.iter().filter(|e| e.event_type == event_type).count()
    }

    /// Content of the answer event, if one arrived
    pub fn answer(&self) -> Option<&str> {
        self.events
            .iter()
            .find(|e| e.event_type == EventType::Answer)
            .map(Event::content)
    }

    pub fn into_events(self) -> Vec<Event> {
        self.events
    }
}
