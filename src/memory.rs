//! Compacting Conversation Memory
//!
//! Keeps the message list handed to the LLM inside a budget:
//! - Sliding window of the most recent messages
//! - Background summarization of older messages, never blocking `add_message`
//! - Archive of every summarized message, never re-entered into live context
//!
//! Compaction is single-flight per memory. A failed or empty summarization
//! leaves every message where it was; the next append tries again.

use anyhow::{anyhow, Context as _, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::tokenizer::TokenCounter;
use crate::traits::Summarizer;

const MAX_IMPORTANT_FACTS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn tool(content: impl Into<String>) -> Self {
        Self::new(Role::Tool, content)
    }
}

/// Compaction thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryWindow {
    /// Most recent messages always kept live
    pub window_size: usize,
    /// Compact once more than this many messages are live
    pub summary_threshold: usize,
    /// Also compact once live messages exceed this many estimated tokens
    pub token_budget: Option<usize>,
}

impl Default for MemoryWindow {
    fn default() -> Self {
        Self {
            window_size: 20,
            summary_threshold: 30,
            token_budget: None,
        }
    }
}

/// Rolling summary of everything archived so far
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemorySummary {
    pub summary_text: String,
    /// Total messages covered, across all compactions
    pub message_count: usize,
    pub important_facts: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionOutcome {
    Compacted { summarized: usize },
    NothingToCompact,
    AlreadyRunning,
    /// Summarizer failed or returned nothing; memory unchanged
    Skipped,
}

#[derive(Debug, Serialize)]
struct ArchiveExport<'a> {
    exported_at: DateTime<Utc>,
    summary: Option<&'a MemorySummary>,
    archived: &'a [Message],
    live: &'a [Message],
}

#[derive(Default)]
struct MemoryState {
    messages: Vec<Message>,
    archived: Vec<Message>,
    summary: Option<MemorySummary>,
    compacting: bool,
    last_error: Option<String>,
    /// Bumped by clears so an in-flight compaction can tell its batch is gone
    epoch: u64,
}

struct Inner {
    window: MemoryWindow,
    summarizer: Arc<dyn Summarizer>,
    counter: TokenCounter,
    state: Mutex<MemoryState>,
    worker: Mutex<Option<JoinHandle<CompactionOutcome>>>,
}

/// Releases the single-flight flag however the compaction ends
struct CompactionClaim<'a>(&'a Inner);

impl Drop for CompactionClaim<'_> {
    fn drop(&mut self) {
        self.0.state.lock().compacting = false;
    }
}

/// Conversation memory with background summarization; clones share state
#[derive(Clone)]
pub struct CompactingMemory {
    inner: Arc<Inner>,
}

impl CompactingMemory {
    pub fn new(summarizer: Arc<dyn Summarizer>) -> Self {
        Self::with_window(MemoryWindow::default(), summarizer)
    }

    pub fn with_window(window: MemoryWindow, summarizer: Arc<dyn Summarizer>) -> Self {
        Self {
            inner: Arc::new(Inner {
                window,
                summarizer,
                counter: TokenCounter::new(),
                state: Mutex::new(MemoryState::default()),
                worker: Mutex::new(None),
            }),
        }
    }

    pub fn window(&self) -> &MemoryWindow {
        &self.inner.window
    }

    /// Append a message; schedules compaction when over budget and returns immediately
    pub fn add_message(&self, message: Message) {
        let claimed = {
            let mut state = self.inner.state.lock();
            state.messages.push(message);
            if !state.compacting && self.over_budget(&state.messages) {
                state.compacting = true;
                true
            } else {
                false
            }
        };

        if claimed {
            self.spawn_compaction();
        }
    }

    fn over_budget(&self, messages: &[Message]) -> bool {
        let window = &self.inner.window;
        if messages.len() > window.summary_threshold {
            return true;
        }
        match window.token_budget {
            Some(budget) if messages.len() > window.window_size => {
                self.inner.counter.count_messages(messages) > budget
            }
            _ => false,
        }
    }

    fn spawn_compaction(&self) {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                warn!("No async runtime available, compaction deferred");
                self.inner.state.lock().compacting = false;
                return;
            }
        };

        let memory = self.clone();
        let handle = runtime.spawn(async move { memory.run_claimed().await });
        *self.inner.worker.lock() = Some(handle);
    }

    /// Compact now, unless a compaction is already running
    pub async fn compact(&self) -> CompactionOutcome {
        {
            let mut state = self.inner.state.lock();
            if state.compacting {
                return CompactionOutcome::AlreadyRunning;
            }
            state.compacting = true;
        }
        self.run_claimed().await
    }

    async fn run_claimed(&self) -> CompactionOutcome {
        let _claim = CompactionClaim(&self.inner);
        self.summarize_oldest().await
    }

    async fn summarize_oldest(&self) -> CompactionOutcome {
        let (batch_len, transcript, epoch) = {
            let state = self.inner.state.lock();
            let split = state.messages.len().saturating_sub(self.inner.window.window_size);
            if split == 0 {
                return CompactionOutcome::NothingToCompact;
            }
            let transcript = render_transcript(state.summary.as_ref(), &state.messages[..split]);
            (split, transcript, state.epoch)
        };

        info!("Compacting memory: summarizing {} messages", batch_len);
        let summarizer = self.inner.summarizer.clone();
        let result = match tokio::spawn(async move { summarizer.summarize(&transcript).await }).await {
            Ok(result) => result,
            Err(e) => Err(anyhow!("Summarizer aborted: {}", e)),
        };

        let mut state = self.inner.state.lock();
        let summary_text = match result {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => {
                warn!("Summarizer returned empty content, compaction skipped");
                state.last_error = Some("summarizer returned empty content".to_string());
                return CompactionOutcome::Skipped;
            }
            Err(e) => {
                warn!("Memory compaction failed: {:#}", e);
                state.last_error = Some(format!("{:#}", e));
                return CompactionOutcome::Skipped;
            }
        };

        if state.epoch != epoch || state.messages.len() < batch_len {
            debug!("Memory cleared during compaction, summary discarded");
            return CompactionOutcome::Skipped;
        }

        let evicted: Vec<Message> = state.messages.drain(..batch_len).collect();
        state.archived.extend(evicted);

        let previous = state.summary.as_ref().map(|s| s.message_count).unwrap_or(0);
        state.summary = Some(MemorySummary {
            important_facts: extract_important_facts(&summary_text),
            summary_text,
            message_count: previous + batch_len,
            created_at: Utc::now(),
        });
        state.last_error = None;

        info!(
            "Memory compacted: {} summarized, {} live, {} archived",
            batch_len,
            state.messages.len(),
            state.archived.len()
        );
        CompactionOutcome::Compacted {
            summarized: batch_len,
        }
    }

    /// Messages for the next LLM call: summary first, then the recent window
    pub fn context_messages(&self) -> Vec<Message> {
        let state = self.inner.state.lock();
        let mut context = Vec::with_capacity(self.inner.window.window_size + 1);

        if let Some(summary) = &state.summary {
            context.push(Message::system(format!(
                "Previous conversation summary ({} messages): {}. Key facts: {}",
                summary.message_count,
                summary.summary_text.trim_end_matches('.'),
                summary.important_facts.join(", ")
            )));
        }

        let start = state.messages.len().saturating_sub(self.inner.window.window_size);
        context.extend_from_slice(&state.messages[start..]);
        context
    }

    /// Estimated tokens of `context_messages()`
    pub fn context_tokens(&self) -> usize {
        self.inner.counter.count_messages(&self.context_messages())
    }

    pub fn messages(&self) -> Vec<Message> {
        self.inner.state.lock().messages.clone()
    }

    pub fn archived_messages(&self) -> Vec<Message> {
        self.inner.state.lock().archived.clone()
    }

    pub fn summary(&self) -> Option<MemorySummary> {
        self.inner.state.lock().summary.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.state.lock().messages.is_empty()
    }

    pub fn is_compacting(&self) -> bool {
        self.inner.state.lock().compacting
    }

    pub fn last_compaction_error(&self) -> Option<String> {
        self.inner.state.lock().last_error.clone()
    }

    /// Wait for the most recently scheduled background compaction
    pub async fn wait_for_compaction(&self) -> Option<CompactionOutcome> {
        let handle = self.inner.worker.lock().take()?;
        match handle.await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                warn!("Compaction task failed: {}", e);
                None
            }
        }
    }

    /// Archive every live message but keep the summary
    pub fn clear_with_summary_retention(&self) {
        let mut state = self.inner.state.lock();
        let live = std::mem::take(&mut state.messages);
        let cleared = live.len();
        state.archived.extend(live);
        state.epoch += 1;
        info!("Memory cleared, {} messages archived, summary retained", cleared);
    }

    /// Write summary, archive and live messages as JSON
    pub fn export_archive(&self, path: &Path) -> Result<()> {
        let json = {
            let state = self.inner.state.lock();
            serde_json::to_string_pretty(&ArchiveExport {
                exported_at: Utc::now(),
                summary: state.summary.as_ref(),
                archived: &state.archived,
                live: &state.messages,
            })?
        };
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write memory archive to {}", path.display()))?;
        debug!("Memory archive exported to {}", path.display());
        Ok(())
    }
}

/// `role: content` lines, preceded by the previous summary if any
fn render_transcript(previous: Option<&MemorySummary>, messages: &[Message]) -> String {
    let mut transcript = String::new();
    if let Some(summary) = previous {
        transcript.push_str(&format!(
            "Summary of earlier conversation: {}\n\n",
            summary.summary_text
        ));
    }
    for message in messages.iter().filter(|m| !m.content.trim().is_empty()) {
        transcript.push_str(message.role.as_str());
        transcript.push_str(": ");
        transcript.push_str(&message.content);
        transcript.push('\n');
    }
    transcript
}

/// Bulleted (`-`, `*`, `•`) or numbered (`1.`, `2)`) lines of a summary
fn extract_important_facts(summary: &str) -> Vec<String> {
    summary
        .lines()
        .map(str::trim)
        .filter_map(|line| {
            let rest = match line.chars().next()? {
                '-' | '*' | '•' => line.trim_start_matches(['-', '*', '•']),
                c if c.is_ascii_digit() => {
                    let after = line.trim_start_matches(|c: char| c.is_ascii_digit());
                    after.strip_prefix('.').or_else(|| after.strip_prefix(')'))?
                }
                _ => return None,
            };
            let fact = rest.trim();
            (!fact.is_empty()).then(|| fact.to_string())
        })
        .take(MAX_IMPORTANT_FACTS)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use async_trait::async_trait;

    struct FixedSummarizer(&'static str);

    #[async_trait]
    impl Summarizer for FixedSummarizer {
        async fn summarize(&self, _transcript: &str) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    struct FailingSummarizer;

    #[async_trait]
    impl Summarizer for FailingSummarizer {
        async fn summarize(&self, _transcript: &str) -> Result<String> {
            bail!("model overloaded")
        }
    }

    fn small_window() -> MemoryWindow {
        MemoryWindow {
            window_size: 2,
            summary_threshold: 4,
            token_budget: None,
        }
    }

    #[test]
    fn test_extract_important_facts() {
        let facts = extract_important_facts(
            "User is building a search tool.\n- Uses Rust\n* Deploys on Fridays\n1. Prefers tokio\n2) Dislikes YAML\n10. Likes tests\n-\nplain line",
        );
        assert_eq!(
            facts,
            vec!["Uses Rust", "Deploys on Fridays", "Prefers tokio", "Dislikes YAML", "Likes tests"]
        );

        let many = (0..8).map(|i| format!("- fact {}", i)).collect::<Vec<_>>().join("\n");
        assert_eq!(extract_important_facts(&many).len(), MAX_IMPORTANT_FACTS);
    }

    #[test]
    fn test_render_transcript() {
        let previous = MemorySummary {
            summary_text: "Talked about attention".to_string(),
            message_count: 4,
            important_facts: vec![],
            created_at: Utc::now(),
        };
        let transcript = render_transcript(
            Some(&previous),
            &[Message::user("hi"), Message::assistant("  "), Message::assistant("hello")],
        );
        assert!(transcript.starts_with("Summary of earlier conversation: Talked about attention"));
        assert!(transcript.ends_with("user: hi\nassistant: hello\n"));
    }

    #[test]
    fn test_add_without_runtime_does_not_panic() {
        let memory = CompactingMemory::with_window(small_window(), Arc::new(FixedSummarizer("s")));
        for i in 0..6 {
            memory.add_message(Message::user(format!("m{}", i)));
        }
        assert_eq!(memory.len(), 6);
        assert!(!memory.is_compacting());
    }

    #[tokio::test]
    async fn test_compaction_keeps_window() {
        let memory = CompactingMemory::with_window(small_window(), Arc::new(FixedSummarizer("- fact one")));
        for i in 0..5 {
            memory.add_message(Message::user(format!("m{}", i)));
        }

        let outcome = memory.wait_for_compaction().await;
        assert_eq!(outcome, Some(CompactionOutcome::Compacted { summarized: 3 }));
        assert_eq!(memory.len(), 2);
        assert_eq!(memory.archived_messages().len(), 3);

        let summary = memory.summary().unwrap();
        assert_eq!(summary.message_count, 3);
        assert_eq!(summary.important_facts, vec!["fact one"]);
    }

    #[tokio::test]
    async fn test_summarizer_failure_is_noop() {
        let memory = CompactingMemory::with_window(small_window(), Arc::new(FailingSummarizer));
        for i in 0..5 {
            memory.add_message(Message::user(format!("m{}", i)));
        }

        assert_eq!(memory.wait_for_compaction().await, Some(CompactionOutcome::Skipped));
        assert_eq!(memory.len(), 5);
        assert!(memory.archived_messages().is_empty());
        assert!(memory.summary().is_none());
        assert_eq!(memory.last_compaction_error().as_deref(), Some("model overloaded"));
    }

    #[tokio::test]
    async fn test_empty_summary_is_noop() {
        let memory = CompactingMemory::with_window(small_window(), Arc::new(FixedSummarizer("   ")));
        for i in 0..5 {
            memory.add_message(Message::user(format!("m{}", i)));
        }

        assert_eq!(memory.wait_for_compaction().await, Some(CompactionOutcome::Skipped));
        assert_eq!(memory.len(), 5);
    }

    #[tokio::test]
    async fn test_nothing_to_compact_within_window() {
        let memory = CompactingMemory::with_window(small_window(), Arc::new(FixedSummarizer("s")));
        memory.add_message(Message::user("only"));
        assert_eq!(memory.compact().await, CompactionOutcome::NothingToCompact);
    }

    #[tokio::test]
    async fn test_token_budget_triggers_compaction() {
        let window = MemoryWindow {
            window_size: 1,
            summary_threshold: 100,
            token_budget: Some(20),
        };
        let memory = CompactingMemory::with_window(window, Arc::new(FixedSummarizer("long talk")));
        memory.add_message(Message::user("a".repeat(200)));
        memory.add_message(Message::user("b".repeat(200)));

        assert_eq!(
            memory.wait_for_compaction().await,
            Some(CompactionOutcome::Compacted { summarized: 1 })
        );
        assert_eq!(memory.len(), 1);
    }

    #[tokio::test]
    async fn test_clear_with_summary_retention() {
        let memory = CompactingMemory::with_window(small_window(), Arc::new(FixedSummarizer("kept")));
        for i in 0..5 {
            memory.add_message(Message::user(format!("m{}", i)));
        }
        memory.wait_for_compaction().await;

        memory.clear_with_summary_retention();
        assert!(memory.is_empty());
        assert_eq!(memory.archived_messages().len(), 5);

        let context = memory.context_messages();
        assert_eq!(context.len(), 1);
        assert_eq!(context[0].role, Role::System);
        assert!(context[0].content.contains("kept"));
    }
}
