//! Compacting Memory Integration Tests
//!
//! Multi-round compaction, failure recovery, single-flight scheduling and
//! archive export.

use anyhow::{bail, Result};
use async_trait::async_trait;
use intent_orchestrator::memory::{CompactingMemory, CompactionOutcome, MemoryWindow, Message, Role};
use intent_orchestrator::{ExtractiveSummarizer, Summarizer};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::Notify;
use tokio_test::{assert_err, assert_ok};

fn window(window_size: usize, summary_threshold: usize) -> MemoryWindow {
    MemoryWindow {
        window_size,
        summary_threshold,
        token_budget: None,
    }
}

fn contents(messages: &[Message]) -> Vec<String> {
    messages.iter().map(|m| m.content.clone()).collect()
}

/// Fails on the first call, succeeds afterwards
#[derive(Default)]
struct FlakySummarizer {
    calls: AtomicUsize,
}

#[async_trait]
impl Summarizer for FlakySummarizer {
    async fn summarize(&self, _transcript: &str) -> Result<String> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            bail!("rate limited");
        }
        Ok("- recovered".to_string())
    }
}

/// Panics on every call
struct PanickingSummarizer;

#[async_trait]
impl Summarizer for PanickingSummarizer {
    async fn summarize(&self, _transcript: &str) -> Result<String> {
        panic!("summarizer bug");
    }
}

/// Blocks until released
struct GatedSummarizer {
    gate: Arc<Notify>,
}

#[async_trait]
impl Summarizer for GatedSummarizer {
    async fn summarize(&self, _transcript: &str) -> Result<String> {
        self.gate.notified().await;
        Ok("- gated".to_string())
    }
}

#[tokio::test]
async fn test_repeated_compaction_loses_nothing() {
    let memory = CompactingMemory::with_window(window(3, 5), Arc::new(ExtractiveSummarizer::default()));

    for i in 0..6 {
        memory.add_message(Message::user(format!("m{}", i)));
    }
    assert_eq!(
        memory.wait_for_compaction().await,
        Some(CompactionOutcome::Compacted { summarized: 3 })
    );

    for i in 6..9 {
        memory.add_message(Message::user(format!("m{}", i)));
    }
    assert_eq!(
        memory.wait_for_compaction().await,
        Some(CompactionOutcome::Compacted { summarized: 3 })
    );

    assert_eq!(contents(&memory.archived_messages()), vec!["m0", "m1", "m2", "m3", "m4", "m5"]);
    assert_eq!(contents(&memory.messages()), vec!["m6", "m7", "m8"]);

    let summary = memory.summary().unwrap();
    assert_eq!(summary.message_count, 6);
    assert!(summary.important_facts.contains(&"m3".to_string()));
}

#[tokio::test]
async fn test_context_is_summary_then_window() {
    let memory = CompactingMemory::with_window(window(2, 4), Arc::new(ExtractiveSummarizer::default()));
    for i in 0..5 {
        memory.add_message(Message::user(format!("question {}", i)));
    }
    memory.wait_for_compaction().await;

    let context = memory.context_messages();
    assert_eq!(context.len(), 3);
    assert_eq!(context[0].role, Role::System);
    assert!(context[0].content.starts_with("Previous conversation summary (3 messages)"));
    assert_eq!(contents(&context[1..]), vec!["question 3", "question 4"]);
    assert!(memory.context_tokens() > 0);
}

#[tokio::test]
async fn test_failed_compaction_retried_on_next_message() {
    let memory = CompactingMemory::with_window(window(2, 4), Arc::new(FlakySummarizer::default()));
    for i in 0..5 {
        memory.add_message(Message::user(format!("m{}", i)));
    }

    assert_eq!(memory.wait_for_compaction().await, Some(CompactionOutcome::Skipped));
    assert_eq!(memory.len(), 5);
    assert_eq!(memory.last_compaction_error().as_deref(), Some("rate limited"));

    memory.add_message(Message::assistant("m5"));
    assert_eq!(
        memory.wait_for_compaction().await,
        Some(CompactionOutcome::Compacted { summarized: 4 })
    );
    assert_eq!(contents(&memory.messages()), vec!["m4", "m5"]);
    assert!(memory.last_compaction_error().is_none());
}

#[tokio::test]
async fn test_panicking_summarizer_does_not_wedge_compaction() {
    let memory = CompactingMemory::with_window(window(2, 4), Arc::new(PanickingSummarizer));
    for i in 0..5 {
        memory.add_message(Message::user(format!("m{}", i)));
    }

    assert_eq!(memory.wait_for_compaction().await, Some(CompactionOutcome::Skipped));
    assert!(!memory.is_compacting());
    assert_eq!(memory.len(), 5);
    assert!(memory
        .last_compaction_error()
        .unwrap()
        .starts_with("Summarizer aborted"));

    // The next append schedules another attempt
    memory.add_message(Message::user("m5"));
    assert_eq!(memory.wait_for_compaction().await, Some(CompactionOutcome::Skipped));
    assert_eq!(memory.compact().await, CompactionOutcome::Skipped);
    assert_eq!(memory.len(), 6);
}

#[tokio::test]
async fn test_compaction_is_single_flight() {
    let gate = Arc::new(Notify::new());
    let memory = CompactingMemory::with_window(window(2, 4), Arc::new(GatedSummarizer { gate: gate.clone() }));

    for i in 0..5 {
        memory.add_message(Message::user(format!("m{}", i)));
    }
    // Let the background compaction start and block on the gate
    tokio::task::yield_now().await;
    assert!(memory.is_compacting());

    memory.add_message(Message::user("m5"));
    assert_eq!(memory.compact().await, CompactionOutcome::AlreadyRunning);

    gate.notify_one();
    assert_eq!(
        memory.wait_for_compaction().await,
        Some(CompactionOutcome::Compacted { summarized: 3 })
    );
    // The message added mid-compaction stays live
    assert_eq!(contents(&memory.messages()), vec!["m3", "m4", "m5"]);
    assert!(!memory.is_compacting());
}

#[tokio::test]
async fn test_export_archive() {
    let memory = CompactingMemory::with_window(window(2, 4), Arc::new(ExtractiveSummarizer::default()));
    for i in 0..5 {
        memory.add_message(Message::user(format!("m{}", i)));
    }
    memory.wait_for_compaction().await;

    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let path = temp_dir.path().join("memory.json");
    assert_ok!(memory.export_archive(&path));

    let exported: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(exported["archived"].as_array().unwrap().len(), 3);
    assert_eq!(exported["live"].as_array().unwrap().len(), 2);
    assert_eq!(exported["summary"]["message_count"], 3);
    assert_eq!(exported["archived"][0]["role"], "user");
}

#[tokio::test]
async fn test_export_to_missing_directory_fails() {
    let memory = CompactingMemory::new(Arc::new(ExtractiveSummarizer::default()));
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let path = temp_dir.path().join("missing").join("memory.json");

    let err = assert_err!(memory.export_archive(&path));
    assert!(err.to_string().contains("Failed to write memory archive"));
}
