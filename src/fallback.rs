//! Offline collaborators
//!
//! Extractive answer generation and summarization for running without an
//! API key. Quality is basic; behaviour is deterministic.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashSet;

use crate::traits::{AnswerGenerator, Summarizer};

fn terms(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() > 2)
        .map(str::to_lowercase)
        .collect()
}

fn first_sentence(text: &str) -> &str {
    let text = text.trim();
    match text.find(|c| matches!(c, '.' | '!' | '?')) {
        Some(end) => &text[..=end],
        None => text,
    }
}

/// Answers by quoting the fragments that best overlap the question
pub struct ExtractiveAnswerer {
    max_fragments: usize,
}

impl Default for ExtractiveAnswerer {
    fn default() -> Self {
        Self { max_fragments: 3 }
    }
}

impl ExtractiveAnswerer {
    pub fn new(max_fragments: usize) -> Self {
        Self {
            max_fragments: max_fragments.max(1),
        }
    }
}

#[async_trait]
impl AnswerGenerator for ExtractiveAnswerer {
    async fn generate(&self, question: &str, context: &[String]) -> Result<String> {
        if context.is_empty() {
            return Ok(format!(
                "I could not find any relevant information to answer: {}",
                question.trim()
            ));
        }

        let question_terms = terms(question);
        let mut ranked: Vec<(usize, &String)> = context
            .iter()
            .map(|fragment| (terms(fragment).intersection(&question_terms).count(), fragment))
            .collect();
        ranked.sort_by(|a, b| b.0.cmp(&a.0));

        let lines: Vec<String> = ranked
            .into_iter()
            .take(self.max_fragments)
            .map(|(_, fragment)| format!("- {}", fragment.trim()))
            .collect();

        Ok(format!("Based on the retrieved documents:\n{}", lines.join("\n")))
    }
}

/// Summarizes a transcript as a headline plus one bullet per user turn
pub struct ExtractiveSummarizer {
    max_points: usize,
}

impl Default for ExtractiveSummarizer {
    fn default() -> Self {
        Self { max_points: 5 }
    }
}

#[async_trait]
impl Summarizer for ExtractiveSummarizer {
    async fn summarize(&self, transcript: &str) -> Result<String> {
        let turns: Vec<&str> = transcript
            .lines()
            .filter(|line| line.contains(": "))
            .collect();
        let points: Vec<String> = turns
            .iter()
            .filter_map(|line| line.strip_prefix("user: "))
            .map(first_sentence)
            .filter(|s| !s.is_empty())
            .take(self.max_points)
            .map(|s| format!("- {}", s))
            .collect();

        if turns.is_empty() {
            return Ok(String::new());
        }

        let mut summary = format!("The conversation covered {} turns.", turns.len());
        if !points.is_empty() {
            summary.push('\n');
            summary.push_str(&points.join("\n"));
        }
        Ok(summary)
    }
}
