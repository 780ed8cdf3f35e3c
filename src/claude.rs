//! Claude API Client
//!
//! Anthropic Messages API client backing the planner, answer and
//! summarization collaborators. The static system prompt is sent with
//! `cache_control: ephemeral`.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::agent::messages::{Intent, Plan};
use crate::agent::planner::{parse_plan, plan_prompt};
use crate::agent::tools::ToolSchema;
use crate::traits::{AnswerGenerator, PlanGenerator, Summarizer};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

const PLANNER_SYSTEM: &str = "You are the planning component of a document question-answering \
system. You break requests into tool calls and reply with JSON only.";

const ANSWER_SYSTEM: &str = "You answer questions using only the provided context passages. \
If the context does not contain the answer, say so. Be concise and precise.";

const SUMMARY_SYSTEM: &str = "You summarize conversations. Keep decisions, facts, names and \
open questions. Drop pleasantries.";

/// Claude API client
#[derive(Clone)]
pub struct ClaudeClient {
    client: Client,
    api_key: Option<String>,
    model: String,
}

/// System message block with optional cache control
#[derive(Debug, Serialize)]
struct SystemBlock {
    r#type: String,
    text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    cache_control: Option<CacheControl>,
}

#[derive(Debug, Serialize)]
struct CacheControl {
    r#type: String,
}

/// Message in conversation
#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

/// API request
#[derive(Debug, Serialize)]
struct MessageRequest {
    model: String,
    max_tokens: usize,
    system: Vec<SystemBlock>,
    messages: Vec<Message>,
}

/// API response
#[derive(Debug, Deserialize)]
struct MessageResponse {
    content: Vec<ContentBlock>,
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    r#type: String,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: usize,
    output_tokens: usize,
    #[serde(default)]
    cache_read_input_tokens: usize,
}

/// Completion result with usage stats
#[derive(Debug, Clone)]
pub struct CompleteResult {
    pub content: String,
    pub model: String,
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub cache_read_tokens: usize,
}

impl ClaudeClient {
    pub fn new(api_key: Option<&str>, model: &str) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.map(|s| s.to_string()),
            model: model.to_string(),
        }
    }

    /// Create from config
    pub fn from_config(config: &crate::config::Config) -> Self {
        Self::new(config.anthropic_api_key.as_deref(), &config.default_model)
    }

    /// Check if API key is configured
    pub fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    /// Get model ID from hint; full model ids pass through
    fn model_id(model: &str) -> String {
        match model.to_lowercase().as_str() {
            "haiku" => "claude-3-5-haiku-20241022".to_string(),
            "opus" => "claude-3-opus-20240229".to_string(),
            "sonnet" | "" => "claude-sonnet-4-20250514".to_string(),
            _ => model.to_string(),
        }
    }

    fn build_request(
        &self,
        prompt: &str,
        system_prompt: &str,
        max_tokens: usize,
        history: &[(String, String)],
    ) -> MessageRequest {
        let mut messages: Vec<Message> = history
            .iter()
            .map(|(role, content)| Message {
                role: role.clone(),
                content: content.clone(),
            })
            .collect();

        messages.push(Message {
            role: "user".to_string(),
            content: prompt.to_string(),
        });

        MessageRequest {
            model: Self::model_id(&self.model),
            max_tokens,
            system: vec![SystemBlock {
                r#type: "text".to_string(),
                text: system_prompt.to_string(),
                cache_control: Some(CacheControl {
                    r#type: "ephemeral".to_string(),
                }),
            }],
            messages,
        }
    }

    /// Single-turn completion
    pub async fn complete(&self, prompt: &str, system_prompt: &str, max_tokens: usize) -> Result<CompleteResult> {
        self.complete_with_history(prompt, system_prompt, max_tokens, &[])
            .await
    }

    /// Complete with conversation history as (role, content) pairs
    pub async fn complete_with_history(
        &self,
        prompt: &str,
        system_prompt: &str,
        max_tokens: usize,
        history: &[(String, String)],
    ) -> Result<CompleteResult> {
        let request = self.build_request(prompt, system_prompt, max_tokens, history);

        debug!("Calling Claude API: model={}, prompt_len={}", request.model, prompt.len());

        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("ANTHROPIC_API_KEY not set - Claude API unavailable"))?;

        let response = self
            .client
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await?;
            anyhow::bail!("Claude API error {}: {}", status, text);
        }

        let result: MessageResponse = response.json().await?;
        let complete_result = CompleteResult {
            content: response_text(result.content),
            model: request.model,
            input_tokens: result.usage.input_tokens,
            output_tokens: result.usage.output_tokens,
            cache_read_tokens: result.usage.cache_read_input_tokens,
        };

        info!(
            "Claude response: model={}, in={}, out={}, cache_read={}",
            complete_result.model,
            complete_result.input_tokens,
            complete_result.output_tokens,
            complete_result.cache_read_tokens
        );

        Ok(complete_result)
    }
}

fn response_text(blocks: Vec<ContentBlock>) -> String {
    blocks
        .into_iter()
        .filter_map(|b| if b.r#type == "text" { b.text } else { None })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Numbered context block for answer prompts
fn answer_prompt(question: &str, context: &[String]) -> String {
    if context.is_empty() {
        return format!(
            "No context passages were found.\n\nQuestion: {}\n\nExplain that the documents do not cover this.",
            question
        );
    }

    let passages: Vec<String> = context
        .iter()
        .enumerate()
        .map(|(i, text)| format!("[{}] {}", i + 1, text))
        .collect();

    format!(
        "Context passages:\n{}\n\nQuestion: {}\n\nAnswer:",
        passages.join("\n\n"),
        question
    )
}

#[async_trait]
impl PlanGenerator for ClaudeClient {
    async fn plan(&self, intent: &Intent, tools: &[ToolSchema]) -> Result<Plan> {
        let result = self
            .complete(&plan_prompt(intent, tools), PLANNER_SYSTEM, 1024)
            .await?;
        parse_plan(&result.content)
    }
}

#[async_trait]
impl AnswerGenerator for ClaudeClient {
    async fn generate(&self, question: &str, context: &[String]) -> Result<String> {
        let result = self
            .complete(&answer_prompt(question, context), ANSWER_SYSTEM, 2048)
            .await?;
        Ok(result.content)
    }
}

#[async_trait]
impl Summarizer for ClaudeClient {
    async fn summarize(&self, transcript: &str) -> Result<String> {
        let prompt = format!("Summarize this conversation:\n\n{}", transcript);
        let result = self.complete(&prompt, SUMMARY_SYSTEM, 1024).await?;
        Ok(result.content)
    }
}
