//! Orchestration policy
//!
//! Substring heuristics that depend on the concrete tool set rather than on
//! the orchestration core: keyword → category rules with their recommended
//! tools, and the error text that marks a tool initialization failure.
//! Defaults are built in; a TOML file can replace either list.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskCategory {
    CodeGeneration,
    WebResearch,
    DataAnalysis,
    SystemAdmin,
    Communication,
    General,
}

impl TaskCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CodeGeneration => "code_generation",
            Self::WebResearch => "web_research",
            Self::DataAnalysis => "data_analysis",
            Self::SystemAdmin => "system_admin",
            Self::Communication => "communication",
            Self::General => "general",
        }
    }
}

impl fmt::Display for TaskCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Keywords that select a category, and the tools it recommends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryRule {
    pub category: TaskCategory,
    pub keywords: Vec<String>,
    #[serde(default)]
    pub tools: Vec<String>,
}

impl CategoryRule {
    fn new(category: TaskCategory, keywords: &[&str], tools: &[&str]) -> Self {
        Self {
            category,
            keywords: keywords.iter().map(|s| s.to_string()).collect(),
            tools: tools.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationPolicy {
    /// Checked in order; first match wins
    #[serde(default = "default_categories")]
    pub categories: Vec<CategoryRule>,
    #[serde(default = "default_init_error_patterns")]
    pub init_error_patterns: Vec<String>,
}

impl Default for OrchestrationPolicy {
    fn default() -> Self {
        Self {
            categories: default_categories(),
            init_error_patterns: default_init_error_patterns(),
        }
    }
}

fn default_categories() -> Vec<CategoryRule> {
    vec![
        CategoryRule::new(
            TaskCategory::CodeGeneration,
            &["code", "program", "script", "function", "class"],
            &["python_execute", "str_replace_editor", "file_create"],
        ),
        CategoryRule::new(
            TaskCategory::WebResearch,
            &["search", "web", "browse", "find online"],
            &["web_search", "browser_use", "crawl4ai"],
        ),
        CategoryRule::new(
            TaskCategory::DataAnalysis,
            &["data", "analyze", "plot", "chart", "statistics"],
            &["python_execute", "pandas_tool", "plot_tool"],
        ),
        CategoryRule::new(
            TaskCategory::SystemAdmin,
            &["system", "server", "process", "service"],
            &["bash_execute", "file_operations", "process_manager"],
        ),
        CategoryRule::new(
            TaskCategory::Communication,
            &["email", "message", "notify", "communicate"],
            &["email_tool", "slack_tool", "create_chat_completion"],
        ),
    ]
}

fn default_init_error_patterns() -> Vec<String> {
    [
        "Browser.__init__() got an unexpected keyword argument",
        "Playwright not installed",
        "BrowserType.launch",
        "Browser initialization failed",
        "Cannot launch browser",
        "Browser config error",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl OrchestrationPolicy {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse policy TOML")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read policy file {}", path.display()))?;
        Self::from_toml_str(&content)
    }

    /// Error text marks a tool that could not even start
    pub fn is_init_error(&self, error: &str) -> bool {
        self.init_error_patterns
            .iter()
            .any(|pattern| error.contains(pattern.as_str()))
    }

    pub fn rule(&self, category: TaskCategory) -> Option<&CategoryRule> {
        self.categories.iter().find(|r| r.category == category)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = OrchestrationPolicy::default();
        assert_eq!(policy.categories.len(), 5);
        assert_eq!(policy.categories[0].category, TaskCategory::CodeGeneration);
        assert!(policy.rule(TaskCategory::General).is_none());

        assert!(policy.is_init_error("error: Playwright not installed on host"));
        assert!(!policy.is_init_error("connection refused"));
    }

    #[test]
    fn test_toml_override() {
        let policy = OrchestrationPolicy::from_toml_str(
            r#"
            init_error_patterns = ["index not built"]

            [[categories]]
            category = "web_research"
            keywords = ["paper", "search"]
            tools = ["rag_search"]
            "#,
        )
        .unwrap();

        assert_eq!(policy.categories.len(), 1);
        assert_eq!(
            policy.rule(TaskCategory::WebResearch).unwrap().tools,
            vec!["rag_search".to_string()]
        );
        assert!(policy.is_init_error("fatal: index not built yet"));
        assert!(!policy.is_init_error("Playwright not installed"));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let policy = OrchestrationPolicy::from_toml_str("init_error_patterns = []").unwrap();
        assert_eq!(policy.categories, default_categories());
        assert!(policy.init_error_patterns.is_empty());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.toml");
        std::fs::write(&path, "init_error_patterns = [\"boot failed\"]").unwrap();

        let policy = OrchestrationPolicy::load(&path).unwrap();
        assert!(policy.is_init_error("boot failed: missing binary"));
        assert!(OrchestrationPolicy::load(&dir.path().join("missing.toml")).is_err());
    }
}
