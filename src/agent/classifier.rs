//! Task classifier
//!
//! Maps a task description to a category by keyword and reshapes the tool
//! registry around the category's recommended tools.

use std::sync::Arc;
use tracing::{debug, info};

use super::tools::{ToolRegistry, ToolStatus};
use crate::policy::{OrchestrationPolicy, TaskCategory};

pub struct TaskClassifier {
    policy: Arc<OrchestrationPolicy>,
}

impl TaskClassifier {
    pub fn new(policy: Arc<OrchestrationPolicy>) -> Self {
        Self { policy }
    }

    /// First category whose keywords appear in the description, else `General`
    pub fn classify_task(&self, description: &str) -> TaskCategory {
        let lower = description.to_lowercase();
        self.policy
            .categories
            .iter()
            .find(|rule| {
                rule.keywords
                    .iter()
                    .any(|k| lower.contains(&k.to_lowercase()))
            })
            .map(|rule| rule.category)
            .unwrap_or(TaskCategory::General)
    }

    pub fn recommended_tools(&self, category: TaskCategory) -> Vec<String> {
        self.policy
            .rule(category)
            .map(|rule| rule.tools.clone())
            .unwrap_or_default()
    }

    /// Enable the recommended tools and restrict every other non-global tool.
    /// Returns the detected category.
    pub fn configure_registry_for_task(&self, registry: &ToolRegistry, description: &str) -> TaskCategory {
        let category = self.classify_task(description);
        let recommended = self.recommended_tools(category);

        for name in &recommended {
            if registry.contains(name) {
                registry.mask_tool(name, ToolStatus::Enabled, None);
            } else {
                debug!("Recommended tool '{}' is not registered", name);
            }
        }

        let reason = format!("Not recommended for {} tasks", category);
        for name in registry.list() {
            if !recommended.contains(&name) && !registry.is_global(&name) {
                registry.mask_tool(&name, ToolStatus::Restricted, Some(&reason));
            }
        }

        info!(
            "Configured tools for {} task ({} recommended)",
            category,
            recommended.len()
        );
        category
    }
}
