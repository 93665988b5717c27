use serde::{Deserialize, Serialize};

use crate::TaskType;

/// Agent variants the distributor can assign work to. These are external
/// executors (automation scripts, hosted models, managed services); the
/// engine only knows them through their capability records.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum AgentKind {
    CopilotAgent,
    GithubActions,
    GeminiPro,
    GeminiFlash,
    GeminiImagen,
    GithubCopilot,
    GptCodex,
    GensparkPro,
    GeminiCli,
}

impl AgentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CopilotAgent => "copilot-agent",
            Self::GithubActions => "github-actions",
            Self::GeminiPro => "gemini-pro",
            Self::GeminiFlash => "gemini-flash",
            Self::GeminiImagen => "gemini-imagen",
            Self::GithubCopilot => "github-copilot",
            Self::GptCodex => "gpt-codex",
            Self::GensparkPro => "genspark-pro",
            Self::GeminiCli => "gemini-cli",
        }
    }
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered cheapest-first: a free agent beats a metered one, and a metered
/// one has a lower floor than a flat paid plan. Assignment relies on this
/// ordering.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum CostClass {
    Free,
    UsageBased,
    Paid,
}

/// Static descriptor of what one agent variant can do. Read-only at
/// runtime; changing an entry means shipping new configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentCapabilities {
    pub name: AgentKind,
    pub supported_tasks: Vec<TaskType>,
    pub can_access_scm: bool,
    pub can_access_object_store: bool,
    pub can_access_local_files: bool,
    pub cost: CostClass,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub weaknesses: Vec<String>,
    pub requires_approval: bool,
}

impl AgentCapabilities {
    pub fn supports(&self, task: TaskType) -> bool {
        self.supported_tasks.contains(&task)
    }

    /// How many strength entries mention a keyword of the task-type name.
    /// Used as the second assignment tie-break; free text, so this is a
    /// plain substring match.
    pub fn strength_matches(&self, task: TaskType) -> usize {
        let keywords: Vec<&str> = task.as_str().split('-').collect();
        self.strengths
            .iter()
            .filter(|s| {
                let lowered = s.to_lowercase();
                keywords.iter().any(|k| lowered.contains(k))
            })
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cost_classes_order_cheapest_first() {
        assert!(CostClass::Free < CostClass::UsageBased);
        assert!(CostClass::UsageBased < CostClass::Paid);
    }

    #[test]
    fn strength_matching_counts_keyword_hits() {
        let caps = AgentCapabilities {
            name: AgentKind::GeminiFlash,
            supported_tasks: vec![TaskType::ContentConversion],
            can_access_scm: false,
            can_access_object_store: false,
            can_access_local_files: false,
            cost: CostClass::UsageBased,
            strengths: vec!["fast content rewriting".into(), "cheap".into()],
            weaknesses: vec![],
            requires_approval: false,
        };
        assert_eq!(caps.strength_matches(TaskType::ContentConversion), 1);
        assert_eq!(caps.strength_matches(TaskType::Ocr), 0);
    }
}
