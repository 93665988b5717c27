use core_types::{AgentCapabilities, AgentKind, CostClass, TaskType};

/// Static lookup table of agent capabilities, read-only at runtime. The
/// table order is significant: it is the fixed priority used as the final
/// assignment tie-break, so registries built from the same entries always
/// assign identically.
#[derive(Debug, Clone)]
pub struct AgentRegistry {
    agents: Vec<AgentCapabilities>,
}

impl AgentRegistry {
    pub fn from_entries(agents: Vec<AgentCapabilities>) -> Self {
        Self { agents }
    }

    pub fn get(&self, kind: AgentKind) -> Option<&AgentCapabilities> {
        self.agents.iter().find(|a| a.name == kind)
    }

    /// Agents able to perform `task`, in fixed table order.
    pub fn eligible(&self, task: TaskType) -> impl Iterator<Item = &AgentCapabilities> {
        self.agents.iter().filter(move |a| a.supports(task))
    }

    pub fn iter(&self) -> impl Iterator<Item = &AgentCapabilities> {
        self.agents.iter()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Default table covering the nine known agent variants.
    pub fn builtin() -> Self {
        Self::from_entries(builtin_entries())
    }
}

pub fn builtin_entries() -> Vec<AgentCapabilities> {
    use TaskType::*;

    let entry = |name: AgentKind,
                 supported_tasks: Vec<TaskType>,
                 scm: bool,
                 object_store: bool,
                 local: bool,
                 cost: CostClass,
                 strengths: Vec<&str>,
                 weaknesses: Vec<&str>,
                 requires_approval: bool| AgentCapabilities {
        name,
        supported_tasks,
        can_access_scm: scm,
        can_access_object_store: object_store,
        can_access_local_files: local,
        cost,
        strengths: strengths.into_iter().map(String::from).collect(),
        weaknesses: weaknesses.into_iter().map(String::from).collect(),
        requires_approval,
    };

    vec![
        entry(
            AgentKind::GeminiCli,
            vec![WebScraping, PdfExtraction, Ocr, DataStorage, ContentAnalysis],
            false,
            false,
            true,
            CostClass::Free,
            vec!["local tool execution", "web scraping pipelines", "data storage"],
            vec!["no hosted model access"],
            false,
        ),
        entry(
            AgentKind::GithubActions,
            vec![DataStorage, CodeGeneration],
            true,
            true,
            false,
            CostClass::Free,
            vec!["scheduled batch work", "artifact storage"],
            vec!["slow cold starts"],
            false,
        ),
        entry(
            AgentKind::GeminiFlash,
            vec![ContentAnalysis, ContentConversion],
            false,
            false,
            false,
            CostClass::UsageBased,
            vec!["fast content conversion", "cheap analysis"],
            vec!["shallow on long documents"],
            false,
        ),
        entry(
            AgentKind::GeminiPro,
            vec![ContentAnalysis, ContentConversion, DiagramGeneration],
            false,
            false,
            false,
            CostClass::UsageBased,
            vec!["deep content analysis", "diagram generation from prose"],
            vec!["latency"],
            false,
        ),
        entry(
            AgentKind::GeminiImagen,
            vec![ImageGeneration],
            false,
            false,
            false,
            CostClass::UsageBased,
            vec!["illustration image generation"],
            vec!["text rendering inside images"],
            false,
        ),
        entry(
            AgentKind::GptCodex,
            vec![CodeGeneration, DiagramGeneration],
            false,
            false,
            false,
            CostClass::Paid,
            vec!["code generation"],
            vec!["cost"],
            false,
        ),
        entry(
            AgentKind::GithubCopilot,
            vec![CodeGeneration],
            true,
            false,
            false,
            CostClass::Paid,
            vec!["in-repo code generation"],
            vec!["needs repository context"],
            false,
        ),
        entry(
            AgentKind::CopilotAgent,
            vec![CodeGeneration, DesignGeneration],
            true,
            false,
            true,
            CostClass::Paid,
            vec!["multi-file code changes", "design generation"],
            vec!["requires review"],
            true,
        ),
        entry(
            AgentKind::GensparkPro,
            vec![DesignGeneration, ImageGeneration],
            false,
            true,
            false,
            CostClass::Paid,
            vec!["design generation", "slide layouts"],
            vec!["opaque billing"],
            true,
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_table_covers_every_task_type() {
        let registry = AgentRegistry::builtin();
        let all = [
            TaskType::ContentAnalysis,
            TaskType::ContentConversion,
            TaskType::DiagramGeneration,
            TaskType::ImageGeneration,
            TaskType::DesignGeneration,
            TaskType::CodeGeneration,
            TaskType::WebScraping,
            TaskType::PdfExtraction,
            TaskType::Ocr,
            TaskType::DataStorage,
        ];
        for task in all {
            assert!(
                registry.eligible(task).next().is_some(),
                "no agent supports {task}"
            );
        }
    }

    #[test]
    fn lookup_by_variant_identifier() {
        let registry = AgentRegistry::builtin();
        let caps = registry.get(AgentKind::GeminiCli).expect("entry");
        assert_eq!(caps.cost, CostClass::Free);
        assert!(caps.can_access_local_files);
        assert!(!caps.requires_approval);
    }

    #[test]
    fn eligibility_preserves_table_order() {
        let registry = AgentRegistry::builtin();
        let kinds: Vec<AgentKind> = registry
            .eligible(TaskType::ContentConversion)
            .map(|a| a.name)
            .collect();
        assert_eq!(kinds, vec![AgentKind::GeminiFlash, AgentKind::GeminiPro]);
    }
}
