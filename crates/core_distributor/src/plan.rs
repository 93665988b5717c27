use std::cmp::Reverse;
use std::collections::HashSet;
use std::sync::Arc;

use agent_registry::AgentRegistry;
use core_types::{
    AgentCapabilities, AgentTask, BrowserScrapeArgs, FilesystemWriteArgs, InputType, OcrArgs,
    PdfExtractArgs, Project, ProjectId, TaskDistribution, TaskType, TextEncoding,
};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::debug;

use crate::RetryPolicy;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DistributionError {
    #[error("no agent can perform task type `{0}`")]
    NoCapableAgent(TaskType),
    #[error("no task types requested for project {0}")]
    EmptyRequest(ProjectId),
}

/// Deterministic assignment: lowest cost class first, then the most
/// strength-keyword matches for the task, then fixed registry order.
pub fn select_agent(registry: &AgentRegistry, task: TaskType) -> Option<&AgentCapabilities> {
    registry
        .eligible(task)
        .enumerate()
        .min_by_key(|(index, caps)| (caps.cost, Reverse(caps.strength_matches(task)), *index))
        .map(|(_, caps)| caps)
}

/// Pipeline stages, derived from the original conversion flow: acquire the
/// source, analyze it, convert it, generate assets, store the result. A
/// planned task depends on every planned task of the nearest earlier
/// populated stage.
fn stage(task: TaskType) -> u8 {
    match task {
        TaskType::WebScraping | TaskType::PdfExtraction | TaskType::Ocr => 0,
        TaskType::ContentAnalysis => 1,
        TaskType::ContentConversion => 2,
        TaskType::DiagramGeneration
        | TaskType::ImageGeneration
        | TaskType::DesignGeneration
        | TaskType::CodeGeneration => 3,
        TaskType::DataStorage => 4,
    }
}

pub struct Distributor {
    registry: Arc<AgentRegistry>,
    retry: RetryPolicy,
}

impl Distributor {
    pub fn new(registry: Arc<AgentRegistry>, retry: RetryPolicy) -> Self {
        Self { registry, retry }
    }

    /// Produce a distribution covering every required task type exactly
    /// once. Duplicate entries in `required` collapse; an uncoverable type
    /// fails the whole plan before anything is created.
    pub fn plan(
        &self,
        project: &Project,
        required: &[TaskType],
    ) -> Result<TaskDistribution, DistributionError> {
        let mut seen = HashSet::new();
        let types: Vec<TaskType> = required
            .iter()
            .copied()
            .filter(|t| seen.insert(*t))
            .collect();
        if types.is_empty() {
            return Err(DistributionError::EmptyRequest(project.id));
        }

        let mut tasks = Vec::with_capacity(types.len());
        for task_type in &types {
            let agent = select_agent(&self.registry, *task_type)
                .ok_or(DistributionError::NoCapableAgent(*task_type))?;
            debug!(task_type = %task_type, agent = %agent.name, "assigned task");
            tasks.push(AgentTask::new(
                *task_type,
                agent.name,
                task_input(project, *task_type),
                self.retry.max_retries,
            ));
        }

        wire_dependencies(&mut tasks);
        Ok(TaskDistribution::new(project.id, tasks))
    }
}

fn wire_dependencies(tasks: &mut [AgentTask]) {
    let mut stages: Vec<(u8, Vec<core_types::TaskId>)> = Vec::new();
    for task in tasks.iter() {
        let s = stage(task.task_type);
        match stages.iter_mut().find(|(st, _)| *st == s) {
            Some((_, ids)) => ids.push(task.id),
            None => stages.push((s, vec![task.id])),
        }
    }
    stages.sort_by_key(|(s, _)| *s);

    for task in tasks.iter_mut() {
        let s = stage(task.task_type);
        let previous = stages.iter().rev().find(|(st, _)| *st < s);
        if let Some((_, ids)) = previous {
            task.depends_on = ids.clone();
        }
    }
}

/// Provider-ready input payload for tool-backed task types; a plain domain
/// payload for the model-backed generation types.
fn task_input(project: &Project, task_type: TaskType) -> Value {
    let settings = serde_json::to_value(&project.settings).unwrap_or(Value::Null);
    match task_type {
        TaskType::WebScraping => serde_json::to_value(BrowserScrapeArgs {
            url: project.input_source.clone(),
            selectors: [
                ("title".to_string(), "h1".to_string()),
                ("content".to_string(), "main, article, body".to_string()),
            ]
            .into_iter()
            .collect(),
            wait_for_selector: None,
        })
        .unwrap_or(Value::Null),
        TaskType::PdfExtraction => serde_json::to_value(PdfExtractArgs {
            file: project.input_source.clone(),
            extract_images: Some(project.settings.include_images),
            extract_tables: Some(true),
        })
        .unwrap_or(Value::Null),
        TaskType::Ocr => serde_json::to_value(OcrArgs {
            image: project.input_source.clone(),
            language: None,
        })
        .unwrap_or(Value::Null),
        TaskType::ContentAnalysis => {
            if project.input_type == InputType::Url {
                json!({"url": project.input_source})
            } else {
                json!({"source": project.input_source, "settings": settings})
            }
        }
        TaskType::DataStorage => serde_json::to_value(FilesystemWriteArgs {
            path: format!("projects/{}/result.json", project.id),
            content: String::new(),
            encoding: TextEncoding::Utf8,
        })
        .unwrap_or(Value::Null),
        TaskType::ContentConversion
        | TaskType::DiagramGeneration
        | TaskType::ImageGeneration
        | TaskType::DesignGeneration
        | TaskType::CodeGeneration => json!({
            "source": project.input_source,
            "settings": settings,
        }),
    }
}
