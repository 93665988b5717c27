use std::sync::Arc;

use async_trait::async_trait;
use core_types::{AgentTask, TaskType, ToolCall, ToolGateway, ToolServerKind};
use serde_json::Value;
use thiserror::Error;

/// How a dispatched task failed. `Invalid` is rejected input and never
/// retried; `Transient` is a provider/network failure eligible for the
/// retry policy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskRunError {
    #[error("invalid task input: {0}")]
    Invalid(String),
    #[error("{0}")]
    Transient(String),
}

/// Execution seam between the distributor and whatever actually performs a
/// task. The executor owns all status bookkeeping; a runner only turns a
/// task's input into an output payload.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    async fn run(&self, task: &AgentTask) -> Result<Value, TaskRunError>;
}

/// Runs tool-backed task types through the tool gateway. Model-backed
/// generation types belong to external agents and are rejected here.
pub struct GatewayRunner {
    gateway: Arc<dyn ToolGateway>,
}

impl GatewayRunner {
    pub fn new(gateway: Arc<dyn ToolGateway>) -> Self {
        Self { gateway }
    }

    fn route(task_type: TaskType) -> Option<(ToolServerKind, &'static str)> {
        match task_type {
            TaskType::WebScraping => Some((ToolServerKind::Browser, "scrape")),
            TaskType::PdfExtraction => Some((ToolServerKind::PdfExtractor, "extract")),
            TaskType::Ocr => Some((ToolServerKind::OcrService, "recognize")),
            TaskType::ContentAnalysis => Some((ToolServerKind::Fetch, "fetch")),
            TaskType::DataStorage => Some((ToolServerKind::Filesystem, "write")),
            _ => None,
        }
    }

    fn tool_call_for(task: &AgentTask) -> Result<ToolCall, TaskRunError> {
        let Some((server, tool)) = Self::route(task.task_type) else {
            return Err(TaskRunError::Invalid(format!(
                "task type `{}` is not tool-backed; agent `{}` executes it externally",
                task.task_type, task.assigned_to
            )));
        };

        let mut arguments = task.input.clone();
        if let Some(object) = arguments.as_object_mut() {
            let upstream = object.remove("upstream");
            // Storage tasks persist their prerequisites' outputs unless the
            // planner already supplied explicit content.
            if task.task_type == TaskType::DataStorage {
                let content_is_empty = object
                    .get("content")
                    .and_then(Value::as_str)
                    .map(str::is_empty)
                    .unwrap_or(true);
                if content_is_empty {
                    if let Some(upstream) = upstream {
                        object.insert(
                            "content".to_string(),
                            Value::String(
                                serde_json::to_string_pretty(&upstream).unwrap_or_default(),
                            ),
                        );
                    }
                }
            }
        }
        Ok(ToolCall::new(server, tool, arguments))
    }
}

#[async_trait]
impl TaskRunner for GatewayRunner {
    async fn run(&self, task: &AgentTask) -> Result<Value, TaskRunError> {
        let call = Self::tool_call_for(task)?;
        self.gateway
            .check(&call)
            .map_err(|err| TaskRunError::Invalid(err.to_string()))?;

        let outcome = self.gateway.call(call).await;
        if outcome.success {
            Ok(outcome.data.unwrap_or(Value::Null))
        } else {
            Err(TaskRunError::Transient(
                outcome
                    .error
                    .unwrap_or_else(|| "tool call failed without detail".to_string()),
            ))
        }
    }
}
