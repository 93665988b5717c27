use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{AgentKind, ProjectId, TaskId, TransitionError};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum TaskType {
    ContentAnalysis,
    ContentConversion,
    DiagramGeneration,
    ImageGeneration,
    DesignGeneration,
    CodeGeneration,
    WebScraping,
    PdfExtraction,
    Ocr,
    DataStorage,
}

impl TaskType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ContentAnalysis => "content-analysis",
            Self::ContentConversion => "content-conversion",
            Self::DiagramGeneration => "diagram-generation",
            Self::ImageGeneration => "image-generation",
            Self::DesignGeneration => "design-generation",
            Self::CodeGeneration => "code-generation",
            Self::WebScraping => "web-scraping",
            Self::PdfExtraction => "pdf-extraction",
            Self::Ocr => "ocr",
            Self::DataStorage => "data-storage",
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    Pending,
    /// Suspended awaiting an external human decision; not an error. Only
    /// agents whose capabilities set `requires_approval` pass through here.
    PendingApproval,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::PendingApproval => "pending-approval",
            Self::InProgress => "in-progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of work, assigned to exactly one agent variant.
///
/// `pending -> in-progress -> {completed | failed}`, with
/// `pending-approval` interposed before `in-progress` for gated agents,
/// `cancelled` reachable from any non-terminal state, and
/// `failed -> pending` only while the retry budget lasts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTask {
    pub id: TaskId,
    pub task_type: TaskType,
    pub assigned_to: AgentKind,
    pub status: TaskStatus,
    pub input: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Prerequisites whose output this task consumes; dispatch is deferred
    /// until every one of them is completed.
    #[serde(default)]
    pub depends_on: Vec<TaskId>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl AgentTask {
    pub fn new(task_type: TaskType, assigned_to: AgentKind, input: Value, max_retries: u32) -> Self {
        Self {
            id: TaskId::new_v4(),
            task_type,
            assigned_to,
            status: TaskStatus::Pending,
            input,
            output: None,
            error: None,
            depends_on: Vec::new(),
            retry_count: 0,
            max_retries,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Completed and cancelled tasks never move again; a failed task is
    /// terminal once its retry budget is spent.
    pub fn is_terminal(&self) -> bool {
        match self.status {
            TaskStatus::Completed | TaskStatus::Cancelled => true,
            TaskStatus::Failed => self.retry_count >= self.max_retries,
            _ => false,
        }
    }

    pub fn can_retry(&self) -> bool {
        self.status == TaskStatus::Failed && self.retry_count < self.max_retries
    }

    fn invalid(&self, to: TaskStatus) -> TransitionError {
        TransitionError::Invalid {
            entity: "task",
            from: self.status.as_str(),
            to: to.as_str(),
        }
    }

    /// `pending -> pending-approval`, for tasks assigned to a gated agent.
    pub fn suspend_for_approval(&mut self) -> Result<(), TransitionError> {
        if self.status != TaskStatus::Pending {
            return Err(self.invalid(TaskStatus::PendingApproval));
        }
        self.status = TaskStatus::PendingApproval;
        Ok(())
    }

    /// Explicit dispatch: `pending | pending-approval -> in-progress`.
    pub fn start(&mut self) -> Result<(), TransitionError> {
        if !matches!(self.status, TaskStatus::Pending | TaskStatus::PendingApproval) {
            return Err(self.invalid(TaskStatus::InProgress));
        }
        self.status = TaskStatus::InProgress;
        if self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
        Ok(())
    }

    pub fn complete(&mut self, output: Value) -> Result<(), TransitionError> {
        if self.status != TaskStatus::InProgress {
            return Err(self.invalid(TaskStatus::Completed));
        }
        self.status = TaskStatus::Completed;
        self.output = Some(output);
        self.error = None;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// `in-progress -> failed`, recording the error and spending one retry.
    /// The counter saturates at the budget, so a zero-budget task is
    /// immediately terminal and `retry_count <= max_retries` always holds.
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), TransitionError> {
        if self.status != TaskStatus::InProgress {
            return Err(self.invalid(TaskStatus::Failed));
        }
        self.status = TaskStatus::Failed;
        self.error = Some(error.into());
        self.retry_count = self.retry_count.saturating_add(1).min(self.max_retries);
        Ok(())
    }

    /// `failed -> pending`, only while `retry_count < max_retries`.
    pub fn reset_for_retry(&mut self) -> Result<(), TransitionError> {
        if self.status != TaskStatus::Failed {
            return Err(self.invalid(TaskStatus::Pending));
        }
        if self.retry_count >= self.max_retries {
            return Err(TransitionError::RetriesExhausted {
                max_retries: self.max_retries,
            });
        }
        self.status = TaskStatus::Pending;
        Ok(())
    }

    /// Terminal failure with no retry: malformed input, or a prerequisite
    /// that can never complete.
    pub fn fail_permanently(&mut self, error: impl Into<String>) -> Result<(), TransitionError> {
        if matches!(self.status, TaskStatus::Completed | TaskStatus::Cancelled) {
            return Err(self.invalid(TaskStatus::Failed));
        }
        self.status = TaskStatus::Failed;
        self.error = Some(error.into());
        self.retry_count = self.max_retries;
        Ok(())
    }

    /// Idempotent: cancelling a terminal task is a no-op. Returns whether
    /// the task actually moved.
    pub fn cancel(&mut self) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.status = TaskStatus::Cancelled;
        true
    }
}

/// All tasks for one project, plus aggregate counters. The counters are
/// only ever written by the single owner of this value; concurrent workers
/// report back through it, never into it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDistribution {
    pub project_id: ProjectId,
    pub total_tasks: u32,
    pub completed_tasks: u32,
    pub failed_tasks: u32,
    pub tasks: Vec<AgentTask>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_completion: Option<DateTime<Utc>>,
}

impl TaskDistribution {
    pub fn new(project_id: ProjectId, tasks: Vec<AgentTask>) -> Self {
        Self {
            project_id,
            total_tasks: tasks.len() as u32,
            completed_tasks: 0,
            failed_tasks: 0,
            tasks,
            started_at: Utc::now(),
            estimated_completion: None,
        }
    }

    pub fn task(&self, id: TaskId) -> Option<&AgentTask> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn task_mut(&mut self, id: TaskId) -> Option<&mut AgentTask> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    pub fn all_terminal(&self) -> bool {
        self.tasks.iter().all(AgentTask::is_terminal)
    }

    /// `completed + failed <= total`, with each counter matching its
    /// terminal population. Cancelled tasks count in neither.
    pub fn counters_consistent(&self) -> bool {
        let completed = self
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Completed)
            .count() as u32;
        let failed = self
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Failed && t.is_terminal())
            .count() as u32;
        self.completed_tasks == completed
            && self.failed_tasks == failed
            && self.completed_tasks + self.failed_tasks <= self.total_tasks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn task() -> AgentTask {
        AgentTask::new(
            TaskType::WebScraping,
            AgentKind::GeminiCli,
            json!({"url": "https://example.com"}),
            2,
        )
    }

    #[test]
    fn happy_path_reaches_completed() {
        let mut t = task();
        t.start().expect("start");
        t.complete(json!({"ok": true})).expect("complete");
        assert!(t.is_terminal());
        assert!(t.completed_at.is_some());
        // Terminal tasks refuse further transitions.
        assert!(t.start().is_err());
        assert!(t.fail("late").is_err());
    }

    #[test]
    fn retry_budget_bounds_reentry_into_pending() {
        let mut t = task();
        for attempt in 1..=2u32 {
            t.start().expect("start");
            t.fail(format!("boom {attempt}")).expect("fail");
            assert_eq!(t.retry_count, attempt);
        }
        assert!(t.is_terminal());
        assert!(!t.can_retry());
        assert_eq!(
            t.reset_for_retry(),
            Err(TransitionError::RetriesExhausted { max_retries: 2 })
        );
        assert!(t.retry_count <= t.max_retries);
    }

    #[test]
    fn zero_retry_budget_fails_permanently_on_first_failure() {
        let mut t = AgentTask::new(
            TaskType::WebScraping,
            AgentKind::GeminiCli,
            json!({"url": "https://example.com"}),
            0,
        );
        t.start().expect("start");
        t.fail("boom").expect("fail");
        assert!(t.retry_count <= t.max_retries);
        assert!(t.is_terminal());
        assert!(!t.can_retry());
        assert_eq!(
            t.reset_for_retry(),
            Err(TransitionError::RetriesExhausted { max_retries: 0 })
        );
    }

    #[test]
    fn failed_task_under_budget_goes_back_to_pending() {
        let mut t = task();
        t.start().expect("start");
        t.fail("transient").expect("fail");
        assert!(t.can_retry());
        t.reset_for_retry().expect("retry");
        assert_eq!(t.status, TaskStatus::Pending);
        // started_at is preserved from the first attempt.
        assert!(t.started_at.is_some());
    }

    #[test]
    fn approval_gate_sits_between_pending_and_in_progress() {
        let mut t = task();
        t.suspend_for_approval().expect("suspend");
        assert_eq!(t.status, TaskStatus::PendingApproval);
        assert!(t.suspend_for_approval().is_err());
        t.start().expect("approved dispatch");
        assert_eq!(t.status, TaskStatus::InProgress);
    }

    #[test]
    fn cancel_is_idempotent_and_skips_terminal_tasks() {
        let mut t = task();
        assert!(t.cancel());
        assert!(!t.cancel());

        let mut done = task();
        done.start().expect("start");
        done.complete(json!({})).expect("complete");
        assert!(!done.cancel());
        assert_eq!(done.status, TaskStatus::Completed);
    }

    #[test]
    fn distribution_counters_track_terminal_populations() {
        let mut d = TaskDistribution::new(ProjectId::new_v4(), vec![task(), task(), task()]);
        assert!(d.counters_consistent());

        let id = d.tasks[0].id;
        let t = d.task_mut(id).expect("task");
        t.start().expect("start");
        t.complete(json!({})).expect("complete");
        d.completed_tasks += 1;
        assert!(d.counters_consistent());
        assert!(d.completed_tasks + d.failed_tasks <= d.total_tasks);
        assert!(!d.all_terminal());
    }
}
