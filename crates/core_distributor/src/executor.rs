use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use agent_registry::AgentRegistry;
use anyhow::{Result, anyhow};
use core_types::{
    AgentTask, ProjectStatus, TaskDistribution, TaskId, TaskStatus,
};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::{RetryPolicy, TaskRunError, TaskRunner};

/// External approval signal for tasks assigned to gated agents. Approvals
/// accumulate; approving a task that is not yet waiting simply lets it
/// pass the gate later without suspending.
#[derive(Clone, Default)]
pub struct ApprovalGate {
    inner: Arc<GateInner>,
}

#[derive(Default)]
struct GateInner {
    approved: Mutex<HashSet<TaskId>>,
    notify: Notify,
}

impl ApprovalGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn approve(&self, task_id: TaskId) {
        self.inner.approved.lock().insert(task_id);
        self.inner.notify.notify_waiters();
    }

    pub fn is_approved(&self, task_id: TaskId) -> bool {
        self.inner.approved.lock().contains(&task_id)
    }

    pub async fn approved(&self, task_id: TaskId) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_approved(task_id) {
                return;
            }
            notified.await;
        }
    }
}

/// Cancellation handle for one distribution run. Cancelling twice has no
/// additional effect.
#[derive(Clone, Default)]
pub struct RunControl {
    inner: Arc<ControlInner>,
}

#[derive(Default)]
struct ControlInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl RunControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        if !self.inner.cancelled.swap(true, Ordering::SeqCst) {
            self.inner.notify.notify_waiters();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Transition every non-terminal task to `cancelled`. Idempotent; returns
/// how many tasks actually moved.
pub fn cancel_distribution(distribution: &mut TaskDistribution) -> usize {
    distribution
        .tasks
        .iter_mut()
        .map(|t| t.cancel())
        .filter(|&moved| moved)
        .count()
}

/// Aggregate project status implied by a distribution: `completed` only
/// when every task succeeded, `error` when a permanent failure blocks the
/// conversion, `cancelled` when cancellation won.
pub fn project_outcome(distribution: &TaskDistribution) -> ProjectStatus {
    if distribution
        .tasks
        .iter()
        .any(|t| t.status == TaskStatus::Cancelled)
    {
        return ProjectStatus::Cancelled;
    }
    if distribution
        .tasks
        .iter()
        .any(|t| t.status == TaskStatus::Failed && t.is_terminal())
    {
        return ProjectStatus::Error;
    }
    if !distribution.tasks.is_empty()
        && distribution
            .tasks
            .iter()
            .all(|t| t.status == TaskStatus::Completed)
    {
        return ProjectStatus::Completed;
    }
    ProjectStatus::Processing
}

enum WorkerEvent {
    Finished {
        task_id: TaskId,
        result: Result<Value, TaskRunError>,
    },
    RetryDue {
        task_id: TaskId,
    },
    Approved {
        task_id: TaskId,
    },
}

/// Drives one distribution to a terminal state. The executor is the single
/// writer of the distribution and its counters; workers only report back
/// through events, so concurrent completions can never lose an increment.
pub struct TaskExecutor {
    registry: Arc<AgentRegistry>,
    runner: Arc<dyn TaskRunner>,
    retry: RetryPolicy,
}

impl TaskExecutor {
    pub fn new(registry: Arc<AgentRegistry>, runner: Arc<dyn TaskRunner>, retry: RetryPolicy) -> Self {
        Self {
            registry,
            runner,
            retry,
        }
    }

    pub async fn execute(
        &self,
        mut distribution: TaskDistribution,
        gate: ApprovalGate,
        control: RunControl,
    ) -> Result<TaskDistribution> {
        let mut join: JoinSet<WorkerEvent> = JoinSet::new();
        let mut gated: HashSet<TaskId> = HashSet::new();

        loop {
            if control.is_cancelled() {
                join.abort_all();
                let moved = cancel_distribution(&mut distribution);
                info!(project_id = %distribution.project_id, cancelled = moved, "distribution cancelled");
                break;
            }

            self.dispatch_ready(&mut distribution, &mut join, &gate, &mut gated)?;

            if distribution.all_terminal() {
                break;
            }
            if join.is_empty() {
                return Err(anyhow!(
                    "distribution for project {} stalled with non-terminal tasks",
                    distribution.project_id
                ));
            }

            tokio::select! {
                _ = control.cancelled() => {}
                joined = join.join_next() => match joined {
                    Some(Ok(event)) => self.apply(&mut distribution, event, &mut join, &mut gated)?,
                    Some(Err(err)) if err.is_cancelled() => {}
                    Some(Err(err)) => return Err(anyhow!("task worker panicked: {err}")),
                    None => {}
                },
            }
        }

        debug_assert!(distribution.counters_consistent());
        Ok(distribution)
    }

    fn dispatch_ready(
        &self,
        distribution: &mut TaskDistribution,
        join: &mut JoinSet<WorkerEvent>,
        gate: &ApprovalGate,
        gated: &mut HashSet<TaskId>,
    ) -> Result<()> {
        let ids: Vec<TaskId> = distribution
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Pending)
            .map(|t| t.id)
            .collect();

        for id in ids {
            let Some(task) = distribution.task(id) else {
                continue;
            };
            let deps = task.depends_on.clone();
            let assigned_to = task.assigned_to;

            let mut blocked = false;
            let mut waiting = false;
            let mut upstream = Map::new();
            for dep_id in &deps {
                match distribution.task(*dep_id) {
                    Some(dep) if dep.status == TaskStatus::Completed => {
                        upstream.insert(
                            dep.task_type.as_str().to_string(),
                            dep.output.clone().unwrap_or(Value::Null),
                        );
                    }
                    Some(dep) if dep.is_terminal() => blocked = true,
                    Some(_) => waiting = true,
                    None => blocked = true,
                }
            }

            if blocked {
                let Some(task) = distribution.task_mut(id) else {
                    continue;
                };
                warn!(task_id = %id, task_type = %task.task_type, "prerequisite unavailable, failing task");
                task.fail_permanently("prerequisite task failed or was cancelled")?;
                distribution.failed_tasks += 1;
                continue;
            }
            if waiting {
                continue;
            }

            let requires_approval = self
                .registry
                .get(assigned_to)
                .map(|caps| caps.requires_approval)
                .unwrap_or(false);

            let Some(task) = distribution.task_mut(id) else {
                continue;
            };
            if !deps.is_empty() {
                match task.input.as_object_mut() {
                    Some(object) => {
                        object.insert("upstream".to_string(), Value::Object(upstream));
                    }
                    None => {
                        let mut object = Map::new();
                        object.insert("upstream".to_string(), Value::Object(upstream));
                        task.input = Value::Object(object);
                    }
                }
            }

            if requires_approval && !gate.is_approved(id) {
                task.suspend_for_approval()?;
                debug!(task_id = %id, agent = %assigned_to, "task suspended awaiting approval");
                if gated.insert(id) {
                    let gate = gate.clone();
                    join.spawn(async move {
                        gate.approved(id).await;
                        WorkerEvent::Approved { task_id: id }
                    });
                }
            } else {
                task.start()?;
                debug!(task_id = %id, task_type = %task.task_type, "task dispatched");
                Self::spawn_worker(&self.runner, join, task);
            }
        }
        Ok(())
    }

    fn spawn_worker(runner: &Arc<dyn TaskRunner>, join: &mut JoinSet<WorkerEvent>, task: &AgentTask) {
        let runner = Arc::clone(runner);
        let snapshot = task.clone();
        join.spawn(async move {
            let result = runner.run(&snapshot).await;
            WorkerEvent::Finished {
                task_id: snapshot.id,
                result,
            }
        });
    }

    fn apply(
        &self,
        distribution: &mut TaskDistribution,
        event: WorkerEvent,
        join: &mut JoinSet<WorkerEvent>,
        gated: &mut HashSet<TaskId>,
    ) -> Result<()> {
        match event {
            WorkerEvent::Finished { task_id, result } => {
                let Some(task) = distribution.task_mut(task_id) else {
                    return Ok(());
                };
                if task.status != TaskStatus::InProgress {
                    // A cancellation raced the worker; the result is stale.
                    return Ok(());
                }
                match result {
                    Ok(output) => {
                        task.complete(output)?;
                        info!(task_id = %task_id, task_type = %task.task_type, "task completed");
                        distribution.completed_tasks += 1;
                    }
                    Err(TaskRunError::Transient(message)) => {
                        task.fail(message.clone())?;
                        if task.can_retry() {
                            let attempt = task.retry_count;
                            let delay = self.retry.delay(attempt);
                            warn!(task_id = %task_id, attempt, delay_ms = delay.as_millis() as u64, error = %message, "task failed, retrying");
                            join.spawn(async move {
                                tokio::time::sleep(delay).await;
                                WorkerEvent::RetryDue { task_id }
                            });
                        } else {
                            warn!(task_id = %task_id, error = %message, "task failed permanently, retry budget spent");
                            distribution.failed_tasks += 1;
                        }
                    }
                    Err(TaskRunError::Invalid(message)) => {
                        warn!(task_id = %task_id, error = %message, "task input rejected");
                        task.fail_permanently(message)?;
                        distribution.failed_tasks += 1;
                    }
                }
            }
            WorkerEvent::RetryDue { task_id } => {
                if let Some(task) = distribution.task_mut(task_id) {
                    if task.can_retry() {
                        task.reset_for_retry()?;
                        debug!(task_id = %task_id, retry = task.retry_count, "task re-enqueued");
                    }
                }
            }
            WorkerEvent::Approved { task_id } => {
                gated.remove(&task_id);
                if let Some(task) = distribution.task_mut(task_id) {
                    if task.status == TaskStatus::PendingApproval {
                        task.start()?;
                        info!(task_id = %task_id, "approval received, task dispatched");
                        Self::spawn_worker(&self.runner, join, task);
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Distributor, GatewayRunner};
    use async_trait::async_trait;
    use core_types::{
        CreateProjectInput, InputType, Project, TaskType, ToolCall, ToolCallError, ToolGateway,
        ToolOutcome,
    };
    use parking_lot::Mutex as PlMutex;
    use serde_json::json;
    use std::collections::HashMap;
    use std::time::Duration;

    fn project() -> Project {
        Project::new(CreateProjectInput {
            name: "camera manual".into(),
            description: None,
            input_type: InputType::Url,
            input_source: "https://example.com/camera".into(),
            settings: None,
        })
    }

    fn fast_retry(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(max_retries, Duration::from_millis(1), Duration::from_millis(4))
    }

    /// Scripted runner: fails the first `failures` attempts per task, then
    /// succeeds. Records every invocation.
    struct ScriptedRunner {
        failures: u32,
        invalid: bool,
        delay: Duration,
        calls: PlMutex<Vec<TaskId>>,
        attempts: PlMutex<HashMap<TaskId, u32>>,
    }

    impl ScriptedRunner {
        fn succeeding() -> Self {
            Self::with_failures(0)
        }

        fn with_failures(failures: u32) -> Self {
            Self {
                failures,
                invalid: false,
                delay: Duration::ZERO,
                calls: PlMutex::new(Vec::new()),
                attempts: PlMutex::new(HashMap::new()),
            }
        }
    }

    #[async_trait]
    impl TaskRunner for ScriptedRunner {
        async fn run(&self, task: &AgentTask) -> Result<Value, TaskRunError> {
            self.calls.lock().push(task.id);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.invalid {
                return Err(TaskRunError::Invalid("malformed input".into()));
            }
            let attempt = {
                let mut attempts = self.attempts.lock();
                let entry = attempts.entry(task.id).or_insert(0);
                *entry += 1;
                *entry
            };
            if attempt <= self.failures {
                return Err(TaskRunError::Transient(format!("attempt {attempt} refused")));
            }
            Ok(json!({"task": task.task_type.as_str(), "upstream_seen": task.input.get("upstream").is_some()}))
        }
    }

    fn executor(runner: Arc<dyn TaskRunner>, retry: RetryPolicy) -> TaskExecutor {
        TaskExecutor::new(Arc::new(AgentRegistry::builtin()), runner, retry)
    }

    fn plan(required: &[TaskType], retry: RetryPolicy) -> TaskDistribution {
        Distributor::new(Arc::new(AgentRegistry::builtin()), retry)
            .plan(&project(), required)
            .expect("plan")
    }

    #[tokio::test]
    async fn all_tasks_completing_yields_completed_project() {
        let retry = fast_retry(2);
        let runner = Arc::new(ScriptedRunner::succeeding());
        let distribution = plan(&[TaskType::WebScraping, TaskType::DataStorage], retry);

        let done = executor(runner.clone(), retry)
            .execute(distribution, ApprovalGate::new(), RunControl::new())
            .await
            .expect("execute");

        assert!(done.all_terminal());
        assert_eq!(done.completed_tasks, 2);
        assert_eq!(done.failed_tasks, 0);
        assert!(done.counters_consistent());
        assert_eq!(project_outcome(&done), ProjectStatus::Completed);
    }

    #[tokio::test]
    async fn dependencies_defer_dispatch_and_feed_upstream_outputs() {
        let retry = fast_retry(2);
        let runner = Arc::new(ScriptedRunner::succeeding());
        let distribution = plan(&[TaskType::WebScraping, TaskType::DataStorage], retry);
        let scrape_id = distribution
            .tasks
            .iter()
            .find(|t| t.task_type == TaskType::WebScraping)
            .expect("scrape")
            .id;
        let store_id = distribution
            .tasks
            .iter()
            .find(|t| t.task_type == TaskType::DataStorage)
            .expect("store")
            .id;

        let done = executor(runner.clone(), retry)
            .execute(distribution, ApprovalGate::new(), RunControl::new())
            .await
            .expect("execute");

        let calls = runner.calls.lock().clone();
        assert_eq!(calls, vec![scrape_id, store_id]);
        let store = done.task(store_id).expect("store task");
        assert_eq!(store.output.as_ref().expect("output")["upstream_seen"], json!(true));
    }

    #[tokio::test]
    async fn transient_failures_retry_with_budget_then_succeed() {
        let retry = fast_retry(3);
        let runner = Arc::new(ScriptedRunner::with_failures(2));
        let distribution = plan(&[TaskType::PdfExtraction], retry);

        let done = executor(runner.clone(), retry)
            .execute(distribution, ApprovalGate::new(), RunControl::new())
            .await
            .expect("execute");

        let task = &done.tasks[0];
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.retry_count, 2);
        assert_eq!(runner.calls.lock().len(), 3);
        assert_eq!(done.completed_tasks, 1);
    }

    #[tokio::test]
    async fn exhausted_retry_budget_is_a_permanent_failure() {
        let retry = fast_retry(2);
        let runner = Arc::new(ScriptedRunner::with_failures(10));
        let distribution = plan(&[TaskType::PdfExtraction], retry);

        let done = executor(runner.clone(), retry)
            .execute(distribution, ApprovalGate::new(), RunControl::new())
            .await
            .expect("execute");

        let task = &done.tasks[0];
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.retry_count, task.max_retries);
        assert!(task.is_terminal());
        assert_eq!(done.failed_tasks, 1);
        assert!(done.counters_consistent());
        assert_eq!(project_outcome(&done), ProjectStatus::Error);
        // budget = first attempt + max_retries - 1 re-runs after the first failure
        assert_eq!(runner.calls.lock().len(), 2);
    }

    #[tokio::test]
    async fn invalid_input_fails_without_retry() {
        let retry = fast_retry(3);
        let mut runner = ScriptedRunner::succeeding();
        runner.invalid = true;
        let runner = Arc::new(runner);
        let distribution = plan(&[TaskType::WebScraping], retry);

        let done = executor(runner.clone(), retry)
            .execute(distribution, ApprovalGate::new(), RunControl::new())
            .await
            .expect("execute");

        assert_eq!(runner.calls.lock().len(), 1);
        assert_eq!(done.failed_tasks, 1);
        assert_eq!(done.tasks[0].retry_count, done.tasks[0].max_retries);
    }

    #[tokio::test]
    async fn approval_gate_holds_dispatch_until_signalled() {
        let retry = fast_retry(1);
        let runner = Arc::new(ScriptedRunner::succeeding());
        // design-generation resolves to an approval-gated agent.
        let distribution = plan(&[TaskType::DesignGeneration], retry);
        let task_id = distribution.tasks[0].id;
        let gated_agent = distribution.tasks[0].assigned_to;
        assert!(
            AgentRegistry::builtin()
                .get(gated_agent)
                .expect("caps")
                .requires_approval
        );

        let gate = ApprovalGate::new();
        let control = RunControl::new();
        let exec = executor(runner.clone(), retry);
        let handle = {
            let gate = gate.clone();
            let control = control.clone();
            tokio::spawn(async move { exec.execute(distribution, gate, control).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(runner.calls.lock().is_empty(), "ran before approval");

        gate.approve(task_id);
        let done = handle.await.expect("join").expect("execute");
        assert_eq!(runner.calls.lock().len(), 1);
        // The generation type is not gateway-backed in this runner setup,
        // but the scripted runner accepts it; the task must have passed
        // through in-progress to reach completed.
        assert_eq!(done.tasks[0].status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn cancellation_is_idempotent_and_terminal() {
        let retry = fast_retry(1);
        let mut runner = ScriptedRunner::succeeding();
        runner.delay = Duration::from_secs(30);
        let runner = Arc::new(runner);
        let distribution = plan(&[TaskType::WebScraping, TaskType::DataStorage], retry);

        let gate = ApprovalGate::new();
        let control = RunControl::new();
        let exec = executor(runner.clone(), retry);
        let handle = {
            let gate = gate.clone();
            let control = control.clone();
            tokio::spawn(async move { exec.execute(distribution, gate, control).await })
        };

        tokio::time::sleep(Duration::from_millis(30)).await;
        control.cancel();
        control.cancel();
        let mut done = handle.await.expect("join").expect("execute");

        assert!(done.all_terminal());
        assert!(done.tasks.iter().all(|t| t.status == TaskStatus::Cancelled));
        assert_eq!(project_outcome(&done), ProjectStatus::Cancelled);

        // A second cancellation pass changes nothing.
        let statuses: Vec<TaskStatus> = done.tasks.iter().map(|t| t.status).collect();
        assert_eq!(cancel_distribution(&mut done), 0);
        assert_eq!(
            done.tasks.iter().map(|t| t.status).collect::<Vec<_>>(),
            statuses
        );
    }

    #[tokio::test]
    async fn timed_out_gateway_call_is_retried_under_budget() {
        // A gateway whose first call times out and second call succeeds,
        // seen through the real GatewayRunner mapping.
        struct FlakyGateway {
            calls: PlMutex<u32>,
        }

        #[async_trait]
        impl ToolGateway for FlakyGateway {
            fn check(&self, _call: &ToolCall) -> Result<(), ToolCallError> {
                Ok(())
            }

            async fn call(&self, call: ToolCall) -> ToolOutcome {
                let mut calls = self.calls.lock();
                *calls += 1;
                if *calls == 1 {
                    ToolOutcome::failed(
                        format!("call to `{}/{}` timed out after 50ms", call.server, call.tool),
                        50,
                    )
                } else {
                    ToolOutcome::ok(json!({"text": "extracted", "pages": 3}), 20)
                }
            }
        }

        let retry = fast_retry(2);
        let gateway = Arc::new(FlakyGateway {
            calls: PlMutex::new(0),
        });
        let runner = Arc::new(GatewayRunner::new(gateway.clone()));
        let distribution = plan(&[TaskType::PdfExtraction], retry);

        let done = executor(runner, retry)
            .execute(distribution, ApprovalGate::new(), RunControl::new())
            .await
            .expect("execute");

        let task = &done.tasks[0];
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.retry_count, 1);
        assert_eq!(*gateway.calls.lock(), 2);
    }

    #[tokio::test]
    async fn dependent_of_a_permanent_failure_is_blocked() {
        let retry = fast_retry(1);
        let runner = Arc::new(ScriptedRunner::with_failures(10));
        let distribution = plan(&[TaskType::WebScraping, TaskType::DataStorage], retry);

        let done = executor(runner, retry)
            .execute(distribution, ApprovalGate::new(), RunControl::new())
            .await
            .expect("execute");

        assert!(done.all_terminal());
        assert_eq!(done.failed_tasks, 2);
        let store = done
            .tasks
            .iter()
            .find(|t| t.task_type == TaskType::DataStorage)
            .expect("store");
        assert!(store.error.as_ref().expect("error").contains("prerequisite"));
        assert_eq!(project_outcome(&done), ProjectStatus::Error);
    }
}
