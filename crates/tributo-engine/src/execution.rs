//! The process execution engine.
//!
//! State machine per process:
//!
//! ```text
//! draft ──start──▶ active ──pause──▶ paused ──resume──▶ active
//!                    │                                     │
//!                    └────── all tasks completed ───────▶ completed
//!                    │                                     │
//!                    └────── blocking task failed ──────▶ failed
//!                    (explicit)                      ──▶ cancelled
//! ```
//!
//! Advancement works in *waves*: the first pending task plus any
//! contiguous pending tasks sharing its execution order that are flagged
//! parallel. Automatic tasks in a wave dispatch to the task runner on
//! worker tasks and may complete in any order; manual tasks stay
//! `in_progress` until a user transitions them. The execution record is
//! the synchronisation point — every counter change goes through the
//! store's row-locked update.

use std::time::Duration;

use chrono::Utc;
use serde_json::Value;

use tributo_core::{
    ExecutionId, ExecutionStatus, ProcessId, ProcessStatus, TaskId, TaskStatus, TaskType,
};
use tributo_store::{
    ExecutionConditions, ExecutionRecord, ProcessRecord, ProcessStore, ProcessTaskRecord,
    TaskRecord,
};

use crate::error::EngineError;

/// Wall-clock ceiling for one automatic task when the task itself does not
/// configure one (`task_data.timeout_secs`).
const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(300);

/// Runs the body of automatic tasks.
#[allow(async_fn_in_trait)]
pub trait TaskRunner {
    /// Execute one automatic task. `Ok` carries the result payload stored
    /// on the task; `Err` carries the failure message.
    async fn run(&self, task: &TaskRecord) -> Result<Value, String>;
}

/// A runner that completes every automatic task immediately. Generic
/// chores (archiving, report stubs) and tests use it; production wires a
/// runner that dispatches on the task's category.
#[derive(Debug, Clone, Default)]
pub struct NoopRunner;

impl TaskRunner for NoopRunner {
    async fn run(&self, task: &TaskRecord) -> Result<Value, String> {
        tracing::debug!(task = %task.title, "noop runner completed task");
        Ok(serde_json::json!({"executed_by": "noop_runner"}))
    }
}

/// Aggregated view of one process, served to the out-of-scope façades.
#[derive(Debug, Clone)]
pub struct ProcessStatusView {
    pub process_id: ProcessId,
    pub name: String,
    pub status: ProcessStatus,
    pub progress_percentage: i32,
    pub current_step: Option<String>,
    pub total_steps: i32,
    pub completed_steps: i32,
    pub failed_steps: i32,
    pub last_error: String,
}

/// The engine. Any worker may hold one; the store serialises advancement.
#[derive(Debug, Clone)]
pub struct ProcessEngine<S, R> {
    store: S,
    runner: R,
}

impl<S, R> ProcessEngine<S, R>
where
    S: ProcessStore,
    R: TaskRunner,
{
    pub fn new(store: S, runner: R) -> Self {
        Self { store, runner }
    }

    /// Start a process: only `draft` and `paused` processes may start.
    /// Creates the execution record and advances the first wave.
    pub async fn start_process(
        &self,
        process_id: ProcessId,
        initial_context: Value,
    ) -> Result<ExecutionRecord, EngineError> {
        let mut process = self.load_process(process_id).await?;
        if !matches!(process.status, ProcessStatus::Draft | ProcessStatus::Paused) {
            return Err(EngineError::InvalidTransition {
                from: process.status.to_string(),
                to: ProcessStatus::Active.to_string(),
                reason: "only draft or paused processes can start".to_string(),
            });
        }

        let now = Utc::now();
        process.status = ProcessStatus::Active;
        process.start_date = Some(now);
        self.store.update_process(&process).await?;

        let total_steps = self.store.process_tasks(process_id).await?.len() as i32;
        let execution = ExecutionRecord::new(process_id, initial_context, total_steps, now);
        self.store.insert_execution(&execution).await?;
        tracing::info!(
            process = %process.name,
            execution = %execution.id,
            total_steps,
            "process started"
        );

        self.execute_next_steps(execution.id).await?;
        self.store
            .execution_by_id(execution.id)
            .await?
            .ok_or_else(|| EngineError::ExecutionNotFound(execution.id.to_string()))
    }

    /// Advance the execution until it blocks on manual work, completes, or
    /// fails. Cooperative cancellation: a process cancelled from outside
    /// aborts at the next wave boundary.
    pub async fn execute_next_steps(&self, execution_id: ExecutionId) -> Result<(), EngineError> {
        loop {
            let mut execution = self.load_execution(execution_id).await?;
            if execution.status != ExecutionStatus::Running {
                return Ok(());
            }
            let process = self.load_process(execution.process_id).await?;
            if process.status == ProcessStatus::Cancelled {
                execution.status = ExecutionStatus::Cancelled;
                execution.completed_at = Some(Utc::now());
                self.store.update_execution(&execution).await?;
                tracing::info!(process = %process.name, "execution aborted by cancellation");
                return Ok(());
            }
            if process.status == ProcessStatus::Paused {
                return Ok(());
            }

            let joined = self.store.process_tasks(execution.process_id).await?;
            let pending: Vec<&(ProcessTaskRecord, TaskRecord)> = joined
                .iter()
                .filter(|(_, task)| task.status == TaskStatus::Pending)
                .collect();

            if pending.is_empty() {
                self.complete(execution, process).await?;
                return Ok(());
            }

            let wave = select_wave(&pending);
            let mut dispatched_automatic: Vec<(ProcessTaskRecord, TaskRecord)> = Vec::new();
            let mut skipped_any = false;

            for (join, task) in wave {
                if !self
                    .conditions_hold(&join.execution_conditions, &execution, &joined, join)
                {
                    if join.is_optional {
                        // Skip: the optional task leaves the wave as
                        // cancelled so progression can continue.
                        let mut task = task.clone();
                        task.status = TaskStatus::Cancelled;
                        task.error_message =
                            "execution conditions not met; optional task skipped".to_string();
                        self.store.update_task(&task).await?;
                        tracing::info!(task = %task.title, "optional task skipped");
                        skipped_any = true;
                        continue;
                    }
                    let reason = format!(
                        "execution conditions not met for task: {}",
                        task.title
                    );
                    self.fail_execution(execution, process, &reason).await?;
                    return Ok(());
                }

                let mut task = task.clone();
                if !join.context_data.is_null() {
                    merge_context(&mut task, &join.context_data);
                }
                task.start(Utc::now());
                self.store.update_task(&task).await?;

                match task.task_type {
                    TaskType::Automatic | TaskType::Scheduled | TaskType::Recurring => {
                        dispatched_automatic.push((join.clone(), task));
                    }
                    TaskType::Manual => {
                        // Waits for a user transition.
                        tracing::info!(task = %task.title, "manual task awaiting user");
                    }
                }
            }

            if dispatched_automatic.is_empty() {
                if skipped_any {
                    // A skipped optional task may have unblocked the next
                    // wave; take another look.
                    continue;
                }
                // Nothing the engine can advance on its own right now.
                return Ok(());
            }

            self.run_wave(execution_id, dispatched_automatic).await?;
            // Loop: completions may have unblocked the next wave.
        }
    }

    /// Run one wave of automatic tasks. Waves of size > 1 run their
    /// bodies concurrently and may complete in any order; the execution
    /// record's row-locked updates serialise the counter writes.
    async fn run_wave(
        &self,
        execution_id: ExecutionId,
        wave: Vec<(ProcessTaskRecord, TaskRecord)>,
    ) -> Result<(), EngineError> {
        let results = futures::future::join_all(
            wave.into_iter()
                .map(|(join, task)| self.run_one(execution_id, join, task)),
        )
        .await;
        for result in results {
            result?;
        }
        Ok(())
    }

    async fn run_one(
        &self,
        execution_id: ExecutionId,
        join: ProcessTaskRecord,
        mut task: TaskRecord,
    ) -> Result<(), EngineError> {
        let timeout = task_timeout(&task);
        let outcome = match tokio::time::timeout(timeout, self.runner.run(&task)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(format!(
                "task timed out after {} seconds",
                timeout.as_secs()
            )),
        };

        match outcome {
            Ok(result) => {
                task.complete(Some(result), Utc::now());
                self.store.update_task(&task).await?;
                self.bump_counters(execution_id, true, None).await?;
                tracing::info!(task = %task.title, "automatic task completed");
            }
            Err(message) => {
                task.fail(&message, Utc::now());
                self.store.update_task(&task).await?;
                self.bump_counters(execution_id, false, Some(message.clone()))
                    .await?;
                tracing::warn!(task = %task.title, error = %message, "automatic task failed");
                if !join.is_optional {
                    let execution = self.load_execution(execution_id).await?;
                    let process = self.load_process(execution.process_id).await?;
                    self.fail_execution(
                        execution,
                        process,
                        &format!("task failed: {}", task.title),
                    )
                    .await?;
                }
            }
        }
        Ok(())
    }

    /// A user finished a manual task; record it and advance.
    pub async fn complete_manual_task(
        &self,
        execution_id: ExecutionId,
        task_id: TaskId,
        result: Option<Value>,
    ) -> Result<(), EngineError> {
        let mut task = self
            .store
            .task_by_id(task_id)
            .await?
            .ok_or_else(|| EngineError::TaskNotFound(task_id.to_string()))?;
        task.complete(result, Utc::now());
        self.store.update_task(&task).await?;
        self.bump_counters(execution_id, true, None).await?;
        self.execute_next_steps(execution_id).await
    }

    /// Pause an active process and its running executions.
    pub async fn pause_process(&self, process_id: ProcessId) -> Result<(), EngineError> {
        let mut process = self.load_process(process_id).await?;
        process.status = ProcessStatus::Paused;
        self.store.update_process(&process).await?;
        for mut execution in self
            .store
            .running_executions_for_process(process_id)
            .await?
        {
            execution.status = ExecutionStatus::Paused;
            self.store.update_execution(&execution).await?;
        }
        tracing::info!(process = %process.name, "process paused");
        Ok(())
    }

    /// Resume a paused process and keep advancing its executions.
    pub async fn resume_process(&self, process_id: ProcessId) -> Result<(), EngineError> {
        let mut process = self.load_process(process_id).await?;
        if process.status != ProcessStatus::Paused {
            return Err(EngineError::InvalidTransition {
                from: process.status.to_string(),
                to: ProcessStatus::Active.to_string(),
                reason: "only paused processes can resume".to_string(),
            });
        }
        process.status = ProcessStatus::Active;
        self.store.update_process(&process).await?;

        // Paused executions pick up where they stopped.
        let paused: Vec<ExecutionRecord> = self
            .store
            .executions_for_process(process_id)
            .await?
            .into_iter()
            .filter(|e| e.status == ExecutionStatus::Paused)
            .collect();
        for mut execution in paused {
            execution.status = ExecutionStatus::Running;
            self.store.update_execution(&execution).await?;
            self.execute_next_steps(execution.id).await?;
        }
        tracing::info!(process = %process.name, "process resumed");
        Ok(())
    }

    /// Explicit cancellation; running executions abort at the next wave.
    pub async fn cancel_process(&self, process_id: ProcessId) -> Result<(), EngineError> {
        let mut process = self.load_process(process_id).await?;
        if process.status == ProcessStatus::Completed {
            return Err(EngineError::InvalidTransition {
                from: process.status.to_string(),
                to: ProcessStatus::Cancelled.to_string(),
                reason: "completed processes cannot be cancelled".to_string(),
            });
        }
        process.status = ProcessStatus::Cancelled;
        self.store.update_process(&process).await?;
        tracing::info!(process = %process.name, "process cancelled");
        Ok(())
    }

    /// The aggregated status view.
    pub async fn process_status(
        &self,
        process_id: ProcessId,
    ) -> Result<ProcessStatusView, EngineError> {
        let process = self.load_process(process_id).await?;
        let joined = self.store.process_tasks(process_id).await?;
        let completed = joined
            .iter()
            .filter(|(_, task)| task.status == TaskStatus::Completed)
            .count();
        let progress = if joined.is_empty() {
            0
        } else {
            (completed * 100 / joined.len()) as i32
        };
        let current_step = joined
            .iter()
            .find(|(_, task)| {
                matches!(task.status, TaskStatus::Pending | TaskStatus::InProgress)
            })
            .map(|(_, task)| task.title.clone());

        let executions = self
            .store
            .running_executions_for_process(process_id)
            .await?;
        let (total, completed_steps, failed_steps, last_error) = executions
            .first()
            .map(|e| {
                (
                    e.total_steps,
                    e.completed_steps,
                    e.failed_steps,
                    e.last_error.clone(),
                )
            })
            .unwrap_or((joined.len() as i32, completed as i32, 0, String::new()));

        Ok(ProcessStatusView {
            process_id,
            name: process.name,
            status: process.status,
            progress_percentage: progress,
            current_step,
            total_steps: total,
            completed_steps,
            failed_steps,
            last_error,
        })
    }

    /// Evaluate the closed condition grammar for one task.
    fn conditions_hold(
        &self,
        conditions: &ExecutionConditions,
        execution: &ExecutionRecord,
        all: &[(ProcessTaskRecord, TaskRecord)],
        current: &ProcessTaskRecord,
    ) -> bool {
        if let Some(required) = conditions.previous_task_status {
            let all_match = all
                .iter()
                .filter(|(join, _)| {
                    join.execution_order < current.execution_order && !join.is_optional
                })
                .all(|(_, task)| task.status == required);
            if !all_match {
                return false;
            }
        }
        if let Some(variable) = &conditions.context_variable {
            if execution.execution_context.get(&variable.name) != Some(&variable.value) {
                return false;
            }
        }
        // `company_data` is a placeholder predicate and `require_approval`
        // gates on the manual task itself; both hold here.
        true
    }

    async fn complete(
        &self,
        mut execution: ExecutionRecord,
        mut process: ProcessRecord,
    ) -> Result<(), EngineError> {
        let now = Utc::now();
        execution.status = ExecutionStatus::Completed;
        execution.completed_at = Some(now);
        execution.completed_steps = execution.total_steps;
        self.store.update_execution(&execution).await?;

        process.status = ProcessStatus::Completed;
        process.completed_at = Some(now);
        self.store.update_process(&process).await?;
        tracing::info!(process = %process.name, "process completed");
        Ok(())
    }

    async fn fail_execution(
        &self,
        mut execution: ExecutionRecord,
        mut process: ProcessRecord,
        reason: &str,
    ) -> Result<(), EngineError> {
        let now = Utc::now();
        execution.status = ExecutionStatus::Failed;
        execution.completed_at = Some(now);
        execution.last_error = reason.to_string();
        execution.error_count += 1;
        self.store.update_execution(&execution).await?;

        process.status = ProcessStatus::Failed;
        process.completed_at = Some(now);
        self.store.update_process(&process).await?;
        tracing::error!(process = %process.name, reason, "process failed");
        Ok(())
    }

    /// Read-modify-write on the execution counters; the store's
    /// `update_execution` takes the row lock.
    async fn bump_counters(
        &self,
        execution_id: ExecutionId,
        success: bool,
        error: Option<String>,
    ) -> Result<(), EngineError> {
        let mut execution = self.load_execution(execution_id).await?;
        if success {
            execution.completed_steps += 1;
            execution.current_step += 1;
        } else {
            execution.failed_steps += 1;
            execution.error_count += 1;
            if let Some(error) = error {
                execution.last_error = error;
            }
        }
        self.store.update_execution(&execution).await?;
        Ok(())
    }

    async fn load_process(&self, id: ProcessId) -> Result<ProcessRecord, EngineError> {
        self.store
            .process_by_id(id)
            .await?
            .ok_or_else(|| EngineError::ProcessNotFound(id.to_string()))
    }

    async fn load_execution(&self, id: ExecutionId) -> Result<ExecutionRecord, EngineError> {
        self.store
            .execution_by_id(id)
            .await?
            .ok_or_else(|| EngineError::ExecutionNotFound(id.to_string()))
    }
}

/// The next wave: the first pending task, plus contiguous pending tasks of
/// the same order that are parallelisable. Selection stops at the first
/// order change or non-parallel task.
fn select_wave<'a>(
    pending: &'a [&'a (ProcessTaskRecord, TaskRecord)],
) -> Vec<&'a (ProcessTaskRecord, TaskRecord)> {
    let mut wave: Vec<&(ProcessTaskRecord, TaskRecord)> = Vec::new();
    let mut wave_order = None;
    for entry in pending {
        let (join, _) = entry;
        match wave_order {
            None => {
                wave_order = Some(join.execution_order);
                wave.push(entry);
                if !join.can_run_parallel {
                    break;
                }
            }
            Some(order) if join.execution_order == order && join.can_run_parallel => {
                wave.push(entry);
            }
            Some(_) => break,
        }
    }
    wave
}

fn task_timeout(task: &TaskRecord) -> Duration {
    task.task_data
        .get("timeout_secs")
        .and_then(Value::as_u64)
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_TASK_TIMEOUT)
}

fn merge_context(task: &mut TaskRecord, context: &Value) {
    if let (Value::Object(data), Value::Object(extra)) = (&mut task.task_data, context) {
        for (key, value) in extra {
            data.insert(key.clone(), value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use tributo_core::{ProcessType, RecurrenceType, Rut, TaskPriority};
    use tributo_store::{MemStore, RecurrenceConfig};
    use uuid::Uuid;

    fn process_record(status: ProcessStatus) -> ProcessRecord {
        ProcessRecord {
            id: ProcessId::new(),
            name: "F29 - Empresa".into(),
            description: String::new(),
            process_type: ProcessType::TaxMonthly,
            company_id: tributo_core::CompanyId::new(),
            company_tax_id: Rut::parse("77794858-K").unwrap(),
            status,
            is_template: false,
            parent_process: None,
            created_by: "system".into(),
            assigned_to: "system".into(),
            start_date: None,
            due_date: None,
            completed_at: None,
            is_recurring: false,
            recurrence_type: RecurrenceType::None,
            recurrence_config: RecurrenceConfig::default(),
            config_data: json!({}),
            created_at: Utc::now(),
        }
    }

    fn task_record(title: &str, task_type: TaskType) -> TaskRecord {
        TaskRecord {
            id: tributo_core::TaskId::new(),
            title: title.into(),
            description: String::new(),
            task_type,
            category: String::new(),
            company_tax_id: Rut::parse("77794858-K").unwrap(),
            assigned_to: "system".into(),
            created_by: "system".into(),
            status: TaskStatus::Pending,
            priority: TaskPriority::Normal,
            due_date: None,
            started_at: None,
            completed_at: None,
            progress_percentage: 0,
            estimated_duration_secs: None,
            actual_duration_secs: None,
            task_data: json!({}),
            result_data: json!({}),
            error_message: String::new(),
            is_recurring: false,
            recurrence_pattern: json!({}),
            created_at: Utc::now(),
        }
    }

    fn join_record(
        process_id: ProcessId,
        task_id: tributo_core::TaskId,
        order: i32,
        parallel: bool,
    ) -> ProcessTaskRecord {
        ProcessTaskRecord {
            id: Uuid::new_v4(),
            process_id,
            task_id,
            execution_order: order,
            is_optional: false,
            can_run_parallel: parallel,
            execution_conditions: ExecutionConditions::default(),
            context_data: json!({}),
            due_date_offset_days: None,
            due_date_from_previous: false,
            absolute_due_date: None,
        }
    }

    async fn build_process(
        store: &MemStore,
        shape: &[(i32, bool, TaskType)],
    ) -> ProcessRecord {
        let process = process_record(ProcessStatus::Draft);
        store.insert_process(&process).await.unwrap();
        for (i, (order, parallel, task_type)) in shape.iter().enumerate() {
            let task = task_record(&format!("task-{i}"), *task_type);
            store.insert_task(&task).await.unwrap();
            store
                .insert_process_task(&join_record(process.id, task.id, *order, *parallel))
                .await
                .unwrap();
        }
        process
    }

    #[test]
    fn wave_selection_respects_order_and_parallel_flags() {
        // Shape [1:par, 1:par, 2:seq, 2:seq, 3:par] → waves [1,1], [2], [2], [3].
        let process_id = ProcessId::new();
        let shape = [(1, true), (1, true), (2, false), (2, false), (3, true)];
        let joined: Vec<(ProcessTaskRecord, TaskRecord)> = shape
            .iter()
            .map(|(order, parallel)| {
                let task = task_record("t", TaskType::Manual);
                (join_record(process_id, task.id, *order, *parallel), task)
            })
            .collect();
        let pending: Vec<&(ProcessTaskRecord, TaskRecord)> = joined.iter().collect();

        let wave = select_wave(&pending);
        assert_eq!(wave.len(), 2);
        assert!(wave.iter().all(|(j, _)| j.execution_order == 1));

        let rest: Vec<&(ProcessTaskRecord, TaskRecord)> =
            pending.iter().skip(2).copied().collect();
        let wave = select_wave(&rest);
        assert_eq!(wave.len(), 1);
        assert_eq!(wave[0].0.execution_order, 2);

        let rest: Vec<&(ProcessTaskRecord, TaskRecord)> =
            pending.iter().skip(3).copied().collect();
        let wave = select_wave(&rest);
        assert_eq!(wave.len(), 1);
        assert_eq!(wave[0].0.execution_order, 2);

        let rest: Vec<&(ProcessTaskRecord, TaskRecord)> =
            pending.iter().skip(4).copied().collect();
        let wave = select_wave(&rest);
        assert_eq!(wave.len(), 1);
        assert_eq!(wave[0].0.execution_order, 3);
    }

    #[tokio::test]
    async fn automatic_process_runs_to_completion() {
        let store = MemStore::new();
        let process = build_process(
            &store,
            &[
                (1, false, TaskType::Automatic),
                (2, false, TaskType::Automatic),
            ],
        )
        .await;

        let engine = ProcessEngine::new(store.clone(), NoopRunner);
        let execution = engine.start_process(process.id, json!({})).await.unwrap();

        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert_eq!(execution.completed_steps, 2);
        let process = store.process_by_id(process.id).await.unwrap().unwrap();
        assert_eq!(process.status, ProcessStatus::Completed);
        assert!(process.completed_at.is_some());
    }

    #[tokio::test]
    async fn manual_task_blocks_until_user_completes() {
        let store = MemStore::new();
        let process = build_process(
            &store,
            &[
                (1, false, TaskType::Automatic),
                (2, false, TaskType::Manual),
                (3, false, TaskType::Automatic),
            ],
        )
        .await;

        let engine = ProcessEngine::new(store.clone(), NoopRunner);
        let execution = engine.start_process(process.id, json!({})).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Running);
        assert_eq!(execution.completed_steps, 1);

        // The manual task is now in progress.
        let joined = store.process_tasks(process.id).await.unwrap();
        let manual = &joined[1].1;
        assert_eq!(manual.status, TaskStatus::InProgress);

        engine
            .complete_manual_task(execution.id, manual.id, None)
            .await
            .unwrap();

        let execution = store.execution_by_id(execution.id).await.unwrap().unwrap();
        assert_eq!(execution.status, ExecutionStatus::Completed);
        let process = store.process_by_id(process.id).await.unwrap().unwrap();
        assert_eq!(process.status, ProcessStatus::Completed);
    }

    #[tokio::test]
    async fn starting_an_active_process_is_refused() {
        let store = MemStore::new();
        let process = process_record(ProcessStatus::Active);
        store.insert_process(&process).await.unwrap();

        let engine = ProcessEngine::new(store.clone(), NoopRunner);
        assert!(matches!(
            engine.start_process(process.id, json!({})).await,
            Err(EngineError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn failing_condition_on_required_task_fails_the_execution() {
        let store = MemStore::new();
        let process = process_record(ProcessStatus::Draft);
        store.insert_process(&process).await.unwrap();

        let task = task_record("gated", TaskType::Automatic);
        store.insert_task(&task).await.unwrap();
        let mut join = join_record(process.id, task.id, 1, false);
        join.execution_conditions.context_variable =
            Some(tributo_store::ContextVariableCondition {
                name: "approved".into(),
                value: json!(true),
            });
        store.insert_process_task(&join).await.unwrap();

        let engine = ProcessEngine::new(store.clone(), NoopRunner);
        let execution = engine.start_process(process.id, json!({})).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert!(execution.last_error.contains("gated"));
        let process = store.process_by_id(process.id).await.unwrap().unwrap();
        assert_eq!(process.status, ProcessStatus::Failed);
    }

    #[tokio::test]
    async fn failing_condition_on_optional_task_skips_it() {
        let store = MemStore::new();
        let process = process_record(ProcessStatus::Draft);
        store.insert_process(&process).await.unwrap();

        let optional = task_record("optional-gated", TaskType::Automatic);
        store.insert_task(&optional).await.unwrap();
        let mut join = join_record(process.id, optional.id, 1, false);
        join.is_optional = true;
        join.execution_conditions.context_variable =
            Some(tributo_store::ContextVariableCondition {
                name: "approved".into(),
                value: json!(true),
            });
        store.insert_process_task(&join).await.unwrap();

        let follow_up = task_record("follow-up", TaskType::Automatic);
        store.insert_task(&follow_up).await.unwrap();
        store
            .insert_process_task(&join_record(process.id, follow_up.id, 2, false))
            .await
            .unwrap();

        let engine = ProcessEngine::new(store.clone(), NoopRunner);
        let execution = engine.start_process(process.id, json!({})).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Completed);

        let joined = store.process_tasks(process.id).await.unwrap();
        assert_eq!(joined[0].1.status, TaskStatus::Cancelled);
        assert_eq!(joined[1].1.status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn context_variable_gate_passes_when_context_matches() {
        let store = MemStore::new();
        let process = process_record(ProcessStatus::Draft);
        store.insert_process(&process).await.unwrap();

        let task = task_record("gated", TaskType::Automatic);
        store.insert_task(&task).await.unwrap();
        let mut join = join_record(process.id, task.id, 1, false);
        join.execution_conditions.context_variable =
            Some(tributo_store::ContextVariableCondition {
                name: "approved".into(),
                value: json!(true),
            });
        store.insert_process_task(&join).await.unwrap();

        let engine = ProcessEngine::new(store.clone(), NoopRunner);
        let execution = engine
            .start_process(process.id, json!({"approved": true}))
            .await
            .unwrap();
        assert_eq!(execution.status, ExecutionStatus::Completed);
    }

    #[tokio::test]
    async fn parallel_wave_completes_in_any_order() {
        let store = MemStore::new();
        let process = build_process(
            &store,
            &[
                (1, true, TaskType::Automatic),
                (1, true, TaskType::Automatic),
                (2, false, TaskType::Automatic),
            ],
        )
        .await;

        let engine = ProcessEngine::new(store.clone(), NoopRunner);
        let execution = engine.start_process(process.id, json!({})).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert_eq!(execution.completed_steps, 3);
    }

    #[tokio::test]
    async fn failed_runner_fails_the_process() {
        #[derive(Clone)]
        struct FailingRunner;
        impl TaskRunner for FailingRunner {
            async fn run(&self, _task: &TaskRecord) -> Result<Value, String> {
                Err("portal unavailable".to_string())
            }
        }

        let store = MemStore::new();
        let process = build_process(&store, &[(1, false, TaskType::Automatic)]).await;
        let engine = ProcessEngine::new(store.clone(), FailingRunner);
        let execution = engine.start_process(process.id, json!({})).await.unwrap();

        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert_eq!(execution.failed_steps, 1);
        let process = store.process_by_id(process.id).await.unwrap().unwrap();
        assert_eq!(process.status, ProcessStatus::Failed);
    }

    #[tokio::test]
    async fn pause_and_resume_round_trip() {
        let store = MemStore::new();
        let process = build_process(
            &store,
            &[
                (1, false, TaskType::Manual),
                (2, false, TaskType::Automatic),
            ],
        )
        .await;

        let engine = ProcessEngine::new(store.clone(), NoopRunner);
        let execution = engine.start_process(process.id, json!({})).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Running);

        engine.pause_process(process.id).await.unwrap();
        let paused = store.execution_by_id(execution.id).await.unwrap().unwrap();
        assert_eq!(paused.status, ExecutionStatus::Paused);
        let process_row = store.process_by_id(process.id).await.unwrap().unwrap();
        assert_eq!(process_row.status, ProcessStatus::Paused);

        engine.resume_process(process.id).await.unwrap();
        let resumed = store.execution_by_id(execution.id).await.unwrap().unwrap();
        assert_eq!(resumed.status, ExecutionStatus::Running);

        // Completing the manual task drives the rest to completion.
        let joined = store.process_tasks(process.id).await.unwrap();
        engine
            .complete_manual_task(execution.id, joined[0].1.id, None)
            .await
            .unwrap();
        let done = store.execution_by_id(execution.id).await.unwrap().unwrap();
        assert_eq!(done.status, ExecutionStatus::Completed);
    }

    #[tokio::test]
    async fn cancelled_process_aborts_at_the_next_wave() {
        let store = MemStore::new();
        let process = build_process(
            &store,
            &[
                (1, false, TaskType::Manual),
                (2, false, TaskType::Automatic),
            ],
        )
        .await;

        let engine = ProcessEngine::new(store.clone(), NoopRunner);
        let execution = engine.start_process(process.id, json!({})).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Running);

        engine.cancel_process(process.id).await.unwrap();
        // The next advancement attempt observes the cancellation.
        engine.execute_next_steps(execution.id).await.unwrap();

        let execution = store.execution_by_id(execution.id).await.unwrap().unwrap();
        assert_eq!(execution.status, ExecutionStatus::Cancelled);
    }
}
