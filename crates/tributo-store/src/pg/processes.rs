//! Process, task, join-row and execution persistence.
//!
//! The execution row is the synchronisation point for wave advancement:
//! `update_execution` takes a row lock before writing so two workers
//! advancing the same execution serialise instead of losing updates.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use tributo_core::{
    CompanyId, ExecutionId, ProcessId, ProcessStatus, ProcessType, TaskId,
};

use super::{enum_from_str, enum_to_str, json_from, json_into, rut_from_columns, LIST_MAX_ROWS};
use crate::error::StoreError;
use crate::records::{ExecutionRecord, ProcessRecord, ProcessTaskRecord, TaskRecord};

const PROCESS_COLUMNS: &str = "id, name, description, process_type, company_id, company_digits, \
     company_dv, status, is_template, parent_process, created_by, assigned_to, start_date, \
     due_date, completed_at, is_recurring, recurrence_type, recurrence_config, config_data, \
     created_at";

#[derive(sqlx::FromRow)]
struct ProcessRow {
    id: Uuid,
    name: String,
    description: String,
    process_type: String,
    company_id: Uuid,
    company_digits: i64,
    company_dv: String,
    status: String,
    is_template: bool,
    parent_process: Option<Uuid>,
    created_by: String,
    assigned_to: String,
    start_date: Option<DateTime<Utc>>,
    due_date: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    is_recurring: bool,
    recurrence_type: String,
    recurrence_config: Value,
    config_data: Value,
    created_at: DateTime<Utc>,
}

impl ProcessRow {
    fn into_record(self) -> Result<ProcessRecord, StoreError> {
        Ok(ProcessRecord {
            id: ProcessId::from_uuid(self.id),
            name: self.name,
            description: self.description,
            process_type: enum_from_str("process", &self.process_type)?,
            company_id: CompanyId::from_uuid(self.company_id),
            company_tax_id: rut_from_columns("process", self.company_digits, &self.company_dv)?,
            status: enum_from_str("process", &self.status)?,
            is_template: self.is_template,
            parent_process: self.parent_process.map(ProcessId::from_uuid),
            created_by: self.created_by,
            assigned_to: self.assigned_to,
            start_date: self.start_date,
            due_date: self.due_date,
            completed_at: self.completed_at,
            is_recurring: self.is_recurring,
            recurrence_type: enum_from_str("process", &self.recurrence_type)?,
            recurrence_config: json_into("process", self.recurrence_config)?,
            config_data: self.config_data,
            created_at: self.created_at,
        })
    }
}

pub async fn insert_process(pool: &PgPool, record: &ProcessRecord) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO processes (id, name, description, process_type, company_id,
         company_digits, company_dv, status, is_template, parent_process, created_by,
         assigned_to, start_date, due_date, completed_at, is_recurring, recurrence_type,
         recurrence_config, config_data, created_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                 $17, $18, $19, $20)",
    )
    .bind(record.id.as_uuid())
    .bind(&record.name)
    .bind(&record.description)
    .bind(enum_to_str(&record.process_type))
    .bind(record.company_id.as_uuid())
    .bind(record.company_tax_id.digits() as i64)
    .bind(record.company_tax_id.check_digit().to_string())
    .bind(enum_to_str(&record.status))
    .bind(record.is_template)
    .bind(record.parent_process.map(|p| *p.as_uuid()))
    .bind(&record.created_by)
    .bind(&record.assigned_to)
    .bind(record.start_date)
    .bind(record.due_date)
    .bind(record.completed_at)
    .bind(record.is_recurring)
    .bind(enum_to_str(&record.recurrence_type))
    .bind(json_from(&record.recurrence_config))
    .bind(&record.config_data)
    .bind(record.created_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn update_process(pool: &PgPool, record: &ProcessRecord) -> Result<(), StoreError> {
    let result = sqlx::query(
        "UPDATE processes SET name = $2, description = $3, status = $4,
         parent_process = $5, assigned_to = $6, start_date = $7, due_date = $8,
         completed_at = $9, is_recurring = $10, recurrence_type = $11,
         recurrence_config = $12, config_data = $13
         WHERE id = $1",
    )
    .bind(record.id.as_uuid())
    .bind(&record.name)
    .bind(&record.description)
    .bind(enum_to_str(&record.status))
    .bind(record.parent_process.map(|p| *p.as_uuid()))
    .bind(&record.assigned_to)
    .bind(record.start_date)
    .bind(record.due_date)
    .bind(record.completed_at)
    .bind(record.is_recurring)
    .bind(enum_to_str(&record.recurrence_type))
    .bind(json_from(&record.recurrence_config))
    .bind(&record.config_data)
    .execute(pool)
    .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::not_found("process", record.id));
    }
    Ok(())
}

pub async fn process_by_id(
    pool: &PgPool,
    id: ProcessId,
) -> Result<Option<ProcessRecord>, StoreError> {
    let row = sqlx::query_as::<_, ProcessRow>(&format!(
        "SELECT {PROCESS_COLUMNS} FROM processes WHERE id = $1"
    ))
    .bind(id.as_uuid())
    .fetch_optional(pool)
    .await?;
    row.map(ProcessRow::into_record).transpose()
}

pub async fn process_exists_for_period(
    pool: &PgPool,
    company_id: CompanyId,
    process_type: ProcessType,
    period: &str,
) -> Result<bool, StoreError> {
    let row: Option<(i32,)> = sqlx::query_as(
        "SELECT 1 FROM processes
         WHERE company_id = $1 AND process_type = $2 AND config_data->>'period' = $3
         LIMIT 1",
    )
    .bind(company_id.as_uuid())
    .bind(enum_to_str(&process_type))
    .bind(period)
    .fetch_optional(pool)
    .await?;
    Ok(row.is_some())
}

fn status_strings(statuses: &[ProcessStatus]) -> Vec<String> {
    statuses.iter().map(enum_to_str).collect()
}

pub async fn processes_due_between(
    pool: &PgPool,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    statuses: &[ProcessStatus],
) -> Result<Vec<ProcessRecord>, StoreError> {
    let rows = sqlx::query_as::<_, ProcessRow>(&format!(
        "SELECT {PROCESS_COLUMNS} FROM processes
         WHERE due_date >= $1 AND due_date <= $2 AND status = ANY($3)
         ORDER BY due_date LIMIT $4"
    ))
    .bind(from)
    .bind(to)
    .bind(status_strings(statuses))
    .bind(LIST_MAX_ROWS)
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(ProcessRow::into_record).collect()
}

pub async fn processes_overdue(
    pool: &PgPool,
    now: DateTime<Utc>,
    statuses: &[ProcessStatus],
) -> Result<Vec<ProcessRecord>, StoreError> {
    let rows = sqlx::query_as::<_, ProcessRow>(&format!(
        "SELECT {PROCESS_COLUMNS} FROM processes
         WHERE due_date < $1 AND status = ANY($2)
         ORDER BY due_date LIMIT $3"
    ))
    .bind(now)
    .bind(status_strings(statuses))
    .bind(LIST_MAX_ROWS)
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(ProcessRow::into_record).collect()
}

pub async fn completed_recurring(
    pool: &PgPool,
    process_type: ProcessType,
) -> Result<Vec<ProcessRecord>, StoreError> {
    let rows = sqlx::query_as::<_, ProcessRow>(&format!(
        "SELECT {PROCESS_COLUMNS} FROM processes
         WHERE process_type = $1 AND is_recurring = TRUE AND status = 'completed'
         ORDER BY created_at LIMIT $2"
    ))
    .bind(enum_to_str(&process_type))
    .bind(LIST_MAX_ROWS)
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(ProcessRow::into_record).collect()
}

const TASK_COLUMNS: &str = "id, title, description, task_type, category, company_digits, \
     company_dv, assigned_to, created_by, status, priority, due_date, started_at, \
     completed_at, progress_percentage, estimated_duration_secs, actual_duration_secs, \
     task_data, result_data, error_message, is_recurring, recurrence_pattern, created_at";

#[derive(sqlx::FromRow)]
struct TaskRow {
    id: Uuid,
    title: String,
    description: String,
    task_type: String,
    category: String,
    company_digits: i64,
    company_dv: String,
    assigned_to: String,
    created_by: String,
    status: String,
    priority: String,
    due_date: Option<DateTime<Utc>>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    progress_percentage: i32,
    estimated_duration_secs: Option<i64>,
    actual_duration_secs: Option<i64>,
    task_data: Value,
    result_data: Value,
    error_message: String,
    is_recurring: bool,
    recurrence_pattern: Value,
    created_at: DateTime<Utc>,
}

impl TaskRow {
    fn into_record(self) -> Result<TaskRecord, StoreError> {
        Ok(TaskRecord {
            id: TaskId::from_uuid(self.id),
            title: self.title,
            description: self.description,
            task_type: enum_from_str("task", &self.task_type)?,
            category: self.category,
            company_tax_id: rut_from_columns("task", self.company_digits, &self.company_dv)?,
            assigned_to: self.assigned_to,
            created_by: self.created_by,
            status: enum_from_str("task", &self.status)?,
            priority: enum_from_str("task", &self.priority)?,
            due_date: self.due_date,
            started_at: self.started_at,
            completed_at: self.completed_at,
            progress_percentage: self.progress_percentage,
            estimated_duration_secs: self.estimated_duration_secs,
            actual_duration_secs: self.actual_duration_secs,
            task_data: self.task_data,
            result_data: self.result_data,
            error_message: self.error_message,
            is_recurring: self.is_recurring,
            recurrence_pattern: self.recurrence_pattern,
            created_at: self.created_at,
        })
    }
}

pub async fn insert_task(pool: &PgPool, record: &TaskRecord) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO tasks (id, title, description, task_type, category, company_digits,
         company_dv, assigned_to, created_by, status, priority, due_date, started_at,
         completed_at, progress_percentage, estimated_duration_secs, actual_duration_secs,
         task_data, result_data, error_message, is_recurring, recurrence_pattern, created_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                 $17, $18, $19, $20, $21, $22, $23)",
    )
    .bind(record.id.as_uuid())
    .bind(&record.title)
    .bind(&record.description)
    .bind(enum_to_str(&record.task_type))
    .bind(&record.category)
    .bind(record.company_tax_id.digits() as i64)
    .bind(record.company_tax_id.check_digit().to_string())
    .bind(&record.assigned_to)
    .bind(&record.created_by)
    .bind(enum_to_str(&record.status))
    .bind(enum_to_str(&record.priority))
    .bind(record.due_date)
    .bind(record.started_at)
    .bind(record.completed_at)
    .bind(record.progress_percentage)
    .bind(record.estimated_duration_secs)
    .bind(record.actual_duration_secs)
    .bind(&record.task_data)
    .bind(&record.result_data)
    .bind(&record.error_message)
    .bind(record.is_recurring)
    .bind(&record.recurrence_pattern)
    .bind(record.created_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn update_task(pool: &PgPool, record: &TaskRecord) -> Result<(), StoreError> {
    let result = sqlx::query(
        "UPDATE tasks SET title = $2, description = $3, status = $4, priority = $5,
         assigned_to = $6, due_date = $7, started_at = $8, completed_at = $9,
         progress_percentage = $10, actual_duration_secs = $11, task_data = $12,
         result_data = $13, error_message = $14
         WHERE id = $1",
    )
    .bind(record.id.as_uuid())
    .bind(&record.title)
    .bind(&record.description)
    .bind(enum_to_str(&record.status))
    .bind(enum_to_str(&record.priority))
    .bind(&record.assigned_to)
    .bind(record.due_date)
    .bind(record.started_at)
    .bind(record.completed_at)
    .bind(record.progress_percentage)
    .bind(record.actual_duration_secs)
    .bind(&record.task_data)
    .bind(&record.result_data)
    .bind(&record.error_message)
    .execute(pool)
    .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::not_found("task", record.id));
    }
    Ok(())
}

pub async fn task_by_id(pool: &PgPool, id: TaskId) -> Result<Option<TaskRecord>, StoreError> {
    let row = sqlx::query_as::<_, TaskRow>(&format!(
        "SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1"
    ))
    .bind(id.as_uuid())
    .fetch_optional(pool)
    .await?;
    row.map(TaskRow::into_record).transpose()
}

#[derive(sqlx::FromRow)]
struct ProcessTaskRow {
    id: Uuid,
    process_id: Uuid,
    task_id: Uuid,
    execution_order: i32,
    is_optional: bool,
    can_run_parallel: bool,
    execution_conditions: Value,
    context_data: Value,
    due_date_offset_days: Option<i32>,
    due_date_from_previous: bool,
    absolute_due_date: Option<DateTime<Utc>>,
}

impl ProcessTaskRow {
    fn into_record(self) -> Result<ProcessTaskRecord, StoreError> {
        Ok(ProcessTaskRecord {
            id: self.id,
            process_id: ProcessId::from_uuid(self.process_id),
            task_id: TaskId::from_uuid(self.task_id),
            execution_order: self.execution_order,
            is_optional: self.is_optional,
            can_run_parallel: self.can_run_parallel,
            execution_conditions: json_into("process_task", self.execution_conditions)?,
            context_data: self.context_data,
            due_date_offset_days: self.due_date_offset_days,
            due_date_from_previous: self.due_date_from_previous,
            absolute_due_date: self.absolute_due_date,
        })
    }
}

pub async fn insert_process_task(
    pool: &PgPool,
    record: &ProcessTaskRecord,
) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO process_tasks (id, process_id, task_id, execution_order, is_optional,
         can_run_parallel, execution_conditions, context_data, due_date_offset_days,
         due_date_from_previous, absolute_due_date)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
    )
    .bind(record.id)
    .bind(record.process_id.as_uuid())
    .bind(record.task_id.as_uuid())
    .bind(record.execution_order)
    .bind(record.is_optional)
    .bind(record.can_run_parallel)
    .bind(json_from(&record.execution_conditions))
    .bind(&record.context_data)
    .bind(record.due_date_offset_days)
    .bind(record.due_date_from_previous)
    .bind(record.absolute_due_date)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn process_tasks(
    pool: &PgPool,
    process_id: ProcessId,
) -> Result<Vec<(ProcessTaskRecord, TaskRecord)>, StoreError> {
    let join_rows = sqlx::query_as::<_, ProcessTaskRow>(
        "SELECT id, process_id, task_id, execution_order, is_optional, can_run_parallel,
         execution_conditions, context_data, due_date_offset_days, due_date_from_previous,
         absolute_due_date
         FROM process_tasks WHERE process_id = $1 ORDER BY execution_order",
    )
    .bind(process_id.as_uuid())
    .fetch_all(pool)
    .await?;

    let mut joined = Vec::with_capacity(join_rows.len());
    for row in join_rows {
        let join = row.into_record()?;
        let task = task_by_id(pool, join.task_id)
            .await?
            .ok_or_else(|| StoreError::not_found("task", join.task_id))?;
        joined.push((join, task));
    }
    Ok(joined)
}

#[derive(sqlx::FromRow)]
struct ExecutionRow {
    id: Uuid,
    process_id: Uuid,
    status: String,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    execution_context: Value,
    current_step: i32,
    total_steps: i32,
    completed_steps: i32,
    failed_steps: i32,
    last_error: String,
    error_count: i32,
}

impl ExecutionRow {
    fn into_record(self) -> Result<ExecutionRecord, StoreError> {
        Ok(ExecutionRecord {
            id: ExecutionId::from_uuid(self.id),
            process_id: ProcessId::from_uuid(self.process_id),
            status: enum_from_str("execution", &self.status)?,
            started_at: self.started_at,
            completed_at: self.completed_at,
            execution_context: self.execution_context,
            current_step: self.current_step,
            total_steps: self.total_steps,
            completed_steps: self.completed_steps,
            failed_steps: self.failed_steps,
            last_error: self.last_error,
            error_count: self.error_count,
        })
    }
}

pub async fn insert_execution(pool: &PgPool, record: &ExecutionRecord) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO process_executions (id, process_id, status, started_at, completed_at,
         execution_context, current_step, total_steps, completed_steps, failed_steps,
         last_error, error_count)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
    )
    .bind(record.id.as_uuid())
    .bind(record.process_id.as_uuid())
    .bind(enum_to_str(&record.status))
    .bind(record.started_at)
    .bind(record.completed_at)
    .bind(&record.execution_context)
    .bind(record.current_step)
    .bind(record.total_steps)
    .bind(record.completed_steps)
    .bind(record.failed_steps)
    .bind(&record.last_error)
    .bind(record.error_count)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn update_execution(pool: &PgPool, record: &ExecutionRecord) -> Result<(), StoreError> {
    let mut tx = pool.begin().await?;
    let locked: Option<(Uuid,)> =
        sqlx::query_as("SELECT id FROM process_executions WHERE id = $1 FOR UPDATE")
            .bind(record.id.as_uuid())
            .fetch_optional(&mut *tx)
            .await?;
    if locked.is_none() {
        return Err(StoreError::not_found("execution", record.id));
    }
    sqlx::query(
        "UPDATE process_executions SET status = $2, completed_at = $3,
         execution_context = $4, current_step = $5, completed_steps = $6,
         failed_steps = $7, last_error = $8, error_count = $9
         WHERE id = $1",
    )
    .bind(record.id.as_uuid())
    .bind(enum_to_str(&record.status))
    .bind(record.completed_at)
    .bind(&record.execution_context)
    .bind(record.current_step)
    .bind(record.completed_steps)
    .bind(record.failed_steps)
    .bind(&record.last_error)
    .bind(record.error_count)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;
    Ok(())
}

pub async fn execution_by_id(
    pool: &PgPool,
    id: ExecutionId,
) -> Result<Option<ExecutionRecord>, StoreError> {
    let row = sqlx::query_as::<_, ExecutionRow>(
        "SELECT id, process_id, status, started_at, completed_at, execution_context,
         current_step, total_steps, completed_steps, failed_steps, last_error, error_count
         FROM process_executions WHERE id = $1",
    )
    .bind(id.as_uuid())
    .fetch_optional(pool)
    .await?;
    row.map(ExecutionRow::into_record).transpose()
}

pub async fn running_executions_for_process(
    pool: &PgPool,
    process_id: ProcessId,
) -> Result<Vec<ExecutionRecord>, StoreError> {
    let rows = sqlx::query_as::<_, ExecutionRow>(
        "SELECT id, process_id, status, started_at, completed_at, execution_context,
         current_step, total_steps, completed_steps, failed_steps, last_error, error_count
         FROM process_executions WHERE process_id = $1 AND status = 'running'",
    )
    .bind(process_id.as_uuid())
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(ExecutionRow::into_record).collect()
}

pub async fn executions_for_process(
    pool: &PgPool,
    process_id: ProcessId,
) -> Result<Vec<ExecutionRecord>, StoreError> {
    let rows = sqlx::query_as::<_, ExecutionRow>(
        "SELECT id, process_id, status, started_at, completed_at, execution_context,
         current_step, total_steps, completed_steps, failed_steps, last_error, error_count
         FROM process_executions WHERE process_id = $1 ORDER BY started_at DESC",
    )
    .bind(process_id.as_uuid())
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(ExecutionRow::into_record).collect()
}
