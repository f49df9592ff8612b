//! Recurrence generation.
//!
//! When a recurring process completes, the next occurrence is created for
//! the following period — computed from the *covered period* recorded in
//! `config_data.period`, never from the completion instant, so a late
//! completion still produces the right successor. Idempotent: a successor
//! that already exists (by company, type and period) is never duplicated.

use chrono::{DateTime, Utc};
use serde_json::Value;

use tributo_core::{ProcessId, ProcessStatus, ProcessType, RecurrenceType, TaskId, TaskStatus, TaxPeriod};
use tributo_store::{ProcessRecord, ProcessStore, ProcessTaskRecord, TaskRecord};
use uuid::Uuid;

use crate::error::EngineError;
use crate::materialize::{date_in_period, end_of_day, task_due_date};

/// Generates successor processes for completed recurring ones.
#[derive(Debug, Clone)]
pub struct RecurrenceGenerator<S> {
    store: S,
}

/// Summary of a batch sweep over completed recurring processes.
#[derive(Debug, Clone, Default)]
pub struct BatchGeneration {
    pub examined: u64,
    pub generated: u64,
    pub errors: Vec<String>,
}

impl<S> RecurrenceGenerator<S>
where
    S: ProcessStore,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Create the next occurrence of a completed recurring process.
    /// Returns `None` when the successor already exists (idempotence).
    pub async fn generate_next(
        &self,
        process_id: ProcessId,
    ) -> Result<Option<ProcessRecord>, EngineError> {
        let parent = self
            .store
            .process_by_id(process_id)
            .await?
            .ok_or_else(|| EngineError::ProcessNotFound(process_id.to_string()))?;

        if !parent.is_recurring {
            tracing::warn!(process = %parent.name, "process is not recurring");
            return Ok(None);
        }
        if parent.status != ProcessStatus::Completed {
            tracing::warn!(
                process = %parent.name,
                status = %parent.status,
                "recurrence requires a completed parent"
            );
            return Ok(None);
        }

        let (next_period, next_due) = next_occurrence(&parent)?;

        if self
            .store
            .process_exists_for_period(parent.company_id, parent.process_type, &next_period)
            .await?
        {
            tracing::info!(period = %next_period, "successor already exists");
            return Ok(None);
        }

        let now = Utc::now();
        let mut config_data = parent.config_data.clone();
        if let Value::Object(map) = &mut config_data {
            map.insert("period".to_string(), Value::String(next_period.clone()));
            map.insert(
                "recurrence_source".to_string(),
                Value::String("automatic".to_string()),
            );
        }

        let successor = ProcessRecord {
            id: ProcessId::new(),
            name: successor_name(&parent.name, &next_period),
            description: parent.description.clone(),
            process_type: parent.process_type,
            company_id: parent.company_id,
            company_tax_id: parent.company_tax_id,
            status: ProcessStatus::Active,
            is_template: false,
            // Always the immediate predecessor, never transitive.
            parent_process: Some(parent.id),
            created_by: parent.created_by.clone(),
            assigned_to: parent.assigned_to.clone(),
            start_date: None,
            due_date: Some(next_due),
            completed_at: None,
            is_recurring: true,
            recurrence_type: parent.recurrence_type,
            recurrence_config: parent.recurrence_config.clone(),
            config_data,
            created_at: now,
        };
        self.store.insert_process(&successor).await?;

        // Clone the structural shape: fresh tasks with recomputed due
        // dates, join rows keeping the original offsets.
        for (join, task) in self.store.process_tasks(parent.id).await? {
            let due_date = task_due_date(
                join.absolute_due_date,
                join.due_date_offset_days,
                join.due_date_from_previous,
                join.execution_order,
                successor.due_date,
                now,
            );
            let cloned_task = TaskRecord {
                id: TaskId::new(),
                title: retitle(&task.title, &next_period),
                status: TaskStatus::Pending,
                started_at: None,
                completed_at: None,
                progress_percentage: 0,
                actual_duration_secs: None,
                result_data: Value::Object(serde_json::Map::new()),
                error_message: String::new(),
                due_date,
                created_at: now,
                ..task.clone()
            };
            self.store.insert_task(&cloned_task).await?;
            self.store
                .insert_process_task(&ProcessTaskRecord {
                    id: Uuid::new_v4(),
                    process_id: successor.id,
                    task_id: cloned_task.id,
                    ..join.clone()
                })
                .await?;
        }

        tracing::info!(
            parent = %parent.name,
            successor = %successor.name,
            period = %next_period,
            due = %next_due,
            "recurring successor created"
        );
        Ok(Some(successor))
    }

    /// Sweep all completed recurring processes of one cadence and create
    /// any missing successor. Used as a monthly safety net.
    pub async fn generate_batch(
        &self,
        process_type: ProcessType,
    ) -> Result<BatchGeneration, EngineError> {
        let mut summary = BatchGeneration::default();
        for process in self.store.completed_recurring(process_type).await? {
            summary.examined += 1;
            match self.generate_next(process.id).await {
                Ok(Some(_)) => summary.generated += 1,
                Ok(None) => {}
                Err(e) => {
                    let detail = format!("{}: {e}", process.name);
                    tracing::error!(process = %process.name, error = %e, "batch generation failed");
                    summary.errors.push(detail);
                }
            }
        }
        tracing::info!(
            examined = summary.examined,
            generated = summary.generated,
            errors = summary.errors.len(),
            "recurrence batch sweep finished"
        );
        Ok(summary)
    }
}

/// Compute the successor's covered period and due date from the parent's
/// recurrence configuration.
fn next_occurrence(parent: &ProcessRecord) -> Result<(String, DateTime<Utc>), EngineError> {
    let period = parent.period().ok_or_else(|| {
        EngineError::NextPeriodUndefined(format!(
            "process {} carries no config_data.period",
            parent.name
        ))
    })?;

    match parent.recurrence_type {
        RecurrenceType::Monthly => {
            let current = TaxPeriod::parse(&period)
                .map_err(|e| EngineError::NextPeriodUndefined(e.to_string()))?;
            let next = current.next();
            let day = parent.recurrence_config.day_of_month.unwrap_or(12);
            // Due the configured day of the month following the covered
            // period.
            let due = end_of_day(date_in_period(next.next(), day));
            Ok((next.dashed(), due))
        }
        RecurrenceType::Quarterly => {
            let current = TaxPeriod::parse(&period)
                .map_err(|e| EngineError::NextPeriodUndefined(e.to_string()))?;
            let next_quarter = current.next_quarter_start();
            let after_quarter = quarter_end(next_quarter).next();
            let day = parent.recurrence_config.day_of_month.unwrap_or(20);
            let due = end_of_day(date_in_period(after_quarter, day));
            Ok((next_quarter.dashed(), due))
        }
        RecurrenceType::Annual => {
            let year: i32 = period
                .get(..4)
                .and_then(|y| y.parse().ok())
                .ok_or_else(|| {
                    EngineError::NextPeriodUndefined(format!("bad annual period {period}"))
                })?;
            let next_year = year + 1;
            let month = parent.recurrence_config.month.unwrap_or(4);
            let day = parent.recurrence_config.day.unwrap_or(30);
            let due_period = TaxPeriod::new(next_year + 1, month)
                .map_err(|e| EngineError::NextPeriodUndefined(e.to_string()))?;
            let due = end_of_day(date_in_period(due_period, day));
            Ok((next_year.to_string(), due))
        }
        RecurrenceType::None => Err(EngineError::NextPeriodUndefined(format!(
            "process {} has no recurrence cadence",
            parent.name
        ))),
    }
}

/// Last period of the quarter a period opens.
fn quarter_end(start: TaxPeriod) -> TaxPeriod {
    let mut p = start;
    while p.next().quarter() == start.quarter() && p.next().year() == start.year() {
        p = p.next();
    }
    p
}

/// Successor names swap the old period rendering for the new one when the
/// parent's name carries it; otherwise the period is appended.
fn successor_name(parent_name: &str, next_period: &str) -> String {
    format!("{} [{}]", strip_period_suffix(parent_name), next_period)
}

fn retitle(title: &str, next_period: &str) -> String {
    format!("{} [{}]", strip_period_suffix(title), next_period)
}

fn strip_period_suffix(text: &str) -> &str {
    match text.rfind(" [") {
        Some(pos) if text.ends_with(']') => &text[..pos],
        _ => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tributo_core::{CompanyId, Rut, TaskPriority, TaskType};
    use tributo_store::{MemStore, RecurrenceConfig};

    fn completed_monthly(period: &str) -> ProcessRecord {
        ProcessRecord {
            id: ProcessId::new(),
            name: "F29 - Declaración Mensual IVA - Empresa SpA".into(),
            description: String::new(),
            process_type: ProcessType::TaxMonthly,
            company_id: CompanyId::new(),
            company_tax_id: Rut::parse("77794858-K").unwrap(),
            status: ProcessStatus::Completed,
            is_template: false,
            parent_process: None,
            created_by: "system".into(),
            assigned_to: "system".into(),
            start_date: None,
            due_date: None,
            completed_at: Some(Utc::now()),
            is_recurring: true,
            recurrence_type: RecurrenceType::Monthly,
            recurrence_config: RecurrenceConfig {
                day_of_month: Some(12),
                ..RecurrenceConfig::default()
            },
            config_data: json!({"period": period, "form_type": "f29"}),
            created_at: Utc::now(),
        }
    }

    fn simple_task(title: &str) -> TaskRecord {
        TaskRecord {
            id: TaskId::new(),
            title: title.into(),
            description: String::new(),
            task_type: TaskType::Automatic,
            category: String::new(),
            company_tax_id: Rut::parse("77794858-K").unwrap(),
            assigned_to: "system".into(),
            created_by: "system".into(),
            status: TaskStatus::Completed,
            priority: TaskPriority::Normal,
            due_date: None,
            started_at: None,
            completed_at: Some(Utc::now()),
            progress_percentage: 100,
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

    #[tokio::test]
    async fn monthly_successor_covers_the_following_period() {
        let store = MemStore::new();
        let parent = completed_monthly("2024-01");
        store.insert_process(&parent).await.unwrap();

        let task = simple_task("Generar F29");
        store.insert_task(&task).await.unwrap();
        store
            .insert_process_task(&ProcessTaskRecord {
                id: Uuid::new_v4(),
                process_id: parent.id,
                task_id: task.id,
                execution_order: 1,
                is_optional: false,
                can_run_parallel: false,
                execution_conditions: Default::default(),
                context_data: json!({}),
                due_date_offset_days: Some(-1),
                due_date_from_previous: false,
                absolute_due_date: None,
            })
            .await
            .unwrap();

        let generator = RecurrenceGenerator::new(store.clone());
        let successor = generator.generate_next(parent.id).await.unwrap().unwrap();

        assert_eq!(successor.period().as_deref(), Some("2024-02"));
        // Due the 12th of the month following the covered period.
        let due = successor.due_date.unwrap().date_naive();
        assert_eq!(due, chrono::NaiveDate::from_ymd_opt(2024, 3, 12).unwrap());
        assert_eq!(successor.parent_process, Some(parent.id));
        assert_eq!(successor.status, ProcessStatus::Active);

        // The structural shape is cloned with pending tasks.
        let tasks = store.process_tasks(successor.id).await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].1.status, TaskStatus::Pending);
        assert_eq!(tasks[0].0.due_date_offset_days, Some(-1));
        assert_eq!(
            tasks[0].1.due_date.unwrap().date_naive(),
            chrono::NaiveDate::from_ymd_opt(2024, 3, 11).unwrap()
        );
    }

    #[tokio::test]
    async fn generation_is_idempotent() {
        let store = MemStore::new();
        let parent = completed_monthly("2024-01");
        store.insert_process(&parent).await.unwrap();

        let generator = RecurrenceGenerator::new(store.clone());
        let first = generator.generate_next(parent.id).await.unwrap();
        assert!(first.is_some());
        let second = generator.generate_next(parent.id).await.unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn non_completed_parent_is_refused() {
        let store = MemStore::new();
        let mut parent = completed_monthly("2024-01");
        parent.status = ProcessStatus::Active;
        store.insert_process(&parent).await.unwrap();

        let generator = RecurrenceGenerator::new(store.clone());
        assert!(generator.generate_next(parent.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn december_rolls_into_the_next_year() {
        let store = MemStore::new();
        let parent = completed_monthly("2023-12");
        store.insert_process(&parent).await.unwrap();

        let generator = RecurrenceGenerator::new(store.clone());
        let successor = generator.generate_next(parent.id).await.unwrap().unwrap();
        assert_eq!(successor.period().as_deref(), Some("2024-01"));
        assert_eq!(
            successor.due_date.unwrap().date_naive(),
            chrono::NaiveDate::from_ymd_opt(2024, 2, 12).unwrap()
        );
    }

    #[tokio::test]
    async fn quarterly_successor_and_due_date() {
        let store = MemStore::new();
        let mut parent = completed_monthly("2024-01");
        parent.process_type = ProcessType::TaxQuarterly;
        parent.recurrence_type = RecurrenceType::Quarterly;
        parent.recurrence_config = RecurrenceConfig {
            day_of_month: Some(20),
            ..RecurrenceConfig::default()
        };
        store.insert_process(&parent).await.unwrap();

        let generator = RecurrenceGenerator::new(store.clone());
        let successor = generator.generate_next(parent.id).await.unwrap().unwrap();
        // Q1-covered process → successor covers Q2, due day 20 after Q2.
        assert_eq!(successor.period().as_deref(), Some("2024-04"));
        assert_eq!(
            successor.due_date.unwrap().date_naive(),
            chrono::NaiveDate::from_ymd_opt(2024, 7, 20).unwrap()
        );
    }

    #[tokio::test]
    async fn annual_successor_and_due_date() {
        let store = MemStore::new();
        let mut parent = completed_monthly("2023");
        parent.process_type = ProcessType::TaxAnnual;
        parent.recurrence_type = RecurrenceType::Annual;
        parent.recurrence_config = RecurrenceConfig {
            month: Some(4),
            day: Some(30),
            ..RecurrenceConfig::default()
        };
        store.insert_process(&parent).await.unwrap();

        let generator = RecurrenceGenerator::new(store.clone());
        let successor = generator.generate_next(parent.id).await.unwrap().unwrap();
        assert_eq!(successor.period().as_deref(), Some("2024"));
        assert_eq!(
            successor.due_date.unwrap().date_naive(),
            chrono::NaiveDate::from_ymd_opt(2025, 4, 30).unwrap()
        );
    }

    #[tokio::test]
    async fn batch_sweep_fills_gaps_once() {
        let store = MemStore::new();
        let parent = completed_monthly("2024-01");
        store.insert_process(&parent).await.unwrap();

        let generator = RecurrenceGenerator::new(store.clone());
        let sweep = generator
            .generate_batch(ProcessType::TaxMonthly)
            .await
            .unwrap();
        assert_eq!(sweep.examined, 1);
        assert_eq!(sweep.generated, 1);

        let sweep = generator
            .generate_batch(ProcessType::TaxMonthly)
            .await
            .unwrap();
        assert_eq!(sweep.generated, 0);
    }
}
