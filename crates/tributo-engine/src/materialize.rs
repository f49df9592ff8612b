//! Template materialisation.
//!
//! Instantiates a template as a concrete process: the process header with
//! its recurrence fields and computed due date, one task per template
//! task, and the join rows carrying the original offsets so due dates can
//! be recomputed later.
//!
//! Due-date computation per task:
//! - an absolute due date wins;
//! - a positive offset counts from now (process start);
//! - a negative or zero offset counts from the process due date;
//! - `due_date_from_previous` (and any task with nothing set) anchors on
//!   the process due date.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use rust_decimal::prelude::ToPrimitive;
use serde_json::{Map, Value};

use tributo_core::{ProcessId, ProcessStatus, RecurrenceType, TaskId, TaskStatus, TaxPeriod};
use tributo_store::{
    CompanyRecord, ProcessRecord, ProcessStore, ProcessTaskRecord, ProcessTemplateRecord,
    ProcessTemplateTaskRecord, RecurrenceConfig, TaskRecord, TemplateStore,
};
use uuid::Uuid;

use crate::error::EngineError;
use crate::templates::validate_template_tasks;

/// Materialises templates into processes.
#[derive(Debug, Clone)]
pub struct ProcessMaterialiser<S> {
    store: S,
}

impl<S> ProcessMaterialiser<S>
where
    S: ProcessStore + TemplateStore,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Apply a stored template to a company. Returns the created process.
    pub async fn apply_template(
        &self,
        template: &ProcessTemplateRecord,
        company: &CompanyRecord,
        created_by: &str,
        overrides: Option<Value>,
    ) -> Result<ProcessRecord, EngineError> {
        if !template.is_available() {
            return Err(EngineError::TemplateNotAvailable(template.name.clone()));
        }
        let template_tasks = self.store.template_tasks(template.id).await?;
        validate_template_tasks(&template_tasks)?;

        let now = Utc::now();
        let due_date = compute_process_due_date(
            template.default_recurrence_type,
            &template.default_recurrence_config,
            now,
        );
        let config_data = merged_config(template, overrides, now);

        let process = ProcessRecord {
            id: ProcessId::new(),
            name: format!("{} - {}", template.name, company.business_name),
            description: template.description.clone(),
            process_type: template.process_type,
            company_id: company.id,
            company_tax_id: company.tax_id,
            status: ProcessStatus::Active,
            is_template: false,
            parent_process: None,
            created_by: created_by.to_string(),
            assigned_to: created_by.to_string(),
            start_date: None,
            due_date,
            completed_at: None,
            is_recurring: template.default_recurrence_type != RecurrenceType::None,
            recurrence_type: template.default_recurrence_type,
            recurrence_config: template.default_recurrence_config.clone(),
            config_data,
            created_at: now,
        };
        self.store.insert_process(&process).await?;

        for template_task in &template_tasks {
            self.materialise_task(&process, template_task, now).await?;
        }

        self.store.increment_template_usage(template.id).await?;
        tracing::info!(
            process = %process.name,
            company = %company.tax_id,
            tasks = template_tasks.len(),
            due_date = ?process.due_date,
            "process materialised from template"
        );
        Ok(process)
    }

    async fn materialise_task(
        &self,
        process: &ProcessRecord,
        template_task: &ProcessTemplateTaskRecord,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        let due_date = task_due_date(
            template_task.absolute_due_date,
            template_task.due_date_offset_days,
            template_task.due_date_from_previous,
            template_task.execution_order,
            process.due_date,
            now,
        );

        let task = TaskRecord {
            id: TaskId::new(),
            title: template_task.task_title.clone(),
            description: template_task.task_description.clone(),
            task_type: template_task.task_type,
            category: template_task
                .task_config
                .get("category")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            company_tax_id: process.company_tax_id,
            assigned_to: process.created_by.clone(),
            created_by: process.created_by.clone(),
            status: TaskStatus::Pending,
            priority: template_task.priority,
            due_date,
            started_at: None,
            completed_at: None,
            progress_percentage: 0,
            estimated_duration_secs: template_task
                .estimated_hours
                .map(|h| h * rust_decimal::Decimal::from(3600))
                .and_then(|secs| secs.to_i64()),
            actual_duration_secs: None,
            task_data: template_task.task_config.clone(),
            result_data: Value::Object(Map::new()),
            error_message: String::new(),
            is_recurring: false,
            recurrence_pattern: Value::Object(Map::new()),
            created_at: now,
        };
        self.store.insert_task(&task).await?;

        let join = ProcessTaskRecord {
            id: Uuid::new_v4(),
            process_id: process.id,
            task_id: task.id,
            execution_order: template_task.execution_order,
            is_optional: template_task.is_optional,
            can_run_parallel: template_task.can_run_parallel,
            execution_conditions: template_task_conditions(template_task),
            context_data: serde_json::json!({"template_task_id": template_task.id}),
            due_date_offset_days: template_task.due_date_offset_days,
            due_date_from_previous: template_task.due_date_from_previous,
            absolute_due_date: template_task.absolute_due_date,
        };
        self.store.insert_process_task(&join).await?;
        Ok(())
    }
}

/// Conditions travel from the template task's config block when present.
fn template_task_conditions(
    template_task: &ProcessTemplateTaskRecord,
) -> tributo_store::ExecutionConditions {
    template_task
        .task_config
        .get("execution_conditions")
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default()
}

/// The process due date for the upcoming period, per cadence:
/// monthly → `day_of_month` of next month; quarterly → day 20 of the month
/// after the current quarter; annual → `month`/`day` of next year.
pub fn compute_process_due_date(
    recurrence_type: RecurrenceType,
    config: &RecurrenceConfig,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let current = TaxPeriod::containing(now.date_naive());
    match recurrence_type {
        RecurrenceType::Monthly => {
            let due_period = current.next();
            let day = config.day_of_month.unwrap_or(12);
            Some(end_of_day(date_in_period(due_period, day)))
        }
        RecurrenceType::Quarterly => {
            let due_period = current.next_quarter_start();
            let day = config.day_of_month.unwrap_or(20);
            Some(end_of_day(date_in_period(due_period, day)))
        }
        RecurrenceType::Annual => {
            let month = config.month.unwrap_or(4);
            let day = config.day.unwrap_or(30);
            let period = TaxPeriod::new(current.year() + 1, month).ok()?;
            Some(end_of_day(date_in_period(period, day)))
        }
        RecurrenceType::None => None,
    }
}

/// A day within a period, clamped to the period's last valid day.
pub(crate) fn date_in_period(period: TaxPeriod, day: u32) -> NaiveDate {
    let mut day = day.clamp(1, 31);
    loop {
        if let Some(date) = NaiveDate::from_ymd_opt(period.year(), period.month(), day) {
            return date;
        }
        day -= 1;
    }
}

pub(crate) fn end_of_day(date: NaiveDate) -> DateTime<Utc> {
    let time = NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN);
    Utc.from_utc_datetime(&date.and_time(time))
}

/// Absolute due date of one task, from its offset or chain position.
pub(crate) fn task_due_date(
    absolute: Option<DateTime<Utc>>,
    offset_days: Option<i32>,
    from_previous: bool,
    execution_order: i32,
    process_due: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    if let Some(absolute) = absolute {
        return Some(absolute);
    }
    if let Some(offset) = offset_days {
        return if offset > 0 {
            Some(now + Duration::days(offset as i64))
        } else {
            // Negative and zero offsets anchor on the process due date.
            process_due.map(|due| due + Duration::days(offset as i64))
        };
    }
    if from_previous && execution_order > 1 {
        // Chain-anchored tasks currently inherit the process due date; a
        // refinement may later anchor them on predecessor completion.
        return process_due;
    }
    process_due
}

fn merged_config(
    template: &ProcessTemplateRecord,
    overrides: Option<Value>,
    now: DateTime<Utc>,
) -> Value {
    let mut config = match &template.template_config {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };
    if let Some(Value::Object(overrides)) = overrides {
        for (key, value) in overrides {
            config.insert(key, value);
        }
    }
    // The covered period keys recurrence dedupe; honour an override.
    if !config.contains_key("period") {
        let current = TaxPeriod::containing(now.date_naive());
        let period = match template.default_recurrence_type {
            RecurrenceType::Annual => current.year().to_string(),
            _ => current.dashed(),
        };
        config.insert("period".to_string(), Value::String(period));
    }
    Value::Object(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tributo_core::Rut;
    use tributo_store::{CompanyStore, MemStore};

    use crate::templates::TemplateFactory;

    async fn persist_definition(
        store: &MemStore,
        definition: crate::templates::TemplateDefinition,
    ) -> ProcessTemplateRecord {
        let (template, tasks) = definition.build();
        store.insert_template(&template).await.unwrap();
        for task in tasks {
            store.insert_template_task(&task).await.unwrap();
        }
        template
    }

    #[tokio::test]
    async fn f29_materialisation_matches_the_monthly_shape() {
        let store = MemStore::new();
        let company = CompanyRecord::new(Rut::parse("77794858-K").unwrap(), "Empresa SpA");
        store.insert_company(&company).await.unwrap();
        let template = persist_definition(&store, TemplateFactory::f29_monthly()).await;

        let materialiser = ProcessMaterialiser::new(store.clone());
        let process = materialiser
            .apply_template(&template, &company, "contadora@example.cl", None)
            .await
            .unwrap();

        assert_eq!(process.status, ProcessStatus::Active);
        assert!(process.is_recurring);
        assert_eq!(process.name, "F29 - Declaración Mensual IVA - Empresa SpA");

        // Due the 12th of next month.
        let due = process.due_date.unwrap();
        let expected_period = TaxPeriod::containing(Utc::now().date_naive()).next();
        assert_eq!(due.date_naive(), date_in_period(expected_period, 12));

        let joined = store.process_tasks(process.id).await.unwrap();
        assert_eq!(joined.len(), 8);
        // Join rows retain the template offsets for recomputation.
        assert_eq!(joined[0].0.due_date_offset_days, Some(-10));
        assert_eq!(
            joined[0].1.due_date.unwrap(),
            due + Duration::days(-10)
        );
        // The due-date anchor task lands exactly on the process due date.
        let anchor = joined.iter().find(|(j, _)| j.due_date_offset_days == Some(0)).unwrap();
        assert_eq!(anchor.1.due_date.unwrap(), due);

        let template = store.template_by_id(template.id).await.unwrap().unwrap();
        assert_eq!(template.usage_count, 1);
    }

    #[tokio::test]
    async fn inactive_template_is_refused() {
        let store = MemStore::new();
        let company = CompanyRecord::new(Rut::parse("77794858-K").unwrap(), "Empresa SpA");
        store.insert_company(&company).await.unwrap();
        let (mut template, _) = TemplateFactory::f29_monthly().build();
        template.status = tributo_store::TemplateStatus::Inactive;
        store.insert_template(&template).await.unwrap();

        let materialiser = ProcessMaterialiser::new(store.clone());
        assert!(matches!(
            materialiser
                .apply_template(&template, &company, "x@example.cl", None)
                .await,
            Err(EngineError::TemplateNotAvailable(_))
        ));
    }

    #[test]
    fn offset_law_matches_the_anchor_rules() {
        let now = Utc::now();
        let due = now + Duration::days(30);
        for (offset, expected) in [
            (-10, due + Duration::days(-10)),
            (-5, due + Duration::days(-5)),
            (-1, due + Duration::days(-1)),
            (0, due),
        ] {
            assert_eq!(
                task_due_date(None, Some(offset), false, 1, Some(due), now).unwrap(),
                expected
            );
        }
        // Positive offsets anchor on now.
        assert_eq!(
            task_due_date(None, Some(2), false, 1, Some(due), now).unwrap(),
            now + Duration::days(2)
        );
        // Absolute dates win over everything.
        let fixed = now + Duration::days(99);
        assert_eq!(
            task_due_date(Some(fixed), Some(-5), true, 3, Some(due), now).unwrap(),
            fixed
        );
        // Chain-anchored and unset both fall back to the process due date.
        assert_eq!(
            task_due_date(None, None, true, 2, Some(due), now).unwrap(),
            due
        );
        assert_eq!(task_due_date(None, None, false, 1, Some(due), now).unwrap(), due);
    }

    #[test]
    fn annual_due_date_is_april_of_next_year() {
        let now = Utc::now();
        let config = RecurrenceConfig {
            month: Some(4),
            day: Some(30),
            ..RecurrenceConfig::default()
        };
        let due = compute_process_due_date(RecurrenceType::Annual, &config, now).unwrap();
        assert_eq!(due.date_naive().month(), 4);
        assert_eq!(due.date_naive().day(), 30);
        assert_eq!(due.date_naive().year(), now.year() + 1);
    }

    #[test]
    fn day_clamping_handles_short_months() {
        let feb = TaxPeriod::new(2023, 2).unwrap();
        assert_eq!(
            date_in_period(feb, 31),
            NaiveDate::from_ymd_opt(2023, 2, 28).unwrap()
        );
    }
}
