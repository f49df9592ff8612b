//! Process template, segment and assignment-rule persistence.

use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use tributo_core::{SegmentId, TemplateId};

use super::{enum_from_str, enum_to_str, json_from, json_into, LIST_MAX_ROWS};
use crate::error::StoreError;
use crate::records::{
    AssignmentRuleRecord, ProcessTemplateRecord, ProcessTemplateTaskRecord, SegmentRecord,
};

const TEMPLATE_COLUMNS: &str = "id, name, description, process_type, status, \
     default_recurrence_type, default_recurrence_config, template_config, \
     available_variables, default_values, usage_count, created_by";

#[derive(sqlx::FromRow)]
struct TemplateRow {
    id: Uuid,
    name: String,
    description: String,
    process_type: String,
    status: String,
    default_recurrence_type: String,
    default_recurrence_config: Value,
    template_config: Value,
    available_variables: Value,
    default_values: Value,
    usage_count: i64,
    created_by: String,
}

impl TemplateRow {
    fn into_record(self) -> Result<ProcessTemplateRecord, StoreError> {
        Ok(ProcessTemplateRecord {
            id: TemplateId::from_uuid(self.id),
            name: self.name,
            description: self.description,
            process_type: enum_from_str("process_template", &self.process_type)?,
            status: enum_from_str("process_template", &self.status)?,
            default_recurrence_type: enum_from_str(
                "process_template",
                &self.default_recurrence_type,
            )?,
            default_recurrence_config: json_into(
                "process_template",
                self.default_recurrence_config,
            )?,
            template_config: self.template_config,
            available_variables: self.available_variables,
            default_values: self.default_values,
            usage_count: self.usage_count,
            created_by: self.created_by,
        })
    }
}

pub async fn insert_template(
    pool: &PgPool,
    record: &ProcessTemplateRecord,
) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO process_templates (id, name, description, process_type, status,
         default_recurrence_type, default_recurrence_config, template_config,
         available_variables, default_values, usage_count, created_by)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
    )
    .bind(record.id.as_uuid())
    .bind(&record.name)
    .bind(&record.description)
    .bind(enum_to_str(&record.process_type))
    .bind(enum_to_str(&record.status))
    .bind(enum_to_str(&record.default_recurrence_type))
    .bind(json_from(&record.default_recurrence_config))
    .bind(&record.template_config)
    .bind(&record.available_variables)
    .bind(&record.default_values)
    .bind(record.usage_count)
    .bind(&record.created_by)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn template_by_id(
    pool: &PgPool,
    id: TemplateId,
) -> Result<Option<ProcessTemplateRecord>, StoreError> {
    let row = sqlx::query_as::<_, TemplateRow>(&format!(
        "SELECT {TEMPLATE_COLUMNS} FROM process_templates WHERE id = $1"
    ))
    .bind(id.as_uuid())
    .fetch_optional(pool)
    .await?;
    row.map(TemplateRow::into_record).transpose()
}

pub async fn template_by_name(
    pool: &PgPool,
    name: &str,
) -> Result<Option<ProcessTemplateRecord>, StoreError> {
    let row = sqlx::query_as::<_, TemplateRow>(&format!(
        "SELECT {TEMPLATE_COLUMNS} FROM process_templates WHERE name = $1 LIMIT 1"
    ))
    .bind(name)
    .fetch_optional(pool)
    .await?;
    row.map(TemplateRow::into_record).transpose()
}

pub async fn list_templates(pool: &PgPool) -> Result<Vec<ProcessTemplateRecord>, StoreError> {
    let rows = sqlx::query_as::<_, TemplateRow>(&format!(
        "SELECT {TEMPLATE_COLUMNS} FROM process_templates ORDER BY name LIMIT $1"
    ))
    .bind(LIST_MAX_ROWS)
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(TemplateRow::into_record).collect()
}

#[derive(sqlx::FromRow)]
struct TemplateTaskRow {
    id: Uuid,
    template_id: Uuid,
    execution_order: i32,
    task_title: String,
    task_description: String,
    task_type: String,
    priority: String,
    is_optional: bool,
    can_run_parallel: bool,
    due_date_offset_days: Option<i32>,
    due_date_from_previous: bool,
    absolute_due_date: Option<chrono::DateTime<chrono::Utc>>,
    estimated_hours: Option<Decimal>,
    depends_on: Value,
    task_config: Value,
}

impl TemplateTaskRow {
    fn into_record(self) -> Result<ProcessTemplateTaskRecord, StoreError> {
        Ok(ProcessTemplateTaskRecord {
            id: self.id,
            template_id: TemplateId::from_uuid(self.template_id),
            execution_order: self.execution_order,
            task_title: self.task_title,
            task_description: self.task_description,
            task_type: enum_from_str("process_template_task", &self.task_type)?,
            priority: enum_from_str("process_template_task", &self.priority)?,
            is_optional: self.is_optional,
            can_run_parallel: self.can_run_parallel,
            due_date_offset_days: self.due_date_offset_days,
            due_date_from_previous: self.due_date_from_previous,
            absolute_due_date: self.absolute_due_date,
            estimated_hours: self.estimated_hours,
            depends_on: json_into("process_template_task", self.depends_on)?,
            task_config: self.task_config,
        })
    }
}

pub async fn insert_template_task(
    pool: &PgPool,
    record: &ProcessTemplateTaskRecord,
) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO process_template_tasks (id, template_id, execution_order, task_title,
         task_description, task_type, priority, is_optional, can_run_parallel,
         due_date_offset_days, due_date_from_previous, absolute_due_date, estimated_hours,
         depends_on, task_config)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)",
    )
    .bind(record.id)
    .bind(record.template_id.as_uuid())
    .bind(record.execution_order)
    .bind(&record.task_title)
    .bind(&record.task_description)
    .bind(enum_to_str(&record.task_type))
    .bind(enum_to_str(&record.priority))
    .bind(record.is_optional)
    .bind(record.can_run_parallel)
    .bind(record.due_date_offset_days)
    .bind(record.due_date_from_previous)
    .bind(record.absolute_due_date)
    .bind(record.estimated_hours)
    .bind(json_from(&record.depends_on))
    .bind(&record.task_config)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn template_tasks(
    pool: &PgPool,
    template_id: TemplateId,
) -> Result<Vec<ProcessTemplateTaskRecord>, StoreError> {
    let rows = sqlx::query_as::<_, TemplateTaskRow>(
        "SELECT id, template_id, execution_order, task_title, task_description, task_type,
         priority, is_optional, can_run_parallel, due_date_offset_days,
         due_date_from_previous, absolute_due_date, estimated_hours, depends_on, task_config
         FROM process_template_tasks WHERE template_id = $1 ORDER BY execution_order",
    )
    .bind(template_id.as_uuid())
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(TemplateTaskRow::into_record).collect()
}

pub async fn increment_template_usage(pool: &PgPool, id: TemplateId) -> Result<(), StoreError> {
    let result =
        sqlx::query("UPDATE process_templates SET usage_count = usage_count + 1 WHERE id = $1")
            .bind(id.as_uuid())
            .execute(pool)
            .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::not_found("process_template", id));
    }
    Ok(())
}

pub async fn clear_templates(pool: &PgPool) -> Result<u64, StoreError> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM process_template_tasks")
        .execute(&mut *tx)
        .await?;
    let removed = sqlx::query("DELETE FROM process_templates")
        .execute(&mut *tx)
        .await?
        .rows_affected();
    tx.commit().await?;
    Ok(removed)
}

#[derive(sqlx::FromRow)]
struct SegmentRow {
    id: Uuid,
    name: String,
    segment_type: String,
    criteria: Value,
    is_active: bool,
}

impl SegmentRow {
    fn into_record(self) -> Result<SegmentRecord, StoreError> {
        Ok(SegmentRecord {
            id: SegmentId::from_uuid(self.id),
            name: self.name,
            segment_type: self.segment_type,
            criteria: json_into("company_segment", self.criteria)?,
            is_active: self.is_active,
        })
    }
}

pub async fn insert_segment(pool: &PgPool, record: &SegmentRecord) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO company_segments (id, name, segment_type, criteria, is_active)
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(record.id.as_uuid())
    .bind(&record.name)
    .bind(&record.segment_type)
    .bind(json_from(&record.criteria))
    .bind(record.is_active)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn list_active_segments(pool: &PgPool) -> Result<Vec<SegmentRecord>, StoreError> {
    let rows = sqlx::query_as::<_, SegmentRow>(
        "SELECT id, name, segment_type, criteria, is_active FROM company_segments
         WHERE is_active = TRUE ORDER BY segment_type",
    )
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(SegmentRow::into_record).collect()
}

#[derive(sqlx::FromRow)]
struct RuleRow {
    id: Uuid,
    template_id: Uuid,
    segment_id: Uuid,
    priority: i32,
    is_active: bool,
    auto_apply: bool,
    conditions: Value,
}

impl RuleRow {
    fn into_record(self) -> AssignmentRuleRecord {
        AssignmentRuleRecord {
            id: self.id,
            template_id: TemplateId::from_uuid(self.template_id),
            segment_id: SegmentId::from_uuid(self.segment_id),
            priority: self.priority,
            is_active: self.is_active,
            auto_apply: self.auto_apply,
            conditions: self.conditions,
        }
    }
}

pub async fn insert_assignment_rule(
    pool: &PgPool,
    record: &AssignmentRuleRecord,
) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO process_assignment_rules (id, template_id, segment_id, priority,
         is_active, auto_apply, conditions)
         VALUES ($1, $2, $3, $4, $5, $6, $7)",
    )
    .bind(record.id)
    .bind(record.template_id.as_uuid())
    .bind(record.segment_id.as_uuid())
    .bind(record.priority)
    .bind(record.is_active)
    .bind(record.auto_apply)
    .bind(&record.conditions)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn rules_for_segment(
    pool: &PgPool,
    segment_id: SegmentId,
) -> Result<Vec<AssignmentRuleRecord>, StoreError> {
    let rows = sqlx::query_as::<_, RuleRow>(
        "SELECT id, template_id, segment_id, priority, is_active, auto_apply, conditions
         FROM process_assignment_rules
         WHERE segment_id = $1 AND is_active = TRUE
         ORDER BY priority DESC",
    )
    .bind(segment_id.as_uuid())
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(RuleRow::into_record).collect())
}
