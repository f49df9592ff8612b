//! Sync log persistence. Append-mostly: updates only touch counters,
//! progress and terminal fields.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use tributo_core::{CompanyId, SyncLogId, SyncStatus};

use super::{enum_from_str, enum_to_str, rut_from_columns};
use crate::error::StoreError;
use crate::records::SyncLogRecord;
use crate::traits::SyncCounters;

const SYNC_LOG_COLUMNS: &str = "id, company_id, company_digits, company_dv, task_id, sync_type, \
     status, user_email, description, sync_data, documents_processed, documents_created, \
     documents_updated, errors_count, progress_percentage, completed_at, error_message, \
     priority, created_at";

#[derive(sqlx::FromRow)]
struct SyncLogRow {
    id: Uuid,
    company_id: Option<Uuid>,
    company_digits: i64,
    company_dv: String,
    task_id: Option<String>,
    sync_type: String,
    status: String,
    user_email: String,
    description: String,
    sync_data: Value,
    documents_processed: i64,
    documents_created: i64,
    documents_updated: i64,
    errors_count: i64,
    progress_percentage: i32,
    completed_at: Option<DateTime<Utc>>,
    error_message: String,
    priority: String,
    created_at: DateTime<Utc>,
}

impl SyncLogRow {
    fn into_record(self) -> Result<SyncLogRecord, StoreError> {
        Ok(SyncLogRecord {
            id: SyncLogId::from_uuid(self.id),
            company_id: self.company_id.map(CompanyId::from_uuid),
            company_tax_id: rut_from_columns("sync_log", self.company_digits, &self.company_dv)?,
            task_id: self.task_id,
            sync_type: self.sync_type,
            status: enum_from_str("sync_log", &self.status)?,
            user_email: self.user_email,
            description: self.description,
            sync_data: self.sync_data,
            documents_processed: self.documents_processed,
            documents_created: self.documents_created,
            documents_updated: self.documents_updated,
            errors_count: self.errors_count,
            progress_percentage: self.progress_percentage,
            completed_at: self.completed_at,
            error_message: self.error_message,
            priority: self.priority,
            created_at: self.created_at,
        })
    }
}

pub async fn insert_sync_log(pool: &PgPool, record: &SyncLogRecord) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO sii_sync_logs (id, company_id, company_digits, company_dv, task_id,
         sync_type, status, user_email, description, sync_data, documents_processed,
         documents_created, documents_updated, errors_count, progress_percentage,
         completed_at, error_message, priority, created_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                 $17, $18, $19)",
    )
    .bind(record.id.as_uuid())
    .bind(record.company_id.map(|c| *c.as_uuid()))
    .bind(record.company_tax_id.digits() as i64)
    .bind(record.company_tax_id.check_digit().to_string())
    .bind(&record.task_id)
    .bind(&record.sync_type)
    .bind(enum_to_str(&record.status))
    .bind(&record.user_email)
    .bind(&record.description)
    .bind(&record.sync_data)
    .bind(record.documents_processed)
    .bind(record.documents_created)
    .bind(record.documents_updated)
    .bind(record.errors_count)
    .bind(record.progress_percentage)
    .bind(record.completed_at)
    .bind(&record.error_message)
    .bind(&record.priority)
    .bind(record.created_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn sync_log(
    pool: &PgPool,
    id: SyncLogId,
) -> Result<Option<SyncLogRecord>, StoreError> {
    let row = sqlx::query_as::<_, SyncLogRow>(&format!(
        "SELECT {SYNC_LOG_COLUMNS} FROM sii_sync_logs WHERE id = $1"
    ))
    .bind(id.as_uuid())
    .fetch_optional(pool)
    .await?;
    row.map(SyncLogRow::into_record).transpose()
}

pub async fn sync_log_status(pool: &PgPool, id: SyncLogId) -> Result<SyncStatus, StoreError> {
    let row: Option<(String,)> =
        sqlx::query_as("SELECT status FROM sii_sync_logs WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(pool)
            .await?;
    match row {
        Some((status,)) => enum_from_str("sync_log", &status),
        None => Err(StoreError::not_found("sync_log", id)),
    }
}

pub async fn update_sync_progress(
    pool: &PgPool,
    id: SyncLogId,
    percentage: i32,
) -> Result<(), StoreError> {
    let result = sqlx::query("UPDATE sii_sync_logs SET progress_percentage = $2 WHERE id = $1")
        .bind(id.as_uuid())
        .bind(percentage.clamp(0, 100))
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::not_found("sync_log", id));
    }
    Ok(())
}

pub async fn update_sync_counters(
    pool: &PgPool,
    id: SyncLogId,
    counters: SyncCounters,
) -> Result<(), StoreError> {
    let result = sqlx::query(
        "UPDATE sii_sync_logs SET documents_processed = $2, documents_created = $3,
         documents_updated = $4, errors_count = $5 WHERE id = $1",
    )
    .bind(id.as_uuid())
    .bind(counters.processed)
    .bind(counters.created)
    .bind(counters.updated)
    .bind(counters.errors)
    .execute(pool)
    .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::not_found("sync_log", id));
    }
    Ok(())
}

pub async fn mark_sync_running(pool: &PgPool, id: SyncLogId) -> Result<(), StoreError> {
    let result = sqlx::query("UPDATE sii_sync_logs SET status = 'running' WHERE id = $1")
        .bind(id.as_uuid())
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::not_found("sync_log", id));
    }
    Ok(())
}

pub async fn finalize_sync_log(
    pool: &PgPool,
    id: SyncLogId,
    status: SyncStatus,
    error_message: Option<String>,
    sync_data: Option<Value>,
) -> Result<(), StoreError> {
    let progress_floor = if status == SyncStatus::Completed { 100 } else { 0 };
    let result = sqlx::query(
        "UPDATE sii_sync_logs SET status = $2, completed_at = $3,
         error_message = COALESCE($4, error_message),
         sync_data = COALESCE($5, sync_data),
         progress_percentage = GREATEST(progress_percentage, $6)
         WHERE id = $1",
    )
    .bind(id.as_uuid())
    .bind(enum_to_str(&status))
    .bind(Utc::now())
    .bind(error_message)
    .bind(sync_data)
    .bind(progress_floor)
    .execute(pool)
    .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::not_found("sync_log", id));
    }
    Ok(())
}
