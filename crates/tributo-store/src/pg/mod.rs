//! Postgres backend.
//!
//! One module per entity, free functions over `&PgPool`, runtime-bound
//! queries with `FromRow` row structs. `PgStore` wires the modules into
//! the storage traits.
//!
//! The schema lives in `schema.sql` at the crate root; apply it with
//! `psql -f schema.sql` (or the project's migration tooling) before first
//! use.

pub mod companies;
pub mod contacts;
pub mod credentials;
pub mod documents;
pub mod forms;
pub mod processes;
pub mod sync_logs;
pub mod templates;

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;

use tributo_core::{
    CompanyId, DocumentId, ExecutionId, FormCode, FormId, ProcessId, ProcessStatus, ProcessType,
    Rut, SegmentId, SyncLogId, SyncStatus, TaskId, TemplateId,
};

use crate::error::StoreError;
use crate::records::*;
use crate::traits::*;

/// Maximum rows returned from list queries, to bound memory on companies
/// with very large histories.
pub(crate) const LIST_MAX_ROWS: i64 = 10_000;

/// Decode a snake_case enum column through its serde rendering.
pub(crate) fn enum_from_str<T: serde::de::DeserializeOwned>(
    entity: &'static str,
    raw: &str,
) -> Result<T, StoreError> {
    serde_json::from_value(Value::String(raw.to_string()))
        .map_err(|e| StoreError::decode(entity, format!("bad enum value \"{raw}\": {e}")))
}

/// Render an enum to its stored snake_case spelling.
pub(crate) fn enum_to_str<T: serde::Serialize>(value: &T) -> String {
    match serde_json::to_value(value) {
        Ok(Value::String(s)) => s,
        _ => String::new(),
    }
}

/// Rebuild a [`Rut`] from its digit/check-digit columns.
pub(crate) fn rut_from_columns(
    entity: &'static str,
    digits: i64,
    dv: &str,
) -> Result<Rut, StoreError> {
    let digits = u32::try_from(digits)
        .map_err(|_| StoreError::decode(entity, format!("tax id digits out of range: {digits}")))?;
    let dv = dv
        .chars()
        .next()
        .ok_or_else(|| StoreError::decode(entity, "empty check digit"))?;
    Rut::new(digits, dv).map_err(|e| StoreError::decode(entity, e))
}

/// Decode a JSONB column into a typed value.
pub(crate) fn json_into<T: serde::de::DeserializeOwned>(
    entity: &'static str,
    value: Value,
) -> Result<T, StoreError> {
    serde_json::from_value(value).map_err(|e| StoreError::decode(entity, e))
}

/// Encode a typed value into a JSONB column.
pub(crate) fn json_from<T: serde::Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

/// The Postgres-backed store.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl CompanyStore for PgStore {
    async fn company_by_id(&self, id: CompanyId) -> Result<Option<CompanyRecord>, StoreError> {
        companies::company_by_id(&self.pool, id).await
    }

    async fn company_by_tax_id(&self, tax_id: Rut) -> Result<Option<CompanyRecord>, StoreError> {
        companies::company_by_tax_id(&self.pool, tax_id).await
    }

    async fn list_companies(&self) -> Result<Vec<CompanyRecord>, StoreError> {
        companies::list_companies(&self.pool).await
    }

    async fn insert_company(&self, record: &CompanyRecord) -> Result<(), StoreError> {
        companies::insert_company(&self.pool, record).await
    }

    async fn taxpayer_for_company(
        &self,
        company_id: CompanyId,
    ) -> Result<Option<TaxpayerRecord>, StoreError> {
        companies::taxpayer_for_company(&self.pool, company_id).await
    }

    async fn upsert_taxpayer(&self, record: &TaxpayerRecord) -> Result<(), StoreError> {
        companies::upsert_taxpayer(&self.pool, record).await
    }

    async fn set_taxpayer_segment(
        &self,
        company_id: CompanyId,
        segment_id: Option<SegmentId>,
    ) -> Result<(), StoreError> {
        companies::set_taxpayer_segment(&self.pool, company_id, segment_id).await
    }
}

impl CredentialStore for PgStore {
    async fn credentials_for_company(
        &self,
        company_id: CompanyId,
    ) -> Result<Option<CredentialRecord>, StoreError> {
        credentials::credentials_for_company(&self.pool, company_id).await
    }

    async fn upsert_credentials(&self, record: &CredentialRecord) -> Result<(), StoreError> {
        credentials::upsert_credentials(&self.pool, record).await
    }

    async fn record_verification_success(
        &self,
        company_id: CompanyId,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        credentials::record_verification_success(&self.pool, company_id, at).await
    }

    async fn record_verification_failure(
        &self,
        company_id: CompanyId,
    ) -> Result<i32, StoreError> {
        credentials::record_verification_failure(&self.pool, company_id).await
    }
}

impl DocumentStore for PgStore {
    async fn find_document(
        &self,
        key: &DocumentKey,
    ) -> Result<Option<DocumentRecord>, StoreError> {
        documents::find_document(&self.pool, key).await
    }

    async fn insert_document(&self, record: &DocumentRecord) -> Result<(), StoreError> {
        documents::insert_document(&self.pool, record).await
    }

    async fn update_document(&self, record: &DocumentRecord) -> Result<(), StoreError> {
        documents::update_document(&self.pool, record).await
    }

    async fn list_documents_for_company(
        &self,
        company_id: CompanyId,
        limit: i64,
    ) -> Result<Vec<DocumentRecord>, StoreError> {
        documents::list_documents_for_company(&self.pool, company_id, limit).await
    }

    async fn documents_with_unresolved_references(
        &self,
        company_id: Option<CompanyId>,
        limit: i64,
    ) -> Result<Vec<DocumentRecord>, StoreError> {
        documents::documents_with_unresolved_references(&self.pool, company_id, limit).await
    }

    async fn set_reference_document(
        &self,
        id: DocumentId,
        referenced: DocumentId,
    ) -> Result<(), StoreError> {
        documents::set_reference_document(&self.pool, id, referenced).await
    }

    async fn document_type(&self, code: i32) -> Result<Option<DocumentTypeRecord>, StoreError> {
        documents::document_type(&self.pool, code).await
    }

    async fn ensure_document_type(
        &self,
        record: &DocumentTypeRecord,
    ) -> Result<DocumentTypeRecord, StoreError> {
        documents::ensure_document_type(&self.pool, record).await
    }
}

impl ContactStore for PgStore {
    async fn contact_for(
        &self,
        company_id: CompanyId,
        tax_id: Rut,
    ) -> Result<Option<ContactRecord>, StoreError> {
        contacts::contact_for(&self.pool, company_id, tax_id).await
    }

    async fn insert_contact(&self, record: &ContactRecord) -> Result<(), StoreError> {
        contacts::insert_contact(&self.pool, record).await
    }

    async fn update_contact(&self, record: &ContactRecord) -> Result<(), StoreError> {
        contacts::update_contact(&self.pool, record).await
    }

    async fn list_contacts(
        &self,
        company_id: CompanyId,
    ) -> Result<Vec<ContactRecord>, StoreError> {
        contacts::list_contacts(&self.pool, company_id).await
    }
}

impl SyncLogStore for PgStore {
    async fn insert_sync_log(&self, record: &SyncLogRecord) -> Result<(), StoreError> {
        sync_logs::insert_sync_log(&self.pool, record).await
    }

    async fn sync_log(&self, id: SyncLogId) -> Result<Option<SyncLogRecord>, StoreError> {
        sync_logs::sync_log(&self.pool, id).await
    }

    async fn sync_log_status(&self, id: SyncLogId) -> Result<SyncStatus, StoreError> {
        sync_logs::sync_log_status(&self.pool, id).await
    }

    async fn update_sync_progress(
        &self,
        id: SyncLogId,
        percentage: i32,
    ) -> Result<(), StoreError> {
        sync_logs::update_sync_progress(&self.pool, id, percentage).await
    }

    async fn update_sync_counters(
        &self,
        id: SyncLogId,
        counters: SyncCounters,
    ) -> Result<(), StoreError> {
        sync_logs::update_sync_counters(&self.pool, id, counters).await
    }

    async fn mark_sync_running(&self, id: SyncLogId) -> Result<(), StoreError> {
        sync_logs::mark_sync_running(&self.pool, id).await
    }

    async fn finalize_sync_log(
        &self,
        id: SyncLogId,
        status: SyncStatus,
        error_message: Option<String>,
        sync_data: Option<Value>,
    ) -> Result<(), StoreError> {
        sync_logs::finalize_sync_log(&self.pool, id, status, error_message, sync_data).await
    }
}

impl FormStore for PgStore {
    async fn ensure_form_template(
        &self,
        record: &FormTemplateRecord,
    ) -> Result<FormTemplateRecord, StoreError> {
        forms::ensure_form_template(&self.pool, record).await
    }

    async fn find_form(
        &self,
        company_id: CompanyId,
        form_code: FormCode,
        sii_folio: &str,
    ) -> Result<Option<FormRecord>, StoreError> {
        forms::find_form(&self.pool, company_id, form_code, sii_folio).await
    }

    async fn find_form_by_issuer(
        &self,
        issuer: Rut,
        form_code: FormCode,
        sii_folio: &str,
    ) -> Result<Option<FormRecord>, StoreError> {
        forms::find_form_by_issuer(&self.pool, issuer, form_code, sii_folio).await
    }

    async fn form_by_id(&self, id: FormId) -> Result<Option<FormRecord>, StoreError> {
        forms::form_by_id(&self.pool, id).await
    }

    async fn insert_form(&self, record: &FormRecord) -> Result<(), StoreError> {
        forms::insert_form(&self.pool, record).await
    }

    async fn update_form(&self, record: &FormRecord) -> Result<(), StoreError> {
        forms::update_form(&self.pool, record).await
    }

    async fn forms_needing_details(
        &self,
        company_id: Option<CompanyId>,
        limit: i64,
    ) -> Result<Vec<FormRecord>, StoreError> {
        forms::forms_needing_details(&self.pool, company_id, limit).await
    }

    async fn mark_details_extracted(
        &self,
        id: FormId,
        method: &str,
        details: &[FormDetailValue],
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        forms::mark_details_extracted(&self.pool, id, method, details, at).await
    }
}

impl ProcessStore for PgStore {
    async fn insert_process(&self, record: &ProcessRecord) -> Result<(), StoreError> {
        processes::insert_process(&self.pool, record).await
    }

    async fn update_process(&self, record: &ProcessRecord) -> Result<(), StoreError> {
        processes::update_process(&self.pool, record).await
    }

    async fn process_by_id(&self, id: ProcessId) -> Result<Option<ProcessRecord>, StoreError> {
        processes::process_by_id(&self.pool, id).await
    }

    async fn process_exists_for_period(
        &self,
        company_id: CompanyId,
        process_type: ProcessType,
        period: &str,
    ) -> Result<bool, StoreError> {
        processes::process_exists_for_period(&self.pool, company_id, process_type, period).await
    }

    async fn processes_due_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        statuses: &[ProcessStatus],
    ) -> Result<Vec<ProcessRecord>, StoreError> {
        processes::processes_due_between(&self.pool, from, to, statuses).await
    }

    async fn processes_overdue(
        &self,
        now: DateTime<Utc>,
        statuses: &[ProcessStatus],
    ) -> Result<Vec<ProcessRecord>, StoreError> {
        processes::processes_overdue(&self.pool, now, statuses).await
    }

    async fn completed_recurring(
        &self,
        process_type: ProcessType,
    ) -> Result<Vec<ProcessRecord>, StoreError> {
        processes::completed_recurring(&self.pool, process_type).await
    }

    async fn insert_task(&self, record: &TaskRecord) -> Result<(), StoreError> {
        processes::insert_task(&self.pool, record).await
    }

    async fn update_task(&self, record: &TaskRecord) -> Result<(), StoreError> {
        processes::update_task(&self.pool, record).await
    }

    async fn task_by_id(&self, id: TaskId) -> Result<Option<TaskRecord>, StoreError> {
        processes::task_by_id(&self.pool, id).await
    }

    async fn insert_process_task(&self, record: &ProcessTaskRecord) -> Result<(), StoreError> {
        processes::insert_process_task(&self.pool, record).await
    }

    async fn process_tasks(
        &self,
        process_id: ProcessId,
    ) -> Result<Vec<(ProcessTaskRecord, TaskRecord)>, StoreError> {
        processes::process_tasks(&self.pool, process_id).await
    }

    async fn insert_execution(&self, record: &ExecutionRecord) -> Result<(), StoreError> {
        processes::insert_execution(&self.pool, record).await
    }

    async fn update_execution(&self, record: &ExecutionRecord) -> Result<(), StoreError> {
        processes::update_execution(&self.pool, record).await
    }

    async fn execution_by_id(
        &self,
        id: ExecutionId,
    ) -> Result<Option<ExecutionRecord>, StoreError> {
        processes::execution_by_id(&self.pool, id).await
    }

    async fn running_executions_for_process(
        &self,
        process_id: ProcessId,
    ) -> Result<Vec<ExecutionRecord>, StoreError> {
        processes::running_executions_for_process(&self.pool, process_id).await
    }

    async fn executions_for_process(
        &self,
        process_id: ProcessId,
    ) -> Result<Vec<ExecutionRecord>, StoreError> {
        processes::executions_for_process(&self.pool, process_id).await
    }
}

impl TemplateStore for PgStore {
    async fn insert_template(&self, record: &ProcessTemplateRecord) -> Result<(), StoreError> {
        templates::insert_template(&self.pool, record).await
    }

    async fn template_by_id(
        &self,
        id: TemplateId,
    ) -> Result<Option<ProcessTemplateRecord>, StoreError> {
        templates::template_by_id(&self.pool, id).await
    }

    async fn template_by_name(
        &self,
        name: &str,
    ) -> Result<Option<ProcessTemplateRecord>, StoreError> {
        templates::template_by_name(&self.pool, name).await
    }

    async fn list_templates(&self) -> Result<Vec<ProcessTemplateRecord>, StoreError> {
        templates::list_templates(&self.pool).await
    }

    async fn insert_template_task(
        &self,
        record: &ProcessTemplateTaskRecord,
    ) -> Result<(), StoreError> {
        templates::insert_template_task(&self.pool, record).await
    }

    async fn template_tasks(
        &self,
        template_id: TemplateId,
    ) -> Result<Vec<ProcessTemplateTaskRecord>, StoreError> {
        templates::template_tasks(&self.pool, template_id).await
    }

    async fn increment_template_usage(&self, id: TemplateId) -> Result<(), StoreError> {
        templates::increment_template_usage(&self.pool, id).await
    }

    async fn clear_templates(&self) -> Result<u64, StoreError> {
        templates::clear_templates(&self.pool).await
    }

    async fn insert_segment(&self, record: &SegmentRecord) -> Result<(), StoreError> {
        templates::insert_segment(&self.pool, record).await
    }

    async fn list_active_segments(&self) -> Result<Vec<SegmentRecord>, StoreError> {
        templates::list_active_segments(&self.pool).await
    }

    async fn insert_assignment_rule(
        &self,
        record: &AssignmentRuleRecord,
    ) -> Result<(), StoreError> {
        templates::insert_assignment_rule(&self.pool, record).await
    }

    async fn rules_for_segment(
        &self,
        segment_id: SegmentId,
    ) -> Result<Vec<AssignmentRuleRecord>, StoreError> {
        templates::rules_for_segment(&self.pool, segment_id).await
    }
}
