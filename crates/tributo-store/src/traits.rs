//! Storage traits the pipeline and the engine are generic over.
//!
//! The traits are narrow on purpose: each service names only the
//! capabilities it uses, so a backend (or a test double) implements
//! exactly what a given flow exercises. [`crate::PgStore`] and
//! [`crate::MemStore`] implement all of them with identical semantics.

use chrono::{DateTime, Utc};
use serde_json::Value;
use tributo_core::{
    CompanyId, DocumentId, ExecutionId, FormCode, FormId, ProcessId, ProcessStatus, ProcessType,
    Rut, SegmentId, SyncLogId, SyncStatus, TaskId, TemplateId,
};

use crate::error::StoreError;
use crate::records::{
    AssignmentRuleRecord, CompanyRecord, ContactRecord, CredentialRecord, DocumentKey,
    DocumentRecord, DocumentTypeRecord, ExecutionRecord, FormDetailValue, FormRecord,
    FormTemplateRecord, ProcessRecord, ProcessTaskRecord, ProcessTemplateRecord,
    ProcessTemplateTaskRecord, SegmentRecord, SyncLogRecord, TaskRecord, TaxpayerRecord,
};

/// Counter deltas an ingestion job streams into its sync log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncCounters {
    pub processed: i64,
    pub created: i64,
    pub updated: i64,
    pub errors: i64,
}

impl SyncCounters {
    pub fn absorb(&mut self, other: SyncCounters) {
        self.processed += other.processed;
        self.created += other.created;
        self.updated += other.updated;
        self.errors += other.errors;
    }
}

/// Company and taxpayer lookups.
#[allow(async_fn_in_trait)]
pub trait CompanyStore {
    async fn company_by_id(&self, id: CompanyId) -> Result<Option<CompanyRecord>, StoreError>;
    async fn company_by_tax_id(&self, tax_id: Rut) -> Result<Option<CompanyRecord>, StoreError>;
    async fn list_companies(&self) -> Result<Vec<CompanyRecord>, StoreError>;
    async fn insert_company(&self, record: &CompanyRecord) -> Result<(), StoreError>;
    async fn taxpayer_for_company(
        &self,
        company_id: CompanyId,
    ) -> Result<Option<TaxpayerRecord>, StoreError>;
    async fn upsert_taxpayer(&self, record: &TaxpayerRecord) -> Result<(), StoreError>;
    async fn set_taxpayer_segment(
        &self,
        company_id: CompanyId,
        segment_id: Option<SegmentId>,
    ) -> Result<(), StoreError>;
}

/// Encrypted credential rows with verification counters.
#[allow(async_fn_in_trait)]
pub trait CredentialStore {
    async fn credentials_for_company(
        &self,
        company_id: CompanyId,
    ) -> Result<Option<CredentialRecord>, StoreError>;
    async fn upsert_credentials(&self, record: &CredentialRecord) -> Result<(), StoreError>;
    /// Reset the failure counter and stamp a successful verification.
    /// Runs under a row lock.
    async fn record_verification_success(
        &self,
        company_id: CompanyId,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;
    /// Increment the failure counter under a row lock. Returns the new
    /// count so callers can disable at the threshold.
    async fn record_verification_failure(
        &self,
        company_id: CompanyId,
    ) -> Result<i32, StoreError>;
}

/// Document rows and the shared type catalogue.
#[allow(async_fn_in_trait)]
pub trait DocumentStore {
    async fn find_document(&self, key: &DocumentKey)
        -> Result<Option<DocumentRecord>, StoreError>;
    async fn insert_document(&self, record: &DocumentRecord) -> Result<(), StoreError>;
    async fn update_document(&self, record: &DocumentRecord) -> Result<(), StoreError>;
    async fn list_documents_for_company(
        &self,
        company_id: CompanyId,
        limit: i64,
    ) -> Result<Vec<DocumentRecord>, StoreError>;
    /// Documents announcing a reference folio that has not been resolved
    /// to a row yet.
    async fn documents_with_unresolved_references(
        &self,
        company_id: Option<CompanyId>,
        limit: i64,
    ) -> Result<Vec<DocumentRecord>, StoreError>;
    async fn set_reference_document(
        &self,
        id: DocumentId,
        referenced: DocumentId,
    ) -> Result<(), StoreError>;
    async fn document_type(&self, code: i32) -> Result<Option<DocumentTypeRecord>, StoreError>;
    /// Idempotent get-or-create on the shared reference table.
    async fn ensure_document_type(
        &self,
        record: &DocumentTypeRecord,
    ) -> Result<DocumentTypeRecord, StoreError>;
}

/// Per-company contact registry.
#[allow(async_fn_in_trait)]
pub trait ContactStore {
    async fn contact_for(
        &self,
        company_id: CompanyId,
        tax_id: Rut,
    ) -> Result<Option<ContactRecord>, StoreError>;
    async fn insert_contact(&self, record: &ContactRecord) -> Result<(), StoreError>;
    async fn update_contact(&self, record: &ContactRecord) -> Result<(), StoreError>;
    async fn list_contacts(&self, company_id: CompanyId)
        -> Result<Vec<ContactRecord>, StoreError>;
}

/// Ingestion job records. Append-mostly: updates only touch counters and
/// terminal fields.
#[allow(async_fn_in_trait)]
pub trait SyncLogStore {
    async fn insert_sync_log(&self, record: &SyncLogRecord) -> Result<(), StoreError>;
    async fn sync_log(&self, id: SyncLogId) -> Result<Option<SyncLogRecord>, StoreError>;
    /// Current status only — the coordinator polls this between periods
    /// and batches for cooperative cancellation.
    async fn sync_log_status(&self, id: SyncLogId) -> Result<SyncStatus, StoreError>;
    async fn update_sync_progress(&self, id: SyncLogId, percentage: i32)
        -> Result<(), StoreError>;
    async fn update_sync_counters(
        &self,
        id: SyncLogId,
        counters: SyncCounters,
    ) -> Result<(), StoreError>;
    async fn mark_sync_running(&self, id: SyncLogId) -> Result<(), StoreError>;
    async fn finalize_sync_log(
        &self,
        id: SyncLogId,
        status: SyncStatus,
        error_message: Option<String>,
        sync_data: Option<Value>,
    ) -> Result<(), StoreError>;
}

/// Declared forms and their templates.
#[allow(async_fn_in_trait)]
pub trait FormStore {
    /// Idempotent get-or-create for a form family's template row.
    async fn ensure_form_template(
        &self,
        record: &FormTemplateRecord,
    ) -> Result<FormTemplateRecord, StoreError>;
    async fn find_form(
        &self,
        company_id: CompanyId,
        form_code: FormCode,
        sii_folio: &str,
    ) -> Result<Option<FormRecord>, StoreError>;
    /// Legacy fallback lookup on the issuer tuple.
    async fn find_form_by_issuer(
        &self,
        issuer: Rut,
        form_code: FormCode,
        sii_folio: &str,
    ) -> Result<Option<FormRecord>, StoreError>;
    async fn form_by_id(&self, id: FormId) -> Result<Option<FormRecord>, StoreError>;
    async fn insert_form(&self, record: &FormRecord) -> Result<(), StoreError>;
    async fn update_form(&self, record: &FormRecord) -> Result<(), StoreError>;
    async fn forms_needing_details(
        &self,
        company_id: Option<CompanyId>,
        limit: i64,
    ) -> Result<Vec<FormRecord>, StoreError>;
    async fn mark_details_extracted(
        &self,
        id: FormId,
        method: &str,
        details: &[FormDetailValue],
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;
}

/// Processes, tasks, join rows, and executions.
#[allow(async_fn_in_trait)]
pub trait ProcessStore {
    async fn insert_process(&self, record: &ProcessRecord) -> Result<(), StoreError>;
    async fn update_process(&self, record: &ProcessRecord) -> Result<(), StoreError>;
    async fn process_by_id(&self, id: ProcessId) -> Result<Option<ProcessRecord>, StoreError>;
    /// The `(company, process_type, config_data.period)` dedupe probe.
    async fn process_exists_for_period(
        &self,
        company_id: CompanyId,
        process_type: ProcessType,
        period: &str,
    ) -> Result<bool, StoreError>;
    /// Processes in the given statuses with a due date inside the window.
    async fn processes_due_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        statuses: &[ProcessStatus],
    ) -> Result<Vec<ProcessRecord>, StoreError>;
    /// Overdue scan: due date strictly before `now`.
    async fn processes_overdue(
        &self,
        now: DateTime<Utc>,
        statuses: &[ProcessStatus],
    ) -> Result<Vec<ProcessRecord>, StoreError>;
    /// Completed recurring processes of one cadence, for the batch sweep.
    async fn completed_recurring(
        &self,
        process_type: ProcessType,
    ) -> Result<Vec<ProcessRecord>, StoreError>;

    async fn insert_task(&self, record: &TaskRecord) -> Result<(), StoreError>;
    async fn update_task(&self, record: &TaskRecord) -> Result<(), StoreError>;
    async fn task_by_id(&self, id: TaskId) -> Result<Option<TaskRecord>, StoreError>;

    async fn insert_process_task(&self, record: &ProcessTaskRecord) -> Result<(), StoreError>;
    /// Join rows with their tasks, ordered by `execution_order`.
    async fn process_tasks(
        &self,
        process_id: ProcessId,
    ) -> Result<Vec<(ProcessTaskRecord, TaskRecord)>, StoreError>;

    async fn insert_execution(&self, record: &ExecutionRecord) -> Result<(), StoreError>;
    /// Full-record update under a row lock; the execution row is the wave
    /// synchronisation point.
    async fn update_execution(&self, record: &ExecutionRecord) -> Result<(), StoreError>;
    async fn execution_by_id(
        &self,
        id: ExecutionId,
    ) -> Result<Option<ExecutionRecord>, StoreError>;
    async fn running_executions_for_process(
        &self,
        process_id: ProcessId,
    ) -> Result<Vec<ExecutionRecord>, StoreError>;
    /// Every execution of a process, newest first.
    async fn executions_for_process(
        &self,
        process_id: ProcessId,
    ) -> Result<Vec<ExecutionRecord>, StoreError>;
}

/// Process templates, segments and assignment rules.
#[allow(async_fn_in_trait)]
pub trait TemplateStore {
    async fn insert_template(&self, record: &ProcessTemplateRecord) -> Result<(), StoreError>;
    async fn template_by_id(
        &self,
        id: TemplateId,
    ) -> Result<Option<ProcessTemplateRecord>, StoreError>;
    async fn template_by_name(
        &self,
        name: &str,
    ) -> Result<Option<ProcessTemplateRecord>, StoreError>;
    async fn list_templates(&self) -> Result<Vec<ProcessTemplateRecord>, StoreError>;
    async fn insert_template_task(
        &self,
        record: &ProcessTemplateTaskRecord,
    ) -> Result<(), StoreError>;
    /// Task definitions ordered by `execution_order`.
    async fn template_tasks(
        &self,
        template_id: TemplateId,
    ) -> Result<Vec<ProcessTemplateTaskRecord>, StoreError>;
    async fn increment_template_usage(&self, id: TemplateId) -> Result<(), StoreError>;
    /// Remove all templates and their tasks (seeding with `--clear`).
    async fn clear_templates(&self) -> Result<u64, StoreError>;

    async fn insert_segment(&self, record: &SegmentRecord) -> Result<(), StoreError>;
    /// Active segments ordered by segment type.
    async fn list_active_segments(&self) -> Result<Vec<SegmentRecord>, StoreError>;

    async fn insert_assignment_rule(
        &self,
        record: &AssignmentRuleRecord,
    ) -> Result<(), StoreError>;
    /// Active rules for a segment ordered by priority, highest first.
    async fn rules_for_segment(
        &self,
        segment_id: SegmentId,
    ) -> Result<Vec<AssignmentRuleRecord>, StoreError>;
}
