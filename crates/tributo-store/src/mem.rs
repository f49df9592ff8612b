//! In-memory storage backend.
//!
//! Backs tests, local stubs and dry runs with the same semantics as the
//! Postgres backend: the same unique keys are enforced, the same
//! read-modify-write sites are atomic (through `DashMap` entry locks), and
//! the same orderings are returned. Cheaply cloneable — all clones share
//! the data.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use uuid::Uuid;

use tributo_core::{
    CompanyId, DocumentId, ExecutionId, FormCode, FormId, ProcessId, ProcessStatus, ProcessType,
    Rut, SegmentId, SyncLogId, SyncStatus, TaskId, TemplateId,
};

use crate::error::StoreError;
use crate::records::*;
use crate::traits::*;

#[derive(Default)]
struct Inner {
    companies: DashMap<CompanyId, CompanyRecord>,
    taxpayers: DashMap<CompanyId, TaxpayerRecord>,
    credentials: DashMap<CompanyId, CredentialRecord>,
    document_types: DashMap<i32, DocumentTypeRecord>,
    documents: DashMap<DocumentId, DocumentRecord>,
    document_keys: DashMap<DocumentKey, DocumentId>,
    contacts: DashMap<(CompanyId, Rut), ContactRecord>,
    sync_logs: DashMap<SyncLogId, SyncLogRecord>,
    form_templates: DashMap<FormCode, FormTemplateRecord>,
    forms: DashMap<FormId, FormRecord>,
    processes: DashMap<ProcessId, ProcessRecord>,
    tasks: DashMap<TaskId, TaskRecord>,
    process_tasks: DashMap<Uuid, ProcessTaskRecord>,
    executions: DashMap<ExecutionId, ExecutionRecord>,
    templates: DashMap<TemplateId, ProcessTemplateRecord>,
    template_tasks: DashMap<Uuid, ProcessTemplateTaskRecord>,
    segments: DashMap<SegmentId, SegmentRecord>,
    rules: DashMap<Uuid, AssignmentRuleRecord>,
}

/// The in-memory store.
#[derive(Clone, Default)]
pub struct MemStore {
    inner: Arc<Inner>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Debug for MemStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemStore")
            .field("companies", &self.inner.companies.len())
            .field("documents", &self.inner.documents.len())
            .field("processes", &self.inner.processes.len())
            .finish()
    }
}

impl CompanyStore for MemStore {
    async fn company_by_id(&self, id: CompanyId) -> Result<Option<CompanyRecord>, StoreError> {
        Ok(self.inner.companies.get(&id).map(|r| r.value().clone()))
    }

    async fn company_by_tax_id(&self, tax_id: Rut) -> Result<Option<CompanyRecord>, StoreError> {
        Ok(self
            .inner
            .companies
            .iter()
            .find(|entry| entry.tax_id == tax_id)
            .map(|entry| entry.value().clone()))
    }

    async fn list_companies(&self) -> Result<Vec<CompanyRecord>, StoreError> {
        let mut companies: Vec<CompanyRecord> =
            self.inner.companies.iter().map(|e| e.value().clone()).collect();
        companies.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(companies)
    }

    async fn insert_company(&self, record: &CompanyRecord) -> Result<(), StoreError> {
        if self
            .inner
            .companies
            .iter()
            .any(|e| e.tax_id == record.tax_id)
        {
            return Err(StoreError::Conflict {
                entity: "company",
                detail: record.tax_id.canonical(),
            });
        }
        self.inner.companies.insert(record.id, record.clone());
        Ok(())
    }

    async fn taxpayer_for_company(
        &self,
        company_id: CompanyId,
    ) -> Result<Option<TaxpayerRecord>, StoreError> {
        Ok(self.inner.taxpayers.get(&company_id).map(|r| r.value().clone()))
    }

    async fn upsert_taxpayer(&self, record: &TaxpayerRecord) -> Result<(), StoreError> {
        self.inner
            .taxpayers
            .insert(record.company_id, record.clone());
        Ok(())
    }

    async fn set_taxpayer_segment(
        &self,
        company_id: CompanyId,
        segment_id: Option<SegmentId>,
    ) -> Result<(), StoreError> {
        match self.inner.taxpayers.get_mut(&company_id) {
            Some(mut taxpayer) => {
                taxpayer.segment_id = segment_id;
                Ok(())
            }
            None => Err(StoreError::not_found("taxpayer", company_id)),
        }
    }
}

impl CredentialStore for MemStore {
    async fn credentials_for_company(
        &self,
        company_id: CompanyId,
    ) -> Result<Option<CredentialRecord>, StoreError> {
        Ok(self.inner.credentials.get(&company_id).map(|r| r.value().clone()))
    }

    async fn upsert_credentials(&self, record: &CredentialRecord) -> Result<(), StoreError> {
        self.inner
            .credentials
            .insert(record.company_id, record.clone());
        Ok(())
    }

    async fn record_verification_success(
        &self,
        company_id: CompanyId,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        match self.inner.credentials.get_mut(&company_id) {
            Some(mut creds) => {
                creds.last_verified = Some(at);
                creds.verification_failures = 0;
                Ok(())
            }
            None => Err(StoreError::not_found("credentials", company_id)),
        }
    }

    async fn record_verification_failure(
        &self,
        company_id: CompanyId,
    ) -> Result<i32, StoreError> {
        match self.inner.credentials.get_mut(&company_id) {
            Some(mut creds) => {
                creds.verification_failures += 1;
                Ok(creds.verification_failures)
            }
            None => Err(StoreError::not_found("credentials", company_id)),
        }
    }
}

impl DocumentStore for MemStore {
    async fn find_document(
        &self,
        key: &DocumentKey,
    ) -> Result<Option<DocumentRecord>, StoreError> {
        Ok(self
            .inner
            .document_keys
            .get(key)
            .and_then(|entry| self.inner.documents.get(entry.value()).map(|r| r.value().clone())))
    }

    async fn insert_document(&self, record: &DocumentRecord) -> Result<(), StoreError> {
        let key = record.key();
        // Entry lock enforces the unique key atomically.
        match self.inner.document_keys.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(StoreError::Conflict {
                entity: "document",
                detail: format!("{}/{}/{}", key.issuer, key.type_code, key.folio),
            }),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(record.id);
                self.inner.documents.insert(record.id, record.clone());
                Ok(())
            }
        }
    }

    async fn update_document(&self, record: &DocumentRecord) -> Result<(), StoreError> {
        if !self.inner.documents.contains_key(&record.id) {
            return Err(StoreError::not_found("document", record.id));
        }
        self.inner.documents.insert(record.id, record.clone());
        Ok(())
    }

    async fn list_documents_for_company(
        &self,
        company_id: CompanyId,
        limit: i64,
    ) -> Result<Vec<DocumentRecord>, StoreError> {
        let mut documents: Vec<DocumentRecord> = self
            .inner
            .documents
            .iter()
            .filter(|e| e.company_id == Some(company_id))
            .map(|e| e.value().clone())
            .collect();
        documents.sort_by(|a, b| b.issue_date.cmp(&a.issue_date).then(b.folio.cmp(&a.folio)));
        documents.truncate(limit.max(0) as usize);
        Ok(documents)
    }

    async fn documents_with_unresolved_references(
        &self,
        company_id: Option<CompanyId>,
        limit: i64,
    ) -> Result<Vec<DocumentRecord>, StoreError> {
        let mut documents: Vec<DocumentRecord> = self
            .inner
            .documents
            .iter()
            .filter(|e| {
                e.reference_folio.is_some()
                    && e.reference_document.is_none()
                    && company_id.map(|c| e.company_id == Some(c)).unwrap_or(true)
            })
            .map(|e| e.value().clone())
            .collect();
        documents.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        documents.truncate(limit.max(0) as usize);
        Ok(documents)
    }

    async fn set_reference_document(
        &self,
        id: DocumentId,
        referenced: DocumentId,
    ) -> Result<(), StoreError> {
        match self.inner.documents.get_mut(&id) {
            Some(mut doc) => {
                doc.reference_document = Some(referenced);
                Ok(())
            }
            None => Err(StoreError::not_found("document", id)),
        }
    }

    async fn document_type(&self, code: i32) -> Result<Option<DocumentTypeRecord>, StoreError> {
        Ok(self.inner.document_types.get(&code).map(|r| r.value().clone()))
    }

    async fn ensure_document_type(
        &self,
        record: &DocumentTypeRecord,
    ) -> Result<DocumentTypeRecord, StoreError> {
        Ok(self
            .inner
            .document_types
            .entry(record.code)
            .or_insert_with(|| record.clone())
            .value()
            .clone())
    }
}

impl ContactStore for MemStore {
    async fn contact_for(
        &self,
        company_id: CompanyId,
        tax_id: Rut,
    ) -> Result<Option<ContactRecord>, StoreError> {
        Ok(self
            .inner
            .contacts
            .get(&(company_id, tax_id))
            .map(|r| r.value().clone()))
    }

    async fn insert_contact(&self, record: &ContactRecord) -> Result<(), StoreError> {
        let key = (record.company_id, record.tax_id);
        match self.inner.contacts.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(StoreError::Conflict {
                entity: "contact",
                detail: record.tax_id.canonical(),
            }),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(())
            }
        }
    }

    async fn update_contact(&self, record: &ContactRecord) -> Result<(), StoreError> {
        let key = (record.company_id, record.tax_id);
        if !self.inner.contacts.contains_key(&key) {
            return Err(StoreError::not_found("contact", record.tax_id));
        }
        self.inner.contacts.insert(key, record.clone());
        Ok(())
    }

    async fn list_contacts(
        &self,
        company_id: CompanyId,
    ) -> Result<Vec<ContactRecord>, StoreError> {
        let mut contacts: Vec<ContactRecord> = self
            .inner
            .contacts
            .iter()
            .filter(|e| e.company_id == company_id)
            .map(|e| e.value().clone())
            .collect();
        contacts.sort_by(|a, b| a.tax_id.cmp(&b.tax_id));
        Ok(contacts)
    }
}

impl SyncLogStore for MemStore {
    async fn insert_sync_log(&self, record: &SyncLogRecord) -> Result<(), StoreError> {
        self.inner.sync_logs.insert(record.id, record.clone());
        Ok(())
    }

    async fn sync_log(&self, id: SyncLogId) -> Result<Option<SyncLogRecord>, StoreError> {
        Ok(self.inner.sync_logs.get(&id).map(|r| r.value().clone()))
    }

    async fn sync_log_status(&self, id: SyncLogId) -> Result<SyncStatus, StoreError> {
        self.inner
            .sync_logs
            .get(&id)
            .map(|r| r.status)
            .ok_or_else(|| StoreError::not_found("sync_log", id))
    }

    async fn update_sync_progress(
        &self,
        id: SyncLogId,
        percentage: i32,
    ) -> Result<(), StoreError> {
        match self.inner.sync_logs.get_mut(&id) {
            Some(mut log) => {
                log.progress_percentage = percentage.clamp(0, 100);
                Ok(())
            }
            None => Err(StoreError::not_found("sync_log", id)),
        }
    }

    async fn update_sync_counters(
        &self,
        id: SyncLogId,
        counters: SyncCounters,
    ) -> Result<(), StoreError> {
        match self.inner.sync_logs.get_mut(&id) {
            Some(mut log) => {
                log.documents_processed = counters.processed;
                log.documents_created = counters.created;
                log.documents_updated = counters.updated;
                log.errors_count = counters.errors;
                Ok(())
            }
            None => Err(StoreError::not_found("sync_log", id)),
        }
    }

    async fn mark_sync_running(&self, id: SyncLogId) -> Result<(), StoreError> {
        match self.inner.sync_logs.get_mut(&id) {
            Some(mut log) => {
                log.status = SyncStatus::Running;
                Ok(())
            }
            None => Err(StoreError::not_found("sync_log", id)),
        }
    }

    async fn finalize_sync_log(
        &self,
        id: SyncLogId,
        status: SyncStatus,
        error_message: Option<String>,
        sync_data: Option<Value>,
    ) -> Result<(), StoreError> {
        match self.inner.sync_logs.get_mut(&id) {
            Some(mut log) => {
                log.status = status;
                log.completed_at = Some(Utc::now());
                if let Some(message) = error_message {
                    log.error_message = message;
                }
                if let Some(data) = sync_data {
                    log.sync_data = data;
                }
                if status == SyncStatus::Completed {
                    log.progress_percentage = 100;
                }
                Ok(())
            }
            None => Err(StoreError::not_found("sync_log", id)),
        }
    }
}

impl FormStore for MemStore {
    async fn ensure_form_template(
        &self,
        record: &FormTemplateRecord,
    ) -> Result<FormTemplateRecord, StoreError> {
        Ok(self
            .inner
            .form_templates
            .entry(record.form_code)
            .or_insert_with(|| record.clone())
            .value()
            .clone())
    }

    async fn find_form(
        &self,
        company_id: CompanyId,
        form_code: FormCode,
        sii_folio: &str,
    ) -> Result<Option<FormRecord>, StoreError> {
        Ok(self
            .inner
            .forms
            .iter()
            .find(|e| {
                e.company_id == Some(company_id)
                    && e.form_code == form_code
                    && e.sii_folio == sii_folio
            })
            .map(|e| e.value().clone()))
    }

    async fn find_form_by_issuer(
        &self,
        issuer: Rut,
        form_code: FormCode,
        sii_folio: &str,
    ) -> Result<Option<FormRecord>, StoreError> {
        Ok(self
            .inner
            .forms
            .iter()
            .find(|e| e.issuer == issuer && e.form_code == form_code && e.sii_folio == sii_folio)
            .map(|e| e.value().clone()))
    }

    async fn form_by_id(&self, id: FormId) -> Result<Option<FormRecord>, StoreError> {
        Ok(self.inner.forms.get(&id).map(|r| r.value().clone()))
    }

    async fn insert_form(&self, record: &FormRecord) -> Result<(), StoreError> {
        self.inner.forms.insert(record.id, record.clone());
        Ok(())
    }

    async fn update_form(&self, record: &FormRecord) -> Result<(), StoreError> {
        if !self.inner.forms.contains_key(&record.id) {
            return Err(StoreError::not_found("tax_form", record.id));
        }
        self.inner.forms.insert(record.id, record.clone());
        Ok(())
    }

    async fn forms_needing_details(
        &self,
        company_id: Option<CompanyId>,
        limit: i64,
    ) -> Result<Vec<FormRecord>, StoreError> {
        let mut forms: Vec<FormRecord> = self
            .inner
            .forms
            .iter()
            .filter(|e| {
                e.needs_detail_extraction()
                    && company_id.map(|c| e.company_id == Some(c)).unwrap_or(true)
            })
            .map(|e| e.value().clone())
            .collect();
        // Most recent periods first, matching the extraction queue order.
        forms.sort_by(|a, b| {
            b.tax_year
                .cmp(&a.tax_year)
                .then(b.tax_month.cmp(&a.tax_month))
        });
        forms.truncate(limit.max(0) as usize);
        Ok(forms)
    }

    async fn mark_details_extracted(
        &self,
        id: FormId,
        method: &str,
        details: &[FormDetailValue],
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        match self.inner.forms.get_mut(&id) {
            Some(mut form) => {
                form.details_extracted = true;
                form.details_extracted_at = Some(at);
                form.details_extraction_method = method.to_string();
                form.details_data = details.to_vec();
                form.updated_at = at;
                Ok(())
            }
            None => Err(StoreError::not_found("tax_form", id)),
        }
    }
}

impl ProcessStore for MemStore {
    async fn insert_process(&self, record: &ProcessRecord) -> Result<(), StoreError> {
        self.inner.processes.insert(record.id, record.clone());
        Ok(())
    }

    async fn update_process(&self, record: &ProcessRecord) -> Result<(), StoreError> {
        if !self.inner.processes.contains_key(&record.id) {
            return Err(StoreError::not_found("process", record.id));
        }
        self.inner.processes.insert(record.id, record.clone());
        Ok(())
    }

    async fn process_by_id(&self, id: ProcessId) -> Result<Option<ProcessRecord>, StoreError> {
        Ok(self.inner.processes.get(&id).map(|r| r.value().clone()))
    }

    async fn process_exists_for_period(
        &self,
        company_id: CompanyId,
        process_type: ProcessType,
        period: &str,
    ) -> Result<bool, StoreError> {
        Ok(self.inner.processes.iter().any(|e| {
            e.company_id == company_id
                && e.process_type == process_type
                && e.period().as_deref() == Some(period)
        }))
    }

    async fn processes_due_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        statuses: &[ProcessStatus],
    ) -> Result<Vec<ProcessRecord>, StoreError> {
        let mut processes: Vec<ProcessRecord> = self
            .inner
            .processes
            .iter()
            .filter(|e| {
                statuses.contains(&e.status)
                    && e.due_date.map(|d| d >= from && d <= to).unwrap_or(false)
            })
            .map(|e| e.value().clone())
            .collect();
        processes.sort_by(|a, b| a.due_date.cmp(&b.due_date));
        Ok(processes)
    }

    async fn processes_overdue(
        &self,
        now: DateTime<Utc>,
        statuses: &[ProcessStatus],
    ) -> Result<Vec<ProcessRecord>, StoreError> {
        let mut processes: Vec<ProcessRecord> = self
            .inner
            .processes
            .iter()
            .filter(|e| {
                statuses.contains(&e.status) && e.due_date.map(|d| d < now).unwrap_or(false)
            })
            .map(|e| e.value().clone())
            .collect();
        processes.sort_by(|a, b| a.due_date.cmp(&b.due_date));
        Ok(processes)
    }

    async fn completed_recurring(
        &self,
        process_type: ProcessType,
    ) -> Result<Vec<ProcessRecord>, StoreError> {
        let mut processes: Vec<ProcessRecord> = self
            .inner
            .processes
            .iter()
            .filter(|e| {
                e.process_type == process_type
                    && e.is_recurring
                    && e.status == ProcessStatus::Completed
            })
            .map(|e| e.value().clone())
            .collect();
        processes.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(processes)
    }

    async fn insert_task(&self, record: &TaskRecord) -> Result<(), StoreError> {
        self.inner.tasks.insert(record.id, record.clone());
        Ok(())
    }

    async fn update_task(&self, record: &TaskRecord) -> Result<(), StoreError> {
        if !self.inner.tasks.contains_key(&record.id) {
            return Err(StoreError::not_found("task", record.id));
        }
        self.inner.tasks.insert(record.id, record.clone());
        Ok(())
    }

    async fn task_by_id(&self, id: TaskId) -> Result<Option<TaskRecord>, StoreError> {
        Ok(self.inner.tasks.get(&id).map(|r| r.value().clone()))
    }

    async fn insert_process_task(&self, record: &ProcessTaskRecord) -> Result<(), StoreError> {
        self.inner.process_tasks.insert(record.id, record.clone());
        Ok(())
    }

    async fn process_tasks(
        &self,
        process_id: ProcessId,
    ) -> Result<Vec<(ProcessTaskRecord, TaskRecord)>, StoreError> {
        let mut joined: Vec<(ProcessTaskRecord, TaskRecord)> = self
            .inner
            .process_tasks
            .iter()
            .filter(|e| e.process_id == process_id)
            .filter_map(|e| {
                self.inner
                    .tasks
                    .get(&e.task_id)
                    .map(|task| (e.value().clone(), task.value().clone()))
            })
            .collect();
        joined.sort_by_key(|(join, _)| join.execution_order);
        Ok(joined)
    }

    async fn insert_execution(&self, record: &ExecutionRecord) -> Result<(), StoreError> {
        self.inner.executions.insert(record.id, record.clone());
        Ok(())
    }

    async fn update_execution(&self, record: &ExecutionRecord) -> Result<(), StoreError> {
        if !self.inner.executions.contains_key(&record.id) {
            return Err(StoreError::not_found("execution", record.id));
        }
        self.inner.executions.insert(record.id, record.clone());
        Ok(())
    }

    async fn execution_by_id(
        &self,
        id: ExecutionId,
    ) -> Result<Option<ExecutionRecord>, StoreError> {
        Ok(self.inner.executions.get(&id).map(|r| r.value().clone()))
    }

    async fn running_executions_for_process(
        &self,
        process_id: ProcessId,
    ) -> Result<Vec<ExecutionRecord>, StoreError> {
        Ok(self
            .inner
            .executions
            .iter()
            .filter(|e| {
                e.process_id == process_id
                    && e.status == tributo_core::ExecutionStatus::Running
            })
            .map(|e| e.value().clone())
            .collect())
    }

    async fn executions_for_process(
        &self,
        process_id: ProcessId,
    ) -> Result<Vec<ExecutionRecord>, StoreError> {
        let mut executions: Vec<ExecutionRecord> = self
            .inner
            .executions
            .iter()
            .filter(|e| e.process_id == process_id)
            .map(|e| e.value().clone())
            .collect();
        executions.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(executions)
    }
}

impl TemplateStore for MemStore {
    async fn insert_template(&self, record: &ProcessTemplateRecord) -> Result<(), StoreError> {
        self.inner.templates.insert(record.id, record.clone());
        Ok(())
    }

    async fn template_by_id(
        &self,
        id: TemplateId,
    ) -> Result<Option<ProcessTemplateRecord>, StoreError> {
        Ok(self.inner.templates.get(&id).map(|r| r.value().clone()))
    }

    async fn template_by_name(
        &self,
        name: &str,
    ) -> Result<Option<ProcessTemplateRecord>, StoreError> {
        Ok(self
            .inner
            .templates
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.value().clone()))
    }

    async fn list_templates(&self) -> Result<Vec<ProcessTemplateRecord>, StoreError> {
        let mut templates: Vec<ProcessTemplateRecord> =
            self.inner.templates.iter().map(|e| e.value().clone()).collect();
        templates.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(templates)
    }

    async fn insert_template_task(
        &self,
        record: &ProcessTemplateTaskRecord,
    ) -> Result<(), StoreError> {
        self.inner.template_tasks.insert(record.id, record.clone());
        Ok(())
    }

    async fn template_tasks(
        &self,
        template_id: TemplateId,
    ) -> Result<Vec<ProcessTemplateTaskRecord>, StoreError> {
        let mut tasks: Vec<ProcessTemplateTaskRecord> = self
            .inner
            .template_tasks
            .iter()
            .filter(|e| e.template_id == template_id)
            .map(|e| e.value().clone())
            .collect();
        tasks.sort_by_key(|t| t.execution_order);
        Ok(tasks)
    }

    async fn increment_template_usage(&self, id: TemplateId) -> Result<(), StoreError> {
        match self.inner.templates.get_mut(&id) {
            Some(mut template) => {
                template.usage_count += 1;
                Ok(())
            }
            None => Err(StoreError::not_found("process_template", id)),
        }
    }

    async fn clear_templates(&self) -> Result<u64, StoreError> {
        let removed = self.inner.templates.len() as u64;
        self.inner.templates.clear();
        self.inner.template_tasks.clear();
        Ok(removed)
    }

    async fn insert_segment(&self, record: &SegmentRecord) -> Result<(), StoreError> {
        self.inner.segments.insert(record.id, record.clone());
        Ok(())
    }

    async fn list_active_segments(&self) -> Result<Vec<SegmentRecord>, StoreError> {
        let mut segments: Vec<SegmentRecord> = self
            .inner
            .segments
            .iter()
            .filter(|e| e.is_active)
            .map(|e| e.value().clone())
            .collect();
        segments.sort_by(|a, b| a.segment_type.cmp(&b.segment_type));
        Ok(segments)
    }

    async fn insert_assignment_rule(
        &self,
        record: &AssignmentRuleRecord,
    ) -> Result<(), StoreError> {
        self.inner.rules.insert(record.id, record.clone());
        Ok(())
    }

    async fn rules_for_segment(
        &self,
        segment_id: SegmentId,
    ) -> Result<Vec<AssignmentRuleRecord>, StoreError> {
        let mut rules: Vec<AssignmentRuleRecord> = self
            .inner
            .rules
            .iter()
            .filter(|e| e.segment_id == segment_id && e.is_active)
            .map(|e| e.value().clone())
            .collect();
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
        Ok(rules)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    fn rut(s: &str) -> Rut {
        Rut::parse(s).unwrap()
    }

    fn document(issuer: &str, folio: i64) -> DocumentRecord {
        let now = Utc::now();
        DocumentRecord {
            id: DocumentId::new(),
            company_id: None,
            issuer: rut(issuer),
            issuer_name: "Emisor".into(),
            issuer_address: String::new(),
            issuer_activity: String::new(),
            recipient: rut("77794858-K"),
            recipient_name: "Receptor".into(),
            recipient_address: String::new(),
            type_code: 33,
            folio,
            issue_date: NaiveDate::from_ymd_opt(2024, 1, 10).unwrap(),
            status: tributo_core::DocumentStatus::Accepted,
            net_amount: Decimal::ZERO,
            tax_amount: Decimal::ZERO,
            exempt_amount: Decimal::ZERO,
            total_amount: Decimal::ZERO,
            sii_track_id: String::new(),
            raw_data: Value::Null,
            reference_folio: None,
            reference_type_code: None,
            reference_document: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn document_unique_key_is_enforced() {
        let store = MemStore::new();
        let a = document("76543210-5", 1);
        let mut b = document("76543210-5", 1);
        b.id = DocumentId::new();

        store.insert_document(&a).await.unwrap();
        let conflict = store.insert_document(&b).await.unwrap_err();
        assert!(conflict.is_conflict());

        // Different folio is a different identity.
        store.insert_document(&document("76543210-5", 2)).await.unwrap();
        let found = store.find_document(&a.key()).await.unwrap().unwrap();
        assert_eq!(found.id, a.id);
    }

    #[tokio::test]
    async fn verification_counters_reset_on_success() {
        let store = MemStore::new();
        let company = CompanyRecord::new(rut("77794858-K"), "Empresa SpA");
        store.insert_company(&company).await.unwrap();
        let creds = CredentialRecord {
            id: Uuid::new_v4(),
            company_id: company.id,
            user_email: "user@example.cl".into(),
            tax_id: company.tax_id,
            encrypted_password: "x".into(),
            is_active: true,
            last_verified: None,
            verification_failures: 0,
            created_at: Utc::now(),
        };
        store.upsert_credentials(&creds).await.unwrap();

        assert_eq!(store.record_verification_failure(company.id).await.unwrap(), 1);
        assert_eq!(store.record_verification_failure(company.id).await.unwrap(), 2);
        store
            .record_verification_success(company.id, Utc::now())
            .await
            .unwrap();
        let reloaded = store
            .credentials_for_company(company.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reloaded.verification_failures, 0);
        assert!(reloaded.last_verified.is_some());
    }

    #[tokio::test]
    async fn process_period_dedupe_probe() {
        let store = MemStore::new();
        let company_id = CompanyId::new();
        let process = ProcessRecord {
            id: ProcessId::new(),
            name: "F29 - Empresa".into(),
            description: String::new(),
            process_type: ProcessType::TaxMonthly,
            company_id,
            company_tax_id: rut("77794858-K"),
            status: ProcessStatus::Active,
            is_template: false,
            parent_process: None,
            created_by: "system".into(),
            assigned_to: "system".into(),
            start_date: None,
            due_date: None,
            completed_at: None,
            is_recurring: true,
            recurrence_type: tributo_core::RecurrenceType::Monthly,
            recurrence_config: RecurrenceConfig::default(),
            config_data: serde_json::json!({"period": "2024-01"}),
            created_at: Utc::now(),
        };
        store.insert_process(&process).await.unwrap();

        assert!(store
            .process_exists_for_period(company_id, ProcessType::TaxMonthly, "2024-01")
            .await
            .unwrap());
        assert!(!store
            .process_exists_for_period(company_id, ProcessType::TaxMonthly, "2024-02")
            .await
            .unwrap());
        assert!(!store
            .process_exists_for_period(company_id, ProcessType::TaxAnnual, "2024-01")
            .await
            .unwrap());
    }
}
