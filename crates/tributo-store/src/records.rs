//! Record structs for every persisted entity.
//!
//! These are the canonical in-process shapes: the Postgres backend maps
//! them to rows, the in-memory backend stores them directly. Free-form
//! payloads (portal responses, template bodies) stay `serde_json::Value`;
//! every map whose key set is closed is an enumerated struct.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use tributo_core::{
    CompanyId, ContactId, DocumentCategory, DocumentDirection, DocumentId, ExecutionId,
    ExecutionStatus, FormCode, FormId, FormStatus, ProcessId, ProcessSettings, ProcessStatus,
    ProcessType, RecurrenceType, Rut, SegmentId, SyncLogId, SyncStatus, TaskId, TaskPriority,
    TaskStatus, TaskType, TemplateId,
};

// ---------------------------------------------------------------------------
// Companies and taxpayers
// ---------------------------------------------------------------------------

/// The owner aggregate. Everything else hangs off a company.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompanyRecord {
    pub id: CompanyId,
    pub tax_id: Rut,
    pub business_name: String,
    pub display_name: String,
    pub email: String,
    pub mobile_phone: String,
    pub is_active: bool,
    pub is_electronic_biller: bool,
    /// ISO currency code, `CLP` unless overridden.
    pub currency: String,
    /// Free-form notification preferences; genuinely user-authored.
    pub notification_preferences: Value,
    pub created_at: DateTime<Utc>,
}

impl CompanyRecord {
    /// A minimally-populated company, used by tests and onboarding.
    pub fn new(tax_id: Rut, business_name: &str) -> Self {
        Self {
            id: CompanyId::new(),
            tax_id,
            business_name: business_name.to_string(),
            display_name: business_name.to_string(),
            email: String::new(),
            mobile_phone: String::new(),
            is_active: true,
            is_electronic_biller: true,
            currency: "CLP".to_string(),
            notification_preferences: Value::Null,
            created_at: Utc::now(),
        }
    }
}

/// The taxpayer profile mirrored from the portal. 1:1 with its company.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaxpayerRecord {
    pub company_id: CompanyId,
    pub tax_id: Rut,
    pub razon_social: String,
    /// Full structured portal response, kept opaque.
    pub sii_raw_data: Option<Value>,
    pub data_source: String,
    pub last_sii_sync: Option<DateTime<Utc>>,
    pub is_verified: bool,
    pub is_active: bool,
    /// Date the taxpayer started activities; bounds full-history syncs.
    pub activity_start_date: Option<NaiveDate>,
    /// Closed map of process-enablement switches.
    pub settings: ProcessSettings,
    pub segment_id: Option<SegmentId>,
}

impl TaxpayerRecord {
    pub fn new(company_id: CompanyId, tax_id: Rut) -> Self {
        Self {
            company_id,
            tax_id,
            razon_social: String::new(),
            sii_raw_data: None,
            data_source: "sii_extraction".to_string(),
            last_sii_sync: None,
            is_verified: false,
            is_active: true,
            activity_start_date: None,
            settings: ProcessSettings::default(),
            segment_id: None,
        }
    }

    /// Merge a freshly fetched portal profile into this record.
    pub fn apply_profile(&mut self, razon_social: &str, raw: Value, now: DateTime<Utc>) {
        self.razon_social = razon_social.to_string();
        self.sii_raw_data = Some(raw);
        self.is_verified = true;
        self.last_sii_sync = Some(now);
    }
}

/// Encrypted portal credentials, unique per `(company, user)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub id: Uuid,
    pub company_id: CompanyId,
    pub user_email: String,
    pub tax_id: Rut,
    /// Opaque vault ciphertext.
    pub encrypted_password: String,
    pub is_active: bool,
    pub last_verified: Option<DateTime<Utc>>,
    /// Monotonic failure counter; reset on successful verification.
    pub verification_failures: i32,
    pub created_at: DateTime<Utc>,
}

impl CredentialRecord {
    /// Valid means active and fewer than three consecutive failures.
    pub fn is_credentials_valid(&self) -> bool {
        self.is_active && self.verification_failures < 3
    }
}

// ---------------------------------------------------------------------------
// Documents and contacts
// ---------------------------------------------------------------------------

/// Reference row for a document type code. Shared, never deleted once
/// referenced; created on demand when an unseen code appears.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentTypeRecord {
    pub code: i32,
    pub name: String,
    pub category: DocumentCategory,
    pub is_dte: bool,
    pub requires_recipient: bool,
    pub is_active: bool,
}

/// The unique identity of a document: issuer tuple, type code, folio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentKey {
    pub issuer: Rut,
    pub type_code: i32,
    pub folio: i64,
}

/// One persisted tax document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: DocumentId,
    /// Owning company. Writes always set it; legacy rows may lack it.
    pub company_id: Option<CompanyId>,
    pub issuer: Rut,
    pub issuer_name: String,
    pub issuer_address: String,
    pub issuer_activity: String,
    pub recipient: Rut,
    pub recipient_name: String,
    pub recipient_address: String,
    pub type_code: i32,
    pub folio: i64,
    pub issue_date: NaiveDate,
    pub status: tributo_core::DocumentStatus,
    pub net_amount: Decimal,
    pub tax_amount: Decimal,
    pub exempt_amount: Decimal,
    pub total_amount: Decimal,
    pub sii_track_id: String,
    /// Original portal payload, unprocessed.
    pub raw_data: Value,
    /// Folio/type of a referenced document, when the row announces one.
    pub reference_folio: Option<i64>,
    pub reference_type_code: Option<i32>,
    /// Resolved reference to the referenced document row.
    pub reference_document: Option<DocumentId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DocumentRecord {
    pub fn key(&self) -> DocumentKey {
        DocumentKey {
            issuer: self.issuer,
            type_code: self.type_code,
            folio: self.folio,
        }
    }

    /// Direction relative to the owning company's tax id: `received` iff
    /// the recipient tuple equals it, `issued` iff the issuer tuple does.
    /// At most one of the two can hold because issuer ≠ recipient on any
    /// well-formed document.
    pub fn direction(&self, company_tax_id: Rut) -> DocumentDirection {
        if self.issuer == company_tax_id {
            DocumentDirection::Issued
        } else if self.recipient == company_tax_id {
            DocumentDirection::Received
        } else {
            DocumentDirection::Unknown
        }
    }

    /// Copy every non-identity field from `incoming` into this record,
    /// preserving id, key fields and creation audit.
    pub fn absorb(&mut self, incoming: &DocumentRecord, now: DateTime<Utc>) {
        self.company_id = incoming.company_id.or(self.company_id);
        self.issuer_name = incoming.issuer_name.clone();
        self.issuer_address = incoming.issuer_address.clone();
        self.issuer_activity = incoming.issuer_activity.clone();
        self.recipient = incoming.recipient;
        self.recipient_name = incoming.recipient_name.clone();
        self.recipient_address = incoming.recipient_address.clone();
        self.issue_date = incoming.issue_date;
        self.status = incoming.status;
        self.net_amount = incoming.net_amount;
        self.tax_amount = incoming.tax_amount;
        self.exempt_amount = incoming.exempt_amount;
        self.total_amount = incoming.total_amount;
        self.sii_track_id = incoming.sii_track_id.clone();
        self.raw_data = incoming.raw_data.clone();
        self.reference_folio = incoming.reference_folio;
        self.reference_type_code = incoming.reference_type_code;
        self.updated_at = now;
    }
}

/// A per-company contact derived from document traffic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactRecord {
    pub id: ContactId,
    pub company_id: CompanyId,
    pub tax_id: Rut,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub address: String,
    pub category: String,
    pub is_client: bool,
    pub is_provider: bool,
    pub is_active: bool,
    pub notes: String,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Declared forms
// ---------------------------------------------------------------------------

/// Reference entity for one form family, keyed by its code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormTemplateRecord {
    pub form_code: FormCode,
    pub name: String,
    pub version: String,
    pub is_active: bool,
    /// Declarative sections-and-fields structure.
    pub form_structure: Value,
    pub validation_rules: Value,
    pub calculation_rules: Value,
}

/// One parsed field of a form's enrichment block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormDetailValue {
    pub code: String,
    pub label: String,
    /// Original portal rendering, kept verbatim.
    pub value_original: String,
    /// Canonical numeric value; `None` for empty/placeholder renderings.
    pub value_formatted: Option<Decimal>,
}

/// One declared form instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormRecord {
    pub id: FormId,
    pub company_id: Option<CompanyId>,
    /// Legacy issuer tuple, kept for backward indexing only.
    pub issuer: Rut,
    pub form_code: FormCode,
    pub tax_year: i32,
    pub tax_month: Option<u32>,
    /// `"YYYY-MM"` for monthly forms, `"YYYY"` for annual.
    pub tax_period: String,
    pub status: FormStatus,
    pub due_date: Option<NaiveDate>,
    pub submission_date: Option<DateTime<Utc>>,
    pub form_data: Value,
    pub total_tax_due: Option<Decimal>,
    pub total_paid: Decimal,
    pub balance_due: Option<Decimal>,
    /// Opaque portal folio; empty when the declaration has none.
    pub sii_folio: String,
    pub sii_response: Value,
    pub details_extracted: bool,
    pub details_extracted_at: Option<DateTime<Utc>>,
    pub details_extraction_method: String,
    pub details_data: Vec<FormDetailValue>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FormRecord {
    /// A form needs detail extraction when it has a portal folio and has
    /// not been enriched yet.
    pub fn needs_detail_extraction(&self) -> bool {
        !self.details_extracted && !self.sii_folio.is_empty()
    }

    /// Whether the enrichment block is fresher than `days`.
    pub fn has_recent_details(&self, days: i64, now: DateTime<Utc>) -> bool {
        self.details_extracted_at
            .map(|at| now - at < chrono::Duration::days(days))
            .unwrap_or(false)
    }
}

// ---------------------------------------------------------------------------
// Segmentation
// ---------------------------------------------------------------------------

/// A bounded numeric range used by segment criteria.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CriteriaRange {
    pub min: Option<i64>,
    pub max: Option<i64>,
}

/// The enumerated criteria map of a company segment. Every present
/// predicate must hold (AND); unknown keys cannot exist by construction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SegmentCriteria {
    /// Employee head-count range.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<CriteriaRange>,
    /// Acceptable economic activity descriptions.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub economic_activity: Vec<String>,
    /// Acceptable tax regimes, inferred from process settings.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tax_regime: Vec<String>,
    /// Annual revenue range.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annual_revenue: Option<CriteriaRange>,
    /// Recognised custom tags (e.g. `requires_f3323`).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub custom_conditions: Vec<String>,
}

impl SegmentCriteria {
    pub fn is_empty(&self) -> bool {
        self.size.is_none()
            && self.economic_activity.is_empty()
            && self.tax_regime.is_empty()
            && self.annual_revenue.is_none()
            && self.custom_conditions.is_empty()
    }
}

/// A named predicate over taxpayer attributes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentRecord {
    pub id: SegmentId,
    pub name: String,
    /// Evaluation-order key; segments are tried in ascending type order.
    pub segment_type: String,
    pub criteria: SegmentCriteria,
    pub is_active: bool,
}

// ---------------------------------------------------------------------------
// Process templates
// ---------------------------------------------------------------------------

/// Availability state of a process template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateStatus {
    Draft,
    Active,
    Inactive,
}

impl TemplateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Active => "active",
            Self::Inactive => "inactive",
        }
    }
}

impl std::fmt::Display for TemplateStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The closed recurrence configuration carried by templates and processes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecurrenceConfig {
    /// Day of month the next occurrence falls due (monthly cadence).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day_of_month: Option<u32>,
    /// Month the next occurrence falls due (annual cadence).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub month: Option<u32>,
    /// Day within `month` (annual cadence).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day: Option<u32>,
    /// Months the cadence applies to, when restricted.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub months: Vec<u32>,
}

/// A versioned process template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessTemplateRecord {
    pub id: TemplateId,
    pub name: String,
    pub description: String,
    pub process_type: ProcessType,
    pub status: TemplateStatus,
    pub default_recurrence_type: RecurrenceType,
    pub default_recurrence_config: RecurrenceConfig,
    /// Free-form body merged into each materialised process's config.
    pub template_config: Value,
    pub available_variables: Value,
    pub default_values: Value,
    pub usage_count: i64,
    pub created_by: String,
}

impl ProcessTemplateRecord {
    /// Only active templates may be materialised.
    pub fn is_available(&self) -> bool {
        self.status == TemplateStatus::Active
    }
}

/// A task definition inside a template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessTemplateTaskRecord {
    pub id: Uuid,
    pub template_id: TemplateId,
    /// Strictly positive; equal orders may run in parallel when flagged.
    pub execution_order: i32,
    pub task_title: String,
    pub task_description: String,
    pub task_type: TaskType,
    pub priority: TaskPriority,
    pub is_optional: bool,
    pub can_run_parallel: bool,
    /// Signed day offset: positive from process start, negative/zero from
    /// the process due date.
    pub due_date_offset_days: Option<i32>,
    pub due_date_from_previous: bool,
    pub absolute_due_date: Option<DateTime<Utc>>,
    pub estimated_hours: Option<Decimal>,
    /// Template-task ids this task depends on, within the same template.
    pub depends_on: Vec<Uuid>,
    /// Body copied into the materialised task's `task_data`.
    pub task_config: Value,
}

/// Links a template to a segment for automatic assignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentRuleRecord {
    pub id: Uuid,
    pub template_id: TemplateId,
    pub segment_id: SegmentId,
    /// Higher wins.
    pub priority: i32,
    pub is_active: bool,
    pub auto_apply: bool,
    /// Additional free-form conditions; empty means unconditional.
    pub conditions: Value,
}

// ---------------------------------------------------------------------------
// Processes, tasks, executions
// ---------------------------------------------------------------------------

/// A concrete, company-scoped compliance process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessRecord {
    pub id: ProcessId,
    pub name: String,
    pub description: String,
    pub process_type: ProcessType,
    pub company_id: CompanyId,
    /// Legacy issuer tuple, kept for backward indexing only.
    pub company_tax_id: Rut,
    pub status: ProcessStatus,
    pub is_template: bool,
    /// Immediate predecessor in a recurring series; never transitive.
    pub parent_process: Option<ProcessId>,
    pub created_by: String,
    pub assigned_to: String,
    pub start_date: Option<DateTime<Utc>>,
    pub due_date: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub is_recurring: bool,
    pub recurrence_type: RecurrenceType,
    pub recurrence_config: RecurrenceConfig,
    /// Free-form process configuration. Carries `period` for dedupe.
    pub config_data: Value,
    pub created_at: DateTime<Utc>,
}

impl ProcessRecord {
    /// The covered period recorded in `config_data`, when present.
    pub fn period(&self) -> Option<String> {
        self.config_data
            .get("period")
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}

/// A unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub title: String,
    pub description: String,
    pub task_type: TaskType,
    pub category: String,
    pub company_tax_id: Rut,
    pub assigned_to: String,
    pub created_by: String,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub due_date: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub progress_percentage: i32,
    pub estimated_duration_secs: Option<i64>,
    pub actual_duration_secs: Option<i64>,
    pub task_data: Value,
    pub result_data: Value,
    pub error_message: String,
    pub is_recurring: bool,
    pub recurrence_pattern: Value,
    pub created_at: DateTime<Utc>,
}

impl TaskRecord {
    /// Transition to `in_progress`, stamping the start instant.
    pub fn start(&mut self, now: DateTime<Utc>) {
        self.status = TaskStatus::InProgress;
        self.started_at = Some(now);
    }

    /// Transition to `completed`, stamping duration and result.
    pub fn complete(&mut self, result: Option<Value>, now: DateTime<Utc>) {
        self.status = TaskStatus::Completed;
        self.completed_at = Some(now);
        self.progress_percentage = 100;
        if let Some(started) = self.started_at {
            self.actual_duration_secs = Some((now - started).num_seconds());
        }
        if let Some(result) = result {
            self.result_data = result;
        }
    }

    /// Transition to `failed`, recording the error.
    pub fn fail(&mut self, error: &str, now: DateTime<Utc>) {
        self.status = TaskStatus::Failed;
        self.completed_at = Some(now);
        self.error_message = error.to_string();
        if let Some(started) = self.started_at {
            self.actual_duration_secs = Some((now - started).num_seconds());
        }
    }
}

/// A context-variable equality gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextVariableCondition {
    pub name: String,
    pub value: Value,
}

/// The closed execution-condition grammar on a process task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionConditions {
    /// All preceding non-optional tasks must have this status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_task_status: Option<TaskStatus>,
    /// The execution context must contain this key with this value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_variable: Option<ContextVariableCondition>,
    /// Company-data predicate. Placeholder: evaluates to true.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_data: Option<Value>,
    /// Manual approval gate. Modelled elsewhere; the engine treats it as
    /// satisfied and waits on the corresponding manual task instead.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub require_approval: Option<bool>,
}

impl ExecutionConditions {
    pub fn is_empty(&self) -> bool {
        self.previous_task_status.is_none()
            && self.context_variable.is_none()
            && self.company_data.is_none()
            && self.require_approval.is_none()
    }
}

/// The join row linking a task into a process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessTaskRecord {
    pub id: Uuid,
    pub process_id: ProcessId,
    pub task_id: TaskId,
    pub execution_order: i32,
    pub is_optional: bool,
    pub can_run_parallel: bool,
    pub execution_conditions: ExecutionConditions,
    pub context_data: Value,
    /// Offset fields retained from the template so due dates can be
    /// recomputed later.
    pub due_date_offset_days: Option<i32>,
    pub due_date_from_previous: bool,
    pub absolute_due_date: Option<DateTime<Utc>>,
}

/// One run of a process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: ExecutionId,
    pub process_id: ProcessId,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub execution_context: Value,
    pub current_step: i32,
    pub total_steps: i32,
    pub completed_steps: i32,
    pub failed_steps: i32,
    pub last_error: String,
    pub error_count: i32,
}

impl ExecutionRecord {
    pub fn new(process_id: ProcessId, context: Value, total_steps: i32, now: DateTime<Utc>) -> Self {
        Self {
            id: ExecutionId::new(),
            process_id,
            status: ExecutionStatus::Running,
            started_at: now,
            completed_at: None,
            execution_context: context,
            current_step: 0,
            total_steps,
            completed_steps: 0,
            failed_steps: 0,
            last_error: String::new(),
            error_count: 0,
        }
    }

    /// Completed steps over total steps, floored to whole percent.
    pub fn progress_percentage(&self) -> i32 {
        if self.total_steps == 0 {
            return 0;
        }
        (self.completed_steps * 100) / self.total_steps
    }
}

// ---------------------------------------------------------------------------
// Sync logs
// ---------------------------------------------------------------------------

/// The authoritative record of one ingestion job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncLogRecord {
    pub id: SyncLogId,
    pub company_id: Option<CompanyId>,
    pub company_tax_id: Rut,
    /// Queue correlation id, when the job came through the broker.
    pub task_id: Option<String>,
    pub sync_type: String,
    pub status: SyncStatus,
    pub user_email: String,
    pub description: String,
    /// Free-form payload carrying sub-job results.
    pub sync_data: Value,
    pub documents_processed: i64,
    pub documents_created: i64,
    pub documents_updated: i64,
    pub errors_count: i64,
    pub progress_percentage: i32,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: String,
    pub priority: String,
    pub created_at: DateTime<Utc>,
}

impl SyncLogRecord {
    pub fn new(
        company_id: Option<CompanyId>,
        company_tax_id: Rut,
        sync_type: &str,
        user_email: &str,
        description: &str,
    ) -> Self {
        Self {
            id: SyncLogId::new(),
            company_id,
            company_tax_id,
            task_id: None,
            sync_type: sync_type.to_string(),
            status: SyncStatus::Pending,
            user_email: user_email.to_string(),
            description: description.to_string(),
            sync_data: Value::Null,
            documents_processed: 0,
            documents_created: 0,
            documents_updated: 0,
            errors_count: 0,
            progress_percentage: 0,
            completed_at: None,
            error_message: String::new(),
            priority: "normal".to_string(),
            created_at: Utc::now(),
        }
    }
}
