//! # Domain Enums
//!
//! The closed vocabularies of the back-office: document, form, process and
//! task state machines, document categories, recurrence cadences, and the
//! per-taxpayer process-enablement settings.
//!
//! Every enum serializes in `snake_case` and exposes `as_str()` so that the
//! store and the log lines use the same stable spelling.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a persisted tax document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Draft,
    Pending,
    Signed,
    Sent,
    Accepted,
    Rejected,
    Cancelled,
    Processed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Pending => "pending",
            Self::Signed => "signed",
            Self::Sent => "sent",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
            Self::Processed => "processed",
        }
    }
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category of a document type, inferred from its numeric code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentCategory {
    Invoice,
    Receipt,
    CreditNote,
    DebitNote,
    DeliveryGuide,
    Export,
    Other,
}

impl DocumentCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Invoice => "invoice",
            Self::Receipt => "receipt",
            Self::CreditNote => "credit_note",
            Self::DebitNote => "debit_note",
            Self::DeliveryGuide => "delivery_guide",
            Self::Export => "export",
            Self::Other => "other",
        }
    }

    /// Infer the category from a type code, following the fixed catalogue.
    pub fn from_code(code: i32) -> Self {
        match code {
            33 | 34 | 43 | 45 | 46 => Self::Invoice,
            35 | 38 | 39 | 41 => Self::Receipt,
            56 => Self::DebitNote,
            60 | 61 => Self::CreditNote,
            52 => Self::DeliveryGuide,
            110 | 111 | 112 => Self::Export,
            _ => Self::Other,
        }
    }
}

impl std::fmt::Display for DocumentCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the owning company issued or received a document.
///
/// `Unknown` marks rows whose issuer and recipient both differ from the
/// owning company; those are kept but excluded from contact derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentDirection {
    Issued,
    Received,
    Unknown,
}

impl DocumentDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Issued => "issued",
            Self::Received => "received",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for DocumentDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The operation side a portal listing was fetched from.
///
/// Purchase listings contain documents the company *received*; sales
/// listings contain documents it *issued*. Raw rows are tagged with this
/// before mapping so the mapper can disambiguate the tuples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Documents received by the company (purchase side).
    Received,
    /// Documents issued by the company (sales side).
    Issued,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "recibidos",
            Self::Issued => "emitidos",
        }
    }

    /// Parse the portal's spelling; anything unrecognised defaults to
    /// received, matching the extraction tagging rule.
    pub fn from_portal(value: &str) -> Self {
        match value {
            "emitidos" => Self::Issued,
            _ => Self::Received,
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a declared tax form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormStatus {
    Draft,
    InProgress,
    Completed,
    Validated,
    Submitted,
    Accepted,
    Rejected,
    Paid,
}

impl FormStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Validated => "validated",
            Self::Submitted => "submitted",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Paid => "paid",
        }
    }
}

impl std::fmt::Display for FormStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The declared-form families the back-office understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FormCode {
    F29,
    F22,
    F3323,
    F50,
    F1924,
    F1923,
}

impl FormCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::F29 => "F29",
            Self::F22 => "F22",
            Self::F3323 => "F3323",
            Self::F50 => "F50",
            Self::F1924 => "F1924",
            Self::F1923 => "F1923",
        }
    }

    /// Human-readable name used when a template is created lazily.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::F29 => "Formulario 29 - Declaración Mensual IVA",
            Self::F22 => "Formulario 22 - Declaración Anual Renta",
            Self::F3323 => "Formulario 3323 - Pago Provisional Mensual Renta",
            Self::F50 => "Formulario 50 - Declaración Mensual de Impuestos",
            Self::F1924 => "Declaración Jurada 1924",
            Self::F1923 => "Declaración Jurada 1923",
        }
    }

    /// Parse a case-insensitive code such as `"f29"`.
    pub fn parse(input: &str) -> Option<Self> {
        match input.to_ascii_uppercase().as_str() {
            "F29" => Some(Self::F29),
            "F22" => Some(Self::F22),
            "F3323" => Some(Self::F3323),
            "F50" => Some(Self::F50),
            "F1924" => Some(Self::F1924),
            "F1923" => Some(Self::F1923),
            _ => None,
        }
    }
}

impl std::fmt::Display for FormCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a compliance process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    Draft,
    Active,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl ProcessStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Terminal states cannot be restarted; recurrence creates a new
    /// process instead.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The compliance workflow family a process belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessType {
    TaxMonthly,
    TaxAnnual,
    TaxQuarterly,
    DocumentSync,
    SiiIntegration,
    Custom,
}

impl ProcessType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TaxMonthly => "tax_monthly",
            Self::TaxAnnual => "tax_annual",
            Self::TaxQuarterly => "tax_quarterly",
            Self::DocumentSync => "document_sync",
            Self::SiiIntegration => "sii_integration",
            Self::Custom => "custom",
        }
    }
}

impl std::fmt::Display for ProcessType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Cancelled,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a task is driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Transitioned by a user through the UI.
    Manual,
    /// Dispatched to the asynchronous runner by the engine.
    Automatic,
    /// Queued for a future instant.
    Scheduled,
    /// Re-created on a cadence.
    Recurring,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Automatic => "automatic",
            Self::Scheduled => "scheduled",
            Self::Recurring => "recurring",
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Task priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    Normal,
    High,
    Urgent,
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }
}

impl std::fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a process execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of an ingestion job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Recurrence cadence of a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecurrenceType {
    None,
    Monthly,
    Quarterly,
    Annual,
}

impl RecurrenceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Monthly => "monthly",
            Self::Quarterly => "quarterly",
            Self::Annual => "annual",
        }
    }
}

impl std::fmt::Display for RecurrenceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The role a document implies for the counterparty contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactRole {
    Client,
    Provider,
}

impl ContactRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Provider => "provider",
        }
    }
}

impl std::fmt::Display for ContactRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-taxpayer process-enablement switches.
///
/// A fixed map in the taxpayer profile: which compliance pipelines the
/// company has opted into. The key set is closed, so this is a struct, not
/// a free-form map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ProcessSettings {
    #[serde(default)]
    pub f29_monthly: bool,
    #[serde(default)]
    pub f22_annual: bool,
    #[serde(default)]
    pub f3323_quarterly: bool,
    #[serde(default)]
    pub document_sync: bool,
    #[serde(default)]
    pub sii_integration: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_inference_covers_the_catalogue() {
        assert_eq!(DocumentCategory::from_code(33), DocumentCategory::Invoice);
        assert_eq!(DocumentCategory::from_code(39), DocumentCategory::Receipt);
        assert_eq!(DocumentCategory::from_code(56), DocumentCategory::DebitNote);
        assert_eq!(DocumentCategory::from_code(61), DocumentCategory::CreditNote);
        assert_eq!(DocumentCategory::from_code(52), DocumentCategory::DeliveryGuide);
        assert_eq!(DocumentCategory::from_code(110), DocumentCategory::Export);
        assert_eq!(DocumentCategory::from_code(99), DocumentCategory::Other);
    }

    #[test]
    fn operation_kind_defaults_to_received() {
        assert_eq!(OperationKind::from_portal("emitidos"), OperationKind::Issued);
        assert_eq!(OperationKind::from_portal("recibidos"), OperationKind::Received);
        assert_eq!(OperationKind::from_portal("???"), OperationKind::Received);
    }

    #[test]
    fn terminal_process_states() {
        assert!(ProcessStatus::Completed.is_terminal());
        assert!(ProcessStatus::Cancelled.is_terminal());
        assert!(!ProcessStatus::Active.is_terminal());
        assert!(!ProcessStatus::Paused.is_terminal());
    }

    #[test]
    fn enums_serialize_snake_case() {
        assert_eq!(
            serde_json::to_string(&TaskStatus::InProgress).unwrap(),
            "\"in_progress\""
        );
        assert_eq!(
            serde_json::to_string(&ProcessType::TaxMonthly).unwrap(),
            "\"tax_monthly\""
        );
        assert_eq!(serde_json::to_string(&FormCode::F29).unwrap(), "\"F29\"");
    }

    #[test]
    fn process_settings_default_all_off() {
        let settings = ProcessSettings::default();
        assert!(!settings.f29_monthly && !settings.f3323_quarterly);
        let parsed: ProcessSettings =
            serde_json::from_str(r#"{"f29_monthly": true}"#).unwrap();
        assert!(parsed.f29_monthly);
        assert!(!parsed.document_sync);
    }
}
