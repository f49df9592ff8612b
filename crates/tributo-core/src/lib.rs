//! # tributo-core — Foundational Types for the Tributo Back-Office
//!
//! Domain primitives shared by every crate in the workspace:
//!
//! - [`Rut`] — the Chilean tax identifier, stored in canonical
//!   `"<digits>-<DV>"` form with the check digit normalised to upper case.
//! - [`TaxPeriod`] — a calendar month used as the sharding unit for
//!   document ingestion and the scheduling unit for monthly forms.
//! - Identifier newtypes ([`CompanyId`], [`DocumentId`], …) so that an id
//!   for one aggregate can never be passed where another is expected.
//! - Locale-aware parsing of Chilean amount and date renderings
//!   ([`parse`]).
//! - The closed domain enums for document, form, process and task state.
//! - The structured error hierarchy ([`CoreError`] and friends).
//!
//! ## UTC Discipline
//!
//! All instants are `chrono::DateTime<Utc>`. Calendar dates (issue dates,
//! activity start) are `chrono::NaiveDate`. Local-time rendering is a
//! presentation concern outside the core.

pub mod domain;
pub mod error;
pub mod identity;
pub mod parse;
pub mod period;
pub mod rut;

pub use domain::{
    ContactRole, DocumentCategory, DocumentDirection, DocumentStatus, ExecutionStatus, FormCode,
    FormStatus, OperationKind, ProcessSettings, ProcessStatus, ProcessType, RecurrenceType,
    SyncStatus, TaskPriority, TaskStatus, TaskType,
};
pub use error::ValidationError;
pub use identity::{
    CompanyId, ContactId, DocumentId, ExecutionId, FormId, ProcessId, SegmentId, SyncLogId, TaskId,
    TemplateId,
};
pub use period::{PeriodError, TaxPeriod};
pub use rut::{Rut, RutError};
