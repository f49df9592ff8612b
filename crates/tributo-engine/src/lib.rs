//! # tributo-engine — Process Templating, Assignment and Execution
//!
//! The compliance workflow machinery:
//!
//! - [`templates`] validates stored templates (strictly positive orders,
//!   acyclic dependencies) and carries the canonical template catalogue.
//! - [`segmentation`] evaluates rule-based predicates against a company's
//!   taxpayer profile, picks its segment, and applies the templates the
//!   segment's assignment rules name.
//! - [`materialize`] instantiates a template as a concrete process with
//!   tasks, computing each task's absolute due date from its offset or
//!   chain position.
//! - [`execution`] is the state machine that advances eligible task waves
//!   (sequential or parallel) subject to execution conditions, tracking a
//!   [`tributo_store::ExecutionRecord`] with step counters.
//! - [`recurrence`] creates the next occurrence of a completed recurring
//!   process, idempotent against duplicate periods.
//! - [`deadlines`] scans for upcoming, imminent and overdue processes and
//!   emits alert records for the messaging layer.
//! - [`seed`] loads the canonical F29 / F22 / F3323 / document-sync /
//!   IVA-book templates into the store.

pub mod deadlines;
pub mod error;
pub mod execution;
pub mod materialize;
pub mod recurrence;
pub mod seed;
pub mod segmentation;
pub mod templates;

pub use deadlines::{DeadlineAlert, DeadlineKind, DeadlineMonitor};
pub use error::EngineError;
pub use execution::{NoopRunner, ProcessEngine, ProcessStatusView, TaskRunner};
pub use materialize::ProcessMaterialiser;
pub use recurrence::RecurrenceGenerator;
pub use seed::{seed_templates, SeedOptions, SeedSummary};
pub use segmentation::SegmentationService;
pub use templates::{validate_template_tasks, TemplateDefinition, TemplateFactory};
