//! Process engine errors.

use thiserror::Error;
use tributo_store::StoreError;

/// Errors surfaced by the process engine.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The referenced process does not exist.
    #[error("process not found: {0}")]
    ProcessNotFound(String),

    /// The referenced execution does not exist.
    #[error("execution not found: {0}")]
    ExecutionNotFound(String),

    /// The referenced task does not exist.
    #[error("task not found: {0}")]
    TaskNotFound(String),

    /// The template is inactive or a draft and cannot be materialised.
    #[error("template \"{0}\" is not available")]
    TemplateNotAvailable(String),

    /// A template task carries a non-positive execution order.
    #[error("template task \"{title}\" has non-positive execution order {order}")]
    NonPositiveOrder { title: String, order: i32 },

    /// The template's dependency graph is not a strict partial order.
    #[error("template dependency cycle involving task \"{0}\"")]
    CyclicDependency(String),

    /// The attempted state transition is not valid.
    #[error("invalid transition from {from} to {to}: {reason}")]
    InvalidTransition {
        from: String,
        to: String,
        reason: String,
    },

    /// The parent's recurrence configuration cannot produce a next period.
    #[error("cannot compute next period: {0}")]
    NextPeriodUndefined(String),

    /// Store failure.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}
