//! Portal session errors.
//!
//! The error kinds mirror the pipeline's recovery policy: authentication
//! failures are fatal to the owning job, timeouts and transport failures
//! are retriable at the coordinator, everything else surfaces as-is.

use thiserror::Error;

/// Errors produced by a portal session.
#[derive(Error, Debug)]
pub enum PortalError {
    /// Login was rejected by the portal. Fatal to the job; the caller
    /// increments the credential failure counter.
    #[error("portal authentication failed for {tax_id}")]
    Auth {
        /// Canonical tax id the login was attempted for.
        tax_id: String,
    },

    /// An operation was attempted before a successful `authenticate()`.
    #[error("portal session is not authenticated")]
    NotAuthenticated,

    /// An operation was attempted after `close()`.
    #[error("portal session is closed")]
    Closed,

    /// The call exceeded its per-call timeout. Retriable.
    #[error("portal call to {endpoint} timed out")]
    Timeout {
        /// The endpoint that timed out.
        endpoint: String,
    },

    /// Transport-level failure (connection refused, reset, DNS). Retriable.
    #[error("portal transport error on {endpoint}: {source}")]
    Transient {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    /// The portal answered with an unexpected status or payload shape.
    #[error("unexpected portal response from {endpoint}: {detail}")]
    UnexpectedResponse { endpoint: String, detail: String },

    /// Session configuration is invalid (bad URL, missing variable).
    #[error("portal configuration error: {0}")]
    Config(String),
}

impl PortalError {
    /// Whether the coordinator may retry the call with backoff.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Transient { .. })
    }
}
