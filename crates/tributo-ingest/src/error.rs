//! Ingestion pipeline errors.
//!
//! Only job-level failures live here. Per-record problems (validation,
//! mapping, single-row persistence) are counted into the sync log and
//! never bubble out of a batch.

use thiserror::Error;
use tributo_portal::PortalError;
use tributo_store::StoreError;
use tributo_vault::VaultError;

/// Job-level ingestion errors.
#[derive(Error, Debug)]
pub enum IngestError {
    /// The company the job was queued for does not exist.
    #[error("company not found: {0}")]
    CompanyNotFound(String),

    /// No credential row exists for the company.
    #[error("no portal credentials stored for company {0}")]
    NoCredentials(String),

    /// The credential row exists but has been deactivated.
    #[error("portal credentials for company {0} are disabled")]
    CredentialsDisabled(String),

    /// Date arguments are malformed or out of range.
    #[error("invalid date range: {0}")]
    InvalidDateRange(String),

    /// Portal-level failure that aborts the job (authentication, or a
    /// transport failure that survived its retries at a fatal boundary).
    #[error("portal error: {0}")]
    Portal(#[from] PortalError),

    /// Store failure at a job boundary (not a per-record upsert).
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Vault failure. Decryption failures are fatal to the owning job.
    #[error("vault error: {0}")]
    Vault(#[from] VaultError),

    /// A form operation was attempted on a form without a portal folio.
    #[error("form {0} has no portal folio")]
    MissingFolio(String),
}
