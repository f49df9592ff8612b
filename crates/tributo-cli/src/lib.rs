//! # tributo-cli — Admin Entry Points
//!
//! The `tributo` binary exposes the maintenance commands the back-office
//! operators run directly:
//!
//! - `tributo sync-contacts` — rebuild contacts from persisted documents
//!   with the same rules as the ingestion path.
//! - `tributo generate-document-references` — resolve credit/debit-note
//!   references to their original documents.
//! - `tributo seed-process-templates` — load the canonical compliance
//!   templates.
//!
//! Exit codes: 0 on success, 1 on configuration error, 2 on runtime
//! failure (with counters printed to stderr).

pub mod contacts;
pub mod references;
pub mod seed;

use tributo_store::{PgStore, StoreConfig};

/// Command outcome, mapped onto the process exit code by `main`.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Bad environment or arguments; exit code 1.
    #[error("configuration error: {0}")]
    Config(String),

    /// The command started but failed; exit code 2.
    #[error("runtime failure: {0}")]
    Runtime(String),
}

impl CliError {
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Config(_) => 1,
            Self::Runtime(_) => 2,
        }
    }
}

/// Connect to the operational store from the environment.
pub async fn connect_store() -> Result<PgStore, CliError> {
    let config = StoreConfig::from_env().map_err(|e| CliError::Config(e.to_string()))?;
    let pool = config
        .connect()
        .await
        .map_err(|e| CliError::Runtime(format!("database connection failed: {e}")))?;
    Ok(PgStore::new(pool))
}
