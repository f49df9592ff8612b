//! # Shared Validation Errors
//!
//! Built with `thiserror`; no `Box<dyn Error>`, no `.unwrap()` outside
//! tests. Subsystem crates (vault, portal, store, ingest, engine) define
//! their own error enums — only the parsing errors shared by several of
//! them live here.

use thiserror::Error;

/// Validation errors for domain primitives.
///
/// Each error carries the offending input and the expected shape so that
/// operators can diagnose bad portal payloads without guesswork.
#[derive(Error, Debug)]
pub enum ValidationError {
    /// A date string matched none of the accepted renderings.
    #[error("unparseable date: \"{0}\" (accepted: DD/MM/YYYY, DD-MM-YYYY, YYYY-MM-DD, DD/MM/YY, DD-MM-YY)")]
    UnparseableDate(String),

    /// An amount string could not be read as a Chilean-rendered number.
    #[error("unparseable amount: \"{0}\"")]
    UnparseableAmount(String),
}
