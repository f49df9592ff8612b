//! # tributo-ingest — SII Ingestion Pipeline
//!
//! The pipeline that pulls a company's electronic tax documents and
//! declared forms out of the portal and materialises them into the
//! operational store:
//!
//! 1. [`credentials`] resolves and verifies the company's encrypted portal
//!    credentials.
//! 2. [`coordinator`] drives the period-sharded extraction: one portal
//!    session per job, monthly periods in chronological order, batched
//!    validate → map → upsert with progress streamed into the sync log and
//!    cooperative cancellation between periods and batches.
//! 3. [`validator`] and [`mapper`] turn raw portal rows into canonical
//!    document records; [`processor`] upserts them one record at a time so
//!    a single bad row never poisons a batch.
//! 4. [`contacts`] derives the counterparty contact for every persisted
//!    document, inside the same upsert path.
//! 5. [`forms`] synchronises declared forms per year; [`form_detail`]
//!    enriches each form with field-level values.
//! 6. [`references`] resolves credit/debit-note references to their
//!    original documents.
//!
//! Errors are locally caught, counted and logged inside batches and period
//! loops; only credential load, portal open/close and sync-log
//! finalisation surface to the caller.

pub mod contacts;
pub mod coordinator;
pub mod credentials;
pub mod error;
pub mod form_detail;
pub mod forms;
pub mod mapper;
pub mod processor;
pub mod profile;
pub mod references;
pub mod validator;

pub use contacts::{derive_contact_for_document, rebuild_contacts, ContactSyncStats};
pub use coordinator::{IngestConfig, IngestOutcome, IngestionCoordinator};
pub use credentials::{CredentialService, ResolvedCredentials};
pub use error::IngestError;
pub use form_detail::{DetailExtractor, DetailOutcome};
pub use forms::{FormSyncService, FormSyncStats, HistoricalFormSync};
pub use mapper::{DocumentMapper, MappedDocument, MappingFailure};
pub use processor::{BatchOutcome, DteProcessor};
pub use profile::sync_taxpayer_profile;
pub use references::{link_document_references, ReferenceStats};
pub use validator::{validate_document, ValidationFailure};
