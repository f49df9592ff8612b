//! # tributo-portal — Tax Portal Session Layer
//!
//! Typed access to the national tax authority portal on behalf of one
//! company. A session is constructed with that company's credentials,
//! authenticated once, and then drives the fetch operations the ingestion
//! pipeline consumes:
//!
//! - [`PortalSession::taxpayer_info`] — the structured identity blob.
//! - [`PortalSession::documents_summary`] — per-period discovery of which
//!   document type codes have content, on the purchase and sales sides.
//! - [`PortalSession::purchase_documents`] / [`PortalSession::sales_documents`]
//!   — the per-type document listings.
//! - [`PortalSession::forms_search`] / [`PortalSession::form_detail`] —
//!   declared forms and their field-level detail.
//!
//! Two implementations exist: [`HttpPortalSession`] drives the live portal
//! over HTTP, and [`MockPortalSession`] returns canned rows for tests.
//!
//! ## Ownership Contract
//!
//! A session is **not** safe for concurrent use — every operation takes
//! `&mut self`, and one job owns exactly one session for its lifetime.
//! [`PortalSession::close`] must be reached on all exit paths; the
//! coordinator guarantees this by closing in its own error handling.

pub mod config;
pub mod error;
pub mod http;
pub mod mock;
pub mod retry;
pub mod session;
pub mod types;

pub use config::{PortalConfig, PortalCredentials};
pub use error::PortalError;
pub use http::HttpPortalSession;
pub use mock::MockPortalSession;
pub use retry::RetrySchedule;
pub use session::PortalSession;
pub use types::{
    CanonicalDocument, DocumentsSummary, FormDetail, FormDetailField, NumberOrText,
    PortalDocument, RawDocument, RawForm, SummaryEntry, TaggedDocument, TaxpayerProfile,
};
