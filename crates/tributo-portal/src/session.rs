//! The portal session capability set.
//!
//! Every operation takes `&mut self`: a session is single-owner and never
//! shared across workers. Implementations must make `close()` idempotent —
//! the coordinator calls it on every exit path, including after errors.

use tributo_core::TaxPeriod;

use crate::error::PortalError;
use crate::types::{DocumentsSummary, FormDetail, RawDocument, RawForm, TaxpayerProfile};

/// An authenticated session against the tax portal.
#[allow(async_fn_in_trait)]
pub trait PortalSession {
    /// Perform login. On success the session retains its cookies and
    /// subsequent fetches are authorised. Returns `false` (or
    /// [`PortalError::Auth`]) when the portal rejects the credentials.
    async fn authenticate(&mut self) -> Result<bool, PortalError>;

    /// Fetch the structured taxpayer identity blob.
    async fn taxpayer_info(&mut self) -> Result<TaxpayerProfile, PortalError>;

    /// Discover which document type codes have content in a period,
    /// separately for purchases and sales.
    async fn documents_summary(
        &mut self,
        period: TaxPeriod,
    ) -> Result<DocumentsSummary, PortalError>;

    /// Fetch the purchase-side documents of one type in a period.
    async fn purchase_documents(
        &mut self,
        period: TaxPeriod,
        type_code: i32,
    ) -> Result<Vec<RawDocument>, PortalError>;

    /// Fetch the sales-side documents of one type in a period.
    async fn sales_documents(
        &mut self,
        period: TaxPeriod,
        type_code: i32,
    ) -> Result<Vec<RawDocument>, PortalError>;

    /// Search declared forms by year, optionally narrowed to a month or a
    /// specific folio.
    async fn forms_search(
        &mut self,
        year: i32,
        month: Option<u32>,
        folio: Option<&str>,
    ) -> Result<Vec<RawForm>, PortalError>;

    /// Fetch the field-level detail of one declared form.
    async fn form_detail(
        &mut self,
        folio: &str,
        period: &str,
    ) -> Result<FormDetail, PortalError>;

    /// Release session resources. Idempotent; must be reached on all exit
    /// paths.
    async fn close(&mut self);
}
