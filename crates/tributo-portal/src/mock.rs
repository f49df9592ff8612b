//! Canned-response portal session for tests.
//!
//! Configured with a builder: load summaries, listings, forms and details
//! keyed the same way the real portal keys them, then hand the session to
//! the code under test. Every call is recorded so tests can assert on
//! ordering and ownership discipline (one session, closed at the end).

use std::collections::HashMap;

use serde_json::Value;
use tributo_core::TaxPeriod;

use crate::error::PortalError;
use crate::session::PortalSession;
use crate::types::{DocumentsSummary, FormDetail, RawDocument, RawForm, TaxpayerProfile};

/// A scripted portal session.
#[derive(Debug, Default)]
pub struct MockPortalSession {
    /// Whether `authenticate` succeeds.
    auth_ok: bool,
    /// Summaries by compact period. Missing period → summary call errors.
    summaries: HashMap<String, DocumentsSummary>,
    /// Purchase listings by (compact period, type code).
    purchases: HashMap<(String, i32), Vec<RawDocument>>,
    /// Sales listings by (compact period, type code).
    sales: HashMap<(String, i32), Vec<RawDocument>>,
    /// Form rows by year.
    forms: HashMap<i32, Vec<RawForm>>,
    /// Details by folio.
    details: HashMap<String, FormDetail>,
    /// Taxpayer profile returned by `taxpayer_info`.
    profile: Option<TaxpayerProfile>,
    /// Ordered log of calls, for assertions.
    pub calls: Vec<String>,
    authenticated: bool,
    pub closed: bool,
}

impl MockPortalSession {
    /// A session whose login succeeds and that knows nothing else.
    pub fn new() -> Self {
        Self {
            auth_ok: true,
            ..Self::default()
        }
    }

    /// A session whose login is rejected.
    pub fn rejecting_auth() -> Self {
        Self {
            auth_ok: false,
            ..Self::default()
        }
    }

    pub fn with_profile(mut self, profile: TaxpayerProfile) -> Self {
        self.profile = Some(profile);
        self
    }

    pub fn with_summary(mut self, period: TaxPeriod, summary: DocumentsSummary) -> Self {
        self.summaries.insert(period.compact(), summary);
        self
    }

    pub fn with_purchases(
        mut self,
        period: TaxPeriod,
        type_code: i32,
        docs: Vec<RawDocument>,
    ) -> Self {
        self.purchases.insert((period.compact(), type_code), docs);
        self
    }

    pub fn with_sales(
        mut self,
        period: TaxPeriod,
        type_code: i32,
        docs: Vec<RawDocument>,
    ) -> Self {
        self.sales.insert((period.compact(), type_code), docs);
        self
    }

    pub fn with_forms(mut self, year: i32, rows: Vec<RawForm>) -> Self {
        self.forms.insert(year, rows);
        self
    }

    pub fn with_detail(mut self, folio: &str, detail: FormDetail) -> Self {
        self.details.insert(folio.to_string(), detail);
        self
    }

    /// Parse JSON rows the way the wire boundary does, panicking on
    /// unrecognisable shapes. Test-construction convenience.
    pub fn docs_from_json(rows: &[Value]) -> Vec<RawDocument> {
        rows.iter()
            .map(|row| {
                RawDocument::from_value(row)
                    .unwrap_or_else(|| panic!("unrecognisable test row: {row}"))
            })
            .collect()
    }

    fn guard(&self) -> Result<(), PortalError> {
        if self.closed {
            return Err(PortalError::Closed);
        }
        if !self.authenticated {
            return Err(PortalError::NotAuthenticated);
        }
        Ok(())
    }
}

impl PortalSession for MockPortalSession {
    async fn authenticate(&mut self) -> Result<bool, PortalError> {
        if self.closed {
            return Err(PortalError::Closed);
        }
        self.calls.push("authenticate".into());
        if self.auth_ok {
            self.authenticated = true;
            Ok(true)
        } else {
            Err(PortalError::Auth {
                tax_id: "mock".into(),
            })
        }
    }

    async fn taxpayer_info(&mut self) -> Result<TaxpayerProfile, PortalError> {
        self.guard()?;
        self.calls.push("taxpayer_info".into());
        self.profile
            .clone()
            .ok_or_else(|| PortalError::UnexpectedResponse {
                endpoint: "contribuyente".into(),
                detail: "no scripted profile".into(),
            })
    }

    async fn documents_summary(
        &mut self,
        period: TaxPeriod,
    ) -> Result<DocumentsSummary, PortalError> {
        self.guard()?;
        self.calls.push(format!("summary:{}", period.compact()));
        self.summaries
            .get(&period.compact())
            .cloned()
            .ok_or_else(|| PortalError::UnexpectedResponse {
                endpoint: "rcv/resumen".into(),
                detail: format!("no scripted summary for {}", period.compact()),
            })
    }

    async fn purchase_documents(
        &mut self,
        period: TaxPeriod,
        type_code: i32,
    ) -> Result<Vec<RawDocument>, PortalError> {
        self.guard()?;
        self.calls
            .push(format!("purchases:{}:{}", period.compact(), type_code));
        Ok(self
            .purchases
            .get(&(period.compact(), type_code))
            .cloned()
            .unwrap_or_default())
    }

    async fn sales_documents(
        &mut self,
        period: TaxPeriod,
        type_code: i32,
    ) -> Result<Vec<RawDocument>, PortalError> {
        self.guard()?;
        self.calls
            .push(format!("sales:{}:{}", period.compact(), type_code));
        Ok(self
            .sales
            .get(&(period.compact(), type_code))
            .cloned()
            .unwrap_or_default())
    }

    async fn forms_search(
        &mut self,
        year: i32,
        month: Option<u32>,
        folio: Option<&str>,
    ) -> Result<Vec<RawForm>, PortalError> {
        self.guard()?;
        self.calls.push(format!("forms:{year}"));
        let mut rows = self.forms.get(&year).cloned().unwrap_or_default();
        if let Some(month) = month {
            let needle = format!("{year:04}-{month:02}");
            rows.retain(|r| r.period == needle);
        }
        if let Some(folio) = folio {
            rows.retain(|r| r.folio == folio);
        }
        Ok(rows)
    }

    async fn form_detail(
        &mut self,
        folio: &str,
        _period: &str,
    ) -> Result<FormDetail, PortalError> {
        self.guard()?;
        self.calls.push(format!("detail:{folio}"));
        self.details
            .get(folio)
            .cloned()
            .ok_or_else(|| PortalError::UnexpectedResponse {
                endpoint: "dcv/formulario".into(),
                detail: format!("no scripted detail for folio {folio}"),
            })
    }

    async fn close(&mut self) {
        self.calls.push("close".into());
        self.closed = true;
        self.authenticated = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn scripted_flow_round_trips() {
        let period = TaxPeriod::new(2024, 1).unwrap();
        let docs = MockPortalSession::docs_from_json(&[json!({
            "detNroDoc": 1, "detTipoDoc": 33, "detMntTotal": 1000
        })]);
        let mut session = MockPortalSession::new()
            .with_summary(period, DocumentsSummary::default())
            .with_purchases(period, 33, docs);

        session.authenticate().await.unwrap();
        let fetched = session.purchase_documents(period, 33).await.unwrap();
        assert_eq!(fetched.len(), 1);
        session.close().await;
        assert!(session.closed);
        assert_eq!(
            session.calls,
            vec!["authenticate", "purchases:202401:33", "close"]
        );
    }

    #[tokio::test]
    async fn unauthenticated_calls_are_refused() {
        let mut session = MockPortalSession::new();
        assert!(matches!(
            session.documents_summary(TaxPeriod::new(2024, 1).unwrap()).await,
            Err(PortalError::NotAuthenticated)
        ));
    }

    #[tokio::test]
    async fn rejecting_variant_fails_login() {
        let mut session = MockPortalSession::rejecting_auth();
        assert!(matches!(
            session.authenticate().await,
            Err(PortalError::Auth { .. })
        ));
    }

    #[tokio::test]
    async fn forms_filter_by_month_and_folio() {
        let rows = vec![
            RawForm {
                folio: "100".into(),
                period: "2024-01".into(),
                contributor: "77794858-K".into(),
                submission_date: Some("09/05/2024".into()),
                status: "Vigente".into(),
                amount: None,
            },
            RawForm {
                folio: "200".into(),
                period: "2024-02".into(),
                contributor: "77794858-K".into(),
                submission_date: None,
                status: String::new(),
                amount: None,
            },
        ];
        let mut session = MockPortalSession::new().with_forms(2024, rows);
        session.authenticate().await.unwrap();

        let january = session.forms_search(2024, Some(1), None).await.unwrap();
        assert_eq!(january.len(), 1);
        assert_eq!(january[0].folio, "100");

        let by_folio = session.forms_search(2024, None, Some("200")).await.unwrap();
        assert_eq!(by_folio.len(), 1);
        assert_eq!(by_folio[0].period, "2024-02");
    }
}
