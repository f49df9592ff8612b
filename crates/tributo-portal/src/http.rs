//! HTTP-backed portal session.
//!
//! Drives the live portal over its JSON resource endpoints. Login posts
//! the credential form; the cookie jar carries the authenticated session
//! across subsequent calls. Timeouts are per-call and map to
//! [`PortalError::Timeout`] so the coordinator can retry.

use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tributo_core::TaxPeriod;
use url::Url;

use crate::config::{PortalConfig, PortalCredentials};
use crate::error::PortalError;
use crate::session::PortalSession;
use crate::types::{
    DocumentsSummary, FormDetail, RawDocument, RawForm, SummaryEntry, TaxpayerProfile,
};

/// Envelope most portal listing endpoints wrap their rows in.
#[derive(Debug, Deserialize)]
struct ListingEnvelope {
    #[serde(default)]
    data: Vec<Value>,
}

/// Envelope of the purchase/sales summary endpoint.
#[derive(Debug, Deserialize)]
struct SummaryEnvelope {
    #[serde(default)]
    compras: Vec<SummaryEntry>,
    #[serde(default)]
    ventas: Vec<SummaryEntry>,
}

/// A live portal session over HTTP.
///
/// Single-owner: constructed per job, closed when the job ends.
pub struct HttpPortalSession {
    config: PortalConfig,
    credentials: PortalCredentials,
    client: reqwest::Client,
    authenticated: bool,
    closed: bool,
}

impl std::fmt::Debug for HttpPortalSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpPortalSession")
            .field("tax_id", &self.credentials.tax_id().canonical())
            .field("authenticated", &self.authenticated)
            .field("closed", &self.closed)
            .finish()
    }
}

impl HttpPortalSession {
    /// Build a session for one company. No network traffic happens until
    /// [`PortalSession::authenticate`].
    pub fn new(
        config: PortalConfig,
        credentials: PortalCredentials,
    ) -> Result<Self, PortalError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .cookie_store(true)
            .build()
            .map_err(|e| PortalError::Config(format!("HTTP client build failed: {e}")))?;

        Ok(Self {
            config,
            credentials,
            client,
            authenticated: false,
            closed: false,
        })
    }

    fn ensure_usable(&self) -> Result<(), PortalError> {
        if self.closed {
            return Err(PortalError::Closed);
        }
        if !self.authenticated {
            return Err(PortalError::NotAuthenticated);
        }
        Ok(())
    }

    fn resource_url(&self, path: &str) -> Result<Url, PortalError> {
        self.config
            .base_url
            .join(path)
            .map_err(|e| PortalError::Config(format!("invalid resource path {path}: {e}")))
    }

    fn classify(endpoint: &str, error: reqwest::Error) -> PortalError {
        if error.is_timeout() {
            PortalError::Timeout {
                endpoint: endpoint.to_string(),
            }
        } else {
            PortalError::Transient {
                endpoint: endpoint.to_string(),
                source: error,
            }
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: Url,
        endpoint: &str,
    ) -> Result<T, PortalError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Self::classify(endpoint, e))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(PortalError::NotAuthenticated);
        }
        if !status.is_success() {
            return Err(PortalError::UnexpectedResponse {
                endpoint: endpoint.to_string(),
                detail: format!("status {status}"),
            });
        }

        response
            .json()
            .await
            .map_err(|e| PortalError::UnexpectedResponse {
                endpoint: endpoint.to_string(),
                detail: e.to_string(),
            })
    }
}

impl PortalSession for HttpPortalSession {
    async fn authenticate(&mut self) -> Result<bool, PortalError> {
        if self.closed {
            return Err(PortalError::Closed);
        }
        let tax_id = self.credentials.tax_id();
        let form = [
            ("rut", tax_id.digits().to_string()),
            ("dv", tax_id.check_digit().to_string()),
            ("clave", self.credentials.password().to_string()),
        ];

        let response = self
            .client
            .post(self.config.login_url.clone())
            .form(&form)
            .send()
            .await
            .map_err(|e| Self::classify("login", e))?;

        if response.status().is_success() {
            self.authenticated = true;
            tracing::info!(tax_id = %tax_id, "portal session authenticated");
            Ok(true)
        } else if response.status() == StatusCode::UNAUTHORIZED
            || response.status() == StatusCode::FORBIDDEN
        {
            Err(PortalError::Auth {
                tax_id: tax_id.canonical(),
            })
        } else {
            Err(PortalError::UnexpectedResponse {
                endpoint: "login".into(),
                detail: format!("status {}", response.status()),
            })
        }
    }

    async fn taxpayer_info(&mut self) -> Result<TaxpayerProfile, PortalError> {
        self.ensure_usable()?;
        let url = self.resource_url("recursos/v1/contribuyente")?;
        let raw: Value = self.get_json(url, "contribuyente").await?;

        let razon_social = raw
            .get("razon_social")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let tax_id = raw
            .get("tax_id")
            .and_then(Value::as_str)
            .unwrap_or(&self.credentials.tax_id().canonical())
            .to_string();
        let activity_start_date = raw
            .get("fecha_inicio_actividades")
            .and_then(Value::as_str)
            .and_then(|s| tributo_core::parse::parse_flexible_date(s).ok());
        let activities = raw
            .get("actividades")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        let addresses = raw
            .get("direcciones")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        Ok(TaxpayerProfile {
            razon_social,
            tax_id,
            activity_start_date,
            activities,
            addresses,
            raw,
        })
    }

    async fn documents_summary(
        &mut self,
        period: TaxPeriod,
    ) -> Result<DocumentsSummary, PortalError> {
        self.ensure_usable()?;
        let mut url = self.resource_url("recursos/v1/rcv/resumen")?;
        url.query_pairs_mut()
            .append_pair("periodo", &period.compact());
        let envelope: SummaryEnvelope = self.get_json(url, "rcv/resumen").await?;
        Ok(DocumentsSummary {
            purchases: envelope.compras,
            sales: envelope.ventas,
        })
    }

    async fn purchase_documents(
        &mut self,
        period: TaxPeriod,
        type_code: i32,
    ) -> Result<Vec<RawDocument>, PortalError> {
        self.ensure_usable()?;
        let mut url = self.resource_url("recursos/v1/rcv/compras")?;
        url.query_pairs_mut()
            .append_pair("periodo", &period.compact())
            .append_pair("codTipoDoc", &type_code.to_string());
        let envelope: ListingEnvelope = self.get_json(url, "rcv/compras").await?;
        Ok(parse_rows(envelope.data, "rcv/compras"))
    }

    async fn sales_documents(
        &mut self,
        period: TaxPeriod,
        type_code: i32,
    ) -> Result<Vec<RawDocument>, PortalError> {
        self.ensure_usable()?;
        let mut url = self.resource_url("recursos/v1/rcv/ventas")?;
        url.query_pairs_mut()
            .append_pair("periodo", &period.compact())
            .append_pair("codTipoDoc", &type_code.to_string());
        let envelope: ListingEnvelope = self.get_json(url, "rcv/ventas").await?;
        Ok(parse_rows(envelope.data, "rcv/ventas"))
    }

    async fn forms_search(
        &mut self,
        year: i32,
        month: Option<u32>,
        folio: Option<&str>,
    ) -> Result<Vec<RawForm>, PortalError> {
        self.ensure_usable()?;
        let mut url = self.resource_url("recursos/v1/dcv/formularios")?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("anio", &year.to_string());
            if let Some(month) = month {
                pairs.append_pair("mes", &format!("{month:02}"));
            }
            if let Some(folio) = folio {
                pairs.append_pair("folio", folio);
            }
        }
        let envelope: ListingEnvelope = self.get_json(url, "dcv/formularios").await?;
        let mut forms = Vec::with_capacity(envelope.data.len());
        for row in envelope.data {
            match serde_json::from_value::<RawForm>(row) {
                Ok(form) => forms.push(form),
                Err(e) => {
                    tracing::warn!(error = %e, "dropping malformed form row");
                }
            }
        }
        Ok(forms)
    }

    async fn form_detail(
        &mut self,
        folio: &str,
        period: &str,
    ) -> Result<FormDetail, PortalError> {
        self.ensure_usable()?;
        let mut url = self.resource_url(&format!("recursos/v1/dcv/formulario/{folio}"))?;
        url.query_pairs_mut().append_pair("periodo", period);
        self.get_json(url, "dcv/formulario").await
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.authenticated = false;
            tracing::debug!(
                tax_id = %self.credentials.tax_id(),
                "portal session closed"
            );
        }
    }
}

/// Parse listing rows into raw documents, dropping unrecognisable rows
/// with a warning. Shape enforcement proper happens in the validator.
fn parse_rows(rows: Vec<Value>, endpoint: &str) -> Vec<RawDocument> {
    let mut documents = Vec::with_capacity(rows.len());
    for row in rows {
        match RawDocument::from_value(&row) {
            Some(doc) => documents.push(doc),
            None => {
                tracing::warn!(endpoint, "dropping row with unrecognisable shape");
            }
        }
    }
    documents
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::PortalSession;
    use tributo_core::Rut;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn session_for(server: &MockServer) -> HttpPortalSession {
        let config = PortalConfig::local(&server.uri()).unwrap();
        let credentials =
            PortalCredentials::new(Rut::parse("77794858-K").unwrap(), "clave123".into());
        HttpPortalSession::new(config, credentials).unwrap()
    }

    #[tokio::test]
    async fn authenticate_posts_the_credential_form() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/login"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let mut session = session_for(&server).await;
        assert!(session.authenticate().await.unwrap());
        session.close().await;
    }

    #[tokio::test]
    async fn rejected_login_is_an_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/login"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let mut session = session_for(&server).await;
        assert!(matches!(
            session.authenticate().await,
            Err(PortalError::Auth { .. })
        ));
    }

    #[tokio::test]
    async fn fetches_require_authentication_first() {
        let server = MockServer::start().await;
        let mut session = session_for(&server).await;
        let period = TaxPeriod::new(2024, 1).unwrap();
        assert!(matches!(
            session.documents_summary(period).await,
            Err(PortalError::NotAuthenticated)
        ));
    }

    #[tokio::test]
    async fn summary_parses_both_sides() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/login"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/recursos/v1/rcv/resumen"))
            .and(query_param("periodo", "202401"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "compras": [
                    {"rsmnTipoDocInteger": 33, "dcvNombreTipoDoc": "Factura Electrónica", "rsmnTotDoc": 2},
                    {"rsmnTipoDocInteger": 61, "dcvNombreTipoDoc": "Nota de Crédito", "rsmnTotDoc": 1}
                ],
                "ventas": [
                    {"rsmnTipoDocInteger": 33, "dcvNombreTipoDoc": "Factura Electrónica", "rsmnTotDoc": 1}
                ]
            })))
            .mount(&server)
            .await;

        let mut session = session_for(&server).await;
        session.authenticate().await.unwrap();
        let summary = session
            .documents_summary(TaxPeriod::new(2024, 1).unwrap())
            .await
            .unwrap();
        assert_eq!(summary.purchase_codes(), vec![33, 61]);
        assert_eq!(summary.sales_codes(), vec![33]);
        session.close().await;
    }

    #[tokio::test]
    async fn purchase_rows_parse_into_portal_shape() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/login"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/recursos/v1/rcv/compras"))
            .and(query_param("codTipoDoc", "33"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [
                    {"detNroDoc": 4155, "detTipoDoc": 33, "detFchDoc": "15/01/2024",
                     "detRutDoc": 76543210, "detDvDoc": "5", "detRznSoc": "Proveedor SpA",
                     "detMntNeto": 100000, "detMntIVA": 19000, "detMntTotal": 119000},
                    {"sin_forma": true}
                ]
            })))
            .mount(&server)
            .await;

        let mut session = session_for(&server).await;
        session.authenticate().await.unwrap();
        let docs = session
            .purchase_documents(TaxPeriod::new(2024, 1).unwrap(), 33)
            .await
            .unwrap();
        // The shapeless row is dropped at the boundary.
        assert_eq!(docs.len(), 1);
        session.close().await;
    }

    #[tokio::test]
    async fn closed_session_refuses_calls() {
        let server = MockServer::start().await;
        let mut session = session_for(&server).await;
        session.close().await;
        assert!(matches!(
            session.authenticate().await,
            Err(PortalError::Closed)
        ));
    }
}
