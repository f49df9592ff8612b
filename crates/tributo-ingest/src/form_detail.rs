//! Per-form detail extraction.
//!
//! Pulls the field-level values of one declared form and persists the
//! enrichment block. One extractor per form; extractors across forms may
//! run in parallel, each over its own portal session. Field values keep
//! their original rendering and gain a canonical numeric `value_formatted`
//! (`None` for empty or placeholder renderings).

use std::time::Duration;

use chrono::Utc;

use tributo_core::parse::parse_chilean_number;
use tributo_core::FormId;
use tributo_portal::{FormDetailField, PortalError, PortalSession};
use tributo_store::{FormDetailValue, FormRecord, FormStore};

use crate::error::IngestError;

/// Identifier recorded on forms enriched through this path.
const EXTRACTION_METHOD: &str = "portal_form_detail";

/// Wall-clock ceiling per form, session spin-up included.
const PER_FORM_TIMEOUT: Duration = Duration::from_secs(180);

/// Result of one extraction attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetailOutcome {
    /// The form already carries details and no refresh was forced.
    AlreadyExtracted,
    /// Details fetched and persisted; carries the field count.
    Extracted { fields: usize },
}

/// Extracts detail for forms of one company over one portal session.
pub struct DetailExtractor<P, S> {
    session: P,
    store: S,
}

impl<P, S> DetailExtractor<P, S>
where
    P: PortalSession,
    S: FormStore,
{
    pub fn new(session: P, store: S) -> Self {
        Self { session, store }
    }

    /// Extract one form's detail. Refuses forms without a portal folio;
    /// skips forms already enriched unless `force_refresh`. Closes the
    /// session on every path.
    pub async fn extract(
        mut self,
        form_id: FormId,
        force_refresh: bool,
    ) -> Result<DetailOutcome, IngestError> {
        let outcome =
            match tokio::time::timeout(PER_FORM_TIMEOUT, self.extract_inner(form_id, force_refresh))
                .await
            {
                Ok(outcome) => outcome,
                Err(_) => Err(IngestError::Portal(PortalError::Timeout {
                    endpoint: "form_detail".to_string(),
                })),
            };
        self.session.close().await;
        outcome
    }

    async fn extract_inner(
        &mut self,
        form_id: FormId,
        force_refresh: bool,
    ) -> Result<DetailOutcome, IngestError> {
        let form = self
            .store
            .form_by_id(form_id)
            .await?
            .ok_or_else(|| IngestError::MissingFolio(form_id.to_string()))?;

        if form.details_extracted && !force_refresh {
            tracing::info!(
                folio = %form.sii_folio,
                extracted_at = ?form.details_extracted_at,
                "form already has extracted details"
            );
            return Ok(DetailOutcome::AlreadyExtracted);
        }
        if form.sii_folio.is_empty() {
            return Err(IngestError::MissingFolio(describe(&form)));
        }

        match self.session.authenticate().await {
            Ok(true) => {}
            Ok(false) => {
                return Err(IngestError::Portal(tributo_portal::PortalError::Auth {
                    tax_id: form.issuer.canonical(),
                }))
            }
            Err(e) => return Err(IngestError::Portal(e)),
        }

        let detail = self
            .session
            .form_detail(&form.sii_folio, &form.tax_period)
            .await?;

        let fields: Vec<FormDetailValue> = detail.fields.iter().map(normalise_field).collect();
        let now = Utc::now();
        self.store
            .mark_details_extracted(form.id, EXTRACTION_METHOD, &fields, now)
            .await?;

        tracing::info!(
            folio = %form.sii_folio,
            fields = fields.len(),
            "form details extracted"
        );
        Ok(DetailOutcome::Extracted {
            fields: fields.len(),
        })
    }
}

fn describe(form: &FormRecord) -> String {
    format!("{} {}", form.form_code, form.tax_period)
}

/// Keep the original rendering; derive the canonical numeric value.
fn normalise_field(field: &FormDetailField) -> FormDetailValue {
    FormDetailValue {
        code: field.code.clone(),
        label: field.label.clone(),
        value_original: field.value.clone(),
        value_formatted: parse_chilean_number(&field.value).ok().flatten(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use tributo_core::{FormCode, FormStatus, Rut};
    use tributo_portal::{FormDetail, MockPortalSession};
    use tributo_store::MemStore;

    fn form(folio: &str) -> FormRecord {
        let now = Utc::now();
        FormRecord {
            id: FormId::new(),
            company_id: None,
            issuer: Rut::parse("77794858-K").unwrap(),
            form_code: FormCode::F29,
            tax_year: 2024,
            tax_month: Some(1),
            tax_period: "2024-01".into(),
            status: FormStatus::Submitted,
            due_date: None,
            submission_date: None,
            form_data: json!({}),
            total_tax_due: None,
            total_paid: rust_decimal::Decimal::ZERO,
            balance_due: None,
            sii_folio: folio.to_string(),
            sii_response: json!({}),
            details_extracted: false,
            details_extracted_at: None,
            details_extraction_method: String::new(),
            details_data: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    fn detail(folio: &str) -> FormDetail {
        FormDetail {
            folio: folio.to_string(),
            period: "2024-01".into(),
            fields: vec![
                FormDetailField {
                    code: "538".into(),
                    label: "Débito fiscal".into(),
                    value: "1.023.785".into(),
                },
                FormDetailField {
                    code: "062".into(),
                    label: "PPM".into(),
                    value: "0,25".into(),
                },
                FormDetailField {
                    code: "091".into(),
                    label: "Sin valor".into(),
                    value: "N/A".into(),
                },
            ],
            subtables: Vec::new(),
        }
    }

    #[tokio::test]
    async fn extracts_and_normalises_fields() {
        let store = MemStore::new();
        let record = form("7904207766");
        store.insert_form(&record).await.unwrap();

        let session = MockPortalSession::new().with_detail("7904207766", detail("7904207766"));
        let extractor = DetailExtractor::new(session, store.clone());
        let outcome = extractor.extract(record.id, false).await.unwrap();
        assert_eq!(outcome, DetailOutcome::Extracted { fields: 3 });

        let reloaded = store.form_by_id(record.id).await.unwrap().unwrap();
        assert!(reloaded.details_extracted);
        assert!(reloaded.details_extracted_at.is_some());
        assert_eq!(reloaded.details_extraction_method, EXTRACTION_METHOD);
        assert_eq!(reloaded.details_data.len(), 3);
        assert_eq!(reloaded.details_data[0].value_formatted, Some(dec!(1023785)));
        assert_eq!(reloaded.details_data[1].value_formatted, Some(dec!(0.25)));
        assert_eq!(reloaded.details_data[2].value_formatted, None);
        assert_eq!(reloaded.details_data[2].value_original, "N/A");
    }

    #[tokio::test]
    async fn already_extracted_short_circuits_without_portal_calls() {
        let store = MemStore::new();
        let mut record = form("7904207766");
        record.details_extracted = true;
        record.details_extracted_at = Some(Utc::now());
        store.insert_form(&record).await.unwrap();

        let extractor = DetailExtractor::new(MockPortalSession::new(), store.clone());
        let outcome = extractor.extract(record.id, false).await.unwrap();
        assert_eq!(outcome, DetailOutcome::AlreadyExtracted);
    }

    #[tokio::test]
    async fn force_refresh_re_extracts() {
        let store = MemStore::new();
        let mut record = form("7904207766");
        record.details_extracted = true;
        record.details_extracted_at = Some(Utc::now());
        store.insert_form(&record).await.unwrap();

        let session = MockPortalSession::new().with_detail("7904207766", detail("7904207766"));
        let extractor = DetailExtractor::new(session, store.clone());
        let outcome = extractor.extract(record.id, true).await.unwrap();
        assert_eq!(outcome, DetailOutcome::Extracted { fields: 3 });
    }

    #[tokio::test]
    async fn empty_folio_is_refused() {
        let store = MemStore::new();
        let record = form("");
        store.insert_form(&record).await.unwrap();

        let extractor = DetailExtractor::new(MockPortalSession::new(), store.clone());
        assert!(matches!(
            extractor.extract(record.id, false).await,
            Err(IngestError::MissingFolio(_))
        ));
    }
}
